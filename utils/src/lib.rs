mod ids;
mod interval;
mod logging;
mod strings;
mod time;

pub use ids::UlidGen;
pub use interval::{parse_duration_ms, parse_interval_ms};
pub use logging::setup_logging;
pub use strings::sanitize_repo_dir;
pub use time::{get_epoch_ms, get_timestamp};
