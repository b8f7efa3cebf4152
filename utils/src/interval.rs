use std::sync::OnceLock;

use regex::Regex;

const DEFAULT_INTERVAL_MS: u64 = 300_000;

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)(s|m|h)$").unwrap())
}

/// Parses a duration string of the form "30s", "5m" or "1h" into
/// milliseconds.
pub fn parse_duration_ms(duration: &str) -> Option<u64> {
    let caps = duration_re().captures(duration)?;
    let amount = caps[1].parse::<u64>().ok()?;
    let unit_ms = match &caps[2] {
        "s" => 1_000,
        "m" => 60_000,
        _ => 3_600_000,
    };
    Some(amount.saturating_mul(unit_ms))
}

/// Poll-interval parse: any value `parse_duration_ms` rejects falls back to
/// the 5-minute default.
pub fn parse_interval_ms(interval: &str) -> u64 {
    parse_duration_ms(interval).unwrap_or(DEFAULT_INTERVAL_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_valid_intervals() {
        assert_eq!(parse_interval_ms("30s"), 30_000);
        assert_eq!(parse_interval_ms("5m"), 300_000);
        assert_eq!(parse_interval_ms("1h"), 3_600_000);
    }

    #[test]
    fn test_duration_parse() {
        assert_eq!(parse_duration_ms("10s"), Some(10_000));
        assert_eq!(parse_duration_ms("2h"), Some(7_200_000));
        assert_eq!(parse_duration_ms("10"), None);
        assert_eq!(parse_duration_ms("ten seconds"), None);
    }

    #[test]
    fn test_invalid_intervals_default() {
        assert_eq!(parse_interval_ms(""), 300_000);
        assert_eq!(parse_interval_ms("5"), 300_000);
        assert_eq!(parse_interval_ms("5d"), 300_000);
        assert_eq!(parse_interval_ms("m5"), 300_000);
        assert_eq!(parse_interval_ms("5 m"), 300_000);
        assert_eq!(parse_interval_ms("-5m"), 300_000);
    }
}
