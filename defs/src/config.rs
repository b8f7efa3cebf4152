use std::env;

use crate::errors::Error;

/// Process-level configuration, gathered once at startup from environment
/// variables.
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Namespace the controller watches; empty string means all namespaces.
    pub watch_namespace: String,
    /// Base directory for repository clones.
    pub repo_base: String,
    /// Shared secret for webhook signature verification; `None` when unset.
    pub webhook_secret: Option<String>,
    /// Listen address of the webhook/health/metrics server.
    pub webhook_addr: String,
    /// Event sink URL; `None` disables the emitter.
    pub events_endpoint: Option<String>,
    pub events_retry_delay_ms: u64,
    pub events_max_retries: u32,
    pub leader_election: bool,
    /// Lease holder identity when leader election is enabled.
    pub pod_name: String,
}

fn optional(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => None,
    }
}

fn numeric(name: &str, default: u64) -> Result<u64, Error> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => v
            .parse::<u64>()
            .map_err(|_| Error::config(format!("{} must be a number, got {:?}", name, v))),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Error> {
        Ok(Config {
            watch_namespace: env::var("NOPEA_NAMESPACE").unwrap_or_default(),
            repo_base: env::var("NOPEA_REPO_BASE")
                .unwrap_or_else(|_| "/var/lib/nopea/repos".to_string()),
            webhook_secret: optional("NOPEA_WEBHOOK_SECRET"),
            webhook_addr: env::var("NOPEA_WEBHOOK_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            events_endpoint: optional("NOPEA_EVENTS_ENDPOINT"),
            events_retry_delay_ms: numeric("NOPEA_EVENTS_RETRY_DELAY_MS", 1000)?,
            events_max_retries: numeric("NOPEA_EVENTS_MAX_RETRIES", 3)? as u32,
            leader_election: env::var("NOPEA_LEADER_ELECTION").as_deref() == Ok("true"),
            pod_name: env::var("POD_NAME").unwrap_or_else(|_| "nopea-0".to_string()),
        })
    }
}
