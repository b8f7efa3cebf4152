use nopea_defs::{Error, CONDITION_PROGRESSING, CONDITION_READY};
use nopea_utils::get_timestamp;
use serde_json::{json, Value};

/// Status payloads merged onto the GitRepository `/status` subresource.
/// Built as plain JSON so workers can patch through the dynamic client.

fn condition(kind: &str, status: &str, reason: &str, message: &str) -> Value {
    json!({
        "type": kind,
        "status": status,
        "lastTransitionTime": get_timestamp(),
        "reason": reason,
        "message": message,
    })
}

pub fn syncing_status() -> Value {
    json!({
        "phase": "Syncing",
        "conditions": [condition(
            CONDITION_PROGRESSING,
            "True",
            "SyncStarted",
            "Sync in progress",
        )],
    })
}

pub fn synced_status(commit: &str, last_sync_time: &str, manifest_count: usize) -> Value {
    json!({
        "phase": "Synced",
        "lastAppliedCommit": commit,
        "lastSyncTime": last_sync_time,
        "conditions": [condition(
            CONDITION_READY,
            "True",
            "SyncSucceeded",
            &format!("Applied {} manifests", manifest_count),
        )],
    })
}

pub fn failed_status(error: &Error, last_commit: Option<&str>) -> Value {
    let mut status = json!({
        "phase": "Failed",
        "conditions": [condition(
            CONDITION_READY,
            "False",
            error.wire_name(),
            &error.to_string(),
        )],
    });
    if let Some(commit) = last_commit {
        status["lastAppliedCommit"] = json!(commit);
    }
    status
}

pub fn observed_generation_status(generation: i64) -> Value {
    json!({"observedGeneration": generation})
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_synced_status_message_counts_manifests() {
        let status = synced_status("abc123", "2026-01-10T12:00:00.000Z", 3);
        assert_eq!(status["phase"], "Synced");
        assert_eq!(status["lastAppliedCommit"], "abc123");
        assert_eq!(status["conditions"][0]["type"], "Ready");
        assert_eq!(status["conditions"][0]["status"], "True");
        assert_eq!(status["conditions"][0]["message"], "Applied 3 manifests");
    }

    #[test]
    fn test_failed_status_names_taxonomy_entry() {
        let status = failed_status(&Error::git("network timeout"), Some("abc123"));
        assert_eq!(status["phase"], "Failed");
        assert_eq!(status["conditions"][0]["type"], "Ready");
        assert_eq!(status["conditions"][0]["status"], "False");
        assert_eq!(status["conditions"][0]["reason"], "git_error");
        assert_eq!(status["lastAppliedCommit"], "abc123");
    }

    #[test]
    fn test_failed_status_without_commit() {
        let status = failed_status(&Error::parse("bad yaml"), None);
        assert_eq!(status.get("lastAppliedCommit"), None);
    }
}
