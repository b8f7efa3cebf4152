use serde_json::{json, Map, Value};

pub const EVENT_SERVICE_DEPLOYED: &str = "dev.cdevents.service.deployed.0.3.0";
pub const EVENT_SERVICE_UPGRADED: &str = "dev.cdevents.service.upgraded.0.3.0";
pub const EVENT_SERVICE_REMOVED: &str = "dev.cdevents.service.removed.0.3.0";
pub const EVENT_ENVIRONMENT_CREATED: &str = "dev.cdevents.environment.created.0.3.0";
pub const EVENT_ENVIRONMENT_MODIFIED: &str = "dev.cdevents.environment.modified.0.3.0";

/// A CDEvents lifecycle event as emitted by a worker. Serialized onto the
/// wire wrapped in a CloudEvents envelope (`to_cloudevent`).
#[derive(Clone, Debug, PartialEq)]
pub struct CdEvent {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub timestamp: String,
    pub subject_id: String,
    /// `subject.content`: environment, artifactId and per-event extras.
    pub content: Value,
}

impl CdEvent {
    fn new(
        id: String,
        timestamp: String,
        event_type: &str,
        repo: &str,
        commit: &str,
        target_namespace: &str,
        extra: Map<String, Value>,
    ) -> Self {
        let mut content = Map::new();
        content.insert(
            "environment".to_string(),
            json!({"id": if target_namespace.is_empty() { "default" } else { target_namespace }}),
        );
        content.insert(
            "artifactId".to_string(),
            Value::String(format!("pkg:git/{}@{}", repo, commit)),
        );
        content.extend(extra);
        CdEvent {
            id,
            event_type: event_type.to_string(),
            source: format!("/nopea/worker/{}", repo),
            timestamp,
            subject_id: repo.to_string(),
            content: Value::Object(content),
        }
    }

    /// First successful sync of a repository.
    pub fn service_deployed(
        id: String,
        timestamp: String,
        repo: &str,
        commit: &str,
        target_namespace: &str,
        manifest_count: usize,
        duration_ms: u64,
    ) -> Self {
        let mut extra = Map::new();
        extra.insert("manifests".to_string(), json!(manifest_count));
        extra.insert("duration_ms".to_string(), json!(duration_ms));
        Self::new(
            id,
            timestamp,
            EVENT_SERVICE_DEPLOYED,
            repo,
            commit,
            target_namespace,
            extra,
        )
    }

    /// Any successful sync after the first.
    pub fn service_upgraded(
        id: String,
        timestamp: String,
        repo: &str,
        commit: &str,
        target_namespace: &str,
        manifest_count: usize,
        duration_ms: u64,
        previous_commit: &str,
    ) -> Self {
        let mut extra = Map::new();
        extra.insert("manifests".to_string(), json!(manifest_count));
        extra.insert("duration_ms".to_string(), json!(duration_ms));
        extra.insert("previous_commit".to_string(), json!(previous_commit));
        Self::new(
            id,
            timestamp,
            EVENT_SERVICE_UPGRADED,
            repo,
            commit,
            target_namespace,
            extra,
        )
    }

    /// Sync failure; `error` is the `{"type", "message"}` wire form.
    pub fn sync_failed(
        id: String,
        timestamp: String,
        repo: &str,
        commit: &str,
        target_namespace: &str,
        error: Value,
    ) -> Self {
        let mut extra = Map::new();
        extra.insert("outcome".to_string(), json!("failure"));
        extra.insert("error".to_string(), error);
        Self::new(
            id,
            timestamp,
            EVENT_SERVICE_REMOVED,
            repo,
            commit,
            target_namespace,
            extra,
        )
    }

    /// CloudEvents 1.0 envelope with the CDEvents subject as payload.
    pub fn to_cloudevent(&self) -> Value {
        json!({
            "specversion": "1.0",
            "id": self.id,
            "source": self.source,
            "type": self.event_type,
            "time": self.timestamp,
            "datacontenttype": "application/json",
            "data": {
                "context": {
                    "version": "0.3.0",
                    "id": self.id,
                    "source": self.source,
                    "type": self.event_type,
                    "timestamp": self.timestamp,
                },
                "subject": {
                    "id": self.subject_id,
                    "content": self.content,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deployed_event_content() {
        let event = CdEvent::service_deployed(
            "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            "2026-01-10T12:00:00.000Z".to_string(),
            "my-app",
            "abc123",
            "prod",
            3,
            850,
        );
        assert_eq!(event.event_type, EVENT_SERVICE_DEPLOYED);
        assert_eq!(event.source, "/nopea/worker/my-app");
        assert_eq!(event.content["artifactId"], "pkg:git/my-app@abc123");
        assert_eq!(event.content["environment"]["id"], "prod");
        assert_eq!(event.content["manifests"], 3);
    }

    #[test]
    fn test_environment_defaults_in_content() {
        let event = CdEvent::service_deployed(
            "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            "2026-01-10T12:00:00.000Z".to_string(),
            "my-app",
            "abc123",
            "",
            1,
            10,
        );
        assert_eq!(event.content["environment"]["id"], "default");
    }

    #[test]
    fn test_failure_event_shape() {
        let event = CdEvent::sync_failed(
            "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            "2026-01-10T12:00:00.000Z".to_string(),
            "my-app",
            "abc123",
            "prod",
            serde_json::json!({"type": "git_error", "message": "network timeout"}),
        );
        assert_eq!(event.event_type, EVENT_SERVICE_REMOVED);
        assert_eq!(event.content["outcome"], "failure");
        assert_eq!(event.content["error"]["type"], "git_error");
    }

    #[test]
    fn test_cloudevent_envelope() {
        let event = CdEvent::service_upgraded(
            "01ARZ3NDEKTSV4RRFFQ69G5FAV".to_string(),
            "2026-01-10T12:00:00.000Z".to_string(),
            "my-app",
            "def456",
            "prod",
            3,
            120,
            "abc123",
        );
        let envelope = event.to_cloudevent();
        assert_eq!(envelope["specversion"], "1.0");
        assert_eq!(envelope["type"], EVENT_SERVICE_UPGRADED);
        assert_eq!(envelope["data"]["subject"]["id"], "my-app");
        assert_eq!(
            envelope["data"]["subject"]["content"]["previous_commit"],
            "abc123"
        );
    }
}
