use serde_json::{json, Value};
use thiserror::Error;

/// Rejection reasons surfaced by the webhook endpoint. These map 1:1 to the
/// `error` field of the HTTP response body and never mutate worker state.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDenial {
    #[error("signature header does not match the payload")]
    InvalidSignature,

    #[error("signature header is missing")]
    MissingSignature,

    #[error("request headers identify no supported git provider")]
    UnknownProvider,

    #[error("repository name in the URL path is not valid")]
    InvalidRepoName,

    #[error("commit sha in the payload is not a 40- or 64-char hex string")]
    InvalidCommitSha,

    #[error("only push events are accepted")]
    UnsupportedEvent,

    #[error("webhook secret is not configured")]
    NotConfigured,
}

impl WebhookDenial {
    pub fn code(&self) -> &'static str {
        match self {
            WebhookDenial::InvalidSignature => "invalid_signature",
            WebhookDenial::MissingSignature => "missing_signature",
            WebhookDenial::UnknownProvider => "unknown_provider",
            WebhookDenial::InvalidRepoName => "invalid_repo_name",
            WebhookDenial::InvalidCommitSha => "invalid_commit_sha",
            WebhookDenial::UnsupportedEvent => "unsupported_event",
            WebhookDenial::NotConfigured => "webhook_not_configured",
        }
    }
}

/// Error taxonomy of the reconciliation core. Every variant has a stable
/// snake_case wire name used in CRD conditions and failure events.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("git: {message}")]
    Git { message: String },

    #[error("parse: {message}")]
    Parse { message: String },

    /// A failed apply, recording how many manifests had already been
    /// applied before the failure.
    #[error("apply: {message} ({applied} applied before failure)")]
    Apply { message: String, applied: usize },

    #[error("kubernetes: {message}")]
    K8s { message: String },

    #[error("webhook: {0}")]
    Webhook(WebhookDenial),

    #[error("config: {message}")]
    Config { message: String },
}

impl Error {
    pub fn git(message: impl Into<String>) -> Self {
        Error::Git {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Error::Parse {
            message: message.into(),
        }
    }

    pub fn k8s(message: impl Into<String>) -> Self {
        Error::K8s {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Taxonomy entry used as CRD condition reason and metric label.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Error::Git { .. } => "git_error",
            Error::Parse { .. } => "parse_error",
            Error::Apply { .. } => "apply_error",
            Error::K8s { .. } => "k8s_error",
            Error::Webhook(_) => "webhook_error",
            Error::Config { .. } => "config_error",
        }
    }

    /// Wire form carried inside failure events. Always the fixed
    /// `{"type": ..., "message": ...}` shape, never a Rust-native tuple.
    pub fn to_event_value(&self) -> Value {
        json!({
            "type": self.wire_name(),
            "message": self.to_string(),
        })
    }
}
