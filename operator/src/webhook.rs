use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::OnceLock;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use hmac::{Hmac, Mac};
use log::{debug, info, warn};
use nopea_defs::WebhookDenial;
use nopea_store::Cache;
use nopea_utils::UlidGen;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::fleet::Fleet;
use crate::metrics::Metrics;

type HmacSha256 = Hmac<Sha256>;

fn repo_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]{1,253}$").unwrap())
}

fn commit_sha_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9a-f]{40}|[0-9a-f]{64})$").unwrap())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Provider {
    Github,
    Gitlab,
}

/// The pieces of a push event the workers care about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushEvent {
    pub commit: String,
    pub branch: String,
    pub repository: Option<String>,
}

#[derive(Deserialize)]
struct GithubPush {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    repository: Option<GithubRepository>,
}

#[derive(Deserialize)]
struct GithubRepository {
    full_name: String,
}

#[derive(Deserialize)]
struct GitlabPush {
    object_kind: String,
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    project: Option<GitlabProject>,
}

#[derive(Deserialize)]
struct GitlabProject {
    path_with_namespace: String,
}

fn detect_provider(headers: &HeaderMap) -> Option<(Provider, String)> {
    if let Some(event) = headers.get("x-github-event") {
        return Some((Provider::Github, event.to_str().unwrap_or("").to_string()));
    }
    if let Some(event) = headers.get("x-gitlab-event") {
        return Some((Provider::Gitlab, event.to_str().unwrap_or("").to_string()));
    }
    None
}

fn verify_github_signature(
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<(), WebhookDenial> {
    let Some(signature) = signature else {
        return Err(WebhookDenial::MissingSignature);
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

    // Constant-time comparison to prevent timing attacks.
    if expected.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(WebhookDenial::InvalidSignature)
    }
}

fn verify_gitlab_token(secret: &str, token: Option<&str>) -> Result<(), WebhookDenial> {
    let Some(token) = token else {
        return Err(WebhookDenial::MissingSignature);
    };
    if secret.as_bytes().ct_eq(token.as_bytes()).unwrap_u8() == 1 {
        Ok(())
    } else {
        Err(WebhookDenial::InvalidSignature)
    }
}

fn branch_of(git_ref: &str) -> String {
    git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(git_ref)
        .to_string()
}

fn parse_push(provider: Provider, event: &str, body: &[u8]) -> Result<PushEvent, WebhookDenial> {
    let push = match provider {
        Provider::Github => {
            if event != "push" {
                return Err(WebhookDenial::UnsupportedEvent);
            }
            let payload: GithubPush =
                serde_json::from_slice(body).map_err(|_| WebhookDenial::UnsupportedEvent)?;
            PushEvent {
                commit: payload.after,
                branch: branch_of(&payload.git_ref),
                repository: payload.repository.map(|r| r.full_name),
            }
        }
        Provider::Gitlab => {
            let payload: GitlabPush =
                serde_json::from_slice(body).map_err(|_| WebhookDenial::UnsupportedEvent)?;
            if payload.object_kind != "push" {
                return Err(WebhookDenial::UnsupportedEvent);
            }
            PushEvent {
                commit: payload.after,
                branch: branch_of(&payload.git_ref),
                repository: payload.project.map(|p| p.path_with_namespace),
            }
        }
    };

    if !commit_sha_re().is_match(&push.commit) {
        return Err(WebhookDenial::InvalidCommitSha);
    }
    Ok(push)
}

fn denial_status(denial: WebhookDenial) -> StatusCode {
    match denial {
        WebhookDenial::InvalidSignature | WebhookDenial::MissingSignature => {
            StatusCode::UNAUTHORIZED
        }
        WebhookDenial::NotConfigured => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn deny(denial: WebhookDenial) -> (StatusCode, Json<Value>) {
    (denial_status(denial), Json(json!({"error": denial.code()})))
}

fn ignored(reason: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({"status": "ignored", "reason": reason})))
}

pub struct AppState {
    pub fleet: Arc<Fleet>,
    pub cache: Arc<Cache>,
    pub ids: Arc<UlidGen>,
    pub metrics: Arc<Metrics>,
    pub webhook_secret: Option<String>,
    pub controller_ready: Arc<AtomicBool>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook/{repo}", post(webhook_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if !repo_name_re().is_match(&repo) {
        return deny(WebhookDenial::InvalidRepoName);
    }

    let Some((provider, event)) = detect_provider(&headers) else {
        return deny(WebhookDenial::UnknownProvider);
    };

    // Refuse to verify anything against an empty secret.
    let secret = match state.webhook_secret.as_deref() {
        Some(secret) if !secret.is_empty() => secret,
        _ => return deny(WebhookDenial::NotConfigured),
    };

    let verified = match provider {
        Provider::Github => verify_github_signature(
            secret,
            &body,
            headers
                .get("x-hub-signature-256")
                .and_then(|v| v.to_str().ok()),
        ),
        Provider::Gitlab => verify_gitlab_token(
            secret,
            headers.get("x-gitlab-token").and_then(|v| v.to_str().ok()),
        ),
    };
    if let Err(denial) = verified {
        warn!("webhook for {} rejected: {}", repo, denial.code());
        return deny(denial);
    }

    let push = match parse_push(provider, &event, &body) {
        Ok(push) => push,
        Err(denial) => return deny(denial),
    };
    debug!(
        "webhook push for {} ({:?}): {} on {}",
        repo, push.repository, push.commit, push.branch
    );

    let Some(worker) = state.fleet.get_worker(&repo) else {
        return ignored("unknown_repository");
    };
    if worker.spec.branch != push.branch {
        return ignored("branch_mismatch");
    }

    // Fire and forget: the HTTP response never waits for the sync.
    let commit = push.commit.clone();
    info!("webhook accepted for {} at {}", repo, commit);
    tokio::spawn(async move {
        worker.notify_webhook(commit).await;
    });

    (
        StatusCode::OK,
        Json(json!({"status": "accepted", "commit": push.commit})),
    )
}

async fn health_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let cache_ok = state.cache.available();
    let ulid_ok = state.ids.available();
    let healthy = cache_ok && ulid_ok;

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "checks": {
            "cache": if cache_ok { "ok" } else { "failed" },
            "ulid": if ulid_ok { "ok" } else { "failed" },
        },
    });
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    if state.controller_ready.load(Ordering::SeqCst) {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not_ready"})),
        )
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::null_deps;
    use axum::body::Body;
    use axum::http::Request;
    use nopea_defs::RepoSpec;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    const SECRET: &str = "my-webhook-secret";
    const COMMIT: &str = "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3";

    fn github_body() -> String {
        json!({
            "ref": "refs/heads/main",
            "after": COMMIT,
            "repository": {"full_name": "acme/my-app"},
        })
        .to_string()
    }

    fn github_signature(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn app_state(secret: Option<&str>) -> Arc<AppState> {
        let deps = null_deps();
        let cache = deps.cache.clone();
        let ids = deps.ids.clone();
        let metrics = deps.metrics.clone();
        let fleet = Fleet::new(deps);
        fleet
            .start_worker(RepoSpec::new(
                "my-app",
                "default",
                "https://git.example.com/my-app.git",
            ))
            .unwrap();
        Arc::new(AppState {
            fleet,
            cache,
            ids,
            metrics,
            webhook_secret: secret.map(|s| s.to_string()),
            controller_ready: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn send(
        state: Arc<AppState>,
        path: &str,
        headers: &[(&str, &str)],
        body: &str,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method("POST").uri(path);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = router(state)
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_valid_github_push_is_accepted() {
        let body = github_body();
        let signature = github_signature(SECRET, body.as_bytes());
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[
                ("x-github-event", "push"),
                ("x-hub-signature-256", &signature),
            ],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["status"], "accepted");
        assert_eq!(response["commit"], COMMIT);
    }

    #[tokio::test]
    async fn test_tampered_signature_is_rejected() {
        let body = github_body();
        let mut signature = github_signature(SECRET, body.as_bytes());
        // Flip the last hex digit.
        let flipped = if signature.ends_with('0') { "1" } else { "0" };
        signature.replace_range(signature.len() - 1.., flipped);

        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[
                ("x-github-event", "push"),
                ("x-hub-signature-256", &signature),
            ],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["error"], "invalid_signature");
    }

    #[tokio::test]
    async fn test_missing_signature() {
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[("x-github-event", "push")],
            &github_body(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["error"], "missing_signature");
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[],
            &github_body(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "unknown_provider");
    }

    #[tokio::test]
    async fn test_unconfigured_secret_refuses_verification() {
        let body = github_body();
        let signature = github_signature(SECRET, body.as_bytes());
        let (status, response) = send(
            app_state(None),
            "/webhook/my-app",
            &[
                ("x-github-event", "push"),
                ("x-hub-signature-256", &signature),
            ],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["error"], "webhook_not_configured");
    }

    #[tokio::test]
    async fn test_non_push_event_is_unsupported() {
        let body = github_body();
        let signature = github_signature(SECRET, body.as_bytes());
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[
                ("x-github-event", "ping"),
                ("x-hub-signature-256", &signature),
            ],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "unsupported_event");
    }

    #[tokio::test]
    async fn test_bad_commit_sha() {
        let body = json!({
            "ref": "refs/heads/main",
            "after": "not-a-sha",
            "repository": {"full_name": "acme/my-app"},
        })
        .to_string();
        let signature = github_signature(SECRET, body.as_bytes());
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[
                ("x-github-event", "push"),
                ("x-hub-signature-256", &signature),
            ],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "invalid_commit_sha");
    }

    #[tokio::test]
    async fn test_bad_repo_name_in_path() {
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/bad%2Fname",
            &[("x-github-event", "push")],
            &github_body(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"], "invalid_repo_name");
    }

    #[tokio::test]
    async fn test_gitlab_token_flow() {
        let body = json!({
            "object_kind": "push",
            "ref": "refs/heads/main",
            "after": COMMIT,
            "project": {"path_with_namespace": "acme/my-app"},
        })
        .to_string();

        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[("x-gitlab-event", "Push Hook"), ("x-gitlab-token", SECRET)],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["status"], "accepted");

        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[("x-gitlab-event", "Push Hook"), ("x-gitlab-token", "wrong")],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["error"], "invalid_signature");
    }

    #[tokio::test]
    async fn test_unknown_repository_is_ignored() {
        let body = github_body();
        let signature = github_signature(SECRET, body.as_bytes());
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/other-app",
            &[
                ("x-github-event", "push"),
                ("x-hub-signature-256", &signature),
            ],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["status"], "ignored");
        assert_eq!(response["reason"], "unknown_repository");
    }

    #[tokio::test]
    async fn test_branch_mismatch_is_ignored() {
        let body = json!({
            "ref": "refs/heads/feature-x",
            "after": COMMIT,
            "repository": {"full_name": "acme/my-app"},
        })
        .to_string();
        let signature = github_signature(SECRET, body.as_bytes());
        let (status, response) = send(
            app_state(Some(SECRET)),
            "/webhook/my-app",
            &[
                ("x-github-event", "push"),
                ("x-hub-signature-256", &signature),
            ],
            &body,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["reason"], "branch_mismatch");
    }

    #[tokio::test]
    async fn test_health_and_ready_endpoints() {
        let state = app_state(Some(SECRET));

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state.clone())
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.controller_ready.store(true, Ordering::SeqCst);
        let response = router(state.clone())
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_exposes_prefix() {
        let state = app_state(Some(SECRET));
        state.metrics.workers_active.set(1);
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("nopea_workers_active 1"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = router(app_state(Some(SECRET)))
            .oneshot(
                Request::builder()
                    .uri("/somewhere")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
