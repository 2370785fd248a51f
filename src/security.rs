use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const KEY_HEADER: &str = "X-Ops-Key";
const DEFAULT_KEYS: &str = "demo-operator:demo-key";

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, OperatorRecord>>,
    limiter: Arc<TokenBuckets>,
}

/// Who made the request. Inserted as a request extension by
/// [`require_api_auth`].
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct OperatorRecord {
    operator: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("OPS_API_KEYS").unwrap_or_else(|_| DEFAULT_KEYS.to_string());
        Self {
            records: Arc::new(parse_keys(&raw)),
            limiter: Arc::new(TokenBuckets::from_env()),
        }
    }

    /// Build from an `operator:key,...` list with an explicit bucket shape.
    pub fn with_keys(raw: &str, rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            records: Arc::new(parse_keys(raw)),
            limiter: Arc::new(TokenBuckets::new(rate_per_sec, capacity)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            operator: record.operator.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "missing_api_key",
            "Provide X-Ops-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(error_response(
            StatusCode::UNAUTHORIZED,
            "invalid_api_key",
            "Key not recognized",
        ));
    };

    match state.limiter.consume(&context.operator).await {
        Ok(permit) => {
            request.extensions_mut().insert(context);
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            warn!(target = "ops.api", operator = %context.operator, "rate limited");
            let mut response =
                error_response(StatusCode::TOO_MANY_REQUESTS, "rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
    {
        return Some(token);
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// `Bearer <token>` with a separating space; anything else is ignored.
fn bearer_token(raw: &str) -> Option<String> {
    let (scheme, token) = raw.trim_start().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim().to_string()).filter(|token| !token.is_empty())
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (status, Json(payload)).into_response()
}

fn parse_keys(raw: &str) -> HashMap<String, OperatorRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let operator = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (operator, key) {
            (Some(operator), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    OperatorRecord {
                        operator: operator.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            // Only the position is logged; the entry may hold a secret.
            _ => warn!(target = "ops.config", entry = idx + 1, "ignored malformed OPS_API_KEYS entry"),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "ops.config",
            "OPS_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            OperatorRecord {
                operator: "demo-operator".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(target = "ops.config", key_count = entries.len(), "loaded operator keys");
    }
    entries
}

struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Mutex<HashMap<String, BucketState>>,
}

impl TokenBuckets {
    fn new(rate_per_sec: f64, capacity: f64) -> Self {
        Self {
            rate_per_sec,
            capacity,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self::new(rate_per_sec, capacity)
    }

    async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        let shape = BucketShape {
            capacity: self.capacity,
            tokens: state.tokens,
            rate: self.rate_per_sec,
        };
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit(BucketShape {
                tokens: state.tokens,
                ..shape
            }))
        } else {
            let retry_after = ((1.0 - state.tokens) / self.rate_per_sec).max(0.0);
            Err(RateExceeded { retry_after, shape })
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy)]
struct BucketShape {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl BucketShape {
    fn reset_secs(&self) -> u64 {
        ((self.capacity - self.tokens) / self.rate).ceil().max(0.0) as u64
    }

    fn apply_headers(&self, headers: &mut http::HeaderMap, remaining: u64) {
        headers.insert("X-RateLimit-Limit", number_header(self.capacity as u64));
        headers.insert("X-RateLimit-Remaining", number_header(remaining));
        headers.insert("X-RateLimit-Reset", number_header(self.reset_secs()));
    }
}

fn number_header(value: u64) -> HeaderValue {
    HeaderValue::from(value)
}

#[derive(Debug, Clone)]
struct RatePermit(BucketShape);

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let remaining = self.0.tokens.max(0.0).floor() as u64;
        self.0.apply_headers(headers, remaining);
    }
}

#[derive(Debug, Clone)]
struct RateExceeded {
    retry_after: f64,
    shape: BucketShape,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = self.retry_after.ceil().max(1.0) as u64;
        headers.insert(http::header::RETRY_AFTER, number_header(retry));
        self.shape.apply_headers(headers, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, middleware, routing::get};
    use tower::ServiceExt;

    async fn whoami(Extension(context): Extension<AuthContext>) -> String {
        format!("{}/{}", context.operator, context.api_key_id)
    }

    fn app(auth: AuthState) -> Router {
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth, require_api_auth))
    }

    fn request(header: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().uri("/whoami");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn malformed_entries_are_skipped() {
        let keys = parse_keys("sato:k1, broken ,:nokey,tanaka:k2");
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["k1"].operator, "sato");
        assert_eq!(keys["k2"].api_key_id, "key-04");
    }

    #[test]
    fn empty_key_list_falls_back_to_demo() {
        let keys = parse_keys("  ");
        assert_eq!(keys["demo-key"].operator, "demo-operator");
    }

    #[tokio::test]
    async fn missing_and_unknown_keys_are_rejected() {
        let auth = AuthState::with_keys("sato:secret", 5.0, 10.0);
        let missing = app(auth.clone()).oneshot(request(None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(missing).await.contains("missing_api_key"));

        let wrong = app(auth)
            .oneshot(request(Some((KEY_HEADER, "nope"))))
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(wrong).await.contains("invalid_api_key"));
    }

    #[tokio::test]
    async fn bearer_and_header_keys_attach_operator() {
        let auth = AuthState::with_keys("sato:secret", 5.0, 10.0);
        let bearer = app(auth.clone())
            .oneshot(request(Some(("Authorization", "Bearer secret"))))
            .await
            .unwrap();
        assert_eq!(bearer.status(), StatusCode::OK);
        assert_eq!(bearer.headers()["X-RateLimit-Limit"], "10");
        assert_eq!(body_text(bearer).await, "sato/key-01");

        let header = app(auth)
            .oneshot(request(Some((KEY_HEADER, " secret "))))
            .await
            .unwrap();
        assert_eq!(header.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn exhausted_bucket_returns_429_with_retry_after() {
        let auth = AuthState::with_keys("sato:secret", 0.01, 1.0);
        let router = app(auth);
        let first = router
            .clone()
            .oneshot(request(Some((KEY_HEADER, "secret"))))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["X-RateLimit-Remaining"], "0");

        let second = router
            .oneshot(request(Some((KEY_HEADER, "secret"))))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key(http::header::RETRY_AFTER));
        assert_eq!(second.headers()["X-RateLimit-Remaining"], "0");
    }

    #[tokio::test]
    async fn malformed_bearer_falls_through_to_key_header() {
        let auth = AuthState::with_keys("sato:secret", 5.0, 10.0);
        let empty_bearer = Request::builder()
            .uri("/whoami")
            .header("Authorization", "Bearer ")
            .header(KEY_HEADER, "secret")
            .body(Body::empty())
            .unwrap();
        let response = app(auth.clone()).oneshot(empty_bearer).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let glued = app(auth)
            .oneshot(request(Some(("Authorization", "Bearersecret"))))
            .await
            .unwrap();
        assert_eq!(glued.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(glued).await.contains("missing_api_key"));
    }

    #[tokio::test]
    async fn reset_and_retry_after_follow_refill_rate() {
        let auth = AuthState::with_keys("sato:secret", 0.5, 1.0);
        let router = app(auth);
        let first = router
            .clone()
            .oneshot(request(Some((KEY_HEADER, "secret"))))
            .await
            .unwrap();
        assert_eq!(first.headers()["X-RateLimit-Reset"], "2");

        let limited = router
            .oneshot(request(Some((KEY_HEADER, "secret"))))
            .await
            .unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers()[http::header::RETRY_AFTER], "2");
        assert_eq!(limited.headers()["X-RateLimit-Reset"], "2");
        assert_eq!(limited.headers()["X-RateLimit-Limit"], "1");
    }
}
