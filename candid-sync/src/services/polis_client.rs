//! External consensus service API client
//!
//! Wraps the Polis-style HTTP API: conversation creation, comment and
//! vote submission, clustering math retrieval, and pseudonymous identity
//! (xid) issuance with a two-tier cache (in-process map plus the
//! persisted `polis_xid_tokens` table).
//!
//! Failure kinds matter to the retry policy downstream: auth rejections
//! and unreachability both take the long-backoff path, any other HTTP
//! error retries on the normal curve.

use candid_common::Coords;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Fixed prefix of pseudonymous identity tokens
pub const XID_PREFIX: &str = "candid:";

/// Derive a user's external identity token.
pub fn generate_xid(user_id: Uuid) -> String {
    format!("{}{}", XID_PREFIX, user_id)
}

/// Strip an xid back to the local user id string.
///
/// Tokens without the expected prefix yield an empty string rather than
/// an error.
pub fn strip_xid(xid: &str) -> String {
    match xid.strip_prefix(XID_PREFIX) {
        Some(rest) => rest.to_string(),
        None => String::new(),
    }
}

/// Polis client errors
#[derive(Debug, Error)]
pub enum PolisError {
    /// Credential or token rejected (401/403)
    #[error("Authentication rejected: {0}")]
    Auth(String),

    /// Connection refused or timed out; the service is unreachable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Any other HTTP error status
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}

impl PolisError {
    /// Whether the failure indicates the external service itself is down
    /// or rejecting credentials; both take the long-backoff retry path.
    pub fn wants_long_backoff(&self) -> bool {
        matches!(self, PolisError::Unavailable(_) | PolisError::Auth(_))
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            PolisError::Unavailable(e.to_string())
        } else if e.is_decode() {
            PolisError::Parse(e.to_string())
        } else {
            PolisError::Api(0, e.to_string())
        }
    }
}

/// Classify an HTTP error status.
fn classify_status(status: u16, body: String) -> PolisError {
    match status {
        401 | 403 => PolisError::Auth(body),
        _ => PolisError::Api(status, body),
    }
}

/// One opinion cluster from the external PCA math
#[derive(Debug, Clone, Deserialize)]
pub struct PolisCluster {
    pub id: i64,
    pub center: [f64; 2],
    #[serde(default)]
    pub members: Vec<String>,
}

impl PolisCluster {
    pub fn center_coords(&self) -> Coords {
        Coords::new(self.center[0], self.center[1])
    }
}

/// Clustering math for a conversation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolisMath {
    #[serde(default)]
    pub clusters: Vec<PolisCluster>,
    /// Per-xid projected coordinates
    #[serde(default)]
    pub user_coords: HashMap<String, [f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct ConversationResponse {
    conversation_id: String,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    tid: i64,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    conversation_id: &'a str,
    xid: &'a str,
    txt: &'a str,
}

#[derive(Debug, Serialize)]
struct VoteRequest<'a> {
    conversation_id: &'a str,
    xid: &'a str,
    tid: i64,
    vote: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    weight_x_32767: Option<i32>,
}

/// Rate limiter enforcing a minimum interval between requests
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval_ms: u64) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    /// Wait if necessary to comply with the rate limit
    async fn wait(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                tracing::debug!("Rate limiting: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// External consensus service client
pub struct PolisClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: Arc<RateLimiter>,
    /// In-process tier of the xid token cache
    xid_cache: RwLock<HashMap<Uuid, String>>,
    pool: sqlx::PgPool,
}

impl PolisClient {
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        request_timeout: Duration,
        rate_limit_ms: u64,
        pool: sqlx::PgPool,
    ) -> Result<Self, PolisError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("candid-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .build()
            .map_err(|e| PolisError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            rate_limiter: Arc::new(RateLimiter::new(rate_limit_ms)),
            xid_cache: RwLock::new(HashMap::new()),
            pool,
        })
    }

    /// Resolve a user's xid through the two-tier cache.
    ///
    /// In-process map first, persisted table second; on a full miss the
    /// token is derived, persisted, and cached. A persistence failure
    /// degrades to the derived token (the in-process tier still works).
    pub async fn xid_for_user(&self, user_id: Uuid) -> String {
        if let Some(xid) = self.xid_cache.read().await.get(&user_id) {
            return xid.clone();
        }

        let xid = match crate::db::xid_tokens::fetch(&self.pool, user_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                let derived = generate_xid(user_id);
                if let Err(e) = crate::db::xid_tokens::store(&self.pool, user_id, &derived).await {
                    tracing::warn!(user_id = %user_id, error = %e, "Failed to persist xid token");
                }
                derived
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Xid token lookup failed, deriving");
                generate_xid(user_id)
            }
        };

        self.xid_cache.write().await.insert(user_id, xid.clone());
        xid
    }

    /// Create an external conversation. Requires the API key.
    pub async fn create_conversation(
        &self,
        topic: &str,
        description: &str,
    ) -> Result<String, PolisError> {
        self.rate_limiter.wait().await;

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| PolisError::Auth("No API key configured".to_string()))?;

        let url = format!("{}/api/v3/conversations", self.base_url);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(api_key)
            .json(&serde_json::json!({
                "topic": topic,
                "description": description,
                "is_active": true,
            }))
            .send()
            .await
            .map_err(PolisError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: ConversationResponse = response
            .json()
            .await
            .map_err(|e| PolisError::Parse(e.to_string()))?;

        tracing::info!(
            conversation_id = %parsed.conversation_id,
            topic = %topic,
            "Created external conversation"
        );

        Ok(parsed.conversation_id)
    }

    /// Submit a position statement as a comment. Returns the external
    /// comment id (tid).
    pub async fn submit_comment(
        &self,
        conversation_id: &str,
        xid: &str,
        text: &str,
    ) -> Result<i64, PolisError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/api/v3/comments", self.base_url);
        let request = CommentRequest {
            conversation_id,
            xid,
            txt: text,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(PolisError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let parsed: CommentResponse = response
            .json()
            .await
            .map_err(|e| PolisError::Parse(e.to_string()))?;

        tracing::debug!(
            conversation_id = %conversation_id,
            tid = parsed.tid,
            "Submitted comment"
        );

        Ok(parsed.tid)
    }

    /// Submit a vote on an external comment.
    ///
    /// `vote` uses the external scale (agree = -1, disagree = +1,
    /// pass = 0); `weight` is the ideological-distance vote weight in
    /// [1.0, 2.0]. A 204/empty response is success.
    pub async fn submit_vote(
        &self,
        conversation_id: &str,
        xid: &str,
        tid: i64,
        vote: i32,
        weight: Option<f64>,
    ) -> Result<(), PolisError> {
        self.rate_limiter.wait().await;

        let url = format!("{}/api/v3/votes", self.base_url);
        let request = VoteRequest {
            conversation_id,
            xid,
            tid,
            vote,
            weight_x_32767: weight.map(|w| (w * 32767.0) as i32),
        };

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(PolisError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        Ok(())
    }

    /// Fetch clustering math for a conversation.
    ///
    /// A 204 or empty body maps to an empty `PolisMath` (math not yet
    /// computed upstream), not a parse error.
    pub async fn fetch_math(&self, conversation_id: &str) -> Result<PolisMath, PolisError> {
        self.rate_limiter.wait().await;

        let url = format!(
            "{}/api/v3/math/pca2?conversation_id={}",
            self.base_url, conversation_id
        );

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(PolisError::from_reqwest)?;

        let status = response.status();
        if status.as_u16() == 204 {
            return Ok(PolisMath::default());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), body));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PolisError::Parse(e.to_string()))?;
        if body.trim().is_empty() {
            return Ok(PolisMath::default());
        }

        serde_json::from_str(&body).map_err(|e| PolisError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xid_round_trips() {
        let user_id = Uuid::new_v4();
        let xid = generate_xid(user_id);
        assert!(xid.starts_with(XID_PREFIX));
        assert_eq!(strip_xid(&xid), user_id.to_string());
    }

    #[test]
    fn invalid_xid_strips_to_empty() {
        assert_eq!(strip_xid("someone-else:42"), "");
        assert_eq!(strip_xid(""), "");
        assert_eq!(strip_xid("candi:close-but-no"), "");
    }

    #[test]
    fn auth_statuses_classify_as_auth() {
        assert!(matches!(
            classify_status(401, String::new()),
            PolisError::Auth(_)
        ));
        assert!(matches!(
            classify_status(403, String::new()),
            PolisError::Auth(_)
        ));
        assert!(matches!(
            classify_status(500, String::new()),
            PolisError::Api(500, _)
        ));
    }

    #[test]
    fn backoff_classification() {
        assert!(PolisError::Auth("bad key".into()).wants_long_backoff());
        assert!(PolisError::Unavailable("refused".into()).wants_long_backoff());
        assert!(!PolisError::Api(422, "bad req".into()).wants_long_backoff());
        assert!(!PolisError::Parse("bad json".into()).wants_long_backoff());
    }

    #[test]
    fn empty_math_body_is_empty_success() {
        let math: PolisMath = serde_json::from_str("{}").unwrap();
        assert!(math.clusters.is_empty());
        assert!(math.user_coords.is_empty());
    }

    #[test]
    fn math_parses_clusters() {
        let math: PolisMath = serde_json::from_str(
            r#"{
                "clusters": [
                    {"id": 0, "center": [0.5, -1.25], "members": ["candid:u1"]},
                    {"id": 1, "center": [-2.0, 3.0]}
                ],
                "user_coords": {"candid:u1": [0.4, -1.1]}
            }"#,
        )
        .unwrap();

        assert_eq!(math.clusters.len(), 2);
        assert_eq!(math.clusters[0].center_coords(), Coords::new(0.5, -1.25));
        assert!(math.clusters[1].members.is_empty());
        assert_eq!(math.user_coords["candid:u1"], [0.4, -1.1]);
    }

    #[tokio::test]
    async fn rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(200);

        let start = Instant::now();
        limiter.wait().await;
        let first_elapsed = start.elapsed();
        limiter.wait().await;
        let second_elapsed = start.elapsed();

        assert!(first_elapsed < Duration::from_millis(100));
        assert!(second_elapsed >= Duration::from_millis(150));
    }
}
