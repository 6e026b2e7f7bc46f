// OAuth access token acquisition and caching.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use http::{HeaderValue, Method};
use serde::{Deserialize, Deserializer};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::mpesa::errors::MpesaError;
use crate::mpesa::http::{HttpClient, HttpRequest};

/// How long a token is reused. The provider issues tokens valid for an hour;
/// five minutes are kept as margin.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 55 * 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Body returned by `/oauth/v1/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationResponse {
    pub access_token: String,
    // Daraja sends this as a string ("3599"), be lenient about numbers too.
    #[serde(default, deserialize_with = "string_or_number")]
    pub expires_in: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone)]
struct TokenRecord {
    access_token: String,
    issued_at: DateTime<Utc>,
}

impl TokenRecord {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.issued_at + chrono::Duration::seconds(ACCESS_TOKEN_TTL_SECS)
    }
}

/// Fetches bearer tokens with HTTP Basic auth and caches them per consumer key.
pub struct Authenticator {
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    auth_url: String,
    consumer_key: String,
    consumer_secret: String,
    // Held across the refresh request so concurrent callers wait for one fetch.
    cache: Mutex<HashMap<String, TokenRecord>>,
}

impl Authenticator {
    pub fn new(
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
        auth_url: String,
        consumer_key: String,
        consumer_secret: String,
    ) -> Self {
        Self {
            http,
            clock,
            auth_url,
            consumer_key,
            consumer_secret,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a cached token if still fresh, otherwise fetches and caches a new one.
    #[instrument(skip(self), fields(method = "GET", path = "/oauth/v1/generate"))]
    pub async fn get_access_token(&self) -> Result<String, MpesaError> {
        let mut cache = self.cache.lock().await;

        if let Some(record) = cache.get(&self.consumer_key) {
            if record.is_fresh(self.clock.now()) {
                debug!(target: "mpesa", "using cached access token");
                return Ok(record.access_token.clone());
            }
        }

        info!(target: "mpesa", method = "GET", path = "/oauth/v1/generate", "mpesa request");

        let basic = STANDARD.encode(format!("{}:{}", self.consumer_key, self.consumer_secret));
        let authorization = HeaderValue::from_str(&format!("Basic {basic}")).map_err(|e| {
            MpesaError::Authentication {
                status: format!("invalid consumer credentials: {e}"),
            }
        })?;
        let req = HttpRequest::new(Method::GET, &self.auth_url)
            .header(http::header::AUTHORIZATION, authorization);

        let resp = self
            .http
            .send(req)
            .await
            .map_err(|source| MpesaError::Transport {
                operation: "generate_access_token",
                source,
            })?;

        if resp.status != http::StatusCode::OK {
            warn!(target: "mpesa", status = resp.status.as_u16(), "token request rejected");
            return Err(MpesaError::Authentication {
                status: resp.status_text(),
            });
        }

        let body: AuthorizationResponse =
            serde_json::from_slice(&resp.body).map_err(|e| MpesaError::MalformedToken {
                status: Some(resp.status.as_u16()),
                message: e.to_string(),
            })?;

        debug!(target: "mpesa", expires_in = ?body.expires_in, "access token refreshed");
        let token = body.access_token.clone();
        cache.insert(
            self.consumer_key.clone(),
            TokenRecord {
                access_token: body.access_token,
                issued_at: self.clock.now(),
            },
        );
        Ok(token)
    }
}


#[cfg(test)]
mod tests {
    use super::test_clock::ManualClock;
    use super::*;
    use crate::mpesa::errors::ErrorKind;
    use crate::mpesa::http::fake::FakeHttpClient;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const AUTH_URL: &str = "https://sandbox.safaricom.co.ke/oauth/v1/generate?grant_type=client_credentials";

    fn authenticator(http: Arc<FakeHttpClient>, clock: Arc<ManualClock>, key: &str) -> Authenticator {
        Authenticator::new(http, clock, AUTH_URL.to_string(), key.to_string(), "secret".to_string())
    }

    fn rotating_tokens(http: &FakeHttpClient) {
        let counter = Arc::new(AtomicUsize::new(0));
        http.route(AUTH_URL, move |_| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            (200, format!(r#"{{"access_token":"token-{n}","expires_in":"3599"}}"#))
        });
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_token_reused_until_ttl() {
        let http = Arc::new(FakeHttpClient::new());
        rotating_tokens(&http);
        let clock = Arc::new(ManualClock::new(start()));
        let auth = authenticator(http.clone(), clock.clone(), "key");

        let first = auth.get_access_token().await.unwrap();
        assert_eq!(first, "token-0");

        clock.advance(chrono::Duration::seconds(54 * 60 + 59));
        assert_eq!(auth.get_access_token().await.unwrap(), first);
        assert_eq!(http.calls(), 1);

        clock.advance(chrono::Duration::seconds(2));
        let refreshed = auth.get_access_token().await.unwrap();
        assert_eq!(refreshed, "token-1");
        assert_eq!(http.calls(), 2);
    }

    #[tokio::test]
    async fn test_basic_auth_header() {
        let http = Arc::new(FakeHttpClient::new());
        rotating_tokens(&http);
        let auth = authenticator(http.clone(), Arc::new(ManualClock::new(start())), "key");
        auth.get_access_token().await.unwrap();

        let sent = http.requests();
        assert_eq!(sent[0].method, Method::GET);
        // base64("key:secret")
        assert_eq!(sent[0].headers[http::header::AUTHORIZATION], "Basic a2V5OnNlY3JldA==");
    }

    #[tokio::test]
    async fn test_clients_do_not_share_tokens() {
        let http = Arc::new(FakeHttpClient::new());
        rotating_tokens(&http);
        let clock = Arc::new(ManualClock::new(start()));
        let a = authenticator(http.clone(), clock.clone(), "key-a");
        let b = authenticator(http.clone(), clock.clone(), "key-b");

        let token_a = a.get_access_token().await.unwrap();
        let token_b = b.get_access_token().await.unwrap();
        assert_ne!(token_a, token_b);
        assert_eq!(a.get_access_token().await.unwrap(), token_a);
        assert_eq!(b.get_access_token().await.unwrap(), token_b);
        assert_eq!(http.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cold_cache_single_fetch() {
        let http = Arc::new(FakeHttpClient::new().with_delay(Duration::from_millis(50)));
        rotating_tokens(&http);
        let auth = Arc::new(authenticator(http.clone(), Arc::new(ManualClock::new(start())), "key"));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let auth = Arc::clone(&auth);
                tokio::spawn(async move { auth.get_access_token().await })
            })
            .collect();

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "token-0");
        }
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_200_is_authentication_error() {
        let http = Arc::new(FakeHttpClient::new());
        http.route(AUTH_URL, |_| (400, String::new()));
        let auth = authenticator(http.clone(), Arc::new(ManualClock::new(start())), "key");

        let err = auth.get_access_token().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.to_string().contains("400 Bad Request"));
    }

    #[tokio::test]
    async fn test_malformed_token_body() {
        let http = Arc::new(FakeHttpClient::new());
        http.route(AUTH_URL, |_| (200, "not json".to_string()));
        let auth = authenticator(http.clone(), Arc::new(ManualClock::new(start())), "key");

        let err = auth.get_access_token().await.unwrap_err();
        assert!(matches!(err, MpesaError::MalformedToken { status: Some(200), .. }));
        assert_eq!(err.kind(), ErrorKind::Authentication);

        // Nothing was cached; the next call asks again.
        assert!(auth.get_access_token().await.is_err());
        assert_eq!(http.calls(), 2);
    }

    #[test]
    fn test_expires_in_accepts_number() {
        let body: AuthorizationResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_in":3599}"#).unwrap();
        assert_eq!(body.expires_in.as_deref(), Some("3599"));
    }
}
