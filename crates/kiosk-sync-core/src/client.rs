//! Rate-limited HTTP client
//!
//! Every call waits for a token from the endpoint's bucket (unless bypassed),
//! then ends in exactly one of two ways: parsed data, or a [`RequestError`]
//! with its [`ErrorKind`], the HTTP status and the server's message.
//! Failures are also forwarded to the [`Notifier`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{ErrorKind, RateLimitInfo, RequestError};
use crate::notify::{Notice, Notifier};
use crate::queue::QueuedOperation;
use crate::rate_limiter::RateLimiter;
use crate::sync::OperationDispatcher;

/// Header carrying the queued operation id on redelivery
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Skip the rate limiter
    pub bypass_rate_limit: bool,
    /// Sent as the `Idempotency-Key` header
    pub idempotency_key: Option<String>,
    /// Do not forward a failure to the notifier
    pub silent: bool,
}

/// A successful response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
    pub rate_limit: Option<RateLimitInfo>,
}

pub struct RequestClient {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    notifier: Arc<dyn Notifier>,
}

impl RequestClient {
    pub fn new(
        base_url: Url,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
        notifier: Arc<dyn Notifier>,
    ) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kiosk-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            limiter,
            notifier,
        })
    }

    pub fn from_config(
        config: &Config,
        limiter: Arc<RateLimiter>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let base_url = config.base_url()?;
        Self::new(base_url, config.request_timeout(), limiter, notifier)
            .context("Failed to build HTTP client")
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<ApiResponse<T>, RequestError> {
        self.request(Method::GET, endpoint, None, &RequestOptions::default())
            .await
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> Result<ApiResponse<T>, RequestError> {
        self.request(Method::POST, endpoint, Some(body), &RequestOptions::default())
            .await
    }

    /// Issue one request and classify the outcome
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<ApiResponse<T>, RequestError> {
        let result = self.send(method.clone(), endpoint, body, options).await;

        if let Err(ref err) = result {
            if options.silent {
                debug!("{} {} failed: {}", method, endpoint, err);
            } else {
                warn!("{} {} failed: {}", method, endpoint, err);
                self.notifier.notify(Notice::RequestFailed {
                    endpoint: endpoint.to_string(),
                    error: err.clone(),
                });
            }
        }

        result
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&Value>,
        options: &RequestOptions,
    ) -> Result<ApiResponse<T>, RequestError> {
        if !options.bypass_rate_limit {
            self.limiter.wait_for_token(endpoint).await;
        }

        let mut builder = self.http.request(method, self.url_for(endpoint));
        if let Some(ref key) = options.idempotency_key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let rate_limit = parse_rate_limit(response.headers());
        let bytes = response.bytes().await.map_err(transport_error)?;

        if rate_limit.is_some_and(|info| info.is_exhausted()) {
            self.limiter.drain(endpoint);
        }

        classify(status, rate_limit, &bytes)
    }

    fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

impl OperationDispatcher for RequestClient {
    async fn dispatch(&self, op: &QueuedOperation) -> Result<(), RequestError> {
        let options = RequestOptions {
            idempotency_key: Some(op.id.clone()),
            silent: true,
            ..RequestOptions::default()
        };
        self.request::<Value>(Method::POST, op.kind.endpoint(), Some(&op.payload), &options)
            .await
            .map(|_| ())
    }
}

/// Read the `X-RateLimit-*` headers; `None` when none are present
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let number = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
    };

    let info = RateLimitInfo {
        limit: number(LIMIT_HEADER),
        remaining: number(REMAINING_HEADER),
        reset: number(RESET_HEADER),
    };

    if info == RateLimitInfo::default() {
        None
    } else {
        Some(info)
    }
}

/// Map a received response onto data or a classified error
///
/// An exhausted quota is rate-limited whatever the status; the caller is
/// expected to retry, and queued operations carry an idempotency key.
pub fn classify<T: DeserializeOwned>(
    status: StatusCode,
    rate_limit: Option<RateLimitInfo>,
    body: &[u8],
) -> Result<ApiResponse<T>, RequestError> {
    let code = status.as_u16();

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RequestError::new(ErrorKind::RateLimited, error_message(status, body))
            .with_status(code)
            .with_rate_limit(rate_limit));
    }

    if rate_limit.is_some_and(|info| info.is_exhausted()) {
        let message = if status.is_success() {
            "rate limit quota exhausted".to_string()
        } else {
            error_message(status, body)
        };
        return Err(RequestError::new(ErrorKind::RateLimited, message)
            .with_status(code)
            .with_rate_limit(rate_limit));
    }

    if status.is_success() {
        return match decode(body) {
            Ok(data) => Ok(ApiResponse {
                data,
                status: code,
                rate_limit,
            }),
            Err(e) => Err(RequestError::new(
                ErrorKind::ParseError,
                format!("malformed response body: {}", e),
            )
            .with_status(code)
            .with_rate_limit(rate_limit)),
        };
    }

    let kind = if status.is_client_error() {
        ErrorKind::ClientError
    } else {
        ErrorKind::ServerError
    };

    Err(RequestError::new(kind, error_message(status, body))
        .with_status(code)
        .with_rate_limit(rate_limit))
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> serde_json::Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::from_value(Value::Null)
    } else {
        serde_json::from_slice(body)
    }
}

/// Server-supplied message, falling back to the body text, then the reason
fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_slice::<Value>(body) {
        for key in ["message", "error", "detail"] {
            if let Some(Value::String(message)) = fields.get(key) {
                return message.clone();
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if !text.is_empty() {
        return text.to_string();
    }

    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

fn transport_error(e: reqwest::Error) -> RequestError {
    if e.is_builder() {
        RequestError::new(ErrorKind::ClientError, format!("invalid request: {}", e))
    } else if e.is_timeout() {
        RequestError::transient("request timed out")
    } else {
        RequestError::transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;

    fn exhausted() -> Option<RateLimitInfo> {
        Some(RateLimitInfo {
            limit: Some(60),
            remaining: Some(0),
            reset: Some(30),
        })
    }

    #[test]
    fn test_classify_success() {
        let response: ApiResponse<Value> =
            classify(StatusCode::OK, None, br#"{"id": 7}"#).unwrap();
        assert_eq!(response.data, json!({"id": 7}));
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_empty_success_body_is_null() {
        let response: ApiResponse<Value> = classify(StatusCode::NO_CONTENT, None, b"").unwrap();
        assert_eq!(response.data, Value::Null);

        let response: ApiResponse<Option<u32>> = classify(StatusCode::OK, None, b"  \n").unwrap();
        assert_eq!(response.data, None);
    }

    #[test]
    fn test_classify_status_families() {
        let err = classify::<Value>(StatusCode::NOT_FOUND, None, b"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ClientError);
        assert_eq!(err.status, Some(404));
        assert_eq!(err.message, "Not Found");

        let err = classify::<Value>(StatusCode::BAD_GATEWAY, None, b"upstream down").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.message, "upstream down");

        let err = classify::<Value>(StatusCode::TOO_MANY_REQUESTS, None, b"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_exhausted_quota_is_rate_limited_on_any_status() {
        let err = classify::<Value>(StatusCode::OK, exhausted(), br#"{"ok":true}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.status, Some(200));
        assert_eq!(err.rate_limit, exhausted());

        let err = classify::<Value>(StatusCode::SERVICE_UNAVAILABLE, exhausted(), b"").unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
    }

    #[test]
    fn test_server_message_fields() {
        let err = classify::<Value>(
            StatusCode::UNPROCESSABLE_ENTITY,
            None,
            br#"{"error": "table number required"}"#,
        )
        .unwrap_err();
        assert_eq!(err.message, "table number required");

        let err = classify::<Value>(
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            br#"{"detail": "db locked", "code": 12}"#,
        )
        .unwrap_err();
        assert_eq!(err.message, "db locked");
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let err = classify::<Value>(StatusCode::OK, None, b"<html>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ParseError);
        assert_eq!(err.status, Some(200));
    }

    #[test]
    fn test_parse_rate_limit_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_rate_limit(&headers), None);

        headers.insert("X-RateLimit-Limit", HeaderValue::from_static("60"));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static(" 12 "));
        headers.insert("X-RateLimit-Reset", HeaderValue::from_static("not-a-number"));

        assert_eq!(
            parse_rate_limit(&headers),
            Some(RateLimitInfo {
                limit: Some(60),
                remaining: Some(12),
                reset: None,
            })
        );
    }
}
