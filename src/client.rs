// Remote fetch client for the CMS REST surface (`items/<collection>`)

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::entity::Entity;
use crate::error::{ContentError, ContentResult};

// Upper bound on how much of an error body is kept on `Upstream`
const MAX_ERROR_BODY_BYTES: usize = 2048;

// Source of the bearer token; looked up on every request
pub trait CredentialProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

#[derive(Clone)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn none() -> Self {
        Self { token: None }
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// Reads the token from an environment variable at request time
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvCredentials {
    fn bearer_token(&self) -> Option<String> {
        std::env::var(&self.var).ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    One(Entity),
    Many(Vec<Value>),
    Empty,
}

impl Payload {
    pub fn into_list(self) -> Vec<Value> {
        match self {
            Payload::One(entity) => vec![Value::Object(entity)],
            Payload::Many(items) => items,
            Payload::Empty => Vec::new(),
        }
    }

    pub fn into_first(self) -> Option<Entity> {
        match self {
            Payload::One(entity) => Some(entity),
            Payload::Many(items) => items.into_iter().find_map(|item| match item {
                Value::Object(entity) => Some(entity),
                _ => None,
            }),
            Payload::Empty => None,
        }
    }
}

#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch(&self, endpoint: &str, params: &[(String, String)]) -> ContentResult<Payload>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
}

pub struct CmsClient {
    http: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
    credentials: Arc<dyn CredentialProvider>,
}

impl CmsClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        credentials: Arc<dyn CredentialProvider>,
    ) -> ContentResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ContentError::Configuration(format!(
                "CMS base URL must be http(s), got `{base_url}`"
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ContentError::Configuration(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn transport_error(&self, err: reqwest::Error) -> ContentError {
        if err.is_timeout() {
            ContentError::Timeout(self.timeout_ms)
        } else {
            ContentError::Network(err.without_url().to_string())
        }
    }
}

impl fmt::Debug for CmsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CmsClient")
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ContentSource for CmsClient {
    async fn fetch(&self, endpoint: &str, params: &[(String, String)]) -> ContentResult<Payload> {
        let token = self
            .credentials
            .bearer_token()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                ContentError::Configuration("no CMS access token available".to_string())
            })?;

        let url = self.endpoint_url(endpoint);
        debug!(endpoint, params = params.len(), "fetching from CMS");

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(params)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            warn!(endpoint, status = status.as_u16(), "CMS returned an error status");
            return Err(ContentError::Upstream {
                status: status.as_u16(),
                body: body_excerpt(&body),
            });
        }

        decode_envelope(&body)
    }
}

pub fn decode_envelope(body: &[u8]) -> ContentResult<Payload> {
    let envelope: Envelope = serde_json::from_slice(body)?;
    match envelope.data {
        Value::Object(entity) => Ok(Payload::One(entity)),
        Value::Array(items) => Ok(Payload::Many(items)),
        Value::Null => Ok(Payload::Empty),
        other => Err(ContentError::Decode(format!(
            "unexpected `data` in CMS envelope: {other}"
        ))),
    }
}

fn body_excerpt(body: &Bytes) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(body);
    let mut end = text.len().min(MAX_ERROR_BODY_BYTES);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    Some(text[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(credentials: StaticCredentials) -> CmsClient {
        CmsClient::new(
            "http://127.0.0.1:1/",
            Duration::from_millis(500),
            Arc::new(credentials),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_missing_credential_is_configuration_error() {
        let err = client(StaticCredentials::none())
            .fetch("items/hotels", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Configuration(_)));

        let err = client(StaticCredentials::new("   "))
            .fetch("items/hotels", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ContentError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let err = client(StaticCredentials::new("secret-token"))
            .fetch("items/hotels", &[("limit".to_string(), "1".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ContentError::Network(_) | ContentError::Timeout(_)
        ));
        assert!(!err.to_string().contains("secret-token"));
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let err = CmsClient::new(
            "ftp://cms.example.com",
            Duration::from_secs(1),
            Arc::new(StaticCredentials::none()),
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::Configuration(_)));
    }

    #[test]
    fn test_endpoint_url_joins_cleanly() {
        let client = client(StaticCredentials::none());
        assert_eq!(
            client.endpoint_url("/items/hotels"),
            "http://127.0.0.1:1/items/hotels"
        );
    }

    #[test]
    fn test_credentials_never_printed() {
        let creds = StaticCredentials::new("super-secret");
        assert!(!format!("{creds:?}").contains("super-secret"));
        let client = client(creds);
        assert!(!format!("{client:?}").contains("super-secret"));
    }

    #[test]
    fn test_decode_envelope_shapes() {
        let one = decode_envelope(br#"{"data":{"id":1}}"#).unwrap();
        assert_eq!(one.clone().into_first().unwrap()["id"], json!(1));

        let many = decode_envelope(br#"{"data":[{"id":1},{"id":2}]}"#).unwrap();
        assert_eq!(many.into_list().len(), 2);

        assert_eq!(decode_envelope(br#"{"data":null}"#).unwrap(), Payload::Empty);
        assert_eq!(decode_envelope(br#"{}"#).unwrap(), Payload::Empty);

        assert!(matches!(
            decode_envelope(br#"{"data":"nope"}"#),
            Err(ContentError::Decode(_))
        ));
        assert!(matches!(
            decode_envelope(b"<html>"),
            Err(ContentError::Decode(_))
        ));
    }

    #[test]
    fn test_error_body_is_truncated() {
        let long = Bytes::from("x".repeat(MAX_ERROR_BODY_BYTES * 2));
        assert_eq!(body_excerpt(&long).unwrap().len(), MAX_ERROR_BODY_BYTES);
        assert_eq!(body_excerpt(&Bytes::new()), None);
    }
}
