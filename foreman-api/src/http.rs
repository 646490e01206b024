//! HTTP transport using reqwest

use async_trait::async_trait;
use foreman_core::config::ApiConfig;
use foreman_core::{ApiRequest, ApiResponse, Error, Method, Result, Transport, TransportError};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

/// Header carrying the API key (`X-Goog-Api-Key`)
pub const API_KEY_HEADER: &str = "x-goog-api-key";

/// Transport over HTTPS to `{base_url}/{api_version}/`
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build a transport with the credential and content headers installed
    /// on every request
    pub fn new(config: &ApiConfig, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("API key must not be empty".to_string()));
        }

        let mut key = HeaderValue::from_str(api_key.trim())
            .map_err(|e| Error::Config(format!("Invalid API key: {}", e)))?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .map_err(|e| Error::Config(format!("Invalid user agent: {}", e)))?,
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = config.endpoint()?;
        info!(endpoint = %endpoint, "Created Jules HTTP transport");

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Resolve a request path and query against the API root
    fn url_for(&self, request: &ApiRequest) -> std::result::Result<Url, TransportError> {
        let mut url = self
            .endpoint
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| TransportError::InvalidRequest(format!("{}: {}", request.path, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }
}

fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn network_error(err: &reqwest::Error) -> TransportError {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else {
        "request"
    };
    TransportError::Network(format!("{} failed: {}", kind, err))
}

/// Reason for a non-2xx response: `error.message` from a JSON body, else
/// the raw body, else the canonical reason phrase
fn error_reason(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(String::from)
    });
    from_json
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unknown status").to_string())
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: ApiRequest) -> std::result::Result<ApiResponse, TransportError> {
        let url = self.url_for(&request)?;
        debug!(method = %request.method, %url, "Sending request");

        let mut builder = self.client.request(method(request.method), url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| network_error(&e))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| network_error(&e))?;
        let bytes_received = bytes.len();

        if !status.is_success() {
            let text = String::from_utf8_lossy(&bytes);
            return Err(TransportError::Api {
                status: status.as_u16(),
                reason: error_reason(status, &text),
            });
        }

        let body = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
            bytes_received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method as http_method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> ApiConfig {
        ApiConfig {
            base_url: server.uri(),
            timeout: Duration::from_millis(500),
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_rejects_empty_key() {
        let config = ApiConfig::default();
        assert!(matches!(
            HttpTransport::new(&config, "  "),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unbuildable_url_is_not_retryable() {
        let transport = HttpTransport::new(&ApiConfig::default(), "k").unwrap();
        let err = transport
            .request(ApiRequest::get("http://[broken/sessions"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_reason_precedence() {
        assert_eq!(
            error_reason(
                StatusCode::BAD_REQUEST,
                r#"{"error": {"code": 400, "message": "prompt is required"}}"#
            ),
            "prompt is required"
        );
        assert_eq!(error_reason(StatusCode::BAD_GATEWAY, "upstream down"), "upstream down");
        assert_eq!(error_reason(StatusCode::NOT_FOUND, ""), "Not Found");
    }

    #[tokio::test]
    async fn test_injects_headers_and_versioned_path() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/v1alpha/sessions/s1/activities"))
            .and(query_param("pageSize", "50"))
            .and(header(API_KEY_HEADER, "secret-key"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"activities": []})))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server), "secret-key").unwrap();
        let response = transport
            .request(ApiRequest::get("sessions/s1/activities").with_query("pageSize", "50"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"activities": []}));
        assert!(response.bytes_received > 0);
    }

    #[tokio::test]
    async fn test_posts_json_body() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(path("/v1alpha/sessions/s1:approvePlan"))
            .and(body_json(json!({"approvalData": {"approved": true, "feedback": ""}})))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server), "k").unwrap();
        let response = transport
            .request(ApiRequest::post(
                "sessions/s1:approvePlan",
                json!({"approvalData": {"approved": true, "feedback": ""}}),
            ))
            .await
            .unwrap();
        // empty body decodes to null
        assert_eq!(response.body, Value::Null);
    }

    #[tokio::test]
    async fn test_maps_api_errors() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/v1alpha/sessions/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(
                json!({"error": {"code": 404, "message": "Session not found"}}),
            ))
            .mount(&server)
            .await;
        Mock::given(http_method("GET"))
            .and(path("/v1alpha/sessions/busy"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server), "k").unwrap();

        let err = transport
            .request(ApiRequest::get("sessions/missing"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Api {
                status: 404,
                reason: "Session not found".into()
            }
        );
        assert!(!err.is_retryable());

        let err = transport
            .request(ApiRequest::get("sessions/busy"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_body_is_serialization_error() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/v1alpha/sessions/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server), "k").unwrap();
        let err = transport
            .request(ApiRequest::get("sessions/s1"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(path("/v1alpha/sessions/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(&config(&server), "k").unwrap();
        let err = transport
            .request(ApiRequest::get("sessions/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network(_)));
        assert!(err.is_retryable());
    }
}
