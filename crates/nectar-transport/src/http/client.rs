//! HTTP transport for the remote Bot API.

use std::time::Duration;

use async_trait::async_trait;
use nectar_core::{ApiError, ApiRequest, ApiResult, ApiTransport, TransportError, TransportResult};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, ClientBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

/// Default API server.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// HTTP transport parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    /// Base URL of the API server, without a trailing slash.
    pub api_url: String,
    /// Bot token; calls fail with [`ApiError::MissingToken`] while unset.
    pub token: Option<String>,
    /// Timeout of one request, extended per call by
    /// [`ApiRequest::extra_timeout`].
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Sends [`ApiRequest`]s as `POST {api_url}/bot{token}/{method}`.
///
/// Parameters travel as a JSON body, or as `multipart/form-data` when the
/// request carries files.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;
        Ok(Self::with_client(client, config))
    }

    /// Uses an existing client, e.g. one with a proxy configured.
    pub fn with_client(client: Client, mut config: HttpTransportConfig) -> Self {
        config.api_url = config.api_url.trim_end_matches('/').to_string();
        Self { client, config }
    }

    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    fn method_url(&self, token: &str, method: &str) -> String {
        format!("{}/bot{}/{}", self.config.api_url, token, method)
    }

    /// The method URL with the token hidden, for logs and errors.
    fn redacted_url(&self, method: &str) -> String {
        format!("{}/bot<redacted>/{}", self.config.api_url, method)
    }

    /// `{api_url}/file/bot{token}/{file_path}`.
    fn file_url(&self, token: &str, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.config.api_url,
            token,
            file_path.trim_start_matches('/')
        )
    }

    fn redacted_file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot<redacted>/{}",
            self.config.api_url,
            file_path.trim_start_matches('/')
        )
    }

    fn token(&self) -> ApiResult<&str> {
        self.config
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::MissingToken)
    }

    fn multipart_form(request: ApiRequest) -> ApiResult<Form> {
        let mut form = Form::new();
        for (key, value) in request.params {
            let text = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            form = form.text(key, text);
        }
        for (field, file) in request.files {
            let mut part = Part::bytes(file.data).file_name(file.file_name);
            if let Some(mime) = &file.mime_type {
                part = part
                    .mime_str(mime)
                    .map_err(|e| ApiError::InvalidRequest(format!("bad MIME type {mime}: {e}")))?;
            }
            form = form.part(field, part);
        }
        Ok(form)
    }
}

#[async_trait]
impl ApiTransport for HttpTransport {
    async fn call(&self, request: ApiRequest) -> ApiResult<Value> {
        let token = self.token()?;

        let url = self.method_url(token, &request.method);
        let redacted = self.redacted_url(&request.method);
        let timeout = self.config.request_timeout + request.extra_timeout.unwrap_or_default();
        let method = request.method.clone();

        let builder = self.client.post(&url).timeout(timeout);
        let builder = if request.is_multipart() {
            builder.multipart(Self::multipart_form(request)?)
        } else {
            builder.json(&request.params)
        };

        trace!(method = %method, timeout_ms = timeout.as_millis() as u64, "Sending API request");
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Transport(TransportError::RequestFailed {
                    url: redacted.clone(),
                    reason: e.without_url().to_string(),
                })
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            ApiError::Transport(TransportError::RequestFailed {
                url: redacted,
                reason: e.without_url().to_string(),
            })
        })?;

        let result = decode_envelope(status, &body);
        if let Err(err) = &result {
            debug!(method = %method, status, error = %err, "API call failed");
        }
        result
    }

    async fn download(&self, file_path: &str) -> ApiResult<Vec<u8>> {
        let token = self.token()?;
        let url = self.file_url(token, file_path);
        let redacted = self.redacted_file_url(file_path);
        let request_failed = |e: reqwest::Error| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::Transport(TransportError::RequestFailed {
                    url: redacted.clone(),
                    reason: e.without_url().to_string(),
                })
            }
        };

        trace!(path = file_path, "Downloading file");
        let response = self
            .client
            .get(&url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(request_failed)?;

        let status = response.status();
        if !status.is_success() {
            debug!(path = file_path, status = status.as_u16(), "File download failed");
            return Err(ApiError::Transport(TransportError::UnexpectedStatus {
                url: redacted.clone(),
                status: status.as_u16(),
            }));
        }

        let body = response.bytes().await.map_err(request_failed)?;
        Ok(body.to_vec())
    }
}

// ============================================================================
// Response envelope
// ============================================================================

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Decodes `{ok, result, description, error_code, parameters}`.
pub(crate) fn decode_envelope(status: u16, body: &[u8]) -> ApiResult<Value> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        ApiError::InvalidResponse(format!("HTTP {status} with undecodable body: {e}"))
    })?;

    if envelope.ok {
        return Ok(envelope.result.unwrap_or(Value::Null));
    }

    Err(ApiError::Api {
        code: envelope.error_code.unwrap_or(i64::from(status)),
        description: envelope
            .description
            .unwrap_or_else(|| format!("HTTP {status}")),
        retry_after: envelope.parameters.and_then(|p| p.retry_after),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nectar_core::InputFile;
    use serde_json::json;

    #[test]
    fn test_decode_success() {
        let body = br#"{"ok":true,"result":{"id":1,"is_bot":true,"first_name":"b"}}"#;
        let value = decode_envelope(200, body).unwrap();
        assert_eq!(value["id"], json!(1));
    }

    #[test]
    fn test_decode_api_error_with_retry_after() {
        let body = br#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 5","parameters":{"retry_after":5}}"#;
        match decode_envelope(429, body) {
            Err(ApiError::Api {
                code,
                description,
                retry_after,
            }) => {
                assert_eq!(code, 429);
                assert!(description.starts_with("Too Many Requests"));
                assert_eq!(retry_after, Some(5));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_error_without_code_uses_status() {
        let err = decode_envelope(502, br#"{"ok":false}"#).unwrap_err();
        assert!(matches!(err, ApiError::Api { code: 502, .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_decode_garbage_is_invalid_response() {
        let err = decode_envelope(502, b"<html>Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ApiError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_missing_token_fails_before_network() {
        let transport = HttpTransport::new(HttpTransportConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..HttpTransportConfig::default()
        })
        .unwrap();

        let err = transport.call(ApiRequest::new("getMe")).await.unwrap_err();
        assert!(matches!(err, ApiError::MissingToken));
    }

    #[test]
    fn test_urls_and_redaction() {
        let transport = HttpTransport::new(HttpTransportConfig {
            api_url: "https://api.example.org/".into(),
            token: Some("123:abc".into()),
            ..HttpTransportConfig::default()
        })
        .unwrap();

        assert_eq!(
            transport.method_url("123:abc", "getMe"),
            "https://api.example.org/bot123:abc/getMe"
        );
        assert!(!transport.redacted_url("getMe").contains("abc"));
    }

    #[test]
    fn test_file_urls_and_redaction() {
        let transport = HttpTransport::new(HttpTransportConfig {
            api_url: "https://api.example.org/".into(),
            token: Some("123:abc".into()),
            ..HttpTransportConfig::default()
        })
        .unwrap();

        assert_eq!(
            transport.file_url("123:abc", "photos/file_1.jpg"),
            "https://api.example.org/file/bot123:abc/photos/file_1.jpg"
        );
        assert_eq!(
            transport.file_url("123:abc", "/documents/a.pdf"),
            "https://api.example.org/file/bot123:abc/documents/a.pdf"
        );
        assert_eq!(
            transport.redacted_file_url("photos/file_1.jpg"),
            "https://api.example.org/file/bot<redacted>/photos/file_1.jpg"
        );
    }

    /// Answers every connection with a fixed raw HTTP response and records the
    /// request line.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&buf[..n])
                .lines()
                .next()
                .unwrap_or_default()
                .to_string()
        });
        (format!("http://{addr}"), task)
    }

    fn transport_for(api_url: String) -> HttpTransport {
        HttpTransport::new(HttpTransportConfig {
            api_url,
            token: Some("123:abc".into()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_download_returns_body() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello",
        )
        .await;

        let data = transport_for(url).download("photos/file_1.jpg").await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(
            server.await.unwrap(),
            "GET /file/bot123:abc/photos/file_1.jpg HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_download_error_status_is_redacted() {
        let (url, _server) = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let err = transport_for(url).download("gone.jpg").await.unwrap_err();
        match &err {
            ApiError::Transport(TransportError::UnexpectedStatus { url, status }) => {
                assert_eq!(*status, 404);
                assert!(url.ends_with("/file/bot<redacted>/gone.jpg"), "{url}");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!err.to_string().contains("abc"));
    }

    #[tokio::test]
    async fn test_download_without_token_fails_before_network() {
        let transport = HttpTransport::new(HttpTransportConfig {
            api_url: "http://127.0.0.1:9".into(),
            ..HttpTransportConfig::default()
        })
        .unwrap();

        let err = transport.download("a.jpg").await.unwrap_err();
        assert!(matches!(err, ApiError::MissingToken));
    }

    #[test]
    fn test_multipart_form_accepts_files() {
        let request = ApiRequest::new("setWebhook")
            .param("url", "https://example.com/hook")
            .param("max_connections", 40)
            .file("certificate", InputFile::from_bytes("cert.pem", b"pem".to_vec()));
        assert!(HttpTransport::multipart_form(request).is_ok());

        let bad = ApiRequest::new("sendDocument").file(
            "document",
            InputFile::from_bytes("a.bin", vec![0]).mime_type("not a mime"),
        );
        assert!(HttpTransport::multipart_form(bad).is_err());
    }
}
