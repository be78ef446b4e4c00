use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

const USER_AGENT: &str = concat!("tvlwatch/", env!("CARGO_PKG_VERSION"));

/// Authentication strategy applied to outgoing HTTP requests.
#[derive(Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    BearerToken(String),
}

impl HttpAuth {
    pub fn bearer(token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.trim().is_empty() => Self::BearerToken(token.trim().to_owned()),
            _ => Self::None,
        }
    }

    pub fn apply(&self, headers: &mut BTreeMap<String, String>) {
        if let Self::BearerToken(token) = self {
            headers.insert(String::from("authorization"), format!("Bearer {token}"));
        }
    }
}

impl Debug for HttpAuth {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::BearerToken(_) => f.write_str("BearerToken(<redacted>)"),
        }
    }
}

/// GET request envelope used by both transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout_ms: 10_000,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_auth(mut self, auth: &HttpAuth) -> Self {
        auth.apply(&mut self.headers);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Buffered HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok_json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Transport-level HTTP error. Always classified as a network failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
    message: String,
}

impl HttpError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for HttpError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HttpError {}

/// Body of a streaming response, delivered as it arrives.
pub type ChunkStream = BoxStream<'static, Result<Bytes, HttpError>>;

/// Response head plus an unbuffered body.
pub struct StreamResponse {
    pub status: u16,
    pub body: ChunkStream,
}

impl StreamResponse {
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Drain the body into text. Used for error responses.
    pub async fn text(mut self) -> Result<String, HttpError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Debug for StreamResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Request/response transport used by the data service.
pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// Long-lived transport used by the streaming session manager.
///
/// The request timeout only bounds the response head; the body stays open
/// until the server closes it or the caller drops the stream.
pub trait StreamingHttpClient: Send + Sync {
    fn open_stream<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StreamResponse, HttpError>> + Send + 'a>>;
}

/// Production HTTP client using reqwest.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: Arc<reqwest::Client>,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: Arc::new(
                reqwest::Client::builder()
                    .user_agent(USER_AGENT)
                    .connect_timeout(Duration::from_secs(10))
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
            ),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    fn builder(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        request
            .headers
            .iter()
            .fold(self.client.get(&request.url), |builder, (name, value)| {
                builder.header(name, value)
            })
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn transport_error(error: &reqwest::Error) -> HttpError {
    if error.is_timeout() {
        HttpError::new(format!("request timeout: {error}"))
    } else if error.is_connect() {
        HttpError::new(format!("connection failed: {error}"))
    } else if error.is_builder() {
        HttpError::new(format!("invalid request: {error}"))
    } else {
        HttpError::new(format!("request failed: {error}"))
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self
                .builder(&request)
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await
                .map_err(|error| transport_error(&error))?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| HttpError::new(format!("failed to read response body: {e}")))?;

            Ok(HttpResponse { status, body })
        })
    }
}

impl StreamingHttpClient for ReqwestHttpClient {
    fn open_stream<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<StreamResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            let head_timeout = Duration::from_millis(request.timeout_ms);
            let send = self.builder(&request).send();
            let response = tokio::time::timeout(head_timeout, send)
                .await
                .map_err(|_| HttpError::new("stream connect timeout"))?
                .map_err(|error| transport_error(&error))?;

            let status = response.status().as_u16();
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|error| transport_error(&error)))
                .boxed();

            Ok(StreamResponse { status, body })
        })
    }
}
