//! HTTP transport used by the scanners.
//!
//! The scanners build an [`HttpRequest`] and hand it to a [`Transport`]. The
//! production transport is a thin wrapper around `reqwest::blocking`. Tests use
//! [`MockTransport`], which replays canned responses and records every request
//! so no network access is ever needed.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Default timeout for a single request. Uploads of large files need time.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Timeout for report lookups, which carry no upload.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
}

/// A request description, independent of the HTTP client library.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Form fields. Sent urlencoded, or as multipart parts when files are attached.
    pub fields: Vec<(String, String)>,
    /// Multipart file parts: field name and path.
    pub files: Vec<(String, PathBuf)>,
    pub headers: Vec<(String, String)>,
    /// Raw request body streamed from a file.
    pub body_file: Option<PathBuf>,
    /// Overrides the transport's timeout for this request.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// A GET request for `url`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            ..Default::default()
        }
    }

    /// A POST request for `url`.
    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.push((name.into(), path.into()));
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send the content of `path` as the raw request body.
    #[must_use]
    pub fn body_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of the first form field called `name`.
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of the first header called `name` (case-insensitive).
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response as seen by the scanners.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A 200 response with a JSON body.
    #[must_use]
    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }

    /// An empty response with the given status.
    #[must_use]
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }
}

/// Errors raised by a transport before any response was received.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Cannot attach {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot use certificate file {path}: {message}")]
    Certificate { path: PathBuf, message: String },

    #[error("No response available for {0}")]
    Exhausted(String),
}

/// Something that can perform HTTP requests.
pub trait Transport: Send {
    /// Perform `request` and return the complete response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if no response could be obtained. Non-200
    /// statuses are not errors at this level.
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Blocking `reqwest` transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Build a transport, optionally trusting an extra PEM encoded CA.
    ///
    /// # Errors
    ///
    /// Fails if the certificate cannot be read or parsed, or the client
    /// cannot be constructed.
    pub fn new(certificate_file: Option<&Path>, timeout: Duration) -> Result<Self, TransportError> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("scan-tool/", env!("CARGO_PKG_VERSION")));

        if let Some(path) = certificate_file {
            let pem = std::fs::read(path).map_err(|e| TransportError::Certificate {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            let certificate =
                reqwest::Certificate::from_pem(&pem).map_err(|e| TransportError::Certificate {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder.build().map_err(|e| TransportError::Request {
            url: String::new(),
            message: e.to_string(),
        })?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let request_error = |e: reqwest::Error| TransportError::Request {
            url: request.url.clone(),
            message: e.to_string(),
        };

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        if !request.files.is_empty() {
            let mut form = reqwest::blocking::multipart::Form::new();
            for (name, value) in &request.fields {
                form = form.text(name.clone(), value.clone());
            }
            for (name, path) in &request.files {
                form = form
                    .file(name.clone(), path)
                    .map_err(|source| TransportError::Attachment {
                        path: path.clone(),
                        source,
                    })?;
            }
            builder = builder.multipart(form);
        } else if let Some(path) = &request.body_file {
            let file = File::open(path).map_err(|source| TransportError::Attachment {
                path: path.clone(),
                source,
            })?;
            builder = builder.body(reqwest::blocking::Body::from(file));
        } else if !request.fields.is_empty() {
            builder = builder.form(&request.fields);
        }

        let response = builder.send().map_err(request_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().map_err(request_error)?.to_vec();

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// In-memory transport that replays queued responses in order.
///
/// Every request is recorded and can be inspected afterwards. When the queue
/// runs dry, [`TransportError::Exhausted`] is returned, which makes accidental
/// network access visible in tests.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` to be returned by the next unanswered request.
    #[must_use]
    pub fn with_response(self, response: HttpResponse) -> Self {
        self.push(response);
        self
    }

    /// Queue another response.
    pub fn push(&self, response: HttpResponse) {
        if let Ok(mut responses) = self.responses.lock() {
            responses.push_back(response);
        }
    }

    /// All requests performed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Transport for MockTransport {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.responses
            .lock()
            .ok()
            .and_then(|mut responses| responses.pop_front())
            .ok_or_else(|| TransportError::Exhausted(request.url.clone()))
    }
}

impl<T: Transport + Sync> Transport for std::sync::Arc<T> {
    fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).perform(request)
    }
}
