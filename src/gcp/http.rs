//! HTTP utilities for GCP REST API calls

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Upper bound on a whole request, response body included
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A failed remote call.
///
/// `status` is set when the API answered with a non-success HTTP status; it is
/// `None` for connection, authentication-token and decoding failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status.as_u16()),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self.status, Some(401) | Some(403))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "API request failed ({}): {}", status, self.message),
            None => write!(f, "API request failed: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::with_status(status, err.to_string()),
            None if err.is_timeout() => Self::new(format!("Request timed out: {}", err)),
            None => Self::new(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{:#}", err))
    }
}

/// Pull the human-readable message out of a Google API error body
/// (`{"error": {"code": 403, "message": "..."}}`), falling back to the status text
fn error_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        })
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client with the default [`REQUEST_TIMEOUT`]
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        Self::with_timeout(user_agent, REQUEST_TIMEOUT)
    }

    /// Create a client whose calls give up after `timeout`
    pub fn with_timeout(user_agent: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| TransportError::new(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value, TransportError> {
        self.send(Method::GET, url, token, None).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(
        &self,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        self.send(Method::POST, url, token, body).await
    }

    /// Make a PUT request to a GCP API
    pub async fn put(&self, url: &str, token: &str, body: &Value) -> Result<Value, TransportError> {
        self.send(Method::PUT, url, token, Some(body)).await
    }

    /// Make a PATCH request to a GCP API
    pub async fn patch(
        &self,
        url: &str,
        token: &str,
        body: &Value,
    ) -> Result<Value, TransportError> {
        self.send(Method::PATCH, url, token, Some(body)).await
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        let status = response.status();
        let response_body = response.text().await?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            return Err(TransportError::with_status(
                status,
                error_message(status, &response_body),
            ));
        }

        // Handle empty response
        if response_body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&response_body)
            .map_err(|e| TransportError::new(format!("Failed to parse response JSON: {}", e)))
    }
}

/// Format a transport error for display in batch summaries
pub fn format_gcp_error(error: &TransportError) -> String {
    match error.status {
        Some(403) => "Permission denied. Check your GCP IAM permissions.".to_string(),
        Some(401) => {
            "Authentication failed. Run 'gcloud auth application-default login'.".to_string()
        }
        Some(404) => "Resource not found.".to_string(),
        Some(409) => "Resource conflict. The policy was modified concurrently.".to_string(),
        Some(412) => "Precondition failed. The policy etag is stale.".to_string(),
        Some(429) => "Rate limit exceeded. Please try again later.".to_string(),
        Some(400) => format!("Invalid request: {}", error.message),
        Some(500) | Some(503) => {
            "GCP service temporarily unavailable. Please try again.".to_string()
        }
        _ => error
            .to_string()
            .chars()
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .take(120)
            .collect(),
    }
}
