//! Failure records consumed by the classifier and retry strategy.
//!
//! A failed LLM call can surface in many shapes: a `reqwest` transport
//! error, a non-2xx response with rate-limit headers, or a formatted string
//! such as `"OpenRouter API HTTP 429: rate limited"`. The [`FailureInfo`]
//! trait is the structural view the rest of the crate reasons about, and
//! [`Failure`] is the owned record that every shape can be converted into.
//!
//! Every field is optional. A failure with nothing set is still valid and
//! classifies as [`ErrorKind::Unknown`](crate::api::classify::ErrorKind::Unknown).

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum characters of a response body kept as the failure message.
const MAX_BODY_MESSAGE_CHARS: usize = 500;

/// Structural view of a failed call: optional status, message, headers and
/// transport error code.
pub trait FailureInfo {
    /// HTTP status code, if the call got far enough to receive one.
    fn status(&self) -> Option<u16>;

    /// Human-readable error text.
    fn message(&self) -> Option<&str>;

    /// Header value by name. Lookup is case-insensitive.
    fn header(&self, name: &str) -> Option<&str>;

    /// Transport-level error code such as `ECONNRESET` or `ETIMEDOUT`.
    fn network_code(&self) -> Option<&str> {
        None
    }
}

/// An owned failure record.
///
/// # Example
///
/// ```
/// use cinch_guard::failure::{Failure, FailureInfo};
///
/// let failure = Failure::new()
///     .with_status(429)
///     .with_message("Too Many Requests")
///     .with_header("Retry-After", "12");
///
/// assert_eq!(failure.status(), Some(429));
/// assert_eq!(failure.header("retry-after"), Some("12"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Response headers. Keys inserted through [`with_header`](Self::with_header)
    /// are lowercased.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_code: Option<String>,
}

impl Failure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_network_code(mut self, code: impl Into<String>) -> Self {
        self.network_code = Some(code.into());
        self
    }

    /// Build a failure from a non-success HTTP response.
    ///
    /// When the body is a JSON error envelope (`{"error": {"message": ...}}`)
    /// the nested message is used; otherwise the trimmed body text is kept,
    /// truncated to a few hundred characters.
    pub fn from_response(
        status: reqwest::StatusCode,
        headers: &reqwest::header::HeaderMap,
        body: &str,
    ) -> Self {
        let mut failure = Self::new().with_status(status.as_u16());
        for (name, value) in headers {
            if let Ok(v) = value.to_str() {
                failure = failure.with_header(name.as_str(), v);
            }
        }

        let message = error_message_from_body(body).unwrap_or_else(|| {
            body.trim()
                .chars()
                .take(MAX_BODY_MESSAGE_CHARS)
                .collect::<String>()
        });
        if !message.is_empty() {
            failure.message = Some(message);
        }
        failure
    }

    /// Parse a formatted error string such as
    /// `"OpenRouter API HTTP 503: upstream unavailable"`.
    ///
    /// The status is recovered from the first `HTTP <code>` token; the whole
    /// string becomes the message.
    pub fn from_error_string(error: &str) -> Self {
        Self {
            status: parse_http_status(error),
            message: Some(error.to_string()),
            ..Default::default()
        }
    }
}

impl FailureInfo for Failure {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn network_code(&self) -> Option<&str> {
        self.network_code.as_deref()
    }
}

/// String errors, as returned by clients that report failures as
/// `Result<T, String>`. The status is parsed from an `HTTP <code>` token.
impl FailureInfo for String {
    fn status(&self) -> Option<u16> {
        parse_http_status(self)
    }

    fn message(&self) -> Option<&str> {
        Some(self.as_str())
    }

    fn header(&self, _name: &str) -> Option<&str> {
        None
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.message.as_deref()) {
            (Some(status), Some(msg)) => write!(f, "HTTP {status}: {msg}"),
            (Some(status), None) => write!(f, "HTTP {status}"),
            (None, Some(msg)) => write!(f, "{msg}"),
            (None, None) => match self.network_code.as_deref() {
                Some(code) => write!(f, "network failure ({code})"),
                None => write!(f, "unknown failure"),
            },
        }
    }
}

impl std::error::Error for Failure {}

impl From<&reqwest::Error> for Failure {
    fn from(err: &reqwest::Error) -> Self {
        let mut failure = Self::new().with_message(err.to_string());
        if let Some(status) = err.status() {
            failure.status = Some(status.as_u16());
        }
        if err.is_timeout() {
            failure.network_code = Some("ETIMEDOUT".into());
        } else if err.is_connect() {
            failure.network_code = Some("ECONNREFUSED".into());
        }
        failure
    }
}

impl From<reqwest::Error> for Failure {
    fn from(err: reqwest::Error) -> Self {
        Self::from(&err)
    }
}

impl From<String> for Failure {
    fn from(error: String) -> Self {
        Self::from_error_string(&error)
    }
}

impl From<&str> for Failure {
    fn from(error: &str) -> Self {
        Self::from_error_string(error)
    }
}

/// Find the first `HTTP <3 digits>` token and return it as a status code.
fn parse_http_status(text: &str) -> Option<u16> {
    text.match_indices("HTTP ").find_map(|(idx, _)| {
        let start = idx + "HTTP ".len();
        let digits = text.get(start..start + 3)?;
        let trailing_digit = text
            .get(start + 3..)
            .and_then(|rest| rest.chars().next())
            .is_some_and(|c| c.is_ascii_digit());
        if trailing_digit {
            return None;
        }
        digits
            .parse::<u16>()
            .ok()
            .filter(|code| (100..600).contains(code))
    })
}

/// Extract `error.message` (or a top-level `message`) from a JSON body.
fn error_message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
