//! Failure classification.
//!
//! Maps any [`FailureInfo`] to one of six [`ErrorKind`]s using the status
//! code, case-insensitive message keywords, and transport error codes. Rules
//! are an ordered table; the first matching rule wins.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::failure::FailureInfo;

/// The failure categories retry decisions branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    ServerError,
    NetworkError,
    AuthError,
    ContextLengthError,
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::RateLimit,
        ErrorKind::ServerError,
        ErrorKind::NetworkError,
        ErrorKind::AuthError,
        ErrorKind::ContextLengthError,
        ErrorKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::ContextLengthError => "context_length_error",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        ErrorKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown error kind '{s}' (expected one of: {})",
                    ErrorKind::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// Transport error codes that indicate a dropped or stalled connection.
pub const NETWORK_ERROR_CODES: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "ECONNABORTED",
    "EPIPE",
    "ENOTFOUND",
    "EAI_AGAIN",
];

/// A failure reduced to the fields the rules read.
struct Signals<'a> {
    status: Option<u16>,
    message: String,
    network_code: Option<&'a str>,
}

impl Signals<'_> {
    fn status_is(&self, codes: &[u16]) -> bool {
        self.status.is_some_and(|s| codes.contains(&s))
    }

    fn mentions(&self, phrases: &[&str]) -> bool {
        phrases.iter().any(|p| self.message.contains(p))
    }
}

type Rule = (fn(&Signals<'_>) -> bool, ErrorKind);

/// Classification rules in precedence order.
const RULES: &[Rule] = &[
    (is_rate_limit, ErrorKind::RateLimit),
    (is_server_error, ErrorKind::ServerError),
    (is_auth_error, ErrorKind::AuthError),
    (is_context_length, ErrorKind::ContextLengthError),
    (is_network_error, ErrorKind::NetworkError),
];

fn is_rate_limit(s: &Signals<'_>) -> bool {
    s.status_is(&[429]) || s.mentions(&["rate limit", "too many requests"])
}

fn is_server_error(s: &Signals<'_>) -> bool {
    s.status.is_some_and(|code| (500..600).contains(&code))
}

fn is_auth_error(s: &Signals<'_>) -> bool {
    s.status_is(&[401, 403])
}

fn is_context_length(s: &Signals<'_>) -> bool {
    s.status_is(&[413]) || s.mentions(&["context length", "token limit", "maximum context"])
}

fn is_network_error(s: &Signals<'_>) -> bool {
    s.mentions(&["network", "timeout", "connection"])
        || s.network_code.is_some_and(|code| {
            NETWORK_ERROR_CODES
                .iter()
                .any(|known| known.eq_ignore_ascii_case(code))
        })
}

/// Classify a failure. Total: anything unrecognised is [`ErrorKind::Unknown`].
pub fn classify(failure: &(impl FailureInfo + ?Sized)) -> ErrorKind {
    let signals = Signals {
        status: failure.status(),
        message: failure.message().unwrap_or_default().to_lowercase(),
        network_code: failure.network_code(),
    };

    let kind = RULES
        .iter()
        .find(|(matches, _)| matches(&signals))
        .map_or(ErrorKind::Unknown, |(_, kind)| *kind);

    trace!(
        status = ?signals.status,
        network_code = ?signals.network_code,
        "classified failure as {kind}"
    );
    kind
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::Failure;

    fn status(code: u16) -> Failure {
        Failure::new().with_status(code)
    }

    fn message(text: &str) -> Failure {
        Failure::new().with_message(text)
    }

    #[test]
    fn every_5xx_is_server_error() {
        for code in 500..600 {
            assert_eq!(classify(&status(code)), ErrorKind::ServerError, "{code}");
        }
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(classify(&status(429)), ErrorKind::RateLimit);
        assert_eq!(classify(&status(401)), ErrorKind::AuthError);
        assert_eq!(classify(&status(403)), ErrorKind::AuthError);
        assert_eq!(classify(&status(413)), ErrorKind::ContextLengthError);
        assert_eq!(classify(&status(400)), ErrorKind::Unknown);
        assert_eq!(classify(&status(404)), ErrorKind::Unknown);
    }

    #[test]
    fn literal_phrases() {
        let cases = [
            ("Rate limit reached for requests", ErrorKind::RateLimit),
            ("Too Many Requests", ErrorKind::RateLimit),
            ("This model's maximum context length is 8192", ErrorKind::ContextLengthError),
            ("prompt exceeds token limit", ErrorKind::ContextLengthError),
            ("Maximum context exceeded", ErrorKind::ContextLengthError),
            ("network unreachable", ErrorKind::NetworkError),
            ("operation timeout", ErrorKind::NetworkError),
            ("Connection reset by peer", ErrorKind::NetworkError),
            ("something odd happened", ErrorKind::Unknown),
        ];
        for (text, expected) in cases {
            assert_eq!(classify(&message(text)), expected, "{text}");
        }
    }

    #[test]
    fn precedence_rate_limit_beats_server_error() {
        let f = Failure::new().with_status(503).with_message("rate limit upstream");
        assert_eq!(classify(&f), ErrorKind::RateLimit);
    }

    #[test]
    fn precedence_server_error_beats_context_phrase() {
        let f = Failure::new()
            .with_status(500)
            .with_message("context length exceeded");
        assert_eq!(classify(&f), ErrorKind::ServerError);
    }

    #[test]
    fn precedence_auth_beats_network_phrase() {
        let f = Failure::new()
            .with_status(401)
            .with_message("connection not authorized");
        assert_eq!(classify(&f), ErrorKind::AuthError);
    }

    #[test]
    fn network_codes_classify_without_message() {
        for code in NETWORK_ERROR_CODES {
            let f = Failure::new().with_network_code(*code);
            assert_eq!(classify(&f), ErrorKind::NetworkError, "{code}");
        }
        let f = Failure::new().with_network_code("econnreset");
        assert_eq!(classify(&f), ErrorKind::NetworkError);
        let f = Failure::new().with_network_code("EWHATEVER");
        assert_eq!(classify(&f), ErrorKind::Unknown);
    }

    #[test]
    fn empty_failure_is_unknown() {
        assert_eq!(classify(&Failure::default()), ErrorKind::Unknown);
    }

    #[test]
    fn classifies_string_errors() {
        let e = String::from("OpenRouter API HTTP 429: rate limited");
        assert_eq!(classify(&e), ErrorKind::RateLimit);
        let e = String::from("request failed: operation timed out");
        assert_eq!(classify(&e), ErrorKind::Unknown);
        let e = String::from("request failed: connection refused");
        assert_eq!(classify(&e), ErrorKind::NetworkError);
    }

    #[test]
    fn kind_round_trips_through_str() {
        for kind in ErrorKind::ALL {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
        assert_eq!("Rate-Limit".parse::<ErrorKind>().unwrap(), ErrorKind::RateLimit);
        assert!("bogus".parse::<ErrorKind>().is_err());
    }
}
