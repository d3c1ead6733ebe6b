use std::fmt;

/// Closed set of upstream failure classes.
///
/// Classification is mechanical; policy lives with the callers. The refresh
/// loop decides eviction vs. retry, the HTTP layer decides status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    InvalidToken,
    RateLimited,
    MissingSecret,
    UnknownKey,
    UnknownOrg,
    InvalidSecretId,
    Transport,
    Unknown,
}

/// An upstream failure together with its classified kind.
#[derive(Debug, Clone)]
pub struct UpstreamError {
    kind: ErrorKind,
    message: String,
}

impl UpstreamError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a raw upstream failure message against the fixed substring
    /// table. First match wins; unmatched messages propagate verbatim as
    /// `Unknown`.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let kind = classify_message(&message);
        Self { kind, message }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

fn classify_message(message: &str) -> ErrorKind {
    if message.contains("401 Unauthorized") || message.contains("401 ") {
        ErrorKind::Unauthorized
    } else if message.contains("429 Too Many Requests") || message.contains("429 ") {
        ErrorKind::RateLimited
    } else if message.contains("404 Not Found") && message.contains("Secret not found") {
        ErrorKind::MissingSecret
    } else if message.contains("404 Not Found") && message.contains("Resource not found") {
        ErrorKind::UnknownOrg
    } else if message.contains("400 Bad Request")
        || message.contains("Access token is not in a valid format")
    {
        ErrorKind::InvalidToken
    } else if message.contains("error sending request for url") {
        ErrorKind::Transport
    } else if message.contains("Invalid command value: UUID parsing failed") {
        ErrorKind::InvalidSecretId
    } else {
        ErrorKind::Unknown
    }
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Unauthorized => write!(f, "Unauthorized token"),
            ErrorKind::InvalidToken => write!(f, "Invalid token"),
            ErrorKind::RateLimited => write!(f, "Rate limited"),
            ErrorKind::MissingSecret => write!(f, "Secret not found"),
            ErrorKind::UnknownKey => write!(f, "Unknown key"),
            ErrorKind::UnknownOrg => write!(f, "Unknown organization"),
            ErrorKind::InvalidSecretId => write!(f, "Invalid secret id"),
            ErrorKind::Transport => write!(f, "Cannot connect to upstream: {}", self.message),
            ErrorKind::Unknown => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for UpstreamError {}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        let classified = Self::classify(err.to_string());
        // Anything the HTTP client itself raises is a transport problem
        // unless its message already matches a more specific row. Response
        // decode failures are the exception and stay Unknown.
        if classified.kind == ErrorKind::Unknown && !err.is_decode() {
            return Self::new(ErrorKind::Transport, classified.message);
        }
        classified
    }
}
