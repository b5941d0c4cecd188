use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection refused, DNS failure, timeout or a 5xx response.
    #[error("instance unreachable: {0}")]
    Unreachable(String),

    #[error("rate limited (status {status})")]
    RateLimited { status: u16 },

    #[error("not found: {0}")]
    NotFound(String),

    /// Any other non-success status, or a body that is not the expected JSON.
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid instance URL: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("status {status}: {}", truncate(body, 200));
        match status {
            404 | 410 => ClientError::NotFound(message),
            429 => ClientError::RateLimited { status },
            500..=599 => ClientError::Unreachable(message),
            _ => ClientError::Malformed(message),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Malformed(err.to_string())
        } else {
            ClientError::Unreachable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Malformed(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        ClientError::InvalidUrl(err.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_failure_kinds() {
        assert!(matches!(ClientError::from_status(404, ""), ClientError::NotFound(_)));
        assert!(matches!(ClientError::from_status(410, ""), ClientError::NotFound(_)));
        assert!(matches!(
            ClientError::from_status(429, ""),
            ClientError::RateLimited { status: 429 }
        ));
        assert!(matches!(ClientError::from_status(502, ""), ClientError::Unreachable(_)));
        assert!(matches!(ClientError::from_status(401, ""), ClientError::Malformed(_)));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "é".repeat(500);
        match ClientError::from_status(500, &body) {
            ClientError::Unreachable(msg) => assert!(msg.chars().count() < 250),
            other => panic!("unexpected {other:?}"),
        }
    }
}
