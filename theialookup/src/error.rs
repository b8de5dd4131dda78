//! Lookup errors

use std::io;

use theiacache::CacheError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LookupError>;

#[derive(Error, Debug)]
pub enum LookupError {
    /// The title follows neither the episode nor the movie naming scheme
    #[error("Cannot extract a lookup query from title: {0}")]
    Unparseable(String),

    /// The provider knows nothing matching the query
    #[error("No match for {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded, please try again later")]
    RateLimitExceeded,

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] ureq::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0} is not a video")]
    NotAVideo(String),
}

impl LookupError {
    pub fn from_status_code(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized(message.into()),
            404 => Self::NotFound(message.into()),
            429 => Self::RateLimitExceeded,
            _ => Self::Api {
                status,
                message: message.into(),
            },
        }
    }

    /// The request did not complete in time; the job is worth retrying later
    pub fn is_timeout(&self) -> bool {
        match self {
            LookupError::Http(ureq::Error::Timeout(_)) => true,
            LookupError::Http(ureq::Error::Io(err)) | LookupError::Io(err) => {
                err.kind() == io::ErrorKind::TimedOut
            }
            _ => false,
        }
    }

    /// Nothing to enrich: unparseable title or no provider match
    pub fn is_miss(&self) -> bool {
        matches!(self, LookupError::Unparseable(_) | LookupError::NotFound(_))
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, LookupError::Unauthorized(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert!(LookupError::from_status_code(401, "bad key").is_unauthorized());
        assert!(LookupError::from_status_code(404, "gone").is_miss());
        assert!(matches!(
            LookupError::from_status_code(429, ""),
            LookupError::RateLimitExceeded
        ));
        assert!(matches!(
            LookupError::from_status_code(500, "boom"),
            LookupError::Api { status: 500, .. }
        ));
    }

    #[test]
    fn test_timeouts() {
        let err = LookupError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(err.is_timeout());
        assert!(!LookupError::NotFound("x".into()).is_timeout());
    }
}
