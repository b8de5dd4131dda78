use theiamedia::MediaId;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The store misbehaved: a required row handle was missing or the
    /// connection is unusable. Worth a retry.
    #[error("cache malfunction: {0}")]
    Malfunction(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Nothing cached under that key. Callers treat it as empty.
    #[error("not found in cache: {0}")]
    NotFound(String),

    #[error("{0} has the wrong kind for this operation")]
    WrongKind(MediaId),
}

impl CacheError {
    pub fn is_malfunction(&self) -> bool {
        matches!(self, CacheError::Malfunction(_) | CacheError::Storage(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
