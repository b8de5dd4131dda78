use std::io;

use theiacache::CacheError;
use theiadidl::DidlError;
use theiamedia::MediaId;
use theiaupnp::soap::error_codes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowseError {
    #[error("{action} failed with UPnP error {code}: {description}")]
    Action {
        action: String,
        code: u32,
        description: String,
    },
    #[error("{action} failed with HTTP status {status} and body: {body}")]
    HttpStatus {
        action: String,
        status: u16,
        body: String,
    },
    #[error("Missing {0} in SOAP response")]
    MissingReturnValue(String),
    #[error("Invalid {0} value: {1}")]
    BadReturnValue(String, String),
    #[error("MediaServer {0} not found")]
    DeviceNotFound(String),
    #[error("MediaServer {0} exposes no ContentDirectory service")]
    NoContentDirectory(String),
    #[error("Container {0} returned no results")]
    NoResults(String),
    #[error("{0} cannot be browsed")]
    NotBrowsable(MediaId),
    #[error("Browse cancelled")]
    Cancelled,
    #[error(transparent)]
    Didl(#[from] DidlError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Transport error: {0:#}")]
    Transport(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, BrowseError>;

impl BrowseError {
    /// The server refused this client (vendor code 801)
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            BrowseError::Action { code, .. } if *code == error_codes::ACCESS_DENIED
        )
    }

    /// The request did not complete in time
    pub fn is_timeout(&self) -> bool {
        match self {
            BrowseError::Io(err) => err.kind() == io::ErrorKind::TimedOut,
            BrowseError::Transport(err) => err.chain().any(|cause| {
                matches!(cause.downcast_ref::<ureq::Error>(), Some(ureq::Error::Timeout(_)))
                    || cause
                        .downcast_ref::<io::Error>()
                        .is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
            }),
            _ => false,
        }
    }

    pub fn is_no_results(&self) -> bool {
        matches!(self, BrowseError::NoResults(_))
    }
}
