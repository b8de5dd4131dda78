//! # SOAP module
//!
//! Client side of UPnP SOAP: build action requests, parse the envelope a
//! device sends back, read named output arguments and decode UPnP faults.
//!
//! ## Example
//!
//! ```
//! use theiaupnp::soap::{build_soap_response, parse_soap_envelope, response_argument};
//!
//! let xml = build_soap_response(
//!     "urn:schemas-upnp-org:service:ContentDirectory:1",
//!     "Browse",
//!     vec![("NumberReturned".to_string(), "2".to_string())],
//! )
//! .unwrap();
//!
//! let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
//! assert_eq!(
//!     response_argument(&envelope, "BrowseResponse", "NumberReturned").as_deref(),
//!     Some("2")
//! );
//! ```

mod builder;
mod envelope;
mod fault;
mod parser;

pub use builder::{build_soap_request, build_soap_response};
pub use envelope::{SoapBody, SoapEnvelope, SoapHeader};
pub use fault::{SoapFault, UpnpError, build_soap_fault, parse_soap_fault};
pub use parser::{
    SoapParseError, find_child_with_suffix, parse_soap_envelope, response_argument,
};

/// Standard UPnP control error codes
pub mod error_codes {
    /// Invalid action
    pub const INVALID_ACTION: u32 = 401;

    /// Invalid arguments
    pub const INVALID_ARGS: u32 = 402;

    /// Action failed
    pub const ACTION_FAILED: u32 = 501;

    /// Optional action not implemented
    pub const OPTIONAL_ACTION_NOT_IMPLEMENTED: u32 = 602;

    /// ContentDirectory: no such object
    pub const NO_SUCH_OBJECT: u32 = 701;

    /// ContentDirectory: no such container
    pub const NO_SUCH_CONTAINER: u32 = 710;

    /// Vendor code returned by servers refusing a client (access denied)
    pub const ACCESS_DENIED: u32 = 801;
}
