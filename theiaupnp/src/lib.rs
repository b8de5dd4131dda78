//! UPnP wire plumbing used by the Theia control point.
//!
//! - [`soap`]: SOAP envelopes for invoking actions and reading their responses
//!   and faults.
//! - [`ssdp`]: the SSDP control-point client (M-SEARCH and announcements).

pub mod soap;
pub mod ssdp;
