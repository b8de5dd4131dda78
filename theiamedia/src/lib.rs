//! # theiamedia - media identifiers and snapshots
//!
//! [`MediaId`] names any piece of media Theia knows about, whatever its
//! origin (UPnP server, document tree, local volume, metadata provider).
//! [`MediaRef`] pairs an id with a snapshot of its cached metadata.

mod id;
mod lookup;
mod media_ref;

pub use id::{MEDIA_ID_VERSION, MediaId, MediaIdError, MediaKind};
pub use lookup::{LookupQuery, LookupRequest};
pub use media_ref::{MediaMeta, MediaRef};

/// Object id of a UPnP ContentDirectory root
pub const UPNP_ROOT_ID: &str = "0";

/// Container key of the root of a volume or document tree
pub const PATH_ROOT: &str = "";
