//! # theiabrowse - UPnP browsing and local volume scanning
//!
//! Keeps the [`theiacache`] listings in step with what media servers and
//! local volumes actually hold.
//!
//! - [`discovery`] finds media servers over SSDP and describes them
//! - [`resolver`] turns a server UDN into a [`ContentDirectory`] client
//! - [`engine`] browses one container and reconciles it into the cache
//! - [`scanner`] walks whole trees on a single background thread
//! - [`events`] subscribes to ContentDirectory change events
//! - [`service`] ties the above to the server lifecycle
//! - [`storage`] lists local volumes the same way
//! - [`folder_loader`] serves a visible listing and refreshes it on demand
//!
//! ## Wiring
//!
//! ```ignore
//! let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
//! let waiters = Arc::new(DiscoveryWaiters::new());
//! let ssdp = SsdpClient::new()?;
//! let resolver = ServiceResolver::new(registry.clone(), waiters.clone(),
//!     Arc::new(ssdp.clone()), discovery_timeout, http_timeout);
//! let engine = Arc::new(BrowseEngine::new(store.clone(), Arc::new(resolver), options));
//! let scanner = Arc::new(Scanner::spawn("upnp", engine.clone(), scan_options)?);
//! let service = Arc::new(UpnpBrowseService::new(store, scanner, None));
//! let manager = DiscoveryManager::new(provider, registry, waiters, service);
//! let discovery = Discovery::spawn(ssdp, manager)?;
//! ```

pub mod content_directory;
pub mod description;
pub mod discovery;
pub mod engine;
mod error;
pub mod events;
pub mod folder_loader;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod service;
pub mod soap_client;
pub mod storage;

pub use content_directory::{BrowsePage, ContentDirectory, UpnpContentDirectory};
pub use description::{DescriptionProvider, DiscoveredEndpoint, HttpDescriptionProvider};
pub use discovery::{DeviceListener, Discovery, DiscoveryManager};
pub use engine::{BrowseBatch, BrowseEngine, BrowseOptions, BrowsedChild, Refresher};
pub use error::{BrowseError, Result};
pub use events::{GenaSubscriber, MediaServerEvent};
pub use folder_loader::{FOLDER_WINDOW, FolderLoader, RefreshWorker};
pub use registry::{DeviceRegistry, MediaServerInfo, ServiceEndpoint};
pub use resolver::{DirectoryResolver, DiscoveryWaiters, SearchTrigger, ServiceResolver};
pub use scanner::{Enqueued, Scanner, ScannerOptions};
pub use service::{MediaRefresher, UpnpBrowseService};
pub use storage::StorageScanner;
