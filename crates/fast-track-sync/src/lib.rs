//! Fast Track sync: everything between a session on screen and the session
//! store.
//!
//! Responsibilities:
//! - local key-value storage and the session cache built on it
//! - the remote session store client
//! - the debounced, polling session synchronizer
//! - edit/read-only access decisions for session routes
//! - the session lifecycle (create, import, delete, switch)

pub mod cache;
pub mod error;
pub mod gate;
pub mod links;
pub mod remote;
pub mod store;
pub mod sync;
pub mod tracker;

pub use cache::{LocalSessionCache, SessionsData};
pub use error::{RemoteError, StoreError, SyncError};
pub use gate::{AccessGate, GateOutcome, Route};
pub use links::SessionLinkBook;
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use sync::{AccessMode, SessionSync, SyncStatus, SyncTimings};
pub use tracker::Tracker;
