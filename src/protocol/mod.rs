//! Sync protocol façade that re-exports the wire types, the `RemoteSync`
//! trait, the server-side engine, and the transport mapping helpers so
//! embedders can serve the protocol over HTTP or custom transports with
//! minimal plumbing.

pub mod http;
pub mod sync;
pub mod types;

// Re-export main interfaces
pub use sync::{RemoteSync, SyncServer};
pub use types::*;
