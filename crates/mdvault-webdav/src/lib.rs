//! WebDAV storage backend for mdvault.
//!
//! [`WebDavClient`] is the protocol binding (PROPFIND, GET, PUT, DELETE,
//! MKCOL, MOVE, COPY with Basic auth). [`RemoteBackend`] adapts it to the
//! [`mdvault_core::StorageBackend`] contract and adds connection state and
//! polling watches.

mod backend;
mod client;
mod watch;

pub use backend::{ConnectionInfo, RemoteBackend, DEFAULT_POLL_INTERVAL};
pub use client::{DavResource, WebDavAuth, WebDavClient};
