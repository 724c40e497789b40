//! Work-item tracker access
//!
//! Layers, leaves first:
//! - [`transport`]: signing, throttling, retry and call accounting
//! - [`patch`]: typed patch documents
//! - [`client`]: [`AdoClient`], typed REST operations over the transport
//! - [`repository`]: the [`WorkItemRepository`] seam used by the synchronizer

pub mod client;
pub mod error;
pub mod patch;
pub mod repository;
pub mod transport;
pub mod types;
pub mod wiki;

#[cfg(test)]
pub(crate) mod memory;

pub use client::{AdoClient, AdoConfig};
pub use error::{TrackerError, TrackerResult};
pub use patch::{FieldUpdate, PatchDocument, PatchOperation, PatchVerb, RelationLink};
pub use repository::{NewItem, WorkItemRepository};
pub use transport::{ApiCallStats, HttpBackend, RetryPolicy, Transport, TransportConfig};
pub use types::{
    AttachmentRef, Expand, HierarchySnapshot, ItemKind, PageLookup, RelationKind, RemoteItem,
};
