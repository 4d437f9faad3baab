//! Storage service (C2): CRUD over evaluation records and the event log,
//! large-output blob offload, pagination, statistics, and a read-through
//! cache decorator.

pub mod blob;
pub mod cache;
pub mod error;
pub mod event_log;
pub mod memory;
pub mod offload;
pub mod preview;
pub mod service;
pub mod sled_store;
pub mod types;

pub use blob::{BlobStore, InMemoryBlobStore};
pub use cache::CachingStorage;
pub use error::StorageError;
pub use memory::InMemoryStorage;
pub use offload::BlobOffloadingStorage;
pub use service::StorageService;
pub use sled_store::SledStorage;
pub use types::{EvaluationPatch, ListFilter, Page, Statistics};
