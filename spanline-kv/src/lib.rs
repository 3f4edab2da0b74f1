//! Worked example: a key-value service chain traced end to end.
//!
//! Request flow is `EdgeService` (HTTP) → `StorageService` (RPC seam) →
//! [`Storage`] backend, with each tier owning its own tracer. The
//! integration tests in `tests/` drive the full chain and assert on the
//! exported spans.

pub mod service;
pub mod store;

pub use service::{EdgeService, GetRequest, GetResponse, SetRequest, StorageService};
pub use store::{FlakyStore, MemoryStore, Storage, StorageError, TracedStore};
