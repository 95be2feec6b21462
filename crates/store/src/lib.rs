//! Deckroom Store
//!
//! The synchronized document store seam: hierarchical paths, the
//! `SyncStore` trait (read, write, watch, compare-and-swap transactions,
//! deferred on-disconnect writes), and an in-process reference
//! implementation used by tests and local sessions.

pub mod error;
pub mod memory;
pub mod path;
pub mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use path::StorePath;
pub use store::{DeferredWrite, Snapshot, SyncStore, TxnOp, TxnOutcome};
