//! Storage backends.
//!
//! - [`MemoryStore`] - In-process tables with row-level shared/exclusive locks, NOWAIT
//!   and lock wait timeouts. Used by the demo and the integration tests.
//!
//! A relational backend implements the same [`Storage`](crate::framework::Storage)
//! contract and maps its lock errors onto [`StorageError`](crate::framework::StorageError).

pub mod memory;

pub use memory::MemoryStore;
