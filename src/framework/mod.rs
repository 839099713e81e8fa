//! Transactional resource-loading and change-tracking engine.
//!
//! This module provides the building blocks a unit of work is made of: declaring what
//! will be loaded and locked, holding the loaded aggregates, and deriving the write set.
//!
//! # Main Components
//!
//! - [`Resource`] / [`Aggregate`] - Traits a domain implements to be managed by the engine
//! - [`Registry`] - Total order and reference descriptors, built once per domain
//! - [`QueryBuilder`] / [`QueryPlan`] - Declaring loads and their row locks
//! - [`ResourceContainer`] - The identity map business logic reads and mutates
//! - [`ChangeSet`] - Created / updated / deleted aggregates, from two snapshots
//! - [`Storage`] / [`Transaction`] - The storage collaborator contract
//!
//! # Testing
//!
//! See [`mock`] module for a scripted storage that needs no backend.

pub mod builder;
pub mod container;
pub mod criteria;
pub mod error;
pub mod mock;
pub mod plan;
pub mod query;
pub mod registry;
pub mod resource;
pub mod snapshot;
pub mod storage;

pub use builder::QueryBuilder;
pub use container::ResourceContainer;
pub use criteria::{
    Comparison, Connective, Criteria, ResolvedCriteria, ResolvedTerm, ValueSource,
};
pub use error::{
    BoxError, ConsistencyError, ContainerError, PlanError, RegistryError, StorageError, UowError,
};
pub use plan::{PlanMode, QueryPlan};
pub use query::{LoadStatement, LockMode, OrderBy, Pagination, Query};
pub use registry::{ReferenceDescriptor, Registry, RegistryBuilder, TotalOrder};
pub use resource::{Aggregate, EntityId, Resource, ResourceKind, ENTITY_ID};
pub use snapshot::{ChangeSet, Changes, ResourceSnapshot};
pub use storage::{Storage, Transaction, TransactionOptions, DEFAULT_WAIT_TIMEOUT_MS};
