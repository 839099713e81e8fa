//! Unit-of-work orchestration and runtime setup.
//!
//! This module ties the engine together for one logical transaction:
//!
//! - **Unit-of-work lifecycle**: load a plan, hand the container to business logic,
//!   diff, validate and persist, or roll back
//! - **Configuration**: lock wait timeout from the environment
//! - **Observability setup**: Initializing tracing and logging
//!
//! # Main Components
//!
//! - [`UnitOfWorkFactory`] - Opens units of work against a storage and a registry
//! - [`UnitOfWork`] - One transaction's plan, container and storage transaction
//! - [`UnitOfWorkConfig`] - Configuration read from the environment
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod config;
pub mod tracing;
pub mod unit_of_work;

pub use self::config::*;
pub use self::tracing::setup_tracing;
pub use self::unit_of_work::*;
