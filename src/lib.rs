#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Unit of Work Recipe
//!
//! > **A Recipe for lock-ordered units of work in Rust.**
//!
//! This crate is a transactional resource-loading and change-tracking engine. A unit of
//! work declares up front which aggregates it reads or mutates, in what order and under
//! which row locks. The engine loads them into an in-memory container, lets business code
//! mutate that container freely, and on commit derives the create/update/delete set by
//! diffing snapshots, checking that every mutation is backed by a strong enough lock.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Why declare loads up front?
//!
//! - **Deadlock avoidance**: every locking plan acquires its locks in one global
//!   priority order, so two transactions following the protocol never wait in a cycle.
//! - **No "mark dirty"**: business code mutates plain structs; the diff finds the changes.
//! - **Under-locking is caught**: updating or deleting a type the plan did not lock
//!   exclusively fails the commit, before anything reaches storage.
//!
//! ## 🚀 Core Concepts
//!
//! ### Generics: The Power of `R`
//! You'll see `QueryPlan<R: Resource>` everywhere. `R` is the domain's resource enum (one
//! variant per aggregate type). The engine is written once and works for any domain that
//! implements [`Resource`](framework::Resource) and [`Aggregate`](framework::Aggregate).
//!
//! ### Mocking: Testing without a Database
//! See the [`framework::mock`] module for a scripted storage, and [`store::MemoryStore`]
//! for an in-process store with real row-lock semantics.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Type-Safe Error Handling
//! Each phase has its own error type ([`PlanError`](framework::PlanError),
//! [`ContainerError`](framework::ContainerError), [`StorageError`](framework::StorageError),
//! [`ConsistencyError`](framework::ConsistencyError)), aggregated into
//! [`UowError`](framework::UowError) with `#[from]`. Only lock contention is retryable.
//!
//! ### 2. Concurrency Model
//! Load and persist are async suspend points. A container is owned by exactly one unit of
//! work and never shared, so it needs no locking. Cross-transaction safety comes from the
//! storage's row locks plus the lock ordering protocol.
//!
//! ### 3. Observability
//! We use `tracing` everywhere with structured logging.
//! See the [`lifecycle::tracing`] module for details.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Engine ([`framework`])
//! Registries, criteria, queries, plans, the container, snapshots and the storage contract.
//! - **Key items**: [`QueryBuilder`](framework::QueryBuilder), [`QueryPlan`](framework::QueryPlan),
//!   [`ResourceContainer`](framework::ResourceContainer).
//!
//! ### 2. The Orchestrator ([`lifecycle`])
//! - **Role**: Runs a plan through load, mutate, diff, validate and persist, or rolls back.
//! - **Key items**: [`UnitOfWorkFactory`](lifecycle::UnitOfWorkFactory), [`UnitOfWork`](lifecycle::UnitOfWork).
//!
//! ### 3. Storage ([`store`])
//! - **Role**: Backends implementing [`Storage`](framework::Storage).
//!
//! ### 4. The Sample Domain ([`model`])
//! A small shop: customers, purchase orders, shipments and products.
//!
//! ## 🚀 Quick Start
//!
//! ### Running the Demo
//!
//! ```bash
//! # Run with info logs
//! RUST_LOG=info cargo run
//! ```
//!
//! ### Running Tests
//!
//! ```bash
//! cargo test
//! ```

pub mod framework;
pub mod lifecycle;
pub mod model;
pub mod store;
