//! # Observability & Tracing
//!
//! The [`setup_tracing`] function initializes structured logging with the `tracing` crate.
//! The engine logs with structured fields (`kind`, `query_index`, `lock`, counts), so log
//! lines stay short and remain filterable.
//!
//! ## What Gets Traced
//!
//! - **Unit-of-work lifecycle**: begin, commit, rollback (`info`); rollback causes (`warn`)
//! - **Loading**: every executed statement with its lock and row count (`debug`)
//! - **Change tracking**: snapshots, change counts, over-locked types (`debug`)
//! - **Storage**: lock waits, timeouts and NOWAIT conflicts in the in-memory store (`debug`)
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle only
//! RUST_LOG=info cargo run
//!
//! # Every statement and snapshot
//! RUST_LOG=debug cargo run
//!
//! # Only the storage layer
//! RUST_LOG=uow_recipe::store=debug cargo run
//! ```
//!
//! ## Trace Example
//!
//! **With `RUST_LOG=debug`**:
//!
//! ```text
//! INFO begin: Unit of work opened queries=2 read_only=false
//! DEBUG begin: Loaded query_index=0 kind=Customer lock=EXCLUSIVE rows=1
//! DEBUG begin: Loaded query_index=1 kind=PurchaseOrder lock=EXCLUSIVE rows=2
//! DEBUG finish: Resource changes computed changes=1
//! INFO finish: Unit of work committed changes=1
//! ```

/// Installs a compact fmt subscriber filtered by `RUST_LOG`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // Don't show module paths - we use kind and query_index instead
        .compact() // Compact format shows spans inline (e.g., "begin:Loaded")
        .init();
}
