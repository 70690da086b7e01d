//! orderflow - Imaging order orchestrator for file-drop HL7 interfaces
//!
//! Coordinates imaging orders between a requesting application and an
//! external interface engine that communicates only through files dropped
//! into well-known directories.
//!
//! # Architecture
//!
//! The system is built around an append-only audit journal:
//! - Orders, images and patients are insert-only rows
//! - Every transition is recorded as an immutable audit event
//! - Order status is derived from the journal and image rows, never stored
//!
//! # Modules
//!
//! - `core`: Orchestrator, audit log, HL7 message formatter, clock
//! - `domain`: Data structures (AuditEvent, Order, Image, OrderStatus)
//! - `ingest`: Response directory watchers
//! - `store`: Repository trait and SQLite implementation
//! - `config`: Configuration loading and directory layout
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Create an order
//! orderflow order --patient P1 --procedure "CT Abdomen" --priority STAT
//!
//! # Watch response directories
//! orderflow serve
//!
//! # Inspect the journal
//! orderflow audit --limit 20
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod store;

// Re-export main types at crate root for convenience
pub use core::{Orchestrator, OrchestratorConfig, OrderError};
pub use domain::{AuditEvent, EventType, Image, Order, OrderState, OrderStatus, Patient};
pub use ingest::{ResponseFile, ResponseWatchConfig, ResponseWatcher};
pub use store::{Repository, SqliteRepository, StoreError};
