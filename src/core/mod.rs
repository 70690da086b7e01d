//! Core orchestration logic.
//!
//! This module contains:
//! - AuditLog: Append-only journal of every transition
//! - Clock: Injected wall clock
//! - Gate: Write serialization, optionally across processes
//! - Message: Outbound HL7 order formatting
//! - Orchestrator: Serialized command path and derived queries

pub mod audit_log;
pub mod clock;
pub mod gate;
pub mod ids;
pub mod message;
pub mod orchestrator;

// Re-export commonly used types
pub use audit_log::{read_journal, AuditLog};
pub use clock::{Clock, FixedClock, SystemClock};
pub use gate::{WriteGate, WriteGuard};
pub use ids::{is_order_id, new_image_id, new_order_id};
pub use message::{format_hl7_timestamp, MessageFormatter, MessageHeader};
pub use orchestrator::{OrchestratorConfig, OrderError, Orchestrator};
