//! Domain types for the order orchestrator.
//!
//! This module contains the core data structures:
//! - Events: Immutable audit journal entries
//! - Records: Patients, orders and images
//! - Status: Order state derived from the journal

pub mod events;
pub mod records;
pub mod status;

// Re-export commonly used types
pub use events::{AuditEvent, EventType, NewAuditEvent};
pub use records::{Image, Order, Patient, PendingOrder};
pub use status::{OrderState, OrderStatus};
