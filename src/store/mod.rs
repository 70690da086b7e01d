//! Durable storage for patients, orders, images and the audit journal.
//!
//! The orchestrator only talks to the [`Repository`] trait. Each method is a
//! single logical transaction; nothing spans two calls.

pub mod sqlite;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::domain::{AuditEvent, Image, NewAuditEvent, Order, Patient, PendingOrder};

pub use sqlite::SqliteRepository;

/// Errors that can occur in the repository
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unknown patient: {0}")]
    UnknownPatient(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),

    #[error("Image patient {actual} does not match order {order_id} (patient {expected})")]
    PatientMismatch {
        order_id: String,
        expected: String,
        actual: String,
    },

    #[error("Identifier already exists: {0}")]
    DuplicateId(String),

    #[error("Repository lock poisoned")]
    LockPoisoned,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Storage collaborator used by the orchestrator and the audit log
pub trait Repository: Send + Sync {
    fn insert_patient(&self, patient: &Patient) -> Result<(), StoreError>;

    fn get_patient(&self, patient_id: &str) -> Result<Option<Patient>, StoreError>;

    fn query_all_patients(&self) -> Result<Vec<Patient>, StoreError>;

    /// Rejects orders whose patient does not exist
    fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    fn get_order(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Rejects images whose order does not exist or belongs to another patient
    fn insert_image(&self, image: &Image) -> Result<(), StoreError>;

    fn has_images(&self, order_id: &str) -> Result<bool, StoreError>;

    /// Append one audit event and return it with its assigned id
    fn append_audit(
        &self,
        timestamp: NaiveDateTime,
        event: &NewAuditEvent,
    ) -> Result<AuditEvent, StoreError>;

    /// Append several audit events in one transaction; all or none commit
    fn append_audit_batch(
        &self,
        timestamp: NaiveDateTime,
        events: &[NewAuditEvent],
    ) -> Result<Vec<AuditEvent>, StoreError>;

    /// Orders without images, newest first
    fn query_pending_orders(&self) -> Result<Vec<PendingOrder>, StoreError>;

    /// A patient's images by ascending study date
    fn query_images_by_patient(&self, patient_id: &str) -> Result<Vec<Image>, StoreError>;

    /// The most recent `limit` events, oldest first
    fn query_audit_tail(&self, limit: usize) -> Result<Vec<AuditEvent>, StoreError>;

    /// All events correlated with an order, oldest first
    fn query_audit_for_order(&self, order_id: &str) -> Result<Vec<AuditEvent>, StoreError>;
}
