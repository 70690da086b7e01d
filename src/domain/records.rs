//! Durable records: patients, orders and captured images.
//!
//! All three are insert-only. Order progress lives in the audit journal and
//! fulfilment is derived from image rows at query time.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Patient identity, seeded out-of-band and never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: String,
    pub mrn: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,

    /// Allergy notes (free text)
    #[serde(default)]
    pub allergies: Option<String>,
}

impl Patient {
    /// Name as shown on dashboards ("First Last")
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// A request for an imaging procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub patient_id: String,
    pub procedure_code: String,
    pub priority: String,
    pub created_at: NaiveDateTime,
}

/// Evidence that an order was fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub image_id: String,
    pub order_id: String,
    pub patient_id: String,

    /// Where the capture system stores the pixel data
    pub file_path: PathBuf,

    pub study_date: NaiveDateTime,
    pub modality: String,
}

/// An order with no image yet, joined with its patient's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingOrder {
    pub order: Order,
    pub patient_name: String,
}
