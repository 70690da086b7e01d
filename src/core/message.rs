//! Outbound HL7 v2 order message construction.
//!
//! Produces an ORM^O01 style message with MSH, PID, PV1, ORC and OBR
//! segments. Delimiters inside field values are not escaped; upstream data
//! must not contain `|`, `^`, `~`, `\` or `&`.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::Patient;

/// HL7 timestamp: seconds precision, no separators, no zone
pub const HL7_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// HL7 date (DOB)
pub const HL7_DATE_FORMAT: &str = "%Y%m%d";

pub const SEGMENT_TERMINATOR: &str = "\n";

/// MSH sender/receiver identification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self {
            sending_application: "ORDERFLOW".to_string(),
            sending_facility: "HOSPITAL".to_string(),
            receiving_application: "RIS".to_string(),
            receiving_facility: "RADIOLOGY".to_string(),
        }
    }
}

/// Builds outbound order messages. Pure: same inputs, same text.
#[derive(Debug, Clone, Default)]
pub struct MessageFormatter {
    header: MessageHeader,
}

impl MessageFormatter {
    pub fn new(header: MessageHeader) -> Self {
        Self { header }
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Format the new-order message for `order_id`
    pub fn format(
        &self,
        patient: &Patient,
        order_id: &str,
        procedure: &str,
        priority: &str,
        now: NaiveDateTime,
    ) -> String {
        let timestamp = format_hl7_timestamp(now);
        let h = &self.header;

        let segments = [
            format!(
                "MSH|^~\\&|{}|{}|{}|{}|{}||ORM^O01|{}|P|2.3",
                h.sending_application,
                h.sending_facility,
                h.receiving_application,
                h.receiving_facility,
                timestamp,
                order_id,
            ),
            format!(
                "PID|1||{}||{}^{}||{}|{}",
                patient.patient_id,
                patient.last_name,
                patient.first_name,
                patient.date_of_birth.format(HL7_DATE_FORMAT),
                patient.gender,
            ),
            "PV1|1|O".to_string(),
            format!("ORC|NW|{}|||||^^^^^{}", order_id, priority),
            format!("OBR|1|{}||{}|||{}", order_id, procedure, timestamp),
        ];

        let mut message = String::new();
        for segment in &segments {
            message.push_str(segment);
            message.push_str(SEGMENT_TERMINATOR);
        }
        message
    }
}

pub fn format_hl7_timestamp(at: NaiveDateTime) -> String {
    at.format(HL7_TIMESTAMP_FORMAT).to_string()
}
