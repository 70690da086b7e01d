//! Audit event types for the order journal.
//!
//! Every state transition of an order is recorded as an immutable audit
//! event. The journal is append-only; `event_id` is the only total order.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A committed entry in the audit journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Monotonic identifier assigned by the journal
    pub event_id: i64,

    /// Wall-clock time of the append (may run backwards, never used for ordering)
    pub timestamp: NaiveDateTime,

    /// Kind of transition
    pub event_type: EventType,

    /// Subject of the event: an order id, a file name or a raw message
    pub ref_id: String,

    /// Order this event belongs to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,

    /// Free-form detail (error text, image id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// An audit event that has not been committed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuditEvent {
    pub event_type: EventType,
    pub ref_id: String,
    pub order_id: Option<String>,
    pub detail: Option<String>,
}

impl NewAuditEvent {
    pub fn new(event_type: EventType, ref_id: impl Into<String>) -> Self {
        Self {
            event_type,
            ref_id: ref_id.into(),
            order_id: None,
            detail: None,
        }
    }

    /// Correlate the event with an order
    pub fn for_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    /// Attach detail text
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Kinds of audit events.
///
/// The journal treats these as opaque tokens; unknown tokens read back from
/// storage survive as `Other` so the set stays open-ended.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Order row persisted
    OrderCreated,

    /// Outbound message written (ref is the full message text)
    Hl7Created,

    /// Waiting for the external system's response file
    WaitingForJson,

    /// Response file observed in a watched directory
    JsonCreated,

    /// Delivery of the order confirmed by a response file
    OrderDelivered,

    /// Image captured for the order
    ImageCaptured,

    /// Writing the outbound message failed; order needs a resend
    Hl7WriteFailed,

    /// Response file did not name a known order
    ResponseUnmatched,

    /// Background watcher failure
    WatcherError,

    /// Any token this build does not know about
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::OrderCreated => "ORDER_CREATED",
            Self::Hl7Created => "HL7_CREATED",
            Self::WaitingForJson => "WAITING_FOR_JSON",
            Self::JsonCreated => "JSON_CREATED",
            Self::OrderDelivered => "ORDER_DELIVERED",
            Self::ImageCaptured => "IMAGE_CAPTURED",
            Self::Hl7WriteFailed => "HL7_WRITE_FAILED",
            Self::ResponseUnmatched => "RESPONSE_UNMATCHED",
            Self::WatcherError => "WATCHER_ERROR",
            Self::Other(token) => token,
        }
    }
}

impl From<&str> for EventType {
    fn from(token: &str) -> Self {
        match token {
            "ORDER_CREATED" => Self::OrderCreated,
            "HL7_CREATED" => Self::Hl7Created,
            "WAITING_FOR_JSON" => Self::WaitingForJson,
            "JSON_CREATED" => Self::JsonCreated,
            "ORDER_DELIVERED" => Self::OrderDelivered,
            "IMAGE_CAPTURED" => Self::ImageCaptured,
            "HL7_WRITE_FAILED" => Self::Hl7WriteFailed,
            "RESPONSE_UNMATCHED" => Self::ResponseUnmatched,
            "WATCHER_ERROR" => Self::WatcherError,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(token: String) -> Self {
        Self::from(token.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
