//! Order status reconstruction from the audit journal.
//!
//! Status is never stored. It is replayed from an order's audit events in
//! `event_id` order, with image existence supplied by the caller.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::events::{AuditEvent, EventType};

/// Delivery track of an order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Order row exists, no outbound message yet
    #[default]
    Created,

    /// Outbound message written
    Hl7Written,

    /// Waiting for the external system's response file
    WaitingForJson,

    /// Response file observed and delivery recorded
    Delivered,

    /// Outbound write failed; needs a manual resend
    SendFailed,
}

/// Derived status of a single order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub state: OrderState,

    /// Capture track, independent of delivery
    pub image_captured: bool,

    pub created_at: Option<NaiveDateTime>,
    pub delivered_at: Option<NaiveDateTime>,

    /// Last journal entry applied
    pub last_event_id: Option<i64>,
}

impl OrderStatus {
    /// Replay an order's events (oldest first).
    ///
    /// `has_images` is the authoritative capture flag; `IMAGE_CAPTURED`
    /// events only ever set it, never clear it.
    pub fn from_events(order_id: &str, events: &[AuditEvent], has_images: bool) -> Self {
        let mut status = Self {
            order_id: order_id.to_string(),
            state: OrderState::default(),
            image_captured: has_images,
            created_at: None,
            delivered_at: None,
            last_event_id: None,
        };

        for event in events {
            status.apply_event(event);
        }

        status
    }

    /// Apply a single event
    pub fn apply_event(&mut self, event: &AuditEvent) {
        self.last_event_id = Some(event.event_id);

        // Delivery is terminal for the delivery track.
        let delivered = self.state == OrderState::Delivered;

        match event.event_type {
            EventType::OrderCreated => {
                self.created_at = Some(event.timestamp);
            }
            EventType::Hl7Created if !delivered => {
                self.state = OrderState::Hl7Written;
            }
            EventType::WaitingForJson if !delivered => {
                self.state = OrderState::WaitingForJson;
            }
            EventType::Hl7WriteFailed if !delivered => {
                self.state = OrderState::SendFailed;
            }
            EventType::OrderDelivered => {
                self.state = OrderState::Delivered;
                self.delivered_at = Some(event.timestamp);
            }
            EventType::ImageCaptured => {
                self.image_captured = true;
            }
            _ => {}
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.image_captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(id: i64, event_type: EventType) -> AuditEvent {
        AuditEvent {
            event_id: id,
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(9, 0, id as u32)
                .unwrap(),
            event_type,
            ref_id: "ORD1".to_string(),
            order_id: Some("ORD1".to_string()),
            detail: None,
        }
    }

    #[test]
    fn test_empty_history_is_created() {
        let status = OrderStatus::from_events("ORD1", &[], false);
        assert_eq!(status.state, OrderState::Created);
        assert_eq!(status.last_event_id, None);
    }

    #[test]
    fn test_full_lifecycle() {
        let events = vec![
            event(1, EventType::OrderCreated),
            event(2, EventType::Hl7Created),
            event(3, EventType::WaitingForJson),
        ];
        let status = OrderStatus::from_events("ORD1", &events, false);
        assert_eq!(status.state, OrderState::WaitingForJson);
        assert!(status.is_pending());
        assert_eq!(status.last_event_id, Some(3));

        let mut status = status;
        status.apply_event(&event(4, EventType::JsonCreated));
        assert_eq!(status.state, OrderState::WaitingForJson);
        status.apply_event(&event(5, EventType::OrderDelivered));
        assert_eq!(status.state, OrderState::Delivered);
        assert!(status.delivered_at.is_some());
    }

    #[test]
    fn test_capture_is_independent_of_delivery() {
        let events = vec![
            event(1, EventType::OrderCreated),
            event(2, EventType::Hl7Created),
            event(3, EventType::WaitingForJson),
            event(4, EventType::ImageCaptured),
        ];
        let status = OrderStatus::from_events("ORD1", &events, true);
        assert_eq!(status.state, OrderState::WaitingForJson);
        assert!(status.image_captured);
    }

    #[test]
    fn test_send_failure_then_resend() {
        let events = vec![
            event(1, EventType::OrderCreated),
            event(2, EventType::Hl7WriteFailed),
        ];
        let status = OrderStatus::from_events("ORD1", &events, false);
        assert_eq!(status.state, OrderState::SendFailed);

        let mut status = status;
        status.apply_event(&event(3, EventType::Hl7Created));
        status.apply_event(&event(4, EventType::WaitingForJson));
        assert_eq!(status.state, OrderState::WaitingForJson);
    }

    #[test]
    fn test_late_resend_does_not_undo_delivery() {
        let events = vec![
            event(1, EventType::OrderCreated),
            event(2, EventType::OrderDelivered),
            event(3, EventType::Hl7Created),
            event(4, EventType::WaitingForJson),
        ];
        let status = OrderStatus::from_events("ORD1", &events, false);
        assert_eq!(status.state, OrderState::Delivered);
    }
}
