use chrono::{DateTime, Utc};
use common::OrderId;
use domain::FulfillmentEvent;
use serde::{Deserialize, Serialize};

/// An outbox row: one engine event as committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Position in the outbox, increasing with commit order.
    pub sequence: i64,
    pub order_id: Option<OrderId>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Decodes the payload back into the typed event.
    pub fn event(&self) -> serde_json::Result<FulfillmentEvent> {
        serde_json::from_value(self.payload.clone())
    }
}
