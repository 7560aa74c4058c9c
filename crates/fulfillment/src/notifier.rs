//! Customer notification sink and its implementations.
//!
//! Delivery is best-effort: callers log failures and carry on.

use std::sync::Arc;

use async_trait::async_trait;
use common::{CustomerId, OrderId};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ShortageAccepted,
    ShortageRejected,
    Shipped,
    PartialShipment,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::ShortageAccepted => "SHORTAGE_ACCEPTED",
            NotificationKind::ShortageRejected => "SHORTAGE_REJECTED",
            NotificationKind::Shipped => "SHIPPED",
            NotificationKind::PartialShipment => "PARTIAL_SHIPMENT",
        }
    }
}

/// A one-shot message to a customer about one of their orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub customer_id: CustomerId,
    pub order_id: OrderId,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
}

#[derive(Debug, Error)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Trait for delivering customer notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Default)]
struct InMemoryNotifierState {
    sent: Vec<Notification>,
    fail: bool,
}

/// In-memory notifier for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotifier {
    state: Arc<RwLock<InMemoryNotifierState>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the notifier to fail every delivery.
    pub async fn set_fail(&self, fail: bool) {
        self.state.write().await.fail = fail;
    }

    /// Notifications delivered so far, oldest first.
    pub async fn sent(&self) -> Vec<Notification> {
        self.state.read().await.sent.clone()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let mut state = self.state.write().await;
        if state.fail {
            return Err(NotifyError("notification sink unavailable".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}

/// Notifier that writes each notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        tracing::info!(
            customer_id = %notification.customer_id,
            order_id = %notification.order_id,
            kind = notification.kind.as_str(),
            title = %notification.title,
            body = %notification.body,
            "customer notified"
        );
        Ok(())
    }
}
