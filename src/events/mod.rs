use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Products at or below this stock level raise a low-stock warning when touched.
pub const LOW_STOCK_WARNING_LEVEL: i32 = 3;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    /// Domain operations have already committed by the time events are emitted.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "dropping domain event");
        }
    }
}

/// Storefront domain events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Catalog
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    ProductDeleted(Uuid),
    StockRestored {
        product_id: Uuid,
        quantity: i32,
    },
    LowStock {
        product_id: Uuid,
        remaining: i32,
    },

    // Cart
    CartUpdated {
        session_id: String,
        item_count: i32,
    },
    CartCleared(String),
    CouponApplied {
        session_id: String,
        code: String,
        discount: Decimal,
    },

    // Orders
    OrderCreated {
        order_id: Uuid,
        user_id: Uuid,
        total: Decimal,
    },
    PaymentConfirmed(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    OrderCancelled(Uuid),
    OrderDeleted(Uuid),

    // Engagement
    FavoriteToggled {
        user_id: Uuid,
        product_id: Uuid,
        favorited: bool,
    },
    FeedbackSubmitted {
        order_id: Uuid,
        rating: i32,
        at: DateTime<Utc>,
    },
}

/// Drains the event channel, logging each event. Runs until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                user_id,
                total,
            } => {
                info!(%order_id, %user_id, %total, "order created");
            }
            Event::PaymentConfirmed(order_id) => {
                info!(%order_id, "payment confirmed");
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(%order_id, %old_status, %new_status, "order status changed");
            }
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "order cancelled");
            }
            Event::LowStock {
                product_id,
                remaining,
            } => {
                warn!(%product_id, remaining, "low stock");
            }
            _ => {
                debug!(?event, "event");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_tolerates_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        assert!(sender.send(Event::OrderDeleted(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::OrderDeleted(Uuid::new_v4())).await;
    }

    #[tokio::test]
    async fn process_events_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender
            .send(Event::PaymentConfirmed(Uuid::new_v4()))
            .await
            .unwrap();
        drop(sender);
        process_events(rx).await;
    }
}
