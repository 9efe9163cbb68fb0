use crate::{
    auth::AuthenticatedUser,
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item, product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrderInput {
    pub delivery_address: Option<String>,
    pub payment_status: Option<PaymentStatus>,
}

/// What happened to stock when an order released it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoredStock {
    pub restored: Vec<(Uuid, i32)>,
    pub skipped: Vec<Uuid>,
}

/// Order reads, payment confirmation and lifecycle transitions.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn list_all(
        &self,
        status: Option<OrderStatus>,
    ) -> Result<Vec<order::Model>, ServiceError> {
        let mut query = order::Entity::find().order_by_desc(order::Column::CreatedAt);
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        Ok(query.all(&*self.db).await?)
    }

    async fn find(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    pub async fn get_with_items(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = self.find(order_id).await?;
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::ProductName)
            .all(&*self.db)
            .await?;
        Ok(OrderWithItems { order, items })
    }

    /// Same as [`Self::get_with_items`] but only for the owner or an admin.
    pub async fn get_for_user(
        &self,
        order_id: Uuid,
        user: &AuthenticatedUser,
    ) -> Result<OrderWithItems, ServiceError> {
        let found = self.get_with_items(order_id).await?;
        if found.order.user_id != user.id && !user.is_admin() {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".into(),
            ));
        }
        Ok(found)
    }

    /// Marks an order paid, moving a Pending order on to Baking. Only acts
    /// while payment is still pending, so replayed confirmations are no-ops.
    /// Returns whether this call made the transition.
    #[instrument(skip(self))]
    pub async fn confirm_payment(&self, order_id: Uuid) -> Result<bool, ServiceError> {
        let txn = self.db.begin().await?;
        let current = lock_order(&txn, order_id).await?;

        if current.payment_status != PaymentStatus::Pending
            || current.status == OrderStatus::Cancelled
        {
            info!(%order_id, payment_status = ?current.payment_status, "payment confirmation ignored");
            return Ok(false);
        }

        let mut changes = order::ActiveModel {
            payment_status: Set(PaymentStatus::Paid),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        let new_status = if current.status == OrderStatus::Pending {
            changes.status = Set(OrderStatus::Baking);
            OrderStatus::Baking
        } else {
            current.status
        };

        let result = order::Entity::update_many()
            .set(changes)
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;
        txn.commit().await?;

        if result.rows_affected == 0 {
            return Ok(false);
        }

        info!(%order_id, "payment confirmed");
        self.event_sender
            .send_or_log(Event::PaymentConfirmed(order_id))
            .await;
        if new_status != current.status {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: current.status.to_string(),
                    new_status: new_status.to_string(),
                })
                .await;
        }
        Ok(true)
    }

    /// Customer cancellation. Only the owner may cancel.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        user: &AuthenticatedUser,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let current = lock_order(&txn, order_id).await?;
        if current.user_id != user.id {
            return Err(ServiceError::Forbidden(
                "Only the customer who placed an order can cancel it".into(),
            ));
        }
        let (cancelled, restored) = cancel_locked(&txn, current).await?;
        txn.commit().await?;

        self.emit_cancelled(&cancelled, &restored).await;
        Ok(cancelled)
    }

    /// Admin status change.
    #[instrument(skip(self))]
    pub async fn change_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let current = lock_order(&txn, order_id).await?;
        let old_status = current.status;

        if old_status == OrderStatus::Cancelled && new_status != OrderStatus::Cancelled {
            return Err(ServiceError::Conflict(
                "A cancelled order cannot be reopened".into(),
            ));
        }

        if new_status == OrderStatus::Cancelled {
            let (cancelled, restored) = cancel_locked(&txn, current).await?;
            txn.commit().await?;
            self.emit_cancelled(&cancelled, &restored).await;
            return Ok(cancelled);
        }

        let mut changes = order::ActiveModel {
            status: Set(new_status),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if new_status == OrderStatus::Delivered && current.payment_status == PaymentStatus::Pending {
            changes.payment_status = Set(PaymentStatus::Paid);
        }

        order::Entity::update_many()
            .set(changes)
            .filter(order::Column::Id.eq(order_id))
            .exec(&txn)
            .await?;
        let updated = lock_order(&txn, order_id).await?;
        txn.commit().await?;

        info!(%order_id, %old_status, %new_status, "order status changed");
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                old_status: old_status.to_string(),
                new_status: new_status.to_string(),
            })
            .await;
        Ok(updated)
    }

    #[instrument(skip(self, input))]
    pub async fn update_details(
        &self,
        order_id: Uuid,
        input: UpdateOrderInput,
    ) -> Result<order::Model, ServiceError> {
        let current = self.find(order_id).await?;

        let mut changes = order::ActiveModel {
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(address) = input.delivery_address {
            let address = address.trim();
            if address.is_empty() {
                return Err(ServiceError::ValidationError(
                    "Delivery address must not be blank".into(),
                ));
            }
            changes.delivery_address = Set(address.to_string());
        }
        if let Some(payment_status) = input.payment_status {
            changes.payment_status = Set(payment_status);
        }

        order::Entity::update_many()
            .set(changes)
            .filter(order::Column::Id.eq(current.id))
            .exec(&*self.db)
            .await?;
        self.find(order_id).await
    }

    /// Admin deletion, allowed for Pending and Cancelled orders. A Pending
    /// order still holds stock and releases it here.
    #[instrument(skip(self))]
    pub async fn delete(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let current = lock_order(&txn, order_id).await?;

        match current.status {
            OrderStatus::Pending => {
                restore_stock(&txn, order_id).await?;
            }
            OrderStatus::Cancelled => {}
            other => {
                return Err(ServiceError::Conflict(format!(
                    "Only pending or cancelled orders can be deleted (order is {other})"
                )));
            }
        }

        order_item::Entity::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order::Entity::delete_by_id(order_id).exec(&txn).await?;
        txn.commit().await?;

        info!(%order_id, "order deleted");
        self.event_sender
            .send_or_log(Event::OrderDeleted(order_id))
            .await;
        Ok(())
    }

    async fn emit_cancelled(&self, order: &order::Model, restored: &RestoredStock) {
        info!(order_id = %order.id, restored = restored.restored.len(), "order cancelled");
        self.event_sender
            .send_or_log(Event::OrderCancelled(order.id))
            .await;
        for (product_id, quantity) in &restored.restored {
            self.event_sender
                .send_or_log(Event::StockRestored {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .await;
        }
    }
}

async fn lock_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
}

/// Cancels an order already locked by the caller's transaction. The status
/// guard on the update means concurrent cancellations restore stock once.
async fn cancel_locked<C: ConnectionTrait>(
    conn: &C,
    current: order::Model,
) -> Result<(order::Model, RestoredStock), ServiceError> {
    if !current.status.is_cancellable() {
        return Err(ServiceError::Conflict(format!(
            "Order cannot be cancelled once it is {}",
            current.status
        )));
    }

    let result = order::Entity::update_many()
        .set(order::ActiveModel {
            status: Set(OrderStatus::Cancelled),
            payment_status: Set(PaymentStatus::Refunded),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(order::Column::Id.eq(current.id))
        .filter(order::Column::Status.eq(current.status))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::Conflict(
            "Order was modified concurrently".into(),
        ));
    }

    let restored = restore_stock(conn, current.id).await?;
    let cancelled = lock_order(conn, current.id).await?;
    Ok((cancelled, restored))
}

/// Puts each line's quantity back on its product. Lines whose product has
/// been deleted are skipped.
pub(crate) async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<RestoredStock, ServiceError> {
    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .all(conn)
        .await?;

    let mut outcome = RestoredStock::default();
    for item in items {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(item.quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(item.product_id))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            warn!(%order_id, product_id = %item.product_id, "product gone, stock not restored");
            outcome.skipped.push(item.product_id);
        } else {
            outcome.restored.push((item.product_id, item.quantity));
        }
    }
    Ok(outcome)
}
