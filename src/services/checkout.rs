use crate::{
    auth::AuthenticatedUser,
    config::AppConfig,
    entities::{
        coupon,
        order::{self, OrderStatus, PaymentStatus},
        order_item, product,
    },
    errors::ServiceError,
    events::{Event, EventSender, LOW_STOCK_WARNING_LEVEL},
    services::{
        cart::{CartService, CartSummary},
        coupons::{self, normalize_code, AppliedDiscount, Pricing, INVALID_COUPON_MESSAGE},
        payments::{to_minor_units, PaymentGateway, PaymentSessionRequest},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Input to [`CheckoutService::place_order`].
#[derive(Debug, Clone)]
pub struct PlaceOrder<'a> {
    pub session_id: &'a str,
    pub user: &'a AuthenticatedUser,
    pub delivery_address: &'a str,
    pub applied_discount: Option<AppliedDiscount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order_id: Uuid,
    pub payment_session_id: String,
    pub redirect_url: String,
    pub total: Decimal,
}

/// Turns a session cart into an order and a hosted payment session.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    config: Arc<AppConfig>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            config,
        }
    }

    /// The summary a customer confirms before paying.
    pub async fn preview(
        &self,
        session_id: &str,
        applied: Option<&AppliedDiscount>,
    ) -> Result<CartSummary, ServiceError> {
        let cart = CartService::load_in(&*self.db, session_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::ValidationError("Your cart is empty".into()));
        }
        Ok(cart.summary(applied))
    }

    /// Places the order in a single transaction:
    /// lock products, check stock, create the order, decrement stock, open a
    /// payment session, then clear the cart. Any failure, including the
    /// payment provider's, leaves no order and no stock change behind.
    #[instrument(skip(self, request), fields(session_id = %request.session_id, user_id = %request.user.id))]
    pub async fn place_order(
        &self,
        request: PlaceOrder<'_>,
    ) -> Result<CheckoutOutcome, ServiceError> {
        let delivery_address = request.delivery_address.trim();
        if delivery_address.is_empty() {
            return Err(ServiceError::ValidationError(
                "Delivery address is required".into(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = CartService::load_in(&txn, request.session_id).await?;
        if cart.is_empty() {
            return Err(ServiceError::ValidationError("Your cart is empty".into()));
        }

        // Lock in a stable order so concurrent checkouts cannot deadlock.
        let mut lines = cart.lines.clone();
        lines.sort_by_key(|l| l.product_id);
        let mut locked = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = product::Entity::find_by_id(line.product_id)
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::InsufficientStock {
                    product: line.product_name.clone(),
                    available: 0,
                })?;
            if product.stock < line.quantity {
                return Err(ServiceError::InsufficientStock {
                    product: product.name,
                    available: product.stock,
                });
            }
            locked.push(product);
        }

        let applied = match &request.applied_discount {
            Some(d) => Some(revalidate_discount(&txn, d).await?),
            None => None,
        };
        let Pricing { grand_total, .. } = coupons::price(cart.total(), applied.as_ref());

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(request.user.id),
            customer_email: Set(request.user.email.clone()),
            total_amount: Set(grand_total),
            status: Set(OrderStatus::Pending),
            payment_status: Set(PaymentStatus::Pending),
            delivery_address: Set(delivery_address.to_string()),
            payment_session_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        order_item::Entity::insert_many(lines.iter().map(|line| order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(line.product_id),
            product_name: Set(line.product_name.clone()),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
        }))
        .exec_without_returning(&txn)
        .await?;

        for (line, product) in lines.iter().zip(&locked) {
            decrement_stock(&txn, product, line.quantity).await?;
        }

        let payment_request = PaymentSessionRequest {
            order_id,
            amount_minor: to_minor_units(grand_total)?,
            currency: self.config.payment.currency.clone(),
            description: format!("Bakery order {}", &order_id.simple().to_string()[..8]),
            customer_email: request.user.email.clone(),
            success_url: self.config.payment_success_url(order_id),
            cancel_url: self.config.payment_cancel_url(order_id),
            allowed_countries: self.config.payment.allowed_countries.clone(),
        };

        let session = match self.gateway.create_session(payment_request).await {
            Ok(session) => session,
            Err(e) => {
                warn!(%order_id, error = %e, "payment session failed, rolling back checkout");
                if let Err(rollback) = txn.rollback().await {
                    error!(error = %rollback, "rollback after payment failure failed");
                }
                return Err(e.into());
            }
        };

        let mut order: order::ActiveModel = order.into();
        order.payment_session_id = Set(Some(session.id.clone()));
        order.update(&txn).await?;

        CartService::clear_in(&txn, request.session_id).await?;

        txn.commit().await.map_err(|e| {
            error!(%order_id, payment_session_id = %session.id, error = %e, "checkout commit failed after payment session was opened");
            ServiceError::DatabaseError(e)
        })?;

        info!(%order_id, total = %grand_total, "order placed");
        self.emit_placed(order_id, request, grand_total, &lines, &locked)
            .await;

        Ok(CheckoutOutcome {
            order_id,
            payment_session_id: session.id,
            redirect_url: session.redirect_url,
            total: grand_total,
        })
    }

    async fn emit_placed(
        &self,
        order_id: Uuid,
        request: PlaceOrder<'_>,
        total: Decimal,
        lines: &[crate::services::cart::CartLine],
        locked: &[product::Model],
    ) {
        self.event_sender
            .send_or_log(Event::OrderCreated {
                order_id,
                user_id: request.user.id,
                total,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CartCleared(request.session_id.to_string()))
            .await;
        for (line, product) in lines.iter().zip(locked) {
            let remaining = product.stock - line.quantity;
            if remaining <= LOW_STOCK_WARNING_LEVEL {
                self.event_sender
                    .send_or_log(Event::LowStock {
                        product_id: product.id,
                        remaining,
                    })
                    .await;
            }
        }
    }
}

/// The coupon must still be usable when the order is placed.
async fn revalidate_discount(
    txn: &DatabaseTransaction,
    applied: &AppliedDiscount,
) -> Result<AppliedDiscount, ServiceError> {
    let current = coupon::Entity::find()
        .filter(coupon::Column::Code.eq(normalize_code(&applied.code)))
        .filter(coupon::Column::Active.eq(true))
        .one(txn)
        .await?;

    match current {
        Some(c) if c.is_valid_at(Utc::now()) => Ok(AppliedDiscount::from(&c)),
        _ => Err(ServiceError::ValidationError(INVALID_COUPON_MESSAGE.into())),
    }
}

/// Guarded decrement. The row is already locked where the backend supports
/// it; the `stock >= quantity` predicate keeps stock non-negative where it
/// does not.
async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    product: &product::Model,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product::Column::Id.eq(product.id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let available = product::Entity::find_by_id(product.id)
            .one(conn)
            .await?
            .map(|p| p.stock)
            .unwrap_or(0);
        return Err(ServiceError::InsufficientStock {
            product: product.name.clone(),
            available,
        });
    }
    Ok(())
}
