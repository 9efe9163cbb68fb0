use crate::{
    entities::{cart_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::coupons::{self, AppliedDiscount},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

/// One product in a cart. Name and price are captured when the product is
/// first added and do not follow later catalog edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl CartLine {
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

impl From<cart_item::Model> for CartLine {
    fn from(row: cart_item::Model) -> Self {
        Self {
            product_id: row.product_id,
            product_name: row.product_name,
            unit_price: row.unit_price,
            quantity: row.quantity,
        }
    }
}

/// A session's cart lines, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub session_id: String,
    pub lines: Vec<CartLine>,
}

impl Cart {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            lines: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, product_id: Uuid) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.product_id == product_id)
    }

    /// Adds `quantity` units of `product`, merging with an existing line.
    pub fn add(&mut self, product: &product::Model, quantity: i32) -> Result<(), ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "Quantity must be at least 1".into(),
            ));
        }
        if !product.is_purchasable() {
            return Err(ServiceError::ValidationError(format!(
                "{} is not available",
                product.name
            )));
        }

        let existing = self.line(product.id).map(|l| l.quantity).unwrap_or(0);
        let wanted = existing.saturating_add(quantity);
        if wanted > product.stock {
            return Err(ServiceError::InsufficientStock {
                product: product.name.clone(),
                available: product.stock,
            });
        }

        match self.lines.iter_mut().find(|l| l.product_id == product.id) {
            Some(line) => line.quantity = wanted,
            None => self.lines.push(CartLine {
                product_id: product.id,
                product_name: product.name.clone(),
                unit_price: product.price,
                quantity,
            }),
        }
        Ok(())
    }

    /// Sets a line's quantity; zero or less removes the line. `available` is
    /// the product's current stock.
    pub fn update(
        &mut self,
        product_id: Uuid,
        quantity: i32,
        available: i32,
    ) -> Result<(), ServiceError> {
        let idx = self
            .lines
            .iter()
            .position(|l| l.product_id == product_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} is not in the cart")))?;

        if quantity <= 0 {
            self.lines.remove(idx);
            return Ok(());
        }
        if quantity > available {
            return Err(ServiceError::InsufficientStock {
                product: self.lines[idx].product_name.clone(),
                available,
            });
        }
        self.lines[idx].quantity = quantity;
        Ok(())
    }

    /// Removes a line if present.
    pub fn remove(&mut self, product_id: Uuid) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        before != self.lines.len()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn total(&self) -> Decimal {
        self.lines.iter().map(CartLine::subtotal).sum()
    }

    pub fn item_count(&self) -> i32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    pub fn summary(&self, applied: Option<&AppliedDiscount>) -> CartSummary {
        let pricing = coupons::price(self.total(), applied);
        CartSummary {
            session_id: self.session_id.clone(),
            lines: self
                .lines
                .iter()
                .map(|l| CartLineSummary {
                    subtotal: l.subtotal(),
                    line: l.clone(),
                })
                .collect(),
            subtotal: pricing.subtotal,
            applied_coupon: applied.map(|d| d.code.clone()),
            discount: pricing.discount,
            grand_total: pricing.grand_total,
            item_count: self.item_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLineSummary {
    #[serde(flatten)]
    pub line: CartLine,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartSummary {
    pub session_id: String,
    pub lines: Vec<CartLineSummary>,
    pub subtotal: Decimal,
    pub applied_coupon: Option<String>,
    pub discount: Decimal,
    pub grand_total: Decimal,
    pub item_count: i32,
}

/// Loads and persists session carts.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    pub async fn load(&self, session_id: &str) -> Result<Cart, ServiceError> {
        Self::load_in(&*self.db, session_id).await
    }

    pub async fn load_in<C: ConnectionTrait>(conn: &C, session_id: &str) -> Result<Cart, ServiceError> {
        let rows = cart_item::Entity::find()
            .filter(cart_item::Column::SessionId.eq(session_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .order_by_asc(cart_item::Column::ProductName)
            .all(conn)
            .await?;

        Ok(Cart {
            session_id: session_id.to_string(),
            lines: rows.into_iter().map(CartLine::from).collect(),
        })
    }

    /// Makes the stored rows match `cart`: present lines are upserted and
    /// absent ones deleted, all in one transaction.
    #[instrument(skip(self, cart), fields(session_id = %cart.session_id, lines = cart.lines.len()))]
    pub async fn save(&self, cart: &Cart) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let mut stored: HashMap<Uuid, cart_item::Model> = cart_item::Entity::find()
            .filter(cart_item::Column::SessionId.eq(cart.session_id.as_str()))
            .all(&txn)
            .await?
            .into_iter()
            .map(|row| (row.product_id, row))
            .collect();

        let now = Utc::now();
        for line in &cart.lines {
            match stored.remove(&line.product_id) {
                Some(row) if row.quantity == line.quantity => {}
                Some(row) => {
                    let mut active: cart_item::ActiveModel = row.into();
                    active.quantity = Set(line.quantity);
                    active.updated_at = Set(now);
                    active.update(&txn).await?;
                }
                None => {
                    cart_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        session_id: Set(cart.session_id.clone()),
                        product_id: Set(line.product_id),
                        product_name: Set(line.product_name.clone()),
                        unit_price: Set(line.unit_price),
                        quantity: Set(line.quantity),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
        }

        let stale: Vec<Uuid> = stored.into_values().map(|row| row.id).collect();
        if !stale.is_empty() {
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::Id.is_in(stale))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        debug!("cart saved");
        Ok(())
    }

    async fn find_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} not found")))
    }

    async fn persist(&self, cart: &Cart) -> Result<(), ServiceError> {
        self.save(cart).await?;
        self.event_sender
            .send_or_log(Event::CartUpdated {
                session_id: cart.session_id.clone(),
                item_count: cart.item_count(),
            })
            .await;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        session_id: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Cart, ServiceError> {
        let product = self.find_product(product_id).await?;
        let mut cart = self.load(session_id).await?;
        cart.add(&product, quantity)?;
        self.persist(&cart).await?;
        Ok(cart)
    }

    #[instrument(skip(self))]
    pub async fn update_item(
        &self,
        session_id: &str,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<Cart, ServiceError> {
        let mut cart = self.load(session_id).await?;
        let available = if quantity > 0 && cart.line(product_id).is_some() {
            self.find_product(product_id).await?.stock
        } else {
            0
        };
        cart.update(product_id, quantity, available)?;
        self.persist(&cart).await?;
        Ok(cart)
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, session_id: &str, product_id: Uuid) -> Result<Cart, ServiceError> {
        let mut cart = self.load(session_id).await?;
        if cart.remove(product_id) {
            self.persist(&cart).await?;
        }
        Ok(cart)
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, session_id: &str) -> Result<(), ServiceError> {
        Self::clear_in(&*self.db, session_id).await?;
        self.event_sender
            .send_or_log(Event::CartCleared(session_id.to_string()))
            .await;
        Ok(())
    }

    pub async fn clear_in<C: ConnectionTrait>(conn: &C, session_id: &str) -> Result<(), ServiceError> {
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::SessionId.eq(session_id))
            .exec(conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn cake(name: &str, price: Decimal, stock: i32) -> product::Model {
        let now = Utc::now();
        product::Model {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            category: "Birthday".into(),
            size: "6-inch".into(),
            price,
            stock,
            available: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn adding_twice_merges_into_one_line() {
        let p = cake("Carrot", dec!(10.00), 10);
        let mut cart = Cart::new("s");
        cart.add(&p, 2).unwrap();
        cart.add(&p, 3).unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].quantity, 5);
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn total_uses_captured_price() {
        let mut p = cake("Carrot", dec!(10.00), 10);
        let mut cart = Cart::new("s");
        cart.add(&p, 2).unwrap();
        p.price = dec!(99.00);
        assert_eq!(cart.total(), dec!(20.00));
        cart.add(&p, 1).unwrap();
        assert_eq!(cart.total(), dec!(30.00));
    }

    #[test]
    fn add_rejects_bad_quantity_and_unavailable_products() {
        let mut cart = Cart::new("s");
        let p = cake("Carrot", dec!(10.00), 3);
        assert_matches!(cart.add(&p, 0), Err(ServiceError::ValidationError(_)));

        let hidden = product::Model { available: false, ..cake("Hidden", dec!(1), 5) };
        assert_matches!(cart.add(&hidden, 1), Err(ServiceError::ValidationError(_)));

        let sold_out = cake("Sold out", dec!(1), 0);
        assert_matches!(cart.add(&sold_out, 1), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn add_checks_resulting_quantity_against_stock() {
        let p = cake("Carrot", dec!(10.00), 3);
        let mut cart = Cart::new("s");
        cart.add(&p, 2).unwrap();
        assert_matches!(
            cart.add(&p, 2),
            Err(ServiceError::InsufficientStock { available: 3, .. })
        );
        assert_eq!(cart.lines[0].quantity, 2);
    }

    #[test]
    fn update_sets_removes_and_reports_missing() {
        let p = cake("Carrot", dec!(10.00), 5);
        let mut cart = Cart::new("s");
        cart.add(&p, 1).unwrap();

        cart.update(p.id, 4, p.stock).unwrap();
        assert_eq!(cart.lines[0].quantity, 4);

        assert_matches!(
            cart.update(p.id, 6, p.stock),
            Err(ServiceError::InsufficientStock { .. })
        );

        cart.update(p.id, 0, p.stock).unwrap();
        assert!(cart.is_empty());

        assert_matches!(cart.update(p.id, 1, p.stock), Err(ServiceError::NotFound(_)));
    }

    #[test]
    fn remove_is_idempotent() {
        let p = cake("Carrot", dec!(10.00), 5);
        let mut cart = Cart::new("s");
        cart.add(&p, 1).unwrap();
        assert!(cart.remove(p.id));
        assert!(!cart.remove(p.id));
    }

    #[test]
    fn summary_applies_coupon_to_subtotal() {
        let a = cake("A", dec!(100.00), 5);
        let b = cake("B", dec!(50.00), 1);
        let mut cart = Cart::new("s");
        cart.add(&a, 2).unwrap();
        cart.add(&b, 1).unwrap();

        let applied = AppliedDiscount {
            code: "SAVE10".into(),
            amount: dec!(10),
            is_percentage: true,
        };
        let summary = cart.summary(Some(&applied));
        assert_eq!(summary.subtotal, dec!(250.00));
        assert_eq!(summary.discount, dec!(25.00));
        assert_eq!(summary.grand_total, dec!(225.00));
        assert_eq!(summary.applied_coupon.as_deref(), Some("SAVE10"));
        assert_eq!(summary.item_count, 3);
    }
}
