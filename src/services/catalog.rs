use crate::{
    entities::{cart_item, favorite, product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProductInput {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(length(min = 1, max = 50))]
    #[serde(default = "default_category")]
    pub category: String,
    #[validate(length(min = 1, max = 50))]
    #[serde(default = "default_size")]
    pub size: String,
    #[validate(custom = "non_negative_price")]
    pub price: Decimal,
    #[validate(range(min = 0, message = "Stock must not be negative"))]
    pub stock: i32,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_category() -> String {
    "Birthday".to_string()
}

fn default_size() -> String {
    "6-inch".to_string()
}

fn default_available() -> bool {
    true
}

fn non_negative_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() && !price.is_zero() {
        return Err(ValidationError::new("price_negative"));
    }
    Ok(())
}

/// Product catalog reads and admin maintenance.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Storefront listing: available products that still have stock.
    pub async fn list_available(&self) -> Result<Vec<product::Model>, ServiceError> {
        Ok(product::Entity::find()
            .filter(product::Column::Available.eq(true))
            .filter(product::Column::Stock.gt(0))
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?)
    }

    pub async fn list_all(&self) -> Result<Vec<product::Model>, ServiceError> {
        Ok(product::Entity::find()
            .order_by_asc(product::Column::Name)
            .all(&*self.db)
            .await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {id} not found")))
    }

    /// Available products whose stock has dropped below `threshold`.
    pub async fn low_stock(&self, threshold: i32) -> Result<Vec<product::Model>, ServiceError> {
        Ok(product::Entity::find()
            .filter(product::Column::Available.eq(true))
            .filter(product::Column::Stock.lt(threshold))
            .order_by_asc(product::Column::Stock)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: ProductInput) -> Result<product::Model, ServiceError> {
        input.validate()?;

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            description: Set(input.description),
            category: Set(input.category),
            size: Set(input.size),
            price: Set(input.price),
            stock: Set(input.stock),
            available: Set(input.available),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        self.event_sender
            .send_or_log(Event::ProductCreated(model.id))
            .await;
        info!(product_id = %model.id, "product created");
        Ok(model)
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, input: ProductInput) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(id).await?;

        let mut model: product::ActiveModel = existing.into();
        model.name = Set(input.name.trim().to_string());
        model.description = Set(input.description);
        model.category = Set(input.category);
        model.size = Set(input.size);
        model.price = Set(input.price);
        model.stock = Set(input.stock);
        model.available = Set(input.available);
        let updated = model.update(&*self.db).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(id))
            .await;
        Ok(updated)
    }

    /// Deletes a product together with the cart lines and favorites that
    /// point at it. Order lines keep their snapshot.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        favorite::Entity::delete_many()
            .filter(favorite::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        let result = product::Entity::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Product {id} not found")));
        }

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductDeleted(id))
            .await;
        info!(product_id = %id, "product deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn input() -> ProductInput {
        ProductInput {
            name: "Red Velvet".into(),
            description: None,
            category: default_category(),
            size: default_size(),
            price: dec!(320.00),
            stock: 4,
            available: true,
        }
    }

    #[test]
    fn product_input_validation() {
        assert!(input().validate().is_ok());
        assert!(ProductInput { price: dec!(-0.01), ..input() }.validate().is_err());
        assert!(ProductInput { stock: -1, ..input() }.validate().is_err());
        assert!(ProductInput { name: String::new(), ..input() }.validate().is_err());
    }

    #[test]
    fn product_input_defaults() {
        let parsed: ProductInput =
            serde_json::from_str(r#"{"name":"Lemon","price":"99.50","stock":2}"#).unwrap();
        assert_eq!(parsed.category, "Birthday");
        assert_eq!(parsed.size, "6-inch");
        assert!(parsed.available);
    }
}
