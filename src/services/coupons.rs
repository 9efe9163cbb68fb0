use crate::{
    entities::coupon,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

pub const INVALID_COUPON_MESSAGE: &str = "Invalid or expired coupon code.";

/// Coupon held against a cart session. Only the terms are kept; the discount
/// is recomputed against the current subtotal on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub code: String,
    pub amount: Decimal,
    pub is_percentage: bool,
}

impl From<&coupon::Model> for AppliedDiscount {
    fn from(c: &coupon::Model) -> Self {
        Self {
            code: c.code.clone(),
            amount: c.discount_amount,
            is_percentage: c.is_percentage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pricing {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub grand_total: Decimal,
}

/// Discount for `subtotal`, rounded to cents and clamped to `[0, subtotal]`.
pub fn compute_discount(subtotal: Decimal, amount: Decimal, is_percentage: bool) -> Decimal {
    if subtotal <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let raw = if is_percentage {
        subtotal * amount / Decimal::ONE_HUNDRED
    } else {
        amount
    };
    raw.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        .max(Decimal::ZERO)
        .min(subtotal)
}

pub fn price(subtotal: Decimal, applied: Option<&AppliedDiscount>) -> Pricing {
    let discount = applied
        .map(|d| compute_discount(subtotal, d.amount, d.is_percentage))
        .unwrap_or(Decimal::ZERO);
    Pricing {
        subtotal,
        discount,
        grand_total: (subtotal - discount).max(Decimal::ZERO),
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CouponInput {
    #[validate(length(min = 1, max = 50, message = "Code must be 1-50 characters"))]
    pub code: String,
    pub discount_amount: Decimal,
    #[serde(default)]
    pub is_percentage: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl CouponInput {
    fn check_terms(&self) -> Result<(), ServiceError> {
        self.validate()?;
        if self.code.trim().is_empty() {
            return Err(ServiceError::ValidationError("Code must not be blank".into()));
        }
        if self.discount_amount < Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Discount amount must not be negative".into(),
            ));
        }
        if self.is_percentage && self.discount_amount > Decimal::ONE_HUNDRED {
            return Err(ServiceError::ValidationError(
                "Percentage discount cannot exceed 100".into(),
            ));
        }
        if self.valid_from > self.valid_to {
            return Err(ServiceError::ValidationError(
                "valid_from must not be after valid_to".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Looks up a usable coupon by code, case-insensitively.
    #[instrument(skip(self))]
    pub async fn find_valid(&self, code: &str) -> Result<coupon::Model, ServiceError> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(ServiceError::ValidationError(
                "Coupon code is required".into(),
            ));
        }

        let found = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .filter(coupon::Column::Active.eq(true))
            .one(&*self.db)
            .await?;

        match found {
            Some(c) if c.is_valid_at(Utc::now()) => Ok(c),
            _ => Err(ServiceError::ValidationError(INVALID_COUPON_MESSAGE.into())),
        }
    }

    /// Validates `code` and prices it against `subtotal`.
    pub async fn evaluate(
        &self,
        session_id: &str,
        code: &str,
        subtotal: Decimal,
    ) -> Result<(AppliedDiscount, Pricing), ServiceError> {
        let coupon = self.find_valid(code).await?;
        let applied = AppliedDiscount::from(&coupon);
        let pricing = price(subtotal, Some(&applied));

        self.event_sender
            .send_or_log(Event::CouponApplied {
                session_id: session_id.to_string(),
                code: applied.code.clone(),
                discount: pricing.discount,
            })
            .await;

        Ok((applied, pricing))
    }

    pub async fn list(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .order_by_asc(coupon::Column::Code)
            .all(&*self.db)
            .await?)
    }

    async fn ensure_code_free(&self, code: &str, except: Option<Uuid>) -> Result<(), ServiceError> {
        let mut query = coupon::Entity::find().filter(coupon::Column::Code.eq(code));
        if let Some(id) = except {
            query = query.filter(coupon::Column::Id.ne(id));
        }
        if query.one(&*self.db).await?.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Coupon code {code} already exists"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create(&self, input: CouponInput) -> Result<coupon::Model, ServiceError> {
        input.check_terms()?;
        let code = normalize_code(&input.code);
        self.ensure_code_free(&code, None).await?;

        let model = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code),
            discount_amount: Set(input.discount_amount),
            is_percentage: Set(input.is_percentage),
            valid_from: Set(input.valid_from),
            valid_to: Set(input.valid_to),
            active: Set(input.active),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?;

        info!(coupon_id = %model.id, "coupon created");
        Ok(model)
    }

    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, input: CouponInput) -> Result<coupon::Model, ServiceError> {
        input.check_terms()?;
        let existing = coupon::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {id} not found")))?;

        let code = normalize_code(&input.code);
        self.ensure_code_free(&code, Some(id)).await?;

        let mut model: coupon::ActiveModel = existing.into();
        model.code = Set(code);
        model.discount_amount = Set(input.discount_amount);
        model.is_percentage = Set(input.is_percentage);
        model.valid_from = Set(input.valid_from);
        model.valid_to = Set(input.valid_to);
        model.active = Set(input.active);

        Ok(model.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = coupon::Entity::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Coupon {id} not found")));
        }
        Ok(())
    }
}
