use crate::{
    entities::{
        feedback,
        order::{self, OrderStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FeedbackInput {
    pub order_id: Uuid,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1-2000 characters"))]
    pub comment: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FeedbackUpdate {
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[validate(length(min = 1, max = 2000, message = "Comment must be 1-2000 characters"))]
    pub comment: String,
}

/// Reviews of delivered orders.
#[derive(Clone)]
pub struct FeedbackService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl FeedbackService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input), fields(order_id = %input.order_id))]
    pub async fn create(
        &self,
        user_id: Uuid,
        input: FeedbackInput,
    ) -> Result<feedback::Model, ServiceError> {
        input.validate()?;

        let order = order::Entity::find_by_id(input.order_id)
            .filter(order::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", input.order_id)))?;
        if order.status != OrderStatus::Delivered {
            return Err(ServiceError::ValidationError(
                "Feedback can only be left for delivered orders".into(),
            ));
        }

        let existing = feedback::Entity::find()
            .filter(feedback::Column::UserId.eq(user_id))
            .filter(feedback::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(
                "Feedback already submitted for this order".into(),
            ));
        }

        let now = Utc::now();
        let model = feedback::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            order_id: Set(order.id),
            rating: Set(input.rating),
            comment: Set(input.comment.trim().to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(feedback_id = %model.id, rating = model.rating, "feedback submitted");
        self.event_sender
            .send_or_log(Event::FeedbackSubmitted {
                order_id: model.order_id,
                rating: model.rating,
                at: now,
            })
            .await;
        Ok(model)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<feedback::Model>, ServiceError> {
        Ok(feedback::Entity::find()
            .filter(feedback::Column::UserId.eq(user_id))
            .order_by_desc(feedback::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Delivered orders the user has not reviewed yet.
    pub async fn reviewable_orders(&self, user_id: Uuid) -> Result<Vec<order::Model>, ServiceError> {
        let reviewed: HashSet<Uuid> = self
            .list(user_id)
            .await?
            .into_iter()
            .map(|f| f.order_id)
            .collect();

        Ok(order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Status.eq(OrderStatus::Delivered))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .filter(|o| !reviewed.contains(&o.id))
            .collect())
    }

    pub async fn get(&self, user_id: Uuid, id: Uuid) -> Result<feedback::Model, ServiceError> {
        feedback::Entity::find_by_id(id)
            .filter(feedback::Column::UserId.eq(user_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Feedback {id} not found")))
    }

    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        user_id: Uuid,
        id: Uuid,
        input: FeedbackUpdate,
    ) -> Result<feedback::Model, ServiceError> {
        input.validate()?;
        let existing = self.get(user_id, id).await?;

        let mut model: feedback::ActiveModel = existing.into();
        model.rating = Set(input.rating);
        model.comment = Set(input.comment.trim().to_string());
        Ok(model.update(&*self.db).await?)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<(), ServiceError> {
        let existing = self.get(user_id, id).await?;
        feedback::Entity::delete_by_id(existing.id)
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rating_must_be_one_to_five() {
        let input = |rating| FeedbackInput {
            order_id: Uuid::new_v4(),
            rating,
            comment: "Lovely sponge".into(),
        };
        assert!(input(1).validate().is_ok());
        assert!(input(5).validate().is_ok());
        assert!(input(0).validate().is_err());
        assert!(input(6).validate().is_err());
    }
}
