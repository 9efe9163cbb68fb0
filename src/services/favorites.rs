use crate::{
    entities::{favorite, product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct FavoriteProduct {
    pub favorited_at: chrono::DateTime<Utc>,
    pub product: product::Model,
}

#[derive(Clone)]
pub struct FavoritesService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl FavoritesService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds or removes a favorite. Returns whether the product is now a favorite.
    #[instrument(skip(self))]
    pub async fn toggle(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, ServiceError> {
        if product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!(
                "Product {product_id} not found"
            )));
        }

        let existing = favorite::Entity::find()
            .filter(favorite::Column::UserId.eq(user_id))
            .filter(favorite::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        let favorited = match existing {
            Some(row) => {
                favorite::Entity::delete_by_id(row.id)
                    .exec(&*self.db)
                    .await?;
                false
            }
            None => {
                favorite::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(user_id),
                    product_id: Set(product_id),
                    created_at: Set(Utc::now()),
                }
                .insert(&*self.db)
                .await?;
                true
            }
        };

        self.event_sender
            .send_or_log(Event::FavoriteToggled {
                user_id,
                product_id,
                favorited,
            })
            .await;
        Ok(favorited)
    }

    /// The user's favorites, newest first.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<FavoriteProduct>, ServiceError> {
        let rows = favorite::Entity::find()
            .filter(favorite::Column::UserId.eq(user_id))
            .order_by_desc(favorite::Column::CreatedAt)
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|(fav, product)| {
                product.map(|product| FavoriteProduct {
                    favorited_at: fav.created_at,
                    product,
                })
            })
            .collect())
    }
}
