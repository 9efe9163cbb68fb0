pub mod carts;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod favorites;
pub mod feedback;
pub mod orders;
pub mod payment_webhooks;
pub mod products;

use crate::{
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    services::{
        cart::CartService, catalog::CatalogService, checkout::CheckoutService,
        coupons::CouponService, favorites::FavoritesService, feedback::FeedbackService,
        orders::OrderService, payments::PaymentGateway,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub favorites: Arc<FavoritesService>,
    pub feedback: Arc<FeedbackService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            catalog: Arc::new(CatalogService::new(db_pool.clone(), event_sender.clone())),
            cart: Arc::new(CartService::new(db_pool.clone(), event_sender.clone())),
            coupons: Arc::new(CouponService::new(db_pool.clone(), event_sender.clone())),
            checkout: Arc::new(CheckoutService::new(
                db_pool.clone(),
                event_sender.clone(),
                gateway,
                config,
            )),
            orders: Arc::new(OrderService::new(db_pool.clone(), event_sender.clone())),
            favorites: Arc::new(FavoritesService::new(db_pool.clone(), event_sender.clone())),
            feedback: Arc::new(FeedbackService::new(db_pool, event_sender)),
        }
    }
}
