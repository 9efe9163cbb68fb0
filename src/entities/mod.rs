pub mod cart_item;
pub mod coupon;
pub mod favorite;
pub mod feedback;
pub mod order;
pub mod order_item;
pub mod product;

pub use order::{OrderStatus, PaymentStatus};
