// Storefront core
pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod orders;
pub mod payments;

// Catalog and customer engagement
pub mod catalog;
pub mod favorites;
pub mod feedback;
