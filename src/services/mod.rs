pub mod admin_service;
pub mod cart_service;
pub mod coupon_service;
pub mod order_service;
pub mod product_service;
pub mod user_service;
