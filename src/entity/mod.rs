pub mod coupon_redemptions;
pub mod coupons;
pub mod order_items;
pub mod orders;
pub mod products;
pub mod users;

pub use coupon_redemptions::Entity as CouponRedemptions;
pub use coupons::Entity as Coupons;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use users::Entity as Users;
