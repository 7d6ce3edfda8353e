//! Shopper-side cart, pricing and coupon core.
//!
//! [`cart::CartStore`] owns the shopper's line items and switches between the
//! guest and account sources as the identity changes, [`pricing`] turns a
//! cart into a [`PriceBreakdown`](crate::models::PriceBreakdown), and
//! [`coupon::CouponValidator`] decides whether a code is redeemable.
//! [`checkout::Checkout`] ties them together for order placement. Remote
//! collaborators sit behind the traits in [`remote`]; [`client::Client`]
//! wires the whole set from a [`ClientConfig`](crate::config::ClientConfig).

pub mod cart;
pub mod checkout;
pub mod client;
pub mod coupon;
pub mod http;
pub mod identity;
pub mod memory;
pub mod pricing;
pub mod remote;
pub mod storage;
