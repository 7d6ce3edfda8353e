//! Boundaries to the remote storefront API.
//!
//! Every call returns a typed [`ApiError`] instead of panicking or bubbling
//! transport errors, so callers can turn failures into user-facing messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Coupon, LineItem, OrderDraft};
use crate::storefront::identity::Identity;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("not found")]
    NotFound,
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("decode error: {0}")]
    Decode(String),
}

/// Cart line as stored by the account cart API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct AccountCartRecord {
    pub id: Uuid,
    pub email: String,
    pub line_id: String,
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub image: Option<String>,
    pub variant: Option<String>,
    pub quantity: i32,
}

impl From<AccountCartRecord> for LineItem {
    fn from(record: AccountCartRecord) -> Self {
        LineItem {
            line_id: record.line_id,
            product_id: record.product_id,
            name: record.name,
            unit_price: record.unit_price,
            image: record.image,
            variant: record.variant,
            quantity: u32::try_from(record.quantity).unwrap_or(0).max(1),
        }
    }
}

#[async_trait]
pub trait CartApi: Send + Sync {
    async fn fetch(&self, identity: &Identity) -> Result<Vec<AccountCartRecord>, ApiError>;

    /// Adds `item.quantity` units of the line, merging with an existing line.
    /// Returns the record id.
    async fn add(&self, identity: &Identity, item: &LineItem) -> Result<Uuid, ApiError>;

    async fn set_quantity(
        &self,
        identity: &Identity,
        line_id: &str,
        quantity: u32,
    ) -> Result<(), ApiError>;

    async fn remove(&self, identity: &Identity, line_id: &str) -> Result<(), ApiError>;

    async fn clear(&self, identity: &Identity) -> Result<(), ApiError>;
}

#[async_trait]
pub trait CouponApi: Send + Sync {
    /// Looks up a coupon by its normalized code; `Ok(None)` when unknown.
    async fn fetch(&self, code: &str) -> Result<Option<Coupon>, ApiError>;

    async fn register_usage(
        &self,
        identity: &Identity,
        code: &str,
        order_id: Uuid,
    ) -> Result<(), ApiError>;
}

#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Persists the order and returns the created order id.
    async fn submit(&self, identity: &Identity, order: &OrderDraft) -> Result<Uuid, ApiError>;
}
