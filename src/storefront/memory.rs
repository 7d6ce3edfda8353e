//! In-process implementation of the remote storefront API.
//!
//! Mirrors the service's cart, coupon and order semantics without a
//! network or database. Useful offline and in tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{Coupon, LineItem, OrderDraft};
use crate::storefront::{
    identity::Identity,
    remote::{AccountCartRecord, ApiError, CartApi, CouponApi, OrderApi},
};

#[derive(Debug, Default)]
struct Tables {
    carts: HashMap<String, Vec<AccountCartRecord>>,
    coupons: HashMap<String, Coupon>,
    redemptions: HashSet<(String, Uuid)>,
    orders: Vec<(Uuid, String, OrderDraft)>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    offline: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`ApiError::Network`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn insert_coupon(&self, mut coupon: Coupon) {
        coupon.code = Coupon::normalize_code(&coupon.code);
        self.tables().coupons.insert(coupon.code.clone(), coupon);
    }

    pub fn coupon(&self, code: &str) -> Option<Coupon> {
        self.tables()
            .coupons
            .get(&Coupon::normalize_code(code))
            .cloned()
    }

    pub fn cart_of(&self, email: &str) -> Vec<LineItem> {
        self.tables()
            .carts
            .get(&email.to_lowercase())
            .map(|records| records.iter().cloned().map(LineItem::from).collect())
            .unwrap_or_default()
    }

    pub fn orders(&self) -> Vec<(Uuid, OrderDraft)> {
        self.tables()
            .orders
            .iter()
            .map(|(id, _, draft)| (*id, draft.clone()))
            .collect()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reachable(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Network("backend offline".to_string()));
        }
        Ok(())
    }
}

fn owner(identity: &Identity) -> String {
    identity.email.to_lowercase()
}

#[async_trait]
impl CartApi for MemoryBackend {
    async fn fetch(&self, identity: &Identity) -> Result<Vec<AccountCartRecord>, ApiError> {
        self.reachable()?;
        Ok(self
            .tables()
            .carts
            .get(&owner(identity))
            .cloned()
            .unwrap_or_default())
    }

    async fn add(&self, identity: &Identity, item: &LineItem) -> Result<Uuid, ApiError> {
        self.reachable()?;
        let email = owner(identity);
        let mut tables = self.tables();
        let cart = tables.carts.entry(email.clone()).or_default();
        let added = i32::try_from(item.quantity).unwrap_or(i32::MAX);
        if let Some(record) = cart.iter_mut().find(|r| r.line_id == item.line_id) {
            record.quantity = record.quantity.saturating_add(added);
            return Ok(record.id);
        }
        let record = AccountCartRecord {
            id: Uuid::new_v4(),
            email,
            line_id: item.line_id.clone(),
            product_id: item.product_id,
            name: item.name.clone(),
            unit_price: item.unit_price,
            image: item.image.clone(),
            variant: item.variant.clone(),
            quantity: added,
        };
        let id = record.id;
        cart.push(record);
        Ok(id)
    }

    async fn set_quantity(
        &self,
        identity: &Identity,
        line_id: &str,
        quantity: u32,
    ) -> Result<(), ApiError> {
        self.reachable()?;
        let mut tables = self.tables();
        let record = tables
            .carts
            .get_mut(&owner(identity))
            .and_then(|cart| cart.iter_mut().find(|r| r.line_id == line_id))
            .ok_or(ApiError::NotFound)?;
        record.quantity = i32::try_from(quantity.max(1)).unwrap_or(i32::MAX);
        Ok(())
    }

    async fn remove(&self, identity: &Identity, line_id: &str) -> Result<(), ApiError> {
        self.reachable()?;
        if let Some(cart) = self.tables().carts.get_mut(&owner(identity)) {
            cart.retain(|r| r.line_id != line_id);
        }
        Ok(())
    }

    async fn clear(&self, identity: &Identity) -> Result<(), ApiError> {
        self.reachable()?;
        self.tables().carts.remove(&owner(identity));
        Ok(())
    }
}

#[async_trait]
impl CouponApi for MemoryBackend {
    async fn fetch(&self, code: &str) -> Result<Option<Coupon>, ApiError> {
        self.reachable()?;
        Ok(self.coupon(code))
    }

    async fn register_usage(
        &self,
        _identity: &Identity,
        code: &str,
        order_id: Uuid,
    ) -> Result<(), ApiError> {
        self.reachable()?;
        let code = Coupon::normalize_code(code);
        let mut tables = self.tables();
        if tables.redemptions.contains(&(code.clone(), order_id)) {
            return Ok(());
        }
        let coupon = tables.coupons.get_mut(&code).ok_or(ApiError::NotFound)?;
        if coupon.used_count >= coupon.usage_limit {
            return Err(ApiError::Status {
                status: 409,
                message: "usage limit reached".to_string(),
            });
        }
        coupon.used_count += 1;
        tables.redemptions.insert((code, order_id));
        Ok(())
    }
}

#[async_trait]
impl OrderApi for MemoryBackend {
    async fn submit(&self, identity: &Identity, order: &OrderDraft) -> Result<Uuid, ApiError> {
        self.reachable()?;
        let id = Uuid::new_v4();
        self.tables()
            .orders
            .push((id, owner(identity), order.clone()));
        Ok(id)
    }
}
