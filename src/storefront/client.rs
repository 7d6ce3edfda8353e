//! Shopper-side stack wired from a [`ClientConfig`].

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::storefront::{
    cart::CartStore,
    checkout::Checkout,
    coupon::CouponValidator,
    http::StorefrontClient,
    identity::IdentityProvider,
    pricing::ShippingTable,
    remote::{ApiError, CartApi, CouponApi, OrderApi},
    storage::{FileStorage, GuestStorage},
};

pub struct Client {
    cart: Arc<CartStore>,
    checkout: Checkout,
}

impl Client {
    /// Guest cart in `data_dir` (bounded by `storage_quota`), remote calls
    /// over HTTP, and shipping fees from the config.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        let api = Arc::new(StorefrontClient::new(config)?);
        let mut storage = FileStorage::new(&config.data_dir);
        if let Some(quota) = config.storage_quota {
            storage = storage.with_quota(quota);
        }
        tracing::debug!(
            api_url = %config.api_url,
            guest_cart = %storage.path().display(),
            "storefront client configured"
        );
        Ok(Self::with_parts(
            Arc::new(storage),
            api.clone(),
            api.clone(),
            api,
            config.shipping.clone(),
        ))
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let config = ClientConfig::from_env()?;
        Ok(Self::from_config(&config)?)
    }

    pub fn with_parts(
        storage: Arc<dyn GuestStorage>,
        carts: Arc<dyn CartApi>,
        coupons: Arc<dyn CouponApi>,
        orders: Arc<dyn OrderApi>,
        shipping: ShippingTable,
    ) -> Self {
        let cart = Arc::new(CartStore::new(storage, carts));
        let checkout = Checkout::new(cart.clone(), CouponValidator::new(coupons), orders, shipping);
        Self { cart, checkout }
    }

    pub fn cart(&self) -> &Arc<CartStore> {
        &self.cart
    }

    pub fn checkout(&self) -> &Checkout {
        &self.checkout
    }

    /// Keeps the cart's active source in step with `identity`.
    pub fn follow(&self, identity: &IdentityProvider) -> JoinHandle<()> {
        self.cart.clone().watch_identity(identity.on_auth_state_change())
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::LineItem;
    use crate::storefront::{cart::CartWarning, checkout::CheckoutItems};

    fn item(unit_price: i64) -> LineItem {
        let product_id = Uuid::new_v4();
        LineItem {
            line_id: product_id.to_string(),
            product_id,
            name: "Cotton Panjabi".into(),
            unit_price,
            image: None,
            variant: None,
            quantity: 1,
        }
    }

    fn config(dir: &std::path::Path) -> ClientConfig {
        let mut config = ClientConfig::new("http://localhost:3000/api");
        config.data_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn guest_cart_survives_a_new_client() {
        let dir = tempfile::tempdir().unwrap();
        let a = item(500);

        let client = Client::from_config(&config(dir.path())).unwrap();
        let mutation = client.cart().add_item(a.clone(), 2).await.unwrap();
        assert!(mutation.warning.is_none());

        let reopened = Client::from_config(&config(dir.path())).unwrap();
        assert_eq!(reopened.cart().items()[0].quantity, 2);
        assert_eq!(reopened.cart().items()[0].line_id, a.line_id);
    }

    #[tokio::test]
    async fn storage_quota_comes_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.storage_quota = Some(16);

        let client = Client::from_config(&config).unwrap();
        let mutation = client.cart().add_item(item(500), 1).await.unwrap();

        assert!(matches!(mutation.warning, Some(CartWarning::NotPersisted(_))));
        assert_eq!(client.cart().items().len(), 1);
    }

    #[tokio::test]
    async fn checkout_uses_configured_shipping() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.shipping = ShippingTable {
            local_region: "Chattogram".into(),
            local_fee: 60,
            other_fee: 150,
        };

        let client = Client::from_config(&config).unwrap();
        client.cart().add_item(item(400), 1).await.unwrap();

        let local = client.checkout().breakdown(&CheckoutItems::Cart, "Chattogram");
        let other = client.checkout().breakdown(&CheckoutItems::Cart, "Dhaka");
        assert_eq!(local.shipping_fee, 60);
        assert_eq!(local.grand_total, 460);
        assert_eq!(other.shipping_fee, 150);
    }

    #[test]
    fn invalid_api_url_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.api_url = "not a url".into();
        assert!(Client::from_config(&config).is_err());
    }
}
