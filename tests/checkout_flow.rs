use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use storefront::{
    models::{Coupon, DiscountType, LineItem, OrderStatus, PaymentMethod, ShippingAddress},
    storefront::{
        cart::{CartSource, CartStore},
        checkout::{Checkout, CheckoutError, CheckoutItems, CouponOutcome},
        coupon::{CouponError, CouponValidator, Rejection},
        identity::Identity,
        memory::MemoryBackend,
        pricing::ShippingTable,
        remote::{ApiError, CouponApi},
        storage::MemoryStorage,
    },
};

struct Shop {
    backend: Arc<MemoryBackend>,
    cart: Arc<CartStore>,
    checkout: Arc<Checkout>,
}

fn shop() -> Shop {
    let backend = Arc::new(MemoryBackend::new());
    shop_with_coupons(backend.clone(), backend)
}

fn shop_with_coupons(backend: Arc<MemoryBackend>, coupons: Arc<dyn CouponApi>) -> Shop {
    let cart = Arc::new(CartStore::new(
        Arc::new(MemoryStorage::new()),
        backend.clone(),
    ));
    let checkout = Arc::new(Checkout::new(
        cart.clone(),
        CouponValidator::new(coupons),
        backend.clone(),
        ShippingTable::default(),
    ));
    Shop {
        backend,
        cart,
        checkout,
    }
}

fn item(name: &str, unit_price: i64) -> LineItem {
    let product_id = Uuid::new_v4();
    LineItem {
        line_id: product_id.to_string(),
        product_id,
        name: name.into(),
        unit_price,
        image: None,
        variant: None,
        quantity: 1,
    }
}

fn coupon(code: &str, discount_type: DiscountType, value: i64, min_purchase: i64) -> Coupon {
    Coupon {
        id: Uuid::new_v4(),
        code: code.into(),
        discount_type,
        discount_value: value,
        min_purchase,
        usage_limit: 100,
        used_count: 0,
        expiry_date: Utc::now() + Duration::days(30),
        is_active: true,
        created_by: None,
    }
}

fn address(district: &str) -> ShippingAddress {
    ShippingAddress {
        name: "Nusrat Jahan".into(),
        phone: "01711000000".into(),
        email: "shopper@example.com".into(),
        district: district.into(),
        thana: "Dhanmondi".into(),
        zip_code: "1209".into(),
        address: "House 12, Road 5".into(),
    }
}

fn shopper() -> Identity {
    Identity::new("shopper@example.com", "token")
}

#[tokio::test]
async fn guest_cart_merges_into_account_and_checks_out_with_coupon() {
    let shop = shop();
    let panjabi = item("Cotton Panjabi", 500);

    shop.cart.add_item(panjabi.clone(), 1).await.unwrap();
    let mutation = shop.cart.add_item(panjabi.clone(), 1).await.unwrap();
    assert_eq!(mutation.snapshot.items.len(), 1);
    assert_eq!(mutation.snapshot.items[0].quantity, 2);

    shop.cart.set_identity(Some(shopper())).await.unwrap();
    assert_eq!(shop.cart.snapshot().source, CartSource::Account);
    assert!(shop.cart.items().is_empty());

    shop.cart.merge_guest_into_account().await.unwrap();
    let remote = shop.backend.cart_of("shopper@example.com");
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].quantity, 2);

    shop.backend
        .insert_coupon(coupon("SAVE10", DiscountType::Percentage, 10, 300));
    let outcome = shop
        .checkout
        .apply_coupon("save10", &CheckoutItems::Cart)
        .await
        .unwrap();
    assert!(matches!(outcome, CouponOutcome::Applied(c) if c.code == "SAVE10"));

    let breakdown = shop.checkout.breakdown(&CheckoutItems::Cart, "Dhaka");
    assert_eq!(breakdown.subtotal, 1000);
    assert_eq!(breakdown.discount, 100);
    assert_eq!(breakdown.shipping_fee, 80);
    assert_eq!(breakdown.grand_total, 980);

    let placed = shop
        .checkout
        .place_order(
            CheckoutItems::Cart,
            address("Dhaka"),
            PaymentMethod::CashOnDelivery,
        )
        .await
        .unwrap();
    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.breakdown.grand_total, 980);
    assert!(placed.warnings.is_empty(), "{:?}", placed.warnings);

    let orders = shop.backend.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].0, placed.order_id);
    assert_eq!(orders[0].1.coupon_code.as_deref(), Some("SAVE10"));
    assert_eq!(shop.backend.coupon("SAVE10").unwrap().used_count, 1);

    assert!(shop.cart.items().is_empty());
    assert!(shop.backend.cart_of("shopper@example.com").is_empty());
    assert!(shop.checkout.applied_coupon().is_none());
}

#[tokio::test]
async fn expired_coupon_is_rejected() {
    let shop = shop();
    shop.cart.add_item(item("Kurti", 1000), 1).await.unwrap();
    let mut expired = coupon("EXPIRED5", DiscountType::Percentage, 5, 0);
    expired.expiry_date = Utc::now() - Duration::days(1);
    shop.backend.insert_coupon(expired);

    let err = shop
        .checkout
        .apply_coupon("EXPIRED5", &CheckoutItems::Cart)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CheckoutError::Coupon(CouponError::Rejected(Rejection::Expired))
    ));
    assert_eq!(err.to_string(), "Invalid or expired coupon");
    assert!(shop.checkout.applied_coupon().is_none());
}

#[tokio::test]
async fn coupon_below_minimum_grants_no_discount() {
    let shop = shop();
    shop.cart.add_item(item("Socks", 200), 1).await.unwrap();
    shop.backend
        .insert_coupon(coupon("SAVE10", DiscountType::Percentage, 10, 300));

    let err = shop
        .checkout
        .apply_coupon("SAVE10", &CheckoutItems::Cart)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::Coupon(CouponError::Rejected(Rejection::BelowMinimum {
            min_purchase: 300
        }))
    ));

    let breakdown = shop.checkout.breakdown(&CheckoutItems::Cart, "Rajshahi");
    assert_eq!(breakdown.discount, 0);
    assert_eq!(breakdown.grand_total, 200 + 120);
}

#[tokio::test]
async fn shipping_fee_depends_on_destination() {
    let shop = shop();
    shop.cart.add_item(item("Wallet", 950), 1).await.unwrap();

    let local = shop.checkout.breakdown(&CheckoutItems::Cart, "Dhaka");
    let local_lowercase = shop.checkout.breakdown(&CheckoutItems::Cart, "dhaka");
    let other = shop.checkout.breakdown(&CheckoutItems::Cart, "Khulna");

    assert_eq!(local.shipping_fee, 80);
    assert_eq!(local_lowercase.shipping_fee, 80);
    assert_eq!(other.shipping_fee, 120);
    assert_eq!(other.grand_total, 950 + 120);
}

#[tokio::test]
async fn removing_absent_line_leaves_cart_unchanged() {
    let shop = shop();
    let wallet = item("Wallet", 950);
    shop.cart.add_item(wallet.clone(), 1).await.unwrap();

    let mutation = shop.cart.remove_item("not-in-cart").await.unwrap();

    assert!(mutation.warning.is_none());
    assert_eq!(mutation.snapshot.items, vec![wallet]);
}

#[tokio::test]
async fn shrinking_cart_below_minimum_drops_the_discount() {
    let shop = shop();
    shop.cart.set_identity(Some(shopper())).await.unwrap();
    let panjabi = item("Cotton Panjabi", 1000);
    shop.cart.add_item(panjabi.clone(), 1).await.unwrap();
    shop.backend
        .insert_coupon(coupon("SAVE10", DiscountType::Percentage, 10, 300));
    shop.checkout
        .apply_coupon("SAVE10", &CheckoutItems::Cart)
        .await
        .unwrap();

    shop.cart.remove_item(&panjabi.line_id).await.unwrap();
    shop.cart.add_item(item("Socks", 200), 1).await.unwrap();

    let breakdown = shop.checkout.breakdown(&CheckoutItems::Cart, "Dhaka");
    assert_eq!(breakdown.discount, 0);

    shop.checkout
        .place_order(
            CheckoutItems::Cart,
            address("Dhaka"),
            PaymentMethod::CashOnDelivery,
        )
        .await
        .unwrap();
    let orders = shop.backend.orders();
    assert_eq!(orders[0].1.coupon_code, None);
    assert_eq!(shop.backend.coupon("SAVE10").unwrap().used_count, 0);
}

#[tokio::test]
async fn buy_now_leaves_cart_alone() {
    let shop = shop();
    shop.cart.set_identity(Some(shopper())).await.unwrap();
    let in_cart = item("Kurti", 1350);
    shop.cart.add_item(in_cart.clone(), 1).await.unwrap();

    let single = item("Kids T-Shirt", 450);
    let placed = shop
        .checkout
        .place_order(
            CheckoutItems::BuyNow(vec![single.clone()]),
            address("Sylhet"),
            PaymentMethod::CashOnDelivery,
        )
        .await
        .unwrap();

    assert_eq!(placed.breakdown.grand_total, 450 + 120);
    assert_eq!(shop.backend.orders()[0].1.items, vec![single]);
    assert_eq!(shop.cart.items(), vec![in_cart.clone()]);
    assert_eq!(shop.backend.cart_of("shopper@example.com"), vec![in_cart]);
}

#[tokio::test]
async fn failed_submission_keeps_cart_for_retry() {
    let shop = shop();
    shop.cart.set_identity(Some(shopper())).await.unwrap();
    let kurti = item("Kurti", 1350);
    shop.cart.add_item(kurti.clone(), 1).await.unwrap();

    shop.backend.set_offline(true);
    let err = shop
        .checkout
        .place_order(
            CheckoutItems::Cart,
            address("Dhaka"),
            PaymentMethod::CashOnDelivery,
        )
        .await
        .unwrap_err();
    shop.backend.set_offline(false);

    assert!(matches!(err, CheckoutError::Submission(ApiError::Network(_))));
    assert_eq!(err.to_string(), "Order processing failed");
    assert_eq!(shop.cart.items(), vec![kurti.clone()]);
    assert_eq!(shop.backend.cart_of("shopper@example.com"), vec![kurti]);
    assert!(shop.backend.orders().is_empty());
}

#[tokio::test]
async fn card_payment_places_paid_order() {
    let shop = shop();
    shop.cart.set_identity(Some(shopper())).await.unwrap();
    shop.cart.add_item(item("Panjabi", 2450), 1).await.unwrap();

    let placed = shop
        .checkout
        .place_order(
            CheckoutItems::Cart,
            address("Chattogram"),
            PaymentMethod::Card {
                transaction_id: "pi_3Nx".into(),
            },
        )
        .await
        .unwrap();

    assert_eq!(placed.status, OrderStatus::Paid);
    assert_eq!(
        shop.backend.orders()[0].1.payment.transaction_id(),
        Some("pi_3Nx")
    );
}

#[tokio::test]
async fn checkout_validates_before_submitting() {
    let shop = shop();
    shop.cart.add_item(item("Panjabi", 2450), 1).await.unwrap();

    let err = shop
        .checkout
        .place_order(
            CheckoutItems::Cart,
            address("Dhaka"),
            PaymentMethod::CashOnDelivery,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::SignInRequired));

    shop.cart.set_identity(Some(shopper())).await.unwrap();
    shop.cart.add_item(item("Panjabi", 2450), 1).await.unwrap();

    let mut incomplete = address("Dhaka");
    incomplete.zip_code.clear();
    let err = shop
        .checkout
        .place_order(CheckoutItems::Cart, incomplete, PaymentMethod::CashOnDelivery)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::MissingField("zip code")));

    let err = shop
        .checkout
        .place_order(
            CheckoutItems::Cart,
            address("Gotham"),
            PaymentMethod::CashOnDelivery,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::UnknownDistrict(d) if d == "Gotham"));

    let err = shop
        .checkout
        .place_order(
            CheckoutItems::Cart,
            address("Dhaka"),
            PaymentMethod::Card {
                transaction_id: String::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentIncomplete));
    assert!(shop.backend.orders().is_empty());
}

/// Coupon lookups that wait for the test to release them.
struct GatedCoupons {
    inner: Arc<MemoryBackend>,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl CouponApi for GatedCoupons {
    async fn fetch(&self, code: &str) -> Result<Option<Coupon>, ApiError> {
        self.entered.notify_one();
        self.release.notified().await;
        CouponApi::fetch(self.inner.as_ref(), code).await
    }

    async fn register_usage(
        &self,
        identity: &Identity,
        code: &str,
        order_id: Uuid,
    ) -> Result<(), ApiError> {
        self.inner.register_usage(identity, code, order_id).await
    }
}

#[tokio::test]
async fn validation_for_an_old_code_is_discarded() {
    let backend = Arc::new(MemoryBackend::new());
    backend.insert_coupon(coupon("SAVE10", DiscountType::Percentage, 10, 0));
    let gated = Arc::new(GatedCoupons {
        inner: backend.clone(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let shop = shop_with_coupons(backend, gated.clone());
    shop.cart.add_item(item("Kurti", 1350), 1).await.unwrap();

    let checkout = shop.checkout.clone();
    let pending = tokio::spawn(async move {
        checkout
            .apply_coupon("SAVE10", &CheckoutItems::Cart)
            .await
    });

    gated.entered.notified().await;
    shop.checkout.set_coupon_input("WELCOME");
    gated.release.notify_one();

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, CouponOutcome::Superseded);
    assert!(shop.checkout.applied_coupon().is_none());
}
