//! Checkout: coupon application, price breakdown and order placement.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    Coupon, LineItem, OrderDraft, OrderStatus, PaymentMethod, PriceBreakdown, ShippingAddress,
};
use crate::storefront::{
    cart::{CartError, CartStore, CartWarning},
    coupon::{CouponError, CouponValidator, check_eligibility},
    pricing::{self, ShippingTable},
    remote::{ApiError, OrderApi},
};

/// What is being checked out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutItems {
    /// The shopper's current cart; it is cleared after a successful order.
    Cart,
    /// A single "buy now" selection; the cart is left alone.
    BuyNow(Vec<LineItem>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponOutcome {
    Applied(Coupon),
    /// The shopper changed the code while this validation was in flight.
    Superseded,
}

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
    #[error("Please sign in to place an order")]
    SignInRequired,
    #[error("Please fill in the {0}")]
    MissingField(&'static str),
    #[error("Please choose a valid district")]
    UnknownDistrict(String),
    #[error("Please complete your card details")]
    PaymentIncomplete,
    #[error("Your cart is empty")]
    EmptyCart,
    #[error("{0}")]
    Coupon(#[from] CouponError),
    #[error("Order processing failed")]
    Submission(#[source] ApiError),
}

/// Follow-up steps that failed after the order itself was stored.
#[derive(Debug, thiserror::Error)]
pub enum CheckoutWarning {
    #[error("Your order was placed but the coupon could not be recorded")]
    CouponNotRecorded(#[source] CouponError),
    #[error("Your order was placed but the cart could not be cleared")]
    CartNotCleared(#[source] CartError),
    #[error("{0}")]
    Cart(#[from] CartWarning),
}

#[derive(Debug)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub breakdown: PriceBreakdown,
    pub warnings: Vec<CheckoutWarning>,
}

#[derive(Debug, Default)]
struct CouponState {
    input: String,
    generation: u64,
    applied: Option<Coupon>,
}

pub struct Checkout {
    cart: Arc<CartStore>,
    coupons: CouponValidator,
    orders: Arc<dyn OrderApi>,
    shipping: ShippingTable,
    coupon: Mutex<CouponState>,
}

impl Checkout {
    pub fn new(
        cart: Arc<CartStore>,
        coupons: CouponValidator,
        orders: Arc<dyn OrderApi>,
        shipping: ShippingTable,
    ) -> Self {
        Self {
            cart,
            coupons,
            orders,
            shipping,
            coupon: Mutex::new(CouponState::default()),
        }
    }

    pub fn applied_coupon(&self) -> Option<Coupon> {
        self.coupon_state().applied.clone()
    }

    /// Records what the shopper typed. Any validation started for a
    /// different code is discarded when it resolves.
    pub fn set_coupon_input(&self, code: &str) {
        let code = Coupon::normalize_code(code);
        let mut state = self.coupon_state();
        if state.input != code {
            state.input = code;
            state.generation += 1;
        }
    }

    pub async fn apply_coupon(
        &self,
        code: &str,
        items: &CheckoutItems,
    ) -> Result<CouponOutcome, CheckoutError> {
        let code = Coupon::normalize_code(code);
        let generation = {
            let mut state = self.coupon_state();
            state.input = code.clone();
            state.generation += 1;
            state.generation
        };
        let subtotal = pricing::subtotal(&self.lines(items));

        let result = self.coupons.validate(&code, subtotal).await;

        let mut state = self.coupon_state();
        if state.generation != generation || state.input != code {
            tracing::debug!(code = %code, "discarding superseded coupon validation");
            return Ok(CouponOutcome::Superseded);
        }
        match result {
            Ok(coupon) => {
                tracing::info!(code = %coupon.code, "coupon applied");
                state.applied = Some(coupon.clone());
                Ok(CouponOutcome::Applied(coupon))
            }
            Err(err) => {
                state.applied = None;
                Err(err.into())
            }
        }
    }

    pub fn remove_coupon(&self) {
        let mut state = self.coupon_state();
        state.applied = None;
        state.input.clear();
        state.generation += 1;
    }

    /// Current totals for `items` shipped to `destination`.
    ///
    /// An applied coupon that no longer qualifies (for example after the
    /// cart shrank below its minimum) contributes no discount.
    pub fn breakdown(&self, items: &CheckoutItems, destination: &str) -> PriceBreakdown {
        let lines = self.lines(items);
        let coupon = self.eligible_coupon(pricing::subtotal(&lines));
        pricing::compute_breakdown(&lines, coupon.as_ref(), destination, &self.shipping)
    }

    /// Submits the order. On failure nothing is cleared so the shopper can
    /// retry; on success the coupon usage is recorded once for the new order
    /// and the cart is emptied (unless this was a buy-now checkout).
    pub async fn place_order(
        &self,
        items: CheckoutItems,
        shipping: ShippingAddress,
        payment: PaymentMethod,
    ) -> Result<PlacedOrder, CheckoutError> {
        let identity = self.cart.identity().ok_or(CheckoutError::SignInRequired)?;
        if let Some(field) = shipping.first_missing_field() {
            return Err(CheckoutError::MissingField(field));
        }
        if !pricing::is_known_district(&shipping.district) {
            return Err(CheckoutError::UnknownDistrict(shipping.district));
        }
        if payment
            .transaction_id()
            .is_some_and(|id| id.trim().is_empty())
        {
            return Err(CheckoutError::PaymentIncomplete);
        }
        let lines = self.lines(&items);
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }

        let coupon = self.eligible_coupon(pricing::subtotal(&lines));
        let breakdown =
            pricing::compute_breakdown(&lines, coupon.as_ref(), &shipping.district, &self.shipping);
        let status = payment.initial_status();
        let draft = OrderDraft {
            items: lines,
            coupon_code: coupon.as_ref().map(|c| c.code.clone()),
            breakdown,
            shipping,
            payment,
        };

        let order_id = self.orders.submit(&identity, &draft).await.map_err(|err| {
            tracing::warn!(error = %err, "order submission failed, cart kept");
            CheckoutError::Submission(err)
        })?;
        tracing::info!(%order_id, total = breakdown.grand_total, "order placed");

        let mut warnings = Vec::new();
        if let Some(coupon) = &coupon {
            if let Err(err) = self
                .coupons
                .register_usage(&identity, &coupon.code, order_id)
                .await
            {
                warnings.push(CheckoutWarning::CouponNotRecorded(err));
            }
        }
        self.remove_coupon();

        if items == CheckoutItems::Cart {
            match self.cart.clear().await {
                Ok(mutation) => warnings.extend(mutation.warning.map(CheckoutWarning::from)),
                Err(err) => warnings.push(CheckoutWarning::CartNotCleared(err)),
            }
        }

        Ok(PlacedOrder {
            order_id,
            status,
            breakdown,
            warnings,
        })
    }

    fn lines(&self, items: &CheckoutItems) -> Vec<LineItem> {
        match items {
            CheckoutItems::Cart => self.cart.items(),
            CheckoutItems::BuyNow(lines) => lines.clone(),
        }
    }

    fn eligible_coupon(&self, subtotal: i64) -> Option<Coupon> {
        self.coupon_state()
            .applied
            .clone()
            .filter(|coupon| check_eligibility(coupon, subtotal, Utc::now()).is_ok())
    }

    fn coupon_state(&self) -> MutexGuard<'_, CouponState> {
        self.coupon.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
