//! Price breakdown for a cart.
//!
//! Amounts are whole currency units. Everything here is a pure function of
//! its arguments.

use crate::models::{Coupon, DiscountType, LineItem, PriceBreakdown};

pub const DISTRICTS: [&str; 64] = [
    "Bagerhat", "Bandarban", "Barguna", "Barishal", "Bhola", "Bogura", "Brahmanbaria",
    "Chandpur", "Chapai Nawabganj", "Chattogram", "Chuadanga", "Cox's Bazar", "Cumilla",
    "Dhaka", "Dinajpur", "Faridpur", "Feni", "Gaibandha", "Gazipur", "Gopalganj", "Habiganj",
    "Jamalpur", "Jessore", "Jhalokathi", "Jhenaidah", "Joypurhat", "Khagrachhari", "Khulna",
    "Kishoreganj", "Kurigram", "Kushtia", "Lakshmipur", "Lalmonirhat", "Madaripur", "Magura",
    "Manikganj", "Meherpur", "Moulvibazar", "Munshiganj", "Mymensingh", "Naogaon", "Narail",
    "Narayanganj", "Narsingdi", "Natore", "Netrokona", "Nilphamari", "Noakhali", "Pabna",
    "Panchagarh", "Patuakhali", "Pirojpur", "Rajbari", "Rajshahi", "Rangamati", "Rangpur",
    "Satkhira", "Shariatpur", "Sherpur", "Sirajganj", "Sunamganj", "Sylhet", "Tangail",
    "Thakurgaon",
];

pub fn is_known_district(destination: &str) -> bool {
    let destination = destination.trim();
    DISTRICTS
        .iter()
        .any(|district| district.eq_ignore_ascii_case(destination))
}

/// Two-tier flat shipping: one fee inside the local region, another everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingTable {
    pub local_region: String,
    pub local_fee: i64,
    pub other_fee: i64,
}

impl Default for ShippingTable {
    fn default() -> Self {
        Self {
            local_region: "Dhaka".to_string(),
            local_fee: 80,
            other_fee: 120,
        }
    }
}

impl ShippingTable {
    pub fn fee_for(&self, destination: &str) -> i64 {
        if destination.trim().eq_ignore_ascii_case(&self.local_region) {
            self.local_fee
        } else {
            self.other_fee
        }
    }
}

/// Largest line total or subtotal the service accepts.
pub const MAX_AMOUNT: i64 = 1_000_000_000_000;

/// Subtotal of `items`, or `None` when a line or the sum is above
/// [`MAX_AMOUNT`].
pub fn checked_subtotal(items: &[LineItem]) -> Option<i64> {
    items.iter().try_fold(0_i64, |acc, item| {
        let line = item.unit_price.checked_mul(i64::from(item.quantity))?;
        if !(0..=MAX_AMOUNT).contains(&line) {
            return None;
        }
        acc.checked_add(line).filter(|sum| *sum <= MAX_AMOUNT)
    })
}

pub fn subtotal(items: &[LineItem]) -> i64 {
    items
        .iter()
        .fold(0_i64, |acc, item| acc.saturating_add(item.line_total()))
}

/// Discount a coupon grants on `subtotal`, clamped to `0..=subtotal`.
///
/// The coupon is assumed to be already validated; pass `None` when there is
/// no valid coupon.
pub fn discount_for(coupon: Option<&Coupon>, subtotal: i64) -> i64 {
    let Some(coupon) = coupon else {
        return 0;
    };
    let raw = match coupon.discount_type {
        DiscountType::Fixed => i128::from(coupon.discount_value),
        // Truncates toward zero to stay in whole units.
        DiscountType::Percentage => {
            i128::from(subtotal) * i128::from(coupon.discount_value) / 100
        }
    };
    let ceiling = i128::from(subtotal.max(0));
    // The clamp keeps the value inside i64 range.
    raw.clamp(0, ceiling) as i64
}

pub fn compute_breakdown(
    items: &[LineItem],
    coupon: Option<&Coupon>,
    destination: &str,
    shipping: &ShippingTable,
) -> PriceBreakdown {
    let subtotal = subtotal(items);
    let discount = discount_for(coupon, subtotal);
    let shipping_fee = shipping.fee_for(destination);
    PriceBreakdown {
        subtotal,
        discount,
        shipping_fee,
        grand_total: subtotal
            .saturating_sub(discount)
            .saturating_add(shipping_fee)
            .max(0),
    }
}
