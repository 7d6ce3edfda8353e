use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: i64,
    pub image: Option<String>,
    /// Selectable sizes. Empty when the product has no variants.
    pub sizes: Vec<String>,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
}

/// One product + variant + quantity entry in a cart.
///
/// `name`, `unit_price` and `image` are a display snapshot taken when the
/// item was added; they are not refreshed from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LineItem {
    pub line_id: String,
    pub product_id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub image: Option<String>,
    pub variant: Option<String>,
    pub quantity: u32,
}

impl LineItem {
    /// Composite identity of a product and its chosen variant.
    pub fn line_id_for(product_id: Uuid, variant: Option<&str>) -> String {
        match variant {
            Some(variant) => format!("{product_id}-{variant}"),
            None => product_id.to_string(),
        }
    }

    pub fn line_total(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DiscountType {
    Fixed,
    #[serde(alias = "percent")]
    Percentage,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Fixed => "fixed",
            DiscountType::Percentage => "percentage",
        }
    }
}

impl FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(DiscountType::Fixed),
            "percentage" | "percent" => Ok(DiscountType::Percentage),
            other => Err(format!("unknown discount type {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Coupon {
    pub id: Uuid,
    /// Stored uppercase; see [`Coupon::normalize_code`].
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: i64,
    pub min_purchase: i64,
    pub usage_limit: i32,
    pub used_count: i32,
    pub expiry_date: DateTime<Utc>,
    pub is_active: bool,
    pub created_by: Option<String>,
}

impl Coupon {
    pub fn normalize_code(code: &str) -> String {
        code.trim().to_uppercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct PriceBreakdown {
    pub subtotal: i64,
    pub discount: i64,
    pub shipping_fee: i64,
    pub grand_total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Paid,
    Unpaid,
    Success,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Paid => "paid",
            OrderStatus::Unpaid => "unpaid",
            OrderStatus::Success => "success",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "paid" => Ok(OrderStatus::Paid),
            "unpaid" => Ok(OrderStatus::Unpaid),
            "success" => Ok(OrderStatus::Success),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

/// How the shopper pays. Card payments are confirmed by the payment
/// gateway before the order is submitted; only the resulting transaction
/// id travels with the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Card { transaction_id: String },
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CashOnDelivery => "cash_on_delivery",
            PaymentMethod::Card { .. } => "card",
        }
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            PaymentMethod::CashOnDelivery => None,
            PaymentMethod::Card { transaction_id } => Some(transaction_id),
        }
    }

    /// Status an order starts in for this payment method.
    pub fn initial_status(&self) -> OrderStatus {
        match self {
            PaymentMethod::CashOnDelivery => OrderStatus::Pending,
            PaymentMethod::Card { .. } => OrderStatus::Paid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub name: String,
    pub phone: String,
    pub email: String,
    pub district: String,
    pub thana: String,
    pub zip_code: String,
    pub address: String,
}

impl ShippingAddress {
    /// First required field left blank, by its display label.
    pub fn first_missing_field(&self) -> Option<&'static str> {
        [
            ("full name", &self.name),
            ("phone number", &self.phone),
            ("email address", &self.email),
            ("district", &self.district),
            ("thana / upazila", &self.thana),
            ("zip code", &self.zip_code),
            ("full address", &self.address),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(label, _)| label)
    }
}

/// Order as submitted by the shopper's checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderDraft {
    pub items: Vec<LineItem>,
    pub coupon_code: Option<String>,
    pub breakdown: PriceBreakdown,
    pub shipping: ShippingAddress,
    pub payment: PaymentMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub email: String,
    pub subtotal: i64,
    pub discount: i64,
    pub shipping_fee: i64,
    pub total_amount: i64,
    pub coupon_code: Option<String>,
    pub status: OrderStatus,
    pub payment_method: String,
    pub transaction_id: Option<String>,
    pub shipping: ShippingAddress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub line_id: String,
    pub name: String,
    pub variant: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_id_includes_variant_when_chosen() {
        let id = Uuid::nil();
        assert_eq!(LineItem::line_id_for(id, None), id.to_string());
        assert_eq!(LineItem::line_id_for(id, Some("XL")), format!("{id}-XL"));
    }

    #[test]
    fn coupon_codes_normalize_to_uppercase() {
        assert_eq!(Coupon::normalize_code("  save10 "), "SAVE10");
    }

    #[test]
    fn discount_type_accepts_legacy_percent_spelling() {
        let parsed: DiscountType = serde_json::from_str("\"percent\"").unwrap();
        assert_eq!(parsed, DiscountType::Percentage);
        assert_eq!("percent".parse::<DiscountType>(), Ok(DiscountType::Percentage));
    }

    #[test]
    fn missing_shipping_field_is_reported_in_form_order() {
        let address = ShippingAddress {
            name: "Rahim".into(),
            phone: "01700000000".into(),
            email: " ".into(),
            ..Default::default()
        };
        assert_eq!(address.first_missing_field(), Some("email address"));
    }

    #[test]
    fn card_payments_start_paid() {
        let card = PaymentMethod::Card {
            transaction_id: "pi_123".into(),
        };
        assert_eq!(card.initial_status(), OrderStatus::Paid);
        assert_eq!(card.transaction_id(), Some("pi_123"));
        assert_eq!(
            PaymentMethod::CashOnDelivery.initial_status(),
            OrderStatus::Pending
        );
    }
}
