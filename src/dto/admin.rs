use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Headline numbers for the admin dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatsSummary {
    /// Sum of `total_amount` over every order.
    pub total_revenue: i64,
    pub success_orders: i64,
    pub pending_orders: i64,
    pub paid_orders: i64,
    pub unpaid_orders: i64,
    pub total_users: i64,
    /// Units across every account cart.
    pub total_cart_items: i64,
    pub total_coupons: i64,
}

/// Units ordered per product category.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct CategoryStat {
    pub name: String,
    pub value: i64,
}

/// Orders placed on one day.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct DailyStat {
    /// `YYYY-MM-DD`
    pub name: String,
    pub count: i64,
    pub revenue: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdminStats {
    pub summary: StatsSummary,
    pub category_data: Vec<CategoryStat>,
    pub chart_data: Vec<DailyStat>,
}
