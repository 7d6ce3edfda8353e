use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect};

use crate::{
    dto::admin::{AdminStats, CategoryStat, DailyStat, StatsSummary},
    entity::{
        coupons::Entity as Coupons,
        orders::{Column as OrderCol, Entity as Orders},
        users::Entity as Users,
    },
    error::AppResult,
    middleware::auth::{AuthUser, ensure_admin},
    models::OrderStatus,
    response::{ApiResponse, Meta},
    state::AppState,
};

/// Days covered by the daily order chart, today included.
const CHART_DAYS: i32 = 30;

pub async fn dashboard_stats(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<AdminStats>> {
    ensure_admin(&state.pool, user).await?;

    let total_revenue = Orders::find()
        .select_only()
        .column_as(Expr::cust("COALESCE(SUM(total_amount), 0)::BIGINT"), "total_revenue")
        .into_tuple::<i64>()
        .one(&state.orm)
        .await?
        .unwrap_or(0);

    let total_cart_items =
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM cart_items")
            .fetch_one(&state.pool)
            .await?;

    let summary = StatsSummary {
        total_revenue,
        success_orders: orders_with_status(state, OrderStatus::Success).await?,
        pending_orders: orders_with_status(state, OrderStatus::Pending).await?,
        paid_orders: orders_with_status(state, OrderStatus::Paid).await?,
        unpaid_orders: orders_with_status(state, OrderStatus::Unpaid).await?,
        total_users: Users::find().count(&state.orm).await? as i64,
        total_cart_items,
        total_coupons: Coupons::find().count(&state.orm).await? as i64,
    };

    let category_data = sqlx::query_as::<_, CategoryStat>(
        r#"
        SELECT COALESCE(p.category, 'Uncategorized') AS name,
               SUM(oi.quantity)::BIGINT AS value
        FROM order_items oi
        JOIN products p ON p.id = oi.product_id
        GROUP BY 1
        ORDER BY value DESC, name ASC
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let chart_data = sqlx::query_as::<_, DailyStat>(
        r#"
        SELECT to_char(date_trunc('day', created_at), 'YYYY-MM-DD') AS name,
               COUNT(*) AS count,
               COALESCE(SUM(total_amount), 0)::BIGINT AS revenue
        FROM orders
        WHERE created_at >= date_trunc('day', NOW()) - make_interval(days => $1 - 1)
        GROUP BY 1
        ORDER BY 1 ASC
        "#,
    )
    .bind(CHART_DAYS)
    .fetch_all(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "Stats",
        AdminStats {
            summary,
            category_data,
            chart_data,
        },
        Some(Meta::empty()),
    ))
}

async fn orders_with_status(state: &AppState, status: OrderStatus) -> AppResult<i64> {
    let count = Orders::find()
        .filter(OrderCol::Status.eq(status.as_str()))
        .count(&state.orm)
        .await?;
    Ok(count as i64)
}
