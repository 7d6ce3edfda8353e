use std::collections::HashMap;

use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::orders::{OrderList, OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        order_items::{
            ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems,
            Model as OrderItemModel,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::{Column as ProductCol, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, is_admin},
    models::{Coupon, LineItem, Order, OrderDraft, OrderItem, OrderStatus, ShippingAddress},
    response::{ApiResponse, Created, Meta},
    routes::params::{OrderListQuery, SortOrder},
    services::coupon_service,
    state::AppState,
    storefront::{coupon::check_eligibility, pricing},
};

/// Stores a submitted order with server-computed totals.
///
/// Lines are priced from the catalog, not from the submitted snapshot. The
/// coupon is re-checked here; one that is unknown or no longer eligible is
/// dropped from the order rather than failing it.
pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    draft: OrderDraft,
) -> AppResult<ApiResponse<Created>> {
    validate_draft(&draft)?;

    let items = price_from_catalog(state, &draft.items).await?;
    let subtotal = pricing::checked_subtotal(&items)
        .ok_or_else(|| AppError::BadRequest("order total is too large".into()))?;
    let coupon = match draft.coupon_code.as_deref() {
        Some(code) => eligible_coupon(state, code, subtotal).await?,
        None => None,
    };
    let breakdown = pricing::compute_breakdown(
        &items,
        coupon.as_ref(),
        &draft.shipping.district,
        &state.shipping,
    );
    if breakdown != draft.breakdown {
        tracing::warn!(
            client_total = draft.breakdown.grand_total,
            server_total = breakdown.grand_total,
            "client totals differ from server pricing"
        );
    }

    let shipping = serde_json::to_value(&draft.shipping)
        .map_err(|e| AppError::Internal(e.into()))?;
    let status = draft.payment.initial_status();
    let order_id = Uuid::new_v4();

    let txn = state.orm.begin().await?;
    OrderActive {
        id: Set(order_id),
        email: Set(user.owner()),
        subtotal: Set(breakdown.subtotal),
        discount: Set(breakdown.discount),
        shipping_fee: Set(breakdown.shipping_fee),
        total_amount: Set(breakdown.grand_total),
        coupon_code: Set(coupon.as_ref().map(|c| c.code.clone())),
        status: Set(status.as_str().to_string()),
        payment_method: Set(draft.payment.as_str().to_string()),
        transaction_id: Set(draft.payment.transaction_id().map(str::to_string)),
        shipping: Set(shipping),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    for item in &items {
        let quantity = i32::try_from(item.quantity)
            .map_err(|_| AppError::BadRequest("quantity is too large".into()))?;
        OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(item.product_id),
            line_id: Set(item.line_id.clone()),
            name: Set(item.name.clone()),
            variant: Set(item.variant.clone()),
            quantity: Set(quantity),
            unit_price: Set(item.unit_price),
        }
        .insert(&txn)
        .await?;
    }
    txn.commit().await?;

    tracing::info!(%order_id, total = breakdown.grand_total, status = %status, "order created");
    audit::record(
        &state.pool,
        &user.email,
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order_id, "total_amount": breakdown.grand_total }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order placed",
        Created {
            inserted_id: order_id,
        },
        Some(Meta::empty()),
    ))
}

fn validate_draft(draft: &OrderDraft) -> AppResult<()> {
    if draft.items.is_empty() {
        return Err(AppError::BadRequest("order has no items".into()));
    }
    if draft.items.iter().any(|item| item.quantity == 0) {
        return Err(AppError::BadRequest("order has invalid quantity".into()));
    }
    if draft.items.iter().any(|item| item.unit_price < 0) {
        return Err(AppError::BadRequest("order has invalid price".into()));
    }
    if pricing::checked_subtotal(&draft.items).is_none() {
        return Err(AppError::BadRequest("order total is too large".into()));
    }
    if draft
        .items
        .iter()
        .any(|item| item.line_id != LineItem::line_id_for(item.product_id, item.variant.as_deref()))
    {
        return Err(AppError::BadRequest(
            "line_id does not match product and variant".into(),
        ));
    }
    if let Some(field) = draft.shipping.first_missing_field() {
        return Err(AppError::BadRequest(format!("{field} is required")));
    }
    if !pricing::is_known_district(&draft.shipping.district) {
        return Err(AppError::BadRequest(format!(
            "unknown district {}",
            draft.shipping.district
        )));
    }
    if draft
        .payment
        .transaction_id()
        .is_some_and(|id| id.trim().is_empty())
    {
        return Err(AppError::BadRequest("transaction_id is required".into()));
    }
    Ok(())
}

/// Replaces each line's name and unit price with the catalog's.
async fn price_from_catalog(state: &AppState, items: &[LineItem]) -> AppResult<Vec<LineItem>> {
    let ids: Vec<Uuid> = items.iter().map(|item| item.product_id).collect();
    let catalog: HashMap<Uuid, _> = Products::find()
        .filter(ProductCol::Id.is_in(ids))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|product| (product.id, product))
        .collect();

    items
        .iter()
        .map(|item| {
            let Some(product) = catalog.get(&item.product_id) else {
                return Err(AppError::BadRequest(format!(
                    "unknown product {}",
                    item.product_id
                )));
            };
            if item.unit_price != product.price {
                tracing::warn!(
                    product_id = %product.id,
                    submitted = item.unit_price,
                    catalog = product.price,
                    "submitted price differs from catalog"
                );
            }
            Ok(LineItem {
                name: product.name.clone(),
                unit_price: product.price,
                ..item.clone()
            })
        })
        .collect()
}

async fn eligible_coupon(state: &AppState, code: &str, subtotal: i64) -> AppResult<Option<Coupon>> {
    let code = Coupon::normalize_code(code);
    let Some(coupon) = coupon_service::find_by_code(state, &code).await? else {
        tracing::warn!(code = %code, "order submitted with unknown coupon");
        return Ok(None);
    };
    match check_eligibility(&coupon, subtotal, Utc::now()) {
        Ok(()) => Ok(Some(coupon)),
        Err(rejection) => {
            tracing::warn!(code = %code, reason = rejection.code(), "coupon dropped from order");
            Ok(None)
        }
    }
}

pub async fn list_my_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let condition = Condition::all().add(OrderCol::Email.eq(user.owner()));
    list_orders_where(state, condition, query).await
}

pub async fn list_all_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(&state.pool, user).await?;
    list_orders_where(state, Condition::all(), query).await
}

async fn list_orders_where(
    state: &AppState,
    mut condition: Condition,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    let (page, limit, offset) = query.pagination().normalize();
    if let Some(status) = query.status {
        condition = condition.add(OrderCol::Status.eq(status.as_str()));
    }

    let mut finder = Orders::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::CreatedAt),
        SortOrder::Desc => finder.order_by_desc(OrderCol::CreatedAt),
    };

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success(
        "Orders",
        OrderList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

/// An order with its lines, visible to its owner and to admins.
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = match Orders::find_by_id(id).one(&state.orm).await? {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    if !order.email.eq_ignore_ascii_case(&user.email) && !is_admin(&state.pool, &user.email).await? {
        return Err(AppError::NotFound);
    }

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: order_from_entity(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(&state.pool, user).await?;
    let txn = state.orm.begin().await?;

    let order = Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let order = match order {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    let previous = order.status.clone();

    let mut active: OrderActive = order.into();
    active.status = Set(payload.status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    let order = active.update(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.pool,
        &user.email,
        "order_status_update",
        "orders",
        serde_json::json!({ "order_id": order.id, "from": previous, "to": payload.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        order_from_entity(order)?,
        Some(Meta::empty()),
    ))
}

fn order_from_entity(model: OrderModel) -> AppResult<Order> {
    let status = model
        .status
        .parse::<OrderStatus>()
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    let shipping: ShippingAddress =
        serde_json::from_value(model.shipping).map_err(|e| AppError::Internal(e.into()))?;
    Ok(Order {
        id: model.id,
        email: model.email,
        subtotal: model.subtotal,
        discount: model.discount,
        shipping_fee: model.shipping_fee,
        total_amount: model.total_amount,
        coupon_code: model.coupon_code,
        status,
        payment_method: model.payment_method,
        transaction_id: model.transaction_id,
        shipping,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        line_id: model.line_id,
        name: model.name,
        variant: model.variant,
        quantity: model.quantity,
        unit_price: model.unit_price,
    }
}
