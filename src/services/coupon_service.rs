use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::coupons::{
        CouponList, CreateCouponRequest, RegisterUsageRequest, UpdateCouponRequest, UsageRecorded,
    },
    entity::{
        coupon_redemptions::{
            ActiveModel as RedemptionActive, Column as RedemptionCol, Entity as CouponRedemptions,
        },
        coupons::{ActiveModel as CouponActive, Column as CouponCol, Entity as Coupons, Model as CouponModel},
        orders::Entity as Orders,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, is_admin},
    models::{Coupon, DiscountType},
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

/// Looks a coupon up by code, case-insensitively. Eligibility is left to
/// the caller, who knows the cart subtotal.
pub async fn get_coupon(state: &AppState, code: &str) -> AppResult<ApiResponse<Coupon>> {
    let code = Coupon::normalize_code(code);
    if code.is_empty() {
        return Err(AppError::BadRequest("coupon code is required".into()));
    }
    let coupon = match find_by_code(state, &code).await? {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };
    Ok(ApiResponse::success("Coupon", coupon, None))
}

pub(crate) async fn find_by_code(state: &AppState, code: &str) -> AppResult<Option<Coupon>> {
    Coupons::find()
        .filter(CouponCol::Code.eq(code))
        .one(&state.orm)
        .await?
        .map(coupon_from_entity)
        .transpose()
}

/// Counts one redemption of `code` for an order. Repeating the call for the
/// same order leaves the count unchanged, and the count never passes the
/// coupon's usage limit.
pub async fn register_usage(
    state: &AppState,
    user: &AuthUser,
    code: &str,
    payload: RegisterUsageRequest,
) -> AppResult<ApiResponse<UsageRecorded>> {
    let code = Coupon::normalize_code(code);
    let txn = state.orm.begin().await?;

    let coupon = Coupons::find()
        .filter(CouponCol::Code.eq(code.clone()))
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    let coupon = match coupon {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };

    let order = match Orders::find_by_id(payload.order_id).one(&txn).await? {
        Some(o) => o,
        None => return Err(AppError::NotFound),
    };
    if !order.email.eq_ignore_ascii_case(&user.email) && !is_admin(&state.pool, &user.email).await? {
        return Err(AppError::Forbidden);
    }
    if order.coupon_code.as_deref() != Some(code.as_str()) {
        return Err(AppError::BadRequest(
            "order was not placed with this coupon".into(),
        ));
    }

    let already = CouponRedemptions::find()
        .filter(RedemptionCol::CouponCode.eq(code.clone()))
        .filter(RedemptionCol::OrderId.eq(payload.order_id))
        .one(&txn)
        .await?;
    if already.is_some() {
        txn.commit().await?;
        tracing::debug!(code = %code, order_id = %payload.order_id, "coupon usage already recorded");
        return Ok(ApiResponse::success(
            "Coupon usage already recorded",
            UsageRecorded {
                code,
                used_count: coupon.used_count,
                already_recorded: true,
            },
            Some(Meta::empty()),
        ));
    }

    if coupon.used_count >= coupon.usage_limit {
        return Err(AppError::Conflict("coupon usage limit reached".into()));
    }

    RedemptionActive {
        id: Set(Uuid::new_v4()),
        coupon_code: Set(code.clone()),
        order_id: Set(payload.order_id),
        created_at: NotSet,
    }
    .insert(&txn)
    .await?;

    Coupons::update_many()
        .col_expr(CouponCol::UsedCount, Expr::col(CouponCol::UsedCount).add(1))
        .filter(CouponCol::Id.eq(coupon.id))
        .exec(&txn)
        .await?;

    txn.commit().await?;

    audit::record(
        &state.pool,
        &user.email,
        "coupon_redeem",
        "coupons",
        serde_json::json!({ "code": code, "order_id": payload.order_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Coupon usage recorded",
        UsageRecorded {
            code,
            used_count: coupon.used_count + 1,
            already_recorded: false,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_coupons(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<CouponList>> {
    ensure_admin(&state.pool, user).await?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Coupons::find().order_by_desc(CouponCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(coupon_from_entity)
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success(
        "Coupons",
        CouponList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn create_coupon(
    state: &AppState,
    user: &AuthUser,
    payload: CreateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(&state.pool, user).await?;

    let code = Coupon::normalize_code(&payload.code);
    if code.is_empty() {
        return Err(AppError::BadRequest("coupon code is required".into()));
    }
    let min_purchase = payload.min_purchase.unwrap_or(0);
    validate_terms(
        payload.discount_type,
        payload.discount_value,
        min_purchase,
        payload.usage_limit,
    )?;
    if find_by_code(state, &code).await?.is_some() {
        return Err(AppError::Conflict(format!("coupon {code} already exists")));
    }

    let coupon = CouponActive {
        id: Set(Uuid::new_v4()),
        code: Set(code),
        discount_type: Set(payload.discount_type.as_str().to_string()),
        discount_value: Set(payload.discount_value),
        min_purchase: Set(min_purchase),
        usage_limit: Set(payload.usage_limit),
        used_count: Set(0),
        expiry_date: Set(payload.expiry_date.into()),
        is_active: Set(payload.is_active.unwrap_or(true)),
        created_by: Set(Some(user.email.clone())),
        created_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.pool,
        &user.email,
        "coupon_create",
        "coupons",
        serde_json::json!({ "coupon_id": coupon.id, "code": coupon.code }),
    )
    .await;

    Ok(ApiResponse::success(
        "Coupon created",
        coupon_from_entity(coupon)?,
        Some(Meta::empty()),
    ))
}

pub async fn update_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCouponRequest,
) -> AppResult<ApiResponse<Coupon>> {
    ensure_admin(&state.pool, user).await?;
    let existing = match Coupons::find_by_id(id).one(&state.orm).await? {
        Some(c) => c,
        None => return Err(AppError::NotFound),
    };
    let current = coupon_from_entity(existing.clone())?;

    let discount_type = payload.discount_type.unwrap_or(current.discount_type);
    let discount_value = payload.discount_value.unwrap_or(current.discount_value);
    let min_purchase = payload.min_purchase.unwrap_or(current.min_purchase);
    let usage_limit = payload.usage_limit.unwrap_or(current.usage_limit);
    validate_terms(discount_type, discount_value, min_purchase, usage_limit)?;

    let mut active: CouponActive = existing.into();
    active.discount_type = Set(discount_type.as_str().to_string());
    active.discount_value = Set(discount_value);
    active.min_purchase = Set(min_purchase);
    active.usage_limit = Set(usage_limit);
    if let Some(expiry) = payload.expiry_date {
        active.expiry_date = Set(expiry.into());
    }
    if let Some(is_active) = payload.is_active {
        active.is_active = Set(is_active);
    }
    let coupon = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        &user.email,
        "coupon_update",
        "coupons",
        serde_json::json!({ "coupon_id": coupon.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        coupon_from_entity(coupon)?,
        Some(Meta::empty()),
    ))
}

pub async fn delete_coupon(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(&state.pool, user).await?;
    let result = Coupons::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    audit::record(
        &state.pool,
        &user.email,
        "coupon_delete",
        "coupons",
        serde_json::json!({ "coupon_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

fn validate_terms(
    discount_type: DiscountType,
    discount_value: i64,
    min_purchase: i64,
    usage_limit: i32,
) -> AppResult<()> {
    if discount_value <= 0 {
        return Err(AppError::BadRequest(
            "discount_value must be greater than 0".into(),
        ));
    }
    if discount_type == DiscountType::Percentage && discount_value > 100 {
        return Err(AppError::BadRequest(
            "percentage discount cannot exceed 100".into(),
        ));
    }
    if min_purchase < 0 {
        return Err(AppError::BadRequest("min_purchase must not be negative".into()));
    }
    if usage_limit <= 0 {
        return Err(AppError::BadRequest(
            "usage_limit must be greater than 0".into(),
        ));
    }
    Ok(())
}

fn coupon_from_entity(model: CouponModel) -> AppResult<Coupon> {
    let discount_type = model
        .discount_type
        .parse::<DiscountType>()
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e)))?;
    Ok(Coupon {
        id: model.id,
        code: model.code,
        discount_type,
        discount_value: model.discount_value,
        min_purchase: model.min_purchase,
        usage_limit: model.usage_limit,
        used_count: model.used_count,
        expiry_date: model.expiry_date.with_timezone(&Utc),
        is_active: model.is_active,
        created_by: model.created_by,
    })
}
