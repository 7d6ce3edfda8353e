use uuid::Uuid;

use crate::{
    audit,
    db::DbPool,
    dto::cart::{CartList, CartQuery},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::LineItem,
    response::{ApiResponse, Created, Meta},
    storefront::{pricing, remote::AccountCartRecord},
};

/// Lines of the caller's cart, oldest first. Reading another owner's cart
/// requires the admin role.
pub async fn list_cart(
    pool: &DbPool,
    user: &AuthUser,
    query: CartQuery,
) -> AppResult<ApiResponse<CartList>> {
    let owner = match query.email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => email.to_lowercase(),
        _ => user.owner(),
    };
    if owner != user.owner() {
        ensure_admin(pool, user).await?;
    }

    let items = sqlx::query_as::<_, AccountCartRecord>(
        r#"
        SELECT id, email, line_id, product_id, name, unit_price, image, variant, quantity
        FROM cart_items
        WHERE email = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(&owner)
    .fetch_all(pool)
    .await?;

    let total = items.len() as i64;
    Ok(ApiResponse::success(
        "OK",
        CartList { items },
        Some(Meta::new(1, total, total)),
    ))
}

/// Adds the line to the caller's cart. An existing line with the same
/// `line_id` has its quantity increased instead.
pub async fn add_item(
    pool: &DbPool,
    user: &AuthUser,
    item: LineItem,
) -> AppResult<ApiResponse<Created>> {
    if item.quantity == 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    let quantity = i32::try_from(item.quantity)
        .map_err(|_| AppError::BadRequest("quantity is too large".to_string()))?;
    if item.line_id != LineItem::line_id_for(item.product_id, item.variant.as_deref()) {
        return Err(AppError::BadRequest(
            "line_id does not match product and variant".to_string(),
        ));
    }
    if item.unit_price < 0 {
        return Err(AppError::BadRequest("unit_price must not be negative".to_string()));
    }
    if pricing::checked_subtotal(std::slice::from_ref(&item)).is_none() {
        return Err(AppError::BadRequest("line total is too large".to_string()));
    }

    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO cart_items (id, email, line_id, product_id, name, unit_price, image, variant, quantity)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (email, line_id)
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.owner())
    .bind(&item.line_id)
    .bind(item.product_id)
    .bind(&item.name)
    .bind(item.unit_price)
    .bind(&item.image)
    .bind(&item.variant)
    .bind(quantity)
    .fetch_one(pool)
    .await?;

    tracing::debug!(line_id = %item.line_id, quantity, "cart line added");
    Ok(ApiResponse::success(
        "Added to cart",
        Created { inserted_id: id },
        Some(Meta::empty()),
    ))
}

pub async fn set_quantity(
    pool: &DbPool,
    user: &AuthUser,
    line_id: &str,
    quantity: u32,
) -> AppResult<ApiResponse<serde_json::Value>> {
    if quantity == 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    let quantity = i32::try_from(quantity)
        .map_err(|_| AppError::BadRequest("quantity is too large".to_string()))?;

    let result = sqlx::query("UPDATE cart_items SET quantity = $3 WHERE email = $1 AND line_id = $2")
        .bind(user.owner())
        .bind(line_id)
        .bind(quantity)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(ApiResponse::success(
        "Quantity updated",
        serde_json::json!({ "line_id": line_id, "quantity": quantity }),
        Some(Meta::empty()),
    ))
}

/// Removing a line that is not in the cart succeeds with `deleted_count` 0.
pub async fn remove_item(
    pool: &DbPool,
    user: &AuthUser,
    line_id: &str,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE email = $1 AND line_id = $2")
        .bind(user.owner())
        .bind(line_id)
        .execute(pool)
        .await?;

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({ "deleted_count": result.rows_affected() }),
        Some(Meta::empty()),
    ))
}

pub async fn clear_cart(
    pool: &DbPool,
    user: &AuthUser,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let result = sqlx::query("DELETE FROM cart_items WHERE email = $1")
        .bind(user.owner())
        .execute(pool)
        .await?;

    audit::record(
        pool,
        &user.email,
        "cart_clear",
        "cart_items",
        serde_json::json!({ "deleted_count": result.rows_affected() }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart cleared",
        serde_json::json!({ "deleted_count": result.rows_affected() }),
        Some(Meta::empty()),
    ))
}
