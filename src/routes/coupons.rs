use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, patch},
};

use crate::{
    dto::coupons::{RegisterUsageRequest, UsageRecorded},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Coupon,
    response::ApiResponse,
    services::coupon_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{code}", get(get_coupon))
        .route("/update-count/{code}", patch(register_usage))
}

#[utoipa::path(
    get,
    path = "/api/coupons/{code}",
    params(("code" = String, Path, description = "Coupon code, any case")),
    responses(
        (status = 200, description = "Coupon", body = ApiResponse<Coupon>),
        (status = 404, description = "Unknown code"),
    ),
    security(()),
    tag = "Coupons"
)]
pub async fn get_coupon(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<ApiResponse<Coupon>>> {
    let resp = coupon_service::get_coupon(&state, &code).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/coupons/update-count/{code}",
    params(("code" = String, Path, description = "Coupon code")),
    request_body = RegisterUsageRequest,
    responses(
        (status = 200, description = "Usage recorded once per order", body = ApiResponse<UsageRecorded>),
        (status = 400, description = "Order was not placed with this coupon"),
        (status = 404, description = "Unknown coupon or order"),
        (status = 409, description = "Usage limit reached"),
    ),
    security(("bearer_auth" = [])),
    tag = "Coupons"
)]
pub async fn register_usage(
    State(state): State<AppState>,
    user: AuthUser,
    Path(code): Path<String>,
    Json(payload): Json<RegisterUsageRequest>,
) -> AppResult<Json<ApiResponse<UsageRecorded>>> {
    let resp = coupon_service::register_usage(&state, &user, &code, payload).await?;
    Ok(Json(resp))
}
