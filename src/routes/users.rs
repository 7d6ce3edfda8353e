use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};

use crate::{
    dto::users::{AdminCheck, UpsertUserRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::User,
    response::ApiResponse,
    services::user_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upsert_user))
        .route("/admin/{email}", get(check_admin))
}

#[utoipa::path(
    post,
    path = "/api/users",
    request_body = UpsertUserRequest,
    responses(
        (status = 200, description = "Caller recorded", body = ApiResponse<User>),
        (status = 401, description = "Unauthorized"),
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn upsert_user(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<UpsertUserRequest>,
) -> AppResult<Json<ApiResponse<User>>> {
    let resp = user_service::upsert_user(&state, &user, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/users/admin/{email}",
    params(("email" = String, Path, description = "Email to check")),
    responses(
        (status = 200, description = "Admin flag", body = ApiResponse<AdminCheck>),
        (status = 403, description = "Forbidden"),
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn check_admin(
    State(state): State<AppState>,
    user: AuthUser,
    Path(email): Path<String>,
) -> AppResult<Json<ApiResponse<AdminCheck>>> {
    let resp = user_service::check_admin(&state, &user, &email).await?;
    Ok(Json(resp))
}
