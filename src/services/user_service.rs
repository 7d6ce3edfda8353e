use chrono::Utc;
use sea_orm::ActiveValue::NotSet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::users::{AdminCheck, UpsertUserRequest, UserList},
    entity::users::{ActiveModel, Column, Entity as Users, Model as UserModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, is_admin},
    models::User,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    state::AppState,
};

/// Records the signed-in caller. Existing users keep their role; a name in
/// the payload replaces the stored one.
pub async fn upsert_user(
    state: &AppState,
    user: &AuthUser,
    payload: UpsertUserRequest,
) -> AppResult<ApiResponse<User>> {
    let email = user.owner();
    let existing = Users::find()
        .filter(Column::Email.eq(email.clone()))
        .one(&state.orm)
        .await?;

    let (model, message) = match existing {
        Some(existing) => {
            let Some(name) = payload.name else {
                return Ok(ApiResponse::success(
                    "User already exists",
                    user_from_entity(existing),
                    Some(Meta::empty()),
                ));
            };
            let mut active: ActiveModel = existing.into();
            active.name = Set(Some(name));
            (active.update(&state.orm).await?, "User updated")
        }
        None => {
            let created = ActiveModel {
                id: Set(Uuid::new_v4()),
                email: Set(email),
                name: Set(payload.name),
                role: Set("user".to_string()),
                created_at: NotSet,
            }
            .insert(&state.orm)
            .await?;
            tracing::info!(email = %created.email, "user registered");
            (created, "User created")
        }
    };

    Ok(ApiResponse::success(
        message,
        user_from_entity(model),
        Some(Meta::empty()),
    ))
}

/// Whether `email` has the admin role. Callers may only ask about
/// themselves unless they are admins.
pub async fn check_admin(
    state: &AppState,
    user: &AuthUser,
    email: &str,
) -> AppResult<ApiResponse<AdminCheck>> {
    let caller_is_admin = is_admin(&state.pool, &user.email).await?;
    if !email.eq_ignore_ascii_case(&user.email) && !caller_is_admin {
        return Err(AppError::Forbidden);
    }
    let admin = if email.eq_ignore_ascii_case(&user.email) {
        caller_is_admin
    } else {
        is_admin(&state.pool, email).await?
    };
    Ok(ApiResponse::success("OK", AdminCheck { admin }, None))
}

pub async fn list_users(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<UserList>> {
    ensure_admin(&state.pool, user).await?;
    let (page, limit, offset) = pagination.normalize();

    let finder = Users::find().order_by_asc(Column::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(user_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "Users",
        UserList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn promote_user(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(&state.pool, user).await?;
    let existing = match Users::find_by_id(id).one(&state.orm).await? {
        Some(u) => u,
        None => return Err(AppError::NotFound),
    };

    let mut active: ActiveModel = existing.into();
    active.role = Set("admin".to_string());
    let promoted = active.update(&state.orm).await?;

    audit::record(
        &state.pool,
        &user.email,
        "user_promote",
        "users",
        serde_json::json!({ "user_id": promoted.id, "email": promoted.email }),
    )
    .await;

    Ok(ApiResponse::success(
        "User promoted to admin",
        user_from_entity(promoted),
        Some(Meta::empty()),
    ))
}

fn user_from_entity(model: UserModel) -> User {
    User {
        id: model.id,
        email: model.email,
        name: model.name,
        role: model.role,
        created_at: model.created_at.with_timezone(&Utc),
    }
}
