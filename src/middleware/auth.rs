use axum::{extract::FromRequestParts, http::header};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{
    db::DbPool,
    error::{AppError, AppResult},
};

/// Claims of the identity provider's bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

impl AuthUser {
    /// Email normalized for ownership comparisons.
    pub fn owner(&self) -> String {
        self.email.to_lowercase()
    }
}

pub async fn is_admin(pool: &DbPool, email: &str) -> AppResult<bool> {
    let role: Option<(String,)> = sqlx::query_as("SELECT role FROM users WHERE lower(email) = lower($1)")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(matches!(role, Some((role,)) if role == "admin"))
}

pub async fn ensure_admin(pool: &DbPool, user: &AuthUser) -> AppResult<()> {
    if !is_admin(pool, &user.email).await? {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;
    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization scheme".into()))?;

        let secret = std::env::var("JWT_SECRET")
            .map_err(|_| AppError::Internal(anyhow::anyhow!("JWT_SECRET is not set")))?;

        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

        if decoded.claims.email.trim().is_empty() {
            return Err(AppError::Unauthorized("Token carries no email".into()));
        }

        Ok(AuthUser {
            uid: decoded.claims.sub,
            email: decoded.claims.email,
        })
    }
}
