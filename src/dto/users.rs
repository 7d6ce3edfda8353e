use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::User;

/// Profile sent after sign-in; the email comes from the bearer token.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpsertUserRequest {
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminCheck {
    pub admin: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct UserList {
    #[schema(value_type = Vec<User>)]
    pub items: Vec<User>,
}
