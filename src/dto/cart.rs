use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::storefront::remote::AccountCartRecord;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CartQuery {
    /// Owner whose cart to read; defaults to the caller.
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateQuantityRequest {
    pub quantity: u32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct CartList {
    #[schema(value_type = Vec<AccountCartRecord>)]
    pub items: Vec<AccountCartRecord>,
}
