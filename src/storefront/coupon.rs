use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::Coupon;
use crate::storefront::{
    identity::Identity,
    remote::{ApiError, CouponApi},
};

/// Why a coupon code cannot be redeemed right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    Inactive,
    Expired,
    UsageExceeded,
    BelowMinimum { min_purchase: i64 },
}

impl Rejection {
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::NotFound => "NOT_FOUND",
            Rejection::Inactive => "INACTIVE",
            Rejection::Expired => "EXPIRED",
            Rejection::UsageExceeded => "USAGE_EXCEEDED",
            Rejection::BelowMinimum { .. } => "BELOW_MINIMUM",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotFound | Rejection::Inactive | Rejection::Expired => {
                f.write_str("Invalid or expired coupon")
            }
            Rejection::UsageExceeded => f.write_str("This coupon has reached its usage limit"),
            Rejection::BelowMinimum { min_purchase } => {
                write!(f, "Minimum purchase of {min_purchase} required for this coupon")
            }
        }
    }
}

impl std::error::Error for Rejection {}

/// Eligibility rules after lookup, in order; the first failing rule wins.
pub fn check_eligibility(
    coupon: &Coupon,
    subtotal: i64,
    now: DateTime<Utc>,
) -> Result<(), Rejection> {
    if !coupon.is_active {
        return Err(Rejection::Inactive);
    }
    if now > coupon.expiry_date {
        return Err(Rejection::Expired);
    }
    if coupon.used_count >= coupon.usage_limit {
        return Err(Rejection::UsageExceeded);
    }
    if subtotal < coupon.min_purchase {
        return Err(Rejection::BelowMinimum {
            min_purchase: coupon.min_purchase,
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CouponError {
    #[error("Please enter a coupon code")]
    EmptyCode,
    #[error("{0}")]
    Rejected(#[from] Rejection),
    #[error("Could not check the coupon, please try again")]
    Lookup(#[source] ApiError),
    #[error("Could not record coupon usage")]
    Registration(#[source] ApiError),
}

#[derive(Clone)]
pub struct CouponValidator {
    api: Arc<dyn CouponApi>,
}

impl CouponValidator {
    pub fn new(api: Arc<dyn CouponApi>) -> Self {
        Self { api }
    }

    pub async fn validate(&self, code: &str, subtotal: i64) -> Result<Coupon, CouponError> {
        self.validate_at(code, subtotal, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        code: &str,
        subtotal: i64,
        now: DateTime<Utc>,
    ) -> Result<Coupon, CouponError> {
        let code = Coupon::normalize_code(code);
        if code.is_empty() {
            return Err(CouponError::EmptyCode);
        }

        let coupon = match self.api.fetch(&code).await {
            Ok(Some(coupon)) if coupon.code.eq_ignore_ascii_case(&code) => coupon,
            Ok(_) | Err(ApiError::NotFound) => return Err(Rejection::NotFound.into()),
            Err(err) => {
                tracing::warn!(code = %code, error = %err, "coupon lookup failed");
                return Err(CouponError::Lookup(err));
            }
        };

        if let Err(rejection) = check_eligibility(&coupon, subtotal, now) {
            tracing::debug!(code = %code, reason = rejection.code(), "coupon rejected");
            return Err(rejection.into());
        }
        Ok(coupon)
    }

    /// Records one redemption of `code` for `order_id`.
    ///
    /// Call only once the order is confirmed; the API treats a repeated call
    /// for the same order as a no-op.
    pub async fn register_usage(
        &self,
        identity: &Identity,
        code: &str,
        order_id: Uuid,
    ) -> Result<(), CouponError> {
        let code = Coupon::normalize_code(code);
        self.api
            .register_usage(identity, &code, order_id)
            .await
            .map_err(|err| {
                tracing::warn!(code = %code, %order_id, error = %err, "coupon usage not recorded");
                CouponError::Registration(err)
            })
    }
}
