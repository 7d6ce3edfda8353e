use std::{env, path::PathBuf, time::Duration};

use crate::storefront::pricing::ShippingTable;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub shipping: ShippingTable,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(3000);
        Ok(Self {
            port,
            database_url,
            host,
            shipping: shipping_from_env(),
        })
    }
}

fn shipping_from_env() -> ShippingTable {
    let defaults = ShippingTable::default();
    ShippingTable {
        local_region: env::var("SHIPPING_LOCAL_REGION").unwrap_or(defaults.local_region),
        local_fee: env::var("SHIPPING_LOCAL_FEE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.local_fee),
        other_fee: env::var("SHIPPING_OTHER_FEE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.other_fee),
    }
}

/// Settings for a shopper-side client of the storefront API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API, including the `/api` prefix.
    pub api_url: String,
    pub timeout: Duration,
    /// Directory holding the guest cart.
    pub data_dir: PathBuf,
    pub storage_quota: Option<usize>,
    pub shipping: ShippingTable,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            timeout: Duration::from_secs(10),
            data_dir: PathBuf::from(".storefront"),
            storage_quota: None,
            shipping: ShippingTable::default(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let api_url = env::var("STOREFRONT_API_URL")?;
        let timeout_secs = env::var("STOREFRONT_API_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let data_dir = env::var("STOREFRONT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".storefront"));
        let storage_quota = env::var("STOREFRONT_STORAGE_QUOTA")
            .ok()
            .and_then(|v| v.parse().ok());
        Ok(Self {
            api_url,
            timeout: Duration::from_secs(timeout_secs),
            data_dir,
            storage_quota,
            shipping: shipping_from_env(),
        })
    }
}
