//! Durable client-side storage for the guest cart.
//!
//! The guest cart lives under the key [`CART_KEY`] as a JSON array. Records
//! written by older clients may lack a quantity or carry the product id
//! under a different name; they are normalized to [`LineItem`] on load.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::LineItem;

pub const CART_KEY: &str = "cart";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded ({needed} bytes needed, {quota} available)")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("storage unavailable: {0}")]
    Io(#[from] io::Error),
    #[error("stored cart is unreadable: {0}")]
    Serde(#[from] serde_json::Error),
}

pub trait GuestStorage: Send + Sync {
    fn load(&self) -> Result<Vec<LineItem>, StorageError>;
    fn save(&self, items: &[LineItem]) -> Result<(), StorageError>;
}

/// Guest cart record as found in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestRecord {
    #[serde(alias = "_id")]
    pub line_id: Option<String>,
    #[serde(alias = "original_id")]
    pub product_id: Uuid,
    pub name: String,
    #[serde(alias = "price")]
    pub unit_price: i64,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default, alias = "size")]
    pub variant: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
}

impl From<GuestRecord> for LineItem {
    fn from(record: GuestRecord) -> Self {
        let line_id = LineItem::line_id_for(record.product_id, record.variant.as_deref());
        LineItem {
            line_id,
            product_id: record.product_id,
            name: record.name,
            unit_price: record.unit_price,
            image: record.image,
            variant: record.variant,
            quantity: record.quantity.unwrap_or(1).max(1),
        }
    }
}

impl From<&LineItem> for GuestRecord {
    fn from(item: &LineItem) -> Self {
        GuestRecord {
            line_id: Some(item.line_id.clone()),
            product_id: item.product_id,
            name: item.name.clone(),
            unit_price: item.unit_price,
            image: item.image.clone(),
            variant: item.variant.clone(),
            quantity: Some(item.quantity),
        }
    }
}

fn decode(raw: &str) -> Result<Vec<GuestRecord>, StorageError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(raw)?)
}

fn encode(items: &[LineItem], quota: Option<usize>) -> Result<String, StorageError> {
    let records: Vec<GuestRecord> = items.iter().map(GuestRecord::from).collect();
    let raw = serde_json::to_string(&records)?;
    if let Some(quota) = quota {
        if raw.len() > quota {
            return Err(StorageError::QuotaExceeded {
                needed: raw.len(),
                quota,
            });
        }
    }
    Ok(raw)
}

/// Stores the guest cart as `<dir>/cart.json`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    quota: Option<usize>,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{CART_KEY}.json")),
            quota: None,
        }
    }

    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GuestStorage for FileStorage {
    fn load(&self) -> Result<Vec<LineItem>, StorageError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(decode(&raw)?.into_iter().map(LineItem::from).collect())
    }

    fn save(&self, items: &[LineItem]) -> Result<(), StorageError> {
        let raw = encode(items, self.quota)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Process-local storage, used when no durable location is configured.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    slot: Mutex<Option<String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(bytes: usize) -> Self {
        Self {
            slot: Mutex::new(None),
            quota: Some(bytes),
        }
    }

    /// Seeds the raw stored value, as a previous session would have left it.
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(raw.into())),
            quota: None,
        }
    }
}

impl GuestStorage for MemoryStorage {
    fn load(&self) -> Result<Vec<LineItem>, StorageError> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_deref() {
            Some(raw) => Ok(decode(raw)?.into_iter().map(LineItem::from).collect()),
            None => Ok(Vec::new()),
        }
    }

    fn save(&self, items: &[LineItem]) -> Result<(), StorageError> {
        let raw = encode(items, self.quota)?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(raw);
        Ok(())
    }
}
