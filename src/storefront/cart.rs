//! The shopper's cart.
//!
//! [`CartStore`] is the only writer of cart state. It holds two sources: the
//! guest cart in durable local storage and, once a signed-in shopper's cart
//! has been fetched, the account cart on the remote API. Exactly one of them
//! is active; the other is kept untouched. Signing in does not merge the
//! guest cart into the account; that only happens through
//! [`CartStore::merge_guest_into_account`].
//!
//! Every mutation is applied to local state first and published to
//! subscribers before any remote call is awaited. Remote results never
//! overwrite newer local state: each account mutation bumps a revision, and
//! fetches or rollbacks that started under an older revision are dropped.

use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};

use crate::models::{LineItem, Product};
use crate::storefront::{
    identity::Identity,
    remote::{AccountCartRecord, ApiError, CartApi},
    storage::{GuestRecord, GuestStorage, StorageError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CartSource {
    Guest,
    Account,
}

impl fmt::Display for CartSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CartSource::Guest => f.write_str("guest"),
            CartSource::Account => f.write_str("account"),
        }
    }
}

/// Items of exactly one source, tagged with that source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartSnapshot {
    pub items: Vec<LineItem>,
    pub source: CartSource,
}

impl CartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, line_id: &str) -> Option<&LineItem> {
        self.items.iter().find(|item| item.line_id == line_id)
    }
}

/// A cart record as it arrives from either source, before normalization.
#[derive(Debug, Clone)]
pub enum CartRecord {
    Guest(GuestRecord),
    Account(AccountCartRecord),
}

impl From<CartRecord> for LineItem {
    fn from(record: CartRecord) -> Self {
        match record {
            CartRecord::Guest(record) => record.into(),
            CartRecord::Account(record) => record.into(),
        }
    }
}

/// Normalizes ingested records into line items, folding duplicate line ids
/// into one line and keeping first-seen order.
pub fn normalize<I>(records: I) -> Vec<LineItem>
where
    I: IntoIterator,
    I::Item: Into<LineItem>,
{
    let mut items: Vec<LineItem> = Vec::new();
    for item in records.into_iter().map(Into::into) {
        match items.iter_mut().find(|i| i.line_id == item.line_id) {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(item.quantity),
            None => items.push(item),
        }
    }
    items
}

/// Builds the line item for adding `product` with the chosen size.
pub fn line_item_for(product: &Product, size: Option<&str>) -> Result<LineItem, CartError> {
    let variant = match size.map(str::trim).filter(|s| !s.is_empty()) {
        Some(size) if product.sizes.iter().any(|s| s == size) => Some(size.to_string()),
        Some(size) => return Err(CartError::UnknownSize(size.to_string())),
        None if !product.sizes.is_empty() => return Err(CartError::SizeRequired),
        None => None,
    };
    Ok(LineItem {
        line_id: LineItem::line_id_for(product.id, variant.as_deref()),
        product_id: product.id,
        name: product.name.clone(),
        unit_price: product.price,
        image: product.image.clone(),
        variant,
        quantity: 1,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("Please choose a size first")]
    SizeRequired,
    #[error("Size {0} is not available for this product")]
    UnknownSize(String),
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Sign in to use your account cart")]
    NotSignedIn,
    #[error("Could not load your cart")]
    Load(#[source] ApiError),
    #[error("Failed to add product")]
    Add(#[source] ApiError),
    #[error("Could not update quantity")]
    Update(#[source] ApiError),
    #[error("Could not remove item")]
    Remove(#[source] ApiError),
    #[error("Could not clear cart")]
    Clear(#[source] ApiError),
    #[error("Could not move your saved items into your account")]
    Merge(#[source] ApiError),
}

#[derive(Debug, thiserror::Error)]
pub enum CartWarning {
    #[error("Your cart is saved for this session only and will not survive a reload")]
    NotPersisted(#[source] StorageError),
}

/// Outcome of an accepted mutation.
#[derive(Debug)]
pub struct Mutation {
    pub snapshot: CartSnapshot,
    pub warning: Option<CartWarning>,
}

#[derive(Debug)]
struct AccountCart {
    identity: Identity,
    /// `None` until the first fetch for this identity resolves.
    items: Option<Vec<LineItem>>,
    loading: bool,
    revision: u64,
}

#[derive(Debug, Default)]
struct CartState {
    guest: Vec<LineItem>,
    /// The in-memory guest cart holds changes storage refused.
    guest_unsaved: bool,
    account: Option<AccountCart>,
}

impl CartState {
    fn active_source(&self) -> CartSource {
        match &self.account {
            Some(AccountCart { items: Some(_), .. }) => CartSource::Account,
            _ => CartSource::Guest,
        }
    }

    fn snapshot(&self) -> CartSnapshot {
        match &self.account {
            Some(AccountCart {
                items: Some(items),
                ..
            }) => CartSnapshot {
                items: items.clone(),
                source: CartSource::Account,
            },
            _ => CartSnapshot {
                items: self.guest.clone(),
                source: CartSource::Guest,
            },
        }
    }

    fn active_items_mut(&mut self) -> &mut Vec<LineItem> {
        match &mut self.account {
            Some(AccountCart {
                items: Some(items),
                ..
            }) => items,
            _ => &mut self.guest,
        }
    }
}

/// A local edit that has been applied and still needs persisting.
enum Applied {
    Guest {
        items: Vec<LineItem>,
    },
    Account {
        identity: Identity,
        previous: Vec<LineItem>,
        revision: u64,
    },
}

pub struct CartStore {
    storage: Arc<dyn GuestStorage>,
    api: Arc<dyn CartApi>,
    state: Mutex<CartState>,
    snapshots: watch::Sender<CartSnapshot>,
}

impl fmt::Debug for CartStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CartStore")
            .field("state", &*self.lock())
            .finish_non_exhaustive()
    }
}

impl CartStore {
    /// Creates the store with the guest cart read from `storage`.
    ///
    /// An unreadable guest cart is logged and treated as empty.
    pub fn new(storage: Arc<dyn GuestStorage>, api: Arc<dyn CartApi>) -> Self {
        let guest = match storage.load() {
            Ok(items) => normalize(items),
            Err(err) => {
                tracing::warn!(error = %err, "guest cart unreadable, starting empty");
                Vec::new()
            }
        };
        let state = CartState {
            guest,
            guest_unsaved: false,
            account: None,
        };
        let (snapshots, _rx) = watch::channel(state.snapshot());
        Self {
            storage,
            api,
            state: Mutex::new(state),
            snapshots,
        }
    }

    pub fn snapshot(&self) -> CartSnapshot {
        self.lock().snapshot()
    }

    pub fn items(&self) -> Vec<LineItem> {
        self.snapshot().items
    }

    /// True while the signed-in shopper's cart is being fetched.
    pub fn is_loading(&self) -> bool {
        self.lock().account.as_ref().is_some_and(|a| a.loading)
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().account.as_ref().map(|a| a.identity.clone())
    }

    pub fn subscribe(&self) -> watch::Receiver<CartSnapshot> {
        self.snapshots.subscribe()
    }

    /// Adds `quantity` units of `item`, merging with an existing line of the
    /// same `line_id`.
    pub async fn add_item(&self, item: LineItem, quantity: u32) -> Result<Mutation, CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity);
        }
        let mut item = item;
        item.quantity = quantity;

        let applied = self.apply(|items| {
            match items.iter_mut().find(|i| i.line_id == item.line_id) {
                Some(existing) => existing.quantity = existing.quantity.saturating_add(quantity),
                None => items.push(item.clone()),
            }
            true
        });
        let Some(applied) = applied else {
            return Ok(self.unchanged());
        };

        match applied {
            Applied::Guest { items } => Ok(self.persist_guest(&items)),
            Applied::Account {
                identity,
                previous,
                revision,
            } => match self.api.add(&identity, &item).await {
                Ok(record_id) => {
                    tracing::debug!(line_id = %item.line_id, %record_id, "cart line saved");
                    Ok(self.unchanged())
                }
                Err(err) => Err(self.roll_back(&identity, previous, revision, CartError::Add(err))),
            },
        }
    }

    /// Removes the line if present. Removing an absent line is a no-op.
    pub async fn remove_item(&self, line_id: &str) -> Result<Mutation, CartError> {
        let applied = self.apply(|items| {
            let before = items.len();
            items.retain(|i| i.line_id != line_id);
            items.len() != before
        });
        let Some(applied) = applied else {
            return Ok(self.unchanged());
        };

        match applied {
            Applied::Guest { items } => Ok(self.persist_guest(&items)),
            Applied::Account {
                identity,
                previous,
                revision,
            } => match self.api.remove(&identity, line_id).await {
                Ok(()) => Ok(self.unchanged()),
                Err(err) => {
                    Err(self.roll_back(&identity, previous, revision, CartError::Remove(err)))
                }
            },
        }
    }

    /// Adjusts a line's quantity by `delta`, never going below 1.
    ///
    /// Decrementing a line at quantity 1 leaves it in place; use
    /// [`remove_item`](Self::remove_item) to drop it.
    pub async fn update_quantity(&self, line_id: &str, delta: i64) -> Result<Mutation, CartError> {
        let mut target = 0_u32;
        let applied = self.apply(|items| {
            let Some(item) = items.iter_mut().find(|i| i.line_id == line_id) else {
                return false;
            };
            let wanted = i64::from(item.quantity)
                .saturating_add(delta)
                .clamp(1, i64::from(u32::MAX));
            let wanted = u32::try_from(wanted).unwrap_or(u32::MAX);
            if wanted == item.quantity {
                return false;
            }
            item.quantity = wanted;
            target = wanted;
            true
        });
        let Some(applied) = applied else {
            return Ok(self.unchanged());
        };

        match applied {
            Applied::Guest { items } => Ok(self.persist_guest(&items)),
            Applied::Account {
                identity,
                previous,
                revision,
            } => match self.api.set_quantity(&identity, line_id, target).await {
                Ok(()) => Ok(self.unchanged()),
                Err(err) => {
                    Err(self.roll_back(&identity, previous, revision, CartError::Update(err)))
                }
            },
        }
    }

    /// Empties the active source.
    pub async fn clear(&self) -> Result<Mutation, CartError> {
        let applied = self.apply(|items| {
            let changed = !items.is_empty();
            items.clear();
            changed
        });
        let Some(applied) = applied else {
            return Ok(self.unchanged());
        };

        match applied {
            Applied::Guest { items } => Ok(self.persist_guest(&items)),
            Applied::Account {
                identity,
                previous,
                revision,
            } => match self.api.clear(&identity).await {
                Ok(()) => Ok(self.unchanged()),
                Err(err) => {
                    Err(self.roll_back(&identity, previous, revision, CartError::Clear(err)))
                }
            },
        }
    }

    /// Switches the active source for a new auth state.
    ///
    /// Signing in starts a fetch of the account cart; the guest cart stays
    /// active until that fetch resolves. Signing out drops the account cart
    /// from memory and makes the guest cart active again.
    pub async fn set_identity(&self, identity: Option<Identity>) -> Result<(), CartError> {
        let Some(identity) = identity else {
            let signed_out = self.lock().account.take();
            if let Some(account) = signed_out {
                tracing::info!(email = %account.identity.email, "cart switched to guest source");
                self.publish();
            }
            return Ok(());
        };

        {
            let mut state = self.lock();
            if let Some(account) = state.account.as_mut() {
                if account.identity.same_account(&identity) {
                    // Token refresh for the same shopper.
                    account.identity = identity.clone();
                    if account.items.is_some() || account.loading {
                        return Ok(());
                    }
                } else {
                    state.account = None;
                }
            }
            if state.account.is_none() {
                tracing::info!(email = %identity.email, "cart switching to account source");
                state.account = Some(AccountCart {
                    identity,
                    items: None,
                    loading: false,
                    revision: 0,
                });
            }
        }
        self.publish();
        self.refetch().await.map(|_| ())
    }

    /// Follows an auth state channel until its sender is dropped.
    pub fn watch_identity(
        self: Arc<Self>,
        mut changes: watch::Receiver<Option<Identity>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let identity = changes.borrow_and_update().clone();
                if let Err(err) = self.set_identity(identity).await {
                    tracing::warn!(error = %err, "cart source switch incomplete");
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Re-reads the active source.
    ///
    /// For a signed-in shopper this fetches the account cart. The response
    /// is dropped if the shopper changed or the account cart was mutated
    /// locally while the request was in flight.
    pub async fn refetch(&self) -> Result<CartSnapshot, CartError> {
        let request = {
            let mut state = self.lock();
            match state.account.as_mut() {
                Some(account) => {
                    account.loading = true;
                    Some((account.identity.clone(), account.revision))
                }
                None => None,
            }
        };
        let Some((identity, revision)) = request else {
            return Ok(self.reload_guest());
        };

        let result = self.api.fetch(&identity).await;

        let mut state = self.lock();
        let Some(account) = state
            .account
            .as_mut()
            .filter(|a| a.identity.same_account(&identity))
        else {
            tracing::debug!(email = %identity.email, "discarding cart fetch for signed-out shopper");
            return Ok(state.snapshot());
        };
        account.loading = false;

        match result {
            Ok(records) if account.revision == revision => {
                account.items = Some(normalize(records.into_iter().map(CartRecord::Account)));
                account.revision += 1;
                let snapshot = state.snapshot();
                drop(state);
                self.snapshots.send_replace(snapshot.clone());
                Ok(snapshot)
            }
            Ok(_) => {
                tracing::debug!(email = %identity.email, "discarding stale cart fetch");
                Ok(state.snapshot())
            }
            Err(err) => {
                tracing::warn!(email = %identity.email, error = %err, "cart fetch failed");
                drop(state);
                self.publish();
                Err(CartError::Load(err))
            }
        }
    }

    /// Moves every guest line into the account cart, adding quantities to
    /// lines the account already has. The guest cart is emptied only when
    /// every line was saved remotely.
    pub async fn merge_guest_into_account(&self) -> Result<Mutation, CartError> {
        let (identity, guest) = {
            let mut state = self.lock();
            let guest = state.guest.clone();
            let Some(account) = state.account.as_mut() else {
                return Err(CartError::NotSignedIn);
            };
            let Some(items) = account.items.as_mut() else {
                return Err(CartError::NotSignedIn);
            };
            if guest.is_empty() {
                drop(state);
                return Ok(self.unchanged());
            }
            for incoming in &guest {
                match items.iter_mut().find(|i| i.line_id == incoming.line_id) {
                    Some(existing) => {
                        existing.quantity = existing.quantity.saturating_add(incoming.quantity)
                    }
                    None => items.push(incoming.clone()),
                }
            }
            account.revision += 1;
            (account.identity.clone(), guest)
        };
        self.publish();

        for item in &guest {
            if let Err(err) = self.api.add(&identity, item).await {
                tracing::warn!(line_id = %item.line_id, error = %err, "guest line not merged");
                // Partially merged; resync with what the server holds.
                if let Err(resync) = self.refetch().await {
                    tracing::warn!(error = %resync, "cart resync after failed merge failed");
                }
                return Err(CartError::Merge(err));
            }
        }

        tracing::info!(email = %identity.email, lines = guest.len(), "guest cart merged");
        self.lock().guest.clear();
        Ok(self.persist_guest(&[]))
    }

    fn lock(&self) -> MutexGuard<'_, CartState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.snapshots.send_replace(snapshot);
    }

    fn unchanged(&self) -> Mutation {
        Mutation {
            snapshot: self.snapshot(),
            warning: None,
        }
    }

    /// Applies `edit` to the active source. `edit` returns whether anything
    /// changed; `None` means the mutation was a no-op.
    fn apply(&self, edit: impl FnOnce(&mut Vec<LineItem>) -> bool) -> Option<Applied> {
        let applied = {
            let mut state = self.lock();
            let source = state.active_source();
            let previous = state.active_items_mut().clone();
            if !edit(state.active_items_mut()) {
                return None;
            }
            let account_edit = match state.account.as_mut() {
                Some(account) if source == CartSource::Account => {
                    account.revision += 1;
                    Some(Applied::Account {
                        identity: account.identity.clone(),
                        previous,
                        revision: account.revision,
                    })
                }
                _ => None,
            };
            match account_edit {
                Some(applied) => applied,
                None => Applied::Guest {
                    items: state.guest.clone(),
                },
            }
        };
        self.publish();
        Some(applied)
    }

    fn persist_guest(&self, items: &[LineItem]) -> Mutation {
        let warning = match self.storage.save(items) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(error = %err, "guest cart kept in memory only");
                Some(CartWarning::NotPersisted(err))
            }
        };
        self.lock().guest_unsaved = warning.is_some();
        Mutation {
            snapshot: self.snapshot(),
            warning,
        }
    }

    /// Restores `previous` after a failed remote mutation, unless a newer
    /// local mutation has happened since.
    fn roll_back(
        &self,
        identity: &Identity,
        previous: Vec<LineItem>,
        revision: u64,
        error: CartError,
    ) -> CartError {
        tracing::warn!(
            error = %error,
            cause = ?std::error::Error::source(&error),
            "account cart mutation failed"
        );
        let restored = {
            let mut state = self.lock();
            match state.account.as_mut() {
                Some(account)
                    if account.identity.same_account(identity)
                        && account.revision == revision =>
                {
                    account.items = Some(previous);
                    account.revision += 1;
                    true
                }
                _ => false,
            }
        };
        if restored {
            self.publish();
        }
        error
    }

    /// Re-reads the guest cart from storage, unless memory holds changes
    /// storage could not take.
    fn reload_guest(&self) -> CartSnapshot {
        if self.lock().guest_unsaved {
            tracing::debug!("guest cart has unsaved changes, keeping memory copy");
            return self.snapshot();
        }
        match self.storage.load() {
            Ok(items) => {
                self.lock().guest = normalize(items);
                self.publish();
            }
            Err(err) => tracing::warn!(error = %err, "guest cart reload failed, keeping memory copy"),
        }
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;
    use uuid::Uuid;

    use super::*;
    use crate::storefront::{memory::MemoryBackend, storage::MemoryStorage};

    /// Delegates to a [`MemoryBackend`], but can park a fetch after it has
    /// read the server cart, and can park then fail adds of one line.
    struct GatedCart {
        inner: Arc<MemoryBackend>,
        hold_fetch: AtomicBool,
        failing_line: Option<String>,
        entered: Notify,
        release: Notify,
    }

    impl GatedCart {
        fn new(inner: Arc<MemoryBackend>, failing_line: Option<String>) -> Self {
            Self {
                inner,
                hold_fetch: AtomicBool::new(false),
                failing_line,
                entered: Notify::new(),
                release: Notify::new(),
            }
        }

        async fn park(&self) {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }

    #[async_trait]
    impl CartApi for GatedCart {
        async fn fetch(&self, identity: &Identity) -> Result<Vec<AccountCartRecord>, ApiError> {
            let records = CartApi::fetch(self.inner.as_ref(), identity).await;
            if self.hold_fetch.load(Ordering::SeqCst) {
                self.park().await;
            }
            records
        }

        async fn add(&self, identity: &Identity, item: &LineItem) -> Result<Uuid, ApiError> {
            if self.failing_line.as_deref() == Some(item.line_id.as_str()) {
                self.park().await;
                return Err(ApiError::Network("connection reset".into()));
            }
            self.inner.add(identity, item).await
        }

        async fn set_quantity(
            &self,
            identity: &Identity,
            line_id: &str,
            quantity: u32,
        ) -> Result<(), ApiError> {
            self.inner.set_quantity(identity, line_id, quantity).await
        }

        async fn remove(&self, identity: &Identity, line_id: &str) -> Result<(), ApiError> {
            self.inner.remove(identity, line_id).await
        }

        async fn clear(&self, identity: &Identity) -> Result<(), ApiError> {
            self.inner.clear(identity).await
        }
    }

    fn item(unit_price: i64) -> LineItem {
        let product_id = Uuid::new_v4();
        LineItem {
            line_id: product_id.to_string(),
            product_id,
            name: "Cotton Panjabi".into(),
            unit_price,
            image: None,
            variant: None,
            quantity: 1,
        }
    }

    fn guest_store() -> (Arc<MemoryStorage>, Arc<MemoryBackend>, CartStore) {
        let storage = Arc::new(MemoryStorage::new());
        let backend = Arc::new(MemoryBackend::new());
        let store = CartStore::new(storage.clone(), backend.clone());
        (storage, backend, store)
    }

    fn shopper() -> Identity {
        Identity::new("shopper@example.com", "token")
    }

    #[tokio::test]
    async fn adding_same_line_twice_merges_quantity() {
        let (storage, _, store) = guest_store();
        let a = item(500);

        store.add_item(a.clone(), 1).await.unwrap();
        let mutation = store.add_item(a.clone(), 1).await.unwrap();

        assert_eq!(mutation.snapshot.source, CartSource::Guest);
        assert_eq!(mutation.snapshot.items.len(), 1);
        assert_eq!(mutation.snapshot.items[0].quantity, 2);
        assert_eq!(storage.load().unwrap()[0].quantity, 2);
    }

    #[tokio::test]
    async fn zero_quantity_add_is_rejected() {
        let (_, _, store) = guest_store();
        let err = store.add_item(item(10), 0).await.unwrap_err();
        assert!(matches!(err, CartError::InvalidQuantity));
    }

    #[tokio::test]
    async fn quantity_never_drops_below_one() {
        let (_, _, store) = guest_store();
        let a = item(100);
        store.add_item(a.clone(), 3).await.unwrap();

        for delta in [-5, -1, -1_000, i64::MIN] {
            let snapshot = store.update_quantity(&a.line_id, delta).await.unwrap().snapshot;
            assert_eq!(snapshot.items[0].quantity, 1);
        }
        let snapshot = store.update_quantity(&a.line_id, 4).await.unwrap().snapshot;
        assert_eq!(snapshot.items[0].quantity, 5);
    }

    #[tokio::test]
    async fn removing_twice_is_a_no_op() {
        let (_, _, store) = guest_store();
        let a = item(100);
        let b = item(200);
        store.add_item(a.clone(), 1).await.unwrap();
        store.add_item(b.clone(), 1).await.unwrap();

        let first = store.remove_item(&a.line_id).await.unwrap().snapshot;
        let second = store.remove_item(&a.line_id).await.unwrap().snapshot;

        assert_eq!(first, second);
        assert_eq!(second.items, vec![b]);
    }

    #[tokio::test]
    async fn removing_unknown_line_leaves_cart_unchanged() {
        let (_, _, store) = guest_store();
        store.add_item(item(100), 1).await.unwrap();
        let before = store.snapshot();

        let after = store.remove_item("missing").await.unwrap().snapshot;

        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn storage_quota_keeps_mutation_in_memory_with_warning() {
        let storage = Arc::new(MemoryStorage::with_quota(8));
        let store = CartStore::new(storage, Arc::new(MemoryBackend::new()));

        let mutation = store.add_item(item(100), 1).await.unwrap();

        assert!(matches!(mutation.warning, Some(CartWarning::NotPersisted(_))));
        assert_eq!(mutation.snapshot.items.len(), 1);
    }

    #[tokio::test]
    async fn refetch_keeps_guest_changes_storage_refused() {
        let storage = Arc::new(MemoryStorage::with_quota(8));
        let store = CartStore::new(storage.clone(), Arc::new(MemoryBackend::new()));
        let a = item(100);

        let mutation = store.add_item(a.clone(), 1).await.unwrap();
        assert!(mutation.warning.is_some());

        let snapshot = store.refetch().await.unwrap();

        assert_eq!(snapshot.source, CartSource::Guest);
        assert_eq!(snapshot.items, vec![a]);
        assert!(storage.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn refetch_rereads_saved_guest_cart() {
        let (storage, _, store) = guest_store();
        let a = item(100);
        store.add_item(a.clone(), 1).await.unwrap();
        let b = item(200);
        storage.save(&[a.clone(), b.clone()]).unwrap();

        let snapshot = store.refetch().await.unwrap();

        assert_eq!(snapshot.items, vec![a, b]);
    }

    #[tokio::test]
    async fn sign_in_switches_source_without_merging() {
        let (_, backend, store) = guest_store();
        let guest_item = item(100);
        let account_item = item(700);
        store.add_item(guest_item.clone(), 1).await.unwrap();
        backend.add(&shopper(), &account_item).await.unwrap();

        store.set_identity(Some(shopper())).await.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.source, CartSource::Account);
        assert_eq!(snapshot.items, vec![account_item]);

        store.set_identity(None).await.unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.source, CartSource::Guest);
        assert_eq!(snapshot.items, vec![guest_item]);
    }

    #[tokio::test]
    async fn failed_account_fetch_keeps_guest_source() {
        let (_, backend, store) = guest_store();
        store.add_item(item(100), 1).await.unwrap();
        backend.set_offline(true);

        let err = store.set_identity(Some(shopper())).await.unwrap_err();

        assert!(matches!(err, CartError::Load(_)));
        assert_eq!(store.snapshot().source, CartSource::Guest);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn account_mutations_reach_the_server() {
        let (_, backend, store) = guest_store();
        store.set_identity(Some(shopper())).await.unwrap();
        let a = item(250);

        store.add_item(a.clone(), 2).await.unwrap();
        store.update_quantity(&a.line_id, 1).await.unwrap();

        let remote = backend.cart_of("shopper@example.com");
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].quantity, 3);

        store.remove_item(&a.line_id).await.unwrap();
        assert!(backend.cart_of("shopper@example.com").is_empty());
    }

    #[tokio::test]
    async fn failed_account_mutation_rolls_back() {
        let (_, backend, store) = guest_store();
        store.set_identity(Some(shopper())).await.unwrap();
        let a = item(250);
        store.add_item(a.clone(), 1).await.unwrap();
        backend.set_offline(true);

        let err = store.remove_item(&a.line_id).await.unwrap_err();

        assert!(matches!(err, CartError::Remove(_)));
        assert_eq!(err.to_string(), "Could not remove item");
        assert_eq!(store.items(), vec![a]);
    }

    #[tokio::test]
    async fn fetch_resolving_after_local_mutation_is_discarded() {
        let backend = Arc::new(MemoryBackend::new());
        let gated = Arc::new(GatedCart::new(backend.clone(), None));
        let store = Arc::new(CartStore::new(Arc::new(MemoryStorage::new()), gated.clone()));
        store.set_identity(Some(shopper())).await.unwrap();

        let elsewhere = item(900);
        backend.add(&shopper(), &elsewhere).await.unwrap();
        gated.hold_fetch.store(true, Ordering::SeqCst);
        let refetch = tokio::spawn({
            let store = store.clone();
            async move { store.refetch().await }
        });
        gated.entered.notified().await;

        let local = item(250);
        store.add_item(local.clone(), 1).await.unwrap();
        gated.release.notify_one();
        refetch.await.unwrap().unwrap();

        assert_eq!(store.items(), vec![local]);
        assert_eq!(store.snapshot().source, CartSource::Account);
        assert!(!store.is_loading());
    }

    #[tokio::test]
    async fn failed_mutation_keeps_newer_local_state() {
        let backend = Arc::new(MemoryBackend::new());
        let first = item(100);
        let gated = Arc::new(GatedCart::new(backend.clone(), Some(first.line_id.clone())));
        let store = Arc::new(CartStore::new(Arc::new(MemoryStorage::new()), gated.clone()));
        store.set_identity(Some(shopper())).await.unwrap();

        let pending = tokio::spawn({
            let store = store.clone();
            let first = first.clone();
            async move { store.add_item(first, 1).await }
        });
        gated.entered.notified().await;

        let second = item(200);
        store.add_item(second.clone(), 1).await.unwrap();
        gated.release.notify_one();
        let err = pending.await.unwrap().unwrap_err();

        assert!(matches!(err, CartError::Add(_)));
        assert_eq!(store.items(), vec![first, second.clone()]);
        assert_eq!(backend.cart_of("shopper@example.com"), vec![second]);
    }

    #[tokio::test]
    async fn merge_moves_guest_lines_into_account() {
        let (storage, backend, store) = guest_store();
        let shared = item(300);
        store.add_item(shared.clone(), 2).await.unwrap();
        backend.add(&shopper(), &shared).await.unwrap();
        store.set_identity(Some(shopper())).await.unwrap();

        let mutation = store.merge_guest_into_account().await.unwrap();

        assert_eq!(mutation.snapshot.source, CartSource::Account);
        assert_eq!(mutation.snapshot.items[0].quantity, 3);
        assert_eq!(backend.cart_of("shopper@example.com")[0].quantity, 3);
        assert!(storage.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_requires_a_loaded_account() {
        let (_, _, store) = guest_store();
        let err = store.merge_guest_into_account().await.unwrap_err();
        assert!(matches!(err, CartError::NotSignedIn));
    }

    #[tokio::test]
    async fn subscribers_see_each_mutation() {
        let (_, _, store) = guest_store();
        let mut rx = store.subscribe();
        let a = item(90);

        store.add_item(a.clone(), 1).await.unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().items, vec![a]);
    }

    #[test]
    fn duplicate_records_are_folded_on_ingestion() {
        let a = item(40);
        let mut again = a.clone();
        again.quantity = 2;
        let items = normalize(vec![a.clone(), again]);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 3);
    }

    #[test]
    fn sized_products_require_a_size() {
        let product = Product {
            id: Uuid::new_v4(),
            name: "Hoodie".into(),
            description: None,
            category: None,
            price: 1200,
            image: None,
            sizes: vec!["M".into(), "L".into()],
            stock: 5,
            created_at: chrono::Utc::now(),
        };
        assert!(matches!(
            line_item_for(&product, None),
            Err(CartError::SizeRequired)
        ));
        assert!(matches!(
            line_item_for(&product, Some("XS")),
            Err(CartError::UnknownSize(_))
        ));
        let line = line_item_for(&product, Some("L")).unwrap();
        assert_eq!(line.line_id, format!("{}-L", product.id));
    }
}
