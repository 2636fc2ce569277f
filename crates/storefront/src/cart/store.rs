//! Key-value persistence for the guest cart.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::{CartItem, clamp_quantity};
use crate::error::{Result, StoreError};

/// Key under which the guest cart is stored, as a JSON array of lines.
pub const GUEST_CART_KEY: &str = "guestCart";

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when the key is absent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the backing storage fails.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the backing storage fails.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key. Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the backing storage fails.
    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// Load the guest cart; an absent key is an empty cart.
///
/// Stored lines are held to the same rules as server lines: quantities are
/// clamped into `1..=MAX_LINE_QUANTITY` and prices floored at zero.
///
/// # Errors
///
/// Returns `StoreError::Persistence` if the store fails or holds malformed
/// JSON.
pub fn load_guest_items(store: &impl KeyValueStore) -> Result<Vec<CartItem>> {
    match store.get(GUEST_CART_KEY)? {
        None => Ok(Vec::new()),
        Some(raw) if raw.trim().is_empty() => Ok(Vec::new()),
        Some(raw) => serde_json::from_str::<Vec<CartItem>>(&raw)
            .map(|items| items.into_iter().map(normalize_stored_line).collect())
            .map_err(|e| StoreError::Persistence(format!("malformed guest cart: {e}"))),
    }
}

fn normalize_stored_line(mut item: CartItem) -> CartItem {
    let quantity = clamp_quantity(i64::from(item.quantity));
    let unit_price = item.unit_price.max(Decimal::ZERO);
    if quantity != item.quantity || unit_price != item.unit_price {
        warn!(
            item_id = %item.id,
            stored_quantity = item.quantity,
            stored_price = %item.unit_price,
            "Stored guest line out of range, normalized"
        );
        item.quantity = quantity;
        item.unit_price = unit_price;
    }
    item
}

/// Persist the guest cart; an empty cart removes the key.
///
/// # Errors
///
/// Returns `StoreError::Persistence` if the store fails.
pub fn save_guest_items(store: &impl KeyValueStore, items: &[CartItem]) -> Result<()> {
    if items.is_empty() {
        return store.remove(GUEST_CART_KEY);
    }
    let raw = serde_json::to_string(items)
        .map_err(|e| StoreError::Internal(format!("cannot encode guest cart: {e}")))?;
    store.set(GUEST_CART_KEY, &raw)
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-process store, for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

// =============================================================================
// FileStore
// =============================================================================

/// One file per key inside a directory.
///
/// Writes go to a temporary file that is renamed into place, so a crash never
/// leaves a half-written cart behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Persistence` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            StoreError::Persistence(format!("cannot create {}: {e}", dir.display()))
        })?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
        if !valid {
            return Err(StoreError::Persistence(format!("invalid store key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Persistence(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)
            .and_then(|()| fs::rename(&tmp, &path))
            .map_err(|e| {
                StoreError::Persistence(format!("cannot write {}: {e}", path.display()))
            })?;
        debug!(key, path = %path.display(), "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Persistence(format!(
                "cannot remove {}: {e}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hearth_core::{CartItemId, LogisticType, ProductId};
    use rust_decimal::Decimal;

    use super::*;

    fn guest_line(product: i64) -> CartItem {
        CartItem {
            id: CartItemId::guest(ProductId::new(product), None),
            product_ref: ProductId::new(product),
            name: "Almohada".to_string(),
            unit_price: Decimal::new(1999, 2),
            quantity: 2,
            measure: None,
            logistic_type: LogisticType::Small,
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hearth-store-{name}-{}", std::process::id()))
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(load_guest_items(&store).unwrap().is_empty());

        save_guest_items(&store, &[guest_line(1)]).unwrap();
        assert_eq!(load_guest_items(&store).unwrap(), vec![guest_line(1)]);

        save_guest_items(&store, &[]).unwrap();
        assert_eq!(store.get(GUEST_CART_KEY).unwrap(), None);
    }

    #[test]
    fn test_malformed_guest_cart_is_persistence_error() {
        let store = MemoryStore::new();
        store.set(GUEST_CART_KEY, "{not json").unwrap();
        assert!(matches!(
            load_guest_items(&store),
            Err(StoreError::Persistence(_))
        ));
    }

    #[test]
    fn test_stored_lines_are_normalized_on_load() {
        let store = MemoryStore::new();
        let mut too_many = guest_line(1);
        too_many.quantity = 9;
        let mut none = guest_line(2);
        none.quantity = 0;
        let mut negative = guest_line(3);
        negative.unit_price = Decimal::from(-5);
        let raw = serde_json::to_string(&[too_many, none, negative]).unwrap();
        store.set(GUEST_CART_KEY, &raw).unwrap();

        let items = load_guest_items(&store).unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].quantity, 5);
        assert_eq!(items[1].quantity, 1);
        assert_eq!(items[2].quantity, 2);
        assert_eq!(items[2].unit_price, Decimal::ZERO);
        assert_eq!(items[0].unit_price, Decimal::new(1999, 2));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = temp_dir("roundtrip");
        let store = FileStore::open(&dir).unwrap();

        store.set(GUEST_CART_KEY, "[]").unwrap();
        assert_eq!(store.get(GUEST_CART_KEY).unwrap().as_deref(), Some("[]"));
        assert!(dir.join("guestCart.json").exists());

        store.remove(GUEST_CART_KEY).unwrap();
        store.remove(GUEST_CART_KEY).unwrap();
        assert_eq!(store.get(GUEST_CART_KEY).unwrap(), None);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_file_store_rejects_path_keys() {
        let dir = temp_dir("keys");
        let store = FileStore::open(&dir).unwrap();
        assert!(store.set("../escape", "x").is_err());
        assert!(store.get("").is_err());
        fs::remove_dir_all(dir).unwrap();
    }
}
