//! `localStorage` as a [`KeyValueStore`]

use motus_core::store::{KeyValueStore, StoreError};

/// Key the auth flow stores the backend bearer token under
pub const API_TOKEN_KEY: &str = "motus.api_token";

/// Stateless handle; every call looks up `window.localStorage`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorageStore;

#[cfg(target_arch = "wasm32")]
impl LocalStorageStore {
    fn storage() -> Result<web_sys::Storage, StoreError> {
        web_sys::window()
            .ok_or_else(|| StoreError::Unavailable("no window".to_string()))?
            .local_storage()
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))?
            .ok_or_else(|| StoreError::Unavailable("localStorage is disabled".to_string()))
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for LocalStorageStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::storage()?
            .get_item(key)
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        // Quota errors surface here
        Self::storage()?
            .set_item(key, value)
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        Self::storage()?
            .remove_item(key)
            .map_err(|e| StoreError::Unavailable(format!("{:?}", e)))
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl KeyValueStore for LocalStorageStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(native_unavailable())
    }

    fn set(&mut self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(native_unavailable())
    }

    fn remove(&mut self, _key: &str) -> Result<(), StoreError> {
        Err(native_unavailable())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn native_unavailable() -> StoreError {
    StoreError::Unavailable("localStorage not available in native mode".to_string())
}
