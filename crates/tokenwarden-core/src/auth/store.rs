//! Durable persistence for the access and renewal credentials.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::{debug, warn};

use super::AuthHeader;

/// Storage key for the access credential
pub const ACCESS_KEY: &str = "jwt_access_token";

/// Storage key for the renewal credential
pub const RENEWAL_KEY: &str = "jwt_refresh_token";

/// Keychain service name for the keyring backend
const SERVICE_NAME: &str = "tokenwarden";

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Durable string key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process storage; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// A JSON object file in the cache directory.
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            path: cache_dir.join(SESSION_FILE),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)
            .context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    /// Write via a temp file and rename so a crash never leaves half a file.
    fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        if values.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(values)?;
        let tmp_path = self
            .path
            .with_file_name(format!("{}.{}.tmp", SESSION_FILE, std::process::id()));
        std::fs::write(&tmp_path, contents).context("Failed to write session file")?;
        std::fs::rename(&tmp_path, &self.path).context("Failed to replace session file")?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.load()?;
        values.insert(key.to_string(), value.to_string());
        self.save(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut values = self.load()?;
        if values.remove(key).is_some() {
            self.save(&values)?;
        }
        Ok(())
    }
}

/// OS keychain storage, one entry per key.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key).context("Failed to create keyring entry")
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve credential from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .context("Failed to store credential in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}

/// Access/renewal credential persistence plus the default authorization
/// header. This is the only writer of that header.
pub struct CredentialStore {
    backend: Box<dyn KeyValueStore>,
    header: AuthHeader,
}

impl CredentialStore {
    pub fn new(backend: Box<dyn KeyValueStore>, header: AuthHeader) -> Self {
        Self { backend, header }
    }

    pub fn header(&self) -> &AuthHeader {
        &self.header
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &dyn KeyValueStore {
        self.backend.as_ref()
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read credential, treating as absent");
                None
            }
        }
    }

    pub fn get_access(&self) -> Option<String> {
        self.read(ACCESS_KEY)
    }

    pub fn get_renewal(&self) -> Option<String> {
        self.read(RENEWAL_KEY)
    }

    /// Persist the access credential (and the renewal credential, if given)
    /// and install it as the default authorization header. An empty access
    /// credential clears everything instead.
    pub fn set(&self, access: &str, renewal: Option<&str>) -> Result<()> {
        if access.is_empty() {
            return self.clear();
        }

        let bearer = match AuthHeader::bearer(access) {
            Ok(bearer) => bearer,
            Err(e) => {
                self.header.clear();
                return Err(anyhow::anyhow!("Credential is not a valid header value: {}", e));
            }
        };

        // The header only follows what storage actually holds.
        self.backend
            .set(ACCESS_KEY, access)
            .context("Failed to persist access credential")?;
        if let Some(renewal) = renewal.filter(|r| !r.is_empty()) {
            self.backend
                .set(RENEWAL_KEY, renewal)
                .context("Failed to persist renewal credential")?;
        }
        self.header.install(bearer);
        debug!(renewal = renewal.is_some(), "Credentials stored");
        Ok(())
    }

    /// Remove both credentials and the default authorization header.
    pub fn clear(&self) -> Result<()> {
        self.header.clear();
        let access = self.backend.remove(ACCESS_KEY);
        let renewal = self.backend.remove(RENEWAL_KEY);
        debug!("Credentials cleared");
        access.context("Failed to remove access credential")?;
        renewal.context("Failed to remove renewal credential")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> CredentialStore {
        CredentialStore::new(Box::new(MemoryStore::new()), AuthHeader::new())
    }

    #[test]
    fn test_set_persists_and_installs_header() {
        let store = memory_store();
        store.set("tokA", Some("tokB")).expect("set");

        assert_eq!(store.get_access().as_deref(), Some("tokA"));
        assert_eq!(store.get_renewal().as_deref(), Some("tokB"));
        let header = store.header().get().expect("header");
        assert_eq!(header.to_str().ok(), Some("Bearer tokA"));
    }

    #[test]
    fn test_set_without_renewal_keeps_existing_renewal() {
        let store = memory_store();
        store.set("old", Some("renew")).expect("set");
        store.set("new", None).expect("set");

        assert_eq!(store.get_access().as_deref(), Some("new"));
        assert_eq!(store.get_renewal().as_deref(), Some("renew"));
    }

    #[test]
    fn test_set_with_empty_access_clears() {
        let store = memory_store();
        store.set("tokA", Some("tokB")).expect("set");
        store.set("", Some("ignored")).expect("clear");

        assert!(store.get_access().is_none());
        assert!(store.get_renewal().is_none());
        assert!(!store.header().is_set());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = memory_store();
        store.clear().expect("clear empty");
        store.set("tokA", Some("tokB")).expect("set");
        store.clear().expect("clear");
        store.clear().expect("clear again");
        assert!(store.get_access().is_none());
        assert!(!store.header().is_set());
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<()> {
            anyhow::bail!("read-only")
        }

        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_persist_leaves_header_unset() {
        let store = CredentialStore::new(Box::new(ReadOnlyStore), AuthHeader::new());

        assert!(store.set("tokA", Some("tokB")).is_err());
        assert!(!store.header().is_set());
        assert!(store.get_access().is_none());
    }

    #[test]
    fn test_file_store_round_trips_and_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileStore::new(dir.path().join("nested"));
        let path = dir.path().join("nested").join(SESSION_FILE);

        assert_eq!(backend.get(ACCESS_KEY).expect("get"), None);
        backend.set(ACCESS_KEY, "a").expect("set");
        backend.set(RENEWAL_KEY, "r").expect("set");
        assert!(path.exists());

        let reopened = FileStore::new(dir.path().join("nested"));
        assert_eq!(reopened.get(ACCESS_KEY).expect("get").as_deref(), Some("a"));

        reopened.remove(ACCESS_KEY).expect("remove");
        reopened.remove(RENEWAL_KEY).expect("remove");
        reopened.remove(RENEWAL_KEY).expect("remove missing");
        assert!(!path.exists());
    }

    #[test]
    fn test_unreadable_file_reads_as_absent() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(SESSION_FILE), "{not json").expect("write");

        let store = CredentialStore::new(
            Box::new(FileStore::new(dir.path().to_path_buf())),
            AuthHeader::new(),
        );
        assert!(store.get_access().is_none());
    }
}
