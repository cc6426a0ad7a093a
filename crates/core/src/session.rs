use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{default_session_path, ConfigError};
use crate::remote::RemoteOperations;
use crate::store::{Connector, CredentialPair};

pub const KEY_USER: &str = "user";
pub const KEY_PASSWORD: &str = "password";
pub const KEY_LOGGED_IN: &str = "logged_in";
pub const KEY_SERVER_UP: &str = "server_up";

/// Every key the client persists; logout removes all of them.
pub const SESSION_KEYS: [&str; 4] = [KEY_USER, KEY_PASSWORD, KEY_LOGGED_IN, KEY_SERVER_UP];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session file location is unavailable: {source}")]
    Location {
        #[source]
        source: ConfigError,
    },
    #[error("failed to read session file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse session file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create session directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize session: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write session file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("secret storage failed: {0}")]
    Secret(String),
}

/// String key/value persistence for client state.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError>;
    fn remove(&mut self, key: &str) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: BTreeMap<String, String>,
}

impl MemoryKeyValueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), SessionError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionDocument {
    #[serde(default)]
    values: BTreeMap<String, String>,
}

/// TOML-backed store. Every write is flushed to disk immediately.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileKeyValueStore {
    pub fn load_default() -> Result<Self, SessionError> {
        let path = default_session_path().map_err(|source| SessionError::Location { source })?;
        Self::load_from_path(path)
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| SessionError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let doc: SessionDocument = toml::from_str(&raw).map_err(|source| SessionError::Parse {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            entries: doc.values,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), SessionError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SessionError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let doc = SessionDocument {
            values: self.entries.clone(),
        };
        let rendered =
            toml::to_string_pretty(&doc).map_err(|source| SessionError::Serialize { source })?;
        fs::write(&self.path, rendered).map_err(|source| SessionError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        self.entries.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<(), SessionError> {
        if self.entries.remove(key).is_some() {
            self.persist()?;
        }
        Ok(())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        (**self).set(key, value)
    }

    fn remove(&mut self, key: &str) -> Result<(), SessionError> {
        (**self).remove(key)
    }
}

/// Login state persisted across runs.
#[derive(Debug)]
pub struct Session<S: KeyValueStore> {
    store: S,
}

impl<S: KeyValueStore> Session<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_logged_in(&self) -> Result<bool, SessionError> {
        Ok(self.store.get(KEY_LOGGED_IN)?.as_deref() == Some("true"))
    }

    /// Credentials from the last login, if the session is still marked
    /// as logged in.
    pub fn stored_credentials(&self) -> Result<Option<CredentialPair>, SessionError> {
        if !self.is_logged_in()? {
            return Ok(None);
        }
        let user = self.store.get(KEY_USER)?;
        let password = self.store.get(KEY_PASSWORD)?;
        Ok(user
            .zip(password)
            .map(|(user, password)| CredentialPair::new(user, password)))
    }

    pub fn record_login(&mut self, credentials: &CredentialPair) -> Result<(), SessionError> {
        self.store.set(KEY_USER, &credentials.user)?;
        self.store.set(KEY_PASSWORD, &credentials.password)?;
        self.store.set(KEY_LOGGED_IN, "true")?;
        info!(user = %credentials.user, "session stored");
        Ok(())
    }

    pub fn record_health(&mut self, up: bool) -> Result<(), SessionError> {
        self.store.set(KEY_SERVER_UP, if up { "true" } else { "false" })
    }

    pub fn last_health(&self) -> Result<Option<bool>, SessionError> {
        Ok(self
            .store
            .get(KEY_SERVER_UP)?
            .map(|value| value == "true"))
    }

    /// Drops the cached connection and removes every session key. All
    /// keys are attempted even when one removal fails; the first failure
    /// is returned.
    pub fn logout<K: Connector>(&mut self, remote: &RemoteOperations<K>) -> Result<(), SessionError> {
        remote.cache().clear();
        let mut first_error = None;
        for key in SESSION_KEYS {
            if let Err(error) = self.store.remove(key) {
                warn!(key, %error, "failed to clear session key");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => {
                info!("session cleared");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{
        FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, Session, SessionError,
        SESSION_KEYS,
    };
    use crate::memory::MemoryConnector;
    use crate::remote::RemoteOperations;
    use crate::store::CredentialPair;

    struct FlakyStore {
        inner: MemoryKeyValueStore,
        failing_key: &'static str,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, SessionError> {
            self.inner.get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
            self.inner.set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<(), SessionError> {
            if key == self.failing_key {
                return Err(SessionError::Secret("locked".to_string()));
            }
            self.inner.remove(key)
        }
    }

    #[test]
    fn login_survives_reload_from_disk() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("session.toml");
        let credentials = CredentialPair::new("ana", "pw");

        let mut session =
            Session::new(FileKeyValueStore::load_from_path(&path).expect("failed to load"));
        assert_eq!(session.stored_credentials().expect("read"), None);
        session.record_login(&credentials).expect("record login");
        session.record_health(true).expect("record health");

        let reloaded =
            Session::new(FileKeyValueStore::load_from_path(&path).expect("failed to reload"));
        assert_eq!(
            reloaded.stored_credentials().expect("read"),
            Some(credentials)
        );
        assert_eq!(reloaded.last_health().expect("read"), Some(true));
    }

    #[tokio::test]
    async fn logout_clears_every_key_and_the_connection() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("session.toml");
        let remote = RemoteOperations::new(MemoryConnector::default().with_user("ana", "pw"));
        let credentials = CredentialPair::new("ana", "pw");
        remote.authenticate(&credentials).await.expect("login");

        let mut session =
            Session::new(FileKeyValueStore::load_from_path(&path).expect("failed to load"));
        session.record_login(&credentials).expect("record login");
        session.record_health(false).expect("record health");

        session.logout(&remote).expect("logout");

        assert_eq!(remote.cache().cached_user(), None);
        let reloaded = FileKeyValueStore::load_from_path(&path).expect("failed to reload");
        for key in SESSION_KEYS {
            assert_eq!(reloaded.get(key).expect("read"), None, "{key} should be cleared");
        }
    }

    #[test]
    fn logged_out_flag_hides_leftover_credentials() {
        let mut store = MemoryKeyValueStore::new();
        store.set("user", "ana").expect("set");
        store.set("password", "pw").expect("set");

        let session = Session::new(store);
        assert!(!session.is_logged_in().expect("read"));
        assert_eq!(session.stored_credentials().expect("read"), None);
    }

    #[test]
    fn logout_attempts_every_key_before_reporting_failure() {
        let remote = RemoteOperations::new(MemoryConnector::default());
        let mut session = Session::new(FlakyStore {
            inner: MemoryKeyValueStore::new(),
            failing_key: "password",
        });
        session
            .record_login(&CredentialPair::new("ana", "pw"))
            .expect("record login");
        session.record_health(true).expect("record health");

        let err = session.logout(&remote).expect_err("password removal fails");
        assert!(matches!(err, SessionError::Secret(_)));
        assert!(!session.is_logged_in().expect("read"));
        assert_eq!(session.last_health().expect("read"), None);
    }
}
