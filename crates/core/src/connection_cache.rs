use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::store::{Connector, CredentialPair, StoreError};

struct CachedConnection<C> {
    credentials: CredentialPair,
    handle: Arc<C>,
}

/// Single-slot cache holding the connection for the most recently
/// requested credential pair.
pub struct ConnectionCache<K: Connector> {
    connector: K,
    slot: Mutex<Option<CachedConnection<K::Connection>>>,
}

impl<K: Connector> ConnectionCache<K> {
    #[must_use]
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            slot: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn connector(&self) -> &K {
        &self.connector
    }

    /// Returns the cached connection when `credentials` match the bound
    /// pair exactly, otherwise connects and replaces the slot.
    pub fn resolve(&self, credentials: &CredentialPair) -> Result<Arc<K::Connection>, StoreError> {
        let mut slot = self.lock_slot();
        if let Some(cached) = slot.as_ref() {
            if cached.credentials == *credentials {
                return Ok(Arc::clone(&cached.handle));
            }
        }

        let handle = Arc::new(self.connector.connect(credentials)?);
        if let Some(previous) = slot.as_ref() {
            debug!(
                previous_user = %previous.credentials.user,
                user = %credentials.user,
                "replacing cached connection"
            );
        } else {
            debug!(user = %credentials.user, "caching new connection");
        }
        *slot = Some(CachedConnection {
            credentials: credentials.clone(),
            handle: Arc::clone(&handle),
        });

        Ok(handle)
    }

    pub fn clear(&self) {
        if self.lock_slot().take().is_some() {
            debug!("cleared cached connection");
        }
    }

    #[must_use]
    pub fn is_cached(&self, credentials: &CredentialPair) -> bool {
        self.lock_slot()
            .as_ref()
            .is_some_and(|cached| cached.credentials == *credentials)
    }

    #[must_use]
    pub fn cached_user(&self) -> Option<String> {
        self.lock_slot()
            .as_ref()
            .map(|cached| cached.credentials.user.clone())
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<CachedConnection<K::Connection>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Connector> fmt::Debug for ConnectionCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("cached_user", &self.cached_user())
            .finish_non_exhaustive()
    }
}
