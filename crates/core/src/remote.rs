use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::connection_cache::ConnectionCache;
use crate::store::{
    Connector, CredentialPair, DatabaseDescriptor, Document, DocumentStore, ListQuery, Page, QueryType,
    StatsDescriptor, StoreError, MAX_PAGE_LIMIT, MIN_PAGE_LIMIT,
};

/// Facade over every remote capability. Each call resolves the cached
/// connection for the supplied credentials; an authentication rejection
/// from any call drops the cached connection.
#[derive(Debug)]
pub struct RemoteOperations<K: Connector> {
    cache: ConnectionCache<K>,
}

impl<K: Connector> RemoteOperations<K> {
    #[must_use]
    pub fn new(connector: K) -> Self {
        Self {
            cache: ConnectionCache::new(connector),
        }
    }

    #[must_use]
    pub fn cache(&self) -> &ConnectionCache<K> {
        &self.cache
    }

    /// Fails with `StoreError::Authentication` when the store rejects the
    /// pair. Any failure leaves the cache empty.
    pub async fn authenticate(&self, credentials: &CredentialPair) -> Result<(), StoreError> {
        let connection = self.connection(credentials)?;
        match connection.authenticate().await {
            Ok(true) => {
                info!(user = %credentials.user, "authenticated");
                Ok(())
            }
            Ok(false) => {
                self.cache.clear();
                warn!(user = %credentials.user, "credentials rejected");
                Err(StoreError::Authentication("invalid credentials".to_string()))
            }
            Err(error) => {
                self.cache.clear();
                warn!(user = %credentials.user, %error, "authentication failed");
                Err(error)
            }
        }
    }

    pub async fn create_user(&self, username: &str, password: &str) -> Result<Value, StoreError> {
        if username.trim().is_empty() {
            return Err(StoreError::validation("username must not be empty"));
        }
        if password.is_empty() {
            return Err(StoreError::validation("password must not be empty"));
        }
        self.cache.connector().create_user(username, password).await
    }

    pub async fn create_database(
        &self,
        credentials: &CredentialPair,
        name: &str,
    ) -> Result<DatabaseDescriptor, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::validation("database name must not be empty"));
        }
        let connection = self.connection(credentials)?;
        self.observe(connection.create_database(name).await)
    }

    pub async fn list_databases(
        &self,
        credentials: &CredentialPair,
    ) -> Result<Vec<DatabaseDescriptor>, StoreError> {
        let connection = self.connection(credentials)?;
        self.observe(connection.list_databases().await)
    }

    pub async fn get_stats(
        &self,
        credentials: &CredentialPair,
        database: &str,
    ) -> Result<StatsDescriptor, StoreError> {
        check_database(database)?;
        let connection = self.connection(credentials)?;
        self.observe(connection.stats(database).await)
    }

    pub async fn browse(
        &self,
        credentials: &CredentialPair,
        database: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page, StoreError> {
        check_database(database)?;
        check_window(page, limit)?;
        let connection = self.connection(credentials)?;
        self.observe(connection.browse(database, page, limit).await)
    }

    pub async fn list(
        &self,
        credentials: &CredentialPair,
        database: &str,
        page: u32,
        limit: u32,
        query: &ListQuery,
    ) -> Result<Page, StoreError> {
        check_database(database)?;
        check_window(page, limit)?;
        let connection = self.connection(credentials)?;
        self.observe(connection.list(database, page, limit, query).await)
    }

    pub async fn search(
        &self,
        credentials: &CredentialPair,
        database: &str,
        query: &str,
        query_type: QueryType,
    ) -> Result<Vec<Document>, StoreError> {
        check_database(database)?;
        let connection = self.connection(credentials)?;
        self.observe(connection.search(database, query, query_type).await)
    }

    pub async fn search_by_key(
        &self,
        credentials: &CredentialPair,
        database: &str,
        key: &str,
    ) -> Result<Vec<Document>, StoreError> {
        self.search(credentials, database, key, QueryType::Key)
            .await
    }

    pub async fn search_by_value(
        &self,
        credentials: &CredentialPair,
        database: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError> {
        self.search(credentials, database, value, QueryType::Value)
            .await
    }

    pub async fn insert(
        &self,
        credentials: &CredentialPair,
        database: &str,
        document: &Document,
    ) -> Result<Document, StoreError> {
        check_database(database)?;
        let connection = self.connection(credentials)?;
        self.observe(connection.insert(database, document).await)
    }

    pub async fn update_by_id(
        &self,
        credentials: &CredentialPair,
        database: &str,
        id: &str,
        patch: &Document,
    ) -> Result<Document, StoreError> {
        check_database(database)?;
        if id.is_empty() {
            return Err(StoreError::validation("record identifier must not be empty"));
        }
        let connection = self.connection(credentials)?;
        self.observe(connection.update_by_id(database, id, patch).await)
    }

    pub async fn update_by_query(
        &self,
        credentials: &CredentialPair,
        database: &str,
        query: &str,
        patch: &Document,
    ) -> Result<Value, StoreError> {
        check_database(database)?;
        check_query(query)?;
        let connection = self.connection(credentials)?;
        self.observe(connection.update_by_query(database, query, patch).await)
    }

    pub async fn delete(
        &self,
        credentials: &CredentialPair,
        database: &str,
        query: &str,
    ) -> Result<Value, StoreError> {
        check_database(database)?;
        check_query(query)?;
        let connection = self.connection(credentials)?;
        self.observe(connection.delete(database, query).await)
    }

    fn connection(&self, credentials: &CredentialPair) -> Result<Arc<K::Connection>, StoreError> {
        self.cache.resolve(credentials)
    }

    fn observe<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        if let Err(error) = &result {
            if error.is_authentication() {
                self.cache.clear();
            }
            warn!(%error, "store call failed");
        }
        result
    }
}

fn check_database(database: &str) -> Result<(), StoreError> {
    if database.trim().is_empty() {
        return Err(StoreError::validation("database name must not be empty"));
    }
    Ok(())
}

fn check_query(query: &str) -> Result<(), StoreError> {
    if query.trim().is_empty() {
        return Err(StoreError::validation("query must not be empty"));
    }
    Ok(())
}

fn check_window(page: u32, limit: u32) -> Result<(), StoreError> {
    if page == 0 {
        return Err(StoreError::validation("page numbers start at 1"));
    }
    if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(StoreError::validation(format!(
            "limit must be between {MIN_PAGE_LIMIT} and {MAX_PAGE_LIMIT}"
        )));
    }
    Ok(())
}
