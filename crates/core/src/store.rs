use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Field the store assigns to every inserted document.
pub const ID_FIELD: &str = "_id";
pub const MIN_PAGE_LIMIT: u32 = 1;
pub const MAX_PAGE_LIMIT: u32 = 1_000;

pub type Document = Value;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CredentialPair {
    pub user: String,
    pub password: String,
}

impl CredentialPair {
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDescriptor {
    #[serde(rename = "namedb", alias = "name")]
    pub name: String,
}

impl DatabaseDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsDescriptor {
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub size_bytes: u64,
}

impl StatsDescriptor {
    #[must_use]
    pub fn size_kib(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let bytes = self.size_bytes as f64;
        bytes / 1024.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub total_records: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub has_next: bool,
    #[serde(default)]
    pub has_prev: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    #[serde(rename = "data", default)]
    pub records: Vec<Document>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Key,
    #[default]
    Value,
}

impl QueryType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Key => "key",
            Self::Value => "value",
        }
    }
}

/// Server-side sort and filter options for `list`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<BTreeMap<String, Value>>,
}

impl ListQuery {
    #[must_use]
    pub fn sorted_by(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            sort_by: Some(field.into()),
            sort_order: order,
            filters: None,
        }
    }

    #[must_use]
    pub fn with_filter(mut self, field: impl Into<String>, criterion: Value) -> Self {
        self.filters
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), criterion);
        self
    }
}

/// Identifier of a document, if the store has assigned one.
#[must_use]
pub fn document_id(document: &Document) -> Option<String> {
    match document.get(ID_FIELD)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("authentication rejected: {0}")]
    Authentication(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("store unreachable: {0}")]
    Network(String),
    #[error("store returned HTTP {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("malformed store payload: {0}")]
    Protocol(String),
}

impl StoreError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote { status: 404, .. })
    }
}

/// Capabilities of one authenticated handle to the store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn authenticate(&self) -> Result<bool, StoreError>;
    async fn create_database(&self, name: &str) -> Result<DatabaseDescriptor, StoreError>;
    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, StoreError>;
    async fn stats(&self, database: &str) -> Result<StatsDescriptor, StoreError>;
    async fn browse(&self, database: &str, page: u32, limit: u32) -> Result<Page, StoreError>;
    async fn list(
        &self,
        database: &str,
        page: u32,
        limit: u32,
        query: &ListQuery,
    ) -> Result<Page, StoreError>;
    async fn search(
        &self,
        database: &str,
        query: &str,
        query_type: QueryType,
    ) -> Result<Vec<Document>, StoreError>;
    async fn insert(&self, database: &str, document: &Document) -> Result<Document, StoreError>;
    async fn update_by_id(
        &self,
        database: &str,
        id: &str,
        patch: &Document,
    ) -> Result<Document, StoreError>;
    async fn update_by_query(
        &self,
        database: &str,
        query: &str,
        patch: &Document,
    ) -> Result<Value, StoreError>;
    async fn delete(&self, database: &str, query: &str) -> Result<Value, StoreError>;
}

/// Builds connections bound to a credential pair and performs the
/// unauthenticated calls.
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: DocumentStore;

    fn connect(&self, credentials: &CredentialPair) -> Result<Self::Connection, StoreError>;
    async fn create_user(&self, username: &str, password: &str) -> Result<Value, StoreError>;
}
