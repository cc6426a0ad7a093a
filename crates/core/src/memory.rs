//! In-process document store implementing the store contract.
//!
//! Used by tests across the workspace and as a stand-in backend when no
//! server is reachable. Databases are scoped per user, identifiers are
//! assigned on insert, and failures can be injected per call.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::store::{
    document_id, Connector, CredentialPair, DatabaseDescriptor, Document, DocumentStore,
    ListQuery, Page, Pagination, QueryType, SortOrder, StatsDescriptor, StoreError, ID_FIELD,
    MAX_PAGE_LIMIT, MIN_PAGE_LIMIT,
};

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<String, String>,
    databases: BTreeMap<String, BTreeMap<String, Vec<Document>>>,
    next_id: u64,
    connections_opened: usize,
    fail_connect: Option<StoreError>,
    fail_next: VecDeque<StoreError>,
    calls: Vec<String>,
}

impl MemoryState {
    fn assign_id(&mut self, document: &mut Document) -> Result<(), StoreError> {
        let Value::Object(fields) = document else {
            return Err(StoreError::Remote {
                status: 400,
                message: "document must be a JSON object".to_string(),
            });
        };
        if !fields.contains_key(ID_FIELD) {
            self.next_id += 1;
            fields.insert(
                ID_FIELD.to_string(),
                Value::String(format!("doc-{:06}", self.next_id)),
            );
        }
        Ok(())
    }

    fn begin(&mut self, call: String, credentials: &CredentialPair) -> Result<(), StoreError> {
        self.calls.push(call);
        if let Some(error) = self.fail_next.pop_front() {
            return Err(error);
        }
        if self.users.get(&credentials.user) != Some(&credentials.password) {
            return Err(StoreError::Authentication("invalid credentials".to_string()));
        }
        Ok(())
    }

    fn records(&self, user: &str, database: &str) -> Result<&Vec<Document>, StoreError> {
        self.databases
            .get(user)
            .and_then(|databases| databases.get(database))
            .ok_or_else(|| missing_database(database))
    }

    fn records_mut(
        &mut self,
        user: &str,
        database: &str,
    ) -> Result<&mut Vec<Document>, StoreError> {
        self.databases
            .get_mut(user)
            .and_then(|databases| databases.get_mut(database))
            .ok_or_else(|| missing_database(database))
    }
}

/// Connector over a shared in-memory state. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    #[must_use]
    pub fn with_user(self, user: &str, password: &str) -> Self {
        self.lock()
            .users
            .insert(user.to_string(), password.to_string());
        self
    }

    /// Seeds a database for `user`, assigning identifiers to documents
    /// without one. Non-object documents are skipped.
    #[must_use]
    pub fn with_documents(self, user: &str, database: &str, documents: Vec<Document>) -> Self {
        {
            let mut state = self.lock();
            let mut seeded = Vec::with_capacity(documents.len());
            for mut document in documents {
                if state.assign_id(&mut document).is_ok() {
                    seeded.push(document);
                }
            }
            state
                .databases
                .entry(user.to_string())
                .or_default()
                .entry(database.to_string())
                .or_default()
                .extend(seeded);
        }
        self
    }

    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.lock().connections_opened
    }

    pub fn fail_next_connect(&self, error: StoreError) {
        self.lock().fail_connect = Some(error);
    }

    /// Makes the next store call (of any kind) fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        self.lock().fail_next.push_back(error);
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    #[must_use]
    pub fn documents(&self, user: &str, database: &str) -> Vec<Document> {
        self.lock()
            .records(user, database)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    fn connect(&self, credentials: &CredentialPair) -> Result<Self::Connection, StoreError> {
        let mut state = self.lock();
        if let Some(error) = state.fail_connect.take() {
            return Err(error);
        }
        state.connections_opened += 1;
        Ok(MemoryConnection {
            credentials: credentials.clone(),
            state: Arc::clone(&self.state),
        })
    }

    async fn create_user(&self, username: &str, password: &str) -> Result<Value, StoreError> {
        let mut state = self.lock();
        state.calls.push(format!("create_user:{username}"));
        if let Some(error) = state.fail_next.pop_front() {
            return Err(error);
        }
        if state.users.contains_key(username) {
            return Err(StoreError::Remote {
                status: 409,
                message: format!("user `{username}` already exists"),
            });
        }
        state
            .users
            .insert(username.to_string(), password.to_string());
        Ok(json!({ "username": username }))
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    credentials: CredentialPair,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn user(&self) -> &str {
        &self.credentials.user
    }
}

#[async_trait]
impl DocumentStore for MemoryConnection {
    async fn authenticate(&self) -> Result<bool, StoreError> {
        let mut state = self.lock();
        state.calls.push("authenticate".to_string());
        if let Some(error) = state.fail_next.pop_front() {
            return Err(error);
        }
        Ok(state.users.get(&self.credentials.user) == Some(&self.credentials.password))
    }

    async fn create_database(&self, name: &str) -> Result<DatabaseDescriptor, StoreError> {
        let mut state = self.lock();
        state.begin(format!("create_database:{name}"), &self.credentials)?;
        let databases = state.databases.entry(self.user().to_string()).or_default();
        if databases.contains_key(name) {
            return Err(StoreError::Remote {
                status: 409,
                message: format!("database `{name}` already exists"),
            });
        }
        databases.insert(name.to_string(), Vec::new());
        Ok(DatabaseDescriptor::new(name))
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, StoreError> {
        let mut state = self.lock();
        state.begin("list_databases".to_string(), &self.credentials)?;
        Ok(state
            .databases
            .get(self.user())
            .map(|databases| {
                databases
                    .keys()
                    .map(|name| DatabaseDescriptor::new(name.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn stats(&self, database: &str) -> Result<StatsDescriptor, StoreError> {
        let mut state = self.lock();
        state.begin(format!("stats:{database}"), &self.credentials)?;
        let records = state.records(self.user(), database)?;
        Ok(StatsDescriptor {
            total_records: records.len() as u64,
            size_bytes: records
                .iter()
                .map(|record| record.to_string().len() as u64)
                .sum(),
        })
    }

    async fn browse(&self, database: &str, page: u32, limit: u32) -> Result<Page, StoreError> {
        let mut state = self.lock();
        state.begin(
            format!("browse:{database}:{page}:{limit}"),
            &self.credentials,
        )?;
        check_window(page, limit)?;
        let records = state.records(self.user(), database)?.clone();
        Ok(paginate(records, page, limit))
    }

    async fn list(
        &self,
        database: &str,
        page: u32,
        limit: u32,
        query: &ListQuery,
    ) -> Result<Page, StoreError> {
        let mut state = self.lock();
        state.begin(format!("list:{database}:{page}:{limit}"), &self.credentials)?;
        check_window(page, limit)?;
        let mut records = state
            .records(self.user(), database)?
            .iter()
            .filter(|record| matches_filters(record, query.filters.as_ref()))
            .cloned()
            .collect::<Vec<_>>();
        if let Some(field) = &query.sort_by {
            records.sort_by(|a, b| compare_field(a, b, field));
            if query.sort_order == SortOrder::Desc {
                records.reverse();
            }
        }
        Ok(paginate(records, page, limit))
    }

    async fn search(
        &self,
        database: &str,
        query: &str,
        query_type: QueryType,
    ) -> Result<Vec<Document>, StoreError> {
        let mut state = self.lock();
        state.begin(
            format!("search:{database}:{}:{query}", query_type.as_str()),
            &self.credentials,
        )?;
        Ok(state
            .records(self.user(), database)?
            .iter()
            .filter(|record| match query_type {
                QueryType::Key => contains_key(record, query),
                QueryType::Value => contains_value(record, query),
            })
            .cloned()
            .collect())
    }

    async fn insert(&self, database: &str, document: &Document) -> Result<Document, StoreError> {
        let mut state = self.lock();
        state.begin(format!("insert:{database}"), &self.credentials)?;
        let mut stored = document.clone();
        state.records(self.user(), database)?;
        state.assign_id(&mut stored)?;
        let user = self.user().to_string();
        state.records_mut(&user, database)?.push(stored.clone());
        Ok(stored)
    }

    async fn update_by_id(
        &self,
        database: &str,
        id: &str,
        patch: &Document,
    ) -> Result<Document, StoreError> {
        let mut state = self.lock();
        state.begin(format!("update_by_id:{database}:{id}"), &self.credentials)?;
        let records = state.records_mut(self.user(), database)?;
        let record = records
            .iter_mut()
            .find(|record| document_id(record).as_deref() == Some(id))
            .ok_or_else(|| StoreError::Remote {
                status: 404,
                message: format!("record `{id}` not found"),
            })?;
        merge_patch(record, patch)?;
        Ok(record.clone())
    }

    async fn update_by_query(
        &self,
        database: &str,
        query: &str,
        patch: &Document,
    ) -> Result<Value, StoreError> {
        let mut state = self.lock();
        state.begin(
            format!("update_by_query:{database}:{query}"),
            &self.credentials,
        )?;
        let records = state.records_mut(self.user(), database)?;
        let mut updated = 0_u64;
        for index in matching_indices(records, query) {
            merge_patch(&mut records[index], patch)?;
            updated += 1;
        }
        Ok(json!({ "updated": updated }))
    }

    async fn delete(&self, database: &str, query: &str) -> Result<Value, StoreError> {
        let mut state = self.lock();
        state.begin(format!("delete:{database}:{query}"), &self.credentials)?;
        let records = state.records_mut(self.user(), database)?;
        let doomed = matching_indices(records, query);
        for index in doomed.iter().rev() {
            records.remove(*index);
        }
        Ok(json!({ "deleted": doomed.len() }))
    }
}

fn missing_database(database: &str) -> StoreError {
    StoreError::Remote {
        status: 404,
        message: format!("database `{database}` not found"),
    }
}

fn check_window(page: u32, limit: u32) -> Result<(), StoreError> {
    if page == 0 || !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(StoreError::Remote {
            status: 400,
            message: format!("invalid pagination window page={page} limit={limit}"),
        });
    }
    Ok(())
}

fn paginate(records: Vec<Document>, page: u32, limit: u32) -> Page {
    let total_records = records.len() as u64;
    let total_pages = total_records.div_ceil(u64::from(limit));
    let start = (page as usize - 1).saturating_mul(limit as usize);
    Page {
        records: records
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect(),
        pagination: Pagination {
            total_records,
            total_pages,
            has_next: u64::from(page) < total_pages,
            has_prev: page > 1,
        },
    }
}

/// Identifier match wins; otherwise every record containing the query
/// as a value matches.
fn matching_indices(records: &[Document], query: &str) -> Vec<usize> {
    let by_id = records
        .iter()
        .enumerate()
        .filter(|(_, record)| document_id(record).as_deref() == Some(query))
        .map(|(index, _)| index)
        .collect::<Vec<_>>();
    if !by_id.is_empty() {
        return by_id;
    }
    records
        .iter()
        .enumerate()
        .filter(|(_, record)| contains_value(record, query))
        .map(|(index, _)| index)
        .collect()
}

fn merge_patch(record: &mut Document, patch: &Document) -> Result<(), StoreError> {
    let (Value::Object(target), Value::Object(changes)) = (record, patch) else {
        return Err(StoreError::Remote {
            status: 400,
            message: "update patch must be a JSON object".to_string(),
        });
    };
    for (key, value) in changes {
        if key == ID_FIELD {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn matches_filters(record: &Document, filters: Option<&BTreeMap<String, Value>>) -> bool {
    let Some(filters) = filters else {
        return true;
    };
    filters
        .iter()
        .all(|(field, criterion)| record.get(field) == Some(criterion))
}

fn compare_field(a: &Document, b: &Document, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (None, None) => Ordering::Equal,
    }
}

fn contains_key(value: &Value, key: &str) -> bool {
    match value {
        Value::Object(fields) => object_contains_key(fields, key),
        Value::Array(items) => items.iter().any(|item| contains_key(item, key)),
        _ => false,
    }
}

fn object_contains_key(fields: &Map<String, Value>, key: &str) -> bool {
    fields.contains_key(key) || fields.values().any(|value| contains_key(value, key))
}

fn contains_value(value: &Value, needle: &str) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => text.contains(needle),
        Value::Bool(_) | Value::Number(_) => value.to_string() == needle,
        Value::Array(items) => items.iter().any(|item| contains_value(item, needle)),
        Value::Object(fields) => fields
            .iter()
            .filter(|(key, _)| key.as_str() != ID_FIELD)
            .any(|(_, item)| contains_value(item, needle)),
    }
}
