use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::remote::RemoteOperations;
use crate::store::{document_id, Connector, CredentialPair, Document, StoreError, ID_FIELD};

/// Initial text of the insert dialog.
pub const INSERT_TEMPLATE: &str = "{\n  \n}";

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("document has no `_id` field")]
    MissingIdentifier,
    #[error("delete confirmation is invalid or already used")]
    InvalidToken,
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MutationError {
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Store(error) if error.is_authentication())
    }
}

/// Emitted after a successful write; the browser for `database` should
/// refetch its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSignal {
    pub database: String,
}

pub fn parse_document(text: &str) -> Result<Document, StoreError> {
    serde_json::from_str(text)
        .map_err(|error| StoreError::validation(format!("invalid JSON: {error}")))
}

/// Two-space indented JSON, shared by the edit buffer and the clipboard.
#[must_use]
pub fn pretty_document(document: &Document) -> String {
    serde_json::to_string_pretty(document).unwrap_or_else(|_| document.to_string())
}

pub trait Clipboard {
    fn set_text(&mut self, text: &str) -> Result<(), MutationError>;
}

/// Copies the whole document, not just the rows currently on screen.
pub fn copy_document<C: Clipboard + ?Sized>(
    clipboard: &mut C,
    document: &Document,
) -> Result<String, MutationError> {
    let text = pretty_document(document);
    clipboard.set_text(&text)?;
    Ok(text)
}

#[derive(Debug, Clone)]
pub struct InsertDialog {
    database: String,
    open: bool,
    text: String,
    error: Option<String>,
}

impl InsertDialog {
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            open: false,
            text: INSERT_TEMPLATE.to_string(),
            error: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_mut(&mut self) -> &mut String {
        &mut self.text
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn open(&mut self) {
        self.open = true;
        self.error = None;
    }

    /// Closes without discarding the typed text.
    pub fn cancel(&mut self) {
        self.open = false;
        self.error = None;
    }

    /// Parses the buffer. On failure the dialog stays open with the
    /// error recorded and the text untouched.
    pub fn prepare(&mut self) -> Result<Document, StoreError> {
        parse_document(&self.text).inspect_err(|error| self.error = Some(error.to_string()))
    }

    /// Closes and resets on success; keeps the dialog open with the
    /// error otherwise.
    pub fn finish(
        &mut self,
        result: Result<Document, StoreError>,
    ) -> Result<RefreshSignal, StoreError> {
        match result {
            Ok(stored) => {
                info!(
                    database = %self.database,
                    id = document_id(&stored).as_deref().unwrap_or("-"),
                    "document inserted"
                );
                self.open = false;
                self.error = None;
                self.text = INSERT_TEMPLATE.to_string();
                Ok(RefreshSignal {
                    database: self.database.clone(),
                })
            }
            Err(error) => {
                self.error = Some(error.to_string());
                Err(error)
            }
        }
    }

    pub async fn submit<K: Connector>(
        &mut self,
        remote: &RemoteOperations<K>,
        credentials: &CredentialPair,
    ) -> Result<RefreshSignal, MutationError> {
        let document = self.prepare()?;
        let result = remote.insert(credentials, &self.database, &document).await;
        Ok(self.finish(result)?)
    }
}

#[derive(Debug, Clone)]
pub struct EditDialog {
    database: String,
    id: String,
    buffer: String,
    error: Option<String>,
}

impl EditDialog {
    /// Fails when the document carries no identifier to address it by.
    pub fn for_document(
        database: impl Into<String>,
        document: &Document,
    ) -> Result<Self, MutationError> {
        let id = document_id(document).ok_or(MutationError::MissingIdentifier)?;
        Ok(Self {
            database: database.into(),
            id,
            buffer: pretty_document(document),
            error: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut String {
        &mut self.buffer
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Parses the buffer into a patch addressed by the loaded id. The
    /// identifier field itself is stripped from the patch and may not be
    /// changed.
    pub fn prepare(&mut self) -> Result<Document, StoreError> {
        self.build_patch()
            .inspect_err(|error| self.error = Some(error.to_string()))
    }

    fn build_patch(&self) -> Result<Document, StoreError> {
        let mut patch = parse_document(&self.buffer)?;
        let Value::Object(fields) = &mut patch else {
            return Err(StoreError::validation("an update must be a JSON object"));
        };
        let unchanged = match fields.remove(ID_FIELD) {
            None => true,
            Some(Value::String(edited)) => edited == self.id,
            Some(Value::Number(edited)) => edited.to_string() == self.id,
            Some(_) => false,
        };
        if !unchanged {
            return Err(StoreError::validation("the `_id` field cannot be changed"));
        }
        Ok(patch)
    }

    pub fn finish(
        &mut self,
        result: Result<Document, StoreError>,
    ) -> Result<RefreshSignal, StoreError> {
        match result {
            Ok(_) => {
                info!(database = %self.database, id = %self.id, "document updated");
                self.error = None;
                Ok(RefreshSignal {
                    database: self.database.clone(),
                })
            }
            Err(error) => {
                self.error = Some(error.to_string());
                Err(error)
            }
        }
    }

    pub async fn submit<K: Connector>(
        &mut self,
        remote: &RemoteOperations<K>,
        credentials: &CredentialPair,
    ) -> Result<RefreshSignal, MutationError> {
        let patch = self.prepare()?;
        let result = remote
            .update_by_id(credentials, &self.database, &self.id, &patch)
            .await;
        Ok(self.finish(result)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeleteToken(String);

impl DeleteToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelete {
    pub token: DeleteToken,
    pub database: String,
    pub id: String,
}

/// Proof that a delete was confirmed. Only [`DeleteGuard::confirm`]
/// produces one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedDelete {
    database: String,
    id: String,
}

impl ConfirmedDelete {
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Issues single-use confirmation tokens for deletes.
#[derive(Debug, Default)]
pub struct DeleteGuard {
    nonce: u64,
    pending: HashMap<String, (String, String)>,
}

impl DeleteGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(
        &mut self,
        database: &str,
        document: &Document,
    ) -> Result<PendingDelete, MutationError> {
        let id = document_id(document).ok_or(MutationError::MissingIdentifier)?;
        self.nonce = self.nonce.saturating_add(1);
        let token = format!("delete-{}-{id}", self.nonce);
        self.pending
            .insert(token.clone(), (database.to_string(), id.clone()));
        Ok(PendingDelete {
            token: DeleteToken(token),
            database: database.to_string(),
            id,
        })
    }

    pub fn confirm(&mut self, token: &DeleteToken) -> Result<ConfirmedDelete, MutationError> {
        let (database, id) = self
            .pending
            .remove(token.as_str())
            .ok_or(MutationError::InvalidToken)?;
        Ok(ConfirmedDelete { database, id })
    }

    /// Returns true when the token was still pending.
    pub fn cancel(&mut self, token: &DeleteToken) -> bool {
        self.pending.remove(token.as_str()).is_some()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

/// Deletes the confirmed document, addressing it by its identifier.
pub async fn delete_confirmed<K: Connector>(
    remote: &RemoteOperations<K>,
    credentials: &CredentialPair,
    confirmed: ConfirmedDelete,
) -> Result<RefreshSignal, MutationError> {
    remote
        .delete(credentials, &confirmed.database, &confirmed.id)
        .await?;
    info!(database = %confirmed.database, id = %confirmed.id, "document deleted");
    Ok(RefreshSignal {
        database: confirmed.database,
    })
}

/// Applies a patch given as text to every document matching `query`.
pub async fn update_matching<K: Connector>(
    remote: &RemoteOperations<K>,
    credentials: &CredentialPair,
    database: &str,
    query: &str,
    patch_text: &str,
) -> Result<(Value, RefreshSignal), MutationError> {
    let patch = parse_document(patch_text)?;
    if !patch.is_object() {
        return Err(StoreError::validation("an update must be a JSON object").into());
    }
    let summary = remote
        .update_by_query(credentials, database, query, &patch)
        .await?;
    info!(database, query, "documents updated by query");
    Ok((
        summary,
        RefreshSignal {
            database: database.to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{
        copy_document, delete_confirmed, parse_document, pretty_document, update_matching,
        Clipboard, DeleteGuard, EditDialog, InsertDialog, MutationError, INSERT_TEMPLATE,
    };
    use crate::memory::MemoryConnector;
    use crate::remote::RemoteOperations;
    use crate::store::{document_id, CredentialPair, StoreError};

    #[derive(Default)]
    struct FakeClipboard {
        contents: Option<String>,
    }

    impl Clipboard for FakeClipboard {
        fn set_text(&mut self, text: &str) -> Result<(), MutationError> {
            self.contents = Some(text.to_string());
            Ok(())
        }
    }

    fn credentials() -> CredentialPair {
        CredentialPair::new("ana", "pw")
    }

    fn remote_with(count: usize) -> RemoteOperations<MemoryConnector> {
        let documents = (0..count).map(|n| json!({ "n": n })).collect();
        RemoteOperations::new(
            MemoryConnector::default()
                .with_user("ana", "pw")
                .with_documents("ana", "x", documents),
        )
    }

    async fn total(remote: &RemoteOperations<MemoryConnector>) -> u64 {
        remote
            .get_stats(&credentials(), "x")
            .await
            .expect("stats")
            .total_records
    }

    #[tokio::test]
    async fn invalid_insert_keeps_dialog_open_and_store_untouched() {
        let remote = remote_with(10);
        let mut dialog = InsertDialog::new("x");
        dialog.open();
        *dialog.text_mut() = "{\"name\": ".to_string();

        let err = dialog
            .submit(&remote, &credentials())
            .await
            .expect_err("broken JSON should be rejected");

        assert!(matches!(err, MutationError::Store(StoreError::Validation(_))));
        assert!(dialog.is_open());
        assert_eq!(dialog.text(), "{\"name\": ");
        assert!(dialog.error().is_some());
        assert_eq!(total(&remote).await, 10);
        assert!(!remote
            .cache()
            .connector()
            .calls()
            .iter()
            .any(|call| call.starts_with("insert")));
    }

    #[tokio::test]
    async fn successful_insert_closes_dialog_and_grows_the_database() {
        let remote = remote_with(10);
        let mut dialog = InsertDialog::new("x");
        dialog.open();
        assert_eq!(dialog.text(), INSERT_TEMPLATE);
        *dialog.text_mut() = r#"{"name":"a"}"#.to_string();

        let signal = dialog
            .submit(&remote, &credentials())
            .await
            .expect("insert should succeed");

        assert_eq!(signal.database, "x");
        assert!(!dialog.is_open());
        assert_eq!(dialog.text(), INSERT_TEMPLATE);
        assert_eq!(total(&remote).await, 11);

        let page = remote
            .browse(&credentials(), "x", 1, 100)
            .await
            .expect("browse");
        let inserted = page
            .records
            .iter()
            .find(|record| record["name"] == json!("a"))
            .expect("inserted record should be listed");
        assert!(document_id(inserted).is_some());
    }

    #[tokio::test]
    async fn remote_insert_failure_keeps_dialog_open() {
        let remote = remote_with(1);
        remote
            .cache()
            .connector()
            .fail_next(StoreError::Remote {
                status: 500,
                message: "disk full".to_string(),
            });
        let mut dialog = InsertDialog::new("x");
        dialog.open();
        *dialog.text_mut() = r#"{"k": 1}"#.to_string();

        dialog
            .submit(&remote, &credentials())
            .await
            .expect_err("remote failure should surface");
        assert!(dialog.is_open());
        assert!(dialog.error().is_some_and(|error| error.contains("disk full")));
    }

    #[tokio::test]
    async fn edit_buffer_is_pretty_and_updates_by_id() {
        let remote = remote_with(2);
        let document = remote
            .browse(&credentials(), "x", 1, 10)
            .await
            .expect("browse")
            .records
            .remove(0);

        let mut dialog = EditDialog::for_document("x", &document).expect("has id");
        assert_eq!(dialog.buffer(), pretty_document(&document));
        assert!(dialog.buffer().contains("\n  \""));

        let mut edited = document.clone();
        edited["n"] = json!(99);
        *dialog.buffer_mut() = pretty_document(&edited);
        dialog
            .submit(&remote, &credentials())
            .await
            .expect("update should succeed");

        let stored = remote.cache().connector().documents("ana", "x");
        assert_eq!(stored[0], edited);
        assert!(remote
            .cache()
            .connector()
            .calls()
            .contains(&format!("update_by_id:x:{}", dialog.id())));
    }

    #[tokio::test]
    async fn edit_rejects_changed_identifier_and_non_objects() {
        let remote = remote_with(1);
        let document = json!({"_id": "doc-000001", "n": 0});
        let mut dialog = EditDialog::for_document("x", &document).expect("has id");

        *dialog.buffer_mut() = r#"{"_id": "other", "n": 1}"#.to_string();
        let err = dialog
            .submit(&remote, &credentials())
            .await
            .expect_err("id change should be refused");
        assert!(matches!(err, MutationError::Store(StoreError::Validation(_))));

        *dialog.buffer_mut() = "[1, 2]".to_string();
        assert!(dialog.prepare().is_err());

        *dialog.buffer_mut() = r#"{"_id": "doc-000001", "n": 1}"#.to_string();
        assert_eq!(dialog.prepare().expect("same id is fine"), json!({"n": 1}));
    }

    #[test]
    fn edit_requires_an_identifier() {
        let err = EditDialog::for_document("x", &json!({"n": 1})).expect_err("no id");
        assert!(matches!(err, MutationError::MissingIdentifier));
    }

    #[tokio::test]
    async fn confirmed_delete_removes_exactly_one_record() {
        let remote = remote_with(5);
        let page = remote
            .browse(&credentials(), "x", 1, 10)
            .await
            .expect("browse");
        let target = page.records[2].clone();
        let id = document_id(&target).expect("id");

        let mut guard = DeleteGuard::new();
        let pending = guard.request("x", &target).expect("request");
        assert_eq!(pending.id, id);
        let confirmed = guard.confirm(&pending.token).expect("confirm");
        delete_confirmed(&remote, &credentials(), confirmed)
            .await
            .expect("delete");

        let after = remote
            .browse(&credentials(), "x", 1, 10)
            .await
            .expect("browse");
        assert_eq!(after.pagination.total_records, page.pagination.total_records - 1);
        assert!(after
            .records
            .iter()
            .all(|record| document_id(record).as_deref() != Some(id.as_str())));
        assert!(remote
            .cache()
            .connector()
            .calls()
            .contains(&format!("delete:x:{id}")));
    }

    #[test]
    fn delete_tokens_are_single_use() {
        let mut guard = DeleteGuard::new();
        let document = json!({"_id": "a1"});
        let pending = guard.request("x", &document).expect("request");

        guard.confirm(&pending.token).expect("first confirm");
        let err = guard.confirm(&pending.token).expect_err("token reused");
        assert!(matches!(err, MutationError::InvalidToken));

        let second = guard.request("x", &document).expect("request");
        assert_ne!(second.token, pending.token);
        assert!(guard.cancel(&second.token));
        assert_eq!(guard.pending_count(), 0);
        assert!(matches!(
            guard.request("x", &json!({"n": 1})),
            Err(MutationError::MissingIdentifier)
        ));
    }

    #[test]
    fn copied_text_parses_back_to_the_document() {
        let document = json!({
            "_id": "a1",
            "nested": {"list": [1, "two", null, {"deep": true}]},
            "text": "quote \" and \\ backslash",
            "empty": {},
        });
        let mut clipboard = FakeClipboard::default();

        let text = copy_document(&mut clipboard, &document).expect("copy");
        assert_eq!(clipboard.contents.as_deref(), Some(text.as_str()));
        let parsed: Value = parse_document(&text).expect("parse");
        assert_eq!(parsed, document);
    }

    #[test]
    fn copied_text_keeps_stored_field_order() {
        let document = parse_document(r#"{"zeta": 1, "_id": "a1", "alpha": 2}"#).expect("parse");
        let mut clipboard = FakeClipboard::default();

        let text = copy_document(&mut clipboard, &document).expect("copy");
        assert_eq!(text, "{\n  \"zeta\": 1,\n  \"_id\": \"a1\",\n  \"alpha\": 2\n}");
    }

    #[tokio::test]
    async fn update_matching_applies_a_bulk_patch() {
        let remote = remote_with(3);

        let (summary, signal) =
            update_matching(&remote, &credentials(), "x", "doc-000002", r#"{"tag": "t"}"#)
                .await
                .expect("bulk update");
        assert_eq!(summary, json!({"updated": 1}));
        assert_eq!(signal.database, "x");

        let err = update_matching(&remote, &credentials(), "x", "doc-000002", "nope")
            .await
            .expect_err("bad patch");
        assert!(matches!(err, MutationError::Store(StoreError::Validation(_))));
    }
}
