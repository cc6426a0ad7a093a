use std::time::Duration;

use async_trait::async_trait;
use docdeck_core::health::{HealthProbe, HealthReport};
use docdeck_core::store::{
    Connector, CredentialPair, DatabaseDescriptor, Document, DocumentStore, ListQuery, Page,
    QueryType, StatsDescriptor, StoreError,
};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

/// Builds [`HttpConnection`]s against one store base URL. Connecting is
/// local: credentials are sent with every request rather than exchanged
/// for a token.
#[derive(Debug, Clone)]
pub struct HttpConnector {
    base_url: Url,
    client: Client,
}

impl HttpConnector {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = parse_base_url(base_url)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| StoreError::Network(format!("failed to build HTTP client: {error}")))?;
        Ok(Self { base_url, client })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn health_probe(&self) -> HttpHealthProbe {
        HttpHealthProbe {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
        }
    }
}

#[async_trait]
impl Connector for HttpConnector {
    type Connection = HttpConnection;

    fn connect(&self, credentials: &CredentialPair) -> Result<Self::Connection, StoreError> {
        debug!(user = %credentials.user, base_url = %self.base_url, "opening store connection");
        Ok(HttpConnection {
            base_url: self.base_url.clone(),
            client: self.client.clone(),
            credentials: credentials.clone(),
        })
    }

    async fn create_user(&self, username: &str, password: &str) -> Result<Value, StoreError> {
        let url = endpoint(&self.base_url, &["users"])?;
        let request = self
            .client
            .post(url)
            .json(&json!({ "username": username, "password": password }));
        send_json(request).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpConnection {
    base_url: Url,
    client: Client,
    credentials: CredentialPair,
}

#[derive(Serialize)]
struct ListBody<'a> {
    page: u32,
    limit: u32,
    #[serde(flatten)]
    query: &'a ListQuery,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DatabaseListing {
    Wrapped { databases: Vec<DatabaseDescriptor> },
    Bare(Vec<DatabaseDescriptor>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchListing {
    Wrapped { data: Vec<Document> },
    Bare(Vec<Document>),
}

#[derive(Deserialize)]
struct AuthReply {
    #[serde(default)]
    authenticated: bool,
}

impl HttpConnection {
    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        endpoint(&self.base_url, segments)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.credentials.user, Some(&self.credentials.password))
    }
}

#[async_trait]
impl DocumentStore for HttpConnection {
    async fn authenticate(&self) -> Result<bool, StoreError> {
        let request = self.authed(self.client.get(self.url(&["auth"])?));
        match send_json::<AuthReply>(request).await {
            Ok(reply) => Ok(reply.authenticated),
            Err(error) if error.is_authentication() => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn create_database(&self, name: &str) -> Result<DatabaseDescriptor, StoreError> {
        let request = self
            .authed(self.client.post(self.url(&["databases"])?))
            .json(&json!({ "name": name }));
        let reply: Value = send_json(request).await?;
        Ok(serde_json::from_value(reply).unwrap_or_else(|_| DatabaseDescriptor::new(name)))
    }

    async fn list_databases(&self) -> Result<Vec<DatabaseDescriptor>, StoreError> {
        let request = self.authed(self.client.get(self.url(&["databases"])?));
        Ok(match send_json(request).await? {
            DatabaseListing::Wrapped { databases } | DatabaseListing::Bare(databases) => databases,
        })
    }

    async fn stats(&self, database: &str) -> Result<StatsDescriptor, StoreError> {
        let request = self.authed(
            self.client
                .get(self.url(&["databases", database, "stats"])?),
        );
        send_json(request).await
    }

    async fn browse(&self, database: &str, page: u32, limit: u32) -> Result<Page, StoreError> {
        let request = self.authed(
            self.client
                .get(self.url(&["databases", database, "browse"])?)
                .query(&[("page", page), ("limit", limit)]),
        );
        send_json(request).await
    }

    async fn list(
        &self,
        database: &str,
        page: u32,
        limit: u32,
        query: &ListQuery,
    ) -> Result<Page, StoreError> {
        let request = self
            .authed(self.client.post(self.url(&["databases", database, "list"])?))
            .json(&ListBody { page, limit, query });
        send_json(request).await
    }

    async fn search(
        &self,
        database: &str,
        query: &str,
        query_type: QueryType,
    ) -> Result<Vec<Document>, StoreError> {
        let request = self.authed(
            self.client
                .get(self.url(&["databases", database, "search"])?)
                .query(&[("query", query), ("query_type", query_type.as_str())]),
        );
        Ok(match send_json(request).await? {
            SearchListing::Wrapped { data } | SearchListing::Bare(data) => data,
        })
    }

    async fn insert(&self, database: &str, document: &Document) -> Result<Document, StoreError> {
        let request = self
            .authed(
                self.client
                    .post(self.url(&["databases", database, "records"])?),
            )
            .json(document);
        send_json(request).await
    }

    async fn update_by_id(
        &self,
        database: &str,
        id: &str,
        patch: &Document,
    ) -> Result<Document, StoreError> {
        let request = self
            .authed(
                self.client
                    .put(self.url(&["databases", database, "records", id])?),
            )
            .json(patch);
        send_json(request).await
    }

    async fn update_by_query(
        &self,
        database: &str,
        query: &str,
        patch: &Document,
    ) -> Result<Value, StoreError> {
        let request = self
            .authed(
                self.client
                    .put(self.url(&["databases", database, "records"])?)
                    .query(&[("query", query)]),
            )
            .json(patch);
        send_json(request).await
    }

    async fn delete(&self, database: &str, query: &str) -> Result<Value, StoreError> {
        let request = self.authed(
            self.client
                .delete(self.url(&["databases", database, "records"])?)
                .query(&[("query", query)]),
        );
        send_json(request).await
    }
}

/// Unauthenticated `GET /health`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    base_url: Url,
    client: Client,
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self) -> Result<HealthReport, StoreError> {
        let url = endpoint(&self.base_url, &["health"])?;
        send_json(self.client.get(url)).await
    }
}

fn parse_base_url(raw: &str) -> Result<Url, StoreError> {
    let url = Url::parse(raw.trim())
        .map_err(|error| StoreError::validation(format!("invalid base URL `{raw}`: {error}")))?;
    if url.cannot_be_a_base() {
        return Err(StoreError::validation(format!(
            "base URL `{raw}` cannot carry a path"
        )));
    }
    Ok(url)
}

/// Appends percent-encoded path segments to `base`.
fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, StoreError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| StoreError::validation(format!("base URL `{base}` cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, StoreError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let body = response.text().await.map_err(transport_error)?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    serde_json::from_str(&body)
        .map_err(|error| StoreError::Protocol(format!("unexpected response body: {error}")))
}

fn transport_error(error: reqwest::Error) -> StoreError {
    if error.is_timeout() {
        StoreError::Network(format!("request timed out: {error}"))
    } else if error.is_decode() {
        StoreError::Protocol(error.to_string())
    } else {
        StoreError::Network(error.to_string())
    }
}

fn status_error(status: StatusCode, body: &str) -> StoreError {
    let message = error_message(body)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Authentication(message),
        _ => StoreError::Remote {
            status: status.as_u16(),
            message,
        },
    }
}

/// Reads `{error}` or `{message}` from an error body, else the raw text.
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(trimmed) {
        for key in ["error", "message"] {
            if let Some(Value::String(message)) = fields.get(key) {
                return Some(message.clone());
            }
        }
    }
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use docdeck_core::store::StoreError;
    use reqwest::StatusCode;

    use super::{endpoint, parse_base_url, status_error, HttpConnector};

    #[test]
    fn endpoint_encodes_path_segments() {
        let base = parse_base_url("http://localhost:3030/").expect("valid base");
        let url = endpoint(&base, &["databases", "my db", "records", "a/b"]).expect("url");
        assert_eq!(
            url.as_str(),
            "http://localhost:3030/databases/my%20db/records/a%2Fb"
        );
    }

    #[test]
    fn endpoint_keeps_a_base_path_prefix() {
        let base = parse_base_url("http://store.internal/api").expect("valid base");
        let url = endpoint(&base, &["health"]).expect("url");
        assert_eq!(url.as_str(), "http://store.internal/api/health");
    }

    #[test]
    fn invalid_base_urls_are_validation_errors() {
        for raw in ["", "localhost:3030 with spaces", "mailto:someone@example.com"] {
            let err = HttpConnector::new(raw, Duration::from_secs(1))
                .expect_err("base URL should be rejected");
            assert!(matches!(err, StoreError::Validation(_)), "{raw}: {err:?}");
        }
    }

    #[test]
    fn auth_statuses_map_to_authentication_errors() {
        assert!(status_error(StatusCode::UNAUTHORIZED, "").is_authentication());
        assert!(status_error(StatusCode::FORBIDDEN, "nope").is_authentication());
    }

    #[test]
    fn other_statuses_carry_code_and_body_message() {
        assert_eq!(
            status_error(StatusCode::NOT_FOUND, r#"{"error":"record missing"}"#),
            StoreError::Remote {
                status: 404,
                message: "record missing".to_string(),
            }
        );
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, r#"{"message":"bad limit"}"#),
            StoreError::Remote {
                status: 400,
                message: "bad limit".to_string(),
            }
        );
        assert_eq!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, ""),
            StoreError::Remote {
                status: 500,
                message: "Internal Server Error".to_string(),
            }
        );
    }
}
