//! Paginated browsing of one database view.
//!
//! The browser is a pure state machine: transitions return the
//! [`FetchRequest`] that must be issued, and completions are fed back
//! through [`PaginatedBrowser::apply`]. Every request carries a sequence
//! number and only the response to the latest request is applied;
//! superseded responses are discarded, never merged.

use tracing::debug;

use crate::remote::RemoteOperations;
use crate::store::{
    Connector, CredentialPair, Document, ListQuery, Page, StatsDescriptor, StoreError,
    MAX_PAGE_LIMIT, MIN_PAGE_LIMIT,
};

pub const DEFAULT_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserStatus {
    Idle,
    Loading,
    Loaded,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub seq: u64,
    pub database: String,
    pub page: u32,
    pub limit: u32,
    pub query: Option<ListQuery>,
}

/// Completion of a [`FetchRequest`]: the page and the stats snapshot
/// fetched alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub seq: u64,
    pub page: Result<Page, StoreError>,
    pub stats: Result<StatsDescriptor, StoreError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Current,
    Stale,
}

#[derive(Debug, Clone)]
pub struct PaginatedBrowser {
    database: String,
    page: u32,
    loaded_page: u32,
    limit: u32,
    status: BrowserStatus,
    data: Option<Page>,
    stats: Option<StatsDescriptor>,
    query: Option<ListQuery>,
    last_error: Option<StoreError>,
    latest_seq: u64,
    quick_filter: String,
}

impl PaginatedBrowser {
    /// `limit` outside `[1, 1000]` falls back to the default.
    #[must_use]
    pub fn new(database: impl Into<String>, limit: u32) -> Self {
        let limit = if is_valid_limit(limit) {
            limit
        } else {
            DEFAULT_PAGE_LIMIT
        };
        Self {
            database: database.into(),
            page: 1,
            loaded_page: 1,
            limit,
            status: BrowserStatus::Idle,
            data: None,
            stats: None,
            query: None,
            last_error: None,
            latest_seq: 0,
            quick_filter: String::new(),
        }
    }

    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn page(&self) -> u32 {
        self.page
    }

    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    #[must_use]
    pub fn status(&self) -> BrowserStatus {
        self.status
    }

    #[must_use]
    pub fn data(&self) -> Option<&Page> {
        self.data.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> Option<StatsDescriptor> {
        self.stats
    }

    #[must_use]
    pub fn query(&self) -> Option<&ListQuery> {
        self.query.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&StoreError> {
        self.last_error.as_ref()
    }

    #[must_use]
    pub fn latest_seq(&self) -> u64 {
        self.latest_seq
    }

    pub fn open(&mut self) -> FetchRequest {
        self.issue()
    }

    /// Moves to page `page` when it lies within the page count last
    /// reported by the store. The target is checked on its own, so paging
    /// back while a forward request is in flight works.
    pub fn set_page(&mut self, page: u32) -> Option<FetchRequest> {
        if page == 0 || page == self.page {
            return None;
        }
        let total_pages = self.data.as_ref()?.pagination.total_pages;
        if u64::from(page) > total_pages {
            return None;
        }
        self.page = page;
        Some(self.issue())
    }

    pub fn next_page(&mut self) -> Option<FetchRequest> {
        self.set_page(self.page.saturating_add(1))
    }

    pub fn previous_page(&mut self) -> Option<FetchRequest> {
        self.set_page(self.page.saturating_sub(1))
    }

    /// Accepts limits in `[1, 1000]`; a change always restarts at page 1.
    pub fn set_limit(&mut self, limit: u32) -> Option<FetchRequest> {
        if !is_valid_limit(limit) {
            debug!(limit, "ignoring out-of-range limit");
            return None;
        }
        self.limit = limit;
        self.page = 1;
        Some(self.issue())
    }

    /// Text form of [`Self::set_limit`]; non-numeric input is ignored.
    pub fn set_limit_input(&mut self, raw: &str) -> Option<FetchRequest> {
        let Ok(limit) = raw.trim().parse::<u32>() else {
            debug!(raw, "ignoring non-numeric limit");
            return None;
        };
        self.set_limit(limit)
    }

    /// Switches between plain browsing (`None`) and a sorted/filtered
    /// listing. Restarts at page 1.
    pub fn set_query(&mut self, query: Option<ListQuery>) -> FetchRequest {
        self.query = query;
        self.page = 1;
        self.issue()
    }

    /// Refetches the current window without touching page or limit.
    pub fn refresh(&mut self) -> FetchRequest {
        self.issue()
    }

    pub fn apply(&mut self, outcome: FetchOutcome) -> Applied {
        if outcome.seq != self.latest_seq {
            debug!(
                seq = outcome.seq,
                latest = self.latest_seq,
                "discarding stale page response"
            );
            return Applied::Stale;
        }

        match outcome.stats {
            Ok(stats) => self.stats = Some(stats),
            Err(error) => debug!(%error, "stats refresh failed, keeping previous snapshot"),
        }

        match outcome.page {
            Ok(page) => {
                self.data = Some(page);
                self.loaded_page = self.page;
                self.last_error = None;
                self.status = BrowserStatus::Loaded;
            }
            Err(error) => {
                // Page number follows the data that is still shown.
                self.page = self.loaded_page;
                self.last_error = Some(error);
                self.status = BrowserStatus::Error;
            }
        }
        Applied::Current
    }

    pub fn set_quick_filter(&mut self, needle: impl Into<String>) {
        self.quick_filter = needle.into();
    }

    #[must_use]
    pub fn quick_filter(&self) -> &str {
        &self.quick_filter
    }

    /// Loaded records matching the quick filter (case-insensitive
    /// substring over the compact JSON text of each record).
    #[must_use]
    pub fn visible_records(&self) -> Vec<&Document> {
        let Some(page) = &self.data else {
            return Vec::new();
        };
        let needle = self.quick_filter.trim().to_lowercase();
        if needle.is_empty() {
            return page.records.iter().collect();
        }
        page.records
            .iter()
            .filter(|record| record.to_string().to_lowercase().contains(&needle))
            .collect()
    }

    /// "`shown` of `total` documents", where total comes from the store
    /// when known.
    #[must_use]
    pub fn summary(&self) -> String {
        let shown = self.visible_records().len();
        let total = self.data.as_ref().map_or(0, |page| {
            if page.pagination.total_records > 0 {
                page.pagination.total_records
            } else {
                page.records.len() as u64
            }
        });
        format!("{shown} of {total} documents")
    }

    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.data
            .as_ref()
            .map_or(0, |page| page.pagination.total_pages)
    }

    fn issue(&mut self) -> FetchRequest {
        self.latest_seq += 1;
        self.status = BrowserStatus::Loading;
        FetchRequest {
            seq: self.latest_seq,
            database: self.database.clone(),
            page: self.page,
            limit: self.limit,
            query: self.query.clone(),
        }
    }
}

#[must_use]
pub fn is_valid_limit(limit: u32) -> bool {
    (MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&limit)
}

/// Runs `request` against the store: the page (through `list` when a
/// query is set, `browse` otherwise) followed by a stats snapshot.
pub async fn execute<K: Connector>(
    remote: &RemoteOperations<K>,
    credentials: &CredentialPair,
    request: &FetchRequest,
) -> FetchOutcome {
    let page = match &request.query {
        Some(query) => {
            remote
                .list(
                    credentials,
                    &request.database,
                    request.page,
                    request.limit,
                    query,
                )
                .await
        }
        None => {
            remote
                .browse(credentials, &request.database, request.page, request.limit)
                .await
        }
    };
    let stats = remote.get_stats(credentials, &request.database).await;
    FetchOutcome {
        seq: request.seq,
        page,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        execute, Applied, BrowserStatus, FetchOutcome, FetchRequest, PaginatedBrowser,
        DEFAULT_PAGE_LIMIT,
    };
    use crate::memory::MemoryConnector;
    use crate::remote::RemoteOperations;
    use crate::store::{
        CredentialPair, ListQuery, Page, Pagination, SortOrder, StatsDescriptor, StoreError,
    };

    fn page_of(records: Vec<serde_json::Value>, total_pages: u64, page: u32) -> Page {
        Page {
            pagination: Pagination {
                total_records: 1_000,
                total_pages,
                has_next: u64::from(page) < total_pages,
                has_prev: page > 1,
            },
            records,
        }
    }

    fn ok(request: &FetchRequest, page: Page) -> FetchOutcome {
        FetchOutcome {
            seq: request.seq,
            page: Ok(page),
            stats: Ok(StatsDescriptor {
                total_records: 1_000,
                size_bytes: 2_048,
            }),
        }
    }

    fn loaded_browser(limit: u32, total_pages: u64) -> PaginatedBrowser {
        let mut browser = PaginatedBrowser::new("x", limit);
        let request = browser.open();
        browser.apply(ok(&request, page_of(vec![json!({"p": 1})], total_pages, 1)));
        browser
    }

    #[test]
    fn open_moves_from_idle_to_loading_to_loaded() {
        let mut browser = PaginatedBrowser::new("x", 100);
        assert_eq!(browser.status(), BrowserStatus::Idle);

        let request = browser.open();
        assert_eq!(browser.status(), BrowserStatus::Loading);
        assert_eq!((request.page, request.limit), (1, 100));

        assert_eq!(
            browser.apply(ok(&request, page_of(vec![], 1, 1))),
            Applied::Current
        );
        assert_eq!(browser.status(), BrowserStatus::Loaded);
        assert_eq!(browser.stats().map(|stats| stats.size_bytes), Some(2_048));
    }

    #[test]
    fn limit_change_issues_first_page_with_new_limit() {
        let mut browser = loaded_browser(100, 10);
        let request = browser.next_page().expect("page 2 exists");
        browser.apply(ok(&request, page_of(vec![], 10, 2)));
        assert_eq!(browser.page(), 2);

        let request = browser.set_limit(50).expect("50 is a valid limit");
        assert_eq!((request.page, request.limit), (1, 50));
        assert_eq!(browser.page(), 1);
    }

    #[test]
    fn limit_change_always_resets_page_regardless_of_prior_page() {
        for prior_page in 1..=5 {
            let mut browser = loaded_browser(10, 6);
            for _ in 1..prior_page {
                let request = browser.next_page().expect("next page exists");
                let page = browser.page();
                browser.apply(ok(&request, page_of(vec![], 6, page)));
            }
            assert_eq!(browser.page(), prior_page);

            browser.set_limit(25).expect("valid limit");
            assert_eq!(browser.page(), 1);
        }
    }

    #[test]
    fn invalid_limits_change_nothing_and_issue_nothing() {
        let mut browser = loaded_browser(100, 3);
        let seq = browser.latest_seq();

        assert!(browser.set_limit(0).is_none());
        assert!(browser.set_limit(1_001).is_none());
        assert!(browser.set_limit_input("abc").is_none());
        assert!(browser.set_limit_input("-5").is_none());
        assert!(browser.set_limit_input("").is_none());

        assert_eq!(browser.limit(), 100);
        assert_eq!(browser.latest_seq(), seq);
        assert_eq!(browser.status(), BrowserStatus::Loaded);

        let request = browser.set_limit_input(" 1000 ").expect("trimmed input");
        assert_eq!(request.limit, 1_000);
    }

    #[test]
    fn paging_outside_pagination_bounds_is_a_no_op() {
        let mut browser = loaded_browser(100, 1);
        let seq = browser.latest_seq();

        assert!(browser.next_page().is_none());
        assert!(browser.previous_page().is_none());
        assert!(browser.set_page(7).is_none());
        assert_eq!(browser.page(), 1);
        assert_eq!(browser.latest_seq(), seq);
    }

    #[test]
    fn paging_before_first_load_is_a_no_op() {
        let mut browser = PaginatedBrowser::new("x", 100);
        assert!(browser.next_page().is_none());
        assert_eq!(browser.status(), BrowserStatus::Idle);
    }

    #[test]
    fn refresh_keeps_page_and_limit() {
        let mut browser = loaded_browser(20, 4);
        let request = browser.next_page().expect("page 2");
        browser.apply(ok(&request, page_of(vec![], 4, 2)));

        let refresh = browser.refresh();
        assert_eq!((refresh.page, refresh.limit), (2, 20));
        assert_eq!(browser.status(), BrowserStatus::Loading);
    }

    #[test]
    fn failure_keeps_last_good_page() {
        let mut browser = loaded_browser(100, 2);
        let request = browser.refresh();

        browser.apply(FetchOutcome {
            seq: request.seq,
            page: Err(StoreError::Network("timeout".to_string())),
            stats: Err(StoreError::Network("timeout".to_string())),
        });

        assert_eq!(browser.status(), BrowserStatus::Error);
        assert_eq!(
            browser.data().map(|page| page.records.clone()),
            Some(vec![json!({"p": 1})])
        );
        assert!(browser.stats().is_some());
        assert!(matches!(browser.last_error(), Some(StoreError::Network(_))));
    }

    #[test]
    fn paging_back_works_while_forward_request_is_in_flight() {
        let mut browser = loaded_browser(100, 3);
        let forward = browser.next_page().expect("page 2");
        assert_eq!(forward.page, 2);

        let back = browser.previous_page().expect("page 1 is always reachable");
        assert_eq!(back.page, 1);
        assert!(back.seq > forward.seq);
        assert_eq!(
            browser.apply(ok(&forward, page_of(vec![json!({"p": 2})], 3, 2))),
            Applied::Stale
        );
        assert_eq!(browser.page(), 1);
    }

    #[test]
    fn failed_page_change_returns_to_the_page_on_screen() {
        let mut browser = loaded_browser(100, 3);
        let request = browser.next_page().expect("page 2");
        assert_eq!(browser.page(), 2);

        browser.apply(FetchOutcome {
            seq: request.seq,
            page: Err(StoreError::Network("refused".to_string())),
            stats: Err(StoreError::Network("refused".to_string())),
        });

        assert_eq!(browser.page(), 1);
        assert_eq!(
            browser.data().map(|page| page.records.clone()),
            Some(vec![json!({"p": 1})])
        );
        assert!(browser.next_page().is_some());
    }

    #[test]
    fn late_response_for_superseded_request_is_discarded() {
        let mut browser = loaded_browser(100, 3);

        let first = browser.refresh();
        let second = browser.next_page().expect("page 2");
        assert_eq!((first.page, second.page), (1, 2));
        assert!(second.seq > first.seq);

        let page_two = page_of(vec![json!({"p": 2})], 3, 2);
        assert_eq!(browser.apply(ok(&second, page_two)), Applied::Current);
        assert_eq!(
            browser.apply(ok(&first, page_of(vec![json!({"p": 1})], 3, 1))),
            Applied::Stale
        );

        assert_eq!(browser.page(), 2);
        assert_eq!(browser.status(), BrowserStatus::Loaded);
        assert_eq!(
            browser.data().map(|page| page.records.clone()),
            Some(vec![json!({"p": 2})])
        );
    }

    #[test]
    fn stale_error_does_not_clobber_loading_state() {
        let mut browser = loaded_browser(100, 3);
        let first = browser.refresh();
        let _second = browser.refresh();

        let applied = browser.apply(FetchOutcome {
            seq: first.seq,
            page: Err(StoreError::Network("slow".to_string())),
            stats: Err(StoreError::Network("slow".to_string())),
        });
        assert_eq!(applied, Applied::Stale);
        assert_eq!(browser.status(), BrowserStatus::Loading);
        assert!(browser.last_error().is_none());
    }

    #[test]
    fn setting_a_query_restarts_at_first_page() {
        let mut browser = loaded_browser(10, 5);
        let request = browser.next_page().expect("page 2");
        browser.apply(ok(&request, page_of(vec![], 5, 2)));

        let request = browser.set_query(Some(ListQuery::sorted_by("n", SortOrder::Desc)));
        assert_eq!(request.page, 1);
        assert!(request.query.is_some());
    }

    #[test]
    fn quick_filter_is_case_insensitive_over_record_text() {
        let mut browser = PaginatedBrowser::new("x", 10);
        let request = browser.open();
        browser.apply(ok(
            &request,
            page_of(
                vec![json!({"name": "Alpha"}), json!({"name": "beta"})],
                1,
                1,
            ),
        ));

        browser.set_quick_filter("ALP");
        assert_eq!(browser.visible_records(), vec![&json!({"name": "Alpha"})]);
        assert_eq!(browser.summary(), "1 of 1000 documents");

        browser.set_quick_filter("");
        assert_eq!(browser.visible_records().len(), 2);
    }

    #[test]
    fn invalid_initial_limit_falls_back_to_default() {
        assert_eq!(PaginatedBrowser::new("x", 0).limit(), DEFAULT_PAGE_LIMIT);
        assert_eq!(PaginatedBrowser::new("x", 5_000).limit(), DEFAULT_PAGE_LIMIT);
    }

    #[tokio::test]
    async fn execute_fetches_page_and_stats_through_the_store() {
        let documents = (0..12).map(|n| json!({ "n": n })).collect();
        let remote = RemoteOperations::new(
            MemoryConnector::default()
                .with_user("ana", "pw")
                .with_documents("ana", "x", documents),
        );
        let credentials = CredentialPair::new("ana", "pw");
        let mut browser = PaginatedBrowser::new("x", 5);

        let request = browser.open();
        let outcome = execute(&remote, &credentials, &request).await;
        browser.apply(outcome);

        let page = browser.data().expect("loaded page");
        assert_eq!(page.records.len(), 5);
        assert_eq!(page.pagination.total_pages, 3);
        assert_eq!(browser.stats().map(|stats| stats.total_records), Some(12));

        let request = browser.set_query(Some(ListQuery::sorted_by("n", SortOrder::Desc)));
        browser.apply(execute(&remote, &credentials, &request).await);
        let first = browser
            .data()
            .and_then(|page| page.records.first())
            .map(|record| record["n"].clone());
        assert_eq!(first, Some(json!(11)));
        assert!(remote
            .cache()
            .connector()
            .calls()
            .contains(&"list:x:1:5".to_string()));
    }
}
