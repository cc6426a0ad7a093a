use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use docdeck_core::browser::{Applied, FetchOutcome, FetchRequest, PaginatedBrowser};
use docdeck_core::lazy_mount::{LazyList, ViewportTrigger};
use docdeck_core::mutation::{
    pretty_document, ConfirmedDelete, DeleteGuard, EditDialog, InsertDialog, MutationError,
    PendingDelete, RefreshSignal,
};
use docdeck_core::store::{
    CredentialPair, DatabaseDescriptor, Document, ListQuery, QueryType, SortOrder, StoreError,
};
use docdeck_core::tree::DocumentCard;
use serde_json::Value;
use tracing::debug;
use tui_textarea::Input;

use crate::editor::JsonEditor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pane {
    Login,
    Databases,
    Documents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputMode {
    Normal,
    Text,
    Editor,
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoginField {
    User,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoginForm {
    pub(crate) user: String,
    pub(crate) password: String,
    pub(crate) focus: LoginField,
    pub(crate) register: bool,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            focus: LoginField::User,
            register: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PromptKind {
    Filter,
    Limit,
    Search,
    Sort,
    NewDatabase,
}

impl PromptKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Filter => "Filter",
            Self::Limit => "Page size (1-1000)",
            Self::Search => "Search",
            Self::Sort => "Sort (field [asc|desc], empty to clear)",
            Self::NewDatabase => "New database name",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Prompt {
    pub(crate) kind: PromptKind,
    pub(crate) text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirectionKey {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SearchState {
    pub(crate) seq: u64,
    pub(crate) query: String,
    pub(crate) query_type: QueryType,
    pub(crate) results: Option<Vec<Document>>,
}

/// One line of the documents pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RowKind {
    Header,
    Field(Vec<usize>),
    Placeholder,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RowView {
    pub(crate) card: usize,
    pub(crate) kind: RowKind,
    pub(crate) text: String,
}

/// State of the open database.
#[derive(Debug)]
pub(crate) struct DocumentsView {
    pub(crate) id: u64,
    pub(crate) browser: PaginatedBrowser,
    pub(crate) cards: LazyList<Document, DocumentCard>,
    pub(crate) search: Option<SearchState>,
    search_seq: u64,
    pub(crate) query_type: QueryType,
    /// Shows the listed documents as one pretty-printed JSON array.
    pub(crate) raw: bool,
    pub(crate) cursor: usize,
    pub(crate) scroll: usize,
    pub(crate) insert: InsertDialog,
    pub(crate) edit: Option<EditDialog>,
    pub(crate) editor: Option<JsonEditor>,
    pub(crate) pending_delete: Option<PendingDelete>,
}

impl DocumentsView {
    fn new(id: u64, database: &str, limit: u32) -> Self {
        Self {
            id,
            browser: PaginatedBrowser::new(database, limit),
            cards: LazyList::new(Vec::new(), 1),
            search: None,
            search_seq: 0,
            query_type: QueryType::Value,
            raw: false,
            cursor: 0,
            scroll: 0,
            insert: InsertDialog::new(database),
            edit: None,
            editor: None,
            pending_delete: None,
        }
    }

    pub(crate) fn database(&self) -> &str {
        self.browser.database()
    }

    /// Documents currently listed: search results when a search is
    /// active, otherwise the quick-filtered page.
    fn listed(&self) -> Vec<Document> {
        match self.search.as_ref().and_then(|search| search.results.as_ref()) {
            Some(results) => results.clone(),
            None => self.browser.visible_records().into_iter().cloned().collect(),
        }
    }

    fn no_selection(&self) -> String {
        if self.raw {
            "Press v to pick a document in the tree view".to_string()
        } else {
            "No document selected".to_string()
        }
    }

    fn rebuild_cards(&mut self) {
        self.cards = LazyList::new(self.listed(), 1);
        self.cursor = 0;
        self.scroll = 0;
    }

    fn next_search_seq(&mut self) -> u64 {
        self.search_seq += 1;
        self.search_seq
    }

    pub(crate) fn rows(&self) -> Vec<RowView> {
        if self.raw {
            return pretty_document(&Value::Array(self.listed()))
                .lines()
                .map(|line| RowView {
                    card: 0,
                    kind: RowKind::Raw,
                    text: line.to_string(),
                })
                .collect();
        }
        let mut rows = Vec::new();
        for (index, (_, mount)) in self.cards.iter().enumerate() {
            let Some(card) = mount.content() else {
                rows.push(RowView {
                    card: index,
                    kind: RowKind::Placeholder,
                    text: format!("  #{} …", index + 1),
                });
                continue;
            };
            let marker = if card.expanded { "▾" } else { "▸" };
            rows.push(RowView {
                card: index,
                kind: RowKind::Header,
                text: format!("{marker} {}", card.title()),
            });
            for row in card.rows() {
                rows.push(RowView {
                    card: index,
                    kind: RowKind::Field(row.path.clone()),
                    text: format!("{}{}", "  ".repeat(row.depth + 1), row.node.line()),
                });
            }
        }
        rows
    }

    fn document_at_cursor(&self) -> Option<&Document> {
        if self.raw {
            return None;
        }
        let card = self.rows().get(self.cursor)?.card;
        self.cards.iter().nth(card).map(|(document, _)| document)
    }

    fn card_at_cursor_mut(&mut self) -> Option<(RowKind, &mut DocumentCard)> {
        if self.raw {
            return None;
        }
        let row = self.rows().into_iter().nth(self.cursor)?;
        let (_, mount) = self.cards.get_mut(row.card)?;
        Some((row.kind, mount.content_mut()?))
    }
}

/// Side effects requested by the state machine. Each is executed by the
/// runtime and answered, when it has a result, with a [`Completion`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Authenticate(CredentialPair),
    Register {
        username: String,
        password: String,
    },
    LoadDatabases(CredentialPair),
    CreateDatabase(CredentialPair, String),
    Fetch {
        view: u64,
        credentials: CredentialPair,
        request: FetchRequest,
    },
    Search {
        view: u64,
        seq: u64,
        credentials: CredentialPair,
        database: String,
        query: String,
        query_type: QueryType,
    },
    Insert {
        view: u64,
        credentials: CredentialPair,
        database: String,
        document: Document,
    },
    Update {
        view: u64,
        credentials: CredentialPair,
        database: String,
        id: String,
        patch: Document,
    },
    Delete {
        view: u64,
        credentials: CredentialPair,
        confirmed: ConfirmedDelete,
    },
    Copy(Document),
    PersistLogin(CredentialPair),
    RecordHealth(bool),
    Logout,
}

impl Command {
    /// Whether the command runs against the store and answers with a
    /// [`Completion`] later.
    fn is_remote(&self) -> bool {
        !matches!(
            self,
            Self::Copy(_) | Self::PersistLogin(_) | Self::RecordHealth(_) | Self::Logout
        )
    }
}

#[derive(Debug)]
pub(crate) enum Completion {
    Authenticated(CredentialPair, Result<(), StoreError>),
    Registered(Result<Value, StoreError>),
    Databases(Result<Vec<DatabaseDescriptor>, StoreError>),
    DatabaseCreated(Result<DatabaseDescriptor, StoreError>),
    Fetched {
        view: u64,
        outcome: FetchOutcome,
    },
    Searched {
        view: u64,
        seq: u64,
        result: Result<Vec<Document>, StoreError>,
    },
    Inserted {
        view: u64,
        result: Result<Document, StoreError>,
    },
    Updated {
        view: u64,
        result: Result<Document, StoreError>,
    },
    Deleted {
        view: u64,
        result: Result<RefreshSignal, MutationError>,
    },
    Copied(Result<(), MutationError>),
    Health(bool),
    SessionFailed(String),
}

impl Completion {
    fn is_remote(&self) -> bool {
        !matches!(
            self,
            Self::Copied(_) | Self::Health(_) | Self::SessionFailed(_)
        )
    }
}

#[derive(Debug)]
pub(crate) enum Msg {
    Quit,
    ToggleHelp,
    Submit,
    Cancel,
    NextField,
    Input(char),
    Backspace,
    Edit(Input),
    Navigate(DirectionKey),
    Toggle,
    ExpandAll,
    CollapseAll,
    NextPage,
    PreviousPage,
    Refresh,
    StartFilter,
    StartLimit,
    StartSearch,
    StartSort,
    NewDatabase,
    OpenInsert,
    OpenEdit,
    RequestDelete,
    Confirm(bool),
    Copy,
    ToggleRaw,
    ToggleRegister,
    Logout,
    Completed(Completion),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AppSettings {
    pub(crate) default_limit: u32,
    pub(crate) mount_margin_rows: usize,
}

#[derive(Debug)]
pub(crate) struct TuiApp {
    pub(crate) settings: AppSettings,
    pub(crate) pane: Pane,
    pub(crate) login: LoginForm,
    pub(crate) credentials: Option<CredentialPair>,
    pub(crate) databases: Vec<DatabaseDescriptor>,
    pub(crate) database_filter: String,
    pub(crate) database_cursor: usize,
    pub(crate) documents: Option<DocumentsView>,
    pub(crate) prompt: Option<Prompt>,
    pub(crate) delete_guard: DeleteGuard,
    pub(crate) server_up: Option<bool>,
    pub(crate) show_help: bool,
    pub(crate) should_quit: bool,
    in_flight: usize,
    pub(crate) status_line: String,
    pub(crate) viewport_rows: usize,
    next_view: u64,
}

impl TuiApp {
    pub(crate) fn new(settings: AppSettings) -> Self {
        Self {
            settings,
            pane: Pane::Login,
            login: LoginForm::default(),
            credentials: None,
            databases: Vec::new(),
            database_filter: String::new(),
            database_cursor: 0,
            documents: None,
            prompt: None,
            delete_guard: DeleteGuard::new(),
            server_up: None,
            show_help: false,
            should_quit: false,
            in_flight: 0,
            status_line: "Enter credentials and press Enter to sign in".to_string(),
            viewport_rows: 20,
            next_view: 0,
        }
    }

    /// Starts from credentials remembered by a previous run.
    pub(crate) fn resume(&mut self, credentials: CredentialPair) -> Vec<Command> {
        self.login.user.clone_from(&credentials.user);
        self.status_line = format!("Restoring session for `{}`", credentials.user);
        let commands = vec![Command::Authenticate(credentials)];
        self.track(&commands);
        commands
    }

    /// True while any store request is unanswered.
    pub(crate) fn busy(&self) -> bool {
        self.in_flight > 0
    }

    fn track(&mut self, commands: &[Command]) {
        self.in_flight += commands.iter().filter(|command| command.is_remote()).count();
    }

    pub(crate) fn input_mode(&self) -> InputMode {
        let editing = self
            .documents
            .as_ref()
            .is_some_and(|view| view.editor.is_some());
        let confirming = self
            .documents
            .as_ref()
            .is_some_and(|view| view.pending_delete.is_some());
        if self.pane == Pane::Documents && editing {
            InputMode::Editor
        } else if self.pane == Pane::Documents && confirming {
            InputMode::Confirm
        } else if self.prompt.is_some() || self.pane == Pane::Login {
            InputMode::Text
        } else {
            InputMode::Normal
        }
    }

    pub(crate) fn visible_databases(&self) -> Vec<&DatabaseDescriptor> {
        let needle = self.database_filter.trim().to_lowercase();
        self.databases
            .iter()
            .filter(|database| needle.is_empty() || database.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub(crate) fn handle(&mut self, msg: Msg) -> Vec<Command> {
        let commands = self.dispatch(msg);
        self.track(&commands);
        commands
    }

    fn dispatch(&mut self, msg: Msg) -> Vec<Command> {
        match msg {
            Msg::Completed(completion) => self.complete(completion),
            Msg::Quit => {
                self.should_quit = true;
                Vec::new()
            }
            Msg::ToggleHelp => {
                self.show_help = !self.show_help;
                Vec::new()
            }
            Msg::Logout => self.logout(),
            other => match self.input_mode() {
                InputMode::Editor => self.handle_editor(other),
                InputMode::Confirm => self.handle_confirm(other),
                InputMode::Text if self.prompt.is_some() => self.handle_prompt(other),
                InputMode::Text => self.handle_login(other),
                InputMode::Normal => self.handle_normal(other),
            },
        }
    }

    /// Lays out cards for a viewport of `rows` lines, mounting the ones
    /// near it, and keeps the cursor on screen.
    pub(crate) fn sync_viewport(&mut self, rows: usize) {
        self.viewport_rows = rows.max(1);
        let margin = self.settings.mount_margin_rows;
        let Some(view) = self.documents.as_mut() else {
            return;
        };
        if view.raw {
            let total = view.rows().len();
            view.scroll = view.scroll.min(total.saturating_sub(self.viewport_rows));
            view.cursor = view.scroll;
            return;
        }
        for _ in 0..2 {
            view.cards.observe(
                &ViewportTrigger::new(view.scroll, self.viewport_rows, margin),
                |index, document| DocumentCard::new(index, document.clone()),
                DocumentCard::height,
            );
            let total = view.rows().len();
            view.cursor = view.cursor.min(total.saturating_sub(1));
            let previous = view.scroll;
            if view.cursor < view.scroll {
                view.scroll = view.cursor;
            } else if view.cursor >= view.scroll + self.viewport_rows {
                view.scroll = view.cursor + 1 - self.viewport_rows;
            }
            if view.scroll == previous {
                break;
            }
        }
    }

    fn handle_login(&mut self, msg: Msg) -> Vec<Command> {
        let field = match self.login.focus {
            LoginField::User => &mut self.login.user,
            LoginField::Password => &mut self.login.password,
        };
        match msg {
            Msg::Input(ch) => field.push(ch),
            Msg::Backspace => {
                field.pop();
            }
            Msg::NextField | Msg::Navigate(_) => {
                self.login.focus = match self.login.focus {
                    LoginField::User => LoginField::Password,
                    LoginField::Password => LoginField::User,
                };
            }
            Msg::ToggleRegister => {
                self.login.register = !self.login.register;
                self.status_line = if self.login.register {
                    "Create a new user, then sign in".to_string()
                } else {
                    "Enter credentials and press Enter to sign in".to_string()
                };
            }
            Msg::Cancel => self.should_quit = true,
            Msg::Submit => return self.submit_login(),
            _ => {}
        }
        Vec::new()
    }

    fn submit_login(&mut self) -> Vec<Command> {
        let user = self.login.user.trim().to_string();
        if user.is_empty() || self.login.password.is_empty() {
            self.status_line = "User and password are required".to_string();
            return Vec::new();
        }
        if self.login.register {
            self.status_line = format!("Creating user `{user}`");
            return vec![Command::Register {
                username: user,
                password: self.login.password.clone(),
            }];
        }
        self.status_line = format!("Signing in as `{user}`");
        vec![Command::Authenticate(CredentialPair::new(
            user,
            self.login.password.clone(),
        ))]
    }

    fn handle_normal(&mut self, msg: Msg) -> Vec<Command> {
        match self.pane {
            Pane::Databases => self.handle_databases(msg),
            Pane::Documents => self.handle_documents(msg),
            Pane::Login => Vec::new(),
        }
    }

    fn handle_databases(&mut self, msg: Msg) -> Vec<Command> {
        let Some(credentials) = self.credentials.clone() else {
            return self.redirect_to_login("Sign in first");
        };
        match msg {
            Msg::Navigate(direction) => {
                let count = self.visible_databases().len();
                self.database_cursor = step(self.database_cursor, direction, count);
                Vec::new()
            }
            Msg::StartFilter => {
                self.open_prompt(PromptKind::Filter, self.database_filter.clone());
                Vec::new()
            }
            Msg::NewDatabase => {
                self.open_prompt(PromptKind::NewDatabase, String::new());
                Vec::new()
            }
            Msg::Refresh => {
                vec![Command::LoadDatabases(credentials)]
            }
            Msg::Submit => {
                let Some(name) = self
                    .visible_databases()
                    .get(self.database_cursor)
                    .map(|database| database.name.clone())
                else {
                    self.status_line = "No database selected".to_string();
                    return Vec::new();
                };
                self.open_database(&name, credentials)
            }
            Msg::Cancel => {
                self.database_filter.clear();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn open_database(&mut self, name: &str, credentials: CredentialPair) -> Vec<Command> {
        self.next_view += 1;
        let mut view = DocumentsView::new(self.next_view, name, self.settings.default_limit);
        let request = view.browser.open();
        let view_id = view.id;
        self.documents = Some(view);
        self.pane = Pane::Documents;
        self.status_line = format!("Loading `{name}`");
        vec![Command::Fetch {
            view: view_id,
            credentials,
            request,
        }]
    }

    fn handle_documents(&mut self, msg: Msg) -> Vec<Command> {
        let Some(credentials) = self.credentials.clone() else {
            return self.redirect_to_login("Sign in first");
        };
        let Some(view) = self.documents.as_mut() else {
            self.pane = Pane::Databases;
            return Vec::new();
        };
        let view_id = view.id;
        let fetch = |request: Option<FetchRequest>| {
            request
                .map(|request| Command::Fetch {
                    view: view_id,
                    credentials: credentials.clone(),
                    request,
                })
                .into_iter()
                .collect::<Vec<_>>()
        };

        match msg {
            Msg::Navigate(direction) if view.raw => {
                let total = view.rows().len();
                view.scroll = step(view.scroll, direction, total);
                Vec::new()
            }
            Msg::Navigate(direction) => {
                let total = view.rows().len();
                view.cursor = step(view.cursor, direction, total);
                Vec::new()
            }
            Msg::ToggleRaw => {
                view.raw = !view.raw;
                view.cursor = 0;
                view.scroll = 0;
                self.status_line = if view.raw {
                    "Raw JSON of the listed documents (v returns to the tree)".to_string()
                } else {
                    "Tree view".to_string()
                };
                Vec::new()
            }
            Msg::Toggle | Msg::Submit => {
                match view.card_at_cursor_mut() {
                    Some((RowKind::Header, card)) => card.toggle(),
                    Some((RowKind::Field(path), card)) => {
                        card.tree.toggle_at(&path);
                    }
                    _ => {}
                }
                Vec::new()
            }
            Msg::ExpandAll | Msg::CollapseAll => {
                let expand = matches!(msg, Msg::ExpandAll);
                if let Some((_, card)) = view.card_at_cursor_mut() {
                    if expand {
                        card.expanded = true;
                        card.tree.expand_all();
                    } else {
                        card.tree.collapse_all();
                    }
                }
                Vec::new()
            }
            Msg::NextPage => fetch(view.browser.next_page()),
            Msg::PreviousPage => fetch(view.browser.previous_page()),
            Msg::Refresh => {
                let mut commands = fetch(Some(view.browser.refresh()));
                commands.extend(self.rerun_search());
                commands
            }
            Msg::StartFilter => {
                let current = view.browser.quick_filter().to_string();
                self.open_prompt(PromptKind::Filter, current);
                Vec::new()
            }
            Msg::StartLimit => {
                let current = view.browser.limit().to_string();
                self.open_prompt(PromptKind::Limit, current);
                Vec::new()
            }
            Msg::StartSearch => {
                let current = view
                    .search
                    .as_ref()
                    .map(|search| search.query.clone())
                    .unwrap_or_default();
                self.open_prompt(PromptKind::Search, current);
                Vec::new()
            }
            Msg::StartSort => {
                self.open_prompt(PromptKind::Sort, String::new());
                Vec::new()
            }
            Msg::OpenInsert => {
                view.insert.open();
                view.editor = Some(JsonEditor::in_body(view.insert.text()));
                Vec::new()
            }
            Msg::OpenEdit => {
                let Some(document) = view.document_at_cursor().cloned() else {
                    self.status_line = view.no_selection();
                    return Vec::new();
                };
                match EditDialog::for_document(view.database(), &document) {
                    Ok(dialog) => {
                        view.editor = Some(JsonEditor::at_top(dialog.buffer()));
                        view.edit = Some(dialog);
                    }
                    Err(error) => self.status_line = format!("Cannot edit: {error}"),
                }
                Vec::new()
            }
            Msg::RequestDelete => {
                let Some(document) = view.document_at_cursor().cloned() else {
                    self.status_line = view.no_selection();
                    return Vec::new();
                };
                match self.delete_guard.request(view.database(), &document) {
                    Ok(pending) => {
                        self.status_line =
                            format!("Delete document `{}`? This cannot be undone (y/n)", pending.id);
                        view.pending_delete = Some(pending);
                    }
                    Err(error) => self.status_line = format!("Cannot delete: {error}"),
                }
                Vec::new()
            }
            Msg::Copy => match view.document_at_cursor() {
                Some(document) => vec![Command::Copy(document.clone())],
                None => {
                    self.status_line = view.no_selection();
                    Vec::new()
                }
            },
            Msg::Cancel => {
                if view.search.take().is_some() {
                    view.rebuild_cards();
                    self.status_line = "Search cleared".to_string();
                } else {
                    self.documents = None;
                    self.pane = Pane::Databases;
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn handle_editor(&mut self, msg: Msg) -> Vec<Command> {
        let Some(credentials) = self.credentials.clone() else {
            return self.redirect_to_login("Sign in first");
        };
        let Some(view) = self.documents.as_mut() else {
            return Vec::new();
        };
        let Some(editor) = view.editor.as_mut() else {
            return Vec::new();
        };
        match msg {
            Msg::Edit(input) => editor.input(input),
            Msg::Input(ch) => editor.insert_char(ch),
            Msg::Backspace => editor.backspace(),
            Msg::Cancel => {
                if view.edit.take().is_none() {
                    *view.insert.text_mut() = editor.text();
                    view.insert.cancel();
                }
                view.editor = None;
            }
            Msg::Submit => {
                let text = editor.text();
                let database = view.database().to_string();
                if let Some(edit) = view.edit.as_mut() {
                    *edit.buffer_mut() = text;
                    match edit.prepare() {
                        Ok(patch) => {
                            return vec![Command::Update {
                                view: view.id,
                                credentials,
                                database,
                                id: edit.id().to_string(),
                                patch,
                            }];
                        }
                        Err(error) => self.status_line = error.to_string(),
                    }
                } else {
                    *view.insert.text_mut() = text;
                    match view.insert.prepare() {
                        Ok(document) => {
                            return vec![Command::Insert {
                                view: view.id,
                                credentials,
                                database,
                                document,
                            }];
                        }
                        Err(error) => self.status_line = error.to_string(),
                    }
                }
            }
            _ => {}
        }
        Vec::new()
    }

    fn handle_confirm(&mut self, msg: Msg) -> Vec<Command> {
        let Some(credentials) = self.credentials.clone() else {
            return self.redirect_to_login("Sign in first");
        };
        let Some(view) = self.documents.as_mut() else {
            return Vec::new();
        };
        let accepted = match msg {
            Msg::Confirm(accepted) => accepted,
            Msg::Cancel => false,
            _ => return Vec::new(),
        };
        let Some(pending) = view.pending_delete.take() else {
            return Vec::new();
        };
        if !accepted {
            self.delete_guard.cancel(&pending.token);
            self.status_line = "Delete cancelled".to_string();
            return Vec::new();
        }
        match self.delete_guard.confirm(&pending.token) {
            Ok(confirmed) => {
                self.status_line = format!("Deleting `{}`", confirmed.id());
                vec![Command::Delete {
                    view: view.id,
                    credentials,
                    confirmed,
                }]
            }
            Err(error) => {
                self.status_line = error.to_string();
                Vec::new()
            }
        }
    }

    fn open_prompt(&mut self, kind: PromptKind, text: String) {
        self.prompt = Some(Prompt { kind, text });
    }

    fn handle_prompt(&mut self, msg: Msg) -> Vec<Command> {
        let Some(prompt) = self.prompt.as_mut() else {
            return Vec::new();
        };
        match msg {
            Msg::Input(ch) => prompt.text.push(ch),
            Msg::Backspace => {
                prompt.text.pop();
            }
            Msg::NextField if prompt.kind == PromptKind::Search => {
                if let Some(view) = self.documents.as_mut() {
                    view.query_type = toggle_query_type(view.query_type);
                }
            }
            Msg::Cancel => {
                let kind = prompt.kind;
                self.prompt = None;
                if kind == PromptKind::Filter {
                    self.apply_filter(String::new());
                }
                return Vec::new();
            }
            Msg::Submit => {
                let Prompt { kind, text } = prompt.clone();
                self.prompt = None;
                return self.submit_prompt(kind, text);
            }
            _ => return Vec::new(),
        }
        if let Some(Prompt {
            kind: PromptKind::Filter,
            text,
        }) = self.prompt.clone()
        {
            self.apply_filter(text);
        }
        Vec::new()
    }

    fn apply_filter(&mut self, needle: String) {
        match self.pane {
            Pane::Documents => {
                if let Some(view) = self.documents.as_mut() {
                    view.browser.set_quick_filter(needle);
                    view.rebuild_cards();
                }
            }
            _ => {
                self.database_filter = needle;
                self.database_cursor = 0;
            }
        }
    }

    fn submit_prompt(&mut self, kind: PromptKind, text: String) -> Vec<Command> {
        let Some(credentials) = self.credentials.clone() else {
            return self.redirect_to_login("Sign in first");
        };
        match kind {
            PromptKind::Filter => Vec::new(),
            PromptKind::NewDatabase => {
                let name = text.trim().to_string();
                if name.is_empty() {
                    self.status_line = "Database name must not be empty".to_string();
                    return Vec::new();
                }
                vec![Command::CreateDatabase(credentials, name)]
            }
            PromptKind::Limit => {
                let Some(view) = self.documents.as_mut() else {
                    return Vec::new();
                };
                match view.browser.set_limit_input(&text) {
                    Some(request) => vec![Command::Fetch {
                        view: view.id,
                        credentials,
                        request,
                    }],
                    None => {
                        self.status_line =
                            "Page size must be a number between 1 and 1000".to_string();
                        Vec::new()
                    }
                }
            }
            PromptKind::Sort => {
                let query = match parse_sort(&text) {
                    Ok(query) => query,
                    Err(message) => {
                        self.status_line = message;
                        return Vec::new();
                    }
                };
                let Some(view) = self.documents.as_mut() else {
                    return Vec::new();
                };
                let request = view.browser.set_query(query);
                vec![Command::Fetch {
                    view: view.id,
                    credentials,
                    request,
                }]
            }
            PromptKind::Search => {
                let Some(view) = self.documents.as_mut() else {
                    return Vec::new();
                };
                let query = text.trim().to_string();
                if query.is_empty() {
                    view.search = None;
                    view.rebuild_cards();
                    return Vec::new();
                }
                let query_type = view.query_type;
                let seq = view.next_search_seq();
                view.search = Some(SearchState {
                    seq,
                    query: query.clone(),
                    query_type,
                    results: None,
                });
                vec![Command::Search {
                    view: view.id,
                    seq,
                    credentials,
                    database: view.database().to_string(),
                    query,
                    query_type,
                }]
            }
        }
    }

    fn rerun_search(&mut self) -> Vec<Command> {
        let Some(credentials) = self.credentials.clone() else {
            return Vec::new();
        };
        let Some(view) = self.documents.as_mut() else {
            return Vec::new();
        };
        let view_id = view.id;
        let database = view.database().to_string();
        if view.search.is_none() {
            return Vec::new();
        }
        let seq = view.next_search_seq();
        let Some(search) = view.search.as_mut() else {
            return Vec::new();
        };
        search.seq = seq;
        vec![Command::Search {
            view: view_id,
            seq,
            credentials,
            database,
            query: search.query.clone(),
            query_type: search.query_type,
        }]
    }

    fn logout(&mut self) -> Vec<Command> {
        if self.pane == Pane::Login {
            return Vec::new();
        }
        self.reset_to_login();
        self.status_line = "Signed out".to_string();
        vec![Command::Logout]
    }

    fn redirect_to_login(&mut self, message: &str) -> Vec<Command> {
        self.reset_to_login();
        self.status_line = message.to_string();
        Vec::new()
    }

    fn reset_to_login(&mut self) {
        self.credentials = None;
        self.databases.clear();
        self.database_filter.clear();
        self.database_cursor = 0;
        self.documents = None;
        self.prompt = None;
        self.login.password.clear();
        self.login.focus = LoginField::Password;
        self.pane = Pane::Login;
    }

    fn view_mut(&mut self, view: u64) -> Option<&mut DocumentsView> {
        self.documents.as_mut().filter(|current| current.id == view)
    }

    fn complete(&mut self, completion: Completion) -> Vec<Command> {
        if completion.is_remote() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
        match completion {
            Completion::Authenticated(credentials, result) => match result {
                Ok(()) => {
                    self.status_line = format!("Signed in as `{}`", credentials.user);
                    self.credentials = Some(credentials.clone());
                    self.login.password.clear();
                    self.pane = Pane::Databases;
                    vec![
                        Command::PersistLogin(credentials.clone()),
                        Command::LoadDatabases(credentials),
                    ]
                }
                Err(error) => self.redirect_to_login(&failure_message(&error)),
            },
            Completion::Registered(result) => {
                match result {
                    Ok(_) => {
                        self.login.register = false;
                        self.status_line =
                            format!("User `{}` created, press Enter to sign in", self.login.user);
                    }
                    Err(error) => self.status_line = format!("Could not create user: {error}"),
                }
                Vec::new()
            }
            Completion::Databases(result) => match result {
                Ok(databases) => {
                    self.status_line = format!("{} databases", databases.len());
                    self.databases = databases;
                    self.database_cursor = self
                        .database_cursor
                        .min(self.visible_databases().len().saturating_sub(1));
                    Vec::new()
                }
                Err(error) => self.surface(&error),
            },
            Completion::DatabaseCreated(result) => match result {
                Ok(database) => {
                    self.status_line = format!("Database `{}` created", database.name);
                    match self.credentials.clone() {
                        Some(credentials) => {
                            vec![Command::LoadDatabases(credentials)]
                        }
                        None => Vec::new(),
                    }
                }
                Err(error) => self.surface(&error),
            },
            Completion::Fetched { view, outcome } => {
                let failure = outcome.page.as_ref().err().cloned();
                let Some(current) = self.view_mut(view) else {
                    debug!(view, "dropping page for a closed view");
                    return Vec::new();
                };
                if current.browser.apply(outcome) == Applied::Stale {
                    return Vec::new();
                }
                if current.search.is_none() && failure.is_none() {
                    current.rebuild_cards();
                }
                match failure {
                    Some(error) => self.surface(&error),
                    None => {
                        if let Some(current) = self.documents.as_ref() {
                            self.status_line = format!(
                                "Page {} of {} | {}",
                                current.browser.page(),
                                current.browser.total_pages().max(1),
                                current.browser.summary()
                            );
                        }
                        Vec::new()
                    }
                }
            }
            Completion::Searched { view, seq, result } => {
                let Some(current) = self.view_mut(view) else {
                    return Vec::new();
                };
                let Some(search) = current.search.as_mut().filter(|search| search.seq == seq)
                else {
                    debug!(seq, "discarding stale search response");
                    return Vec::new();
                };
                match result {
                    Ok(results) => {
                        let count = results.len();
                        search.results = Some(results);
                        current.rebuild_cards();
                        self.status_line = format!("{count} matching documents (Esc clears)");
                        Vec::new()
                    }
                    Err(error) => self.surface(&error),
                }
            }
            Completion::Inserted { view, result } => {
                let Some(current) = self.view_mut(view) else {
                    return Vec::new();
                };
                match current.insert.finish(result) {
                    Ok(signal) => {
                        current.editor = None;
                        self.status_line = "Document inserted".to_string();
                        self.refresh_after_mutation(&signal)
                    }
                    Err(error) => self.surface(&error),
                }
            }
            Completion::Updated { view, result } => {
                let Some(current) = self.view_mut(view) else {
                    return Vec::new();
                };
                let Some(edit) = current.edit.as_mut() else {
                    return Vec::new();
                };
                match edit.finish(result) {
                    Ok(signal) => {
                        current.edit = None;
                        current.editor = None;
                        self.status_line = "Document updated".to_string();
                        self.refresh_after_mutation(&signal)
                    }
                    Err(error) => self.surface(&error),
                }
            }
            Completion::Deleted { view, result } => match result {
                Ok(signal) => {
                    self.status_line = "Document deleted".to_string();
                    if self.view_mut(view).is_some() {
                        self.refresh_after_mutation(&signal)
                    } else {
                        Vec::new()
                    }
                }
                Err(MutationError::Store(error)) => self.surface(&error),
                Err(error) => {
                    self.status_line = error.to_string();
                    Vec::new()
                }
            },
            Completion::Copied(result) => {
                self.status_line = match result {
                    Ok(()) => "Document copied to clipboard".to_string(),
                    Err(error) => error.to_string(),
                };
                Vec::new()
            }
            Completion::Health(up) => {
                let changed = self.server_up != Some(up);
                self.server_up = Some(up);
                if changed {
                    vec![Command::RecordHealth(up)]
                } else {
                    Vec::new()
                }
            }
            Completion::SessionFailed(message) => {
                self.status_line = format!("Session storage: {message}");
                Vec::new()
            }
        }
    }

    fn refresh_after_mutation(&mut self, signal: &RefreshSignal) -> Vec<Command> {
        let Some(credentials) = self.credentials.clone() else {
            return Vec::new();
        };
        let Some(view) = self
            .documents
            .as_mut()
            .filter(|view| view.database() == signal.database)
        else {
            return Vec::new();
        };
        let mut commands = vec![Command::Fetch {
            view: view.id,
            credentials,
            request: view.browser.refresh(),
        }];
        commands.extend(self.rerun_search());
        commands
    }

    /// Authentication failures send the user back to the login pane;
    /// everything else lands on the status line.
    fn surface(&mut self, error: &StoreError) -> Vec<Command> {
        if error.is_authentication() {
            return self.redirect_to_login("Session expired, sign in again");
        }
        self.status_line = failure_message(error);
        Vec::new()
    }
}

fn failure_message(error: &StoreError) -> String {
    match error {
        StoreError::Authentication(_) => "Invalid user or password".to_string(),
        _ => error.to_string(),
    }
}

fn step(cursor: usize, direction: DirectionKey, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    match direction {
        DirectionKey::Up => cursor.saturating_sub(1),
        DirectionKey::Down => (cursor + 1).min(count - 1),
    }
}

fn toggle_query_type(query_type: QueryType) -> QueryType {
    match query_type {
        QueryType::Key => QueryType::Value,
        QueryType::Value => QueryType::Key,
    }
}

fn parse_sort(text: &str) -> Result<Option<ListQuery>, String> {
    let mut parts = text.split_whitespace();
    let Some(field) = parts.next() else {
        return Ok(None);
    };
    let order = match parts.next() {
        None | Some("asc") => SortOrder::Asc,
        Some("desc") => SortOrder::Desc,
        Some(other) => return Err(format!("Unknown sort order `{other}`, use asc or desc")),
    };
    Ok(Some(ListQuery::sorted_by(field, order)))
}

pub(crate) fn map_key_event(key: KeyEvent, mode: InputMode) -> Option<Msg> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Msg::Quit),
            KeyCode::Char('s') => Some(Msg::Submit),
            KeyCode::Char('r') if mode == InputMode::Text => Some(Msg::ToggleRegister),
            _ if mode == InputMode::Editor => Some(Msg::Edit(key.into())),
            _ => None,
        };
    }

    match mode {
        InputMode::Text => match key.code {
            KeyCode::Enter => Some(Msg::Submit),
            KeyCode::Esc => Some(Msg::Cancel),
            KeyCode::Tab => Some(Msg::NextField),
            KeyCode::Backspace => Some(Msg::Backspace),
            KeyCode::Up => Some(Msg::Navigate(DirectionKey::Up)),
            KeyCode::Down => Some(Msg::Navigate(DirectionKey::Down)),
            KeyCode::Char(ch) => Some(Msg::Input(ch)),
            _ => None,
        },
        InputMode::Editor => match key.code {
            KeyCode::Esc => Some(Msg::Cancel),
            _ => Some(Msg::Edit(key.into())),
        },
        InputMode::Confirm => match key.code {
            KeyCode::Char('y' | 'Y') => Some(Msg::Confirm(true)),
            KeyCode::Char('n' | 'N') | KeyCode::Esc => Some(Msg::Confirm(false)),
            _ => None,
        },
        InputMode::Normal => match key.code {
            KeyCode::Char('q') => Some(Msg::Quit),
            KeyCode::Char('?') => Some(Msg::ToggleHelp),
            KeyCode::Enter => Some(Msg::Submit),
            KeyCode::Esc => Some(Msg::Cancel),
            KeyCode::Char(' ') => Some(Msg::Toggle),
            KeyCode::Up | KeyCode::Char('k') => Some(Msg::Navigate(DirectionKey::Up)),
            KeyCode::Down | KeyCode::Char('j') => Some(Msg::Navigate(DirectionKey::Down)),
            KeyCode::Char('+') => Some(Msg::ExpandAll),
            KeyCode::Char('-') => Some(Msg::CollapseAll),
            KeyCode::Char(']') | KeyCode::Right => Some(Msg::NextPage),
            KeyCode::Char('[') | KeyCode::Left => Some(Msg::PreviousPage),
            KeyCode::Char('r') => Some(Msg::Refresh),
            KeyCode::Char('/') => Some(Msg::StartFilter),
            KeyCode::Char('l') => Some(Msg::StartLimit),
            KeyCode::Char('s') => Some(Msg::StartSearch),
            KeyCode::Char('o') => Some(Msg::StartSort),
            KeyCode::Char('n') => Some(Msg::NewDatabase),
            KeyCode::Char('i') => Some(Msg::OpenInsert),
            KeyCode::Char('e') => Some(Msg::OpenEdit),
            KeyCode::Char('d') => Some(Msg::RequestDelete),
            KeyCode::Char('y') => Some(Msg::Copy),
            KeyCode::Char('v') => Some(Msg::ToggleRaw),
            KeyCode::Char('L') => Some(Msg::Logout),
            _ => None,
        },
    }
}
