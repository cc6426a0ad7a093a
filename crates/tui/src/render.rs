use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;

use crate::app::{DocumentsView, LoginField, Pane, PromptKind, RowKind, TuiApp};
use crate::editor::JsonEditor;

/// Rows above the card list inside the documents body.
const DOCUMENTS_HEADER_ROWS: u16 = 1;

fn chunks(area: Rect) -> [Rect; 3] {
    let split = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(area);
    [split[0], split[1], split[2]]
}

/// Card rows that fit in the documents pane for a terminal of `area`.
pub(crate) fn documents_viewport_rows(area: Rect) -> usize {
    let body = chunks(area)[1];
    usize::from(body.height.saturating_sub(2 + DOCUMENTS_HEADER_ROWS)).max(1)
}

pub(crate) fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let [header_area, body_area, footer_area] = chunks(frame.area());

    let health = match app.server_up {
        Some(true) => Span::styled("store: up", Style::default().fg(Color::Green)),
        Some(false) => Span::styled("store: down", Style::default().fg(Color::Red)),
        None => Span::raw("store: ?"),
    };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            format!(" {} ", pane_name(app.pane)),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::raw(format!(
            "User: {}",
            app.credentials
                .as_ref()
                .map_or("-", |credentials| credentials.user.as_str())
        )),
        Span::raw(" | "),
        Span::raw(format!(
            "DB: {}",
            app.documents.as_ref().map_or("-", DocumentsView::database)
        )),
        Span::raw(" | "),
        health,
        Span::raw(if app.busy() { " | working…" } else { "" }),
    ]))
    .block(Block::default().borders(Borders::ALL).title("docdeck"));
    frame.render_widget(header, header_area);

    let (title, lines) = match app.pane {
        Pane::Login => ("Sign in", login_lines(app)),
        Pane::Databases => ("Databases", database_lines(app)),
        Pane::Documents => ("Documents", document_lines(app)),
    };
    let body = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .alignment(Alignment::Left);
    frame.render_widget(body, body_area);

    let footer = Paragraph::new(vec![
        Line::from(key_hints(app)),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, footer_area);

    if let Some(view) = app.documents.as_ref().filter(|_| app.pane == Pane::Documents) {
        if let Some(pending) = &view.pending_delete {
            render_popup(
                frame,
                "Confirm delete",
                vec![
                    Line::from(format!(
                        "Delete document `{}` from `{}`?",
                        pending.id, pending.database
                    )),
                    Line::from("This cannot be undone."),
                    Line::from(""),
                    Line::from("y: delete   n / Esc: keep"),
                ],
                (50, 25),
            );
        } else if let Some(editor) = &view.editor {
            match &view.edit {
                Some(edit) => {
                    render_editor(frame, &format!("Edit {}", edit.id()), editor, edit.error());
                }
                None => render_editor(
                    frame,
                    &format!("Insert into {}", view.database()),
                    editor,
                    view.insert.error(),
                ),
            }
        }
    }

    if let Some(prompt) = &app.prompt {
        let mut label = prompt.kind.label().to_string();
        if let Some(view) = app.documents.as_ref() {
            if prompt.kind == PromptKind::Search {
                label = format!("{label} by {} (Tab switches)", view.query_type.as_str());
            }
        }
        render_popup(
            frame,
            &label,
            vec![Line::from(format!("> {}_", prompt.text))],
            (60, 20),
        );
    }

    if app.show_help {
        render_help_popup(frame);
    }
}

fn pane_name(pane: Pane) -> &'static str {
    match pane {
        Pane::Login => "Login",
        Pane::Databases => "Databases",
        Pane::Documents => "Documents",
    }
}

fn login_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let marker = |field| if app.login.focus == field { ">" } else { " " };
    let mode = if app.login.register {
        "Create user"
    } else {
        "Sign in"
    };
    vec![
        Line::from(mode),
        Line::from("Enter: submit | Tab: switch field | Ctrl+R: toggle sign in / create user"),
        Line::from(""),
        Line::from(format!("{} User: {}", marker(LoginField::User), app.login.user)),
        Line::from(format!(
            "{} Password: {}",
            marker(LoginField::Password),
            "*".repeat(app.login.password.chars().count())
        )),
    ]
}

fn database_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let visible = app.visible_databases();
    let mut lines = vec![Line::from(if app.database_filter.is_empty() {
        format!("{} databases", app.databases.len())
    } else {
        format!(
            "{} of {} databases match `{}`",
            visible.len(),
            app.databases.len(),
            app.database_filter
        )
    })];
    if visible.is_empty() {
        lines.push(Line::from("No databases"));
    }
    for (index, database) in visible.iter().enumerate() {
        let text = format!("  {}", database.name);
        lines.push(if index == app.database_cursor {
            Line::styled(text, Style::default().add_modifier(Modifier::REVERSED))
        } else {
            Line::from(text)
        });
    }
    lines
}

fn document_lines(app: &TuiApp) -> Vec<Line<'static>> {
    let Some(view) = app.documents.as_ref() else {
        return vec![Line::from("No database open")];
    };
    let browser = &view.browser;
    let mut summary = format!(
        "Page {}/{} | limit {} | {}",
        browser.page(),
        browser.total_pages().max(1),
        browser.limit(),
        browser.summary()
    );
    if let Some(stats) = browser.stats() {
        summary.push_str(&format!(" | {:.1} KiB", stats.size_kib()));
    }
    if let Some(query) = browser.query().and_then(|query| query.sort_by.as_deref()) {
        summary.push_str(&format!(" | sort {query}"));
    }
    if !browser.quick_filter().is_empty() {
        summary.push_str(&format!(" | filter `{}`", browser.quick_filter()));
    }
    if let Some(search) = &view.search {
        summary.push_str(&format!(
            " | search {} `{}`",
            search.query_type.as_str(),
            search.query
        ));
    }
    if view.raw {
        summary.push_str(" | raw JSON");
    }
    let mut lines = vec![Line::styled(
        summary,
        Style::default().add_modifier(Modifier::DIM),
    )];

    let rows = view.rows();
    if rows.is_empty() {
        lines.push(Line::from("No documents"));
        return lines;
    }
    for (offset, row) in rows
        .into_iter()
        .enumerate()
        .skip(view.scroll)
        .take(app.viewport_rows)
    {
        let mut style = match row.kind {
            RowKind::Header => Style::default().add_modifier(Modifier::BOLD),
            RowKind::Placeholder => Style::default().fg(Color::DarkGray),
            RowKind::Field(_) | RowKind::Raw => Style::default(),
        };
        if offset == view.cursor && !view.raw {
            style = style.add_modifier(Modifier::REVERSED);
        }
        lines.push(Line::styled(row.text, style));
    }
    lines
}

fn key_hints(app: &TuiApp) -> &'static str {
    match app.pane {
        Pane::Login => "Enter: submit | Tab: next field | Ctrl+R: create user | Esc: quit",
        Pane::Databases => {
            "Enter: open | /: filter | n: new | r: reload | L: logout | ?: help | q: quit"
        }
        Pane::Documents => {
            "Space: fold | [ ]: page | l: limit | /: filter | s: search | o: sort | v: raw | i/e/d: insert/edit/delete | y: copy | Esc: back"
        }
    }
}

fn render_editor(frame: &mut Frame<'_>, title: &str, editor: &JsonEditor, error: Option<&str>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let block = Block::default().borders(Borders::ALL).title(title.to_string());
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let [text_area, footer_area] = {
        let split = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(2)])
            .split(inner);
        [split[0], split[1]]
    };
    frame.render_widget(editor.textarea(), text_area);

    let mut footer = Vec::new();
    if let Some(error) = error {
        footer.push(Line::styled(
            error.to_string(),
            Style::default().fg(Color::Red),
        ));
    }
    footer.push(Line::from("Ctrl+S: save | Esc: cancel | arrows, Home, End: move"));
    frame.render_widget(Paragraph::new(footer).wrap(Wrap { trim: false }), footer_area);
}

fn render_popup(frame: &mut Frame<'_>, title: &str, lines: Vec<Line<'_>>, size: (u16, u16)) {
    let area = centered_rect(size.0, size.1, frame.area());
    frame.render_widget(Clear, area);
    let popup = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title.to_string()));
    frame.render_widget(popup, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    render_popup(
        frame,
        "Help",
        vec![
            Line::from("q / Ctrl+C: quit"),
            Line::from("?: toggle help"),
            Line::from("L: sign out"),
            Line::from("Arrows or j/k: move"),
            Line::from("Space or Enter: fold / unfold the row under the cursor"),
            Line::from("+ / -: expand / collapse the whole document"),
            Line::from("[ / ]: previous / next page, l: page size, o: sort"),
            Line::from("/: filter the loaded page, s: search the database"),
            Line::from("i: insert, e: edit, d: delete, y: copy as JSON"),
            Line::from("v: switch between the tree and the raw JSON of the page"),
            Line::from("r: reload, Esc: back"),
        ],
        (70, 60),
    );
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}
