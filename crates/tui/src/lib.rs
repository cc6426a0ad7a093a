use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use docdeck_adapters::http::HttpConnector;
use docdeck_adapters::secrets::{KeyringKeyValueStore, DEFAULT_KEYRING_SERVICE};
use docdeck_core::config::{default_session_path, AppConfig};
use docdeck_core::remote::RemoteOperations;
use docdeck_core::session::{FileKeyValueStore, KeyValueStore, Session, SessionError};
use docdeck_core::store::{Connector, StoreError};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::Terminal;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

mod app;
mod clipboard;
mod editor;
mod render;
mod runtime;

pub use clipboard::Osc52Clipboard;

use app::{map_key_event, AppSettings, Msg, TuiApp};
use runtime::Runtime;

const TICK_RATE: Duration = Duration::from_millis(120);

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("terminal I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("store client could not be built: {0}")]
    Store(#[from] StoreError),
    #[error("session storage unavailable: {0}")]
    Session(#[from] SessionError),
}

pub fn ui_name() -> &'static str {
    "docdeck-tui"
}

/// Opens the terminal UI against the store at `config.base_url`.
pub fn run(config: &AppConfig) -> Result<(), TuiError> {
    let executor = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let connector = HttpConnector::new(&config.base_url, config.request_timeout())?;
    let probe = connector.health_probe();
    let remote = Arc::new(RemoteOperations::new(connector));
    let session = Session::new(open_session_store(config)?);
    let (mut runtime, receiver) = Runtime::new(
        remote,
        session,
        Box::new(Osc52Clipboard::stdout()),
        executor.handle().clone(),
    );
    let health = runtime.spawn_health(probe, config.health_interval());
    info!(base_url = %config.base_url, "starting terminal UI");

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, config, &mut runtime, receiver);
    let restore_result = restore_terminal(&mut terminal);
    health.abort();
    executor.shutdown_timeout(Duration::from_millis(500));

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn open_session_store(config: &AppConfig) -> Result<Box<dyn KeyValueStore>, TuiError> {
    let path = default_session_path().map_err(|source| SessionError::Location { source })?;
    let file = FileKeyValueStore::load_from_path(path)?;
    if config.use_keyring {
        Ok(Box::new(KeyringKeyValueStore::new(
            file,
            DEFAULT_KEYRING_SERVICE,
        )))
    } else {
        Ok(Box::new(file))
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop<K, S>(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    config: &AppConfig,
    runtime: &mut Runtime<K, S>,
    mut receiver: UnboundedReceiver<Msg>,
) -> Result<(), TuiError>
where
    K: Connector + 'static,
    K::Connection: 'static,
    S: KeyValueStore,
{
    let mut app = TuiApp::new(AppSettings {
        default_limit: config.default_limit,
        mount_margin_rows: config.mount_margin_rows,
    });
    if let Some(credentials) = runtime.stored_credentials() {
        for command in app.resume(credentials) {
            runtime.execute(command);
        }
    }
    loop {
        while let Ok(message) = receiver.try_recv() {
            for command in app.handle(message) {
                runtime.execute(command);
            }
        }

        let size = terminal.size()?;
        app.sync_viewport(render::documents_viewport_rows(Rect::new(
            0,
            0,
            size.width,
            size.height,
        )));
        terminal.draw(|frame| render::render(frame, &app))?;

        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    if let Some(message) = map_key_event(key, app.input_mode()) {
                        for command in app.handle(message) {
                            runtime.execute(command);
                        }
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use docdeck_core::store::StoreError;

    use super::{ui_name, TuiError};

    #[test]
    fn ui_name_is_stable() {
        assert_eq!(ui_name(), "docdeck-tui");
    }

    #[test]
    fn store_errors_convert_into_tui_errors() {
        let error: TuiError = StoreError::validation("bad base URL").into();
        assert!(error.to_string().contains("bad base URL"));
    }
}
