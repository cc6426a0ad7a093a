use std::sync::Arc;
use std::time::Duration;

use docdeck_core::browser;
use docdeck_core::health::{HealthMonitor, HealthProbe};
use docdeck_core::mutation::{self, Clipboard};
use docdeck_core::remote::RemoteOperations;
use docdeck_core::session::{KeyValueStore, Session};
use docdeck_core::store::{Connector, CredentialPair};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::app::{Command, Completion, Msg};

/// Executes [`Command`]s. Store calls run as tasks on `handle` and report
/// back through the channel; session and clipboard work is synchronous.
pub(crate) struct Runtime<K: Connector, S: KeyValueStore> {
    remote: Arc<RemoteOperations<K>>,
    session: Session<S>,
    clipboard: Box<dyn Clipboard + Send>,
    handle: Handle,
    sender: UnboundedSender<Msg>,
}

impl<K, S> Runtime<K, S>
where
    K: Connector + 'static,
    K::Connection: 'static,
    S: KeyValueStore,
{
    pub(crate) fn new(
        remote: Arc<RemoteOperations<K>>,
        session: Session<S>,
        clipboard: Box<dyn Clipboard + Send>,
        handle: Handle,
    ) -> (Self, UnboundedReceiver<Msg>) {
        let (sender, receiver) = unbounded_channel();
        (
            Self {
                remote,
                session,
                clipboard,
                handle,
                sender,
            },
            receiver,
        )
    }

    #[cfg(test)]
    pub(crate) fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Credentials remembered from a previous run. Unreadable session
    /// state is treated as signed out.
    pub(crate) fn stored_credentials(&self) -> Option<CredentialPair> {
        match self.session.stored_credentials() {
            Ok(credentials) => credentials,
            Err(error) => {
                warn!(%error, "could not read stored session");
                None
            }
        }
    }

    /// Polls `probe` every `interval` and forwards each result.
    pub(crate) fn spawn_health<P>(&self, probe: P, interval: Duration) -> JoinHandle<()>
    where
        P: HealthProbe + 'static,
    {
        let sender = self.sender.clone();
        self.handle.spawn(async move {
            let mut monitor = HealthMonitor::new();
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let up = monitor.poll(&probe).await;
                if sender.send(Msg::Completed(Completion::Health(up))).is_err() {
                    debug!("health channel closed");
                    break;
                }
            }
        })
    }

    pub(crate) fn execute(&mut self, command: Command) {
        match command {
            Command::PersistLogin(credentials) => {
                if let Err(error) = self.session.record_login(&credentials) {
                    warn!(%error, "failed to store session");
                    self.report(Completion::SessionFailed(error.to_string()));
                }
            }
            Command::RecordHealth(up) => {
                if let Err(error) = self.session.record_health(up) {
                    debug!(%error, "failed to store health flag");
                }
            }
            Command::Logout => {
                if let Err(error) = self.session.logout(self.remote.as_ref()) {
                    self.report(Completion::SessionFailed(error.to_string()));
                }
            }
            Command::Copy(document) => {
                let result =
                    mutation::copy_document(self.clipboard.as_mut(), &document).map(|_| ());
                self.report(Completion::Copied(result));
            }
            remote => self.spawn_remote(remote),
        }
    }

    fn report(&self, completion: Completion) {
        if self.sender.send(Msg::Completed(completion)).is_err() {
            debug!("event channel closed");
        }
    }

    fn spawn_remote(&self, command: Command) {
        let remote = Arc::clone(&self.remote);
        let sender = self.sender.clone();
        self.handle.spawn(async move {
            let completion = match command {
                Command::Authenticate(credentials) => {
                    let result = remote.authenticate(&credentials).await;
                    Completion::Authenticated(credentials, result)
                }
                Command::Register { username, password } => {
                    Completion::Registered(remote.create_user(&username, &password).await)
                }
                Command::LoadDatabases(credentials) => {
                    Completion::Databases(remote.list_databases(&credentials).await)
                }
                Command::CreateDatabase(credentials, name) => {
                    Completion::DatabaseCreated(remote.create_database(&credentials, &name).await)
                }
                Command::Fetch {
                    view,
                    credentials,
                    request,
                } => Completion::Fetched {
                    view,
                    outcome: browser::execute(&*remote, &credentials, &request).await,
                },
                Command::Search {
                    view,
                    seq,
                    credentials,
                    database,
                    query,
                    query_type,
                } => Completion::Searched {
                    view,
                    seq,
                    result: remote
                        .search(&credentials, &database, &query, query_type)
                        .await,
                },
                Command::Insert {
                    view,
                    credentials,
                    database,
                    document,
                } => Completion::Inserted {
                    view,
                    result: remote.insert(&credentials, &database, &document).await,
                },
                Command::Update {
                    view,
                    credentials,
                    database,
                    id,
                    patch,
                } => Completion::Updated {
                    view,
                    result: remote
                        .update_by_id(&credentials, &database, &id, &patch)
                        .await,
                },
                Command::Delete {
                    view,
                    credentials,
                    confirmed,
                } => Completion::Deleted {
                    view,
                    result: mutation::delete_confirmed(&*remote, &credentials, confirmed).await,
                },
                Command::PersistLogin(_)
                | Command::RecordHealth(_)
                | Command::Logout
                | Command::Copy(_) => return,
            };
            if sender.send(Msg::Completed(completion)).is_err() {
                debug!("event channel closed before completion was delivered");
            }
        });
    }
}
