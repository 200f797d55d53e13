pub(crate) mod auth;
mod executor;
pub mod options;
pub(crate) mod session;

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crate::{
    bson::{doc, Document},
    concern::{ReadConcern, WriteConcern},
    db::Database,
    error::{Error, ErrorKind, Result},
    event::command::CommandEvent,
    operation::ListDatabases,
    options::{ClientOptions, DatabaseOptions, SessionOptions},
    results::DatabaseSpecification,
    sdam::{SessionSupportStatus, Topology},
    selection_criteria::SelectionCriteria,
};

pub(crate) use session::ClusterTime;
use session::{ClientSession, ServerSessionPool};

/// The default amount of time a session may sit unused in the pool before
/// its server-side state is assumed expired, used until the topology reports
/// a logical session timeout.
const DEFAULT_LOGICAL_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// This is the main entry point for the API. A `Client` is used to connect to
/// a MongoDB cluster. By default, it will monitor the topology of the
/// cluster, keeping track of any changes, such as servers being added or
/// removed.
///
/// `Client` uses [`std::sync::Arc`] internally, so it can be shared safely
/// across threads or async tasks. All of the state required for a `Client`
/// to route an operation lives behind that shared handle; cloning a `Client`
/// is cheap.
///
/// A `Client` must be created within an async runtime, since it immediately
/// begins monitoring the deployment in the background.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive(Debug)]
struct ClientInner {
    topology: Topology,
    options: ClientOptions,
    session_pool: ServerSessionPool,
    shutdown: AtomicBool,
}

impl Client {
    /// Creates a new `Client` connected to the cluster specified by `uri`.
    /// `uri` must be a MongoDB connection string.
    ///
    /// See the documentation on [`ClientOptions::parse`] for more details.
    pub async fn with_uri_str(uri: impl AsRef<str>) -> Result<Self> {
        let options = ClientOptions::parse(uri.as_ref()).await?;
        Client::with_options(options)
    }

    /// Creates a new `Client` connected to the cluster specified by
    /// `options`.
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        options.validate()?;

        let topology = Topology::new(options.clone())?;
        let inner = Arc::new(ClientInner {
            topology,
            options,
            session_pool: ServerSessionPool::new(),
            shutdown: AtomicBool::new(false),
        });

        Ok(Self { inner })
    }

    /// Gets the default selection criteria the `Client` uses for operations.
    pub fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.inner.options.selection_criteria.as_ref()
    }

    /// Gets the default read concern the `Client` uses for operations.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.inner.options.read_concern.as_ref()
    }

    /// Gets the default write concern the `Client` uses for operations.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.options.write_concern.as_ref()
    }

    /// Gets a handle to a database specified by `name` in the cluster the
    /// `Client` is connected to. The `Database` options (e.g. read
    /// preference and write concern) will default to those of the `Client`.
    ///
    /// This method does not send or receive anything across the wire to the
    /// database, so it can be used repeatedly without incurring any costs
    /// from I/O.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name, None)
    }

    /// Gets a handle to a database specified by `name` with the given
    /// options.
    pub fn database_with_options(&self, name: &str, options: DatabaseOptions) -> Database {
        Database::new(self.clone(), name, Some(options))
    }

    /// Gets information about each database present in the cluster the
    /// Client is connected to.
    pub async fn list_databases(
        &self,
        filter: impl Into<Option<Document>>,
    ) -> Result<Vec<DatabaseSpecification>> {
        let mut op = ListDatabases::new(filter.into(), false);
        self.execute_operation(&mut op, None)
            .await
            .and_then(|databases| {
                databases
                    .into_iter()
                    .map(|doc| {
                        crate::bson::from_document(doc).map_err(|e| {
                            ErrorKind::InvalidResponse {
                                message: format!("invalid server response: {}", e),
                            }
                            .into()
                        })
                    })
                    .collect()
            })
    }

    /// Gets the names of the databases present in the cluster the Client is
    /// connected to.
    pub async fn list_database_names(
        &self,
        filter: impl Into<Option<Document>>,
    ) -> Result<Vec<String>> {
        let mut op = ListDatabases::new(filter.into(), true);
        let databases = self.execute_operation(&mut op, None).await?;
        databases
            .into_iter()
            .map(|doc| {
                doc.get_str("name")
                    .map(str::to_string)
                    .map_err(|_| Error::invalid_response("expected a name field").into())
            })
            .collect()
    }

    /// Starts a new [`ClientSession`].
    pub async fn start_session(
        &self,
        options: impl Into<Option<SessionOptions>>,
    ) -> Result<ClientSession> {
        self.start_session_with_implicit(options.into(), false).await
    }

    /// Starts an implicit session, used to provide causal ordering and
    /// cursor pinning for operations the user did not supply a session for.
    /// Returns `None` if the deployment does not support sessions.
    pub(crate) async fn start_implicit_session(&self) -> Result<Option<ClientSession>> {
        match self.session_support_status().await? {
            SessionSupportStatus::Supported { .. } => Ok(Some(
                self.start_session_with_implicit(None, true).await?,
            )),
            _ => Ok(None),
        }
    }

    async fn start_session_with_implicit(
        &self,
        options: Option<SessionOptions>,
        is_implicit: bool,
    ) -> Result<ClientSession> {
        if !is_implicit {
            match self.session_support_status().await? {
                SessionSupportStatus::Supported { .. } => {}
                _ => return Err(ErrorKind::SessionsNotSupported.into()),
            }
        }

        let timeout = self.logical_session_timeout();
        let server_session = self.inner.session_pool.check_out(timeout).await;
        Ok(ClientSession::new(
            server_session,
            self.clone(),
            options,
            is_implicit,
        ))
    }

    /// Whether the deployment supports sessions, waiting for a data-bearing
    /// server to be discovered if the answer is not yet known.
    pub(crate) async fn session_support_status(&self) -> Result<SessionSupportStatus> {
        match self.inner.topology.session_support_status() {
            SessionSupportStatus::Undetermined => {
                self.select_data_bearing_server("check session support")
                    .await?;
                Ok(self.inner.topology.session_support_status())
            }
            status => Ok(status),
        }
    }

    pub(crate) fn logical_session_timeout(&self) -> Duration {
        match self.inner.topology.session_support_status() {
            SessionSupportStatus::Supported {
                logical_session_timeout,
            } => logical_session_timeout,
            _ => DEFAULT_LOGICAL_SESSION_TIMEOUT,
        }
    }

    pub(crate) async fn check_in_server_session(&self, session: session::ServerSession) {
        let timeout = self.logical_session_timeout();
        self.inner.session_pool.check_in(session, timeout).await;
    }

    pub(crate) fn topology(&self) -> &Topology {
        &self.inner.topology
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn emit_command_event(&self, generate_event: impl FnOnce() -> CommandEvent) {
        if let Some(ref handler) = self.inner.options.command_event_handler {
            handler(generate_event());
        }
    }

    /// Shut down this client, terminating background monitoring and closing
    /// all connections. Outstanding sessions are ended on the server with a
    /// best-effort `endSessions`. Idempotent; operations issued after
    /// shutdown fail immediately.
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        // best-effort: tell the server to reap the pooled session state
        let session_ids = self.inner.session_pool.drain_ids().await;
        if !session_ids.is_empty() {
            let mut op = crate::operation::RunCommand::new(
                "admin",
                doc! { "endSessions": session_ids },
                None,
            );
            // reset the flag temporarily so the command can execute
            self.inner.shutdown.store(false, Ordering::SeqCst);
            let _ = self.execute_operation(&mut op, None).await;
            self.inner.shutdown.store(true, Ordering::SeqCst);
        }

        self.inner.topology.shutdown();
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.topology.shutdown();
    }
}
