use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::{Duration, Instant},
};

use tokio::sync::{watch, Notify};

use super::{
    attempt_to_select_server,
    description::server::ServerDescription,
    monitor::Monitor,
    SelectedServer,
    Server,
    SessionSupportStatus,
    TopologyDescription,
};
use crate::{
    client::{options::ClientOptions, ClusterTime},
    cmap::{establish::ConnectionEstablisher, options::ConnectionPoolOptions, Connection},
    error::{Error, ErrorKind, Result},
    event::sdam::{SdamEvent, SdamEventHandler},
    options::{SelectionCriteria, ServerAddress},
    selection_criteria::ReadPreference,
};

const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// A handle to the driver's model of the deployment. Updates flow in from
/// the server monitors one at a time and are published atomically through a
/// watch channel; readers always see a consistent snapshot.
#[derive(Clone, Debug)]
pub(crate) struct Topology {
    inner: Arc<TopologyInner>,
}

/// An immutable snapshot of the topology: the description plus the live
/// server handles (pools and operation counts).
#[derive(Debug)]
pub(crate) struct TopologyState {
    pub(crate) description: TopologyDescription,
    pub(crate) servers: HashMap<ServerAddress, Arc<Server>>,
}

struct TopologyInner {
    options: ClientOptions,
    establisher: ConnectionEstablisher,

    /// Holds the latest state; mutations are serialized by `update_lock` and
    /// published via this channel's `send_replace`.
    state: watch::Sender<Arc<TopologyState>>,

    update_lock: Mutex<()>,

    /// The highest cluster time the driver has received from any server.
    cluster_time: Mutex<Option<ClusterTime>>,

    /// Notified to ask every monitor for an immediate server check.
    check_requester: Notify,

    shutdown: watch::Sender<bool>,
    closed: AtomicBool,

    event_handler: Option<SdamEventHandler>,
}

impl std::fmt::Debug for TopologyInner {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TopologyInner")
            .field("description", &self.state.borrow().description)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Topology {
    pub(crate) fn new(options: ClientOptions) -> Result<Topology> {
        let event_handler = options.sdam_event_handler.clone();
        let establisher = ConnectionEstablisher::from_client_options(&options)?;
        let description = TopologyDescription::new(&options);

        let initial_state = Arc::new(TopologyState {
            description: TopologyDescription {
                servers: HashMap::new(),
                ..description.clone()
            },
            servers: HashMap::new(),
        });
        let (state_sender, _) = watch::channel(initial_state);
        let (shutdown_sender, _) = watch::channel(false);

        let inner = Arc::new(TopologyInner {
            options,
            establisher,
            state: state_sender,
            update_lock: Mutex::new(()),
            cluster_time: Mutex::new(None),
            check_requester: Notify::new(),
            shutdown: shutdown_sender,
            closed: AtomicBool::new(false),
            event_handler,
        });

        let topology = Topology { inner };
        topology
            .inner
            .emit_event(|| SdamEvent::TopologyOpening {});

        {
            let _guard = topology.inner.update_lock.lock().expect("topology lock poisoned");
            topology.inner.publish(description);
        }

        Ok(topology)
    }

    /// Begin watching for changes to the topology.
    pub(crate) fn watch(&self) -> TopologyWatcher {
        TopologyWatcher {
            receiver: self.inner.state.subscribe(),
            shutdown: self.inner.shutdown.subscribe(),
        }
    }

    pub(crate) fn updater(&self) -> TopologyUpdater {
        TopologyUpdater {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The current topology state snapshot.
    pub(crate) fn state(&self) -> Arc<TopologyState> {
        self.inner.state.borrow().clone()
    }

    pub(crate) fn session_support_status(&self) -> SessionSupportStatus {
        self.state().description.session_support_status()
    }

    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.inner
            .cluster_time
            .lock()
            .expect("cluster time lock poisoned")
            .clone()
    }

    pub(crate) fn advance_cluster_time(&self, to: &ClusterTime) {
        self.inner.advance_cluster_time(to);
    }

    /// Ask all monitors to check their servers now.
    pub(crate) fn request_update(&self) {
        self.inner.check_requester.notify_waiters();
    }

    /// Handle an error that occurred during operation execution, updating the
    /// topology and clearing the relevant pool as dictated by the SDAM spec.
    /// Returns whether the topology changed as a result.
    pub(crate) fn handle_application_error(
        &self,
        address: ServerAddress,
        error: &Error,
        phase: HandshakePhase,
    ) -> bool {
        self.inner.handle_application_error(address, error, &phase)
    }

    /// Select a server per the given criteria, waiting for the topology to
    /// change until `server_selection_timeout` if no suitable server is
    /// available.
    pub(crate) async fn select_server(
        &self,
        criteria: Option<&SelectionCriteria>,
        operation_name: &str,
        deprioritized: Option<&ServerAddress>,
    ) -> Result<SelectedServer> {
        let criteria = criteria
            .cloned()
            .unwrap_or(SelectionCriteria::ReadPreference(ReadPreference::Primary));

        let timeout = self
            .inner
            .options
            .server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);
        let start = Instant::now();
        let mut watcher = self.watch();

        loop {
            let state = watcher.observe_latest();

            if let Some(server) = attempt_to_select_server(
                &criteria,
                &state.description,
                &state.servers,
                deprioritized,
            )? {
                return Ok(server);
            }

            // nothing eligible yet: ask the monitors to look again and wait
            // for the topology to move
            self.request_update();

            let remaining = match timeout.checked_sub(start.elapsed()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => Duration::ZERO,
            };

            if remaining.is_zero() || !watcher.wait_for_update(remaining).await {
                let message = state
                    .description
                    .server_selection_timeout_error_message(&criteria);
                self.inner.emit_event(|| SdamEvent::EmptySelection {
                    operation: operation_name.to_string(),
                    message: message.clone(),
                });
                return Err(ErrorKind::ServerSelection { message }.into());
            }
        }
    }

    /// Permanently close the topology: stop monitors, drain and close pools.
    /// Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let state = self.state();
        for server in state.servers.values() {
            server.pool.close();
        }

        let _ = self.inner.shutdown.send(true);
        self.inner.emit_event(|| SdamEvent::TopologyClosed {});
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl TopologyInner {
    fn advance_cluster_time(&self, to: &ClusterTime) {
        let mut cluster_time = self.cluster_time.lock().expect("cluster time lock poisoned");
        // only a strictly greater cluster time replaces the cached one
        if cluster_time.as_ref().map(|current| current < to).unwrap_or(true) {
            *cluster_time = Some(to.clone());
        }
    }

    /// Applies a new description: spawns servers and monitors for unseen
    /// addresses, closes servers that are gone, and publishes the new state.
    /// Must be called with `update_lock` held.
    fn publish(self: &Arc<Self>, description: TopologyDescription) {
        let old_state = self.state.borrow().clone();
        let mut servers = old_state.servers.clone();
        let mut new_addresses = Vec::new();

        for address in description.servers.keys() {
            if servers.contains_key(address) {
                continue;
            }

            let server = Arc::new(Server::new(
                address.clone(),
                self.establisher.clone(),
                ConnectionPoolOptions::from_client_options(&self.options),
            ));
            servers.insert(address.clone(), server);
            new_addresses.push(address.clone());

            self.emit_event(|| SdamEvent::ServerOpening {
                address: address.clone(),
            });
        }

        servers.retain(|address, server| {
            if description.servers.contains_key(address) {
                return true;
            }
            server.pool.close();
            self.emit_event(|| SdamEvent::ServerClosed {
                address: address.clone(),
            });
            false
        });

        self.state.send_replace(Arc::new(TopologyState {
            description,
            servers,
        }));

        // monitors start only once the state naming their server is visible,
        // so their liveness check cannot observe a stale snapshot
        for address in new_addresses {
            Monitor::start(
                address,
                TopologyUpdater {
                    inner: Arc::downgrade(self),
                },
                TopologyWatcher {
                    receiver: self.state.subscribe(),
                    shutdown: self.shutdown.subscribe(),
                },
                CheckRequestReceiver {
                    inner: Arc::downgrade(self),
                },
                self.establisher.clone(),
                self.options.clone(),
            );
        }
    }

    fn update_server_description(self: &Arc<Self>, sd: ServerDescription) -> bool {
        let _guard = self.update_lock.lock().expect("topology lock poisoned");

        let old_state = self.state.borrow().clone();
        let old_description = old_state
            .description
            .get_server_description(&sd.address)
            .cloned();

        // a reply from an older topology version than the current one is
        // stale monitoring data
        if let (Some(old), Some(new_tv)) = (old_description.as_ref(), sd.topology_version()) {
            if let Some(old_tv) = old.topology_version() {
                if new_tv != old_tv && !new_tv.is_more_recent_than(old_tv) {
                    return false;
                }
            }
        }

        let mut description = old_state.description.clone();
        if description.update(sd.clone()).is_err() {
            return false;
        }

        let changed = old_description.as_ref() != Some(&sd);
        if changed {
            tracing::debug!(
                address = %sd.address,
                server_type = ?sd.server_type,
                "applying topology update"
            );
            self.emit_event(|| SdamEvent::ServerDescriptionChanged {
                address: sd.address.clone(),
                previous: old_description
                    .clone()
                    .map(crate::sdam::public::ServerInfo::new_owned),
                new: crate::sdam::public::ServerInfo::new_owned(sd.clone()),
            });
            self.emit_event(|| SdamEvent::TopologyDescriptionChanged {});
        }

        if let Ok(Some(cluster_time)) = sd.cluster_time() {
            self.advance_cluster_time(&cluster_time);
        }

        self.publish(description);
        changed
    }

    fn mark_server_unknown(self: &Arc<Self>, address: ServerAddress, error: Error) -> bool {
        self.update_server_description(ServerDescription::new_from_error(address, error))
    }

    fn handle_application_error(
        self: &Arc<Self>,
        address: ServerAddress,
        error: &Error,
        phase: &HandshakePhase,
    ) -> bool {
        let state = self.state.borrow().clone();
        let server = match state.servers.get(&address) {
            Some(server) => server.clone(),
            None => return false,
        };

        // errors from a connection predating the latest pool clear have
        // already been acted upon
        if let Some(generation) = phase.generation() {
            if generation != server.pool.generation() {
                return false;
            }
        }

        if error.is_state_change_error() {
            let updated = self.mark_server_unknown(address, error.clone());
            if updated {
                server.pool.clear();
                self.check_requester.notify_waiters();
            }
            updated
        } else if error.is_network_error() {
            let handshake_phase = matches!(phase, HandshakePhase::PreHello { .. });
            if handshake_phase || !error.is_network_timeout() {
                let updated = self.mark_server_unknown(address, error.clone());
                if updated {
                    server.pool.clear();
                }
                updated
            } else {
                false
            }
        } else if error.is_auth_error() {
            let updated = self.mark_server_unknown(address, error.clone());
            if updated {
                server.pool.clear();
            }
            updated
        } else {
            false
        }
    }

    fn emit_event<F>(&self, event: F)
    where
        F: FnOnce() -> SdamEvent,
    {
        if let Some(ref handler) = self.event_handler {
            handler(event());
        }
    }
}

impl Drop for TopologyInner {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// A handle used by monitors to feed new server descriptions into the
/// topology without keeping it alive.
#[derive(Clone, Debug)]
pub(crate) struct TopologyUpdater {
    inner: Weak<TopologyInner>,
}

impl TopologyUpdater {
    /// Apply the given server description. Returns whether the topology
    /// changed as a result.
    pub(crate) fn update(&self, sd: ServerDescription) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.update_server_description(sd),
            None => false,
        }
    }

    /// Record a monitor-observed failure for the given server: the server
    /// becomes unknown and its pool is cleared.
    pub(crate) fn handle_monitor_error(&self, address: ServerAddress, error: Error) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                let state = inner.state.borrow().clone();
                let updated = inner.mark_server_unknown(address.clone(), error);
                if updated {
                    if let Some(server) = state.servers.get(&address) {
                        server.pool.clear();
                    }
                }
                updated
            }
            None => false,
        }
    }
}

/// A read handle onto the topology, used by monitors and server selection.
#[derive(Clone, Debug)]
pub(crate) struct TopologyWatcher {
    receiver: watch::Receiver<Arc<TopologyState>>,
    shutdown: watch::Receiver<bool>,
}

impl TopologyWatcher {
    /// The latest state, marking it as seen for the purposes of
    /// `wait_for_update`.
    pub(crate) fn observe_latest(&mut self) -> Arc<TopologyState> {
        self.receiver.borrow_and_update().clone()
    }

    /// The latest state without consuming the change notification.
    pub(crate) fn peek(&self) -> Arc<TopologyState> {
        self.receiver.borrow().clone()
    }

    /// Wait up to `timeout` for the topology to change. Returns whether a
    /// change was observed.
    pub(crate) async fn wait_for_update(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.receiver.changed()).await,
            Ok(Ok(()))
        )
    }

    pub(crate) fn is_alive(&self) -> bool {
        !*self.shutdown.borrow()
    }

    pub(crate) fn server_description(&self, address: &ServerAddress) -> Option<ServerDescription> {
        self.receiver
            .borrow()
            .description
            .get_server_description(address)
            .cloned()
    }
}

/// A handle monitors use to wait for check requests issued by server
/// selection or error handling.
#[derive(Clone, Debug)]
pub(crate) struct CheckRequestReceiver {
    inner: Weak<TopologyInner>,
}

impl CheckRequestReceiver {
    /// Wait until a check is requested or the timeout elapses.
    pub(crate) async fn wait_for_check_request(&self, timeout: Duration) {
        if let Some(inner) = self.inner.upgrade() {
            let notified = inner.check_requester.notified();
            let _ = tokio::time::timeout(timeout, notified).await;
        }
    }
}

/// Describes how far into connection establishment an error occurred, which
/// determines how the topology reacts to it.
#[derive(Debug, Clone)]
pub(crate) enum HandshakePhase {
    /// The error occurred before the handshake (or while checking out from
    /// the pool), so no generation is known.
    PreHello { generation: Option<u32> },

    /// The error occurred on an established connection.
    AfterCompletion {
        generation: u32,
        max_wire_version: Option<i32>,
    },
}

impl HandshakePhase {
    pub(crate) fn after_completion(connection: &Connection) -> Self {
        Self::AfterCompletion {
            generation: connection.generation(),
            max_wire_version: connection
                .stream_description
                .as_ref()
                .and_then(|sd| sd.max_wire_version),
        }
    }

    fn generation(&self) -> Option<u32> {
        match self {
            Self::PreHello { generation } => *generation,
            Self::AfterCompletion { generation, .. } => Some(*generation),
        }
    }
}
