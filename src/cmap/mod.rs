pub(crate) mod conn;
pub(crate) mod establish;
pub(crate) mod options;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::sync::Semaphore;

pub(crate) use self::conn::{Command, CommandResponse, Connection, StreamDescription};
pub use self::conn::ConnectionInfo;
use self::{establish::ConnectionEstablisher, options::ConnectionPoolOptions};
use crate::{
    error::{Error, ErrorKind, Result},
    event::cmap::{
        CmapEvent,
        CmapEventHandler,
        ConnectionCheckoutFailedReason,
        ConnectionClosedReason,
    },
    options::ServerAddress,
    runtime,
};

/// A pool of connections implementing the CMAP spec.
///
/// Checkouts are first-come first-served: callers wait on a fair semaphore
/// whose permits bound the number of connections checked out at once, and
/// available connections are handed out most-recently-used first.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    address: ServerAddress,

    max_idle_time: Option<Duration>,
    min_pool_size: Option<u32>,
    wait_queue_timeout: Option<Duration>,

    /// Incremented whenever the pool is cleared. Connections from a previous
    /// generation are closed lazily as they are encountered.
    generation: AtomicU32,

    /// The total number of connections currently managed by the pool,
    /// including those checked out.
    total_connection_count: AtomicU32,

    next_connection_id: AtomicU32,

    /// Permits bound the number of concurrently checked-out connections.
    /// `tokio`'s semaphore queues acquirers fairly, which provides the
    /// first-come first-served behavior the CMAP spec requires.
    wait_queue: Arc<Semaphore>,

    /// The set of available connections. Connections are popped off the back,
    /// so the most recently used connection is handed out first.
    connections: Mutex<Vec<Connection>>,

    establisher: ConnectionEstablisher,

    closed: AtomicBool,

    event_handler: Option<CmapEventHandler>,
}

impl std::fmt::Debug for PoolInner {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PoolInner")
            .field("address", &self.address)
            .field("generation", &self.generation)
            .field(
                "total_connection_count",
                &self.total_connection_count,
            )
            .field("closed", &self.closed)
            .finish()
    }
}

impl ConnectionPool {
    pub(crate) fn new(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        options: ConnectionPoolOptions,
    ) -> Self {
        let max_pool_size = options
            .max_pool_size
            .unwrap_or(options::DEFAULT_MAX_POOL_SIZE);
        // a pool size of zero means the pool is unbounded
        let permits = if max_pool_size == 0 {
            Semaphore::MAX_PERMITS
        } else {
            max_pool_size as usize
        };

        let inner = Arc::new(PoolInner {
            address: address.clone(),
            max_idle_time: options.max_idle_time,
            min_pool_size: options.min_pool_size,
            wait_queue_timeout: options.wait_queue_timeout,
            generation: AtomicU32::new(0),
            total_connection_count: AtomicU32::new(0),
            next_connection_id: AtomicU32::new(1),
            wait_queue: Arc::new(Semaphore::new(permits)),
            connections: Mutex::new(Vec::new()),
            establisher,
            closed: AtomicBool::new(false),
            event_handler: options.cmap_event_handler,
        });

        inner.emit_event(|| CmapEvent::PoolCreated {
            address: address.clone(),
        });

        PoolInner::start_background_task(Arc::downgrade(&inner));

        Self { inner }
    }

    /// The current generation of the pool.
    pub(crate) fn generation(&self) -> u32 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Checks out a connection, blocking until one is available if the pool
    /// is fully checked out, up to `wait_queue_timeout`.
    pub(crate) async fn check_out(&self) -> Result<Connection> {
        self.inner.emit_event(|| CmapEvent::ConnectionCheckoutStarted {
            address: self.inner.address.clone(),
        });

        let permit_future = self.inner.wait_queue.clone().acquire_owned();
        let permit_result = match self.inner.wait_queue_timeout {
            Some(timeout) => match runtime::timeout(timeout, permit_future).await {
                Ok(result) => result.map_err(|_| self.closed_error()),
                Err(_) => {
                    self.inner
                        .emit_event(|| CmapEvent::ConnectionCheckoutFailed {
                            address: self.inner.address.clone(),
                            reason: ConnectionCheckoutFailedReason::Timeout,
                        });
                    return Err(ErrorKind::WaitQueueTimeout {
                        address: self.inner.address.clone(),
                    }
                    .into());
                }
            },
            None => permit_future.await.map_err(|_| self.closed_error()),
        };
        let permit = permit_result?;

        let generation = self.generation();

        // Hand out the most recently used healthy connection, lazily
        // discarding those that went stale or idle while pooled.
        loop {
            let conn = self.inner.connections.lock().expect("pool lock poisoned").pop();
            match conn {
                Some(conn) if conn.is_stale(generation) => {
                    self.inner
                        .close_connection(conn, ConnectionClosedReason::Stale);
                }
                Some(conn) if conn.is_idle(self.inner.max_idle_time) => {
                    self.inner
                        .close_connection(conn, ConnectionClosedReason::Idle);
                }
                Some(mut conn) => {
                    conn.mark_checked_out(Arc::downgrade(&self.inner), permit);
                    self.inner.emit_event(|| CmapEvent::ConnectionCheckedOut {
                        address: conn.address.clone(),
                        connection_id: conn.id,
                    });
                    return Ok(conn);
                }
                None => break,
            }
        }

        match self.inner.create_connection().await {
            Ok(mut conn) => {
                conn.mark_checked_out(Arc::downgrade(&self.inner), permit);
                self.inner.emit_event(|| CmapEvent::ConnectionCheckedOut {
                    address: conn.address.clone(),
                    connection_id: conn.id,
                });
                Ok(conn)
            }
            Err(error) => {
                self.inner
                    .emit_event(|| CmapEvent::ConnectionCheckoutFailed {
                        address: self.inner.address.clone(),
                        reason: ConnectionCheckoutFailedReason::ConnectionError,
                    });
                Err(error)
            }
        }
    }

    /// Increments the generation of the pool and closes all available
    /// connections; in-flight connections from the old generation are closed
    /// as they are checked back in.
    pub(crate) fn clear(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        let conns = {
            let mut lock = self.inner.connections.lock().expect("pool lock poisoned");
            std::mem::take(&mut *lock)
        };
        for conn in conns {
            self.inner
                .close_connection(conn, ConnectionClosedReason::Stale);
        }

        self.inner.emit_event(|| CmapEvent::PoolCleared {
            address: self.inner.address.clone(),
        });
    }

    /// Closes the pool permanently. Waiters in the checkout queue fail
    /// immediately.
    pub(crate) fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.wait_queue.close();

        let conns = {
            let mut lock = self.inner.connections.lock().expect("pool lock poisoned");
            std::mem::take(&mut *lock)
        };
        for conn in conns {
            self.inner
                .close_connection(conn, ConnectionClosedReason::PoolClosed);
        }

        self.inner.emit_event(|| CmapEvent::PoolClosed {
            address: self.inner.address.clone(),
        });
    }

    fn closed_error(&self) -> Error {
        Error::from(ErrorKind::ConnectionPoolCleared {
            message: format!(
                "attempted to check out a connection from the closed pool for {}",
                self.inner.address
            ),
        })
    }
}

impl PoolInner {
    /// Returns a checked-out connection to the pool. Called both directly and
    /// from the `Drop` implementation of `Connection`.
    pub(crate) fn check_in(&self, mut conn: Connection) {
        self.emit_event(|| CmapEvent::ConnectionCheckedIn {
            address: conn.address.clone(),
            connection_id: conn.id,
        });

        let closed = self.closed.load(Ordering::SeqCst);
        if closed || conn.has_errored() || conn.is_stale(self.generation.load(Ordering::SeqCst)) {
            let reason = if closed {
                ConnectionClosedReason::PoolClosed
            } else if conn.has_errored() {
                ConnectionClosedReason::Error
            } else {
                ConnectionClosedReason::Stale
            };
            self.close_connection(conn, reason);
            return;
        }

        conn.mark_checked_in();
        self.connections
            .lock()
            .expect("pool lock poisoned")
            .push(conn);
    }

    async fn create_connection(&self) -> Result<Connection> {
        let id = self.next_connection_id.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        self.total_connection_count.fetch_add(1, Ordering::SeqCst);

        self.emit_event(|| CmapEvent::ConnectionCreated {
            address: self.address.clone(),
            connection_id: id,
        });

        match self
            .establisher
            .establish_connection(self.address.clone(), id, generation)
            .await
        {
            Ok(conn) => {
                self.emit_event(|| CmapEvent::ConnectionReady {
                    address: conn.address.clone(),
                    connection_id: conn.id,
                });
                Ok(conn)
            }
            Err(error) => {
                self.total_connection_count.fetch_sub(1, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    fn close_connection(&self, conn: Connection, reason: ConnectionClosedReason) {
        self.emit_event(|| CmapEvent::ConnectionClosed {
            address: conn.address.clone(),
            connection_id: conn.id,
            reason,
        });
        self.total_connection_count.fetch_sub(1, Ordering::SeqCst);
        drop(conn);
    }

    fn emit_event<F>(&self, event: F)
    where
        F: FnOnce() -> CmapEvent,
    {
        if let Some(ref handler) = self.event_handler {
            handler(event());
        }
    }

    /// Periodically removes perished connections and tops the pool up to
    /// `min_pool_size`.
    fn start_background_task(inner: std::sync::Weak<PoolInner>) {
        runtime::spawn(async move {
            loop {
                runtime::delay_for(Duration::from_millis(500)).await;

                let inner = match inner.upgrade() {
                    Some(inner) => inner,
                    None => break,
                };
                if inner.closed.load(Ordering::SeqCst) {
                    break;
                }

                inner.remove_perished_connections();
                inner.ensure_min_connections().await;
            }
        });
    }

    fn remove_perished_connections(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let perished: Vec<Connection> = {
            let mut lock = self.connections.lock().expect("pool lock poisoned");
            let (keep, discard) = std::mem::take(&mut *lock)
                .into_iter()
                .partition(|conn| !conn.is_stale(generation) && !conn.is_idle(self.max_idle_time));
            *lock = keep;
            discard
        };

        for conn in perished {
            self.close_connection(conn, ConnectionClosedReason::Idle);
        }
    }

    async fn ensure_min_connections(&self) {
        let min_pool_size = match self.min_pool_size {
            Some(size) => size,
            None => return,
        };

        while self.total_connection_count.load(Ordering::SeqCst) < min_pool_size {
            match self.create_connection().await {
                Ok(mut conn) => {
                    conn.mark_checked_in();
                    self.connections
                        .lock()
                        .expect("pool lock poisoned")
                        .push(conn);
                }
                Err(error) => {
                    // checkout paths surface connection errors; from here
                    // just wait for the next tick
                    tracing::debug!(
                        address = %self.address,
                        error = %error,
                        "failed to populate connection pool to its minimum size"
                    );
                    break;
                }
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        let conns = std::mem::take(&mut *self.connections.lock().expect("pool lock poisoned"));
        for conn in conns {
            self.emit_event(|| CmapEvent::ConnectionClosed {
                address: conn.address.clone(),
                connection_id: conn.id,
                reason: ConnectionClosedReason::PoolClosed,
            });
        }
    }
}
