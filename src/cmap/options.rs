use std::time::Duration;

use crate::{client::options::ClientOptions, event::cmap::CmapEventHandler};

/// Default connection pool size: one application connection per server (the
/// monitor holds its own dedicated connection).
pub(crate) const DEFAULT_MAX_POOL_SIZE: u32 = 1;

/// Options for a per-server connection pool, derived from the client options.
#[derive(Clone, Default)]
pub(crate) struct ConnectionPoolOptions {
    /// The maximum number of connections that the pool can have at a given
    /// time, including connections which are currently checked out.
    pub(crate) max_pool_size: Option<u32>,

    /// The minimum number of connections the background task keeps ready in
    /// the pool.
    pub(crate) min_pool_size: Option<u32>,

    /// Connections idle in the pool for longer than this are closed rather
    /// than handed out.
    pub(crate) max_idle_time: Option<Duration>,

    /// How long a checkout may wait for a connection to become available
    /// before failing.
    pub(crate) wait_queue_timeout: Option<Duration>,

    /// The handler receiving pool and connection lifecycle events.
    pub(crate) cmap_event_handler: Option<CmapEventHandler>,
}

impl std::fmt::Debug for ConnectionPoolOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ConnectionPoolOptions")
            .field("max_pool_size", &self.max_pool_size)
            .field("min_pool_size", &self.min_pool_size)
            .field("max_idle_time", &self.max_idle_time)
            .field("wait_queue_timeout", &self.wait_queue_timeout)
            .finish()
    }
}

impl ConnectionPoolOptions {
    pub(crate) fn from_client_options(options: &ClientOptions) -> Self {
        Self {
            max_pool_size: options.max_pool_size,
            min_pool_size: options.min_pool_size,
            max_idle_time: options.max_idle_time,
            wait_queue_timeout: options.wait_queue_timeout,
            cmap_event_handler: options.cmap_event_handler.clone(),
        }
    }
}
