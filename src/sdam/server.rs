use crate::{
    cmap::{establish::ConnectionEstablisher, options::ConnectionPoolOptions, ConnectionPool},
    options::ServerAddress,
};

/// Contains the state for a given server in the topology: its address and
/// application connection pool.
#[derive(Debug)]
pub(crate) struct Server {
    pub(crate) address: ServerAddress,

    /// The application connection pool for this server.
    pub(crate) pool: ConnectionPool,
}

impl Server {
    pub(crate) fn new(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        options: ConnectionPoolOptions,
    ) -> Self {
        Self {
            pool: ConnectionPool::new(address.clone(), establisher, options),
            address,
        }
    }
}
