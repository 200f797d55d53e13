//! Contains the events related to the connection pool.

use crate::options::ServerAddress;

/// The reasons that a connection may be closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionClosedReason {
    /// The connection pool containing the connection was cleared or the
    /// connection belonged to a previous pool generation.
    Stale,

    /// The connection sat idle in the pool for too long.
    Idle,

    /// An error occurred on the connection, making it unusable.
    Error,

    /// The pool that the connection belongs to has been closed.
    PoolClosed,
}

/// The reasons that a checkout attempt may fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionCheckoutFailedReason {
    /// The `wait_queue_timeout` elapsed while waiting for a connection to be
    /// available.
    Timeout,

    /// An error occurred while trying to establish a connection.
    ConnectionError,
}

/// An event describing connection pool activity, modeled on the
/// [CMAP specification](https://github.com/mongodb/specifications/blob/master/source/connection-monitoring-and-pooling/connection-monitoring-and-pooling.md).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CmapEvent {
    /// A connection pool was created.
    PoolCreated {
        /// The address of the server the pool connects to.
        address: ServerAddress,
    },

    /// A connection pool was cleared, invalidating its existing connections.
    PoolCleared {
        /// The address of the server the pool connects to.
        address: ServerAddress,
    },

    /// A connection pool was closed.
    PoolClosed {
        /// The address of the server the pool connects to.
        address: ServerAddress,
    },

    /// A connection was created, but has not yet completed its handshake.
    ConnectionCreated {
        /// The address of the server the connection is to.
        address: ServerAddress,
        /// The id of the connection within its pool.
        connection_id: u32,
    },

    /// A connection finished its handshake and is ready for use.
    ConnectionReady {
        /// The address of the server the connection is to.
        address: ServerAddress,
        /// The id of the connection within its pool.
        connection_id: u32,
    },

    /// A connection was closed.
    ConnectionClosed {
        /// The address of the server the connection was to.
        address: ServerAddress,
        /// The id of the connection within its pool.
        connection_id: u32,
        /// Why the connection was closed.
        reason: ConnectionClosedReason,
    },

    /// A thread began waiting to check out a connection.
    ConnectionCheckoutStarted {
        /// The address of the pool's server.
        address: ServerAddress,
    },

    /// A checkout attempt failed.
    ConnectionCheckoutFailed {
        /// The address of the pool's server.
        address: ServerAddress,
        /// Why the checkout failed.
        reason: ConnectionCheckoutFailedReason,
    },

    /// A connection was successfully checked out.
    ConnectionCheckedOut {
        /// The address of the server the connection is to.
        address: ServerAddress,
        /// The id of the connection within its pool.
        connection_id: u32,
    },

    /// A connection was checked back in.
    ConnectionCheckedIn {
        /// The address of the server the connection is to.
        address: ServerAddress,
        /// The id of the connection within its pool.
        connection_id: u32,
    },
}

/// A handler invoked with each [`CmapEvent`].
pub type CmapEventHandler = super::EventHandler<CmapEvent>;
