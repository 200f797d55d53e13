//! Contains the events related to topology monitoring.

use std::time::Duration;

use crate::{bson::Document, error::Error, options::ServerAddress, ServerInfo};

/// An event describing topology discovery and monitoring activity, modeled
/// on the [SDAM specification](https://github.com/mongodb/specifications/blob/master/source/server-discovery-and-monitoring/server-discovery-and-monitoring.md).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum SdamEvent {
    /// The driver began monitoring a deployment.
    TopologyOpening {},

    /// The driver stopped monitoring a deployment.
    TopologyClosed {},

    /// The topology description changed in some way.
    TopologyDescriptionChanged {},

    /// The driver began monitoring a new server.
    ServerOpening {
        /// The address of the server.
        address: ServerAddress,
    },

    /// The driver stopped monitoring a server.
    ServerClosed {
        /// The address of the server.
        address: ServerAddress,
    },

    /// A server check changed the description of a server.
    ServerDescriptionChanged {
        /// The address of the server.
        address: ServerAddress,
        /// What was previously known about the server.
        previous: Option<ServerInfo<'static>>,
        /// What is now known about the server.
        new: ServerInfo<'static>,
    },

    /// A monitor began a server check.
    ServerHeartbeatStarted {
        /// The address of the server being checked.
        address: ServerAddress,
    },

    /// A server check completed successfully.
    ServerHeartbeatSucceeded {
        /// The address of the server checked.
        address: ServerAddress,
        /// How long the check took.
        duration: Duration,
        /// The server's hello reply, with any authentication material
        /// removed.
        reply: Document,
    },

    /// A server check failed.
    ServerHeartbeatFailed {
        /// The address of the server checked.
        address: ServerAddress,
        /// How long the check took.
        duration: Duration,
        /// The error the check failed with.
        failure: Error,
    },

    /// Server selection ran out of time without finding an eligible server.
    EmptySelection {
        /// The name of the operation that was being routed.
        operation: String,
        /// A description of the criteria and topology at timeout.
        message: String,
    },
}

/// A handler invoked with each [`SdamEvent`].
pub type SdamEventHandler = super::EventHandler<SdamEvent>;
