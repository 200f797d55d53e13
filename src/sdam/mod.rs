mod description;
pub(crate) mod monitor;
pub mod public;
mod server;
mod topology;

pub(crate) use self::{
    description::{
        server::TopologyVersion,
        topology::{
            server_selection::{attempt_to_select_server, SelectedServer},
            SessionSupportStatus,
            TopologyDescription,
        },
    },
    server::Server,
    topology::{HandshakePhase, Topology},
};
pub use self::{description::server::ServerType, description::topology::TopologyType};

/// The minimum amount of time a monitor waits between checks of the same
/// server.
pub(crate) const MIN_HEARTBEAT_FREQUENCY: std::time::Duration =
    std::time::Duration::from_millis(500);

/// The default interval between monitor checks of a server.
pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: std::time::Duration =
    std::time::Duration::from_secs(10);
