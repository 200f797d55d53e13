pub(crate) mod server_selection;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use serde::Deserialize;

use crate::{
    bson::ObjectId,
    client::options::{ClientOptions, ServerAddress},
    error::Result,
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::ReadPreference,
};

/// The possible types for a topology.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Default)]
#[non_exhaustive]
pub enum TopologyType {
    /// A single mongod server.
    Single,

    /// A replica set with no primary.
    ReplicaSetNoPrimary,

    /// A replica set with a primary.
    ReplicaSetWithPrimary,

    /// A sharded topology.
    Sharded,

    /// A load-balanced topology.
    LoadBalanced,

    /// A topology whose type is not known.
    #[default]
    Unknown,
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            TopologyType::Single => "Single",
            TopologyType::ReplicaSetNoPrimary => "ReplicaSetNoPrimary",
            TopologyType::ReplicaSetWithPrimary => "ReplicaSetWithPrimary",
            TopologyType::Sharded => "Sharded",
            TopologyType::LoadBalanced => "LoadBalanced",
            TopologyType::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Whether sessions are supported by the deployment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum SessionSupportStatus {
    /// It is not known yet whether the deployment supports sessions, since no
    /// data-bearing server has been seen.
    Undetermined,

    /// Sessions are not supported by this deployment.
    Unsupported,

    /// Sessions are supported by this deployment, which enforces the given
    /// logical session timeout.
    Supported {
        logical_session_timeout: Duration,
    },
}

/// A description of the deployment: its type plus a description of each of
/// its servers.
#[derive(Debug, Clone)]
pub(crate) struct TopologyDescription {
    /// Whether or not the topology was initialized with a single seed.
    pub(crate) single_seed: bool,

    /// The current type of the topology.
    pub(crate) topology_type: TopologyType,

    /// The replica set name of the topology.
    pub(crate) set_name: Option<String>,

    /// The highest replica set version the driver has seen by a member of the
    /// topology.
    pub(crate) max_set_version: Option<i32>,

    /// The highest replica set election id the driver has seen by a member of
    /// the topology.
    pub(crate) max_election_id: Option<ObjectId>,

    /// Describes the compatibility issue between the driver and server with
    /// regards to the respective supported wire versions, if any. While set,
    /// all new operations fail.
    pub(crate) compatibility_error: Option<String>,

    /// The minimum logical session timeout among data-bearing servers; `None`
    /// disables sessions.
    pub(crate) logical_session_timeout: Option<Duration>,

    /// The maximum latency a server may have beyond that of the fastest
    /// eligible server and still be selected.
    pub(crate) local_threshold: Option<Duration>,

    /// The interval between server checks, used in staleness estimates.
    pub(crate) heartbeat_freq: Option<Duration>,

    /// The server descriptions of each member of the topology.
    pub(crate) servers: HashMap<ServerAddress, ServerDescription>,
}

impl TopologyDescription {
    pub(crate) fn new(options: &ClientOptions) -> Self {
        let topology_type = if options.direct_connection == Some(true) {
            TopologyType::Single
        } else if options.repl_set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else if options.load_balanced == Some(true) {
            TopologyType::LoadBalanced
        } else {
            TopologyType::Unknown
        };

        let servers: HashMap<_, _> = options
            .hosts
            .iter()
            .map(|address| {
                let normalized = address.clone().normalized();
                (normalized.clone(), ServerDescription::new(normalized))
            })
            .collect();

        Self {
            single_seed: servers.len() == 1,
            topology_type,
            set_name: options.repl_set_name.clone(),
            max_set_version: None,
            max_election_id: None,
            compatibility_error: None,
            logical_session_timeout: None,
            local_threshold: options.local_threshold,
            heartbeat_freq: options.heartbeat_freq,
            servers,
        }
    }

    /// The server description for the given address, if it is part of the
    /// topology.
    pub(crate) fn get_server_description(
        &self,
        address: &ServerAddress,
    ) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    pub(crate) fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub(crate) fn compatibility_error(&self) -> Option<&String> {
        self.compatibility_error.as_ref()
    }

    pub(crate) fn has_available_servers(&self) -> bool {
        self.servers.values().any(|server| server.is_available())
    }

    /// Whether sessions (and thereby transactions and retryable writes) are
    /// supported by this deployment.
    pub(crate) fn session_support_status(&self) -> SessionSupportStatus {
        if self.topology_type == TopologyType::LoadBalanced {
            // load balancers are always backed by 3.6+ deployments
            return SessionSupportStatus::Supported {
                logical_session_timeout: Duration::from_secs(30 * 60),
            };
        }

        let has_data_bearing = self
            .servers
            .values()
            .any(|s| s.server_type.is_data_bearing());
        if !has_data_bearing {
            return SessionSupportStatus::Undetermined;
        }

        match self.logical_session_timeout {
            Some(logical_session_timeout) => SessionSupportStatus::Supported {
                logical_session_timeout,
            },
            None => SessionSupportStatus::Unsupported,
        }
    }

    /// The `$readPreference` to attach to a command sent to the server with
    /// the given type, if any. Only mongos and direct connections interpret
    /// the field.
    pub(crate) fn read_pref_for_command(
        &self,
        server_type: ServerType,
        read_preference: Option<&ReadPreference>,
    ) -> Option<ReadPreference> {
        match (self.topology_type, server_type) {
            (TopologyType::Sharded, ServerType::Mongos)
            | (TopologyType::Single, ServerType::Mongos)
            | (TopologyType::LoadBalanced, _) => match read_preference {
                // mongos treats an absent read preference as primary
                Some(ReadPreference::Primary) | None => None,
                Some(ReadPreference::SecondaryPreferred { options })
                    if options.tag_sets.is_none() && options.max_staleness.is_none() =>
                {
                    None
                }
                Some(pref) => Some(pref.clone()),
            },
            (TopologyType::Single, ServerType::Standalone) => None,
            // a direct connection to a replica set member must be readable
            // even when it is a secondary
            (TopologyType::Single, _) => Some(
                read_preference
                    .cloned()
                    .unwrap_or(ReadPreference::PrimaryPreferred {
                        options: Default::default(),
                    }),
            ),
            _ => None,
        }
    }

    /// Check the cluster for a compatibility error, and record the error
    /// message if one is found.
    fn check_compatibility(&mut self) {
        self.compatibility_error = None;

        for server in self.servers.values() {
            let error_message = server.compatibility_error_message();

            if error_message.is_some() {
                self.compatibility_error = error_message;
                return;
            }
        }
    }

    /// Recompute the minimum logical session timeout over the data-bearing
    /// servers.
    fn update_logical_session_timeout(&mut self) {
        self.logical_session_timeout = self
            .servers
            .values()
            .filter(|server| server.server_type.is_data_bearing())
            .try_fold(None, |min, server| {
                let timeout = server.logical_session_timeout().ok().flatten()?;
                Some(match min {
                    Some(min) => Some(std::cmp::min(min, timeout)),
                    None => Some(timeout),
                })
            })
            .flatten();
    }

    /// Update the topology based on the new information contained by the
    /// ServerDescription.
    pub(crate) fn update(&mut self, server_description: ServerDescription) -> Result<()> {
        // Ignore updates from servers not currently in the cluster.
        if !self.servers.contains_key(&server_description.address) {
            return Ok(());
        }

        // Replace the old info about the server with the new info.
        self.servers.insert(
            server_description.address.clone(),
            server_description.clone(),
        );

        // Update the topology description based on the current topology type.
        match self.topology_type {
            TopologyType::Single | TopologyType::LoadBalanced => {}
            TopologyType::Unknown => self.update_unknown_topology(server_description)?,
            TopologyType::Sharded => self.update_sharded_topology(server_description),
            TopologyType::ReplicaSetNoPrimary => {
                self.update_replica_set_no_primary_topology(server_description)?
            }
            TopologyType::ReplicaSetWithPrimary => {
                self.update_replica_set_with_primary_topology(server_description)?;
            }
        }

        // Record any compatibility error and the new session timeout.
        self.check_compatibility();
        self.update_logical_session_timeout();

        Ok(())
    }

    /// Update the Unknown topology description based on the server
    /// description.
    fn update_unknown_topology(&mut self, server_description: ServerDescription) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::LoadBalancer => {}
            ServerType::Standalone => {
                self.update_unknown_with_standalone_server(server_description)
            }
            ServerType::Mongos => self.topology_type = TopologyType::Sharded,
            ServerType::RsPrimary => {
                self.update_rs_from_primary_server(server_description)?;
            }
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_without_primary_server(server_description)?;
            }
        }

        Ok(())
    }

    /// Update the Sharded topology description based on the server
    /// description.
    fn update_sharded_topology(&mut self, server_description: ServerDescription) {
        match server_description.server_type {
            ServerType::Unknown | ServerType::Mongos => {}
            _ => {
                self.servers.remove(&server_description.address);
            }
        }
    }

    /// Update the ReplicaSetNoPrimary topology description based on the
    /// server description.
    fn update_replica_set_no_primary_topology(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost | ServerType::LoadBalancer => {}
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&server_description.address);
            }
            ServerType::RsPrimary => self.update_rs_from_primary_server(server_description)?,
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_without_primary_server(server_description)?;
            }
        }

        Ok(())
    }

    /// Update the ReplicaSetWithPrimary topology description based on the
    /// server description.
    fn update_replica_set_with_primary_topology(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        match server_description.server_type {
            ServerType::Unknown | ServerType::RsGhost => {
                self.record_primary_state();
            }
            ServerType::LoadBalancer => {}
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(&server_description.address);
                self.record_primary_state();
            }
            ServerType::RsPrimary => self.update_rs_from_primary_server(server_description)?,
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                self.update_rs_with_primary_from_member(server_description)?;
            }
        }

        Ok(())
    }

    /// Update the Unknown topology description based on the Standalone server
    /// description.
    fn update_unknown_with_standalone_server(&mut self, server_description: ServerDescription) {
        if self.single_seed {
            self.topology_type = TopologyType::Single;
        } else {
            self.servers.remove(&server_description.address);
        }
    }

    /// Update the ReplicaSetNoPrimary topology description based on the
    /// non-primary server description.
    fn update_rs_without_primary_server(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.servers.remove(&server_description.address);

            return Ok(());
        }

        self.add_new_servers(server_description.known_hosts()?);

        if server_description.invalid_me()? {
            self.servers.remove(&server_description.address);
        }

        Ok(())
    }

    /// Update the ReplicaSetWithPrimary topology description based on the
    /// non-primary server description.
    fn update_rs_with_primary_from_member(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name != server_description.set_name()? {
            self.servers.remove(&server_description.address);
            self.record_primary_state();

            return Ok(());
        }

        if server_description.invalid_me()? {
            self.servers.remove(&server_description.address);
            self.record_primary_state();

            return Ok(());
        }

        Ok(())
    }

    /// Update the replica set topology description based on the RSPrimary
    /// server description.
    fn update_rs_from_primary_server(
        &mut self,
        server_description: ServerDescription,
    ) -> Result<()> {
        if self.set_name.is_none() {
            self.set_name = server_description.set_name()?;
        } else if self.set_name != server_description.set_name()? {
            self.servers.remove(&server_description.address);
            self.record_primary_state();

            return Ok(());
        }

        if let Some(server_set_version) = server_description.set_version()? {
            if let Some(server_election_id) = server_description.election_id()? {
                if let (Some(topology_max_set_version), Some(ref topology_max_election_id)) =
                    (self.max_set_version, self.max_election_id)
                {
                    // a primary with an older (setVersion, electionId) pair
                    // is a stale primary from a previous election
                    if topology_max_set_version > server_set_version
                        || (topology_max_set_version == server_set_version
                            && *topology_max_election_id > server_election_id)
                    {
                        self.servers.insert(
                            server_description.address.clone(),
                            ServerDescription::new(server_description.address),
                        );
                        self.record_primary_state();
                        return Ok(());
                    }
                }

                self.max_election_id = Some(server_election_id);
            }
        }

        if let Some(server_set_version) = server_description.set_version()? {
            if self
                .max_set_version
                .map(|topology_max_set_version| server_set_version > topology_max_set_version)
                .unwrap_or(true)
            {
                self.max_set_version = Some(server_set_version);
            }
        }

        let addresses: Vec<_> = self.servers.keys().cloned().collect();

        // If any other servers are RSPrimary, replace them with an unknown
        // server description, which will cause them to be re-checked.
        for address in addresses.clone() {
            if address == server_description.address {
                continue;
            }

            if let Some(ServerType::RsPrimary) =
                self.servers.get(&address).map(|server| server.server_type)
            {
                self.servers
                    .insert(address.clone(), ServerDescription::new(address));
            }
        }

        let known_hosts = server_description.known_hosts()?;
        self.add_new_servers(known_hosts.clone());
        let known_hosts: HashSet<_> = known_hosts.into_iter().collect();

        for address in addresses {
            if !known_hosts.contains(&address) {
                self.servers.remove(&address);
            }
        }

        self.record_primary_state();

        Ok(())
    }

    /// Inspect the topology for a primary server, and update the topology
    /// type to ReplicaSetNoPrimary if none is found.
    ///
    /// This should only be called on a replica set topology.
    fn record_primary_state(&mut self) {
        self.topology_type = if self
            .servers
            .values()
            .any(|server| server.server_type == ServerType::RsPrimary)
        {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    /// Create a new ServerDescription for each address not yet part of the
    /// topology and add it.
    fn add_new_servers(&mut self, servers: impl IntoIterator<Item = ServerAddress>) {
        for server in servers {
            let server = server.normalized();
            if !self.servers.contains_key(&server) {
                self.servers
                    .insert(server.clone(), ServerDescription::new(server));
            }
        }
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::result::Result<(), fmt::Error> {
        write!(f, "{{ Type: {}", self.topology_type)?;

        if let Some(ref set_name) = self.set_name {
            write!(f, ", Set Name: {}", set_name)?;
        }

        if let Some(ref compatibility_error) = self.compatibility_error {
            write!(f, ", Compatibility Error: {}", compatibility_error)?;
        }

        if !self.servers.is_empty() {
            write!(f, ", Servers: [ ")?;
            for (i, server) in self.servers.values().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {:?}", server.address, server.server_type)?;
            }
            write!(f, " ]")?;
        }

        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bson::doc,
        hello::{HelloCommandResponse, HelloReply},
        options::ClientOptions,
    };

    fn hello_reply(address: &ServerAddress, body: crate::bson::Document) -> HelloReply {
        HelloReply {
            server_address: address.clone(),
            command_response: crate::bson::from_document::<HelloCommandResponse>(body.clone())
                .unwrap(),
            raw_command_response: body,
            cluster_time: None,
        }
    }

    fn description(address: &str, body: crate::bson::Document) -> ServerDescription {
        let address = ServerAddress::parse(address).unwrap();
        ServerDescription::new_from_hello_reply(
            address.clone(),
            hello_reply(&address, body),
            Some(std::time::Duration::from_millis(5)),
        )
    }

    fn rs_member_body(kind: &str, set_name: &str, hosts: &[&str]) -> crate::bson::Document {
        let mut body = doc! {
            "setName": set_name,
            "hosts": hosts.iter().map(|h| crate::bson::Bson::String(h.to_string())).collect::<Vec<_>>(),
            "minWireVersion": 6,
            "maxWireVersion": 17,
            "logicalSessionTimeoutMinutes": 30,
        };
        match kind {
            "primary" => {
                body.insert("isWritablePrimary", true);
            }
            "secondary" => {
                body.insert("secondary", true);
            }
            other => panic!("unexpected member kind {}", other),
        }
        body
    }

    fn seeded(uri: &str) -> TopologyDescription {
        let options = ClientOptions::parse_without_srv_resolution(uri).unwrap();
        TopologyDescription::new(&options)
    }

    #[test]
    fn discovers_replica_set_from_primary() {
        let mut topology = seeded("mongodb://a:27017");
        assert_eq!(topology.topology_type, TopologyType::Unknown);

        topology
            .update(description(
                "a:27017",
                rs_member_body("primary", "repl0", &["a:27017", "b:27017", "c:27017"]),
            ))
            .unwrap();

        assert_eq!(topology.topology_type, TopologyType::ReplicaSetWithPrimary);
        assert_eq!(topology.set_name.as_deref(), Some("repl0"));
        // unseen hosts from the primary's host list are added for discovery
        assert_eq!(topology.servers.len(), 3);
        assert_eq!(
            topology.logical_session_timeout,
            Some(Duration::from_secs(30 * 60))
        );
    }

    #[test]
    fn removes_member_with_mismatched_set_name() {
        let mut topology = seeded("mongodb://a:27017,b:27017/?replicaSet=repl0");
        assert_eq!(topology.topology_type, TopologyType::ReplicaSetNoPrimary);

        topology
            .update(description(
                "b:27017",
                rs_member_body("secondary", "other_set", &["b:27017"]),
            ))
            .unwrap();

        assert!(!topology.servers.contains_key(&ServerAddress::parse("b:27017").unwrap()));
    }

    #[test]
    fn standalone_with_multiple_seeds_is_removed() {
        let mut topology = seeded("mongodb://a:27017,b:27017");

        topology
            .update(description(
                "a:27017",
                doc! { "isWritablePrimary": true, "minWireVersion": 6, "maxWireVersion": 17 },
            ))
            .unwrap();

        assert_eq!(topology.topology_type, TopologyType::Unknown);
        assert!(!topology.servers.contains_key(&ServerAddress::parse("a:27017").unwrap()));
    }

    #[test]
    fn single_seed_standalone_pins_single() {
        let mut topology = seeded("mongodb://a:27017");

        topology
            .update(description(
                "a:27017",
                doc! { "isWritablePrimary": true, "minWireVersion": 6, "maxWireVersion": 17 },
            ))
            .unwrap();

        assert_eq!(topology.topology_type, TopologyType::Single);
    }

    #[test]
    fn direct_connection_forces_single() {
        let topology = seeded("mongodb://a:27017/?directConnection=true");
        assert_eq!(topology.topology_type, TopologyType::Single);
    }

    #[test]
    fn mongos_promotes_sharded_and_non_mongos_removed() {
        let mut topology = seeded("mongodb://a:27017,b:27017");

        topology
            .update(description(
                "a:27017",
                doc! { "msg": "isdbgrid", "minWireVersion": 6, "maxWireVersion": 17 },
            ))
            .unwrap();
        assert_eq!(topology.topology_type, TopologyType::Sharded);

        topology
            .update(description(
                "b:27017",
                rs_member_body("secondary", "repl0", &["b:27017"]),
            ))
            .unwrap();
        assert!(!topology.servers.contains_key(&ServerAddress::parse("b:27017").unwrap()));
    }

    #[test]
    fn stale_primary_invalidated_by_election_ordering() {
        let mut topology = seeded("mongodb://a:27017,b:27017");

        let newer_election_id = crate::bson::oid::ObjectId::parse_str(
            "ffffffffffffffffffffffff",
        )
        .unwrap();
        let older_election_id = crate::bson::oid::ObjectId::parse_str(
            "000000000000000000000000",
        )
        .unwrap();

        let mut primary_a = rs_member_body("primary", "repl0", &["a:27017", "b:27017"]);
        primary_a.insert("setVersion", 1);
        primary_a.insert("electionId", newer_election_id);
        topology.update(description("a:27017", primary_a)).unwrap();
        assert_eq!(topology.topology_type, TopologyType::ReplicaSetWithPrimary);

        // a stale primary from before the election reports an older id
        let mut primary_b = rs_member_body("primary", "repl0", &["a:27017", "b:27017"]);
        primary_b.insert("setVersion", 1);
        primary_b.insert("electionId", older_election_id);
        topology.update(description("b:27017", primary_b)).unwrap();

        let b = topology
            .get_server_description(&ServerAddress::parse("b:27017").unwrap())
            .unwrap();
        assert_eq!(b.server_type, ServerType::Unknown);
        assert_eq!(topology.topology_type, TopologyType::ReplicaSetWithPrimary);
    }

    #[test]
    fn absent_hosts_removed_on_primary_update() {
        let mut topology = seeded("mongodb://a:27017,b:27017,c:27017/?replicaSet=repl0");

        topology
            .update(description(
                "a:27017",
                rs_member_body("primary", "repl0", &["a:27017", "b:27017"]),
            ))
            .unwrap();

        assert!(topology.servers.contains_key(&ServerAddress::parse("b:27017").unwrap()));
        assert!(!topology.servers.contains_key(&ServerAddress::parse("c:27017").unwrap()));
    }

    #[test]
    fn wire_version_mismatch_sets_compatibility_error() {
        let mut topology = seeded("mongodb://a:27017");

        topology
            .update(description(
                "a:27017",
                doc! { "isWritablePrimary": true, "minWireVersion": 99, "maxWireVersion": 100 },
            ))
            .unwrap();

        assert!(topology.compatibility_error.is_some());
    }

    #[test]
    fn session_timeout_is_min_across_data_bearing_servers() {
        let mut topology = seeded("mongodb://a:27017,b:27017/?replicaSet=repl0");

        let mut primary = rs_member_body("primary", "repl0", &["a:27017", "b:27017"]);
        primary.insert("logicalSessionTimeoutMinutes", 30);
        topology.update(description("a:27017", primary)).unwrap();

        let mut secondary = rs_member_body("secondary", "repl0", &["a:27017", "b:27017"]);
        secondary.insert("logicalSessionTimeoutMinutes", 10);
        topology.update(description("b:27017", secondary)).unwrap();

        assert_eq!(
            topology.logical_session_timeout,
            Some(Duration::from_secs(10 * 60))
        );
    }
}
