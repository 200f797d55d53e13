use std::{collections::HashMap, ops::Deref, sync::Arc, time::Duration};

use rand::seq::IndexedRandom;

use super::{TopologyDescription, TopologyType};
use crate::{
    error::{ErrorKind, Result},
    options::ServerAddress,
    sdam::{
        description::server::{ServerDescription, ServerType},
        public::ServerInfo,
        Server,
    },
    selection_criteria::{ReadPreference, SelectionCriteria, TagSet},
};

pub(crate) const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);
pub(crate) const IDLE_WRITE_PERIOD: Duration = Duration::from_secs(10);
const MIN_MAX_STALENESS: Duration = Duration::from_secs(90);

/// A server handle produced by a successful selection.
#[derive(Debug)]
pub(crate) struct SelectedServer {
    server: Arc<Server>,
}

impl SelectedServer {
    fn new(server: Arc<Server>) -> Self {
        Self { server }
    }
}

impl Deref for SelectedServer {
    type Target = Server;

    fn deref(&self) -> &Server {
        self.server.deref()
    }
}

/// Attempt to select a server, returning `None` if no server matched the
/// provided criteria.
pub(crate) fn attempt_to_select_server(
    criteria: &SelectionCriteria,
    topology_description: &TopologyDescription,
    servers: &HashMap<ServerAddress, Arc<Server>>,
    deprioritized: Option<&ServerAddress>,
) -> Result<Option<SelectedServer>> {
    let mut in_window = topology_description.suitable_servers_in_latency_window(criteria)?;
    if let Some(addr) = deprioritized {
        // a server that just failed the operation is only reselected if it
        // is the sole remaining candidate
        if in_window.len() > 1 {
            in_window.retain(|description| &description.address != addr);
        }
    }
    let in_window_servers: Vec<_> = in_window
        .into_iter()
        .flat_map(|description| servers.get(&description.address))
        .collect();
    let selected = select_server_in_latency_window(in_window_servers);
    Ok(selected.map(SelectedServer::new))
}

/// Choose uniformly at random among the suitable servers within the latency
/// window.
fn select_server_in_latency_window(in_window: Vec<&Arc<Server>>) -> Option<Arc<Server>> {
    in_window
        .choose(&mut rand::rng())
        .map(|server| (*server).clone())
}

impl TopologyDescription {
    pub(crate) fn server_selection_timeout_error_message(
        &self,
        criteria: &SelectionCriteria,
    ) -> String {
        if self.has_available_servers() {
            format!(
                "Server selection timeout: None of the available servers suitable for criteria \
                 {:?}. Topology: {}",
                criteria, self
            )
        } else {
            format!(
                "Server selection timeout: No available servers. Topology: {}",
                self
            )
        }
    }

    pub(crate) fn suitable_servers_in_latency_window(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<Vec<&ServerDescription>> {
        if let Some(message) = self.compatibility_error() {
            return Err(ErrorKind::IncompatibleServer {
                message: message.to_string(),
            }
            .into());
        }

        let mut suitable_servers = match criteria {
            SelectionCriteria::ReadPreference(ref read_pref) => self.suitable_servers(read_pref)?,
            SelectionCriteria::Predicate(ref filter) => self
                .servers
                .values()
                .filter(|server| {
                    // If we're direct-connected, ignore whether the single
                    // server in the topology is data-bearing.
                    (self.topology_type == TopologyType::Single
                        || server.server_type.is_data_bearing())
                        && filter(&ServerInfo::new_borrowed(server))
                })
                .collect(),
        };

        self.retain_servers_within_latency_window(&mut suitable_servers);

        Ok(suitable_servers)
    }

    fn suitable_servers(&self, read_preference: &ReadPreference) -> Result<Vec<&ServerDescription>> {
        let servers = match self.topology_type {
            TopologyType::Unknown => Vec::new(),
            TopologyType::Single | TopologyType::LoadBalanced => self.servers.values().collect(),
            TopologyType::Sharded => self.servers_with_type(&[ServerType::Mongos]).collect(),
            TopologyType::ReplicaSetWithPrimary | TopologyType::ReplicaSetNoPrimary => {
                self.suitable_servers_in_replica_set(read_preference)?
            }
        };

        Ok(servers)
    }

    fn retain_servers_within_latency_window(
        &self,
        suitable_servers: &mut Vec<&ServerDescription>,
    ) {
        let shortest_average_rtt = suitable_servers
            .iter()
            .filter_map(|server_desc| server_desc.average_round_trip_time)
            .min();

        let local_threshold = self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD);

        let max_rtt_within_window = shortest_average_rtt
            .map(|rtt| rtt.checked_add(local_threshold).unwrap_or(Duration::MAX));

        suitable_servers.retain(move |server_desc| {
            match (server_desc.average_round_trip_time, max_rtt_within_window) {
                (Some(server_rtt), Some(max_rtt)) => server_rtt <= max_rtt,
                // load balancers are not monitored and so have no RTT; they
                // are always selectable
                _ => matches!(server_desc.server_type, ServerType::LoadBalancer),
            }
        });
    }

    pub(crate) fn servers_with_type<'a>(
        &'a self,
        types: &'a [ServerType],
    ) -> impl Iterator<Item = &'a ServerDescription> {
        self.servers
            .values()
            .filter(move |server| types.contains(&server.server_type))
    }

    pub(crate) fn primary(&self) -> Option<&ServerDescription> {
        self.servers_with_type(&[ServerType::RsPrimary]).next()
    }

    fn suitable_servers_in_replica_set(
        &self,
        read_preference: &ReadPreference,
    ) -> Result<Vec<&ServerDescription>> {
        let tag_sets = read_preference.tag_sets();
        let max_staleness = read_preference.max_staleness();

        let servers = match read_preference {
            ReadPreference::Primary => self.servers_with_type(&[ServerType::RsPrimary]).collect(),
            ReadPreference::Secondary { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
            ReadPreference::PrimaryPreferred { .. } => match self.primary() {
                Some(primary) => vec![primary],
                None => self.suitable_servers_for_read_preference(
                    &[ServerType::RsSecondary],
                    tag_sets,
                    max_staleness,
                )?,
            },
            ReadPreference::SecondaryPreferred { .. } => {
                let suitable_servers = self.suitable_servers_for_read_preference(
                    &[ServerType::RsSecondary],
                    tag_sets,
                    max_staleness,
                )?;

                if suitable_servers.is_empty() {
                    self.servers_with_type(&[ServerType::RsPrimary]).collect()
                } else {
                    suitable_servers
                }
            }
            ReadPreference::Nearest { .. } => self.suitable_servers_for_read_preference(
                &[ServerType::RsPrimary, ServerType::RsSecondary],
                tag_sets,
                max_staleness,
            )?,
        };

        Ok(servers)
    }

    fn suitable_servers_for_read_preference(
        &self,
        types: &'static [ServerType],
        tag_sets: Option<&Vec<TagSet>>,
        max_staleness: Option<Duration>,
    ) -> Result<Vec<&ServerDescription>> {
        if let Some(max_staleness) = max_staleness {
            self.verify_max_staleness(max_staleness)?;
        }

        let mut servers = self.servers_with_type(types).collect();

        if let Some(max_staleness) = max_staleness {
            // According to the spec, max staleness <= 0 is the same as no max
            // staleness.
            if max_staleness > Duration::from_secs(0) {
                self.filter_servers_by_max_staleness(&mut servers, max_staleness);
            }
        }

        if let Some(tag_sets) = tag_sets {
            filter_servers_by_tag_sets(&mut servers, tag_sets);
        }

        Ok(servers)
    }

    fn verify_max_staleness(&self, max_staleness: Duration) -> Result<()> {
        if max_staleness < MIN_MAX_STALENESS {
            return Err(ErrorKind::InvalidArgument {
                message: "max staleness cannot be less than 90 seconds".to_string(),
            }
            .into());
        }

        let heartbeat_frequency = self
            .heartbeat_freq
            .unwrap_or(crate::sdam::DEFAULT_HEARTBEAT_FREQUENCY);
        if max_staleness < heartbeat_frequency + IDLE_WRITE_PERIOD {
            return Err(ErrorKind::InvalidArgument {
                message: format!(
                    "max staleness must be at least the heartbeat frequency plus {} seconds",
                    IDLE_WRITE_PERIOD.as_secs()
                ),
            }
            .into());
        }

        Ok(())
    }

    fn filter_servers_by_max_staleness(
        &self,
        servers: &mut Vec<&ServerDescription>,
        max_staleness: Duration,
    ) {
        match self.primary() {
            Some(primary) => {
                self.filter_servers_by_max_staleness_with_primary(servers, primary, max_staleness)
            }
            None => self.filter_servers_by_max_staleness_without_primary(servers, max_staleness),
        };
    }

    fn filter_servers_by_max_staleness_with_primary(
        &self,
        servers: &mut Vec<&ServerDescription>,
        primary: &ServerDescription,
        max_staleness: Duration,
    ) {
        let max_staleness_ms: i64 = max_staleness.as_millis().try_into().unwrap_or(i64::MAX);

        servers.retain(|server| {
            let server_staleness = self.calculate_secondary_staleness_with_primary(server, primary);

            server_staleness
                .map(|staleness| staleness <= max_staleness_ms)
                .unwrap_or(false)
        })
    }

    fn filter_servers_by_max_staleness_without_primary(
        &self,
        servers: &mut Vec<&ServerDescription>,
        max_staleness: Duration,
    ) {
        let max_staleness: i64 = max_staleness.as_millis().try_into().unwrap_or(i64::MAX);
        let max_write_date = self
            .servers_with_type(&[ServerType::RsSecondary])
            .filter_map(|server| server.last_write_date().ok().flatten())
            .map(|last_write_date| last_write_date.timestamp_millis())
            .max();

        let secondary_max_write_date = match max_write_date {
            Some(max_write_date) => max_write_date,
            None => return,
        };

        servers.retain(|server| {
            let server_staleness = self
                .calculate_secondary_staleness_without_primary(server, secondary_max_write_date);

            server_staleness
                .map(|staleness| staleness <= max_staleness)
                .unwrap_or(false)
        })
    }

    fn calculate_secondary_staleness_with_primary(
        &self,
        secondary: &ServerDescription,
        primary: &ServerDescription,
    ) -> Option<i64> {
        let primary_last_update = primary.last_update_time?.timestamp_millis();
        let primary_last_write = primary.last_write_date().ok()??.timestamp_millis();

        let secondary_last_update = secondary.last_update_time?.timestamp_millis();
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();

        let heartbeat_frequency = self.heartbeat_frequency_ms();

        let staleness = (secondary_last_update - secondary_last_write)
            - (primary_last_update - primary_last_write)
            + heartbeat_frequency;

        Some(staleness)
    }

    fn calculate_secondary_staleness_without_primary(
        &self,
        secondary: &ServerDescription,
        max_last_write_date: i64,
    ) -> Option<i64> {
        let secondary_last_write = secondary.last_write_date().ok()??.timestamp_millis();
        let heartbeat_frequency = self.heartbeat_frequency_ms();

        let staleness = max_last_write_date - secondary_last_write + heartbeat_frequency;
        Some(staleness)
    }

    fn heartbeat_frequency_ms(&self) -> i64 {
        self.heartbeat_freq
            .unwrap_or(crate::sdam::DEFAULT_HEARTBEAT_FREQUENCY)
            .as_millis()
            .try_into()
            .unwrap_or(i64::MAX)
    }
}

fn filter_servers_by_tag_sets(servers: &mut Vec<&ServerDescription>, tag_sets: &[TagSet]) {
    if tag_sets.is_empty() {
        return;
    }

    // The first tag set matching at least one server determines the
    // surviving set.
    for tag_set in tag_sets {
        let matches_tag_set = |server: &&ServerDescription| server.matches_tag_set(tag_set);

        if servers.iter().any(matches_tag_set) {
            servers.retain(matches_tag_set);

            return;
        }
    }

    servers.clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bson::{doc, DateTime, Document},
        hello::{HelloCommandResponse, HelloReply},
        options::ClientOptions,
        selection_criteria::ReadPreferenceOptions,
    };

    fn tag_set(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn member(
        address: &str,
        kind: &str,
        tags: Option<Document>,
        last_write_millis: i64,
        rtt: Duration,
    ) -> ServerDescription {
        let mut body = doc! {
            "setName": "repl0",
            "hosts": ["east1:27017", "east2:27017", "west1:27017"],
            "minWireVersion": 6,
            "maxWireVersion": 17,
            "logicalSessionTimeoutMinutes": 30,
            "lastWrite": { "lastWriteDate": DateTime::from_millis(last_write_millis) },
        };
        if kind == "primary" {
            body.insert("isWritablePrimary", true);
        } else {
            body.insert("secondary", true);
        }
        if let Some(tags) = tags {
            body.insert("tags", tags);
        }

        let address = ServerAddress::parse(address).unwrap();
        let reply = HelloReply {
            server_address: address.clone(),
            command_response: crate::bson::from_document::<HelloCommandResponse>(body.clone())
                .unwrap(),
            raw_command_response: body,
            cluster_time: None,
        };
        ServerDescription::new_from_hello_reply(address, reply, Some(rtt))
    }

    fn replica_set() -> TopologyDescription {
        let options =
            ClientOptions::parse_without_srv_resolution("mongodb://east1/?replicaSet=repl0")
                .unwrap();
        let mut topology = TopologyDescription::new(&options);

        let now = DateTime::now().timestamp_millis();
        for description in [
            member(
                "east1:27017",
                "primary",
                Some(doc! { "dc": "east", "usage": "production" }),
                now,
                Duration::from_millis(5),
            ),
            member(
                "east2:27017",
                "secondary",
                Some(doc! { "dc": "east", "usage": "reporting" }),
                now,
                Duration::from_millis(5),
            ),
            member(
                "west1:27017",
                "secondary",
                Some(doc! { "dc": "west", "usage": "production" }),
                now,
                Duration::from_millis(5),
            ),
        ] {
            topology.update(description).unwrap();
        }

        topology
    }

    fn addresses(servers: Vec<&ServerDescription>) -> Vec<String> {
        let mut addresses: Vec<_> = servers
            .into_iter()
            .map(|server| server.address.to_string())
            .collect();
        addresses.sort();
        addresses
    }

    #[test]
    fn secondary_with_matching_tag_set() {
        let topology = replica_set();
        let pref = ReadPreference::Secondary {
            options: ReadPreferenceOptions {
                tag_sets: Some(vec![tag_set(&[("dc", "west"), ("usage", "production")])]),
                max_staleness: None,
            },
        };

        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(pref))
            .unwrap();
        assert_eq!(addresses(suitable), vec!["west1:27017"]);
    }

    #[test]
    fn no_candidate_matches_unknown_tags() {
        let topology = replica_set();
        let pref = ReadPreference::Secondary {
            options: ReadPreferenceOptions {
                tag_sets: Some(vec![tag_set(&[("dc", "south"), ("usage", "production")])]),
                max_staleness: None,
            },
        };

        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(pref))
            .unwrap();
        assert!(suitable.is_empty());
    }

    #[test]
    fn first_matching_tag_set_wins() {
        let topology = replica_set();
        let pref = ReadPreference::Secondary {
            options: ReadPreferenceOptions {
                tag_sets: Some(vec![
                    tag_set(&[("dc", "south")]),
                    tag_set(&[("dc", "east")]),
                    tag_set(&[("dc", "west")]),
                ]),
                max_staleness: None,
            },
        };

        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(pref))
            .unwrap();
        // the "east" set matches first, so "west" never applies
        assert_eq!(addresses(suitable), vec!["east2:27017"]);
    }

    #[test]
    fn primary_mode_selects_only_primary() {
        let topology = replica_set();
        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(
                ReadPreference::Primary,
            ))
            .unwrap();
        assert_eq!(addresses(suitable), vec!["east1:27017"]);
    }

    #[test]
    fn nearest_includes_primary_and_secondaries() {
        let topology = replica_set();
        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(
                ReadPreference::Nearest {
                    options: Default::default(),
                },
            ))
            .unwrap();
        assert_eq!(suitable.len(), 3);
    }

    #[test]
    fn latency_window_filters_slow_servers() {
        let options =
            ClientOptions::parse_without_srv_resolution("mongodb://east1/?replicaSet=repl0")
                .unwrap();
        let mut topology = TopologyDescription::new(&options);

        let now = DateTime::now().timestamp_millis();
        topology
            .update(member(
                "east1:27017",
                "primary",
                None,
                now,
                Duration::from_millis(5),
            ))
            .unwrap();
        topology
            .update(member(
                "east2:27017",
                "secondary",
                None,
                now,
                Duration::from_millis(10),
            ))
            .unwrap();
        topology
            .update(member(
                "west1:27017",
                "secondary",
                None,
                now,
                Duration::from_millis(100),
            ))
            .unwrap();

        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(
                ReadPreference::Nearest {
                    options: Default::default(),
                },
            ))
            .unwrap();

        // default local threshold is 15ms beyond the 5ms minimum
        assert_eq!(
            addresses(suitable),
            vec!["east1:27017", "east2:27017"]
        );
    }

    #[test]
    fn max_staleness_validation() {
        let topology = replica_set();
        let too_low = ReadPreference::Secondary {
            options: ReadPreferenceOptions {
                tag_sets: None,
                max_staleness: Some(Duration::from_secs(89)),
            },
        };
        assert!(topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(too_low))
            .is_err());
    }

    #[test]
    fn stale_secondary_filtered_with_primary() {
        let options =
            ClientOptions::parse_without_srv_resolution("mongodb://east1/?replicaSet=repl0")
                .unwrap();
        let mut topology = TopologyDescription::new(&options);

        let now = DateTime::now().timestamp_millis();
        topology
            .update(member(
                "east1:27017",
                "primary",
                None,
                now,
                Duration::from_millis(5),
            ))
            .unwrap();
        // fresh secondary
        topology
            .update(member(
                "east2:27017",
                "secondary",
                None,
                now - 1_000,
                Duration::from_millis(5),
            ))
            .unwrap();
        // lagging far behind the primary
        topology
            .update(member(
                "west1:27017",
                "secondary",
                None,
                now - 600_000,
                Duration::from_millis(5),
            ))
            .unwrap();

        let pref = ReadPreference::Secondary {
            options: ReadPreferenceOptions {
                tag_sets: None,
                max_staleness: Some(Duration::from_secs(120)),
            },
        };
        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(pref))
            .unwrap();
        assert_eq!(addresses(suitable), vec!["east2:27017"]);
    }

    #[test]
    fn writes_have_no_candidates_without_primary() {
        let options = ClientOptions::parse_without_srv_resolution(
            "mongodb://east1,east2/?replicaSet=repl0",
        )
        .unwrap();
        let mut topology = TopologyDescription::new(&options);
        let now = DateTime::now().timestamp_millis();
        topology
            .update(member(
                "east2:27017",
                "secondary",
                None,
                now,
                Duration::from_millis(5),
            ))
            .unwrap();

        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(
                ReadPreference::Primary,
            ))
            .unwrap();
        assert!(suitable.is_empty());
    }

    #[test]
    fn empty_tag_set_matches_every_server() {
        let topology = replica_set();
        let pref = ReadPreference::Secondary {
            options: ReadPreferenceOptions {
                tag_sets: Some(vec![TagSet::new()]),
                max_staleness: None,
            },
        };
        let suitable = topology
            .suitable_servers_in_latency_window(&SelectionCriteria::ReadPreference(pref))
            .unwrap();
        assert_eq!(suitable.len(), 2);
    }
}
