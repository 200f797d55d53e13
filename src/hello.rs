use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    bson::{doc, oid::ObjectId, DateTime, Document},
    client::{options::ServerAddress, ClusterTime},
    cmap::{Command, Connection},
    error::Result,
    sdam::{ServerType, TopologyVersion},
    selection_criteria::TagSet,
};

/// The legacy version of the `hello` command which was deprecated in 5.0.
/// To limit usages of the legacy name in the codebase, this constant should
/// be used wherever possible.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";
pub(crate) const LEGACY_HELLO_COMMAND_NAME_LOWERCASE: &str = "ismaster";

/// Options for the streaming (awaitable) form of the heartbeat hello.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AwaitableHelloOptions {
    pub(crate) topology_version: TopologyVersion,
    pub(crate) max_await_time: Duration,
}

/// Construct a hello or legacy hello command, depending on the circumstances.
///
/// If the server indicated `helloOk: true`, then `hello` will be used.
/// Otherwise, legacy hello will be used, and if it's unknown whether the
/// server supports hello, the command also will contain `helloOk: true`.
pub(crate) fn hello_command(
    hello_ok: Option<bool>,
    awaitable_options: Option<AwaitableHelloOptions>,
) -> Command {
    let (mut body, command_name) = if matches!(hello_ok, Some(true)) {
        (doc! { "hello": 1 }, "hello")
    } else {
        let mut body = doc! { LEGACY_HELLO_COMMAND_NAME: 1 };
        if hello_ok.is_none() {
            body.insert("helloOk", true);
        }
        (body, LEGACY_HELLO_COMMAND_NAME)
    };

    if let Some(options) = awaitable_options {
        body.insert("topologyVersion", options.topology_version);
        body.insert(
            "maxAwaitTimeMS",
            i64::try_from(options.max_await_time.as_millis()).unwrap_or(i64::MAX),
        );
    }

    let mut command = Command::new(command_name, "admin", body);
    command.exhaust_allowed = awaitable_options.is_some();
    command
}

/// Execute a hello or legacy hello command.
pub(crate) async fn run_hello(conn: &mut Connection, command: Command) -> Result<HelloReply> {
    let response = conn.send_command(command, None).await?;
    response.into_hello_reply()
}

#[derive(Debug, Clone)]
pub(crate) struct HelloReply {
    pub(crate) server_address: ServerAddress,
    pub(crate) command_response: HelloCommandResponse,
    pub(crate) raw_command_response: Document,
    pub(crate) cluster_time: Option<ClusterTime>,
}

/// The response to a `hello` command.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/reference/command/hello/) for more details.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    /// Whether the server is writable. If true, this instance is a primary in
    /// a replica set, a mongos instance, or a standalone mongod.
    pub is_writable_primary: Option<bool>,

    /// Legacy name for the `is_writable_primary` field.
    #[serde(rename = "ismaster")]
    pub is_master: Option<bool>,

    /// Whether or not the server supports using the `hello` command for
    /// monitoring instead of the legacy hello command.
    pub hello_ok: Option<bool>,

    /// The list of all hosts.
    pub hosts: Option<Vec<String>>,

    /// The list of all passives in a replica set.
    pub passives: Option<Vec<String>>,

    /// The list of all arbiters in a replica set.
    pub arbiters: Option<Vec<String>>,

    /// An optional message. This contains the value "isdbgrid" when returned
    /// from a mongos.
    pub msg: Option<String>,

    /// The address of the server that returned this response.
    pub me: Option<String>,

    /// The list of compatible compressors that the server returned.
    #[serde(rename = "compression")]
    pub compressors: Option<Vec<String>>,

    /// The current replica set config version.
    pub set_version: Option<i32>,

    /// The name of the current replica set.
    pub set_name: Option<String>,

    /// Whether the server is hidden.
    pub hidden: Option<bool>,

    /// Whether the server is a secondary.
    pub secondary: Option<bool>,

    /// Whether the server is an arbiter.
    pub arbiter_only: Option<bool>,

    /// Whether the server is a member of an uninitialized replica set.
    #[serde(rename = "isreplicaset")]
    pub is_replica_set: Option<bool>,

    /// The time in minutes that a session remains active after its most
    /// recent use.
    pub logical_session_timeout_minutes: Option<i64>,

    /// Optime and date information for the server's most recent write
    /// operation.
    pub last_write: Option<LastWrite>,

    /// The minimum wire version that the server supports.
    pub min_wire_version: Option<i32>,

    /// The maximum wire version that the server supports.
    pub max_wire_version: Option<i32>,

    /// User-defined tags for a replica set member.
    pub tags: Option<TagSet>,

    /// A unique identifier for each election.
    pub election_id: Option<ObjectId>,

    /// The address of current primary member of the replica set.
    pub primary: Option<String>,

    /// A list of SASL mechanisms used to create the user's credential(s).
    pub sasl_supported_mechs: Option<Vec<String>>,

    /// The reply to speculative authentication done in the authentication
    /// handshake.
    pub speculative_authenticate: Option<Document>,

    /// The maximum permitted size of a BSON object in bytes.
    pub max_bson_object_size: Option<i32>,

    /// The maximum permitted size of a BSON wire protocol message.
    pub max_message_size_bytes: Option<i32>,

    /// The maximum number of write operations permitted in a write batch.
    pub max_write_batch_size: Option<i64>,

    /// For internal use.
    pub topology_version: Option<TopologyVersion>,

    /// The server-generated ID for the connection the "hello" command was run
    /// on. Present on server versions 4.2+.
    pub connection_id: Option<i64>,
}

impl HelloCommandResponse {
    pub(crate) fn server_type(&self) -> ServerType {
        if self.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if self.set_name.is_some() {
            if self.hidden == Some(true) {
                ServerType::RsOther
            } else if self.is_writable_primary == Some(true) || self.is_master == Some(true) {
                ServerType::RsPrimary
            } else if self.secondary == Some(true) {
                ServerType::RsSecondary
            } else if self.arbiter_only == Some(true) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else if self.is_replica_set == Some(true) {
            ServerType::RsGhost
        } else {
            ServerType::Standalone
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LastWrite {
    pub last_write_date: DateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::from_document;

    #[test]
    fn server_type_inference() {
        let mongos: HelloCommandResponse =
            from_document(doc! { "msg": "isdbgrid", "maxWireVersion": 17 }).unwrap();
        assert_eq!(mongos.server_type(), ServerType::Mongos);

        let primary: HelloCommandResponse = from_document(doc! {
            "setName": "repl0",
            "isWritablePrimary": true,
            "maxWireVersion": 17,
        })
        .unwrap();
        assert_eq!(primary.server_type(), ServerType::RsPrimary);

        let secondary: HelloCommandResponse = from_document(doc! {
            "setName": "repl0",
            "secondary": true,
        })
        .unwrap();
        assert_eq!(secondary.server_type(), ServerType::RsSecondary);

        let hidden: HelloCommandResponse = from_document(doc! {
            "setName": "repl0",
            "secondary": true,
            "hidden": true,
        })
        .unwrap();
        assert_eq!(hidden.server_type(), ServerType::RsOther);

        let standalone: HelloCommandResponse =
            from_document(doc! { "isWritablePrimary": true }).unwrap();
        assert_eq!(standalone.server_type(), ServerType::Standalone);

        let ghost: HelloCommandResponse =
            from_document(doc! { "isreplicaset": true }).unwrap();
        assert_eq!(ghost.server_type(), ServerType::RsGhost);
    }

    #[test]
    fn awaitable_options_are_set() {
        let command = hello_command(
            Some(true),
            Some(AwaitableHelloOptions {
                topology_version: TopologyVersion {
                    process_id: ObjectId::new(),
                    counter: 3,
                },
                max_await_time: Duration::from_secs(10),
            }),
        );
        assert_eq!(command.name, "hello");
        assert!(command.exhaust_allowed);
        assert_eq!(command.body.get_i64("maxAwaitTimeMS"), Ok(10_000));
        assert!(command.body.contains_key("topologyVersion"));
    }

    #[test]
    fn legacy_hello_used_when_support_unknown() {
        let command = hello_command(None, None);
        assert_eq!(command.name, LEGACY_HELLO_COMMAND_NAME);
        assert_eq!(command.body.get_bool("helloOk"), Ok(true));
    }
}
