use std::{collections::HashSet, sync::LazyLock};

use serde::de::DeserializeOwned;

use crate::{
    bson::{doc, from_document, Bson, Document, Timestamp},
    client::{options::ServerAddress, session::ClusterTime},
    error::{CommandError, Error, ErrorKind, Result},
    hello::{HelloReply, LEGACY_HELLO_COMMAND_NAME_LOWERCASE},
    selection_criteria::ReadPreference,
    ClientSession,
};

/// Commands whose bodies and replies must never appear in monitoring output
/// or error messages.
pub(crate) static REDACTED_COMMANDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    HashSet::from([
        "authenticate",
        "saslstart",
        "saslcontinue",
        "getnonce",
        "createuser",
        "updateuser",
        "copydbgetnonce",
        "copydbsaslstart",
        "copydb",
    ])
});

pub(crate) static HELLO_COMMAND_NAMES: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| HashSet::from(["hello", LEGACY_HELLO_COMMAND_NAME_LOWERCASE]));

/// Driver-side model of a database command: everything needed to serialize a
/// wire message for it.
#[derive(Clone, Debug)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) target_db: String,
    pub(crate) body: Document,
    /// Out-of-band document arrays carried as payload type 1 sections.
    pub(crate) document_sequences: Vec<(String, Vec<Document>)>,
    pub(crate) exhaust_allowed: bool,
}

impl Command {
    /// Constructs a new command.
    pub(crate) fn new(name: impl ToString, target_db: impl ToString, body: Document) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            body,
            document_sequences: Vec::new(),
            exhaust_allowed: false,
        }
    }

    /// Carry the given documents in a payload type 1 section under
    /// `identifier`, keeping large write batches out of the command body.
    pub(crate) fn add_document_sequence(
        &mut self,
        identifier: impl ToString,
        documents: Vec<Document>,
    ) {
        self.document_sequences
            .push((identifier.to_string(), documents));
    }

    pub(crate) fn set_session(&mut self, session: &ClientSession) {
        self.body.insert("lsid", session.id().clone());
    }

    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) {
        self.body.insert("$clusterTime", cluster_time.to_document());
    }

    pub(crate) fn set_txn_number(&mut self, txn_number: i64) {
        self.body.insert("txnNumber", txn_number);
    }

    pub(crate) fn set_start_transaction(&mut self) {
        self.body.insert("startTransaction", true);
    }

    pub(crate) fn set_autocommit(&mut self) {
        self.body.insert("autocommit", false);
    }

    pub(crate) fn set_read_concern_level(&mut self, level: crate::concern::ReadConcernLevel) {
        self.body
            .insert("readConcern", doc! { "level": level.as_str() });
    }

    /// Sets `readConcern.afterClusterTime` to the session's operation time,
    /// merging with any read concern level already present.
    pub(crate) fn set_after_cluster_time(&mut self, session: &ClientSession) {
        if let Some(operation_time) = session.operation_time() {
            let mut read_concern = match self.body.get_document("readConcern") {
                Ok(doc) => doc.clone(),
                Err(_) => doc! {},
            };
            read_concern.insert("afterClusterTime", operation_time);
            self.body.insert("readConcern", read_concern);
        }
    }

    pub(crate) fn set_read_preference(&mut self, read_preference: &ReadPreference) {
        self.body
            .insert("$readPreference", read_preference.to_document());
    }

    pub(crate) fn set_recovery_token(&mut self, recovery_token: &Document) {
        self.body.insert("recoveryToken", recovery_token.clone());
    }

    pub(crate) fn should_redact(&self) -> bool {
        let name = self.name.to_lowercase();
        REDACTED_COMMANDS.contains(name.as_str())
            || (HELLO_COMMAND_NAMES.contains(name.as_str())
                && self.body.contains_key("speculativeAuthenticate"))
    }

    /// Handshake and auth commands are never compressed.
    pub(crate) fn should_compress(&self) -> bool {
        let name = self.name.to_lowercase();
        !REDACTED_COMMANDS.contains(name.as_str()) && !HELLO_COMMAND_NAMES.contains(name.as_str())
    }
}

/// A reply to a command, decoded to a document but not yet interpreted.
#[derive(Clone, Debug)]
pub(crate) struct CommandResponse {
    pub(crate) source: ServerAddress,
    pub(crate) raw: Document,
}

impl CommandResponse {
    /// Whether the command succeeeded or not (i.e. if this response is
    /// `ok: 1`).
    pub(crate) fn is_success(&self) -> bool {
        self.raw
            .get("ok")
            .and_then(Bson::as_integer)
            .map(|ok| ok == 1)
            .unwrap_or(false)
    }

    /// Deserialize the body of this response.
    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        from_document(self.raw.clone()).map_err(|e| {
            Error::from(ErrorKind::InvalidResponse {
                message: e.to_string(),
            })
        })
    }

    /// Deserialize the body of this response, returning an authentication
    /// error if it fails.
    pub(crate) fn auth_response_body<T: DeserializeOwned>(
        &self,
        mechanism_name: &str,
    ) -> Result<T> {
        self.body()
            .map_err(|_| Error::invalid_authentication_response(mechanism_name))
    }

    /// The `$clusterTime` gossiped by the server, if any.
    pub(crate) fn cluster_time(&self) -> Option<ClusterTime> {
        self.raw
            .get_document("$clusterTime")
            .ok()
            .and_then(|doc| from_document(doc.clone()).ok())
    }

    /// The `operationTime` reported by the server, if any.
    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        self.raw.get_timestamp("operationTime").ok()
    }

    /// The `recoveryToken` for a sharded transaction, if any.
    pub(crate) fn recovery_token(&self) -> Option<Document> {
        self.raw.get_document("recoveryToken").ok().cloned()
    }

    /// Convert an `ok: 0` reply into the error it describes. Returns `Ok` if
    /// the reply indicates success.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }

        let command_error: CommandError = self.body().map_err(|e| {
            Error::from(ErrorKind::InvalidResponse {
                message: format!("error deserializing command error: {}", e),
            })
        })?;
        let labels: Option<Vec<String>> = self
            .raw
            .get_array("errorLabels")
            .ok()
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|label| label.as_str().map(str::to_string))
                    .collect()
            });

        Err(Error::new(ErrorKind::Command(command_error), labels))
    }

    pub(crate) fn into_hello_reply(self) -> Result<HelloReply> {
        self.validate()?;
        let command_response = self.body()?;
        Ok(HelloReply {
            server_address: self.source.clone(),
            command_response,
            cluster_time: self.cluster_time(),
            raw_command_response: self.raw,
        })
    }

    /// The address of the server that sent this response.
    pub(crate) fn source_address(&self) -> &ServerAddress {
        &self.source
    }
}
