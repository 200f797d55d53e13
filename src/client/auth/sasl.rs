use crate::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Document},
    client::auth::AuthMechanism,
    cmap::{Command, CommandResponse},
    error::{Error, Result},
};

/// Encapsulates the command building of a `saslStart` command.
pub(super) struct SaslStart {
    source: String,
    mechanism: AuthMechanism,
    payload: Vec<u8>,
}

impl SaslStart {
    pub(super) fn new(source: String, mechanism: AuthMechanism, payload: Vec<u8>) -> Self {
        Self {
            source,
            mechanism,
            payload,
        }
    }

    pub(super) fn into_command(self) -> Command {
        let mut body = doc! {
            "saslStart": 1,
            "mechanism": self.mechanism.as_str(),
            "payload": Binary { subtype: BinarySubtype::Generic, bytes: self.payload },
        };
        if matches!(
            self.mechanism,
            AuthMechanism::ScramSha1 | AuthMechanism::ScramSha256
        ) {
            body.insert("options", doc! { "skipEmptyExchange": true });
        }

        Command::new("saslStart", self.source, body)
    }
}

/// Encapsulates the command building of a `saslContinue` command.
pub(super) struct SaslContinue {
    source: String,
    conversation_id: Bson,
    payload: Vec<u8>,
}

impl SaslContinue {
    pub(super) fn new(source: String, conversation_id: Bson, payload: Vec<u8>) -> Self {
        Self {
            source,
            conversation_id,
            payload,
        }
    }

    pub(super) fn into_command(self) -> Command {
        let body = doc! {
            "saslContinue": 1,
            "conversationId": self.conversation_id,
            "payload": Binary { subtype: BinarySubtype::Generic, bytes: self.payload },
        };

        Command::new("saslContinue", self.source, body)
    }
}

/// Validates that a `saslStart` or `saslContinue` command response is
/// successful.
fn validate_command_success(auth_mechanism: &str, response: &Document) -> Result<()> {
    // the nested reply inside `speculativeAuthenticate` has no `ok` field
    let ok = match response.get("ok") {
        Some(ok) => Bson::as_integer(ok)
            .ok_or_else(|| Error::invalid_authentication_response(auth_mechanism))?,
        None => return Ok(()),
    };

    match ok {
        1 => Ok(()),
        0 => {
            let message = response.get_str("errmsg").unwrap_or("authentication failure");
            Err(Error::authentication_error(auth_mechanism, message))
        }
        _ => Err(Error::invalid_authentication_response(auth_mechanism)),
    }
}

/// Encapsulates the parsing of the response to a `saslStart` or
/// `saslContinue` command.
pub(super) struct SaslResponse {
    pub(super) conversation_id: Bson,
    pub(super) done: bool,
    pub(super) payload: Vec<u8>,
}

impl SaslResponse {
    pub(super) fn parse(auth_mechanism: &str, response: CommandResponse) -> Result<Self> {
        Self::parse_doc(auth_mechanism, response.raw)
    }

    /// Parses a SASL reply document, whether received as a command reply or
    /// embedded in a `speculativeAuthenticate` handshake field.
    pub(super) fn parse_doc(auth_mechanism: &str, document: Document) -> Result<Self> {
        validate_command_success(auth_mechanism, &document)?;

        let conversation_id = document
            .get("conversationId")
            .cloned()
            .ok_or_else(|| Error::invalid_authentication_response(auth_mechanism))?;
        let done = document
            .get_bool("done")
            .map_err(|_| Error::invalid_authentication_response(auth_mechanism))?;
        let payload = document
            .get_binary_generic("payload")
            .map_err(|_| Error::invalid_authentication_response(auth_mechanism))?
            .clone();

        Ok(SaslResponse {
            conversation_id,
            done,
            payload,
        })
    }
}
