use std::time::Duration;

use crate::{hello::HelloReply, sdam::ServerType};

/// The default maximum size of a BSON document, used until a handshake
/// advertises otherwise.
pub(crate) const DEFAULT_MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;
/// The default maximum size of a wire message.
pub(crate) const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48_000_000;
/// The default maximum number of writes in a single batch.
pub(crate) const DEFAULT_MAX_WRITE_BATCH_SIZE: i64 = 100_000;

/// Information about the server as reported by the handshake on a connection.
#[derive(Debug, Clone)]
pub(crate) struct StreamDescription {
    /// The type of the server when the handshake occurred.
    pub(crate) initial_server_type: ServerType,

    /// The maximum wire version that the server understands.
    pub(crate) max_wire_version: Option<i32>,

    /// The minimum wire version that the server understands.
    pub(crate) min_wire_version: Option<i32>,

    /// The supported authentication mechanisms for the user in the handshake,
    /// if any were requested.
    pub(crate) sasl_supported_mechs: Option<Vec<String>>,

    /// How long sessions started on this server will stay alive without
    /// being used.
    pub(crate) logical_session_timeout: Option<Duration>,

    /// The maximum size of a BSON document the server accepts.
    pub(crate) max_bson_object_size: i32,

    /// The maximum size of a wire message the server accepts.
    pub(crate) max_message_size_bytes: i32,

    /// The maximum number of writes the server accepts in one batch.
    pub(crate) max_write_batch_size: i64,

    /// Whether the server supports the `hello` command.
    pub(crate) hello_ok: bool,
}

impl Default for StreamDescription {
    fn default() -> Self {
        Self {
            initial_server_type: ServerType::Unknown,
            max_wire_version: None,
            min_wire_version: None,
            sasl_supported_mechs: None,
            logical_session_timeout: None,
            max_bson_object_size: DEFAULT_MAX_BSON_OBJECT_SIZE,
            max_message_size_bytes: DEFAULT_MAX_MESSAGE_SIZE_BYTES,
            max_write_batch_size: DEFAULT_MAX_WRITE_BATCH_SIZE,
            hello_ok: false,
        }
    }
}

impl StreamDescription {
    /// Constructs a new StreamDescription from a `HelloReply`.
    pub(crate) fn from_hello_reply(reply: &HelloReply) -> Self {
        let response = &reply.command_response;
        Self {
            initial_server_type: response.server_type(),
            max_wire_version: response.max_wire_version,
            min_wire_version: response.min_wire_version,
            sasl_supported_mechs: response.sasl_supported_mechs.clone(),
            logical_session_timeout: response
                .logical_session_timeout_minutes
                .map(|minutes| Duration::from_secs(minutes as u64 * 60)),
            max_bson_object_size: response
                .max_bson_object_size
                .unwrap_or(DEFAULT_MAX_BSON_OBJECT_SIZE),
            max_message_size_bytes: response
                .max_message_size_bytes
                .unwrap_or(DEFAULT_MAX_MESSAGE_SIZE_BYTES),
            max_write_batch_size: response
                .max_write_batch_size
                .unwrap_or(DEFAULT_MAX_WRITE_BATCH_SIZE),
            hello_ok: response.hello_ok.unwrap_or(false),
        }
    }

    /// Whether this server supports sessions.
    pub(crate) fn supports_sessions(&self) -> bool {
        self.logical_session_timeout.is_some()
    }

    /// Whether this server supports retryable writes.
    pub(crate) fn supports_retryable_writes(&self) -> bool {
        self.initial_server_type != ServerType::Standalone
            && self.logical_session_timeout.is_some()
            && self.max_wire_version.map_or(false, |version| version >= 6)
    }
}
