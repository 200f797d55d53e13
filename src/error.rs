//! Contains the `Error` and `Result` types that `mongolite` uses.

use std::{
    collections::HashSet,
    fmt,
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

use crate::{bson::Document, options::ServerAddress, sdam::TopologyVersion};

const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NOT_WRITABLE_PRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const SHUTTING_DOWN_CODES: [i32; 2] = [11600, 91];
const RETRYABLE_READ_CODES: [i32; 13] = [
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 134, 262,
];
const RETRYABLE_WRITE_CODES: [i32; 12] = [
    11600, 11602, 10107, 13435, 13436, 189, 91, 7, 6, 89, 9001, 262,
];
const UNKNOWN_TRANSACTION_COMMIT_RESULT_LABEL_CODES: [i32; 3] = [50, 64, 91];
const RESUMABLE_CHANGE_STREAM_CODES: [i32; 17] = [
    6, 7, 89, 91, 189, 262, 9001, 10107, 11600, 11602, 13435, 13436, 63, 150, 13388, 234, 133,
];

/// Retryable write error label. This label will be added to an error when the
/// error is write-retryable.
pub const RETRYABLE_WRITE_ERROR: &str = "RetryableWriteError";
/// Transient transaction error label. This label will be added to a network
/// error or server selection error that occurs during a transaction.
pub const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";
/// Unknown transaction commit result error label. This label will be added to
/// a server selection error, network error, write-retryable error,
/// MaxTimeMSExpired error, or write concern failed/timeout encountered during
/// a commitTransaction.
pub const UNKNOWN_TRANSACTION_COMMIT_RESULT: &str = "UnknownTransactionCommitResult";
/// Resumable change stream error label. A change stream receiving an error
/// with this label transparently resumes from its latest resume token.
pub const RESUMABLE_CHANGE_STREAM_ERROR: &str = "ResumableChangeStreamError";

/// The result type for all methods that can return an error in the
/// `mongolite` crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in the `mongolite` crate. The inner [`ErrorKind`]
/// is wrapped in a `Box` to allow the errors to be cloned and passed across
/// task boundaries cheaply.
#[derive(Clone, Debug, ThisError)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,
    labels: HashSet<String>,
    pub(crate) wire_version: Option<i32>,
    #[source]
    pub(crate) source: Option<Box<Error>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        Self {
            kind: Box::new(kind),
            labels,
            wire_version: None,
            source: None,
        }
    }

    pub(crate) fn pool_cleared_error(address: &ServerAddress, cause: &Error) -> Self {
        ErrorKind::ConnectionPoolCleared {
            message: format!(
                "Connection pool for {} cleared because another operation failed with: {}",
                address, cause
            ),
        }
        .into()
    }

    /// Creates an authentication error for the given mechanism with the
    /// provided reason.
    pub(crate) fn authentication_error(mechanism_name: &str, reason: &str) -> Self {
        ErrorKind::Authentication {
            message: format!("{} failure: {}", mechanism_name, reason),
        }
        .into()
    }

    /// Creates an authentication error for the given mechanism with a generic
    /// "unknown" message.
    pub(crate) fn unknown_authentication_error(mechanism_name: &str) -> Error {
        Error::authentication_error(mechanism_name, "internal error")
    }

    /// Creates an authentication error for the given mechanism when the
    /// server response is invalid.
    pub(crate) fn invalid_authentication_response(mechanism_name: &str) -> Error {
        Error::authentication_error(mechanism_name, "invalid server response")
    }

    pub(crate) fn internal(message: impl Into<String>) -> Error {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    /// Construct a generic network timeout error.
    pub(crate) fn network_timeout() -> Error {
        ErrorKind::Io(Arc::new(std::io::ErrorKind::TimedOut.into())).into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Error {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn with_source<E: Into<Option<Error>>>(mut self, source: E) -> Self {
        self.source = source.into().map(Box::new);
        self
    }

    /// Whether this error is a network-level (I/O or pool-cleared) error.
    pub(crate) fn is_network_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Io(..) | ErrorKind::ConnectionPoolCleared { .. }
        )
    }

    pub(crate) fn is_network_timeout(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::TimedOut)
    }

    pub(crate) fn is_auth_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Authentication { .. })
    }

    pub(crate) fn is_command_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::Command(_))
    }

    pub(crate) fn is_server_selection_error(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ServerSelection { .. })
    }

    pub(crate) fn is_pool_cleared(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::ConnectionPoolCleared { .. })
    }

    pub(crate) fn is_incompatible_server(&self) -> bool {
        matches!(self.kind.as_ref(), ErrorKind::IncompatibleServer { .. })
    }

    /// Whether an error originated from the server.
    pub(crate) fn is_server_error(&self) -> bool {
        matches!(
            self.kind.as_ref(),
            ErrorKind::Authentication { .. } | ErrorKind::Command(_) | ErrorKind::Write(_)
        )
    }

    /// Gets the code from this error for performing topology updates, if
    /// applicable. Write concern error codes are checked; writeError codes
    /// are not.
    pub(crate) fn sdam_code(&self) -> Option<i32> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(wc_error)) => Some(wc_error.code),
            _ => None,
        }
        .or_else(|| self.source.as_ref().and_then(|s| s.sdam_code()))
    }

    fn sdam_message(&self) -> Option<&str> {
        match self.kind.as_ref() {
            ErrorKind::Command(command_error) => Some(command_error.message.as_str()),
            _ => None,
        }
    }

    /// If this error corresponds to a "not writable primary" error as per the
    /// SDAM spec.
    pub(crate) fn is_not_writable_primary(&self) -> bool {
        match self.sdam_code() {
            Some(code) => NOT_WRITABLE_PRIMARY_CODES.contains(&code),
            // pre-4.2 servers only report these conditions in the message
            None => self
                .sdam_message()
                .map(|m| m.contains("not master") || m.contains("not primary"))
                .unwrap_or(false),
        }
    }

    /// If this error corresponds to a "node is recovering" error as per the
    /// SDAM spec.
    pub(crate) fn is_recovering(&self) -> bool {
        self.sdam_code()
            .map(|code| RECOVERING_CODES.contains(&code))
            .unwrap_or(false)
    }

    /// If this error corresponds to a "node is shutting down" error as per
    /// the SDAM spec.
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.sdam_code()
            .map(|code| SHUTTING_DOWN_CODES.contains(&code))
            .unwrap_or(false)
    }

    pub(crate) fn is_state_change_error(&self) -> bool {
        self.is_recovering() || self.is_not_writable_primary()
    }

    /// Whether this is a MaxTimeMSExpired server error, which commit retry
    /// loops must not spin on.
    pub(crate) fn is_max_time_ms_expired_error(&self) -> bool {
        self.sdam_code() == Some(50)
    }

    /// Whether a read operation should be retried if this error occurs.
    pub(crate) fn is_read_retryable(&self) -> bool {
        if self.is_network_error() {
            return true;
        }
        if self.contains_label(RETRYABLE_WRITE_ERROR)
            || self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR)
        {
            return true;
        }
        match self.sdam_code() {
            Some(code) => RETRYABLE_READ_CODES.contains(&code),
            None => false,
        }
    }

    pub(crate) fn is_write_retryable(&self) -> bool {
        self.contains_label(RETRYABLE_WRITE_ERROR)
    }

    /// Whether a "RetryableWriteError" label should be added to this error.
    /// On 4.4+ servers (wire version > 8) the label is only added to network
    /// errors, since the server applies it itself otherwise. On older servers
    /// the label is added for network errors and the retryable code set.
    pub(crate) fn should_add_retryable_write_label(&self, max_wire_version: i32) -> bool {
        if max_wire_version > 8 {
            return self.is_network_error();
        }
        if self.is_network_error() {
            return true;
        }
        match self.sdam_code() {
            Some(code) => RETRYABLE_WRITE_CODES.contains(&code),
            None => false,
        }
    }

    pub(crate) fn should_add_unknown_transaction_commit_result_label(&self) -> bool {
        if self.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            return false;
        }
        if self.is_network_error() || self.is_server_selection_error() || self.is_write_retryable()
        {
            return true;
        }
        match self.sdam_code() {
            Some(code) => UNKNOWN_TRANSACTION_COMMIT_RESULT_LABEL_CODES.contains(&code),
            None => false,
        }
    }

    /// If this error is resumable as per the change streams spec.
    pub(crate) fn is_resumable(&self) -> bool {
        if !self.is_server_error() {
            return true;
        }
        let code = self.sdam_code();
        // CursorNotFound is always resumable
        if code == Some(43) {
            return true;
        }
        if matches!(self.wire_version, Some(v) if v >= 9)
            && self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR)
        {
            return true;
        }
        if let (Some(code), true) = (code, matches!(self.wire_version, Some(v) if v < 9)) {
            return RESUMABLE_CHANGE_STREAM_CODES.contains(&code);
        }
        false
    }

    pub(crate) fn topology_version(&self) -> Option<TopologyVersion> {
        match self.kind.as_ref() {
            ErrorKind::Command(c) => c.topology_version,
            _ => None,
        }
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        self.labels.contains(label.as_ref())
    }

    /// Adds the given label to this error.
    pub(crate) fn add_label<T: AsRef<str>>(&mut self, label: T) {
        self.labels.insert(label.as_ref().to_string());
    }

    /// For sensitive commands, everything besides the error labels, code, and
    /// code name must be scrubbed from errors before they are surfaced
    /// through command monitoring.
    pub(crate) fn redact(&mut self) {
        match *self.kind {
            ErrorKind::Command(ref mut command_error) => command_error.redact(),
            ErrorKind::Write(ref mut write_failure) => match write_failure {
                WriteFailure::WriteConcernError(wce) => wce.redact(),
                WriteFailure::WriteError(we) => we.redact(),
            },
            _ => {}
        }
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<crate::bson::DeError> for ErrorKind {
    fn from(err: crate::bson::DeError) -> Self {
        Self::InvalidResponse {
            message: err.to_string(),
        }
    }
}

impl From<crate::bson::SerError> for ErrorKind {
    fn from(err: crate::bson::SerError) -> Self {
        Self::InvalidArgument {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<std::io::ErrorKind> for ErrorKind {
    fn from(err: std::io::ErrorKind) -> Self {
        Self::Io(Arc::new(err.into()))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, ThisError)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// An error occurred while the client attempted to authenticate a
    /// connection.
    #[error("{message}")]
    #[non_exhaustive]
    Authentication { message: String },

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// An error occurred during DNS resolution.
    #[error("An error occurred during DNS resolution: {message}")]
    #[non_exhaustive]
    DnsResolve { message: String },

    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// Wrapper around [`std::io::Error`].
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The connection pool for a server was cleared during operation
    /// execution due to a concurrent error, causing the operation to fail.
    #[error("{message}")]
    #[non_exhaustive]
    ConnectionPoolCleared { message: String },

    /// The wait queue for a connection checkout timed out before a
    /// connection became available.
    #[error("Timed out while checking out a connection from connection pool for {address}")]
    #[non_exhaustive]
    WaitQueueTimeout { address: ServerAddress },

    /// The server returned an invalid reply to a database operation.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// The client was not able to select a server for the operation.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// The client does not support sessions.
    #[error("Attempted to start a session on a deployment that does not support sessions")]
    SessionsNotSupported,

    #[error("{message}")]
    #[non_exhaustive]
    InvalidTlsConfig { message: String },

    /// An error occurred when trying to execute a write operation.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    Write(WriteFailure),

    /// An error occurred during a transaction.
    #[error("{message}")]
    #[non_exhaustive]
    Transaction { message: String },

    /// The server does not support the operation.
    #[error("The server does not support a database operation: {message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },

    /// A command document or wire message exceeded the server's advertised
    /// size limit.
    #[error("{message}")]
    #[non_exhaustive]
    DocumentTooLarge { message: String },

    /// No resume token was present in a change stream document.
    #[error("Cannot provide resume functionality when the resume token is missing")]
    MissingResumeToken,

    /// A method was called on a client that was shut down.
    #[error("Client has been shut down")]
    Shutdown,
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// The topology version reported by the server in the error response.
    #[serde(rename = "topologyVersion")]
    pub(crate) topology_version: Option<TopologyVersion>,
}

impl CommandError {
    fn redact(&mut self) {
        self.message = "REDACTED".to_string();
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(
            fmt,
            "Error code {} ({}): {}",
            self.code, self.code_name, self.message
        )
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// A document identifying the write concern setting related to the error.
    #[serde(rename = "errInfo", default)]
    pub details: Option<Document>,
}

impl WriteConcernError {
    fn redact(&mut self) {
        self.message = "REDACTED".to_string();
        self.details = None;
    }
}

/// An error that occurred during a write operation that wasn't due to being
/// unable to satisfy a write concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct WriteError {
    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    ///
    /// Note that the server will not return this in some cases, hence
    /// `code_name` being an `Option`.
    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// The index of the write request that failed within its batch.
    #[serde(default)]
    pub index: usize,

    /// A document providing more information about the write error.
    #[serde(rename = "errInfo", default)]
    pub details: Option<Document>,
}

impl WriteError {
    fn redact(&mut self) {
        self.message = "REDACTED".to_string();
        self.details = None;
    }
}

/// An error that occurred when trying to execute a write operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteFailure {
    /// An error that occurred due to not being able to satisfy a write
    /// concern.
    WriteConcernError(WriteConcernError),

    /// An error that occurred during a write operation that wasn't due to
    /// being unable to satisfy a write concern.
    WriteError(WriteError),
}

impl WriteFailure {
    /// The error code reported by the server.
    pub fn code(&self) -> i32 {
        match self {
            WriteFailure::WriteConcernError(e) => e.code,
            WriteFailure::WriteError(e) => e.code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_error(code: i32) -> Error {
        ErrorKind::Command(CommandError {
            code,
            code_name: String::new(),
            message: String::new(),
            topology_version: None,
        })
        .into()
    }

    #[test]
    fn state_change_classification() {
        assert!(command_error(10107).is_not_writable_primary());
        assert!(command_error(13435).is_not_writable_primary());
        assert!(command_error(11600).is_recovering());
        assert!(command_error(11600).is_shutting_down());
        assert!(command_error(189).is_recovering());
        assert!(!command_error(1).is_state_change_error());
    }

    #[test]
    fn not_master_message_fallback() {
        let err: Error = ErrorKind::Command(CommandError {
            code: 0,
            code_name: String::new(),
            message: "node is not master".to_string(),
            topology_version: None,
        })
        .into();
        assert!(err.is_not_writable_primary());
    }

    #[test]
    fn read_retryability() {
        // HostUnreachable
        assert!(command_error(6).is_read_retryable());
        // NetworkTimeout
        assert!(command_error(89).is_read_retryable());
        // ReadConcernMajorityNotAvailableYet
        assert!(command_error(134).is_read_retryable());
        assert!(!command_error(26).is_read_retryable());
        let network: Error = ErrorKind::Io(Arc::new(std::io::ErrorKind::BrokenPipe.into())).into();
        assert!(network.is_read_retryable());
    }

    #[test]
    fn retryable_write_label_rules() {
        let network: Error = ErrorKind::Io(Arc::new(std::io::ErrorKind::BrokenPipe.into())).into();
        assert!(network.should_add_retryable_write_label(9));
        assert!(network.should_add_retryable_write_label(8));

        // on 4.4+ the server applies the label itself for command errors
        assert!(!command_error(6).should_add_retryable_write_label(9));
        assert!(command_error(6).should_add_retryable_write_label(8));
        assert!(!command_error(26).should_add_retryable_write_label(8));
    }

    #[test]
    fn unknown_commit_label_rules() {
        let mut transient = command_error(6);
        transient.add_label(TRANSIENT_TRANSACTION_ERROR);
        assert!(!transient.should_add_unknown_transaction_commit_result_label());

        // MaxTimeMSExpired
        assert!(command_error(50).should_add_unknown_transaction_commit_result_label());
        let network: Error = ErrorKind::Io(Arc::new(std::io::ErrorKind::BrokenPipe.into())).into();
        assert!(network.should_add_unknown_transaction_commit_result_label());
        assert!(!command_error(26).should_add_unknown_transaction_commit_result_label());
    }

    #[test]
    fn resumability() {
        let network: Error = ErrorKind::Io(Arc::new(std::io::ErrorKind::BrokenPipe.into())).into();
        assert!(network.is_resumable());

        let mut labeled = command_error(89);
        labeled.wire_version = Some(9);
        labeled.add_label(RESUMABLE_CHANGE_STREAM_ERROR);
        assert!(labeled.is_resumable());

        let mut unlabeled = command_error(89);
        unlabeled.wire_version = Some(9);
        assert!(!unlabeled.is_resumable());

        // pre-4.4 servers fall back to the allow-listed code set
        let mut old_wire = command_error(89);
        old_wire.wire_version = Some(8);
        assert!(old_wire.is_resumable());
    }
}
