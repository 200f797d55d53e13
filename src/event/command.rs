//! Contains the events related to command execution.

use std::time::Duration;

use crate::{bson::Document, cmap::ConnectionInfo, error::Error};

/// An event describing the lifecycle of a single command. Bodies of
/// security-sensitive commands (handshakes and authentication) are redacted.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum CommandEvent {
    /// A command was sent to the server.
    Started(CommandStartedEvent),

    /// The server replied to a command with success.
    Succeeded(CommandSucceededEvent),

    /// A command failed, either on the wire or with an `ok: 0` reply.
    Failed(CommandFailedEvent),
}

impl CommandEvent {
    /// The name of the command this event describes.
    pub fn command_name(&self) -> &str {
        match self {
            CommandEvent::Started(event) => event.command_name.as_str(),
            CommandEvent::Succeeded(event) => event.command_name.as_str(),
            CommandEvent::Failed(event) => event.command_name.as_str(),
        }
    }

    /// The driver-generated identifier correlating the started event with
    /// its outcome.
    pub fn request_id(&self) -> i32 {
        match self {
            CommandEvent::Started(event) => event.request_id,
            CommandEvent::Succeeded(event) => event.request_id,
            CommandEvent::Failed(event) => event.request_id,
        }
    }
}

/// An event describing a command being sent.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandStartedEvent {
    /// The command body. Empty for sensitive commands.
    pub command: Document,

    /// The database the command targets.
    pub db: String,

    /// The name of the command.
    pub command_name: String,

    /// The driver-generated identifier for this exchange.
    pub request_id: i32,

    /// Which connection the command was sent on.
    pub connection: ConnectionInfo,
}

/// An event describing a successful reply to a command.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandSucceededEvent {
    /// How long the full exchange took.
    pub duration: Duration,

    /// The reply body. Empty for sensitive commands.
    pub reply: Document,

    /// The name of the command.
    pub command_name: String,

    /// The driver-generated identifier for this exchange.
    pub request_id: i32,

    /// Which connection the command was sent on.
    pub connection: ConnectionInfo,
}

/// An event describing a failed command.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandFailedEvent {
    /// How long the full exchange took.
    pub duration: Duration,

    /// The name of the command.
    pub command_name: String,

    /// The error the command failed with.
    pub failure: Error,

    /// The driver-generated identifier for this exchange.
    pub request_id: i32,

    /// Which connection the command was sent on.
    pub connection: ConnectionInfo,
}

/// A handler invoked with each [`CommandEvent`].
pub type CommandEventHandler = super::EventHandler<CommandEvent>;
