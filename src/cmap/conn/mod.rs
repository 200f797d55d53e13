pub(crate) mod command;
pub(crate) mod stream_description;
pub(crate) mod wire;

use std::{
    sync::Weak,
    time::{Duration, Instant},
};

use tokio::sync::OwnedSemaphorePermit;

use self::wire::{next_request_id, Message, MessageFlags};
use super::PoolInner;
use crate::{
    compression::Compressor,
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    runtime::{self, AsyncStream},
};
pub(crate) use command::{Command, CommandResponse};
pub(crate) use stream_description::StreamDescription;

/// User-facing information about a connection to the database.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ConnectionInfo {
    /// A driver-generated identifier that uniquely identifies the connection
    /// within its pool.
    pub id: u32,

    /// The address that the connection is connected to.
    pub address: ServerAddress,
}

/// A wrapper around an `AsyncStream` carrying the state needed to run
/// commands on it and to maintain it within a pool.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(super) id: u32,
    pub(crate) address: ServerAddress,
    pub(super) generation: u32,

    stream: AsyncStream,

    /// The cached StreamDescription from the connection's handshake.
    pub(crate) stream_description: Option<StreamDescription>,

    /// The compressor negotiated during the handshake, if any.
    pub(crate) compressor: Option<Compressor>,

    /// Whether the connection suffered an error that makes it unusable.
    error: bool,

    /// Whether the most recent reply had moreToCome set, meaning another
    /// reply can be read without sending a request.
    more_to_come: bool,

    /// Marks the time when the connection was last checked into the pool.
    /// Used to detect if the connection is idle.
    ready_and_available_time: Option<Instant>,

    /// While checked out, the pool the connection must be returned to along
    /// with the wait-queue permit occupied by this checkout.
    pub(super) pool: Option<Weak<PoolInner>>,
    pub(super) permit: Option<OwnedSemaphorePermit>,
}

impl Connection {
    pub(crate) fn new(
        id: u32,
        address: ServerAddress,
        generation: u32,
        stream: AsyncStream,
    ) -> Self {
        Self {
            id,
            address,
            generation,
            stream,
            stream_description: None,
            compressor: None,
            error: false,
            more_to_come: false,
            ready_and_available_time: None,
            pool: None,
            permit: None,
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            address: self.address.clone(),
        }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// The pool generation this connection was created under.
    pub(crate) fn generation(&self) -> u32 {
        self.generation
    }

    /// Gets the connection's StreamDescription.
    pub(crate) fn stream_description(&self) -> Result<&StreamDescription> {
        self.stream_description.as_ref().ok_or_else(|| {
            Error::internal("connection checked out but not handshaked")
        })
    }

    pub(crate) fn supports_sessions(&self) -> bool {
        self.stream_description
            .as_ref()
            .map(StreamDescription::supports_sessions)
            .unwrap_or(false)
    }

    /// Whether the connection may no longer be used for commands.
    pub(crate) fn has_errored(&self) -> bool {
        self.error
    }

    /// Helper to mark the time that the connection was checked into the pool
    /// for the purpose of detecting when it becomes idle.
    pub(super) fn mark_checked_in(&mut self) {
        self.pool = None;
        self.permit = None;
        self.ready_and_available_time = Some(Instant::now());
    }

    pub(super) fn mark_checked_out(
        &mut self,
        pool: Weak<PoolInner>,
        permit: OwnedSemaphorePermit,
    ) {
        self.pool = Some(pool);
        self.permit = Some(permit);
        self.ready_and_available_time = None;
    }

    /// Checks if the connection has been idle longer than `max_idle_time`.
    pub(super) fn is_idle(&self, max_idle_time: Option<Duration>) -> bool {
        self.ready_and_available_time
            .and_then(|ready_time| {
                max_idle_time.map(|max_idle_time| ready_time.elapsed() >= max_idle_time)
            })
            .unwrap_or(false)
    }

    /// Checks if the connection belongs to a previous pool generation.
    pub(super) fn is_stale(&self, current_generation: u32) -> bool {
        self.generation != current_generation
    }

    /// Executes a `Command` and returns its response. An `Ok(..)` result
    /// means the exchange completed; it does not imply anything about the
    /// success of the command itself.
    pub(crate) async fn send_command(
        &mut self,
        mut command: Command,
        timeout: impl Into<Option<Duration>>,
    ) -> Result<CommandResponse> {
        let can_compress = command.should_compress();
        command.body.insert("$db", command.target_db.clone());

        let mut message = Message::new(command.body, Some(next_request_id()));
        for (identifier, documents) in command.document_sequences {
            message.document_sequences.push(wire::DocumentSequence {
                identifier,
                documents,
            });
        }
        if command.exhaust_allowed {
            message.flags |= MessageFlags::EXHAUST_ALLOWED;
        }
        self.send_message(message, can_compress, timeout.into()).await
    }

    pub(crate) async fn send_message(
        &mut self,
        message: Message,
        can_compress: bool,
        timeout: Option<Duration>,
    ) -> Result<CommandResponse> {
        if self.more_to_come {
            self.error = true;
            return Err(Error::internal(format!(
                "attempted to send a new message to {} while the response for another message \
                 was still being read",
                self.address
            )));
        }

        let result = match timeout {
            Some(timeout) => {
                runtime::timeout(timeout, self.execute_message(message, can_compress))
                    .await
                    .and_then(std::convert::identity)
            }
            None => self.execute_message(message, can_compress).await,
        };

        // an errored or timed-out exchange leaves the socket in an unknown
        // state, so the connection cannot be reused
        if result.is_err() {
            self.error = true;
        }

        result
    }

    async fn execute_message(
        &mut self,
        message: Message,
        can_compress: bool,
    ) -> Result<CommandResponse> {
        let max_message_size = self
            .stream_description
            .as_ref()
            .map(|sd| sd.max_message_size_bytes)
            .unwrap_or(stream_description::DEFAULT_MAX_MESSAGE_SIZE_BYTES);

        if message.encoded_len()? > max_message_size as usize {
            return Err(ErrorKind::DocumentTooLarge {
                message: format!(
                    "attempted to send a wire message larger than the server's maximum of {} \
                     bytes",
                    max_message_size
                ),
            }
            .into());
        }

        let request_id = message.request_id.unwrap_or_else(next_request_id);
        let mut message = message;
        message.request_id = Some(request_id);

        match self.compressor {
            Some(ref compressor) if can_compress => {
                message
                    .write_op_compressed_to(&mut self.stream, compressor)
                    .await?
            }
            _ => message.write_to(&mut self.stream).await?,
        }

        let reply = Message::read_from(&mut self.stream, max_message_size).await?;
        if reply.response_to != request_id {
            return Err(Error::invalid_response(format!(
                "received a response intended for request {} while awaiting request {}",
                reply.response_to, request_id
            )));
        }

        self.more_to_come = reply.flags.contains(MessageFlags::MORE_TO_COME);

        Ok(CommandResponse {
            source: self.address.clone(),
            raw: reply.single_document_response()?,
        })
    }

    /// Whether the previous response indicated that another reply will follow
    /// without an intervening request.
    pub(crate) fn is_streaming(&self) -> bool {
        self.more_to_come
    }

    /// Receive the next message in a moreToCome stream without sending
    /// anything.
    pub(crate) async fn receive_message(&mut self) -> Result<CommandResponse> {
        debug_assert!(self.more_to_come);

        let max_message_size = self
            .stream_description
            .as_ref()
            .map(|sd| sd.max_message_size_bytes)
            .unwrap_or(stream_description::DEFAULT_MAX_MESSAGE_SIZE_BYTES);

        let result = Message::read_from(&mut self.stream, max_message_size).await;
        match result {
            Ok(reply) => {
                self.more_to_come = reply.flags.contains(MessageFlags::MORE_TO_COME);
                Ok(CommandResponse {
                    source: self.address.clone(),
                    raw: reply.single_document_response()?,
                })
            }
            Err(e) => {
                self.error = true;
                Err(e)
            }
        }
    }

    /// Nullify the inner state and return it in a new `Connection` for
    /// checking back into the pool from a `Drop` implementation.
    fn take(&mut self) -> Connection {
        Connection {
            id: self.id,
            address: self.address.clone(),
            generation: self.generation,
            stream: std::mem::replace(&mut self.stream, AsyncStream::Null),
            stream_description: self.stream_description.take(),
            compressor: self.compressor.take(),
            error: self.error,
            more_to_come: self.more_to_come,
            ready_and_available_time: None,
            pool: None,
            permit: self.permit.take(),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // If the connection has a reference to a pool, it is being dropped
        // while checked out; return it so the pool can reuse or close it.
        // Otherwise the pool already released it and nothing is owed.
        if let Some(weak_pool) = self.pool.take() {
            if let Some(pool) = weak_pool.upgrade() {
                pool.check_in(self.take());
            }
        }
    }
}
