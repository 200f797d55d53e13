use std::{sync::Arc, time::Instant};

use super::{session::TransactionState, Client, ClientSession};
use crate::{
    bson::Document,
    cmap::{conn::wire::next_request_id, Connection, ConnectionPool},
    cursor::CursorSpecification,
    error::{
        Error,
        ErrorKind,
        Result,
        RETRYABLE_WRITE_ERROR,
        TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT,
    },
    event::command::{
        CommandEvent,
        CommandFailedEvent,
        CommandStartedEvent,
        CommandSucceededEvent,
    },
    operation::{AbortTransaction, CommitTransaction, Operation, Retryability},
    options::{SelectionCriteria, ServerAddress},
    sdam::{HandshakePhase, SelectedServer, ServerType, TopologyType},
    selection_criteria::ReadPreference,
};

impl Client {
    /// Execute the given operation.
    ///
    /// Server selection will be performed using the criteria specified on the
    /// operation, if any, and an implicit session will be created if the
    /// operation and write concern are compatible with sessions and an
    /// explicit session is not provided.
    pub(crate) async fn execute_operation<T: Operation>(
        &self,
        op: &mut T,
        session: impl Into<Option<&mut ClientSession>>,
    ) -> Result<T::O> {
        if self.is_shutdown() {
            return Err(ErrorKind::Shutdown.into());
        }

        let session = session.into();
        if let Some(ref session) = session {
            if !Client::same_client(self, &session.client()) {
                return Err(ErrorKind::InvalidArgument {
                    message: "the session provided to an operation must be created from the same \
                              client as the collection/database"
                        .into(),
                }
                .into());
            }

            if let Some(SelectionCriteria::ReadPreference(read_preference)) =
                op.selection_criteria()
            {
                if session.in_transaction() && read_preference != &ReadPreference::Primary {
                    return Err(ErrorKind::Transaction {
                        message: "read preference in a transaction must be primary".into(),
                    }
                    .into());
                }
            }
        }

        self.execute_operation_with_retry(op, session).await
    }

    /// Execute a cursor-producing operation, returning the specification
    /// along with the implicit session the resulting cursor pins.
    pub(crate) async fn execute_cursor_operation<T: Operation<O = CursorSpecification>>(
        &self,
        op: &mut T,
    ) -> Result<(CursorSpecification, Option<ClientSession>)> {
        let mut implicit_session = self.start_implicit_session().await?;
        let spec = self
            .execute_operation(op, implicit_session.as_mut())
            .await?;
        Ok((spec, implicit_session))
    }

    fn same_client(a: &Client, b: &Client) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub(crate) async fn select_data_bearing_server(&self, operation_name: &str) -> Result<()> {
        let topology_type = self.inner.topology.state().description.topology_type;
        let criteria = SelectionCriteria::Predicate(Arc::new(move |server_info| {
            let server_type = server_info.server_type();
            (matches!(topology_type, TopologyType::Single) && server_type.is_available())
                || server_type.is_data_bearing()
        }));
        let _: SelectedServer = self
            .inner
            .topology
            .select_server(Some(&criteria), operation_name, None)
            .await?;
        Ok(())
    }

    /// Selects a server and executes the given operation on it, optionally
    /// using a provided session. Retries the operation once upon failure if
    /// retryability is supported.
    async fn execute_operation_with_retry<T: Operation>(
        &self,
        op: &mut T,
        mut session: Option<&mut ClientSession>,
    ) -> Result<T::O> {
        // If the current transaction has been committed/aborted and it is not
        // being re-committed/re-aborted, reset the transaction's state.
        if let Some(ref mut session) = session {
            if matches!(
                session.transaction.state,
                TransactionState::Committed { .. }
            ) && op.name() != CommitTransaction::NAME
                || session.transaction.state == TransactionState::Aborted
                    && op.name() != AbortTransaction::NAME
            {
                session.transaction.reset();
            }
        }

        let mut implicit_session: Option<ClientSession> = None;
        let mut retry: Option<ExecutionRetry> = None;

        loop {
            if retry.is_some() {
                op.update_for_retry();
            }

            let selection_criteria = session
                .as_ref()
                .and_then(|s| s.transaction.pinned_mongos.as_ref())
                .or_else(|| op.selection_criteria());

            let server = match self
                .inner
                .topology
                .select_server(
                    selection_criteria,
                    op.name(),
                    retry.as_ref().map(|r| &r.first_server),
                )
                .await
            {
                Ok(server) => server,
                Err(mut err) => {
                    retry.first_error()?;

                    err.add_labels_and_update_pin(None, &mut session, None);
                    return Err(err);
                }
            };
            let server_addr = server.address.clone();

            let mut conn = match get_connection(&session, &server.pool).await {
                Ok(conn) => conn,
                Err(mut err) => {
                    retry.first_error()?;

                    self.inner.topology.handle_application_error(
                        server_addr.clone(),
                        &err,
                        HandshakePhase::PreHello { generation: None },
                    );

                    err.add_labels_and_update_pin(None, &mut session, None);
                    if err.is_read_retryable() && self.inner.options.retry_writes != Some(false) {
                        err.add_label(RETRYABLE_WRITE_ERROR);
                    }

                    let op_retry = match self.get_op_retryability(op, &session) {
                        Retryability::Read => err.is_read_retryable(),
                        Retryability::Write => err.is_write_retryable(),
                        Retryability::None => false,
                    };
                    if err.is_pool_cleared() || op_retry {
                        retry = Some(ExecutionRetry {
                            prior_txn_number: None,
                            first_error: err,
                            first_server: server_addr.clone(),
                        });
                        continue;
                    } else {
                        return Err(err);
                    }
                }
            };

            if !conn.supports_sessions() && session.is_some() {
                return Err(ErrorKind::SessionsNotSupported.into());
            }

            if conn.supports_sessions()
                && session.is_none()
                && op.supports_sessions()
                && op.is_acknowledged()
            {
                implicit_session = self.start_implicit_session().await?;
                session = implicit_session.as_mut();
            }

            let retryability = self.get_retryability(&conn, op, &session)?;
            if retryability == Retryability::None {
                retry.first_error()?;
            }

            let txn_number = retry
                .as_ref()
                .and_then(|r| r.prior_txn_number)
                .or_else(|| get_txn_number(&mut session, retryability));

            match self
                .execute_operation_on_connection(op, &mut conn, &mut session, txn_number, retryability)
                .await
            {
                Ok(output) => return Ok(output),
                Err(mut err) => {
                    err.wire_version = conn.stream_description()?.max_wire_version;

                    // Retryable writes are only supported by storage engines
                    // with document-level locking.
                    if let ErrorKind::Command(ref mut command_error) = *err.kind {
                        if command_error.code == 20
                            && command_error.message.starts_with("Transaction numbers")
                        {
                            command_error.message = "This MongoDB deployment does not support \
                                                     retryable writes. Please add \
                                                     retryWrites=false to your connection string."
                                .to_string();
                        }
                    }

                    self.inner.topology.handle_application_error(
                        server_addr.clone(),
                        &err,
                        HandshakePhase::after_completion(&conn),
                    );
                    // release the connection to be processed by the pool
                    drop(conn);
                    // release the selected server to decrement its operation
                    // count
                    drop(server);

                    if let Some(r) = retry {
                        // a second failure propagates whichever error is
                        // more meaningful
                        if err.is_server_error()
                            || err.is_read_retryable()
                            || err.is_write_retryable()
                        {
                            return Err(err);
                        } else {
                            return Err(r.first_error);
                        }
                    } else if retryability == Retryability::Read && err.is_read_retryable()
                        || retryability == Retryability::Write && err.is_write_retryable()
                    {
                        tracing::debug!(
                            operation = op.name(),
                            address = %server_addr,
                            error = %err,
                            "retrying operation on a freshly selected server"
                        );
                        retry = Some(ExecutionRetry {
                            prior_txn_number: txn_number,
                            first_error: err,
                            first_server: server_addr.clone(),
                        });
                        continue;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Executes an operation on a given connection, optionally using a
    /// provided session.
    async fn execute_operation_on_connection<T: Operation>(
        &self,
        op: &mut T,
        connection: &mut Connection,
        session: &mut Option<&mut ClientSession>,
        txn_number: Option<i64>,
        retryability: Retryability,
    ) -> Result<T::O> {
        if let Some(wc) = op.write_concern() {
            wc.validate()?;
        }

        let stream_description = connection.stream_description()?.clone();
        let is_sharded = stream_description.initial_server_type == ServerType::Mongos;
        let mut cmd = op.build(&stream_description)?;

        // attach `$readPreference` where the receiving server interprets it
        let topology_state = self.inner.topology.state();
        if let Some(read_pref) = topology_state.description.read_pref_for_command(
            stream_description.initial_server_type,
            op.selection_criteria()
                .and_then(SelectionCriteria::as_read_pref),
        ) {
            cmd.set_read_preference(&read_pref);
        }

        match session {
            Some(ref mut session) if op.supports_sessions() && op.is_acknowledged() => {
                cmd.set_session(session);
                if let Some(txn_number) = txn_number {
                    cmd.set_txn_number(txn_number);
                }

                // If this is a causally consistent session, set
                // `readConcern.afterClusterTime`.
                if session.causal_consistency()
                    && matches!(
                        session.transaction.state,
                        TransactionState::None | TransactionState::Starting
                    )
                    && op.supports_read_concern()
                {
                    cmd.set_after_cluster_time(session);
                }

                match session.transaction.state {
                    TransactionState::Starting => {
                        cmd.set_start_transaction();
                        cmd.set_autocommit();

                        if let Some(ref options) = session.transaction.options {
                            if let Some(ref read_concern) = options.read_concern {
                                cmd.set_read_concern_level(read_concern.level.clone());
                            }
                        }
                        if session.causal_consistency() {
                            cmd.set_after_cluster_time(session);
                        }

                        if is_sharded {
                            session.pin_mongos(connection.address().clone());
                        }
                        session.transaction.state = TransactionState::InProgress;
                    }
                    TransactionState::InProgress => cmd.set_autocommit(),
                    TransactionState::Committed { .. } | TransactionState::Aborted => {
                        cmd.set_autocommit();

                        // commit/abort against a mongos must present the
                        // recovery token
                        if is_sharded {
                            if let Some(ref recovery_token) = session.transaction.recovery_token {
                                cmd.set_recovery_token(recovery_token);
                            }
                        }
                    }
                    TransactionState::None => {}
                }
                session.update_last_use();
            }
            Some(ref session) if !op.supports_sessions() && !session.is_implicit() => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("{} does not support sessions", cmd.name),
                }
                .into());
            }
            Some(ref session) if !op.is_acknowledged() && !session.is_implicit() => {
                return Err(ErrorKind::InvalidArgument {
                    message: "Cannot use ClientSessions with unacknowledged write concern"
                        .to_string(),
                }
                .into());
            }
            _ => {}
        }

        // gossip the highest cluster time observed by this client or session
        let session_cluster_time = session.as_ref().and_then(|session| session.cluster_time());
        let client_cluster_time = self.inner.topology.cluster_time();
        let max_cluster_time =
            std::cmp::max(session_cluster_time, client_cluster_time.as_ref());
        if let Some(cluster_time) = max_cluster_time {
            cmd.set_cluster_time(cluster_time);
        }

        let connection_info = connection.info();
        let request_id = next_request_id();

        let should_redact = cmd.should_redact();
        let cmd_name = cmd.name.clone();
        let target_db = cmd.target_db.clone();

        self.emit_command_event(|| {
            let command_body = if should_redact {
                Document::new()
            } else {
                cmd.body.clone()
            };
            CommandEvent::Started(CommandStartedEvent {
                command: command_body,
                db: target_db.clone(),
                command_name: cmd_name.clone(),
                request_id,
                connection: connection_info.clone(),
            })
        });

        let start_time = Instant::now();
        let socket_timeout = self.inner.options.socket_timeout;
        let command_result = match connection.send_command(cmd, socket_timeout).await {
            Ok(response) => {
                // gossip happens even for `ok: 0` replies
                if let Some(cluster_time) = response.cluster_time() {
                    self.inner.topology.advance_cluster_time(&cluster_time);
                    if let Some(ref mut session) = session {
                        session.advance_cluster_time(&cluster_time);
                    }
                }
                if let (Some(session), Some(operation_time)) =
                    (session.as_mut(), response.operation_time())
                {
                    session.advance_operation_time(operation_time);
                }

                match response.validate() {
                    Ok(()) => {
                        if let Some(ref mut session) = session {
                            if is_sharded && session.in_transaction() {
                                if let Some(token) = response.recovery_token() {
                                    session.transaction.recovery_token = Some(token);
                                }
                            }
                        }
                        Ok(response)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        };

        let duration = start_time.elapsed();

        match command_result {
            Err(mut err) => {
                self.emit_command_event(|| {
                    let mut redacted = err.clone();
                    if should_redact {
                        redacted.redact();
                    }
                    CommandEvent::Failed(CommandFailedEvent {
                        duration,
                        command_name: cmd_name.clone(),
                        failure: redacted,
                        request_id,
                        connection: connection_info.clone(),
                    })
                });

                if let Some(ref mut session) = session {
                    if err.is_network_error() {
                        session.mark_dirty();
                    }
                }

                err.add_labels_and_update_pin(
                    Some(connection),
                    session,
                    Some(retryability),
                );
                op.handle_error(err)
            }
            Ok(response) => {
                self.emit_command_event(|| {
                    let reply = if should_redact {
                        Document::new()
                    } else {
                        response.raw.clone()
                    };
                    CommandEvent::Succeeded(CommandSucceededEvent {
                        duration,
                        reply,
                        command_name: cmd_name.clone(),
                        request_id,
                        connection: connection_info.clone(),
                    })
                });

                match op.handle_response(&response) {
                    Ok(response) => Ok(response),
                    Err(mut err) => {
                        err.add_labels_and_update_pin(
                            Some(connection),
                            session,
                            Some(retryability),
                        );
                        Err(err)
                    }
                }
            }
        }
    }

    /// Returns the retryability level configured for this operation,
    /// independent of what the selected server supports.
    fn get_op_retryability<T: Operation>(
        &self,
        op: &T,
        session: &Option<&mut ClientSession>,
    ) -> Retryability {
        if session
            .as_ref()
            .map(|session| session.in_transaction())
            .unwrap_or(false)
        {
            return Retryability::None;
        }
        match op.retryability() {
            Retryability::Read if self.inner.options.retry_reads != Some(false) => {
                Retryability::Read
            }
            // commitTransaction and abortTransaction are retried regardless
            // of the retry_writes setting
            Retryability::Write
                if op.name() == CommitTransaction::NAME
                    || op.name() == AbortTransaction::NAME
                    || self.inner.options.retry_writes != Some(false) =>
            {
                Retryability::Write
            }
            _ => Retryability::None,
        }
    }

    /// Returns the retryability level for the execution of this operation on
    /// this connection.
    fn get_retryability<T: Operation>(
        &self,
        conn: &Connection,
        op: &T,
        session: &Option<&mut ClientSession>,
    ) -> Result<Retryability> {
        match self.get_op_retryability(op, session) {
            Retryability::Read if conn.stream_description()?.max_wire_version.unwrap_or(0) >= 6 => {
                Ok(Retryability::Read)
            }
            Retryability::Write if conn.stream_description()?.supports_retryable_writes() => {
                Ok(Retryability::Write)
            }
            _ => Ok(Retryability::None),
        }
    }
}

async fn get_connection(
    session: &Option<&mut ClientSession>,
    pool: &ConnectionPool,
) -> Result<Connection> {
    // a potential future home of transaction connection pinning; for now all
    // checkouts go through the pool
    let _ = session;
    pool.check_out().await
}

/// The `(lsid, txnNumber)` pair must be stable across the retry of a
/// retryable write, and all commands in a transaction share the
/// transaction's number.
fn get_txn_number(
    session: &mut Option<&mut ClientSession>,
    retryability: Retryability,
) -> Option<i64> {
    match session {
        Some(ref mut session) => {
            if session.transaction.state != TransactionState::None {
                Some(session.txn_number())
            } else {
                match retryability {
                    Retryability::Write => Some(session.get_and_increment_txn_number()),
                    _ => None,
                }
            }
        }
        None => None,
    }
}

impl Error {
    /// Adds the necessary labels to this Error, and unpins the session if
    /// needed.
    ///
    /// A `TransientTransactionError` label is added if a transaction is in
    /// progress and the error is a network or server selection error.
    ///
    /// On a pre-4.4 connection, a `RetryableWriteError` label is added to any
    /// write-retryable error; on 4.4+ only to network errors, since the
    /// server applies the label itself otherwise.
    ///
    /// If the `TransientTransactionError` or
    /// `UnknownTransactionCommitResult` labels are added, the session is
    /// unpinned from its mongos.
    fn add_labels_and_update_pin(
        &mut self,
        conn: Option<&Connection>,
        session: &mut Option<&mut ClientSession>,
        retryability: Option<Retryability>,
    ) {
        let transaction_state = session
            .as_ref()
            .map_or(&TransactionState::None, |session| &session.transaction.state);
        let max_wire_version = conn.and_then(|conn| {
            conn.stream_description
                .as_ref()
                .and_then(|sd| sd.max_wire_version)
        });

        match transaction_state {
            TransactionState::Starting | TransactionState::InProgress => {
                if self.is_network_error() || self.is_server_selection_error() {
                    self.add_label(TRANSIENT_TRANSACTION_ERROR);
                }
            }
            TransactionState::Committed { .. } => {
                if let Some(max_wire_version) = max_wire_version {
                    if self.should_add_retryable_write_label(max_wire_version) {
                        self.add_label(RETRYABLE_WRITE_ERROR);
                    }
                }
                if self.should_add_unknown_transaction_commit_result_label() {
                    self.add_label(UNKNOWN_TRANSACTION_COMMIT_RESULT);
                }
            }
            TransactionState::Aborted => {
                if let Some(max_wire_version) = max_wire_version {
                    if self.should_add_retryable_write_label(max_wire_version) {
                        self.add_label(RETRYABLE_WRITE_ERROR);
                    }
                }
            }
            TransactionState::None => {
                if retryability == Some(Retryability::Write) {
                    if let Some(max_wire_version) = max_wire_version {
                        if self.should_add_retryable_write_label(max_wire_version) {
                            self.add_label(RETRYABLE_WRITE_ERROR);
                        }
                    }
                }
            }
        }

        if let Some(ref mut session) = session {
            if self.contains_label(TRANSIENT_TRANSACTION_ERROR)
                || self.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
            {
                session.unpin();
            }
        }
    }
}

#[derive(Debug)]
struct ExecutionRetry {
    prior_txn_number: Option<i64>,
    first_error: Error,
    first_server: ServerAddress,
}

trait RetryHelper {
    fn first_error(&mut self) -> Result<()>;
}

impl RetryHelper for Option<ExecutionRetry> {
    fn first_error(&mut self) -> Result<()> {
        match self.take() {
            Some(r) => Err(r.first_error),
            None => Ok(()),
        }
    }
}
