mod cluster_time;
mod pool;

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::{
    bson::{doc, Binary, Document, Timestamp},
    error::{
        ErrorKind,
        Result,
        TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT,
    },
    operation::{AbortTransaction, CommitTransaction},
    options::{SessionOptions, TransactionOptions},
    runtime,
    sdam::SessionSupportStatus,
    selection_criteria::SelectionCriteria,
    BoxFuture,
    Client,
};
pub use cluster_time::ClusterTime;
pub(crate) use pool::ServerSessionPool;

use super::options::ServerAddress;

/// The default wall-clock budget for the retry loops in
/// [`ClientSession::with_transaction`].
const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(120);

/// A MongoDB client session. This struct represents a logical session used
/// for ordering sequential operations. To create a `ClientSession`, call
/// [`Client::start_session`].
///
/// `ClientSession` instances are not thread safe or fork safe. They can only
/// be used by one thread or process at a time.
///
/// ## Transactions
///
/// Transactions are used to execute a series of operations across multiple
/// documents and collections atomically. For more information about when and
/// how to use transactions in MongoDB, see the
/// [manual](https://www.mongodb.com/docs/manual/core/transactions/).
///
/// To begin a transaction, call [`ClientSession::start_transaction`] on a
/// `ClientSession`. The `ClientSession` must be passed to operations to be
/// executed within the transaction.
///
/// ```rust,no_run
/// # use mongolite::{bson::doc, error::{Result, TRANSIENT_TRANSACTION_ERROR,
/// #     UNKNOWN_TRANSACTION_COMMIT_RESULT}, Client, ClientSession};
/// # async fn do_stuff() -> Result<()> {
/// # let client = Client::with_uri_str("mongodb://example.com").await?;
/// # let coll = client.database("foo").collection("bar");
/// let mut session = client.start_session(None).await?;
/// session.start_transaction(None).await?;
/// // A "TransientTransactionError" label indicates that the entire
/// // transaction can be retried with a reasonable expectation that it will
/// // succeed.
/// while let Err(error) = execute_transaction(&coll, &mut session).await {
///     if !error.contains_label(TRANSIENT_TRANSACTION_ERROR) {
///         break;
///     }
/// }
/// # Ok(())
/// # }
///
/// # async fn execute_transaction(
/// #     coll: &mongolite::Collection,
/// #     session: &mut ClientSession,
/// # ) -> Result<()> {
/// coll.insert_one_with_session(doc! { "x": 1 }, session).await?;
/// coll.delete_one_with_session(doc! { "y": 2 }, session).await?;
/// // An "UnknownTransactionCommitResult" label indicates that it is unknown
/// // whether the commit has satisfied the write concern. It is safe to
/// // retry the commit until a result without the label is returned.
/// loop {
///     let result = session.commit_transaction().await;
///     if let Err(ref error) = result {
///         if error.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) {
///             continue;
///         }
///     }
///     return result;
/// }
/// # }
/// ```
#[derive(Debug)]
pub struct ClientSession {
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    server_session: Option<ServerSession>,
    client: Client,
    is_implicit: bool,
    options: Option<SessionOptions>,
    pub(crate) transaction: Transaction,
}

/// The transaction state attached to a session.
#[derive(Clone, Debug, Default)]
pub(crate) struct Transaction {
    pub(crate) state: TransactionState,
    pub(crate) options: Option<TransactionOptions>,
    pub(crate) pinned_mongos: Option<SelectionCriteria>,
    pub(crate) recovery_token: Option<Document>,
}

impl Transaction {
    fn start(&mut self, options: Option<TransactionOptions>) {
        self.state = TransactionState::Starting;
        self.options = options;
        self.recovery_token = None;
    }

    fn commit(&mut self, data_committed: bool) {
        self.state = TransactionState::Committed { data_committed };
    }

    fn abort(&mut self) {
        self.state = TransactionState::Aborted;
        self.options = None;
        self.pinned_mongos = None;
    }

    pub(crate) fn reset(&mut self) {
        self.state = TransactionState::None;
        self.options = None;
        self.pinned_mongos = None;
        self.recovery_token = None;
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum TransactionState {
    #[default]
    None,
    Starting,
    InProgress,
    Committed {
        /// Whether any data was actually committed when commit_transaction
        /// was first called; a commit of an empty transaction does not run a
        /// server-side command and need not be re-run on retry.
        data_committed: bool,
    },
    Aborted,
}

impl ClientSession {
    pub(crate) fn new(
        server_session: ServerSession,
        client: Client,
        options: Option<SessionOptions>,
        is_implicit: bool,
    ) -> Self {
        Self {
            client,
            server_session: Some(server_session),
            cluster_time: None,
            operation_time: None,
            is_implicit,
            options,
            transaction: Default::default(),
        }
    }

    /// The client used to create this session.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// The id of this session, carried as `lsid` on every command this
    /// session is used for.
    pub fn id(&self) -> &Document {
        &self
            .server_session
            .as_ref()
            .expect("session used after drop")
            .id
    }

    /// Whether this session was created implicitly by the driver or
    /// explicitly by the user.
    pub(crate) fn is_implicit(&self) -> bool {
        self.is_implicit
    }

    /// Whether this session is currently in a transaction.
    pub(crate) fn in_transaction(&self) -> bool {
        self.transaction.state == TransactionState::Starting
            || self.transaction.state == TransactionState::InProgress
    }

    /// The highest cluster time this session has seen so far.
    /// This will be `None` if this session has not been used in an operation
    /// yet.
    pub fn cluster_time(&self) -> Option<&ClusterTime> {
        self.cluster_time.as_ref()
    }

    /// The latest operation time this session has observed, used for causal
    /// consistency.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.operation_time
    }

    /// The options used to create this session.
    pub fn options(&self) -> Option<&SessionOptions> {
        self.options.as_ref()
    }

    /// Whether operations on this session are causally ordered via
    /// `readConcern.afterClusterTime`. Defaults to true for explicit
    /// sessions.
    pub(crate) fn causal_consistency(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|options| options.causal_consistency)
            .unwrap_or(!self.is_implicit)
    }

    /// Set the cluster time to the provided one if it is greater than this
    /// session's highest seen cluster time or if this session's cluster time
    /// is `None`.
    pub fn advance_cluster_time(&mut self, to: &ClusterTime) {
        if self.cluster_time().map(|ct| ct < to).unwrap_or(true) {
            self.cluster_time = Some(to.clone());
        }
    }

    /// Advance the session's observed operation time if the provided one is
    /// greater.
    pub fn advance_operation_time(&mut self, to: Timestamp) {
        if self.operation_time.map(|ot| ot < to).unwrap_or(true) {
            self.operation_time = Some(to);
        }
    }

    /// Mark the underlying server session as dirty so it is discarded rather
    /// than reused.
    pub(crate) fn mark_dirty(&mut self) {
        if let Some(ref mut session) = self.server_session {
            session.dirty = true;
        }
    }

    /// Updates the date that the underlying server session was last used.
    pub(crate) fn update_last_use(&mut self) {
        if let Some(ref mut session) = self.server_session {
            session.last_use = Instant::now();
        }
    }

    /// Gets the current txn_number.
    pub(crate) fn txn_number(&self) -> i64 {
        self.server_session
            .as_ref()
            .map(|session| session.txn_number)
            .unwrap_or(0)
    }

    /// Increments the txn_number and returns the new value.
    pub(crate) fn get_and_increment_txn_number(&mut self) -> i64 {
        match self.server_session {
            Some(ref mut session) => {
                session.txn_number += 1;
                session.txn_number
            }
            None => 0,
        }
    }

    /// Pin this session's transaction to the mongos at `address`; all
    /// commands in a sharded transaction must go to the same mongos.
    pub(crate) fn pin_mongos(&mut self, address: ServerAddress) {
        self.transaction.pinned_mongos = Some(SelectionCriteria::from_address(address));
    }

    pub(crate) fn unpin(&mut self) {
        self.transaction.pinned_mongos = None;
    }

    /// Starts a new transaction on this session with the given
    /// `TransactionOptions`. If no options are provided, the session's
    /// `default_transaction_options` will be used. This session must be
    /// passed into each operation within the transaction; otherwise, the
    /// operation will be executed outside of the transaction.
    pub async fn start_transaction(
        &mut self,
        options: impl Into<Option<TransactionOptions>>,
    ) -> Result<()> {
        match self.transaction.state {
            TransactionState::Starting | TransactionState::InProgress => {
                return Err(ErrorKind::Transaction {
                    message: "transaction already in progress".into(),
                }
                .into());
            }
            TransactionState::Committed { .. } => {
                // unpin after a previous transaction is committed
                self.unpin();
            }
            _ => {}
        }

        match self.client.session_support_status().await? {
            SessionSupportStatus::Supported { .. } => {}
            _ => {
                return Err(ErrorKind::Transaction {
                    message: "Transactions are not supported by this deployment".into(),
                }
                .into());
            }
        }

        let mut options = match options.into() {
            Some(options) => Some(options),
            None => self
                .options
                .as_ref()
                .and_then(|o| o.default_transaction_options.clone()),
        };
        resolve_transaction_options(&self.client, &mut options);

        if let Some(ref options) = options {
            if !options
                .write_concern
                .as_ref()
                .map(|wc| wc.is_acknowledged())
                .unwrap_or(true)
            {
                return Err(ErrorKind::Transaction {
                    message: "transactions do not support unacknowledged write concerns".into(),
                }
                .into());
            }
        }

        self.get_and_increment_txn_number();
        self.transaction.start(options);
        Ok(())
    }

    /// Commits the transaction that is currently active on this session.
    ///
    /// This method may return an error with an
    /// [`UNKNOWN_TRANSACTION_COMMIT_RESULT`] label. This label indicates that
    /// it is unknown whether the commit has satisfied the write concern
    /// associated with the transaction. If an error with this label is
    /// returned, it is safe to retry the commit until the write concern is
    /// satisfied or an error without the label is returned.
    pub async fn commit_transaction(&mut self) -> Result<()> {
        match &mut self.transaction.state {
            TransactionState::None => Err(ErrorKind::Transaction {
                message: "no transaction started".into(),
            }
            .into()),
            TransactionState::Aborted => Err(ErrorKind::Transaction {
                message: "Cannot call commitTransaction after calling abortTransaction".into(),
            }
            .into()),
            TransactionState::Starting => {
                // no command was run in the transaction, so there is nothing
                // to commit server-side
                self.transaction.commit(false);
                Ok(())
            }
            TransactionState::InProgress => {
                let mut commit = CommitTransaction::new(self.transaction.options.clone());
                self.transaction.commit(true);
                let client = self.client.clone();
                client.execute_operation(&mut commit, Some(self)).await
            }
            TransactionState::Committed {
                data_committed: true,
            } => {
                let mut commit = CommitTransaction::new(self.transaction.options.clone());
                commit.update_for_commit_retry();
                let client = self.client.clone();
                client.execute_operation(&mut commit, Some(self)).await
            }
            TransactionState::Committed {
                data_committed: false,
            } => Ok(()),
        }
    }

    /// Aborts the transaction that is currently active on this session. Any
    /// open transaction will be aborted automatically in the `Drop`
    /// implementation of `ClientSession`. Errors returned by the server for
    /// the abort are swallowed: the transaction is over either way.
    pub async fn abort_transaction(&mut self) -> Result<()> {
        match self.transaction.state {
            TransactionState::None => Err(ErrorKind::Transaction {
                message: "no transaction started".into(),
            }
            .into()),
            TransactionState::Committed { .. } => Err(ErrorKind::Transaction {
                message: "Cannot call abortTransaction after calling commitTransaction".into(),
            }
            .into()),
            TransactionState::Aborted => Err(ErrorKind::Transaction {
                message: "cannot call abortTransaction twice".into(),
            }
            .into()),
            TransactionState::Starting => {
                self.transaction.abort();
                Ok(())
            }
            TransactionState::InProgress => {
                let write_concern = self
                    .transaction
                    .options
                    .as_ref()
                    .and_then(|options| options.write_concern.clone());
                let selection_criteria = self.transaction.pinned_mongos.clone();
                let mut abort = AbortTransaction::new(write_concern, selection_criteria);
                self.transaction.abort();
                let client = self.client.clone();
                let _result = client.execute_operation(&mut abort, Some(&mut *self)).await;
                Ok(())
            }
        }
    }

    /// Starts a transaction, runs the given callback within it, and commits.
    ///
    /// The entire callback is re-run if it fails with an error labeled
    /// [`TRANSIENT_TRANSACTION_ERROR`], and the commit is retried when it
    /// fails with an error labeled [`UNKNOWN_TRANSACTION_COMMIT_RESULT`],
    /// both within an overall 120 second budget.
    ///
    /// Calling this inside an already-active transaction runs the callback
    /// in that transaction without starting (or committing) a new one.
    pub async fn with_transaction<R, F>(
        &mut self,
        mut callback: F,
        options: impl Into<Option<TransactionOptions>>,
    ) -> Result<R>
    where
        F: for<'a> FnMut(&'a mut ClientSession) -> BoxFuture<'a, Result<R>>,
    {
        // nesting must not start a new server-side transaction
        if self.in_transaction() {
            return callback(self).await;
        }

        let options = options.into();
        let timeout = DEFAULT_TRANSACTION_TIMEOUT;
        let start = Instant::now();

        'transaction: loop {
            self.start_transaction(options.clone()).await?;
            let result = callback(self).await;
            match result {
                Ok(value) => {
                    // the callback may have finished the transaction itself
                    if matches!(
                        self.transaction.state,
                        TransactionState::None
                            | TransactionState::Aborted
                            | TransactionState::Committed { .. }
                    ) {
                        return Ok(value);
                    }

                    'commit: loop {
                        match self.commit_transaction().await {
                            Ok(()) => return Ok(value),
                            Err(error) => {
                                if start.elapsed() < timeout {
                                    if error.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                                        && !error.is_max_time_ms_expired_error()
                                    {
                                        continue 'commit;
                                    }
                                    if error.contains_label(TRANSIENT_TRANSACTION_ERROR) {
                                        continue 'transaction;
                                    }
                                }
                                return Err(error);
                            }
                        }
                    }
                }
                Err(error) => {
                    if self.in_transaction() {
                        let _ = self.abort_transaction().await;
                    }
                    if error.contains_label(TRANSIENT_TRANSACTION_ERROR)
                        && start.elapsed() < timeout
                    {
                        continue 'transaction;
                    }
                    return Err(error);
                }
            }
        }
    }
}

fn resolve_transaction_options(client: &Client, options: &mut Option<TransactionOptions>) {
    let client_options = client.options();
    if client_options.read_concern.is_some()
        || client_options.write_concern.is_some()
        || client_options.selection_criteria.is_some()
    {
        let options = options.get_or_insert_with(Default::default);
        if options.read_concern.is_none() {
            options.read_concern = client_options.read_concern.clone();
        }
        if options.write_concern.is_none() {
            options.write_concern = client_options.write_concern.clone();
        }
        if options.selection_criteria.is_none() {
            options.selection_criteria = client_options.selection_criteria.clone();
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        let server_session = match self.server_session.take() {
            Some(session) => session,
            None => return,
        };
        let client = self.client.clone();

        if self.transaction.state == TransactionState::InProgress {
            // the server-side transaction must be cleaned up, which requires
            // a reconstructed session
            let mut dropped_session = ClientSession {
                cluster_time: self.cluster_time.clone(),
                operation_time: self.operation_time,
                server_session: Some(server_session),
                client: client.clone(),
                is_implicit: self.is_implicit,
                options: self.options.clone(),
                transaction: self.transaction.clone(),
            };
            runtime::spawn(async move {
                let _result = dropped_session.abort_transaction().await;
            });
        } else {
            runtime::spawn(async move {
                client.check_in_server_session(server_session).await;
            });
        }
    }
}

/// Client-side abstraction of a server session. These are pooled, addressed
/// by `lsid`, and may be associated with multiple `ClientSession`s over the
/// course of their lifetime.
#[derive(Clone, Debug)]
pub(crate) struct ServerSession {
    /// The id of the server session to which this corresponds.
    pub(super) id: Document,

    /// The last time an operation was executed with this session.
    pub(super) last_use: Instant,

    /// Whether a network error was encountered while using this session.
    pub(super) dirty: bool,

    /// A monotonically increasing transaction number for this session.
    pub(super) txn_number: i64,
}

impl ServerSession {
    /// Creates a new session, generating the id client side.
    fn new() -> Self {
        let binary = Binary::from_uuid_bytes(*Uuid::new_v4().as_bytes());

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
            txn_number: 0,
        }
    }

    /// Determines if this server session is about to expire within the next
    /// minute, in which case its server-side state may be reaped at any
    /// moment.
    fn is_about_to_expire(&self, logical_session_timeout: Duration) -> bool {
        let expiration_date = self.last_use + logical_session_timeout;
        expiration_date < Instant::now() + Duration::from_secs(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_sessions_have_unique_uuid_lsids() {
        let a = ServerSession::new();
        let b = ServerSession::new();
        assert_ne!(a.id, b.id);

        let binary = match a.id.get("id") {
            Some(crate::bson::Bson::Binary(binary)) => binary,
            other => panic!("expected uuid binary lsid, got {:?}", other),
        };
        assert_eq!(binary.subtype, crate::bson::spec::BinarySubtype::Uuid);
        assert_eq!(binary.bytes.len(), 16);
    }

    #[test]
    fn expiry_margin() {
        let session = ServerSession::new();
        assert!(!session.is_about_to_expire(Duration::from_secs(30 * 60)));
        assert!(session.is_about_to_expire(Duration::from_secs(59)));
    }

}
