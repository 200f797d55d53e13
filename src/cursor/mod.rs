//! Contains the `Cursor` type, a lazy stream of query results.

use std::{
    collections::VecDeque,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures_core::{Future, Stream};
use serde::de::DeserializeOwned;

use crate::{
    bson::{from_document, Document},
    error::Result,
    operation::{CursorBody, GetMore, KillCursors},
    options::ServerAddress,
    results::GetMoreResult,
    runtime,
    BoxFuture,
    Client,
    ClientSession,
    Namespace,
};

/// Specification used to create a new cursor, extracted from the reply to a
/// cursor-producing command.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<Document>,
    pub(crate) post_batch_resume_token: Option<Document>,
}

impl CursorSpecification {
    pub(crate) fn new(
        body: CursorBody,
        address: ServerAddress,
        batch_size: impl Into<Option<u32>>,
        max_time: impl Into<Option<Duration>>,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: body.ns,
                id: body.id,
                address,
                batch_size: batch_size.into(),
                max_time: max_time.into(),
            },
            initial_buffer: body.first_batch,
            post_batch_resume_token: body.post_batch_resume_token,
        }
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }
}

/// Static information about a cursor: where it lives and how its getMores
/// are shaped.
#[derive(Clone, Debug)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,

    /// The server the cursor was created on; every getMore and the final
    /// killCursors must go there.
    pub(crate) address: ServerAddress,

    pub(crate) id: i64,
    pub(crate) batch_size: Option<u32>,
    pub(crate) max_time: Option<Duration>,
}

type GetMoreFuture = BoxFuture<'static, (Result<GetMoreResult>, Option<ClientSession>)>;

/// A cursor streaming the results of a query, implementing
/// [`futures_core::Stream`].
///
/// A cursor lazily issues `getMore` commands against the server it was
/// created on, on the same logical session, as its buffered batch drains. A
/// cursor dropped before exhaustion frees its server-side state with a
/// best-effort `killCursors`.
///
/// ```rust,no_run
/// # use futures_util::TryStreamExt;
/// # use mongolite::{bson::doc, error::Result, Client};
/// # async fn run() -> Result<()> {
/// # let client = Client::with_uri_str("mongodb://localhost:27017").await?;
/// # let coll = client.database("app").collection("users");
/// let mut cursor = coll.find(doc! { "dc": "east" }).await?;
/// while let Some(user) = cursor.try_next().await? {
///     println!("{}", user);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Cursor<T = Document>
where
    T: DeserializeOwned,
{
    client: Client,
    info: CursorInformation,
    buffer: VecDeque<Document>,
    exhausted: bool,
    post_batch_resume_token: Option<Document>,

    /// The implicit session this cursor's commands run on. `None` when the
    /// deployment does not support sessions.
    session: Option<ClientSession>,

    /// The in-flight getMore, if any. At most one exists at a time.
    pending_get_more: Option<GetMoreFuture>,

    _phantom: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Cursor<T> {
    pub(crate) fn new(
        client: Client,
        spec: CursorSpecification,
        session: Option<ClientSession>,
    ) -> Self {
        Self {
            client,
            exhausted: spec.info.id == 0,
            info: spec.info,
            buffer: spec.initial_buffer,
            post_batch_resume_token: spec.post_batch_resume_token,
            session,
            pending_get_more: None,
            _phantom: PhantomData,
        }
    }

    /// The namespace of the collection this cursor iterates.
    pub fn namespace(&self) -> &Namespace {
        &self.info.ns
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }

    pub(crate) fn post_batch_resume_token(&self) -> Option<&Document> {
        self.post_batch_resume_token.as_ref()
    }

    pub(crate) fn buffer_is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Convert to a cursor yielding a different deserialized type.
    pub(crate) fn with_type<D: DeserializeOwned>(mut self) -> Cursor<D> {
        let new = Cursor {
            client: self.client.clone(),
            info: self.info.clone(),
            buffer: std::mem::take(&mut self.buffer),
            exhausted: self.exhausted,
            post_batch_resume_token: self.post_batch_resume_token.take(),
            session: self.session.take(),
            pending_get_more: self.pending_get_more.take(),
            _phantom: PhantomData,
        };
        // the leftover shell must not kill the id that moved to `new`
        self.exhausted = true;
        new
    }

    fn start_get_more(&mut self) {
        let client = self.client.clone();
        let info = self.info.clone();
        let mut session = self.session.take();
        self.pending_get_more = Some(Box::pin(async move {
            let mut op = GetMore::new(info);
            let result = client.execute_operation(&mut op, session.as_mut()).await;
            (result, session)
        }));
    }

    fn handle_get_more(&mut self, result: Result<GetMoreResult>) -> Result<()> {
        match result {
            Ok(get_more) => {
                self.exhausted = get_more.exhausted;
                if get_more.post_batch_resume_token.is_some() {
                    self.post_batch_resume_token = get_more.post_batch_resume_token;
                }
                self.buffer = get_more.batch;
                Ok(())
            }
            Err(error) => {
                // a dead cursor has no server-side state left to clean up
                if error.is_network_error() || error.sdam_code() == Some(43) {
                    self.exhausted = true;
                }
                Err(error)
            }
        }
    }
}

impl<T> Stream for Cursor<T>
where
    T: DeserializeOwned + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(ref mut future) = this.pending_get_more {
                let (result, session) = match Pin::new(future).poll(cx) {
                    Poll::Ready(output) => output,
                    Poll::Pending => return Poll::Pending,
                };
                this.pending_get_more = None;
                this.session = session;
                if let Err(error) = this.handle_get_more(result) {
                    return Poll::Ready(Some(Err(error)));
                }
            }

            if let Some(document) = this.buffer.pop_front() {
                let item = from_document(document).map_err(|e| {
                    crate::error::Error::invalid_response(format!(
                        "error deserializing cursor result: {}",
                        e
                    ))
                });
                return Poll::Ready(Some(item));
            }

            if this.exhausted {
                return Poll::Ready(None);
            }

            this.start_get_more();
        }
    }
}

impl<T: DeserializeOwned> Drop for Cursor<T> {
    fn drop(&mut self) {
        // terminated early with live server-side state: free it, ignoring
        // failures
        if self.exhausted || self.info.id == 0 {
            return;
        }

        let client = self.client.clone();
        let mut op = KillCursors::new(
            self.info.ns.clone(),
            vec![self.info.id],
            self.info.address.clone(),
        );
        runtime::spawn(async move {
            let _ = client.execute_operation(&mut op, None).await;
        });
    }
}

/// A cursor created within an explicit session. Iteration requires the
/// session to be provided, since all of the cursor's commands run on it.
pub struct SessionCursor<T = Document>
where
    T: DeserializeOwned,
{
    client: Client,
    info: CursorInformation,
    buffer: VecDeque<Document>,
    exhausted: bool,
    _phantom: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> SessionCursor<T> {
    pub(crate) fn new(client: Client, spec: CursorSpecification) -> Self {
        Self {
            client,
            exhausted: spec.info.id == 0,
            info: spec.info,
            buffer: spec.initial_buffer,
            _phantom: PhantomData,
        }
    }

    /// Retrieve the next result from the cursor, running any needed getMore
    /// on the provided session.
    ///
    /// The session must be the one this cursor was created on.
    pub async fn next(&mut self, session: &mut ClientSession) -> Option<Result<T>> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return Some(from_document(document).map_err(|e| {
                    crate::error::Error::invalid_response(format!(
                        "error deserializing cursor result: {}",
                        e
                    ))
                }));
            }

            if self.exhausted {
                return None;
            }

            let mut op = GetMore::new(self.info.clone());
            match self.client.execute_operation(&mut op, &mut *session).await {
                Ok(get_more) => {
                    self.exhausted = get_more.exhausted;
                    self.buffer = get_more.batch;
                }
                Err(error) => {
                    if error.is_network_error() || error.sdam_code() == Some(43) {
                        self.exhausted = true;
                    }
                    return Some(Err(error));
                }
            }
        }
    }
}

impl<T: DeserializeOwned> Drop for SessionCursor<T> {
    fn drop(&mut self) {
        if self.exhausted || self.info.id == 0 {
            return;
        }

        let client = self.client.clone();
        let mut op = KillCursors::new(
            self.info.ns.clone(),
            vec![self.info.id],
            self.info.address.clone(),
        );
        runtime::spawn(async move {
            let _ = client.execute_operation(&mut op, None).await;
        });
    }
}
