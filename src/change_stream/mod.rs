//! Contains the functionality for change streams.

pub mod event;

use std::{
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use futures_core::{Future, Stream};
use serde::de::DeserializeOwned;

use crate::{
    bson::{doc, from_document, Document},
    coll::options::{AggregateOptions, ChangeStreamOptions},
    cursor::Cursor,
    error::{Error, ErrorKind, Result},
    operation::{Aggregate, AggregateTarget},
    BoxFuture,
    Client,
};
pub use event::{ChangeStreamEvent, OperationType, ResumeToken};

/// Everything needed to (re)create the aggregation backing a change stream.
#[derive(Clone, Debug)]
pub(crate) struct WatchArgs {
    pub(crate) pipeline: Vec<Document>,
    pub(crate) target: AggregateTarget,
    pub(crate) options: Option<ChangeStreamOptions>,
}

/// A `ChangeStream` streams the ongoing changes of its associated collection
/// or database.
///
/// A change stream transparently resumes from its latest resume token when
/// it encounters a resumable error (a network error, or a server error
/// labeled `ResumableChangeStreamError`), so consumers observe a continuous
/// sequence of events.
///
/// ```rust,no_run
/// # use futures_util::TryStreamExt;
/// # use mongolite::{bson::doc, error::Result, Client};
/// # async fn run() -> Result<()> {
/// # let client = Client::with_uri_str("mongodb://localhost:27017").await?;
/// # let coll = client.database("app").collection("users");
/// let mut change_stream = coll.watch(None, None).await?;
/// while let Some(event) = change_stream.try_next().await? {
///     println!("observed: {:?}", event.operation_type);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ChangeStream<T = ChangeStreamEvent>
where
    T: DeserializeOwned + Unpin,
{
    cursor: Cursor<Document>,
    client: Client,
    args: WatchArgs,

    /// The most recent resume token: the `_id` of the last event returned,
    /// or the latest `postBatchResumeToken` once the current batch drains.
    resume_token: Option<ResumeToken>,

    /// The in-flight re-aggregation replacing a failed cursor, if any.
    pending_resume: Option<BoxFuture<'static, Result<(Cursor<Document>, Option<ResumeToken>)>>>,

    _phantom: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Unpin> ChangeStream<T> {
    pub(crate) fn new(
        cursor: Cursor<Document>,
        client: Client,
        args: WatchArgs,
        resume_token: Option<ResumeToken>,
    ) -> Self {
        Self {
            cursor,
            client,
            args,
            resume_token,
            pending_resume: None,
            _phantom: PhantomData,
        }
    }

    /// Returns the cached resume token that can be used to resume after the
    /// most recently returned change.
    pub fn resume_token(&self) -> Option<&ResumeToken> {
        self.resume_token.as_ref()
    }

    fn start_resume(&mut self) {
        let client = self.client.clone();
        let args = self.args.clone();
        let resume_token = self.resume_token.clone();
        self.pending_resume = Some(Box::pin(async move {
            client.execute_watch_cursor(&args, resume_token).await
        }));
    }
}

impl<T> Stream for ChangeStream<T>
where
    T: DeserializeOwned + Unpin,
{
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(ref mut future) = this.pending_resume {
                match Pin::new(future).poll(cx) {
                    Poll::Ready(Ok((cursor, token))) => {
                        this.pending_resume = None;
                        this.cursor = cursor;
                        if token.is_some() {
                            this.resume_token = token;
                        }
                    }
                    Poll::Ready(Err(error)) => {
                        this.pending_resume = None;
                        return Poll::Ready(Some(Err(error)));
                    }
                    Poll::Pending => return Poll::Pending,
                }
            }

            match Pin::new(&mut this.cursor).poll_next(cx) {
                Poll::Ready(Some(Ok(document))) => {
                    let id = match document.get_document("_id") {
                        Ok(id) => id.clone(),
                        Err(_) => {
                            return Poll::Ready(Some(Err(ErrorKind::MissingResumeToken.into())));
                        }
                    };

                    // once the batch is drained, the server's
                    // postBatchResumeToken supersedes per-event ids
                    let token = if this.cursor.buffer_is_empty() {
                        this.cursor
                            .post_batch_resume_token()
                            .cloned()
                            .map(ResumeToken::from_raw)
                            .unwrap_or_else(|| ResumeToken::from_raw(id.clone()))
                    } else {
                        ResumeToken::from_raw(id.clone())
                    };
                    this.resume_token = Some(token);

                    let item = from_document::<T>(document).map_err(|e| {
                        Error::invalid_response(format!(
                            "invalid change stream event: {}",
                            e
                        ))
                    });
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(Some(Err(error))) if error.is_resumable() => {
                    this.start_resume();
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Client {
    /// Opens a change stream against the given target.
    pub(crate) async fn execute_watch<T: DeserializeOwned + Unpin>(
        &self,
        args: WatchArgs,
    ) -> Result<ChangeStream<T>> {
        let (cursor, initial_token) = self.execute_watch_cursor(&args, None).await?;
        Ok(ChangeStream::new(cursor, self.clone(), args, initial_token))
    }

    /// Runs the aggregation backing a change stream, optionally overriding
    /// the resume point with `resume_token` (used when resuming after an
    /// error).
    pub(crate) async fn execute_watch_cursor(
        &self,
        args: &WatchArgs,
        resume_token: Option<ResumeToken>,
    ) -> Result<(Cursor<Document>, Option<ResumeToken>)> {
        let options = args.options.clone().unwrap_or_default();

        let mut change_stream_stage = doc! {};
        if let Some(ref full_document) = options.full_document {
            change_stream_stage.insert("fullDocument", full_document.clone());
        }
        if let Some(ref full_document_before_change) = options.full_document_before_change {
            change_stream_stage
                .insert("fullDocumentBeforeChange", full_document_before_change.clone());
        }

        match resume_token {
            // resuming after an error always uses resumeAfter with the
            // latest observed token
            Some(token) => {
                change_stream_stage.insert("resumeAfter", token.as_document().clone());
            }
            None => {
                if let Some(ref token) = options.resume_after {
                    change_stream_stage.insert("resumeAfter", token.as_document().clone());
                }
                if let Some(ref token) = options.start_after {
                    change_stream_stage.insert("startAfter", token.as_document().clone());
                }
                if let Some(operation_time) = options.start_at_operation_time {
                    change_stream_stage.insert("startAtOperationTime", operation_time);
                }
            }
        }

        if matches!(args.target, AggregateTarget::Database(ref db) if db == "admin")
            && options.all_changes_for_cluster == Some(true)
        {
            change_stream_stage.insert("allChangesForCluster", true);
        }

        let mut pipeline = vec![doc! { "$changeStream": change_stream_stage }];
        pipeline.extend(args.pipeline.iter().cloned());

        let aggregate_options = AggregateOptions {
            batch_size: options.batch_size,
            max_await_time: options.max_await_time,
            selection_criteria: options.selection_criteria.clone(),
            read_concern: options.read_concern.clone(),
            ..Default::default()
        };

        let mut op = Aggregate::new(args.target.clone(), pipeline, Some(aggregate_options));
        let (spec, session) = self.execute_cursor_operation(&mut op).await?;

        // with an empty first batch, the post-batch token is the stream's
        // starting point; otherwise the configured start point stands
        let initial_token = if spec.initial_buffer.is_empty() {
            spec.post_batch_resume_token
                .clone()
                .map(ResumeToken::from_raw)
        } else {
            None
        }
        .or_else(|| options.start_after.clone())
        .or_else(|| options.resume_after.clone());

        Ok((Cursor::new(self.clone(), spec, session), initial_token))
    }
}
