mod abort_transaction;
mod aggregate;
mod commit_transaction;
mod count;
mod delete;
mod distinct;
mod find;
mod find_and_modify;
mod get_more;
mod insert;
mod kill_cursors;
mod list_collections;
mod list_databases;
mod list_indexes;
mod run_command;
mod update;

use std::{collections::VecDeque, fmt::Debug};

use serde::Serialize;

use crate::{
    bson::{self, Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::Namespace,
    concern::WriteConcern,
    error::{Error, ErrorKind, Result, WriteConcernError, WriteError, WriteFailure},
    selection_criteria::SelectionCriteria,
};

pub(crate) use abort_transaction::AbortTransaction;
pub(crate) use aggregate::{Aggregate, AggregateTarget};
pub(crate) use commit_transaction::CommitTransaction;
pub(crate) use count::EstimatedDocumentCount;
pub(crate) use delete::Delete;
pub(crate) use distinct::Distinct;
pub(crate) use find::Find;
pub(crate) use find_and_modify::FindAndModify;
pub(crate) use get_more::GetMore;
pub(crate) use insert::Insert;
pub(crate) use kill_cursors::KillCursors;
pub(crate) use list_collections::ListCollections;
pub(crate) use list_databases::ListDatabases;
pub(crate) use list_indexes::ListIndexes;
pub(crate) use run_command::RunCommand;
pub(crate) use update::{Update, UpdateOrReplace};

/// A trait modeling the behavior of a server-side operation: how its command
/// is built and how its reply is interpreted.
pub(crate) trait Operation {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this
    /// operation. The operation may store additional state required to
    /// handle the response.
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// Interprets the server's (already validated, `ok: 1`) response to the
    /// command.
    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the
    /// server, potentially recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    /// Criteria to use for selecting the server that this operation will be
    /// executed on.
    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        None
    }

    /// Whether or not this operation will request acknowledgment from the
    /// server.
    fn is_acknowledged(&self) -> bool {
        self.write_concern()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true)
    }

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// Returns whether or not this command supports the `readConcern` field.
    fn supports_read_concern(&self) -> bool {
        false
    }

    /// Whether this operation supports sessions or not.
    fn supports_sessions(&self) -> bool {
        true
    }

    /// The level of retryability the operation supports.
    fn retryability(&self) -> Retryability {
        Retryability::None
    }

    /// Updates this operation as needed for a retry.
    fn update_for_retry(&mut self) {}

    fn name(&self) -> &str {
        Self::NAME
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum Retryability {
    Write,
    Read,
    None,
}

/// Appends a serializable struct to the input document. The serializable
/// struct MUST serialize to a document; otherwise, an error will be thrown.
pub(crate) fn append_options<T: Serialize + Debug>(
    doc: &mut Document,
    options: Option<&T>,
) -> Result<()> {
    if let Some(options) = options {
        let options_doc = bson::to_document(options)?;
        doc.extend(options_doc);
    }
    Ok(())
}

/// The shape of the `cursor` sub-document in replies to cursor-producing
/// commands.
#[derive(Debug, Clone)]
pub(crate) struct CursorBody {
    pub(crate) id: i64,
    pub(crate) ns: Namespace,
    pub(crate) first_batch: VecDeque<Document>,
    pub(crate) post_batch_resume_token: Option<Document>,
}

impl CursorBody {
    pub(crate) fn extract(response: &CommandResponse) -> Result<Self> {
        let cursor = response
            .raw
            .get_document("cursor")
            .map_err(|_| missing_field("cursor"))?;

        let id = cursor.get_i64("id").map_err(|_| missing_field("cursor.id"))?;
        let ns: Namespace = cursor
            .get_str("ns")
            .map_err(|_| missing_field("cursor.ns"))?
            .parse()?;
        let first_batch = cursor
            .get_array("firstBatch")
            .map_err(|_| missing_field("cursor.firstBatch"))?
            .iter()
            .filter_map(|doc| doc.as_document().cloned())
            .collect();
        let post_batch_resume_token = cursor
            .get_document("postBatchResumeToken")
            .ok()
            .cloned();

        Ok(Self {
            id,
            ns,
            first_batch,
            post_batch_resume_token,
        })
    }
}

fn missing_field(field: &str) -> Error {
    Error::invalid_response(format!("server reply is missing the {} field", field))
}

/// Examines a write command reply for `writeErrors` and
/// `writeConcernError`, converting them into the error they describe.
pub(crate) fn validate_write_response(response: &CommandResponse) -> Result<()> {
    if let Ok(write_errors) = response.raw.get_array("writeErrors") {
        if let Some(first) = write_errors.first().and_then(Bson::as_document) {
            let write_error: WriteError =
                crate::bson::from_document(first.clone()).map_err(|e| {
                    Error::invalid_response(format!("invalid writeErrors entry: {}", e))
                })?;
            return Err(Error::new(
                ErrorKind::Write(WriteFailure::WriteError(write_error)),
                collect_labels(response),
            ));
        }
    }

    if let Ok(wc_error) = response.raw.get_document("writeConcernError") {
        let wc_error: WriteConcernError = crate::bson::from_document(wc_error.clone())
            .map_err(|e| Error::invalid_response(format!("invalid writeConcernError: {}", e)))?;
        return Err(Error::new(
            ErrorKind::Write(WriteFailure::WriteConcernError(wc_error)),
            collect_labels(response),
        ));
    }

    Ok(())
}

fn collect_labels(response: &CommandResponse) -> Option<Vec<String>> {
    response.raw.get_array("errorLabels").ok().map(|labels| {
        labels
            .iter()
            .filter_map(|label| label.as_str().map(str::to_string))
            .collect()
    })
}

