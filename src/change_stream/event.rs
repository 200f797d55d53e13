//! Contains the types of change events streamed by a [`ChangeStream`](crate::ChangeStream).

use serde::{Deserialize, Serialize};

use crate::bson::{Document, Timestamp};

/// An opaque token used for resuming an interrupted change stream at the
/// next event after the one the token came from.
///
/// See the documentation
/// [here](https://www.mongodb.com/docs/manual/changeStreams/#change-stream-resume-token) for more
/// information on resume tokens.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResumeToken(pub(crate) Document);

impl ResumeToken {
    pub(crate) fn from_raw(doc: Document) -> ResumeToken {
        ResumeToken(doc)
    }

    pub(crate) fn as_document(&self) -> &Document {
        &self.0
    }
}

/// A generic change event emitted by a change stream.
///
/// See the documentation
/// [here](https://www.mongodb.com/docs/manual/reference/change-events/) for more information.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamEvent {
    /// An opaque token for use when resuming an interrupted change stream.
    #[serde(rename = "_id")]
    pub id: ResumeToken,

    /// Describes the type of operation represented in this change
    /// notification.
    pub operation_type: OperationType,

    /// Identifies the collection or database on which the event occurred.
    pub ns: Option<ChangeNamespace>,

    /// The new name for the `ns` collection, included for
    /// `OperationType::Rename`.
    pub to: Option<ChangeNamespace>,

    /// A `Document` that contains the `_id` of the document created or
    /// modified.
    pub document_key: Option<Document>,

    /// A description of the fields that were updated or removed, included
    /// for `OperationType::Update`.
    pub update_description: Option<UpdateDescription>,

    /// The cluster time at which the event occurred.
    pub cluster_time: Option<Timestamp>,

    /// The most current majority-committed version of the modified document,
    /// present when `full_document` was configured.
    pub full_document: Option<Document>,

    /// The pre-image of the modified document, present when
    /// `full_document_before_change` was configured.
    pub full_document_before_change: Option<Document>,
}

/// The operation type represented in a given change notification.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum OperationType {
    /// See [insert-event](https://www.mongodb.com/docs/manual/reference/change-events/#insert-event)
    Insert,

    /// See [update-event](https://www.mongodb.com/docs/manual/reference/change-events/#update-event)
    Update,

    /// See [replace-event](https://www.mongodb.com/docs/manual/reference/change-events/#replace-event)
    Replace,

    /// See [delete-event](https://www.mongodb.com/docs/manual/reference/change-events/#delete-event)
    Delete,

    /// See [drop-event](https://www.mongodb.com/docs/manual/reference/change-events/#drop-event)
    Drop,

    /// See [rename-event](https://www.mongodb.com/docs/manual/reference/change-events/#rename-event)
    Rename,

    /// See [dropdatabase-event](https://www.mongodb.com/docs/manual/reference/change-events/#dropdatabase-event)
    DropDatabase,

    /// See [invalidate-event](https://www.mongodb.com/docs/manual/reference/change-events/#invalidate-event)
    Invalidate,

    /// A newer operation type this version of the driver does not model.
    #[serde(other)]
    Other,
}

/// Describes the fields that have been updated or removed from a document.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateDescription {
    /// A document containing key-value pairs of names of the fields that
    /// were changed and the new field values.
    pub updated_fields: Document,

    /// An array of field names that were removed from the document.
    pub removed_fields: Vec<String>,

    /// Arrays that were truncated in the document.
    pub truncated_arrays: Option<Vec<Document>>,
}

/// Identifies the collection or database on which an event occurred.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub struct ChangeNamespace {
    /// The name of the database.
    pub db: String,

    /// The name of the collection. Absent for database-level events.
    pub coll: Option<String>,
}
