//! Options for the operations available on a
//! [`Collection`](crate::Collection).

use std::time::Duration;

use serde::Serialize;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document, Timestamp},
    change_stream::event::ResumeToken,
    concern::{ReadConcern, WriteConcern},
    selection_criteria::SelectionCriteria,
    serde_util,
};

/// The default options for a [`Collection`](crate::Collection), inherited
/// from its [`Database`](crate::Database) where unset.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct CollectionOptions {
    /// The default read preference for operations.
    pub selection_criteria: Option<SelectionCriteria>,

    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies whether a cursor is tailable, tailable and awaiting data, or
/// non-tailable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum CursorType {
    /// A regular, single-pass cursor that closes once its results are
    /// exhausted.
    NonTailable,

    /// A cursor on a capped collection that stays alive after its results
    /// are exhausted and can be polled for more.
    Tailable,

    /// A tailable cursor whose getMores block up to `max_await_time` waiting
    /// for new data.
    TailableAwait,
}

/// Which version of the document `find_one_and_update` and
/// `find_one_and_replace` return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReturnDocument {
    /// Return the document after modification.
    After,

    /// Return the document before modification.
    Before,
}

/// Specifies the options to a [`Collection::find`](crate::Collection::find)
/// operation.
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOptions {
    /// Enables writing to temporary files by the server when executing the
    /// query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serde_util::serialize_u32_option_as_i32"
    )]
    pub batch_size: Option<u32>,

    /// The maximum number of documents to query. A negative value means a
    /// single batch of that size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    /// The number of documents to skip before counting.
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serde_util::serialize_u64_option_as_i64"
    )]
    pub skip: Option<u64>,

    /// The order of the documents for the purposes of the operation. Build
    /// it with the [`doc!`](crate::bson::doc) macro to preserve the order of
    /// the sort keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,

    /// Limits the fields of the document being returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<Document>,

    /// A document or string that allows the server to determine which index
    /// to use.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<Bson>,

    /// The maximum amount of time for the server to spend on the operation.
    #[serde(
        rename = "maxTimeMS",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The maximum amount of time for the server to wait on new documents
    /// per getMore on a tailable await cursor.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The type of cursor to return.
    #[serde(skip)]
    pub cursor_type: Option<CursorType>,

    /// The read concern for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_concern: Option<ReadConcern>,

    /// The criteria used to select a server for the operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a
/// [`Collection::find_one`](crate::Collection::find_one) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct FindOneOptions {
    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// The number of documents to skip.
    pub skip: Option<u64>,

    /// The maximum amount of time for the server to spend on the operation.
    pub max_time: Option<Duration>,

    /// The read concern for the operation.
    pub read_concern: Option<ReadConcern>,

    /// The criteria used to select a server for the operation.
    pub selection_criteria: Option<SelectionCriteria>,
}

impl From<FindOneOptions> for FindOptions {
    fn from(options: FindOneOptions) -> Self {
        FindOptions {
            limit: Some(-1),
            sort: options.sort,
            projection: options.projection,
            skip: options.skip,
            max_time: options.max_time,
            read_concern: options.read_concern,
            selection_criteria: options.selection_criteria,
            ..Default::default()
        }
    }
}

/// Specifies the options to a
/// [`Collection::aggregate`](crate::Collection::aggregate) operation.
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Enables writing to temporary files by the server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_disk_use: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    #[serde(skip)]
    pub batch_size: Option<u32>,

    /// The maximum amount of time for the server to spend on the operation.
    #[serde(
        rename = "maxTimeMS",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The maximum amount of time for the server to wait on new documents
    /// per getMore on a change stream.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// The read concern for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_concern: Option<ReadConcern>,

    /// The write concern for `$out`/`$merge` pipelines.
    #[serde(skip)]
    pub write_concern: Option<WriteConcern>,

    /// The criteria used to select a server for the operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a
/// [`Collection::insert_many`](crate::Collection::insert_many) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct InsertManyOptions {
    /// Whether the writes should be performed in order, stopping at the
    /// first failure. Defaults to true.
    pub ordered: Option<bool>,

    /// The write concern for the operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a
/// [`Collection::insert_one`](crate::Collection::insert_one) operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct InsertOneOptions {
    /// The write concern for the operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to an update operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct UpdateOptions {
    /// Filters specifying to which array elements an update applies.
    pub array_filters: Option<Vec<Document>>,

    /// Whether a new document should be created if no document matches the
    /// filter.
    pub upsert: Option<bool>,

    /// The collation for the operation.
    pub collation: Option<Document>,

    /// A document or string that allows the server to determine which index
    /// to use.
    pub hint: Option<Bson>,

    /// The write concern for the operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a delete operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct DeleteOptions {
    /// The collation for the operation.
    pub collation: Option<Document>,

    /// A document or string that allows the server to determine which index
    /// to use.
    pub hint: Option<Bson>,

    /// The write concern for the operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a
/// [`Collection::find_one_and_update`](crate::Collection::find_one_and_update)
/// operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct FindOneAndUpdateOptions {
    /// Whether the modified or the original document is returned. Defaults
    /// to the original.
    pub return_document: Option<ReturnDocument>,

    /// Whether a new document should be created if no document matches the
    /// filter.
    pub upsert: Option<bool>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// The write concern for the operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a
/// [`Collection::find_one_and_delete`](crate::Collection::find_one_and_delete)
/// operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct FindOneAndDeleteOptions {
    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// The write concern for the operation.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a
/// [`Collection::distinct`](crate::Collection::distinct) operation.
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DistinctOptions {
    /// The maximum amount of time for the server to spend on the operation.
    #[serde(
        rename = "maxTimeMS",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The read concern for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_concern: Option<ReadConcern>,

    /// The criteria used to select a server for the operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a
/// [`Collection::estimated_document_count`](crate::Collection::estimated_document_count)
/// operation.
#[derive(Clone, Debug, Default, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct EstimatedDocumentCountOptions {
    /// The maximum amount of time for the server to spend on the operation.
    #[serde(
        rename = "maxTimeMS",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serde_util::serialize_duration_option_as_int_millis"
    )]
    pub max_time: Option<Duration>,

    /// The read concern for the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_concern: Option<ReadConcern>,

    /// The criteria used to select a server for the operation.
    #[serde(skip)]
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a
/// [`Collection::count_documents`](crate::Collection::count_documents)
/// operation.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct CountOptions {
    /// The number of documents to skip before counting.
    pub skip: Option<u64>,

    /// The maximum number of documents to count.
    pub limit: Option<u64>,

    /// The maximum amount of time for the server to spend on the operation.
    pub max_time: Option<Duration>,

    /// The read concern for the operation.
    pub read_concern: Option<ReadConcern>,

    /// The criteria used to select a server for the operation.
    pub selection_criteria: Option<SelectionCriteria>,
}

/// Specifies the options to a `watch` operation, which opens a change
/// stream.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    /// Configures how the `full_document` field of change events is
    /// populated; one of "default", "updateLookup", "whenAvailable" or
    /// "required".
    pub full_document: Option<String>,

    /// Configures how the `full_document_before_change` field of change
    /// events is populated.
    pub full_document_before_change: Option<String>,

    /// Directs the stream to start reporting changes that occur directly
    /// after the event the provided token points to.
    pub resume_after: Option<ResumeToken>,

    /// Like `resume_after`, but the stream may also report the event the
    /// token points to.
    pub start_after: Option<ResumeToken>,

    /// Directs the stream to report changes that occurred at or after the
    /// given cluster time.
    pub start_at_operation_time: Option<Timestamp>,

    /// Watch all changes in the cluster rather than a single database or
    /// collection. Only valid against the `admin` database.
    pub all_changes_for_cluster: Option<bool>,

    /// The number of change events the server should return per batch.
    pub batch_size: Option<u32>,

    /// The maximum amount of time for the server to wait for new changes per
    /// getMore.
    pub max_await_time: Option<Duration>,

    /// The read concern for the underlying aggregation.
    pub read_concern: Option<ReadConcern>,

    /// The criteria used to select a server for the underlying aggregation.
    pub selection_criteria: Option<SelectionCriteria>,
}
