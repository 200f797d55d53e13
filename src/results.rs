//! Contains the types of results returned by CRUD operations.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::bson::{Bson, Document};

/// The result of an insert of a single document.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertOneResult {
    /// The `_id` field of the document inserted.
    pub inserted_id: Bson,
}

/// The result of an insert of multiple documents.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The `_id` field of the documents inserted, keyed by their index in
    /// the input.
    pub inserted_ids: HashMap<usize, Bson>,
}

/// The result of an update operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateResult {
    /// The number of documents that matched the filter.
    pub matched_count: u64,

    /// The number of documents that were modified by the operation.
    pub modified_count: u64,

    /// The `_id` field of the upserted document, if an upsert took place.
    pub upserted_id: Option<Bson>,
}

/// The result of a delete operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeleteResult {
    /// The number of documents deleted by the operation.
    pub deleted_count: u64,
}

/// Describes a database in the deployment, as reported by `listDatabases`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DatabaseSpecification {
    /// The name of the database.
    pub name: String,

    /// The total size of the database in bytes.
    pub size_on_disk: Option<i64>,

    /// Whether the database has any data.
    pub empty: Option<bool>,
}

/// Describes a collection in a database, as reported by `listCollections`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CollectionSpecification {
    /// The name of the collection.
    pub name: String,

    /// The type of the returned namespace: "collection", "view" or
    /// "timeseries".
    #[serde(rename = "type", default)]
    pub collection_type: Option<String>,

    /// Information about the collection.
    #[serde(default)]
    pub info: Option<Document>,

    /// The collection's creation options.
    #[serde(default)]
    pub options: Option<Document>,
}

/// The batch of documents returned by a `getMore` and whether the server-side
/// cursor was exhausted by it.
#[derive(Debug, Clone)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: VecDeque<Document>,
    pub(crate) exhausted: bool,
    pub(crate) post_batch_resume_token: Option<Document>,
}
