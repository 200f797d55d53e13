pub mod options;

use std::{collections::HashMap, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    bson::{doc, Array, Bson, Document},
    change_stream::{ChangeStream, ChangeStreamEvent, WatchArgs},
    concern::{ReadConcern, WriteConcern},
    cursor::{Cursor, SessionCursor},
    error::{ErrorKind, Result},
    operation::{
        Aggregate,
        Delete,
        Distinct,
        EstimatedDocumentCount,
        Find,
        FindAndModify,
        Insert,
        ListIndexes,
        RunCommand,
        Update,
        UpdateOrReplace,
    },
    options::{
        AggregateOptions,
        ChangeStreamOptions,
        CollectionOptions,
        CountOptions,
        DeleteOptions,
        DistinctOptions,
        EstimatedDocumentCountOptions,
        FindOneAndDeleteOptions,
        FindOneAndUpdateOptions,
        FindOneOptions,
        FindOptions,
        InsertManyOptions,
        InsertOneOptions,
        UpdateOptions,
    },
    results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult},
    selection_criteria::SelectionCriteria,
    ClientSession,
    Database,
};

/// A struct modeling the canonical name for a collection in MongoDB.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Construct a `Namespace` from the given database and collection names.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self {
                db: db.to_string(),
                coll: coll.to_string(),
            }),
            _ => Err(ErrorKind::InvalidArgument {
                message: format!("invalid namespace: {:?}", s),
            }
            .into()),
        }
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A handle for a collection in the database. [`Collection`]s can be
/// obtained through a [`Database`] by calling
/// [`Database::collection`].
///
/// `Collection` uses [`std::sync::Arc`] internally (through its `Client`),
/// so it can be shared safely across threads or async tasks, and cloning is
/// cheap.
#[derive(Clone, Debug)]
pub struct Collection {
    db: Database,
    name: String,
    selection_criteria: Option<SelectionCriteria>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

impl Collection {
    pub(crate) fn new(db: Database, name: &str, options: Option<CollectionOptions>) -> Self {
        let options = options.unwrap_or_default();
        Self {
            selection_criteria: options
                .selection_criteria
                .or_else(|| db.selection_criteria().cloned()),
            read_concern: options.read_concern.or_else(|| db.read_concern().cloned()),
            write_concern: options
                .write_concern
                .or_else(|| db.write_concern().cloned()),
            db,
            name: name.to_string(),
        }
    }

    fn client(&self) -> &crate::Client {
        self.db.client()
    }

    /// Gets the name of the `Collection`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the namespace of the `Collection`, which includes the name of
    /// the database containing it.
    pub fn namespace(&self) -> Namespace {
        Namespace {
            db: self.db.name().to_string(),
            coll: self.name.clone(),
        }
    }

    /// Gets the selection criteria of the `Collection`.
    pub fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    /// Gets the read concern of the `Collection`.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }

    /// Gets the write concern of the `Collection`.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn resolve_find_options(&self, options: Option<FindOptions>) -> Option<FindOptions> {
        let mut options = options.unwrap_or_default();
        if options.selection_criteria.is_none() {
            options.selection_criteria = self.selection_criteria.clone();
        }
        if options.read_concern.is_none() {
            options.read_concern = self.read_concern.clone();
        }
        Some(options)
    }

    fn resolve_write_concern(&self, write_concern: &mut Option<WriteConcern>) {
        if write_concern.is_none() {
            *write_concern = self.write_concern.clone();
        }
        // an empty write concern is equivalent to none at all, leaving the
        // server default in effect
        if write_concern
            .as_ref()
            .map(WriteConcern::is_empty)
            .unwrap_or(false)
        {
            *write_concern = None;
        }
    }

    /// Finds the documents in the collection matching `filter`, returning a
    /// [`Cursor`] over the results.
    pub async fn find(&self, filter: Document) -> Result<Cursor> {
        self.find_with_options(filter, None).await
    }

    /// Finds the documents in the collection matching `filter` with the
    /// provided options.
    pub async fn find_with_options(
        &self,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Cursor> {
        let options = self.resolve_find_options(options.into());
        let mut op = Find::new(self.namespace(), filter, options);
        let (spec, session) = self.client().execute_cursor_operation(&mut op).await?;
        Ok(Cursor::new(self.client().clone(), spec, session))
    }

    /// Finds the documents in the collection matching `filter` using the
    /// provided session.
    pub async fn find_with_session(
        &self,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
        session: &mut ClientSession,
    ) -> Result<SessionCursor> {
        let options = self.resolve_find_options(options.into());
        let mut op = Find::new(self.namespace(), filter, options);
        let spec = self.client().execute_operation(&mut op, session).await?;
        Ok(SessionCursor::new(self.client().clone(), spec))
    }

    /// Finds a single document in the collection matching `filter`.
    pub async fn find_one(&self, filter: Document) -> Result<Option<Document>> {
        self.find_one_with_options(filter, None).await
    }

    /// Finds a single document in the collection matching `filter` with the
    /// provided options.
    pub async fn find_one_with_options(
        &self,
        filter: Document,
        options: impl Into<Option<FindOneOptions>>,
    ) -> Result<Option<Document>> {
        let options: FindOptions = options.into().unwrap_or_default().into();
        let options = self.resolve_find_options(Some(options));
        let mut op = Find::new(self.namespace(), filter, options);
        let (spec, _session) = self.client().execute_cursor_operation(&mut op).await?;
        Ok(spec.initial_buffer.into_iter().next())
    }

    /// Inserts `document` into the collection.
    ///
    /// If the document is missing an `_id` field, one is generated and
    /// reported in the result; a caller-provided `_id` is used verbatim.
    pub async fn insert_one(&self, document: Document) -> Result<InsertOneResult> {
        self.insert_one_common(document, None, None).await
    }

    /// Inserts `document` into the collection with the provided options.
    pub async fn insert_one_with_options(
        &self,
        document: Document,
        options: impl Into<Option<InsertOneOptions>>,
    ) -> Result<InsertOneResult> {
        self.insert_one_common(document, options.into(), None).await
    }

    /// Inserts `document` into the collection using the provided session.
    pub async fn insert_one_with_session(
        &self,
        document: Document,
        session: &mut ClientSession,
    ) -> Result<InsertOneResult> {
        self.insert_one_common(document, None, Some(session)).await
    }

    async fn insert_one_common(
        &self,
        document: Document,
        options: Option<InsertOneOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<InsertOneResult> {
        let mut write_concern = options.and_then(|options| options.write_concern);
        self.resolve_write_concern(&mut write_concern);

        let insert_options = InsertManyOptions {
            ordered: None,
            write_concern,
        };
        let mut op = Insert::new(self.namespace(), vec![document], Some(insert_options));
        let result = self.client().execute_operation(&mut op, session).await?;

        let inserted_id = result
            .inserted_ids
            .get(&0)
            .cloned()
            .unwrap_or(Bson::Null);
        Ok(InsertOneResult { inserted_id })
    }

    /// Inserts the documents in `docs` into the collection.
    pub async fn insert_many(
        &self,
        docs: impl IntoIterator<Item = Document>,
    ) -> Result<InsertManyResult> {
        self.insert_many_with_options(docs, None).await
    }

    /// Inserts the documents in `docs` into the collection with the provided
    /// options.
    ///
    /// Documents are submitted in batches sized to the server's limits, so a
    /// single call may issue several `insert` commands.
    pub async fn insert_many_with_options(
        &self,
        docs: impl IntoIterator<Item = Document>,
        options: impl Into<Option<InsertManyOptions>>,
    ) -> Result<InsertManyResult> {
        let mut options = options.into().unwrap_or_default();
        self.resolve_write_concern(&mut options.write_concern);

        let documents: Vec<Document> = docs.into_iter().collect();
        if documents.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "no documents were provided to insert_many".to_string(),
            }
            .into());
        }

        let mut inserted_ids = HashMap::new();
        let mut n_attempted = 0;

        while n_attempted < documents.len() {
            let mut op = Insert::new(
                self.namespace(),
                documents[n_attempted..].to_vec(),
                Some(options.clone()),
            );
            let result = self.client().execute_operation(&mut op, None).await?;

            let n_batch = result.inserted_ids.len();
            if n_batch == 0 {
                break;
            }
            inserted_ids.extend(
                result
                    .inserted_ids
                    .into_iter()
                    .map(|(index, id)| (index + n_attempted, id)),
            );
            n_attempted += n_batch;
        }

        Ok(InsertManyResult { inserted_ids })
    }

    /// Updates the first document in the collection matching `query` with
    /// the update operators in `update`.
    pub async fn update_one(&self, query: Document, update: Document) -> Result<UpdateResult> {
        self.update_common(query, UpdateOrReplace::UpdateModifications(update), false, None, None)
            .await
    }

    /// Updates the first matching document using the provided options.
    pub async fn update_one_with_options(
        &self,
        query: Document,
        update: Document,
        options: impl Into<Option<UpdateOptions>>,
    ) -> Result<UpdateResult> {
        self.update_common(
            query,
            UpdateOrReplace::UpdateModifications(update),
            false,
            options.into(),
            None,
        )
        .await
    }

    /// Updates the first matching document using the provided session.
    pub async fn update_one_with_session(
        &self,
        query: Document,
        update: Document,
        session: &mut ClientSession,
    ) -> Result<UpdateResult> {
        self.update_common(
            query,
            UpdateOrReplace::UpdateModifications(update),
            false,
            None,
            Some(session),
        )
        .await
    }

    /// Updates every document in the collection matching `query`.
    pub async fn update_many(&self, query: Document, update: Document) -> Result<UpdateResult> {
        self.update_common(query, UpdateOrReplace::UpdateModifications(update), true, None, None)
            .await
    }

    /// Replaces the first document in the collection matching `query` with
    /// `replacement`.
    pub async fn replace_one(
        &self,
        query: Document,
        replacement: Document,
    ) -> Result<UpdateResult> {
        self.update_common(query, UpdateOrReplace::Replacement(replacement), false, None, None)
            .await
    }

    async fn update_common(
        &self,
        query: Document,
        update: UpdateOrReplace,
        multi: bool,
        options: Option<UpdateOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<UpdateResult> {
        let mut options = options.unwrap_or_default();
        self.resolve_write_concern(&mut options.write_concern);

        let mut op = Update::new(self.namespace(), query, update, multi, Some(options));
        self.client().execute_operation(&mut op, session).await
    }

    /// Deletes up to one document found matching `query`.
    pub async fn delete_one(&self, query: Document) -> Result<DeleteResult> {
        self.delete_common(query, Some(1), None, None).await
    }

    /// Deletes up to one document found matching `query` using the provided
    /// session.
    pub async fn delete_one_with_session(
        &self,
        query: Document,
        session: &mut ClientSession,
    ) -> Result<DeleteResult> {
        self.delete_common(query, Some(1), None, Some(session)).await
    }

    /// Deletes all documents matching `query`.
    pub async fn delete_many(&self, query: Document) -> Result<DeleteResult> {
        self.delete_common(query, None, None, None).await
    }

    /// Deletes all documents matching `query` with the provided options.
    pub async fn delete_many_with_options(
        &self,
        query: Document,
        options: impl Into<Option<DeleteOptions>>,
    ) -> Result<DeleteResult> {
        self.delete_common(query, None, options.into(), None).await
    }

    async fn delete_common(
        &self,
        query: Document,
        limit: Option<u32>,
        options: Option<DeleteOptions>,
        session: Option<&mut ClientSession>,
    ) -> Result<DeleteResult> {
        let mut options = options.unwrap_or_default();
        self.resolve_write_concern(&mut options.write_concern);

        let mut op = Delete::new(self.namespace(), query, limit, Some(options));
        self.client().execute_operation(&mut op, session).await
    }

    /// Atomically finds up to one document in the collection matching
    /// `filter` and updates it. Returns `None` when no document matched.
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        options: impl Into<Option<FindOneAndUpdateOptions>>,
    ) -> Result<Option<Document>> {
        let mut options = options.into().unwrap_or_default();
        self.resolve_write_concern(&mut options.write_concern);

        let mut op = FindAndModify::with_update(
            self.namespace(),
            filter,
            UpdateOrReplace::UpdateModifications(update),
            Some(options),
        );
        self.client().execute_operation(&mut op, None).await
    }

    /// Atomically finds up to one document in the collection matching
    /// `filter` and replaces it. Returns `None` when no document matched.
    pub async fn find_one_and_replace(
        &self,
        filter: Document,
        replacement: Document,
        options: impl Into<Option<FindOneAndUpdateOptions>>,
    ) -> Result<Option<Document>> {
        let mut options = options.into().unwrap_or_default();
        self.resolve_write_concern(&mut options.write_concern);

        let mut op = FindAndModify::with_update(
            self.namespace(),
            filter,
            UpdateOrReplace::Replacement(replacement),
            Some(options),
        );
        self.client().execute_operation(&mut op, None).await
    }

    /// Atomically finds up to one document in the collection matching
    /// `filter` and deletes it. Returns `None` when no document matched.
    pub async fn find_one_and_delete(
        &self,
        filter: Document,
        options: impl Into<Option<FindOneAndDeleteOptions>>,
    ) -> Result<Option<Document>> {
        let mut options = options.into().unwrap_or_default();
        self.resolve_write_concern(&mut options.write_concern);

        let mut op = FindAndModify::with_delete(self.namespace(), filter, Some(options));
        self.client().execute_operation(&mut op, None).await
    }

    /// Finds the distinct values of the field specified by `field_name`
    /// across the collection.
    pub async fn distinct(
        &self,
        field_name: impl AsRef<str>,
        filter: Document,
        options: impl Into<Option<DistinctOptions>>,
    ) -> Result<Array> {
        let mut options = options.into().unwrap_or_default();
        if options.selection_criteria.is_none() {
            options.selection_criteria = self.selection_criteria.clone();
        }
        if options.read_concern.is_none() {
            options.read_concern = self.read_concern.clone();
        }

        let mut op = Distinct::new(
            self.namespace(),
            field_name.as_ref().to_string(),
            filter,
            Some(options),
        );
        self.client().execute_operation(&mut op, None).await
    }

    /// Estimates the number of documents in the collection using collection
    /// metadata.
    pub async fn estimated_document_count(
        &self,
        options: impl Into<Option<EstimatedDocumentCountOptions>>,
    ) -> Result<u64> {
        let mut options = options.into().unwrap_or_default();
        if options.selection_criteria.is_none() {
            options.selection_criteria = self.selection_criteria.clone();
        }
        if options.read_concern.is_none() {
            options.read_concern = self.read_concern.clone();
        }

        let mut op = EstimatedDocumentCount::new(self.namespace(), Some(options));
        self.client().execute_operation(&mut op, None).await
    }

    /// Gets the number of documents matching `filter` by running an
    /// aggregation.
    pub async fn count_documents(
        &self,
        filter: Document,
        options: impl Into<Option<CountOptions>>,
    ) -> Result<u64> {
        let options = options.into().unwrap_or_default();

        let mut pipeline = vec![doc! { "$match": filter }];
        if let Some(skip) = options.skip {
            pipeline.push(doc! { "$skip": skip as i64 });
        }
        if let Some(limit) = options.limit {
            pipeline.push(doc! { "$limit": limit as i64 });
        }
        pipeline.push(doc! { "$group": { "_id": 1, "n": { "$sum": 1 } } });

        let aggregate_options = AggregateOptions {
            max_time: options.max_time,
            read_concern: options
                .read_concern
                .or_else(|| self.read_concern.clone()),
            selection_criteria: options
                .selection_criteria
                .or_else(|| self.selection_criteria.clone()),
            ..Default::default()
        };

        let mut op = Aggregate::new(self.namespace(), pipeline, Some(aggregate_options));
        let (spec, _session) = self.client().execute_cursor_operation(&mut op).await?;

        // an empty result set groups to no documents at all
        match spec.initial_buffer.front() {
            Some(result) => Ok(result
                .get("n")
                .and_then(Bson::as_integer)
                .unwrap_or(0) as u64),
            None => Ok(0),
        }
    }

    /// Runs an aggregation operation, returning a [`Cursor`] over the
    /// resulting documents.
    pub async fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor> {
        let mut options = options.into().unwrap_or_default();
        if options.selection_criteria.is_none() {
            options.selection_criteria = self.selection_criteria.clone();
        }
        if options.read_concern.is_none() {
            options.read_concern = self.read_concern.clone();
        }
        if options.write_concern.is_none() {
            options.write_concern = self.write_concern.clone();
        }

        let mut op = Aggregate::new(self.namespace(), pipeline, Some(options));
        let (spec, session) = self.client().execute_cursor_operation(&mut op).await?;
        Ok(Cursor::new(self.client().clone(), spec, session))
    }

    /// Lists the indexes of the collection.
    pub async fn list_indexes(&self) -> Result<Cursor> {
        let mut op = ListIndexes::new(self.namespace(), None);
        let (spec, session) = self.client().execute_cursor_operation(&mut op).await?;
        Ok(Cursor::new(self.client().clone(), spec, session))
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in
    /// the collection.
    pub async fn watch(
        &self,
        pipeline: impl Into<Option<Vec<Document>>>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> Result<ChangeStream<ChangeStreamEvent>> {
        let mut options = options.into();
        if let Some(ref mut options) = options {
            if options.selection_criteria.is_none() {
                options.selection_criteria = self.selection_criteria.clone();
            }
        }
        let args = WatchArgs {
            pipeline: pipeline.into().unwrap_or_default(),
            target: self.namespace().into(),
            options,
        };
        self.client().execute_watch(args).await
    }

    /// Drops the collection, deleting all data and indexes stored in it.
    pub async fn drop(&self) -> Result<()> {
        let mut body = doc! { "drop": self.name.clone() };
        let mut write_concern = self.write_concern.clone();
        self.resolve_write_concern(&mut write_concern);
        if let Some(write_concern) = write_concern {
            body.insert("writeConcern", write_concern.to_document());
        }

        let mut op = RunCommand::new(self.db.name(), body, None);
        match self.client().execute_operation(&mut op, None).await {
            Ok(_) => Ok(()),
            // "ns not found" means the collection was already absent
            Err(error) if error.sdam_code() == Some(26) => Ok(()),
            Err(error) => Err(error),
        }
    }
}
