use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Document},
    change_stream::{ChangeStream, ChangeStreamEvent, WatchArgs},
    coll::{options::CollectionOptions, Collection},
    concern::{ReadConcern, WriteConcern},
    cursor::Cursor,
    error::Result,
    operation::{AggregateTarget, ListCollections, RunCommand},
    options::ChangeStreamOptions,
    results::CollectionSpecification,
    selection_criteria::SelectionCriteria,
    Client,
};

/// The default options for a [`Database`], inherited from its
/// [`Client`](crate::Client) where unset.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into, strip_option)))]
#[non_exhaustive]
pub struct DatabaseOptions {
    /// The default read preference for operations.
    pub selection_criteria: Option<SelectionCriteria>,

    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,
}

/// A handle for a database in a MongoDB deployment.
///
/// `Database` uses [`std::sync::Arc`] internally (through its `Client`), so
/// it can be shared safely across threads or async tasks, and cloning is
/// cheap.
#[derive(Clone, Debug)]
pub struct Database {
    client: Client,
    name: String,
    selection_criteria: Option<SelectionCriteria>,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str, options: Option<DatabaseOptions>) -> Self {
        let options = options.unwrap_or_default();

        Self {
            selection_criteria: options
                .selection_criteria
                .or_else(|| client.selection_criteria().cloned()),
            read_concern: options
                .read_concern
                .or_else(|| client.read_concern().cloned()),
            write_concern: options
                .write_concern
                .or_else(|| client.write_concern().cloned()),
            client,
            name: name.to_string(),
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    /// Gets the name of the `Database`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gets the default selection criteria of the `Database`.
    pub fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    /// Gets the default read concern of the `Database`.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.read_concern.as_ref()
    }

    /// Gets the default write concern of the `Database`.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    /// Gets a handle to a collection specified by `name` of the database.
    /// The `Collection` options (e.g. read preference and write concern)
    /// will default to those of the `Database`.
    ///
    /// This method does not send or receive anything across the wire to the
    /// database, so it can be used repeatedly without incurring any costs
    /// from I/O.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name, None)
    }

    /// Gets a handle to a collection specified by `name` with the given
    /// options.
    pub fn collection_with_options(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Collection {
        Collection::new(self.clone(), name, Some(options))
    }

    /// Gets information about each of the collections in the database.
    pub async fn list_collections(
        &self,
        filter: impl Into<Option<Document>>,
    ) -> Result<Cursor<CollectionSpecification>> {
        let mut op = ListCollections::new(self.name.clone(), filter.into(), false, None);
        let (spec, session) = self.client.execute_cursor_operation(&mut op).await?;
        Ok(Cursor::<Document>::new(self.client.clone(), spec, session).with_type())
    }

    /// Gets the names of the collections in the database.
    pub async fn list_collection_names(
        &self,
        filter: impl Into<Option<Document>>,
    ) -> Result<Vec<String>> {
        use futures_util::TryStreamExt;

        let mut op = ListCollections::new(self.name.clone(), filter.into(), true, None);
        let (spec, session) = self.client.execute_cursor_operation(&mut op).await?;
        let mut cursor = Cursor::<Document>::new(self.client.clone(), spec, session);

        let mut names = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            names.push(
                doc.get_str("name")
                    .map(str::to_string)
                    .map_err(|_| crate::error::Error::invalid_response("expected a name field"))?,
            );
        }
        Ok(names)
    }

    /// Runs a database-level command.
    ///
    /// Note that no inspection is done on `doc`, so the command will not use
    /// the database's default read concern or write concern.
    pub async fn run_command(
        &self,
        command: Document,
        selection_criteria: impl Into<Option<SelectionCriteria>>,
    ) -> Result<Document> {
        let mut op = RunCommand::new(self.name.clone(), command, selection_criteria.into());
        self.client.execute_operation(&mut op, None).await
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in
    /// the database.
    pub async fn watch(
        &self,
        pipeline: impl Into<Option<Vec<Document>>>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> Result<ChangeStream<ChangeStreamEvent>> {
        let args = WatchArgs {
            pipeline: pipeline.into().unwrap_or_default(),
            target: AggregateTarget::Database(self.name.clone()),
            options: options.into(),
        };
        self.client.execute_watch(args).await
    }

    /// Drops the database, deleting all data and collections stored in it.
    pub async fn drop(&self) -> Result<()> {
        let mut body = doc! { "dropDatabase": 1 };
        if let Some(ref write_concern) = self.write_concern {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }

        let mut op = RunCommand::new(self.name.clone(), body, None);
        self.client.execute_operation(&mut op, None).await?;
        Ok(())
    }
}
