use crate::{
    bson::{doc, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    cursor::CursorSpecification,
    error::Result,
    operation::{CursorBody, Operation, Retryability},
};

#[derive(Debug)]
pub(crate) struct ListCollections {
    db: String,
    filter: Option<Document>,
    name_only: bool,
    batch_size: Option<u32>,
}

impl ListCollections {
    pub(crate) fn new(
        db: String,
        filter: Option<Document>,
        name_only: bool,
        batch_size: Option<u32>,
    ) -> Self {
        Self {
            db,
            filter,
            name_only,
            batch_size,
        }
    }
}

impl Operation for ListCollections {
    type O = CursorSpecification;
    const NAME: &'static str = "listCollections";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: 1,
        };

        let mut name_only = self.name_only;
        if let Some(ref filter) = self.filter {
            body.insert("filter", filter.clone());

            // a filter on collection metadata requires the full payload
            if name_only && filter.keys().any(|key| key != "name") {
                name_only = false;
            }
        }
        body.insert("nameOnly", name_only);

        let mut cursor = doc! {};
        if let Some(batch_size) = self.batch_size {
            cursor.insert("batchSize", batch_size as i32);
        }
        body.insert("cursor", cursor);

        Ok(Command::new(Self::NAME, self.db.clone(), body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        let body = CursorBody::extract(response)?;
        Ok(CursorSpecification::new(
            body,
            response.source_address().clone(),
            self.batch_size,
            None,
        ))
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
