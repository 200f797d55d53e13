use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::{options::DeleteOptions, Namespace},
    error::Result,
    operation::{validate_write_response, Operation, Retryability},
    results::DeleteResult,
};

#[derive(Debug)]
pub(crate) struct Delete {
    ns: Namespace,
    filter: Document,
    limit: u32,
    options: Option<DeleteOptions>,
}

impl Delete {
    /// A `limit` of 0 deletes all matching documents; 1 deletes the first.
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        limit: Option<u32>,
        options: Option<DeleteOptions>,
    ) -> Self {
        Self {
            ns,
            filter,
            limit: limit.unwrap_or(0),
            options,
        }
    }
}

impl Operation for Delete {
    type O = DeleteResult;
    const NAME: &'static str = "delete";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut delete = doc! {
            "q": self.filter.clone(),
            "limit": self.limit,
        };

        if let Some(ref options) = self.options {
            if let Some(ref collation) = options.collation {
                delete.insert("collation", collation.clone());
            }
            if let Some(ref hint) = options.hint {
                delete.insert("hint", hint.clone());
            }
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "ordered": true,
        };

        if let Some(write_concern) = self.write_concern() {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }

        let mut command = Command::new(Self::NAME, self.ns.db.clone(), body);
        command.add_document_sequence("deletes", vec![delete]);
        Ok(command)
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        validate_write_response(response)?;

        let deleted_count = response
            .raw
            .get("n")
            .and_then(Bson::as_integer)
            .unwrap_or(0) as u64;
        Ok(DeleteResult { deleted_count })
    }

    fn write_concern(&self) -> Option<&crate::concern::WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        if self.limit == 1 {
            Retryability::Write
        } else {
            Retryability::None
        }
    }
}
