use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::{
        options::{FindOneAndDeleteOptions, FindOneAndUpdateOptions, ReturnDocument},
        Namespace,
    },
    error::Result,
    operation::{
        append_options,
        update::UpdateOrReplace,
        validate_write_response,
        Operation,
        Retryability,
    },
};

#[derive(Debug)]
enum Modification {
    Delete,
    Update(UpdateOrReplace),
}

#[derive(Debug)]
pub(crate) struct FindAndModify {
    ns: Namespace,
    query: Document,
    modification: Modification,
    update_options: Option<FindOneAndUpdateOptions>,
    delete_options: Option<FindOneAndDeleteOptions>,
}

impl FindAndModify {
    pub(crate) fn with_update(
        ns: Namespace,
        query: Document,
        update: UpdateOrReplace,
        options: Option<FindOneAndUpdateOptions>,
    ) -> Self {
        FindAndModify {
            ns,
            query,
            modification: Modification::Update(update),
            update_options: options,
            delete_options: None,
        }
    }

    pub(crate) fn with_delete(
        ns: Namespace,
        query: Document,
        options: Option<FindOneAndDeleteOptions>,
    ) -> Self {
        FindAndModify {
            ns,
            query,
            modification: Modification::Delete,
            update_options: None,
            delete_options: options,
        }
    }
}

impl Operation for FindAndModify {
    type O = Option<Document>;
    const NAME: &'static str = "findAndModify";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "query": self.query.clone(),
        };

        match &self.modification {
            Modification::Delete => {
                body.insert("remove", true);
            }
            Modification::Update(update) => {
                body.insert("update", update.to_bson()?);
            }
        }

        if let Some(ref options) = self.update_options {
            if let Some(return_document) = options.return_document {
                body.insert(
                    "new",
                    matches!(return_document, ReturnDocument::After),
                );
            }
            if let Some(upsert) = options.upsert {
                body.insert("upsert", upsert);
            }
            if let Some(ref sort) = options.sort {
                body.insert("sort", sort.clone());
            }
            if let Some(ref projection) = options.projection {
                body.insert("fields", projection.clone());
            }
            if let Some(ref write_concern) = options.write_concern {
                if !write_concern.is_empty() {
                    body.insert("writeConcern", write_concern.to_document());
                }
            }
        }

        if let Some(ref options) = self.delete_options {
            if let Some(ref sort) = options.sort {
                body.insert("sort", sort.clone());
            }
            if let Some(ref projection) = options.projection {
                body.insert("fields", projection.clone());
            }
            if let Some(ref write_concern) = options.write_concern {
                if !write_concern.is_empty() {
                    body.insert("writeConcern", write_concern.to_document());
                }
            }
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        validate_write_response(response)?;

        // the server reports "no matching document" as { value: null };
        // normalize both shapes to None rather than surfacing an error
        match response.raw.get("value") {
            Some(Bson::Document(doc)) => Ok(Some(doc.clone())),
            Some(Bson::Null) | None => Ok(None),
            Some(other) => Err(crate::error::Error::invalid_response(format!(
                "expected the value field to hold a document, got {:?}",
                other
            ))),
        }
    }

    fn write_concern(&self) -> Option<&crate::concern::WriteConcern> {
        self.update_options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
            .or_else(|| {
                self.delete_options
                    .as_ref()
                    .and_then(|options| options.write_concern.as_ref())
            })
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ServerAddress;

    fn response(raw: Document) -> CommandResponse {
        CommandResponse {
            source: ServerAddress::default(),
            raw,
        }
    }

    #[test]
    fn no_match_normalizes_to_none() {
        let op = FindAndModify::with_delete(Namespace::new("db", "coll"), doc! {}, None);

        let not_found = response(doc! { "ok": 1, "value": null });
        assert_eq!(op.handle_response(&not_found).unwrap(), None);

        let missing = response(doc! { "ok": 1 });
        assert_eq!(op.handle_response(&missing).unwrap(), None);

        let found = response(doc! { "ok": 1, "value": { "x": 1 } });
        assert_eq!(op.handle_response(&found).unwrap(), Some(doc! { "x": 1 }));
    }
}
