use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::{options::UpdateOptions, Namespace},
    error::{ErrorKind, Result},
    operation::{validate_write_response, Operation, Retryability},
    results::UpdateResult,
};

/// The non-replace update forms: an update document (`$set`-style operators)
/// or an aggregation pipeline.
#[derive(Clone, Debug)]
pub(crate) enum UpdateOrReplace {
    UpdateModifications(Document),
    Pipeline(Vec<Document>),
    Replacement(Document),
}

impl UpdateOrReplace {
    pub(crate) fn to_bson(&self) -> Result<Bson> {
        match self {
            Self::UpdateModifications(document) | Self::Replacement(document) => {
                Ok(Bson::Document(document.clone()))
            }
            Self::Pipeline(pipeline) => Ok(pipeline.clone().into()),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::UpdateModifications(document) => {
                // update operators all start with '$'
                if let Some(key) = document.keys().next() {
                    if !key.starts_with('$') {
                        return Err(ErrorKind::InvalidArgument {
                            message: "update document must only contain update modifiers".into(),
                        }
                        .into());
                    }
                }
                Ok(())
            }
            Self::Replacement(document) => {
                if let Some(key) = document.keys().next() {
                    if key.starts_with('$') {
                        return Err(ErrorKind::InvalidArgument {
                            message: "replacement document must not contain update modifiers"
                                .into(),
                        }
                        .into());
                    }
                }
                Ok(())
            }
            Self::Pipeline(_) => Ok(()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Update {
    ns: Namespace,
    filter: Document,
    update: UpdateOrReplace,
    multi: Option<bool>,
    options: Option<UpdateOptions>,
}

impl Update {
    pub(crate) fn new(
        ns: Namespace,
        filter: Document,
        update: UpdateOrReplace,
        multi: bool,
        options: Option<UpdateOptions>,
    ) -> Self {
        Self {
            ns,
            filter,
            update,
            multi: Some(multi),
            options,
        }
    }
}

impl Operation for Update {
    type O = UpdateResult;
    const NAME: &'static str = "update";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        self.update.validate()?;

        let mut update = doc! {
            "q": self.filter.clone(),
            "u": self.update.to_bson()?,
        };

        if let Some(ref options) = self.options {
            if let Some(upsert) = options.upsert {
                update.insert("upsert", upsert);
            }
            if let Some(ref array_filters) = options.array_filters {
                update.insert("arrayFilters", array_filters.clone());
            }
            if let Some(ref collation) = options.collation {
                update.insert("collation", collation.clone());
            }
            if let Some(ref hint) = options.hint {
                update.insert("hint", hint.clone());
            }
        }

        if let Some(multi) = self.multi {
            update.insert("multi", multi);
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
        command.add_document_sequence("updates", vec![update]);
        Ok(command)
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        validate_write_response(response)?;

        let matched_count = response
            .raw
            .get("n")
            .and_then(Bson::as_integer)
            .unwrap_or(0) as u64;
        let modified_count = response
            .raw
            .get("nModified")
            .and_then(Bson::as_integer)
            .unwrap_or(0) as u64;

        let upserted_id = response
            .raw
            .get_array("upserted")
            .ok()
            .and_then(|upserted| upserted.first())
            .and_then(Bson::as_document)
            .and_then(|doc| doc.get("_id"))
            .cloned();

        // an upsert inserts rather than matches
        let matched_count = if upserted_id.is_some() {
            0
        } else {
            matched_count
        };

        Ok(UpdateResult {
            matched_count,
            modified_count,
            upserted_id,
        })
    }

    fn write_concern(&self) -> Option<&crate::concern::WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        if self.multi == Some(true) {
            // multi-updates are not single-statement and cannot be safely
            // replayed
            Retryability::None
        } else {
            Retryability::Write
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_updates_are_not_retryable() {
        let single = Update::new(
            Namespace::new("db", "coll"),
            doc! {},
            UpdateOrReplace::UpdateModifications(doc! { "$set": { "x": 1 } }),
            false,
            None,
        );
        assert_eq!(single.retryability(), Retryability::Write);

        let multi = Update::new(
            Namespace::new("db", "coll"),
            doc! {},
            UpdateOrReplace::UpdateModifications(doc! { "$set": { "x": 1 } }),
            true,
            None,
        );
        assert_eq!(multi.retryability(), Retryability::None);
    }

    #[test]
    fn replacement_validation() {
        assert!(UpdateOrReplace::Replacement(doc! { "$set": { "x": 1 } })
            .validate()
            .is_err());
        assert!(UpdateOrReplace::UpdateModifications(doc! { "x": 1 })
            .validate()
            .is_err());
        assert!(UpdateOrReplace::Replacement(doc! { "x": 1 }).validate().is_ok());
    }
}
