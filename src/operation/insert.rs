use std::collections::HashMap;

use crate::{
    bson::{doc, oid::ObjectId, Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::{options::InsertManyOptions, Namespace},
    error::{ErrorKind, Result},
    operation::{validate_write_response, Operation, Retryability},
    results::InsertManyResult,
};

/// The number of bytes to reserve for the command body and wire framing
/// around the document sequence when sizing a batch.
const COMMAND_OVERHEAD_SIZE: usize = 16 * 1024;

#[derive(Debug)]
pub(crate) struct Insert {
    ns: Namespace,
    documents: Vec<Document>,
    ids: Vec<Bson>,
    inserted_ids: Vec<Bson>,
    options: Option<InsertManyOptions>,
}

impl Insert {
    pub(crate) fn new(
        ns: Namespace,
        documents: Vec<Document>,
        options: Option<InsertManyOptions>,
    ) -> Self {
        // ids are assigned up front so that a retried command resends
        // byte-identical documents. A caller-provided non-null _id is passed
        // through verbatim; otherwise one is generated so the result can
        // report it.
        let mut ids = Vec::with_capacity(documents.len());
        let documents = documents
            .into_iter()
            .map(|mut document| {
                match document.get("_id").cloned() {
                    Some(id) if id != Bson::Null => ids.push(id),
                    _ => {
                        let id = ObjectId::new();
                        let mut with_id = doc! { "_id": id };
                        with_id.extend(document);
                        document = with_id;
                        ids.push(Bson::ObjectId(id));
                    }
                }
                document
            })
            .collect();

        Self {
            ns,
            documents,
            ids,
            inserted_ids: Vec::new(),
            options,
        }
    }
}

impl Operation for Insert {
    type O = InsertManyResult;
    const NAME: &'static str = "insert";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        self.inserted_ids.clear();

        let max_doc_size = description.max_bson_object_size as usize;
        let max_message_size =
            (description.max_message_size_bytes as usize).saturating_sub(COMMAND_OVERHEAD_SIZE);
        let max_write_batch_size = description.max_write_batch_size as usize;

        // each build serializes only what fits in a single command; callers
        // re-invoke the operation with the remainder
        let mut documents = Vec::new();
        let mut current_size = 0;
        for (document, id) in self
            .documents
            .iter()
            .zip(self.ids.iter())
            .take(max_write_batch_size)
        {
            let size = document.encoded_len()?;
            if size > max_doc_size {
                return Err(ErrorKind::DocumentTooLarge {
                    message: format!(
                        "attempted to insert a document of {} bytes, but the server only accepts \
                         documents up to {} bytes",
                        size, max_doc_size
                    ),
                }
                .into());
            }

            if !documents.is_empty() && current_size + size > max_message_size {
                break;
            }

            current_size += size;
            self.inserted_ids.push(id.clone());
            documents.push(document.clone());
        }

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };

        let ordered = self
            .options
            .as_ref()
            .and_then(|options| options.ordered)
            .unwrap_or(true);
        body.insert("ordered", ordered);

        if let Some(write_concern) = self.write_concern() {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }

        let mut command = Command::new(Self::NAME, self.ns.db.clone(), body);
        // large batches ride in a payload type 1 section rather than the
        // command body
        command.add_document_sequence("documents", documents);
        Ok(command)
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        validate_write_response(response)?;

        let inserted_ids: HashMap<usize, Bson> = self
            .inserted_ids
            .iter()
            .cloned()
            .enumerate()
            .collect();
        Ok(InsertManyResult { inserted_ids })
    }

    fn write_concern(&self) -> Option<&crate::concern::WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_id_is_preserved() {
        let mut insert = Insert::new(
            Namespace::new("db", "coll"),
            vec![doc! { "_id": 42, "x": 1 }, doc! { "x": 2 }],
            None,
        );
        let command = insert.build(&StreamDescription::default()).unwrap();

        assert_eq!(insert.inserted_ids[0], Bson::Int32(42));
        assert!(matches!(insert.inserted_ids[1], Bson::ObjectId(..)));

        let documents = &command.document_sequences[0].1;
        assert_eq!(documents[0].get_i32("_id"), Ok(42));
        // generated ids are prepended so they are cheap for the server to
        // locate
        assert_eq!(documents[1].keys().next().map(String::as_str), Some("_id"));
    }

    #[test]
    fn batch_truncated_at_max_write_batch_size() {
        let description = StreamDescription {
            max_write_batch_size: 2,
            ..Default::default()
        };
        let mut insert = Insert::new(
            Namespace::new("db", "coll"),
            vec![doc! { "x": 1 }, doc! { "x": 2 }, doc! { "x": 3 }],
            None,
        );
        let command = insert.build(&description).unwrap();

        assert_eq!(command.document_sequences[0].1.len(), 2);
        assert_eq!(insert.inserted_ids.len(), 2);
    }

    #[test]
    fn batch_truncated_at_max_message_size() {
        let description = StreamDescription {
            max_message_size_bytes: COMMAND_OVERHEAD_SIZE as i32 + 256,
            ..Default::default()
        };
        let mut insert = Insert::new(
            Namespace::new("db", "coll"),
            vec![
                doc! { "x": "y".repeat(200) },
                doc! { "x": "y".repeat(200) },
            ],
            None,
        );
        let command = insert.build(&description).unwrap();

        // the first document always ships, even when it fills the message
        assert_eq!(command.document_sequences[0].1.len(), 1);
        assert_eq!(insert.inserted_ids.len(), 1);
    }

    #[test]
    fn oversized_document_rejected() {
        let description = StreamDescription {
            max_bson_object_size: 64,
            ..Default::default()
        };
        let mut insert = Insert::new(
            Namespace::new("db", "coll"),
            vec![doc! { "x": "y".repeat(128) }],
            None,
        );
        let error = insert.build(&description).unwrap_err();
        assert!(matches!(
            *error.kind,
            ErrorKind::DocumentTooLarge { .. }
        ));
    }
}
