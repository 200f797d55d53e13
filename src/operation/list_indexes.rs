use crate::{
    bson::doc,
    cmap::{Command, CommandResponse, StreamDescription},
    coll::Namespace,
    cursor::CursorSpecification,
    error::Result,
    operation::{CursorBody, Operation, Retryability},
};

#[derive(Debug)]
pub(crate) struct ListIndexes {
    ns: Namespace,
    batch_size: Option<u32>,
}

impl ListIndexes {
    pub(crate) fn new(ns: Namespace, batch_size: Option<u32>) -> Self {
        ListIndexes { ns, batch_size }
    }
}

impl Operation for ListIndexes {
    type O = CursorSpecification;
    const NAME: &'static str = "listIndexes";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };

        let mut cursor = doc! {};
        if let Some(batch_size) = self.batch_size {
            cursor.insert("batchSize", batch_size as i32);
        }
        body.insert("cursor", cursor);

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
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
