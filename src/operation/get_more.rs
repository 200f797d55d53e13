use crate::{
    bson::doc,
    cmap::{Command, CommandResponse, StreamDescription},
    cursor::CursorInformation,
    error::Result,
    operation::{Operation, Retryability},
    results::GetMoreResult,
    selection_criteria::SelectionCriteria,
};

#[derive(Debug)]
pub(crate) struct GetMore {
    info: CursorInformation,
    selection_criteria: SelectionCriteria,
}

impl GetMore {
    pub(crate) fn new(info: CursorInformation) -> Self {
        // getMore must go to the server that created the cursor
        let selection_criteria = SelectionCriteria::from_address(info.address.clone());
        Self {
            info,
            selection_criteria,
        }
    }
}

impl Operation for GetMore {
    type O = GetMoreResult;
    const NAME: &'static str = "getMore";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.info.id,
            "collection": self.info.ns.coll.clone(),
        };

        if let Some(batch_size) = self.info.batch_size {
            if batch_size != 0 {
                body.insert("batchSize", batch_size as i32);
            }
        }

        if let Some(max_time) = self.info.max_time {
            body.insert(
                "maxTimeMS",
                i64::try_from(max_time.as_millis()).unwrap_or(i64::MAX),
            );
        }

        Ok(Command::new(Self::NAME, self.info.ns.db.clone(), body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        let cursor = response
            .raw
            .get_document("cursor")
            .map_err(|_| crate::error::Error::invalid_response("reply is missing cursor"))?;

        let id = cursor
            .get_i64("id")
            .map_err(|_| crate::error::Error::invalid_response("reply is missing cursor.id"))?;
        let batch = cursor
            .get_array("nextBatch")
            .map_err(|_| {
                crate::error::Error::invalid_response("reply is missing cursor.nextBatch")
            })?
            .iter()
            .filter_map(|doc| doc.as_document().cloned())
            .collect();
        let post_batch_resume_token = cursor.get_document("postBatchResumeToken").ok().cloned();

        Ok(GetMoreResult {
            batch,
            exhausted: id == 0,
            post_batch_resume_token,
        })
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
