use crate::{
    bson::doc,
    cmap::{Command, CommandResponse, StreamDescription},
    concern::WriteConcern,
    error::Result,
    operation::{validate_write_response, Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

#[derive(Debug)]
pub(crate) struct AbortTransaction {
    write_concern: Option<WriteConcern>,

    /// In a sharded transaction, the abort must go to the mongos the
    /// transaction is pinned to.
    pinned_selection_criteria: Option<SelectionCriteria>,
}

impl AbortTransaction {
    pub(crate) fn new(
        write_concern: Option<WriteConcern>,
        pinned_selection_criteria: Option<SelectionCriteria>,
    ) -> Self {
        Self {
            write_concern,
            pinned_selection_criteria,
        }
    }
}

impl Operation for AbortTransaction {
    type O = ();
    const NAME: &'static str = "abortTransaction";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: 1,
        };

        if let Some(ref write_concern) = self.write_concern {
            if !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }

        Ok(Command::new(Self::NAME, "admin", body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        validate_write_response(response)
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.pinned_selection_criteria.as_ref()
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern.as_ref()
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}
