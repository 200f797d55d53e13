use crate::{
    bson::{doc, Bson},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::{options::EstimatedDocumentCountOptions, Namespace},
    error::{Error, Result},
    operation::{append_options, Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

/// The `count` command, used for collection-metadata-based estimated counts.
#[derive(Debug)]
pub(crate) struct EstimatedDocumentCount {
    ns: Namespace,
    options: Option<EstimatedDocumentCountOptions>,
}

impl EstimatedDocumentCount {
    pub(crate) fn new(ns: Namespace, options: Option<EstimatedDocumentCountOptions>) -> Self {
        Self { ns, options }
    }
}

impl Operation for EstimatedDocumentCount {
    type O = u64;
    const NAME: &'static str = "count";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };
        append_options(&mut body, self.options.as_ref())?;

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        response
            .raw
            .get("n")
            .and_then(Bson::as_integer)
            .map(|n| n as u64)
            .ok_or_else(|| Error::invalid_response("server reply is missing the n field"))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options
            .as_ref()
            .and_then(|opts| opts.selection_criteria.as_ref())
    }

    fn supports_read_concern(&self) -> bool {
        true
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
