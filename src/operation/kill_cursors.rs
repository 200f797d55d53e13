use crate::{
    bson::doc,
    cmap::{Command, CommandResponse, StreamDescription},
    coll::Namespace,
    error::Result,
    operation::Operation,
    selection_criteria::SelectionCriteria,
};

#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_ids: Vec<i64>,
    selection_criteria: SelectionCriteria,
}

impl KillCursors {
    pub(crate) fn new(
        ns: Namespace,
        cursor_ids: Vec<i64>,
        address: crate::options::ServerAddress,
    ) -> Self {
        Self {
            ns,
            cursor_ids,
            // only the server that created a cursor can kill it
            selection_criteria: SelectionCriteria::from_address(address),
        }
    }
}

impl Operation for KillCursors {
    type O = ();
    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": self.cursor_ids.clone(),
        };

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, _response: &CommandResponse) -> Result<Self::O> {
        Ok(())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        Some(&self.selection_criteria)
    }

    // killCursors is one of the few commands the server rejects sessions on
    fn supports_sessions(&self) -> bool {
        false
    }
}
