use crate::{
    bson::Document,
    cmap::{Command, CommandResponse, StreamDescription},
    error::{ErrorKind, Result},
    operation::Operation,
    selection_criteria::SelectionCriteria,
};

#[derive(Debug)]
pub(crate) struct RunCommand {
    db: String,
    command: Document,
    selection_criteria: Option<SelectionCriteria>,
}

impl RunCommand {
    pub(crate) fn new(
        db: impl ToString,
        command: Document,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Self {
        Self {
            db: db.to_string(),
            command,
            selection_criteria,
        }
    }

    fn command_name(&self) -> Option<&str> {
        self.command.keys().next().map(String::as_str)
    }
}

impl Operation for RunCommand {
    type O = Document;

    // The name of the command is the first key of the document provided by
    // the user, so this constant is unused.
    const NAME: &'static str = "";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let command_name = self.command_name().ok_or_else(|| {
            ErrorKind::InvalidArgument {
                message: "an empty document cannot be passed to a run_command operation".into(),
            }
        })?;

        Ok(Command::new(
            command_name,
            self.db.clone(),
            self.command.clone(),
        ))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        Ok(response.raw.clone())
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.selection_criteria.as_ref()
    }

    fn name(&self) -> &str {
        self.command_name().unwrap_or(Self::NAME)
    }
}
