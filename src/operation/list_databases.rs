use crate::{
    bson::{doc, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    error::{Error, Result},
    operation::{Operation, Retryability},
};

#[derive(Debug)]
pub(crate) struct ListDatabases {
    filter: Option<Document>,
    name_only: bool,
}

impl ListDatabases {
    pub(crate) fn new(filter: Option<Document>, name_only: bool) -> Self {
        ListDatabases { filter, name_only }
    }
}

impl Operation for ListDatabases {
    type O = Vec<Document>;
    const NAME: &'static str = "listDatabases";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: 1,
            "nameOnly": self.name_only,
        };

        if let Some(ref filter) = self.filter {
            body.insert("filter", filter.clone());
        }

        Ok(Command::new(Self::NAME, "admin", body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        response
            .raw
            .get_array("databases")
            .map(|databases| {
                databases
                    .iter()
                    .filter_map(|database| database.as_document().cloned())
                    .collect()
            })
            .map_err(|_| Error::invalid_response("server reply is missing the databases field"))
    }

    fn retryability(&self) -> Retryability {
        Retryability::Read
    }
}
