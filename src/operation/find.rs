use crate::{
    bson::{doc, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::{
        options::{CursorType, FindOptions},
        Namespace,
    },
    cursor::CursorSpecification,
    error::Result,
    operation::{append_options, CursorBody, Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

#[derive(Debug)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<FindOptions>,
}

impl Find {
    pub(crate) fn new(ns: Namespace, filter: Document, options: Option<FindOptions>) -> Self {
        Self {
            ns,
            filter,
            options,
        }
    }

    fn cursor_type(&self) -> CursorType {
        self.options
            .as_ref()
            .and_then(|opts| opts.cursor_type)
            .unwrap_or(CursorType::NonTailable)
    }
}

impl Operation for Find {
    type O = CursorSpecification;
    const NAME: &'static str = "find";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
        };
        append_options(&mut body, self.options.as_ref())?;

        body.insert("filter", self.filter.clone());

        match self.cursor_type() {
            CursorType::Tailable => {
                body.insert("tailable", true);
            }
            CursorType::TailableAwait => {
                body.insert("tailable", true);
                body.insert("awaitData", true);
            }
            CursorType::NonTailable => {}
        }

        // negative limits request a single batch, per the CRUD spec
        if let Some(limit) = self.options.as_ref().and_then(|opts| opts.limit) {
            if limit < 0 {
                body.insert("singleBatch", true);
                body.insert("limit", limit.abs());
            }
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        let body = CursorBody::extract(response)?;

        let max_await_time = match self.cursor_type() {
            CursorType::TailableAwait => {
                self.options.as_ref().and_then(|opts| opts.max_await_time)
            }
            _ => None,
        };

        Ok(CursorSpecification::new(
            body,
            response.source_address().clone(),
            self.options.as_ref().and_then(|opts| opts.batch_size),
            max_await_time,
        ))
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
