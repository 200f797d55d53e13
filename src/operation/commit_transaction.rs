use std::time::Duration;

use crate::{
    bson::doc,
    cmap::{Command, CommandResponse, StreamDescription},
    concern::{Acknowledgment, WriteConcern},
    error::Result,
    operation::{validate_write_response, Operation, Retryability},
    options::TransactionOptions,
};

#[derive(Debug)]
pub(crate) struct CommitTransaction {
    options: Option<TransactionOptions>,

    /// Whether this commit is a retry of an earlier attempt, which upgrades
    /// the write concern to majority.
    is_retry: bool,
}

impl CommitTransaction {
    pub(crate) fn new(options: Option<TransactionOptions>) -> Self {
        Self {
            options,
            is_retry: false,
        }
    }

    /// Mark this commit as a retry of a commit whose outcome is unknown.
    pub(crate) fn update_for_commit_retry(&mut self) {
        self.is_retry = true;
    }
}

impl Operation for CommitTransaction {
    type O = ();
    const NAME: &'static str = "commitTransaction";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: 1,
        };

        let mut write_concern = self
            .options
            .as_ref()
            .and_then(|options| options.write_concern.clone())
            .unwrap_or_default();

        // A commit being retried after an unknown outcome must use a
        // majority write concern with a timeout so it cannot block forever.
        if self.is_retry {
            write_concern.w = Some(Acknowledgment::Majority);
            if write_concern.w_timeout.is_none() {
                write_concern.w_timeout = Some(Duration::from_secs(10));
            }
        }

        if !write_concern.is_empty() {
            body.insert("writeConcern", write_concern.to_document());
        }

        if let Some(max_commit_time) = self
            .options
            .as_ref()
            .and_then(|options| options.max_commit_time)
        {
            body.insert(
                "maxTimeMS",
                i64::try_from(max_commit_time.as_millis()).unwrap_or(i64::MAX),
            );
        }

        Ok(Command::new(Self::NAME, "admin", body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        validate_write_response(response)
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options
            .as_ref()
            .and_then(|options| options.write_concern.as_ref())
    }

    fn update_for_retry(&mut self) {
        self.update_for_commit_retry();
    }

    fn retryability(&self) -> Retryability {
        Retryability::Write
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_upgrades_write_concern_to_majority() {
        let mut commit = CommitTransaction::new(None);
        let body = commit.build(&StreamDescription::default()).unwrap().body;
        assert!(!body.contains_key("writeConcern"));

        commit.update_for_retry();
        let body = commit.build(&StreamDescription::default()).unwrap().body;
        let write_concern = body.get_document("writeConcern").unwrap();
        assert_eq!(write_concern.get_str("w"), Ok("majority"));
        assert!(write_concern.contains_key("wtimeout"));
    }
}
