use crate::{
    bson::{doc, Bson, Document},
    cmap::{Command, CommandResponse, StreamDescription},
    coll::{options::AggregateOptions, Namespace},
    cursor::CursorSpecification,
    error::Result,
    operation::{append_options, CursorBody, Operation, Retryability},
    selection_criteria::SelectionCriteria,
};

/// What an aggregation runs against: a whole database (e.g. for
/// `$changeStream` on a database or `$currentOp`) or a single collection.
#[derive(Clone, Debug)]
pub(crate) enum AggregateTarget {
    Database(String),
    Collection(Namespace),
}

impl AggregateTarget {
    pub(crate) fn db_name(&self) -> &str {
        match self {
            AggregateTarget::Database(db) => db.as_str(),
            AggregateTarget::Collection(ns) => ns.db.as_str(),
        }
    }

    fn aggregate_field(&self) -> Bson {
        match self {
            // an aggregate of the whole database uses the literal 1
            AggregateTarget::Database(_) => Bson::Int32(1),
            AggregateTarget::Collection(ns) => Bson::String(ns.coll.clone()),
        }
    }
}

impl From<Namespace> for AggregateTarget {
    fn from(ns: Namespace) -> Self {
        AggregateTarget::Collection(ns)
    }
}

#[derive(Debug)]
pub(crate) struct Aggregate {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
}

impl Aggregate {
    pub(crate) fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        options: Option<AggregateOptions>,
    ) -> Self {
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options,
        }
    }

    /// Whether the pipeline ends in a writing stage ($out or $merge), which
    /// makes the aggregation unretryable and primary-only.
    fn is_out_or_merge(&self) -> bool {
        self.pipeline
            .last()
            .map(|stage| stage.contains_key("$out") || stage.contains_key("$merge"))
            .unwrap_or(false)
    }
}

impl Operation for Aggregate {
    type O = CursorSpecification;
    const NAME: &'static str = "aggregate";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.target.aggregate_field(),
            "pipeline": self.pipeline.clone(),
        };
        append_options(&mut body, self.options.as_ref())?;

        let mut cursor = doc! {};
        if let Some(batch_size) = self.options.as_ref().and_then(|opts| opts.batch_size) {
            if !self.is_out_or_merge() {
                cursor.insert("batchSize", batch_size);
            }
        }
        body.insert("cursor", cursor);

        if let Some(ref write_concern) = self.options.as_ref().and_then(|o| o.write_concern.clone())
        {
            if self.is_out_or_merge() && !write_concern.is_empty() {
                body.insert("writeConcern", write_concern.to_document());
            }
        }

        Ok(Command::new(Self::NAME, self.target.db_name(), body))
    }

    fn handle_response(&self, response: &CommandResponse) -> Result<Self::O> {
        let body = CursorBody::extract(response)?;

        Ok(CursorSpecification::new(
            body,
            response.source_address().clone(),
            self.options.as_ref().and_then(|opts| opts.batch_size),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
        ))
    }

    fn selection_criteria(&self) -> Option<&SelectionCriteria> {
        self.options
            .as_ref()
            .and_then(|opts| opts.selection_criteria.as_ref())
    }

    fn supports_read_concern(&self) -> bool {
        !self.is_out_or_merge()
    }

    fn retryability(&self) -> Retryability {
        if self.is_out_or_merge() {
            Retryability::None
        } else {
            Retryability::Read
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_and_merge_are_not_retryable() {
        let ns = Namespace::new("db", "coll");
        let plain = Aggregate::new(ns.clone(), vec![doc! { "$match": {} }], None);
        assert_eq!(plain.retryability(), Retryability::Read);

        let out = Aggregate::new(
            ns.clone(),
            vec![doc! { "$match": {} }, doc! { "$out": "dest" }],
            None,
        );
        assert_eq!(out.retryability(), Retryability::None);
        assert!(!out.supports_read_concern());

        let merge = Aggregate::new(
            ns,
            vec![doc! { "$merge": { "into": "dest" } }],
            None,
        );
        assert_eq!(merge.retryability(), Retryability::None);
    }
}
