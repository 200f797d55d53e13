//! Read preferences and the criteria used during server selection.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{
    bson::{doc, Bson, Document},
    error::{ErrorKind, Result},
    options::ServerAddress,
    sdam::public::ServerInfo,
};

/// Describes which servers are suitable for a given operation.
#[derive(Clone)]
#[non_exhaustive]
pub enum SelectionCriteria {
    /// A read preference that describes the suitable servers based on the
    /// server type, max staleness, and server tags.
    ///
    /// See the documentation [here](https://www.mongodb.com/docs/manual/core/read-preference/) for more details.
    ReadPreference(ReadPreference),

    /// A predicate used to filter servers that are considered suitable. A
    /// `server` will be considered suitable by a `predicate` if
    /// `predicate(server)` returns true.
    Predicate(Predicate),
}

impl fmt::Debug for SelectionCriteria {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::ReadPreference(read_pref) => write!(f, "ReadPreference({:?})", read_pref),
            Self::Predicate(..) => f.write_str("Predicate"),
        }
    }
}

impl PartialEq for SelectionCriteria {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::ReadPreference(r1), Self::ReadPreference(r2)) => r1 == r2,
            (Self::Predicate(p1), Self::Predicate(p2)) => Arc::ptr_eq(p1, p2),
            _ => false,
        }
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

impl SelectionCriteria {
    pub(crate) fn as_read_pref(&self) -> Option<&ReadPreference> {
        match self {
            Self::ReadPreference(ref read_pref) => Some(read_pref),
            Self::Predicate(..) => None,
        }
    }

    pub(crate) fn max_staleness(&self) -> Option<Duration> {
        self.as_read_pref().and_then(|pref| pref.max_staleness())
    }

    /// A criteria that matches exactly the server at `address`; used to pin
    /// cursor getMores and sharded transactions to the original server.
    pub(crate) fn from_address(address: ServerAddress) -> Self {
        SelectionCriteria::Predicate(Arc::new(move |server| server.address() == &address))
    }
}

/// A predicate used to filter servers that are considered suitable.
pub type Predicate = Arc<dyn Send + Sync + Fn(&ServerInfo) -> bool>;

/// Specifies how the driver should route a read operation to members of a
/// replica set.
///
/// If applicable, `tag_sets` can be used to target specific nodes in a
/// replica set, and `max_staleness` specifies the maximum lag behind the
/// primary that a secondary can be to remain eligible for the operation. The
/// max staleness value maps to the `maxStalenessSeconds` MongoDB option and
/// will be sent to the server as an integer number of seconds.
///
/// See the [MongoDB docs](https://www.mongodb.com/docs/manual/core/read-preference) for more details.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ReadPreference {
    /// Only route this operation to the primary.
    Primary,

    /// Only route this operation to a secondary.
    Secondary {
        /// Specifications for the desired read preference.
        options: ReadPreferenceOptions,
    },

    /// Route this operation to the primary if it's available, but fall back
    /// to the secondaries if not.
    PrimaryPreferred {
        /// Specifications for the desired read preference.
        options: ReadPreferenceOptions,
    },

    /// Route this operation to a secondary if one is available, but fall
    /// back to the primary if not.
    SecondaryPreferred {
        /// Specifications for the desired read preference.
        options: ReadPreferenceOptions,
    },

    /// Route this operation to the node with the least network latency
    /// regardless of whether it's the primary or a secondary.
    Nearest {
        /// Specifications for the desired read preference.
        options: ReadPreferenceOptions,
    },
}

/// Filtering and staleness options for non-primary read preference modes.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ReadPreferenceOptions {
    /// Specifies which replica set members should be considered for
    /// operations. Each tag set will be checked in order until one or more
    /// servers is found with each tag in the set.
    pub tag_sets: Option<Vec<TagSet>>,

    /// Specifies the maximum amount of lag behind the primary that a
    /// secondary can be to be considered for the given operation.
    ///
    /// If specified, the value must be at least 90 seconds and no less than
    /// the heartbeat frequency plus 10 seconds.
    #[serde(skip)]
    pub max_staleness: Option<Duration>,
}

impl ReadPreference {
    pub(crate) fn mode_str(&self) -> &'static str {
        match self {
            ReadPreference::Primary => "primary",
            ReadPreference::PrimaryPreferred { .. } => "primaryPreferred",
            ReadPreference::Secondary { .. } => "secondary",
            ReadPreference::SecondaryPreferred { .. } => "secondaryPreferred",
            ReadPreference::Nearest { .. } => "nearest",
        }
    }

    pub(crate) fn from_mode_str(mode: &str, options: ReadPreferenceOptions) -> Result<Self> {
        let read_pref = match &mode.to_lowercase()[..] {
            "primary" => {
                if options != ReadPreferenceOptions::default() {
                    return Err(ErrorKind::InvalidArgument {
                        message: "neither tag sets nor max staleness may be specified with the \
                                  primary read preference mode"
                            .to_string(),
                    }
                    .into());
                }
                ReadPreference::Primary
            }
            "primarypreferred" => ReadPreference::PrimaryPreferred { options },
            "secondary" => ReadPreference::Secondary { options },
            "secondarypreferred" => ReadPreference::SecondaryPreferred { options },
            "nearest" => ReadPreference::Nearest { options },
            other => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("invalid read preference mode: {}", other),
                }
                .into());
            }
        };
        Ok(read_pref)
    }

    pub(crate) fn options(&self) -> Option<&ReadPreferenceOptions> {
        match self {
            ReadPreference::Primary => None,
            ReadPreference::Secondary { options }
            | ReadPreference::PrimaryPreferred { options }
            | ReadPreference::SecondaryPreferred { options }
            | ReadPreference::Nearest { options } => Some(options),
        }
    }

    pub(crate) fn tag_sets(&self) -> Option<&Vec<TagSet>> {
        self.options().and_then(|options| options.tag_sets.as_ref())
    }

    pub(crate) fn max_staleness(&self) -> Option<Duration> {
        self.options().and_then(|options| options.max_staleness)
    }

    pub(crate) fn with_tags(mut self, tag_sets: Vec<TagSet>) -> Result<Self> {
        let options = match self {
            ReadPreference::Primary => {
                return Err(ErrorKind::InvalidArgument {
                    message: "read preference tags can only be specified when a non-primary mode \
                              is specified"
                        .to_string(),
                }
                .into());
            }
            ReadPreference::Secondary { ref mut options } => options,
            ReadPreference::PrimaryPreferred { ref mut options } => options,
            ReadPreference::SecondaryPreferred { ref mut options } => options,
            ReadPreference::Nearest { ref mut options } => options,
        };

        options.tag_sets = Some(tag_sets);

        Ok(self)
    }

    pub(crate) fn with_max_staleness(mut self, max_staleness: Duration) -> Result<Self> {
        let options = match self {
            ReadPreference::Primary => {
                return Err(ErrorKind::InvalidArgument {
                    message: "max staleness can only be specified when a non-primary mode is \
                              specified"
                        .to_string(),
                }
                .into());
            }
            ReadPreference::Secondary { ref mut options } => options,
            ReadPreference::PrimaryPreferred { ref mut options } => options,
            ReadPreference::SecondaryPreferred { ref mut options } => options,
            ReadPreference::Nearest { ref mut options } => options,
        };

        options.max_staleness = Some(max_staleness);

        Ok(self)
    }

    /// The `$readPreference` document form sent to mongos.
    pub(crate) fn to_document(&self) -> Document {
        let mut doc = doc! { "mode": self.mode_str() };

        if let Some(max_staleness) = self.max_staleness() {
            doc.insert("maxStalenessSeconds", max_staleness.as_secs() as i64);
        }

        if let Some(tag_sets) = self.tag_sets() {
            let tags: Vec<Bson> = tag_sets
                .iter()
                .map(|tag_set| {
                    Bson::Document(
                        tag_set
                            .iter()
                            .map(|(k, v)| (k.clone(), Bson::String(v.clone())))
                            .collect(),
                    )
                })
                .collect();
            doc.insert("tags", tags);
        }

        doc
    }
}

/// A read preference tag set. See the documentation [here](https://www.mongodb.com/docs/manual/tutorial/configure-replica-set-tag-sets/)
/// for more details.
pub type TagSet = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_rejects_options() {
        assert!(ReadPreference::Primary
            .with_tags(vec![TagSet::new()])
            .is_err());
        assert!(ReadPreference::Primary
            .with_max_staleness(Duration::from_secs(100))
            .is_err());
        assert!(ReadPreference::from_mode_str(
            "primary",
            ReadPreferenceOptions {
                tag_sets: Some(vec![TagSet::new()]),
                max_staleness: None,
            },
        )
        .is_err());
    }

    #[test]
    fn document_form() {
        let pref = ReadPreference::Secondary {
            options: ReadPreferenceOptions {
                tag_sets: Some(vec![[("dc".to_string(), "east".to_string())]
                    .into_iter()
                    .collect()]),
                max_staleness: Some(Duration::from_secs(120)),
            },
        };
        assert_eq!(
            pref.to_document(),
            doc! {
                "mode": "secondary",
                "maxStalenessSeconds": 120i64,
                "tags": [ { "dc": "east" } ],
            }
        );
    }
}
