use serde::{Deserialize, Serialize};

use crate::bson::{doc, Document, Timestamp};

/// Struct modeling a cluster time reported by the server.
///
/// See [the MongoDB documentation](https://www.mongodb.com/docs/manual/core/read-isolation-consistency-recency/)
/// for more information.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ClusterTime {
    /// The logical timestamp of this cluster time.
    pub cluster_time: Timestamp,

    pub(crate) signature: Document,
}

impl ClusterTime {
    /// The document form gossiped on every command.
    pub(crate) fn to_document(&self) -> Document {
        doc! {
            "clusterTime": self.cluster_time,
            "signature": self.signature.clone(),
        }
    }
}

impl std::cmp::PartialEq for ClusterTime {
    fn eq(&self, other: &ClusterTime) -> bool {
        self.cluster_time == other.cluster_time
    }
}

impl std::cmp::Eq for ClusterTime {}

impl std::cmp::Ord for ClusterTime {
    fn cmp(&self, other: &ClusterTime) -> std::cmp::Ordering {
        let lhs = (self.cluster_time.time, self.cluster_time.increment);
        let rhs = (other.cluster_time.time, other.cluster_time.increment);
        lhs.cmp(&rhs)
    }
}

impl std::cmp::PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &ClusterTime) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_time(time: u32, increment: u32) -> ClusterTime {
        ClusterTime {
            cluster_time: Timestamp { time, increment },
            signature: doc! {},
        }
    }

    #[test]
    fn ordering_is_by_timestamp() {
        assert!(cluster_time(1, 1) < cluster_time(1, 2));
        assert!(cluster_time(1, 2) < cluster_time(2, 0));
        assert_eq!(cluster_time(3, 4), cluster_time(3, 4));
    }

    #[test]
    fn wire_round_trip() {
        let original = cluster_time(100, 5);
        let doc = crate::bson::to_document(&original).unwrap();
        assert!(doc.contains_key("clusterTime"));
        let parsed: ClusterTime = crate::bson::from_document(doc).unwrap();
        assert_eq!(parsed, original);
    }
}
