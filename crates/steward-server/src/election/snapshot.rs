use crate::membership::MembershipRecord;
use sha2::{Digest, Sha256};
use steward_core::store::Node;
use tracing::warn;

/// Ordered view of every live membership record at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub members: Vec<MembershipRecord>,
}

impl Snapshot {
    /// Parse and order a listing of the pods directory.
    ///
    /// Records are sorted by sequence number, so the result does not depend on
    /// the order the store returned them in. Unreadable records are skipped.
    pub fn from_nodes(nodes: &[Node]) -> Self {
        let mut members: Vec<MembershipRecord> = nodes
            .iter()
            .filter(|node| !node.value.is_empty())
            .filter_map(|node| match serde_json::from_str(&node.value) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(key = %node.key, error = %e, "unreadable membership record skipped");
                    None
                }
            })
            .collect();
        members.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.key.cmp(&b.key)));
        Self { members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Canonical JSON array, the `$PODS` handed to the callback.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.members)
    }

    /// Hex SHA-256 of [`Snapshot::to_json`].
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        Ok(digest_of(&self.to_json()?))
    }
}

pub(crate) fn digest_of(json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(key: &str, seq: i64, payload: serde_json::Value) -> Node {
        Node {
            key: format!("/steward/app/pods/{key}"),
            value: json!({"key": key, "role": "db", "seq": seq, "payload": payload}).to_string(),
            index: 0,
        }
    }

    #[test]
    fn test_digest_is_independent_of_listing_order() {
        let a = node("a", 2, json!({"x": 1}));
        let b = node("b", 0, json!({}));
        let c = node("c", 1, json!({"y": [1, 2]}));

        let forward = Snapshot::from_nodes(&[a.clone(), b.clone(), c.clone()]);
        let backward = Snapshot::from_nodes(&[c, a, b]);
        assert_eq!(forward, backward);
        assert_eq!(forward.digest().unwrap(), backward.digest().unwrap());

        let seqs: Vec<i64> = forward.members.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_payload_change_changes_digest() {
        let before = Snapshot::from_nodes(&[node("a", 0, json!({"v": 1})), node("b", 1, json!({}))]);
        let after = Snapshot::from_nodes(&[node("a", 0, json!({"v": 2})), node("b", 1, json!({}))]);
        assert_ne!(before.digest().unwrap(), after.digest().unwrap());
    }

    #[test]
    fn test_unreadable_records_are_skipped() {
        let broken = Node {
            key: "/steward/app/pods/x".into(),
            value: "{".into(),
            index: 0,
        };
        let snapshot = Snapshot::from_nodes(&[broken, node("a", 0, json!({}))]);
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_empty_snapshot_digest() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.to_json().unwrap(), "[]");
        assert_eq!(
            snapshot.digest().unwrap(),
            "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945"
        );
    }
}
