use serde::{Deserialize, Serialize};

use super::FileError;
use crate::linked_data::Cid;

/// Widest an internal node may get; matches the unixfs balanced layout
pub const MAX_LINKS: usize = 174;

/// A link to a child, carrying the number of file bytes beneath it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagLink {
    pub cid: Cid,
    pub size: u64,
}

/// Internal node of a file DAG. Leaves are raw blocks and have no node form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DagNode {
    pub links: Vec<DagLink>,
}

impl DagNode {
    pub fn new(links: Vec<DagLink>) -> Self {
        Self { links }
    }

    /// Total file bytes below this node
    pub fn size(&self) -> u64 {
        self.links.iter().map(|l| l.size).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>, FileError> {
        serde_ipld_dagcbor::to_vec(self).map_err(|e| FileError::Encode(e.to_string()))
    }

    pub fn decode(cid: &Cid, bytes: &[u8]) -> Result<Self, FileError> {
        serde_ipld_dagcbor::from_slice(bytes).map_err(|e| FileError::Decode(*cid, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linked_data::Codec;

    #[test]
    fn test_encoding_is_deterministic() {
        let node = DagNode::new(vec![
            DagLink {
                cid: Cid::raw(b"one"),
                size: 3,
            },
            DagLink {
                cid: Cid::raw(b"two"),
                size: 3,
            },
        ]);
        let a = node.encode().unwrap();
        let b = node.clone().encode().unwrap();
        assert_eq!(a, b);

        let cid = Cid::compute(&a, Default::default(), Codec::DagCbor);
        let decoded = DagNode::decode(&cid, &a).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.size(), 6);
    }

    #[test]
    fn test_decode_garbage() {
        let cid = Cid::raw(b"junk");
        assert!(matches!(
            DagNode::decode(&cid, b"\xff\xff junk").unwrap_err(),
            FileError::Decode(..)
        ));
    }
}
