use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::linked_data::Cid;

/// Ask a peer for the block named by `cid`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Want {
    pub cid: Cid,
}

/// A peer's answer to a [`Want`]
#[derive(Clone, Serialize, Deserialize)]
pub enum WantReply {
    /// The block bytes, unverified until the requester rehashes them
    Have { data: Vec<u8> },
    DontHave,
}

impl std::fmt::Debug for WantReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WantReply::Have { data } => write!(f, "Have({} bytes)", data.len()),
            WantReply::DontHave => write!(f, "DontHave"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("exchange message error: {0}")]
pub struct MessageError(#[from] bincode::Error);

impl Want {
    pub fn encode(&self) -> Result<Bytes, MessageError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl WantReply {
    pub fn encode(&self) -> Result<Bytes, MessageError> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(bytes)?)
    }
}
