//! Mutable names
//!
//! A name is an ed25519 identity. Its owner binds it to a CID by
//!  signing a [`NameRecord`] with a sequence number that grows with
//!  every publish, and hands the record to each configured
//!  [`RoutingBackend`]. Resolvers query every backend at once, drop
//!  records that do not verify or have lapsed, and take the highest
//!  sequence number left.
//!
//! Two backends exist:
//!  - [`DirectoryBackend`], which puts records on and gets them from
//!    directory servers running a [`DirectoryService`]
//!  - [`BroadcastBackend`], which floods records over a per-identity
//!    topic through every node's [`BroadcastService`]

mod broadcast;
mod directory;
mod record;
mod routing;
mod sequence;
mod service;

pub use broadcast::{topic, BroadcastBackend, BroadcastMessage, BroadcastService, BROADCAST_ALPN};
pub use directory::{
    DirectoryBackend, DirectoryReply, DirectoryRequest, DirectoryService, DIRECTORY_ALPN,
};
pub use record::{NameRecord, RecordError, Validity};
pub use routing::{RoutingBackend, RoutingError};
pub use sequence::{FileSequenceStore, MemorySequenceStore, SequenceError, SequenceStore};
pub use service::{BackendOutcome, NameConfig, NameService, PublishReport};

use crate::crypto::PublicKey;

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("no valid record found for {0}")]
    NotFound(PublicKey),
    #[error("every routing backend failed: {}", summarize(.0))]
    AllBackendsFailed(Vec<BackendOutcome>),
    #[error("record error: {0}")]
    Record(#[from] RecordError),
    #[error("sequence store error: {0}")]
    Sequence(#[from] SequenceError),
    #[error("name error: {0}")]
    Default(#[from] anyhow::Error),
}

fn summarize(outcomes: &[BackendOutcome]) -> String {
    outcomes
        .iter()
        .map(|o| match &o.result {
            Ok(()) => format!("{}: ok", o.backend),
            Err(e) => format!("{}: {}", o.backend, e),
        })
        .collect::<Vec<_>>()
        .join("; ")
}
