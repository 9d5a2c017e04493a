/**
 * Storage layer: content-addressed get/put of
 *  immutable blocks, in memory or on disk.
 */
pub mod blockstore;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - Signing and verification for name records
 */
pub mod crypto;
/**
 * Fetching blocks from peers on a local miss,
 *  and answering other peers' wants.
 */
pub mod exchange;
/**
 * The narrow transport interface the node
 *  consumes, with an iroh-backed implementation
 *  and an in-memory one for tests.
 */
pub mod fabric;
/**
 * Chunking files into blocks and streaming
 *  them back out.
 */
pub mod file;
pub mod keychain;
/**
 * Internal wrapper around CIDs, renamed to
 *  something a little more down-to-earth.
 */
pub mod linked_data;
/**
 * Signed, sequenced name records and the
 *  routing backends that carry them.
 */
pub mod name;
pub mod node;
pub mod testkit;

pub(crate) mod serde_duration;

pub mod prelude {
    pub use crate::blockstore::{BlockStore, FsBlockStore, MemoryBlockStore};
    pub use crate::crypto::{PublicKey, SecretKey};
    pub use crate::fabric::{Fabric, IrohFabric, PeerAddr, PeerId};
    pub use crate::keychain::Keychain;
    pub use crate::linked_data::{Cid, CidError};
    pub use crate::name::{NameRecord, NameService};
    pub use crate::node::{Node, NodeBuilder, NodeConfig, NodeError};
}
