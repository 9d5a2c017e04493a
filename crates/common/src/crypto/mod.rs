//! Cryptographic primitives for cairn
//!
//! - **Identity**: every node owns an Ed25519 keypair (`SecretKey`/`PublicKey`).
//!   The public half doubles as the node's peer id on the fabric.
//! - **Names**: the same key type signs name records. A name *is* a public key;
//!   whoever holds the matching secret key may publish under it.
//!
//! Keys are thin wrappers around iroh's key types so that a `PublicKey` can be
//!  handed straight to an iroh endpoint when dialing.

mod keys;

pub use ed25519_dalek::Signature;
pub use keys::{KeyError, PublicKey, SecretKey, PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
