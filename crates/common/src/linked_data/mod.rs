//! Content identifiers
//!
//! A thin wrapper around the `cid` crate, fixing the handful of hash
//!  functions and codecs a node understands. Two CIDs name the same
//!  bytes whenever their multihashes agree; the codec only tells a
//!  reader how to interpret those bytes.

use std::fmt;
use std::str::FromStr;

use multihash::Multihash;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Multicodec code for raw binary leaves
pub const RAW_CODE: u64 = 0x55;
/// Multicodec code for DAG-CBOR
pub const DAG_CBOR_CODE: u64 = 0x71;
/// Multicodec code for DAG-PB (only ever seen on CIDv0 strings)
pub const DAG_PB_CODE: u64 = 0x70;

const SHA2_256_CODE: u64 = 0x12;
const BLAKE3_CODE: u64 = 0x1e;
/// Both supported hash functions produce 32 byte digests
pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CidError {
    #[error("cid parse error: {0}")]
    Parse(String),
    #[error("unsupported hash function: 0x{0:x}")]
    UnsupportedHash(u64),
    #[error("unsupported codec: 0x{0:x}")]
    UnsupportedCodec(u64),
}

impl From<cid::Error> for CidError {
    fn from(err: cid::Error) -> Self {
        CidError::Parse(err.to_string())
    }
}

/// Hash functions a node can address content with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFn {
    #[default]
    Sha2_256,
    Blake3,
}

impl HashFn {
    pub fn code(&self) -> u64 {
        match self {
            HashFn::Sha2_256 => SHA2_256_CODE,
            HashFn::Blake3 => BLAKE3_CODE,
        }
    }

    pub fn from_code(code: u64) -> Result<Self, CidError> {
        match code {
            SHA2_256_CODE => Ok(HashFn::Sha2_256),
            BLAKE3_CODE => Ok(HashFn::Blake3),
            other => Err(CidError::UnsupportedHash(other)),
        }
    }

    /// Hash `data` into a multihash tagged with this function's code
    pub fn digest(&self, data: &[u8]) -> Multihash<64> {
        let digest: [u8; DIGEST_LEN] = match self {
            HashFn::Sha2_256 => Sha256::digest(data).into(),
            HashFn::Blake3 => *blake3::hash(data).as_bytes(),
        };
        // a 32 byte digest always fits the 64 byte multihash
        Multihash::wrap(self.code(), &digest).expect("digest fits in multihash")
    }
}

/// How the bytes behind a CID are to be read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// An opaque leaf chunk
    Raw,
    /// A DAG-CBOR encoded internal file node
    DagCbor,
    /// DAG-PB, only parsed, never produced
    DagPb,
}

impl Codec {
    pub fn code(&self) -> u64 {
        match self {
            Codec::Raw => RAW_CODE,
            Codec::DagCbor => DAG_CBOR_CODE,
            Codec::DagPb => DAG_PB_CODE,
        }
    }

    pub fn from_code(code: u64) -> Result<Self, CidError> {
        match code {
            RAW_CODE => Ok(Codec::Raw),
            DAG_CBOR_CODE => Ok(Codec::DagCbor),
            DAG_PB_CODE => Ok(Codec::DagPb),
            other => Err(CidError::UnsupportedCodec(other)),
        }
    }
}

/// A content identifier: (hash function, digest, codec)
///
/// Equality is structural over the encoded bytes. The string form is the
///  canonical multibase encoding (base32 for v1, base58btc for v0), and
///  `parse`/`to_string` are inverses.
/// Only CIDs over a supported hash function with a full length digest can
///  be constructed, whether parsed, decoded or deserialized.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Cid(cid::Cid);

impl Cid {
    /// Compute the CIDv1 of `data`
    pub fn compute(data: &[u8], hash_fn: HashFn, codec: Codec) -> Self {
        Cid(cid::Cid::new_v1(codec.code(), hash_fn.digest(data)))
    }

    /// CID of a raw leaf hashed with the default hash function
    pub fn raw(data: &[u8]) -> Self {
        Self::compute(data, HashFn::default(), Codec::Raw)
    }

    pub fn parse(s: &str) -> Result<Self, CidError> {
        Self::checked(cid::Cid::try_from(s.trim())?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CidError> {
        Self::checked(cid::Cid::try_from(bytes)?)
    }

    /// Wrap without checking the multihash, for exercising stores with
    ///  identifiers no parser would produce.
    #[cfg(test)]
    pub(crate) fn from_unchecked(inner: cid::Cid) -> Self {
        Cid(inner)
    }

    fn checked(inner: cid::Cid) -> Result<Self, CidError> {
        let hash = inner.hash();
        HashFn::from_code(hash.code())?;
        if hash.digest().len() != DIGEST_LEN {
            return Err(CidError::Parse(format!(
                "expected a {} byte digest, got {}",
                DIGEST_LEN,
                hash.digest().len()
            )));
        }
        Ok(Cid(inner))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes()
    }

    pub fn codec(&self) -> Result<Codec, CidError> {
        Codec::from_code(self.0.codec())
    }

    pub fn hash_fn(&self) -> Result<HashFn, CidError> {
        HashFn::from_code(self.0.hash().code())
    }

    pub fn multihash(&self) -> &Multihash<64> {
        self.0.hash()
    }

    pub fn digest(&self) -> &[u8] {
        self.0.hash().digest()
    }

    /// Whether both CIDs address the same bytes, ignoring codec and version
    pub fn same_content(&self, other: &Cid) -> bool {
        self.multihash() == other.multihash()
    }

    /// The same multihash under another codec
    pub fn with_codec(&self, codec: Codec) -> Self {
        Cid(cid::Cid::new_v1(codec.code(), *self.0.hash()))
    }

    /// Recompute the multihash of `data` with this CID's hash function
    ///  and check it matches.
    pub fn verify(&self, data: &[u8]) -> Result<bool, CidError> {
        let hash_fn = self.hash_fn()?;
        Ok(&hash_fn.digest(data) == self.multihash())
    }

    /// Hex of the multihash, stable across codecs. Used as a storage key.
    pub fn key(&self) -> String {
        hex::encode(self.multihash().to_bytes())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.0)
    }
}

impl FromStr for Cid {
    type Err = CidError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<cid::Cid> for Cid {
    type Error = CidError;
    fn try_from(inner: cid::Cid) -> Result<Self, Self::Error> {
        Self::checked(inner)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let inner = cid::Cid::deserialize(deserializer)?;
        Self::checked(inner).map_err(serde::de::Error::custom)
    }
}

impl From<Cid> for cid::Cid {
    fn from(cid: Cid) -> Self {
        cid.0
    }
}
