use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey, Signature};
use crate::linked_data::Cid;

/// Prefix of every signed byte string, so a record signature can never
///  be replayed as a signature over something else
const SIGNING_DOMAIN: &[u8] = b"cairn-record:";

/// Path prefix of a record payload
const PAYLOAD_PREFIX: &str = "/ipfs/";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record signature does not verify")]
    SignatureInvalid,
    #[error("record expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("record is not valid before {0}")]
    NotYetValid(DateTime<Utc>),
    #[error("record is signed by {0}, not the identity being resolved")]
    WrongKey(PublicKey),
    #[error("invalid record payload: {0}")]
    Payload(String),
    #[error("record encoding error: {0}")]
    Encoding(String),
}

/// Half-open window `[start, end)` in which a record may be used.
///  Kept at millisecond precision, which is what gets signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validity {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
}

impl Validity {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: truncate_ms(start),
            end: truncate_ms(end),
        }
    }

    pub fn starting_now(lifetime: Duration) -> Self {
        let now = Utc::now();
        Self::new(now, now + lifetime)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

fn truncate_ms(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// A signed, versioned binding of an identity to a CID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRecord {
    /// UTF-8 path to the target, `/ipfs/<cid>`
    pub payload: Vec<u8>,
    pub signature: Signature,
    pub sequence: u64,
    pub validity: Validity,
    /// The identity that signed the record
    pub public_key: PublicKey,
}

impl NameRecord {
    /// Sign a record pointing at `cid`, valid from now for `lifetime`
    pub fn sign(secret: &SecretKey, cid: &Cid, sequence: u64, lifetime: Duration) -> Self {
        Self::sign_with_validity(secret, cid, sequence, Validity::starting_now(lifetime))
    }

    pub fn sign_with_validity(
        secret: &SecretKey,
        cid: &Cid,
        sequence: u64,
        validity: Validity,
    ) -> Self {
        let payload = format!("{}{}", PAYLOAD_PREFIX, cid).into_bytes();
        let signature = secret.sign(&signing_bytes(&payload, sequence, &validity));
        Self {
            payload,
            signature,
            sequence,
            validity,
            public_key: secret.public(),
        }
    }

    /// The CID named by the payload
    pub fn target(&self) -> Result<Cid, RecordError> {
        let path = std::str::from_utf8(&self.payload)
            .map_err(|_| RecordError::Payload("payload is not utf-8".to_string()))?;
        let cid = path
            .strip_prefix(PAYLOAD_PREFIX)
            .ok_or_else(|| RecordError::Payload(format!("unexpected path {}", path)))?;
        Cid::parse(cid).map_err(|e| RecordError::Payload(e.to_string()))
    }

    /// Check the record is signed by `identity`, verifies, is valid at
    ///  `now` and names a CID. Returns that CID.
    pub fn verify(&self, identity: &PublicKey, now: DateTime<Utc>) -> Result<Cid, RecordError> {
        if &self.public_key != identity {
            return Err(RecordError::WrongKey(self.public_key));
        }
        let message = signing_bytes(&self.payload, self.sequence, &self.validity);
        identity
            .verify(&message, &self.signature)
            .map_err(|_| RecordError::SignatureInvalid)?;
        if now < self.validity.start {
            return Err(RecordError::NotYetValid(self.validity.start));
        }
        if now >= self.validity.end {
            return Err(RecordError::Expired(self.validity.end));
        }
        self.target()
    }

    /// Verify against the record's own key, for relays that route by it
    pub fn verify_self(&self, now: DateTime<Utc>) -> Result<Cid, RecordError> {
        self.verify(&self.public_key, now)
    }

    pub fn encode(&self) -> Result<Vec<u8>, RecordError> {
        bincode::serialize(self).map_err(|e| RecordError::Encoding(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        bincode::deserialize(bytes).map_err(|e| RecordError::Encoding(e.to_string()))
    }
}

fn signing_bytes(payload: &[u8], sequence: u64, validity: &Validity) -> Vec<u8> {
    let mut message = Vec::with_capacity(SIGNING_DOMAIN.len() + payload.len() + 24);
    message.extend_from_slice(SIGNING_DOMAIN);
    message.extend_from_slice(payload);
    message.extend_from_slice(&sequence.to_be_bytes());
    message.extend_from_slice(&validity.start.timestamp_millis().to_be_bytes());
    message.extend_from_slice(&validity.end.timestamp_millis().to_be_bytes());
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid() -> Cid {
        Cid::raw(b"Hello World ZPP@")
    }

    #[test]
    fn test_sign_and_verify() {
        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &cid(), 3, Duration::hours(1));
        assert_eq!(record.sequence, 3);
        assert_eq!(record.verify(&secret.public(), Utc::now()).unwrap(), cid());
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &cid(), 3, Duration::hours(1));

        let mut bumped = record.clone();
        bumped.sequence = 4;
        assert_eq!(
            bumped.verify(&secret.public(), Utc::now()),
            Err(RecordError::SignatureInvalid)
        );

        let mut retargeted = record.clone();
        retargeted.payload = format!("/ipfs/{}", Cid::raw(b"other")).into_bytes();
        assert_eq!(
            retargeted.verify(&secret.public(), Utc::now()),
            Err(RecordError::SignatureInvalid)
        );

        let mut extended = record;
        extended.validity.end += Duration::days(365);
        assert_eq!(
            extended.verify(&secret.public(), Utc::now()),
            Err(RecordError::SignatureInvalid)
        );
    }

    #[test]
    fn test_validity_window() {
        let secret = SecretKey::generate();
        let now = Utc::now();
        let expired = NameRecord::sign_with_validity(
            &secret,
            &cid(),
            0,
            Validity::new(now - Duration::hours(2), now - Duration::hours(1)),
        );
        assert!(matches!(
            expired.verify(&secret.public(), now),
            Err(RecordError::Expired(_))
        ));

        let future = NameRecord::sign_with_validity(
            &secret,
            &cid(),
            0,
            Validity::new(now + Duration::hours(1), now + Duration::hours(2)),
        );
        assert!(matches!(
            future.verify(&secret.public(), now),
            Err(RecordError::NotYetValid(_))
        ));
    }

    #[test]
    fn test_wrong_identity() {
        let secret = SecretKey::generate();
        let other = SecretKey::generate().public();
        let record = NameRecord::sign(&secret, &cid(), 0, Duration::hours(1));
        assert_eq!(
            record.verify(&other, Utc::now()),
            Err(RecordError::WrongKey(secret.public()))
        );
    }

    #[test]
    fn test_encoding_keeps_signature_valid() {
        let secret = SecretKey::generate();
        let record = NameRecord::sign(&secret, &cid(), 7, Duration::hours(1));
        let decoded = NameRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
        assert!(decoded.verify_self(Utc::now()).is_ok());
    }

    #[test]
    fn test_bad_payload() {
        let secret = SecretKey::generate();
        let mut record = NameRecord::sign(&secret, &cid(), 0, Duration::hours(1));
        record.payload = b"/ipns/elsewhere".to_vec();
        assert!(matches!(record.target(), Err(RecordError::Payload(_))));
    }
}
