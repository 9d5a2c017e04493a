use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{FabricError, PeerId};

/// How to reach a peer: its identity plus any known direct addresses.
///
/// Text form is `<peer-id>` or `<peer-id>@<ip:port>[,<ip:port>...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    pub id: PeerId,
    pub addrs: Vec<SocketAddr>,
}

impl PeerAddr {
    pub fn new(id: PeerId, addrs: Vec<SocketAddr>) -> Self {
        Self { id, addrs }
    }

    /// Fold another address set for the same peer into this one
    pub fn merge(&mut self, other: &PeerAddr) {
        for addr in &other.addrs {
            if !self.addrs.contains(addr) {
                self.addrs.push(*addr);
            }
        }
    }
}

impl From<PeerId> for PeerAddr {
    fn from(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)?;
        if !self.addrs.is_empty() {
            let addrs: Vec<String> = self.addrs.iter().map(|a| a.to_string()).collect();
            write!(f, "@{}", addrs.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for PeerAddr {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addrs) = match s.trim().split_once('@') {
            Some((id, addrs)) => (id, Some(addrs)),
            None => (s.trim(), None),
        };
        let id = PeerId::from_hex(id).map_err(|e| FabricError::InvalidAddr(e.to_string()))?;
        let addrs = match addrs {
            Some(addrs) => addrs
                .split(',')
                .filter(|a| !a.is_empty())
                .map(|a| {
                    a.parse::<SocketAddr>()
                        .map_err(|e| FabricError::InvalidAddr(format!("{}: {}", a, e)))
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        Ok(Self { id, addrs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_parse_and_format() {
        let id = SecretKey::generate().public();
        let text = format!("{}@127.0.0.1:4001,[::1]:4002", id);
        let addr: PeerAddr = text.parse().unwrap();
        assert_eq!(addr.id, id);
        assert_eq!(addr.addrs.len(), 2);
        assert_eq!(addr.to_string(), text);

        let bare: PeerAddr = id.to_string().parse().unwrap();
        assert!(bare.addrs.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("nope@127.0.0.1:1".parse::<PeerAddr>().is_err());
        let id = SecretKey::generate().public();
        assert!(format!("{}@not-an-addr", id).parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_merge_dedups() {
        let id = SecretKey::generate().public();
        let mut a = PeerAddr::new(id, vec!["127.0.0.1:1".parse().unwrap()]);
        let b = PeerAddr::new(
            id,
            vec!["127.0.0.1:1".parse().unwrap(), "127.0.0.1:2".parse().unwrap()],
        );
        a.merge(&b);
        assert_eq!(a.addrs.len(), 2);
    }
}
