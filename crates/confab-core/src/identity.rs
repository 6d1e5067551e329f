//! Peer identities and key fingerprints.
//!
//! A peer is addressed by its account id (bare JID-like string) plus the
//! resource the conversation currently talks to. The fingerprint is the
//! opaque key identifier reported by the encrypted transport for the
//! current session and is what out-of-band verification confirms.

use crate::logging::RedactedHex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Account identifier of a conversation peer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Create from any string-like account id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Cryptographic key fingerprint of a peer. Immutable once observed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    /// Create from raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Human-readable form, hex split into groups of 8 for verbal comparison.
    pub fn to_display(&self) -> String {
        self.to_hex()
            .as_bytes()
            .chunks(8)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", RedactedHex(&self.to_hex()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_display_groups() {
        let fp = Fingerprint::from_bytes(vec![0xab; 20]);
        let shown = fp.to_display();
        assert_eq!(shown.split(' ').count(), 5);
        assert!(shown.starts_with("abababab "));
    }

    #[test]
    fn test_fingerprint_debug_is_redacted() {
        let fp = Fingerprint::from_bytes(vec![0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0]);
        let dbg = format!("{:?}", fp);
        assert!(dbg.contains("1234...def0"));
        assert!(!dbg.contains("9abc"));
    }

    #[test]
    fn test_peer_id_display() {
        let peer = PeerId::new("alice@example.org");
        assert_eq!(peer.to_string(), "alice@example.org");
        assert_eq!(PeerId::from("alice@example.org"), peer);
    }
}
