use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

// Participant identity = wallet address, lowercased. Sole addressing key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(ProtocolError::EmptyIdentity);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(10)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// The smaller identity of a pair is the polite peer.
    pub fn is_polite_towards(&self, other: &Identity) -> bool {
        self < other
    }
}

impl TryFrom<String> for Identity {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Identity::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names one pairing. Unique per match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChatId(pub Uuid);

impl ChatId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ChatId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which policy produced a pairing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Tokens,
    Random,
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMode::Tokens => f.write_str("tokens"),
            MatchMode::Random => f.write_str("random"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_case_normalized() {
        let a = Identity::parse("  0xABCdef01 ").unwrap();
        let b = Identity::parse("0xabcdef01").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcdef01");
    }

    #[test]
    fn test_empty_identity_rejected() {
        assert!(Identity::parse("   ").is_err());
    }

    #[test]
    fn test_identity_deserialize_normalizes() {
        let id: Identity = serde_json::from_str("\"0xFEED\"").unwrap();
        assert_eq!(id.as_str(), "0xfeed");
        assert!(serde_json::from_str::<Identity>("\"\"").is_err());
    }

    #[test]
    fn test_politeness_is_antisymmetric() {
        let a = Identity::parse("0xaaa").unwrap();
        let b = Identity::parse("0xbbb").unwrap();
        assert!(a.is_polite_towards(&b));
        assert!(!b.is_polite_towards(&a));
    }

    #[test]
    fn test_short_identity() {
        let id = Identity::parse("0x1234567890abcdef").unwrap();
        assert_eq!(id.short(), "0x12345678");
        let tiny = Identity::parse("0x1").unwrap();
        assert_eq!(tiny.short(), "0x1");
    }
}
