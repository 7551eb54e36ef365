//! Concrete id type definitions.

use sha2::{Digest, Sha256};

use crate::define_uuid_id;
use crate::IdError;

define_uuid_id!(PodUuid, "pod");
define_uuid_id!(ObjectUuid, "object");

/// Number of hex characters in a node id.
pub const NODE_ID_LEN: usize = 32;

/// Number of hex characters in an account uuid.
pub const ACCOUNT_UUID_LEN: usize = 64;

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Identifier of a node in the overlay.
///
/// Exactly 32 lowercase hex characters. The value is opaque beyond that;
/// the substrate assigns it when the node connects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// Parses a node id.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.len() != NODE_ID_LEN || !is_lower_hex(s) {
            return Err(IdError::InvalidNodeId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns true if `s` is a well-formed node id.
    pub fn is_valid(s: &str) -> bool {
        Self::parse(s).is_ok()
    }

    /// Generates a random node id.
    #[must_use]
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for NodeId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NodeId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NodeId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Uuid of an account, derived from the account name.
///
/// Every node computes the same uuid for the same name, which is what lets
/// independent nodes converge on one account record without coordination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccountUuid(String);

impl AccountUuid {
    /// Derives the account uuid: lowercase hex of `sha256(name)`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(hex::encode(Sha256::digest(name.as_bytes())))
    }

    /// Parses an already-derived account uuid.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if s.len() != ACCOUNT_UUID_LEN || !is_lower_hex(s) {
            return Err(IdError::InvalidAccountUuid(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns true if this uuid was derived from `name`.
    pub fn matches_name(&self, name: &str) -> bool {
        *self == Self::from_name(name)
    }

    /// Returns the uuid as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for AccountUuid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for AccountUuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for AccountUuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn pod_uuid_roundtrip() {
        let id = PodUuid::new();
        let s = id.to_string();
        let parsed: PodUuid = s.parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(s.len(), 36);
    }

    #[test]
    fn pod_uuid_rejects_garbage() {
        assert!(matches!(
            PodUuid::parse("not-a-uuid"),
            Err(IdError::InvalidUuid { .. })
        ));
        assert_eq!(PodUuid::parse(""), Err(IdError::Empty));
    }

    #[test]
    fn object_uuid_json_roundtrip() {
        let id = ObjectUuid::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ObjectUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn kinds() {
        assert_eq!(PodUuid::KIND, "pod");
        assert_eq!(ObjectUuid::KIND, "object");
    }

    #[test]
    fn node_id_accepts_lower_hex() {
        let id = NodeId::parse("0123456789abcdef0123456789abcdef").unwrap();
        assert_eq!(id.as_str(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn node_id_rejects_bad_input() {
        assert_eq!(NodeId::parse(""), Err(IdError::Empty));
        // uppercase
        assert!(NodeId::parse("0123456789ABCDEF0123456789abcdef").is_err());
        // too short
        assert!(NodeId::parse("0123456789abcdef").is_err());
        // too long
        assert!(NodeId::parse("0123456789abcdef0123456789abcdef0").is_err());
        // non hex
        assert!(NodeId::parse("0123456789abcdef0123456789abcdeg").is_err());
    }

    #[test]
    fn random_node_id_is_valid() {
        for _ in 0..16 {
            let id = NodeId::random();
            assert!(NodeId::is_valid(id.as_str()));
        }
    }

    #[test]
    fn node_id_json_rejects_invalid() {
        let result: Result<NodeId, _> = serde_json::from_str("\"abc\"");
        assert!(result.is_err());
    }

    #[test]
    fn account_uuid_is_sha256_of_name() {
        // sha256("alice")
        let id = AccountUuid::from_name("alice");
        assert_eq!(
            id.as_str(),
            "2bd806c97f0e00af1a1fc3328fa763a9269723c8db8fac4f93af71db186d6e90"
        );
        assert!(id.matches_name("alice"));
        assert!(!id.matches_name("bob"));
    }

    #[test]
    fn account_uuid_parse() {
        let id = AccountUuid::from_name("bob");
        let parsed = AccountUuid::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
        assert!(matches!(
            AccountUuid::parse("abc"),
            Err(IdError::InvalidAccountUuid(_))
        ));
    }

    proptest! {
        #[test]
        fn node_id_parse_matches_shape(s in "[0-9a-zA-Z]{0,40}") {
            let expected = s.len() == NODE_ID_LEN
                && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
            prop_assert_eq!(NodeId::parse(&s).is_ok(), expected);
        }

        #[test]
        fn account_uuid_derivation_is_stable(name in ".{0,64}") {
            let a = AccountUuid::from_name(&name);
            let b = AccountUuid::from_name(&name);
            prop_assert_eq!(&a, &b);
            prop_assert!(AccountUuid::parse(a.as_str()).is_ok());
        }
    }
}
