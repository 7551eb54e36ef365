//! KVS key codec: `"<type>/<uuid>"`.

use thiserror::Error;

use crate::ResourceType;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("key '{0}' has no '/' separator")]
    MissingSeparator(String),

    #[error("key '{key}' has unknown resource type '{prefix}'")]
    UnknownType { key: String, prefix: String },

    #[error("key '{0}' has an empty uuid")]
    EmptyUuid(String),
}

/// A parsed KVS key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub resource_type: ResourceType,
    pub uuid: String,
}

impl ResourceKey {
    pub fn new(resource_type: ResourceType, uuid: impl Into<String>) -> Self {
        Self {
            resource_type,
            uuid: uuid.into(),
        }
    }

    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let (prefix, uuid) = key
            .split_once('/')
            .ok_or_else(|| KeyError::MissingSeparator(key.to_string()))?;
        let resource_type = ResourceType::parse(prefix).ok_or_else(|| KeyError::UnknownType {
            key: key.to_string(),
            prefix: prefix.to_string(),
        })?;
        if uuid.is_empty() {
            return Err(KeyError::EmptyUuid(key.to_string()));
        }
        Ok(Self::new(resource_type, uuid))
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.uuid)
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("account/abc", ResourceType::Account)]
    #[case("node/abc", ResourceType::Node)]
    #[case("pod/abc", ResourceType::Pod)]
    #[case("record/abc", ResourceType::Record)]
    #[case("object/abc", ResourceType::Object)]
    fn parses_known_types(#[case] key: &str, #[case] expected: ResourceType) {
        let parsed = ResourceKey::parse(key).unwrap();
        assert_eq!(parsed.resource_type, expected);
        assert_eq!(parsed.uuid, "abc");
        assert_eq!(parsed.to_string(), key);
    }

    #[rstest]
    #[case("pod")]
    #[case("widget/abc")]
    #[case("pod/")]
    fn rejects_malformed(#[case] key: &str) {
        assert!(ResourceKey::parse(key).is_err());
    }
}
