//! Common resource header.

use burrow_id::NodeId;
use serde::{Deserialize, Serialize};

use crate::{time, ValidationError};

/// Resource type tag, also the KVS key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Account,
    Node,
    Pod,
    Record,
    Object,
}

impl ResourceType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Node => "node",
            Self::Pod => "pod",
            Self::Record => "record",
            Self::Object => "object",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "account" => Some(Self::Account),
            "node" => Some(Self::Node),
            "pod" => Some(Self::Pod),
            "record" => Some(Self::Record),
            "object" => Some(Self::Object),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header shared by every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub name: String,
    /// Account name of the owner.
    pub owner: String,
    pub creator_node: String,
    pub uuid: String,
    /// Empty, or the RFC3339 time deletion was requested.
    #[serde(default)]
    pub deletion_timestamp: String,
}

impl ObjectMeta {
    pub fn new(
        resource_type: ResourceType,
        name: impl Into<String>,
        owner: impl Into<String>,
        creator_node: impl Into<String>,
        uuid: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            name: name.into(),
            owner: owner.into(),
            creator_node: creator_node.into(),
            uuid: uuid.into(),
            deletion_timestamp: String::new(),
        }
    }

    pub fn is_deleting(&self) -> bool {
        !self.deletion_timestamp.is_empty()
    }

    /// Checks the header against the expected resource type.
    pub fn validate(&self, expected: ResourceType) -> Result<(), ValidationError> {
        if self.resource_type != expected {
            return Err(ValidationError::TypeMismatch {
                expected: expected.to_string(),
                actual: self.resource_type.to_string(),
            });
        }
        if self.name.is_empty() {
            return Err(ValidationError::missing("meta.name"));
        }
        if self.owner.is_empty() {
            return Err(ValidationError::missing("meta.owner"));
        }
        if self.creator_node.is_empty() {
            return Err(ValidationError::missing("meta.creatorNode"));
        }
        NodeId::parse(&self.creator_node)
            .map_err(|e| ValidationError::invalid("meta.creatorNode", e))?;
        if self.uuid.is_empty() {
            return Err(ValidationError::missing("meta.uuid"));
        }
        if self.is_deleting() {
            time::parse("meta.deletionTimestamp", &self.deletion_timestamp)?;
        }
        Ok(())
    }
}
