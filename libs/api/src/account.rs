//! Account resource: per-owner liveness of pods and nodes.

use std::collections::BTreeMap;

use burrow_id::{AccountUuid, NodeId, PodUuid};
use serde::{Deserialize, Serialize};

use crate::{time, ObjectMeta, Resource, ResourceType, ValidationError, Vector3};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub meta: ObjectMeta,
    pub state: AccountState,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AccountState {
    /// Pod uuid to the node last seen hosting it.
    pub pods: BTreeMap<String, AccountPodState>,
    /// Node id to its last keep-alive.
    pub nodes: BTreeMap<String, AccountNodeState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPodState {
    #[serde(default)]
    pub running_node: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountNodeState {
    #[serde(default)]
    pub name: String,
    pub timestamp: String,
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vector3>,
}

/// Kind of device a node runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Mobile,
    SmallDevice,
    #[serde(rename = "PC")]
    Pc,
    Server,
    Grass,
    Other,
}

impl NodeType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Mobile" => Some(Self::Mobile),
            "SmallDevice" => Some(Self::SmallDevice),
            "PC" => Some(Self::Pc),
            "Server" => Some(Self::Server),
            "Grass" => Some(Self::Grass),
            "Other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Mobile => "Mobile",
            Self::SmallDevice => "SmallDevice",
            Self::Pc => "PC",
            Self::Server => "Server",
            Self::Grass => "Grass",
            Self::Other => "Other",
        };
        f.write_str(s)
    }
}

impl Account {
    /// An empty account record for `name`, written by `creator_node`.
    pub fn new(name: &str, creator_node: &str) -> Self {
        Self {
            meta: ObjectMeta::new(
                ResourceType::Account,
                name,
                name,
                creator_node,
                AccountUuid::from_name(name).to_string(),
            ),
            state: AccountState::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.pods.is_empty() && self.state.nodes.is_empty()
    }
}

impl Resource for Account {
    const TYPE: ResourceType = ResourceType::Account;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.meta.validate(ResourceType::Account)?;
        if AccountUuid::from_name(&self.meta.name).as_str() != self.meta.uuid {
            return Err(ValidationError::invalid(
                "meta.uuid",
                format!("should be sha256 of '{}'", self.meta.name),
            ));
        }
        self.state.validate()
    }
}

impl AccountState {
    fn validate(&self) -> Result<(), ValidationError> {
        for (uuid, pod) in &self.pods {
            PodUuid::parse(uuid).map_err(|e| ValidationError::invalid("state.pods", e))?;
            if !pod.running_node.is_empty() {
                NodeId::parse(&pod.running_node).map_err(|e| {
                    ValidationError::invalid(format!("state.pods[{uuid}].runningNode"), e)
                })?;
            }
            time::parse(&format!("state.pods[{uuid}].timestamp"), &pod.timestamp)?;
        }

        for (nid, node) in &self.nodes {
            NodeId::parse(nid).map_err(|e| ValidationError::invalid("state.nodes", e))?;
            time::parse(&format!("state.nodes[{nid}].timestamp"), &node.timestamp)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const STAMP: &str = "2023-04-15T17:30:40+09:00";

    fn account() -> Account {
        let mut account = Account::new("alice", NODE_A);
        account.state.pods.insert(
            PodUuid::new().to_string(),
            AccountPodState {
                running_node: NODE_A.into(),
                timestamp: STAMP.into(),
            },
        );
        account.state.nodes.insert(
            NODE_A.into(),
            AccountNodeState {
                name: "n1".into(),
                timestamp: STAMP.into(),
                node_type: NodeType::Server,
                position: Some(Vector3::new(139.7, 35.7, 10.0)),
            },
        );
        account
    }

    #[test]
    fn valid_account() {
        assert_eq!(account().validate(), Ok(()));
        assert_eq!(Account::new("bob", NODE_A).validate(), Ok(()));
    }

    #[test]
    fn uuid_must_match_name() {
        let mut a = account();
        a.meta.name = "mallory".into();
        a.meta.owner = "mallory".into();
        assert_eq!(a.validate().unwrap_err().field(), "meta.uuid");
    }

    #[test]
    fn pod_key_must_be_uuid() {
        let mut a = account();
        a.state.pods.insert(
            "not-a-uuid".into(),
            AccountPodState {
                running_node: String::new(),
                timestamp: STAMP.into(),
            },
        );
        assert_eq!(a.validate().unwrap_err().field(), "state.pods");
    }

    #[test]
    fn node_key_must_be_node_id() {
        let mut a = account();
        let node = a.state.nodes.values().next().cloned().unwrap();
        a.state.nodes.insert("zzzz".into(), node);
        assert_eq!(a.validate().unwrap_err().field(), "state.nodes");
    }

    #[test]
    fn bad_timestamp() {
        let mut a = account();
        for pod in a.state.pods.values_mut() {
            pod.timestamp = "later".into();
        }
        assert!(a.validate().unwrap_err().field().ends_with(".timestamp"));
    }

    #[test]
    fn unknown_node_type_fails_to_decode() {
        let mut json = serde_json::to_value(account()).unwrap();
        json["state"]["nodes"][NODE_A]["nodeType"] = "Toaster".into();
        assert!(serde_json::from_value::<Account>(json).is_err());
    }

    #[test]
    fn node_type_wire_names() {
        assert_eq!(serde_json::to_string(&NodeType::Pc).unwrap(), "\"PC\"");
        assert_eq!(NodeType::parse("SmallDevice"), Some(NodeType::SmallDevice));
        assert_eq!(NodeType::parse("pc"), None);
    }
}
