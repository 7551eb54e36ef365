//! Record resource: container checkpoints keyed by the pod uuid.

use std::collections::BTreeMap;

use burrow_id::PodUuid;
use serde::{Deserialize, Serialize};

use crate::{time, ObjectMeta, Resource, ResourceType, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub meta: ObjectMeta,
    pub data: RecordData,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordData {
    /// Container name to its latest checkpoint.
    pub entries: BTreeMap<String, RecordEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub timestamp: String,
    #[serde(rename = "Record", with = "base64_bytes", default)]
    pub record: Vec<u8>,
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

impl Record {
    /// The checkpoint record of a pod.
    pub fn for_pod(pod_meta: &ObjectMeta, creator_node: &str) -> Self {
        Self {
            meta: ObjectMeta::new(
                ResourceType::Record,
                pod_meta.name.clone(),
                pod_meta.owner.clone(),
                creator_node,
                pod_meta.uuid.clone(),
            ),
            data: RecordData::default(),
        }
    }
}

impl Resource for Record {
    const TYPE: ResourceType = ResourceType::Record;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.meta.validate(ResourceType::Record)?;
        PodUuid::parse(&self.meta.uuid).map_err(|e| ValidationError::invalid("meta.uuid", e))?;
        for (name, entry) in &self.data.entries {
            time::parse(&format!("data.entries[{name}].timestamp"), &entry.timestamp)?;
        }
        Ok(())
    }
}
