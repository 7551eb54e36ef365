//! Object resource: a scene entity owned by a pod.
//!
//! Geometry is opaque here; only the header and position are interpreted.

use burrow_id::ObjectUuid;
use serde::{Deserialize, Serialize};

use crate::{ObjectMeta, Resource, ResourceType, ValidationError, Vector3};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub meta: ObjectMeta,
    pub spec: ObjectSpec,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObjectSpec {
    #[serde(default)]
    pub parts: Vec<serde_json::Value>,
    #[serde(default)]
    pub materials: Vec<serde_json::Value>,
    #[serde(default)]
    pub maps: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vector3>,
}

impl Resource for Object {
    const TYPE: ResourceType = ResourceType::Object;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.meta.validate(ResourceType::Object)?;
        ObjectUuid::parse(&self.meta.uuid)
            .map_err(|e| ValidationError::invalid("meta.uuid", e))?;
        if let Some(position) = &self.spec.position {
            if !(-90.0..=90.0).contains(&position.y) || !(-180.0..=180.0).contains(&position.x) {
                return Err(ValidationError::invalid(
                    "spec.position",
                    "latitude or longitude out of range",
                ));
            }
        }
        Ok(())
    }
}
