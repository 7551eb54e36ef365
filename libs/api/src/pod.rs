//! Pod resource: one or more containers scheduled as a unit.

use std::collections::HashSet;

use burrow_id::{NodeId, PodUuid};
use serde::{Deserialize, Serialize};

use crate::{time, ObjectMeta, Resource, ResourceType, ValidationError, Vector3};

/// Runtimes a container must name exactly one of.
pub const CONTAINER_RUNTIME_REQUIRED: &[&str] = &["go:1.19", "go:1.20"];

/// Additional runtimes a container may name.
pub const CONTAINER_RUNTIME_ACCEPTED: &[&str] = &["core:dev1"];

/// The only scheduler policy currently understood.
pub const SCHEDULER_CREATOR: &str = "creator";

// =============================================================================
// Spec
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pod {
    pub meta: ObjectMeta,
    pub spec: PodSpec,
    pub status: PodStatus,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
    #[serde(default)]
    pub target_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerSpec>,
    #[serde(default)]
    pub enable_migrate: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub runtime: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Scheduler selection; `type` stays a string so unknown policies survive
/// decoding and surface as an explicit scheduling error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSpec {
    #[serde(rename = "type")]
    pub scheduler_type: String,
}

impl Default for SchedulerSpec {
    fn default() -> Self {
        Self {
            scheduler_type: SCHEDULER_CREATOR.to_string(),
        }
    }
}

/// When a stopped container is started again on the same node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Disable,
    Always,
    StrictExited,
    StrictSucceeded,
    StrictFailed,
    Once,
}

impl RestartPolicy {
    /// Decides whether a container in `status` should be restarted.
    ///
    /// Only terminated or unknown containers are candidates.
    pub fn should_restart(&self, status: &ContainerStatus) -> bool {
        match (self, status.phase()) {
            (Self::Disable, _) => false,
            (Self::Always, ContainerPhase::Terminated | ContainerPhase::Unknown) => true,
            (Self::StrictExited, ContainerPhase::Terminated) => true,
            (Self::StrictSucceeded, ContainerPhase::Terminated) => status.exit_code() == Some(0),
            (Self::StrictFailed, ContainerPhase::Terminated) => {
                status.exit_code().is_some_and(|code| code != 0)
            }
            (Self::Once, ContainerPhase::Terminated) => status.last_state.is_none(),
            _ => false,
        }
    }
}

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub running_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vector3>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

impl PodStatus {
    /// An unscheduled status with `count` waiting containers.
    pub fn waiting(count: usize) -> Self {
        Self {
            running_node: String::new(),
            position: None,
            container_statuses: vec![ContainerStatus::default(); count],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerStatus {
    #[serde(rename = "containerID", default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(
        rename = "lastState",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_state: Option<ContainerStateTerminated>,
    #[serde(default)]
    pub state: ContainerState,
}

/// Observed container state. No field set means waiting.
///
/// `terminated` is only valid together with `running`, which keeps the
/// start time of the run that ended.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<ContainerStateRunning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerStateTerminated>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown: Option<ContainerStateUnknown>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateRunning {
    pub started_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateTerminated {
    pub finished_at: String,
    #[serde(default)]
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStateUnknown {
    pub timestamp: String,
    pub reason: String,
}

/// Phase of a single container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPhase {
    Waiting,
    Running,
    Terminated,
    Unknown,
}

impl ContainerStatus {
    /// Terminated wins over unknown, unknown over running.
    pub fn phase(&self) -> ContainerPhase {
        if self.state.terminated.is_some() {
            ContainerPhase::Terminated
        } else if self.state.unknown.is_some() {
            ContainerPhase::Unknown
        } else if self.state.running.is_some() {
            ContainerPhase::Running
        } else {
            ContainerPhase::Waiting
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.state.terminated.as_ref().map(|t| t.exit_code)
    }

    pub fn mark_unknown(&mut self, reason: impl Into<String>) {
        self.state.unknown = Some(ContainerStateUnknown {
            timestamp: time::now(),
            reason: reason.into(),
        });
    }

    /// Back to waiting for a fresh start; the last termination is kept.
    pub fn reset_for_restart(&mut self) {
        if let Some(terminated) = self.state.terminated.take() {
            self.last_state = Some(terminated);
        }
        self.container_id.clear();
        self.image.clear();
        self.state = ContainerState::default();
    }
}

/// Fold of all container phases in a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStateDigest {
    Waiting,
    Running,
    Terminated,
    Unknown,
}

impl std::fmt::Display for ContainerStateDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "Waiting",
            Self::Running => "Running",
            Self::Terminated => "Terminated",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Pod
// =============================================================================

impl Pod {
    /// `Unknown` if any container is unknown, else `Terminated` if all are,
    /// else `Running` if any is, else `Waiting`.
    pub fn digest(&self) -> ContainerStateDigest {
        let phases: Vec<_> = self
            .status
            .container_statuses
            .iter()
            .map(ContainerStatus::phase)
            .collect();

        if phases.contains(&ContainerPhase::Unknown) {
            ContainerStateDigest::Unknown
        } else if !phases.is_empty() && phases.iter().all(|p| *p == ContainerPhase::Terminated) {
            ContainerStateDigest::Terminated
        } else if phases.contains(&ContainerPhase::Running) {
            ContainerStateDigest::Running
        } else {
            ContainerStateDigest::Waiting
        }
    }

    /// Human readable state for listings, e.g. `Running` or
    /// `Unknown: container missing`.
    pub fn state_message(&self) -> String {
        let digest = self.digest();
        if digest != ContainerStateDigest::Unknown {
            return digest.to_string();
        }

        let reasons: Vec<&str> = self
            .status
            .container_statuses
            .iter()
            .filter(|s| s.phase() == ContainerPhase::Unknown)
            .filter_map(|s| s.state.unknown.as_ref().map(|u| u.reason.as_str()))
            .collect();
        format!("{digest}: {}", reasons.join("; "))
    }

    pub fn scheduler(&self) -> SchedulerSpec {
        self.spec.scheduler.clone().unwrap_or_default()
    }

    /// Rewrites the status so `target_node` starts the pod from scratch.
    pub fn rehost_to_target(&mut self) {
        self.status.running_node = self.spec.target_node.clone();
        for status in &mut self.status.container_statuses {
            status.reset_for_restart();
        }
    }
}

impl Resource for Pod {
    const TYPE: ResourceType = ResourceType::Pod;

    fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    fn validate(&self) -> Result<(), ValidationError> {
        self.meta.validate(ResourceType::Pod)?;
        PodUuid::parse(&self.meta.uuid).map_err(|e| ValidationError::invalid("meta.uuid", e))?;
        self.spec.validate()?;
        self.status.validate(self.spec.containers.len())
    }
}

impl PodSpec {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.containers.is_empty() {
            return Err(ValidationError::missing("spec.containers"));
        }

        let mut names = HashSet::new();
        for (idx, container) in self.containers.iter().enumerate() {
            let path = format!("spec.containers[{idx}]");
            if container.name.is_empty() {
                return Err(ValidationError::missing(format!("{path}.name")));
            }
            if !names.insert(container.name.as_str()) {
                return Err(ValidationError::Duplicate {
                    field: format!("{path}.name"),
                    value: container.name.clone(),
                });
            }
            container.validate(&path)?;
        }

        if !self.target_node.is_empty() {
            NodeId::parse(&self.target_node)
                .map_err(|e| ValidationError::invalid("spec.targetNode", e))?;
        }

        Ok(())
    }
}

impl ContainerSpec {
    fn validate(&self, path: &str) -> Result<(), ValidationError> {
        if self.image.is_empty() {
            return Err(ValidationError::missing(format!("{path}.image")));
        }
        let image = url::Url::parse(&self.image)
            .map_err(|e| ValidationError::invalid(format!("{path}.image"), e))?;
        if image.scheme() != "http" && image.scheme() != "https" {
            return Err(ValidationError::invalid(
                format!("{path}.image"),
                "should be an http or https url",
            ));
        }

        if self.runtime.is_empty() {
            return Err(ValidationError::missing(format!("{path}.runtime")));
        }
        let mut required = 0;
        for runtime in &self.runtime {
            if CONTAINER_RUNTIME_REQUIRED.contains(&runtime.as_str()) {
                required += 1;
            } else if !CONTAINER_RUNTIME_ACCEPTED.contains(&runtime.as_str()) {
                return Err(ValidationError::invalid(
                    format!("{path}.runtime"),
                    format!("unsupported runtime '{runtime}'"),
                ));
            }
        }
        if required != 1 {
            return Err(ValidationError::invalid(
                format!("{path}.runtime"),
                "there should be exactly one required runtime",
            ));
        }

        let mut env_names = HashSet::new();
        for env in &self.env {
            if !env_names.insert(env.name.as_str()) {
                return Err(ValidationError::Duplicate {
                    field: format!("{path}.env"),
                    value: env.name.clone(),
                });
            }
        }

        Ok(())
    }
}

impl PodStatus {
    pub fn validate(&self, container_count: usize) -> Result<(), ValidationError> {
        if !self.running_node.is_empty() {
            NodeId::parse(&self.running_node)
                .map_err(|e| ValidationError::invalid("status.runningNode", e))?;
        }

        if self.container_statuses.len() != container_count {
            return Err(ValidationError::CountMismatch {
                field: "status.containerStatuses".to_string(),
                expected: container_count,
                actual: self.container_statuses.len(),
            });
        }

        for (idx, status) in self.container_statuses.iter().enumerate() {
            let path = format!("status.containerStatuses[{idx}]");
            let state = &status.state;

            if !status.container_id.is_empty() || !status.image.is_empty() || state.running.is_some()
            {
                if self.running_node.is_empty() {
                    return Err(ValidationError::missing("status.runningNode"));
                }
                if status.container_id.is_empty() {
                    return Err(ValidationError::missing(format!("{path}.containerID")));
                }
                if status.image.is_empty() {
                    return Err(ValidationError::missing(format!("{path}.image")));
                }
                let Some(running) = &state.running else {
                    return Err(ValidationError::missing(format!("{path}.state.running")));
                };
                time::parse(&format!("{path}.state.running.startedAt"), &running.started_at)?;
            }

            if let Some(terminated) = &state.terminated {
                if state.running.is_none() {
                    return Err(ValidationError::missing(format!("{path}.state.running")));
                }
                time::parse(
                    &format!("{path}.state.terminated.finishedAt"),
                    &terminated.finished_at,
                )?;
            }

            if let Some(unknown) = &state.unknown {
                if unknown.reason.is_empty() {
                    return Err(ValidationError::missing(format!(
                        "{path}.state.unknown.reason"
                    )));
                }
                time::parse(&format!("{path}.state.unknown.timestamp"), &unknown.timestamp)?;
            }

            if let Some(last) = &status.last_state {
                time::parse(&format!("{path}.lastState.finishedAt"), &last.finished_at)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const NODE_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const STAMP: &str = "2023-04-15T17:30:40+09:00";

    fn container(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "https://host/a.wasm".to_string(),
            runtime: vec!["go:1.20".to_string()],
            args: vec![],
            env: vec![],
            restart_policy: RestartPolicy::Always,
        }
    }

    fn pod() -> Pod {
        Pod {
            meta: ObjectMeta::new(
                ResourceType::Pod,
                "hello",
                "alice",
                NODE_A,
                PodUuid::new().to_string(),
            ),
            spec: PodSpec {
                containers: vec![container("c1")],
                target_node: String::new(),
                scheduler: Some(SchedulerSpec::default()),
                enable_migrate: false,
            },
            status: PodStatus::waiting(1),
        }
    }

    fn running() -> ContainerStatus {
        ContainerStatus {
            container_id: "cid".into(),
            image: "https://host/a.wasm".into(),
            last_state: None,
            state: ContainerState {
                running: Some(ContainerStateRunning {
                    started_at: STAMP.into(),
                }),
                ..Default::default()
            },
        }
    }

    fn terminated(exit_code: i32) -> ContainerStatus {
        let mut status = running();
        status.state.terminated = Some(ContainerStateTerminated {
            finished_at: STAMP.into(),
            exit_code,
        });
        status
    }

    fn unknown() -> ContainerStatus {
        let mut status = ContainerStatus::default();
        status.state.unknown = Some(ContainerStateUnknown {
            timestamp: STAMP.into(),
            reason: "messaging failed".into(),
        });
        status
    }

    #[test]
    fn fresh_pod_is_valid() {
        assert_eq!(pod().validate(), Ok(()));
        assert_eq!(pod().digest(), ContainerStateDigest::Waiting);
    }

    #[test]
    fn running_pod_is_valid() {
        let mut p = pod();
        p.status.running_node = NODE_A.into();
        p.status.container_statuses[0] = running();
        assert_eq!(p.validate(), Ok(()));
    }

    #[rstest]
    #[case::no_containers(|p: &mut Pod| { p.spec.containers.clear(); p.status.container_statuses.clear(); }, "spec.containers")]
    #[case::duplicate_name(|p: &mut Pod| { p.spec.containers.push(container("c1")); p.status = PodStatus::waiting(2); }, "spec.containers[1].name")]
    #[case::ftp_image(|p: &mut Pod| p.spec.containers[0].image = "ftp://host/a.wasm".into(), "spec.containers[0].image")]
    #[case::relative_image(|p: &mut Pod| p.spec.containers[0].image = "a.wasm".into(), "spec.containers[0].image")]
    #[case::no_runtime(|p: &mut Pod| p.spec.containers[0].runtime.clear(), "spec.containers[0].runtime")]
    #[case::two_required(|p: &mut Pod| p.spec.containers[0].runtime.push("go:1.19".into()), "spec.containers[0].runtime")]
    #[case::unsupported_runtime(|p: &mut Pod| p.spec.containers[0].runtime.push("rust:1".into()), "spec.containers[0].runtime")]
    #[case::duplicate_env(|p: &mut Pod| p.spec.containers[0].env = vec![EnvVar { name: "A".into(), value: "1".into() }, EnvVar { name: "A".into(), value: "2".into() }], "spec.containers[0].env")]
    #[case::bad_target(|p: &mut Pod| p.spec.target_node = "nope".into(), "spec.targetNode")]
    #[case::bad_running_node(|p: &mut Pod| p.status.running_node = "nope".into(), "status.runningNode")]
    #[case::status_count(|p: &mut Pod| p.status.container_statuses.clear(), "status.containerStatuses")]
    #[case::running_without_node(|p: &mut Pod| p.status.container_statuses[0] = running(), "status.runningNode")]
    #[case::id_without_running(|p: &mut Pod| { p.status.running_node = NODE_A.into(); p.status.container_statuses[0].container_id = "cid".into(); p.status.container_statuses[0].image = "img".into(); }, "status.containerStatuses[0].state.running")]
    #[case::unknown_without_reason(|p: &mut Pod| { let mut s = unknown(); if let Some(u) = s.state.unknown.as_mut() { u.reason.clear(); } p.status.container_statuses[0] = s; }, "status.containerStatuses[0].state.unknown.reason")]
    fn invalid_pod(#[case] mutate: fn(&mut Pod), #[case] field: &str) {
        let mut p = pod();
        mutate(&mut p);
        let err = p.validate().unwrap_err();
        assert_eq!(err.field(), field, "{err}");
    }

    #[test]
    fn terminated_requires_running() {
        let mut p = pod();
        p.status.container_statuses[0].state.terminated = Some(ContainerStateTerminated {
            finished_at: STAMP.into(),
            exit_code: 0,
        });
        assert_eq!(
            p.validate().unwrap_err().field(),
            "status.containerStatuses[0].state.running"
        );
    }

    #[rstest]
    #[case(vec![], ContainerStateDigest::Waiting)]
    #[case(vec![ContainerStatus::default()], ContainerStateDigest::Waiting)]
    #[case(vec![running(), ContainerStatus::default()], ContainerStateDigest::Running)]
    #[case(vec![terminated(0), running()], ContainerStateDigest::Running)]
    #[case(vec![terminated(0), terminated(1)], ContainerStateDigest::Terminated)]
    #[case(vec![terminated(0), unknown()], ContainerStateDigest::Unknown)]
    #[case(vec![running(), unknown()], ContainerStateDigest::Unknown)]
    fn digest_fold(#[case] statuses: Vec<ContainerStatus>, #[case] expected: ContainerStateDigest) {
        let mut p = pod();
        p.status.container_statuses = statuses;
        assert_eq!(p.digest(), expected);
    }

    #[test]
    fn terminated_and_unknown_counts_as_terminated() {
        let mut status = terminated(0);
        status.mark_unknown("late report");
        assert_eq!(status.phase(), ContainerPhase::Terminated);
    }

    #[test]
    fn state_message_lists_reasons() {
        let mut p = pod();
        p.status.container_statuses = vec![unknown()];
        assert_eq!(p.state_message(), "Unknown: messaging failed");

        p.status.container_statuses = vec![running()];
        assert_eq!(p.state_message(), "Running");
    }

    #[rstest]
    #[case(RestartPolicy::Disable, terminated(1), false)]
    #[case(RestartPolicy::Disable, unknown(), false)]
    #[case(RestartPolicy::Always, terminated(0), true)]
    #[case(RestartPolicy::Always, unknown(), true)]
    #[case(RestartPolicy::Always, running(), false)]
    #[case(RestartPolicy::StrictExited, terminated(3), true)]
    #[case(RestartPolicy::StrictExited, unknown(), false)]
    #[case(RestartPolicy::StrictSucceeded, terminated(0), true)]
    #[case(RestartPolicy::StrictSucceeded, terminated(1), false)]
    #[case(RestartPolicy::StrictFailed, terminated(0), false)]
    #[case(RestartPolicy::StrictFailed, terminated(2), true)]
    #[case(RestartPolicy::Once, terminated(0), true)]
    fn restart_policy(
        #[case] policy: RestartPolicy,
        #[case] status: ContainerStatus,
        #[case] expected: bool,
    ) {
        assert_eq!(policy.should_restart(&status), expected);
    }

    #[test]
    fn once_restarts_only_once() {
        let mut status = terminated(0);
        status.reset_for_restart();
        assert_eq!(status.phase(), ContainerPhase::Waiting);
        assert!(status.last_state.is_some());
        assert!(status.container_id.is_empty());

        status = ContainerStatus {
            last_state: status.last_state.clone(),
            ..terminated(0)
        };
        assert!(!RestartPolicy::Once.should_restart(&status));
    }

    #[test]
    fn rehost_resets_statuses() {
        let mut p = pod();
        p.status.running_node = NODE_A.into();
        p.spec.target_node = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".into();
        p.status.container_statuses[0] = terminated(0);

        p.rehost_to_target();

        assert_eq!(p.status.running_node, "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
        assert_eq!(p.digest(), ContainerStateDigest::Waiting);
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn wire_format() {
        let mut p = pod();
        p.status.running_node = NODE_A.into();
        p.status.container_statuses[0] = terminated(7);
        let json = serde_json::to_value(&p).unwrap();

        assert_eq!(json["spec"]["containers"][0]["restartPolicy"], "Always");
        assert_eq!(json["spec"]["scheduler"]["type"], "creator");
        assert_eq!(json["status"]["runningNode"], NODE_A);
        let status = &json["status"]["containerStatuses"][0];
        assert_eq!(status["containerID"], "cid");
        assert_eq!(status["state"]["terminated"]["exitCode"], 7);
        assert_eq!(status["state"]["running"]["startedAt"], STAMP);
        assert!(status["state"].get("unknown").is_none());
    }

    fn arb_status() -> impl proptest::strategy::Strategy<Value = ContainerStatus> {
        use proptest::prelude::*;
        prop_oneof![
            Just(ContainerStatus::default()),
            Just(running()),
            (0..3i32).prop_map(terminated),
            Just(unknown()),
        ]
    }

    proptest::proptest! {
        #[test]
        fn digest_matches_phases(statuses in proptest::collection::vec(arb_status(), 1..6)) {
            let mut p = pod();
            p.status.container_statuses = statuses.clone();
            let phases: Vec<_> = statuses.iter().map(ContainerStatus::phase).collect();

            let digest = p.digest();
            proptest::prop_assert_eq!(
                digest == ContainerStateDigest::Unknown,
                phases.contains(&ContainerPhase::Unknown)
            );
            if digest == ContainerStateDigest::Terminated {
                proptest::prop_assert!(phases.iter().all(|ph| *ph == ContainerPhase::Terminated));
            }
        }
    }

    #[test]
    fn missing_restart_policy_defaults_to_disable() {
        let spec: ContainerSpec = serde_json::from_value(serde_json::json!({
            "name": "c1",
            "image": "https://host/a.wasm",
            "runtime": ["go:1.19"]
        }))
        .unwrap();
        assert_eq!(spec.restart_policy, RestartPolicy::Disable);
    }
}
