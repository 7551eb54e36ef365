//! Container controller.
//!
//! Converges the local runtime to the pods this node hosts. It is driven by
//! inbound `reconcileContainer` messages; the pod controller on the pod's
//! primary replica sends one every reconcile tick, so every step here may
//! stop halfway and pick up again on the next call.
//!
//! Only the pod's running node writes container statuses.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use burrow_api::{
    time, ContainerPhase, ContainerSpec, ContainerStateRunning, ContainerStateTerminated,
    ContainerStateDigest, Pod,
};
use burrow_reconcile::{StopDeadlines, UniqueSet};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ControllerSettings;
use crate::cri::{
    self, ContainerConfig, ContainerFilter, ContainerMetadata, ContainerRef, CreateContainerRequest,
    Cri, ImageSpec, KeyValue, ListContainersRequest, ListImagesRequest, ListPodSandboxRequest,
    PodSandboxMetadata, PodSandboxRef, PullImageRequest, RunPodSandboxRequest,
};
use crate::error::{Error, Result};
use crate::kvs::PodKvs;

/// Exit code recorded for containers removed without exiting.
pub const FORCED_EXIT_CODE: i32 = -1;

const REASON_MISSING: &str = "container missing";
const REASON_NEVER_STARTED: &str = "container was never started";
const REASON_RUNTIME_UNKNOWN: &str = "container state unknown in runtime";

/// A pod with a sandbox on this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub pod_uuid: String,
    pub owner: String,
    pub sandbox_id: String,
}

#[derive(Debug, Clone)]
struct LocalPod {
    sandbox_id: String,
    owner: String,
}

struct Inner {
    /// Pod uuid to its local sandbox.
    pods: BTreeMap<String, LocalPod>,
    deadlines: StopDeadlines<String>,
}

pub struct ContainerController {
    node_id: String,
    pods: PodKvs,
    cri: Arc<dyn Cri>,
    inner: Mutex<Inner>,
    /// Pods with a reconcile in flight.
    in_flight: UniqueSet<String>,
}

impl ContainerController {
    pub fn new(
        node_id: impl Into<String>,
        pods: PodKvs,
        cri: Arc<dyn Cri>,
        settings: &ControllerSettings,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            pods,
            cri,
            inner: Mutex::new(Inner {
                pods: BTreeMap::new(),
                deadlines: StopDeadlines::new(settings.force_termination_timeout),
            }),
            in_flight: UniqueSet::new(),
        }
    }

    /// Pods that have a sandbox on this node.
    pub async fn get_container_infos(&self) -> Vec<ContainerInfo> {
        self.inner
            .lock()
            .await
            .pods
            .iter()
            .map(|(uuid, local)| ContainerInfo {
                pod_uuid: uuid.clone(),
                owner: local.owner.clone(),
                sandbox_id: local.sandbox_id.clone(),
            })
            .collect()
    }

    /// Converges the runtime for one pod.
    ///
    /// A call for a pod that is already being reconciled returns at once.
    pub async fn reconcile(&self, pod_uuid: &str) -> Result<()> {
        let Some(_running) = self.in_flight.try_acquire(pod_uuid.to_string()) else {
            debug!(pod_uuid = %pod_uuid, "Reconcile already in flight, skipping");
            return Ok(());
        };

        let Some(mut pod) = self.pods.get(pod_uuid).await? else {
            self.remove_sandbox(pod_uuid).await?;
            return Ok(());
        };

        if pod.status.running_node != self.node_id {
            self.remove_sandbox(pod_uuid).await?;
            return Ok(());
        }

        let migrating =
            !pod.spec.target_node.is_empty() && pod.spec.target_node != pod.status.running_node;
        if pod.meta.is_deleting() || migrating {
            return self.let_terminate(&mut pod).await;
        }

        let sandbox_id = self.let_running(&mut pod).await?;
        self.update_pod_status(&mut pod, &sandbox_id).await
    }

    // =========================================================================
    // Forward progress
    // =========================================================================

    async fn let_running(&self, pod: &mut Pod) -> Result<String> {
        let pod_uuid = pod.meta.uuid.clone();
        let sandbox_id = match self.find_sandbox(&pod_uuid).await? {
            Some(id) => id,
            None => match self.run_sandbox(pod).await {
                Ok(id) => id,
                Err(e) => {
                    let reason = format!("failed to create sandbox: {e}");
                    for status in &mut pod.status.container_statuses {
                        if status.phase() == ContainerPhase::Waiting {
                            status.mark_unknown(reason.clone());
                        }
                    }
                    self.write_status(pod).await?;
                    return Err(e);
                }
            },
        };
        self.remember(&pod_uuid, &sandbox_id, &pod.meta.owner).await;

        let runtime = self
            .cri
            .pod_sandbox_status(PodSandboxRef {
                pod_sandbox_id: sandbox_id.clone(),
            })
            .await?;
        let existing: HashMap<String, cri::ContainerStatus> = runtime
            .containers_statuses
            .into_iter()
            .map(|c| (c.metadata.name.clone(), c))
            .collect();
        let mut images: HashSet<String> = self
            .cri
            .list_images(ListImagesRequest::default())
            .await?
            .images
            .into_iter()
            .map(|i| i.spec.image)
            .collect();

        for (spec, status) in pod
            .spec
            .containers
            .iter()
            .zip(pod.status.container_statuses.iter_mut())
        {
            if status.phase() != ContainerPhase::Waiting {
                continue;
            }

            if let Some(stale) = existing.get(&spec.name) {
                if stale.state != cri::ContainerState::Exited {
                    continue;
                }
                // Left over from a run that is being restarted.
                if let Err(e) = self
                    .cri
                    .remove_container(ContainerRef {
                        container_id: stale.id.clone(),
                    })
                    .await
                {
                    warn!(pod_uuid = %pod_uuid, container = %spec.name, error = %e, "Failed to remove exited container");
                    continue;
                }
            }

            match self.start_container(&sandbox_id, spec, &mut images).await {
                Ok(container_id) => {
                    info!(
                        pod_uuid = %pod_uuid,
                        container = %spec.name,
                        container_id = %container_id,
                        "Container started"
                    );
                    status.container_id = container_id;
                    status.image = spec.image.clone();
                    status.state.running = Some(ContainerStateRunning {
                        started_at: time::now(),
                    });
                    status.state.unknown = None;
                }
                Err(e) => {
                    warn!(pod_uuid = %pod_uuid, container = %spec.name, error = %e, "Failed to start container");
                    status.mark_unknown(format!("failed to start container: {e}"));
                }
            }
        }

        Ok(sandbox_id)
    }

    async fn run_sandbox(&self, pod: &Pod) -> Result<String> {
        let response = self
            .cri
            .run_pod_sandbox(RunPodSandboxRequest {
                metadata: PodSandboxMetadata {
                    name: pod.meta.name.clone(),
                    uid: pod.meta.uuid.clone(),
                    namespace: String::new(),
                },
            })
            .await?;
        info!(
            pod_uuid = %pod.meta.uuid,
            sandbox_id = %response.pod_sandbox_id,
            "Sandbox created"
        );
        Ok(response.pod_sandbox_id)
    }

    async fn start_container(
        &self,
        sandbox_id: &str,
        spec: &ContainerSpec,
        images: &mut HashSet<String>,
    ) -> Result<String> {
        if !images.contains(&spec.image) {
            self.cri
                .pull_image(PullImageRequest {
                    image: ImageSpec {
                        image: spec.image.clone(),
                    },
                })
                .await?;
            images.insert(spec.image.clone());
        }

        let created = self
            .cri
            .create_container(CreateContainerRequest {
                pod_sandbox_id: sandbox_id.to_string(),
                config: ContainerConfig {
                    metadata: ContainerMetadata {
                        name: spec.name.clone(),
                    },
                    image: ImageSpec {
                        image: spec.image.clone(),
                    },
                    runtime: spec.runtime.clone(),
                    args: spec.args.clone(),
                    envs: spec
                        .env
                        .iter()
                        .map(|e| KeyValue {
                            key: e.name.clone(),
                            value: e.value.clone(),
                        })
                        .collect(),
                },
            })
            .await?;

        self.cri
            .start_container(ContainerRef {
                container_id: created.container_id.clone(),
            })
            .await?;
        Ok(created.container_id)
    }

    // =========================================================================
    // Termination
    // =========================================================================

    async fn let_terminate(&self, pod: &mut Pod) -> Result<()> {
        let pod_uuid = pod.meta.uuid.clone();
        let Some(sandbox_id) = self.find_sandbox(&pod_uuid).await? else {
            return self.settle_without_sandbox(pod).await;
        };

        let runtime = self
            .cri
            .pod_sandbox_status(PodSandboxRef {
                pod_sandbox_id: sandbox_id.clone(),
            })
            .await?;
        let mut stopping = false;
        for container in &runtime.containers_statuses {
            if container.state == cri::ContainerState::Exited {
                continue;
            }
            stopping = true;
            if let Err(e) = self
                .cri
                .stop_container(ContainerRef {
                    container_id: container.id.clone(),
                })
                .await
            {
                warn!(pod_uuid = %pod_uuid, container_id = %container.id, error = %e, "Failed to stop container");
            }
        }

        if stopping {
            let armed = self.inner.lock().await.deadlines.arm(&pod_uuid, Instant::now());
            debug!(pod_uuid = %pod_uuid, since = ?armed, "Stopping containers");
        }

        self.update_pod_status(pod, &sandbox_id).await?;

        let remaining = self
            .cri
            .list_containers(ListContainersRequest {
                filter: ContainerFilter {
                    pod_sandbox_id: Some(sandbox_id.clone()),
                    ..Default::default()
                },
            })
            .await?
            .containers
            .into_iter()
            .filter(|c| c.state != cri::ContainerState::Exited)
            .count();

        if remaining == 0 {
            self.remove_sandbox(&pod_uuid).await?;
            return self.settle_without_sandbox(pod).await;
        }

        let expired = self
            .inner
            .lock()
            .await
            .deadlines
            .expired(&pod_uuid, Instant::now());
        if expired {
            warn!(pod_uuid = %pod_uuid, remaining, "Containers did not stop in time, forcing removal");
            self.remove_sandbox(&pod_uuid).await?;
            return self.settle_without_sandbox(pod).await;
        }

        Ok(())
    }

    /// Finalizes statuses once nothing for the pod runs here.
    ///
    /// Running containers are recorded as terminated with
    /// [`FORCED_EXIT_CODE`]. A deleting pod keeps never-started containers
    /// as unknown; a migrating pod is handed to its target when it cannot
    /// reach `Terminated`.
    async fn settle_without_sandbox(&self, pod: &mut Pod) -> Result<()> {
        let before = pod.status.clone();
        let now = time::now();
        for status in &mut pod.status.container_statuses {
            match status.phase() {
                ContainerPhase::Running => {
                    status.state.terminated = Some(ContainerStateTerminated {
                        finished_at: now.clone(),
                        exit_code: FORCED_EXIT_CODE,
                    });
                    status.state.unknown = None;
                }
                ContainerPhase::Waiting => status.mark_unknown(REASON_NEVER_STARTED),
                ContainerPhase::Unknown if status.state.running.is_some() => {
                    status.state.terminated = Some(ContainerStateTerminated {
                        finished_at: now.clone(),
                        exit_code: FORCED_EXIT_CODE,
                    });
                    status.state.unknown = None;
                }
                ContainerPhase::Terminated | ContainerPhase::Unknown => {}
            }
        }

        if !pod.meta.is_deleting() && pod.digest() != ContainerStateDigest::Terminated {
            info!(
                pod_uuid = %pod.meta.uuid,
                target_node = %pod.spec.target_node,
                "Nothing running locally, handing pod to target"
            );
            pod.rehost_to_target();
        }

        if pod.status != before {
            self.write_status(pod).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Translates runtime state into the pod record and writes it.
    async fn update_pod_status(&self, pod: &mut Pod, sandbox_id: &str) -> Result<()> {
        let pod_uuid = pod.meta.uuid.clone();
        let runtime = self
            .cri
            .pod_sandbox_status(PodSandboxRef {
                pod_sandbox_id: sandbox_id.to_string(),
            })
            .await?;

        let spec_names: HashSet<&str> = pod.spec.containers.iter().map(|c| c.name.as_str()).collect();
        let unexpected: Vec<String> = runtime
            .containers_statuses
            .iter()
            .filter(|c| !spec_names.contains(c.metadata.name.as_str()))
            .map(|c| c.metadata.name.clone())
            .collect();
        if !unexpected.is_empty() {
            return self
                .teardown_mismatch(
                    pod,
                    format!("unexpected containers in sandbox: {}", unexpected.join(", ")),
                )
                .await;
        }

        let mut mismatch = None;
        for (spec, status) in pod
            .spec
            .containers
            .iter()
            .zip(pod.status.container_statuses.iter_mut())
        {
            let mut candidates = runtime
                .containers_statuses
                .iter()
                .filter(|c| c.metadata.name == spec.name);
            let observed = if status.container_id.is_empty() {
                candidates.find(|c| c.state != cri::ContainerState::Exited)
            } else {
                candidates.find(|c| c.id == status.container_id)
            };

            let Some(observed) = observed else {
                let has_other = runtime
                    .containers_statuses
                    .iter()
                    .any(|c| c.metadata.name == spec.name && c.state != cri::ContainerState::Exited);
                if !status.container_id.is_empty() && has_other {
                    mismatch = Some(format!("container id mismatch for {}", spec.name));
                    break;
                }
                if matches!(status.phase(), ContainerPhase::Waiting | ContainerPhase::Running) {
                    status.mark_unknown(REASON_MISSING);
                }
                continue;
            };

            if status.state.terminated.is_some()
                && !matches!(
                    observed.state,
                    cri::ContainerState::Exited | cri::ContainerState::Unknown
                )
            {
                mismatch = Some(format!(
                    "container {} is terminated in the record but not in the runtime",
                    spec.name
                ));
                break;
            }

            match observed.state {
                cri::ContainerState::Created | cri::ContainerState::Running => {
                    adopt(status, spec, observed);
                    status.state.unknown = None;
                }
                cri::ContainerState::Exited => {
                    adopt(status, spec, observed);
                    if status.state.terminated.is_none() {
                        status.state.terminated = Some(ContainerStateTerminated {
                            finished_at: normalize(&observed.finished_at),
                            exit_code: observed.exit_code,
                        });
                    }
                    status.state.unknown = None;
                }
                cri::ContainerState::Unknown => {
                    if status.state.terminated.is_none() && status.state.unknown.is_none() {
                        status.mark_unknown(REASON_RUNTIME_UNKNOWN);
                    }
                }
            }
        }

        if let Some(reason) = mismatch {
            return self.teardown_mismatch(pod, reason).await;
        }

        self.write_status(pod).await?;
        debug!(pod_uuid = %pod_uuid, state = %pod.state_message(), "Pod status updated");
        Ok(())
    }

    /// Records `pod.status` over the stored pod.
    ///
    /// A pod that was removed or rehosted meanwhile is no longer ours, so its
    /// local sandbox goes instead.
    async fn write_status(&self, pod: &mut Pod) -> Result<()> {
        match self.pods.update_status(pod, &self.node_id).await? {
            Some(written) => {
                *pod = written;
                Ok(())
            }
            None => {
                info!(pod_uuid = %pod.meta.uuid, "Pod left this node during reconcile");
                self.remove_sandbox(&pod.meta.uuid).await
            }
        }
    }

    async fn teardown_mismatch(&self, pod: &mut Pod, reason: String) -> Result<()> {
        warn!(pod_uuid = %pod.meta.uuid, reason = %reason, "Sandbox disagrees with the pod record, tearing down");
        self.remove_sandbox(&pod.meta.uuid).await?;
        for status in &mut pod.status.container_statuses {
            if status.phase() == ContainerPhase::Running {
                status.mark_unknown(reason.clone());
            }
        }
        self.write_status(pod).await?;
        Err(Error::SandboxMismatch {
            pod_uuid: pod.meta.uuid.clone(),
            reason,
        })
    }

    // =========================================================================
    // Sandbox bookkeeping
    // =========================================================================

    async fn remember(&self, pod_uuid: &str, sandbox_id: &str, owner: &str) {
        self.inner.lock().await.pods.insert(
            pod_uuid.to_string(),
            LocalPod {
                sandbox_id: sandbox_id.to_string(),
                owner: owner.to_string(),
            },
        );
    }

    /// The local sandbox for a pod, adopting one the runtime already has.
    async fn find_sandbox(&self, pod_uuid: &str) -> Result<Option<String>> {
        if let Some(local) = self.inner.lock().await.pods.get(pod_uuid) {
            return Ok(Some(local.sandbox_id.clone()));
        }

        let sandboxes = self
            .cri
            .list_pod_sandbox(ListPodSandboxRequest::default())
            .await?;
        let Some(sandbox) = sandboxes.items.into_iter().find(|s| s.metadata.uid == pod_uuid) else {
            return Ok(None);
        };
        debug!(pod_uuid = %pod_uuid, sandbox_id = %sandbox.id, "Adopting existing sandbox");
        self.remember(pod_uuid, &sandbox.id, "").await;
        Ok(Some(sandbox.id))
    }

    /// Removes every container of the pod's sandbox, then the sandbox.
    async fn remove_sandbox(&self, pod_uuid: &str) -> Result<()> {
        let Some(sandbox_id) = self.find_sandbox(pod_uuid).await? else {
            return Ok(());
        };

        let containers = self
            .cri
            .list_containers(ListContainersRequest {
                filter: ContainerFilter {
                    pod_sandbox_id: Some(sandbox_id.clone()),
                    ..Default::default()
                },
            })
            .await?
            .containers;
        for container in containers {
            if let Err(e) = self
                .cri
                .remove_container(ContainerRef {
                    container_id: container.id.clone(),
                })
                .await
            {
                warn!(pod_uuid = %pod_uuid, container_id = %container.id, error = %e, "Failed to remove container");
            }
        }

        match self
            .cri
            .remove_pod_sandbox(PodSandboxRef {
                pod_sandbox_id: sandbox_id.clone(),
            })
            .await
        {
            Ok(()) | Err(cri::CriError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let mut inner = self.inner.lock().await;
        inner.pods.remove(pod_uuid);
        inner.deadlines.clear(&pod_uuid.to_string());
        info!(pod_uuid = %pod_uuid, sandbox_id = %sandbox_id, "Sandbox removed");
        Ok(())
    }
}

/// Takes the runtime's container as the one the record tracks.
fn adopt(status: &mut burrow_api::ContainerStatus, spec: &ContainerSpec, observed: &cri::ContainerStatus) {
    if status.state.running.is_some() {
        return;
    }
    status.container_id = observed.id.clone();
    status.image = spec.image.clone();
    status.state.running = Some(ContainerStateRunning {
        started_at: normalize(&observed.started_at),
    });
}

/// Runtime timestamps that do not parse are replaced with the current time.
fn normalize(stamp: &str) -> String {
    if time::parse("timestamp", stamp).is_ok() {
        stamp.to_string()
    } else {
        time::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cri::MockCri;
    use crate::kvs::Kvs;
    use crate::substrate::{MemoryNetwork, MemorySubstrate, Substrate};
    use burrow_api::{ObjectMeta, PodSpec, PodStatus, ResourceType, RestartPolicy};
    use std::time::Duration;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const U: &str = "6f1c2a7e-3b0d-4c1e-9f55-0a8b7c6d5e41";

    struct Harness {
        controller: ContainerController,
        cri: Arc<MockCri>,
        pods: PodKvs,
    }

    async fn harness() -> Harness {
        let network = MemoryNetwork::new();
        let substrate = MemorySubstrate::new(network, A);
        substrate.connect("memory://", "").await.unwrap();
        let kvs = Kvs::new(Arc::new(substrate));
        let cri = Arc::new(MockCri::new());
        let controller = ContainerController::new(
            A,
            kvs.pods(),
            cri.clone(),
            &ControllerSettings::default(),
        );
        Harness {
            controller,
            cri,
            pods: kvs.pods(),
        }
    }

    fn container(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "https://host/a.wasm".to_string(),
            runtime: vec!["go:1.20".to_string()],
            restart_policy: RestartPolicy::Always,
            ..Default::default()
        }
    }

    fn scheduled_pod(names: &[&str]) -> Pod {
        let mut status = PodStatus::waiting(names.len());
        status.running_node = A.to_string();
        Pod {
            meta: ObjectMeta::new(ResourceType::Pod, "hello", "alice", A, U),
            spec: PodSpec {
                containers: names.iter().map(|n| container(n)).collect(),
                target_node: A.to_string(),
                ..Default::default()
            },
            status,
        }
    }

    #[tokio::test]
    async fn test_starts_waiting_containers() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1", "c2"])).await.unwrap();

        h.controller.reconcile(U).await.unwrap();

        let sandbox = h.cri.sandbox_for_pod(U).unwrap();
        assert_eq!(sandbox.metadata.name, "hello");
        assert_eq!(h.cri.containers().len(), 2);

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Running);
        for status in &pod.status.container_statuses {
            assert!(!status.container_id.is_empty());
            assert_eq!(status.image, "https://host/a.wasm");
        }

        let infos = h.controller.get_container_infos().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].owner, "alice");
        assert_eq!(infos[0].sandbox_id, sandbox.id);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();

        h.controller.reconcile(U).await.unwrap();
        let first = h.pods.get(U).await.unwrap().unwrap();
        h.controller.reconcile(U).await.unwrap();
        let second = h.pods.get(U).await.unwrap().unwrap();

        assert_eq!(h.cri.containers().len(), 1);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reconcile_of_same_pod_is_skipped() {
        let h = harness().await;
        h.cri.set_pull_delay(Duration::from_millis(100));
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();

        let second = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let started = Instant::now();
            h.controller.reconcile(U).await.unwrap();
            started.elapsed()
        };
        let (first, waited) = tokio::join!(h.controller.reconcile(U), second);
        first.unwrap();

        assert!(waited < Duration::from_millis(100));
        assert_eq!(h.cri.sandboxes().len(), 1);
        assert_eq!(h.cri.containers().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deletion_during_reconcile_is_kept() {
        let h = harness().await;
        h.cri.set_pull_delay(Duration::from_millis(100));
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();

        let delete = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.pods
                .modify(U, |current| {
                    current.map(|mut pod| {
                        pod.meta.deletion_timestamp = time::now();
                        pod
                    })
                })
                .await
                .unwrap();
        };
        let (reconciled, ()) = tokio::join!(h.controller.reconcile(U), delete);
        reconciled.unwrap();

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert!(pod.meta.is_deleting());
        assert_eq!(pod.digest(), ContainerStateDigest::Running);

        h.controller.reconcile(U).await.unwrap();
        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert!(pod.meta.is_deleting());
        assert_eq!(pod.digest(), ContainerStateDigest::Terminated);
        assert!(h.cri.sandbox_for_pod(U).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_rehosted_during_reconcile_loses_local_sandbox() {
        let h = harness().await;
        h.cri.set_pull_delay(Duration::from_millis(100));
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();

        let rehost = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            h.pods
                .modify(U, |current| {
                    current.map(|mut pod| {
                        pod.spec.target_node = B.to_string();
                        pod.status = PodStatus::waiting(1);
                        pod.status.running_node = B.to_string();
                        pod
                    })
                })
                .await
                .unwrap();
        };
        let (reconciled, ()) = tokio::join!(h.controller.reconcile(U), rehost);
        reconciled.unwrap();

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.status.running_node, B);
        assert_eq!(pod.digest(), ContainerStateDigest::Waiting);
        assert!(h.cri.sandbox_for_pod(U).is_none());
        assert!(h.controller.get_container_infos().await.is_empty());
    }

    #[tokio::test]
    async fn test_pull_failure_marks_unknown() {
        let h = harness().await;
        h.cri.set_fail_pulls(true);
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();

        h.controller.reconcile(U).await.unwrap();

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Unknown);
        assert!(pod.state_message().contains("failed to start container"));
    }

    #[tokio::test]
    async fn test_exit_is_recorded() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();

        let id = h.cri.containers()[0].id.clone();
        h.cri.exit_container(&id, 2);
        h.controller.reconcile(U).await.unwrap();

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Terminated);
        assert_eq!(pod.status.container_statuses[0].exit_code(), Some(2));
    }

    #[tokio::test]
    async fn test_foreign_pod_sandbox_is_removed() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();
        assert!(h.cri.sandbox_for_pod(U).is_some());

        let mut pod = h.pods.get(U).await.unwrap().unwrap();
        pod.status.running_node = B.to_string();
        pod.spec.target_node = B.to_string();
        h.pods.update(&pod).await.unwrap();

        h.controller.reconcile(U).await.unwrap();
        assert!(h.cri.sandbox_for_pod(U).is_none());
        assert!(h.controller.get_container_infos().await.is_empty());
    }

    #[tokio::test]
    async fn test_deletion_stops_and_removes() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();

        let mut pod = h.pods.get(U).await.unwrap().unwrap();
        pod.meta.deletion_timestamp = time::now();
        h.pods.update(&pod).await.unwrap();

        h.controller.reconcile(U).await.unwrap();

        assert!(h.cri.sandboxes().is_empty());
        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Terminated);
        assert_eq!(pod.status.container_statuses[0].exit_code(), Some(0));
    }

    #[tokio::test]
    async fn test_deletion_without_sandbox_marks_never_started() {
        let h = harness().await;
        let mut pod = scheduled_pod(&["c1"]);
        pod.meta.deletion_timestamp = time::now();
        h.pods.create(&pod).await.unwrap();

        h.controller.reconcile(U).await.unwrap();

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Unknown);
        assert!(pod.state_message().contains(REASON_NEVER_STARTED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_container_is_forced_after_timeout() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();
        h.cri.set_ignore_stops(true);

        let mut pod = h.pods.get(U).await.unwrap().unwrap();
        pod.meta.deletion_timestamp = time::now();
        h.pods.update(&pod).await.unwrap();

        h.controller.reconcile(U).await.unwrap();
        assert!(h.cri.sandbox_for_pod(U).is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        h.controller.reconcile(U).await.unwrap();

        assert!(h.cri.sandboxes().is_empty());
        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Terminated);
        assert_eq!(
            pod.status.container_statuses[0].exit_code(),
            Some(FORCED_EXIT_CODE)
        );
    }

    #[tokio::test]
    async fn test_unexpected_container_is_a_mismatch() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();

        let sandbox = h.cri.sandbox_for_pod(U).unwrap();
        h.cri.inject_container(&sandbox.id, "intruder").unwrap();

        let err = h.controller.reconcile(U).await.unwrap_err();
        assert!(matches!(err, Error::SandboxMismatch { .. }));
        assert!(h.cri.sandboxes().is_empty());

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Unknown);
    }

    #[tokio::test]
    async fn test_lost_container_is_unknown() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();

        let id = h.cri.containers()[0].id.clone();
        h.cri.lose_container(&id);
        h.controller.reconcile(U).await.unwrap();

        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert!(pod.state_message().contains(REASON_RUNTIME_UNKNOWN));
    }

    #[tokio::test]
    async fn test_restarted_container_replaces_exited_one() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();
        let first = h.cri.containers()[0].id.clone();
        h.cri.exit_container(&first, 1);
        h.controller.reconcile(U).await.unwrap();

        let mut pod = h.pods.get(U).await.unwrap().unwrap();
        pod.status.container_statuses[0].reset_for_restart();
        h.pods.update(&pod).await.unwrap();
        h.controller.reconcile(U).await.unwrap();

        let containers = h.cri.containers();
        assert_eq!(containers.len(), 1);
        assert_ne!(containers[0].id, first);
        let pod = h.pods.get(U).await.unwrap().unwrap();
        assert_eq!(pod.digest(), ContainerStateDigest::Running);
        assert!(pod.status.container_statuses[0].last_state.is_some());
    }

    #[tokio::test]
    async fn test_missing_pod_removes_sandbox() {
        let h = harness().await;
        h.pods.create(&scheduled_pod(&["c1"])).await.unwrap();
        h.controller.reconcile(U).await.unwrap();

        h.pods.delete(U).await.unwrap();
        h.controller.reconcile(U).await.unwrap();
        assert!(h.cri.sandboxes().is_empty());
    }
}
