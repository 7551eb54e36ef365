//! Pod controller.
//!
//! Runs on the node holding a pod's primary replica and owns the pod state
//! machine: scheduling, restart, migration, and deletion. Container work is
//! delegated to the running node with a `reconcileContainer` message.
//!
//! ```text
//!   unscheduled --schedule--> stable --migrate--> migrating --terminated--> stable (on target)
//!                               |                     |
//!                               +------ delete -------+--> deleting --terminated--> tombstone
//! ```

use std::time::Duration;

use burrow_api::{
    time, ContainerPhase, ContainerStateDigest, ObjectMeta, Pod, PodSpec, PodStatus, Record,
    ResourceType, RestartPolicy, SCHEDULER_CREATOR,
};
use burrow_id::{NodeId, PodUuid};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::Disposition;
use crate::config::ControllerSettings;
use crate::error::{Error, Result};
use crate::kvs::{self, PodKvs, RecordKvs};
use crate::messaging::MessagingDriver;

/// A pod as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDigest {
    pub name: String,
    pub uuid: String,
    pub running_node: String,
    pub owner: String,
    pub state: String,
}

impl From<&Pod> for ApplicationDigest {
    fn from(pod: &Pod) -> Self {
        Self {
            name: pod.meta.name.clone(),
            uuid: pod.meta.uuid.clone(),
            running_node: pod.status.running_node.clone(),
            owner: pod.meta.owner.clone(),
            state: pod.state_message(),
        }
    }
}

pub struct PodController {
    pods: PodKvs,
    records: RecordKvs,
    messaging: MessagingDriver,
    force_termination_timeout: Duration,
}

impl PodController {
    pub fn new(
        pods: PodKvs,
        records: RecordKvs,
        messaging: MessagingDriver,
        settings: &ControllerSettings,
    ) -> Self {
        Self {
            pods,
            records,
            messaging,
            force_termination_timeout: settings.force_termination_timeout,
        }
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Stores a new, unscheduled pod.
    pub async fn create(
        &self,
        name: &str,
        owner: &str,
        creator_node: &str,
        mut spec: PodSpec,
    ) -> Result<ApplicationDigest> {
        if spec.scheduler.is_none() {
            spec.scheduler = Some(Default::default());
        }
        let uuid = PodUuid::new();
        let pod = Pod {
            meta: ObjectMeta::new(ResourceType::Pod, name, owner, creator_node, uuid.to_string()),
            status: PodStatus::waiting(spec.containers.len()),
            spec,
        };

        self.pods.create(&pod).await?;
        info!(pod_uuid = %uuid, name = %name, owner = %owner, "Pod created");
        Ok(ApplicationDigest::from(&pod))
    }

    pub async fn get(&self, uuid: &str) -> Result<Pod> {
        self.pods
            .get(uuid)
            .await?
            .ok_or_else(|| Error::NotFound(PodKvs::key(uuid)))
    }

    /// Moves a pod to `target_node`.
    ///
    /// An unscheduled pod is placed there directly; a running one only gets
    /// a new target and is moved by the reconcile loop.
    pub async fn migrate(&self, uuid: &str, target_node: &str) -> Result<()> {
        NodeId::parse(target_node).map_err(|e| Error::InvalidArgument(e.to_string()))?;

        let written = self
            .pods
            .modify(uuid, |current| {
                current.map(|mut pod| {
                    if pod.status.running_node.is_empty() {
                        pod.status.running_node = target_node.to_string();
                    }
                    pod.spec.target_node = target_node.to_string();
                    pod
                })
            })
            .await?;

        match written {
            Some(_) => {
                info!(pod_uuid = %uuid, target_node = %target_node, "Pod migration requested");
                Ok(())
            }
            None => Err(Error::NotFound(PodKvs::key(uuid))),
        }
    }

    /// Marks a pod for deletion. Repeated calls keep the first timestamp.
    pub async fn delete(&self, uuid: &str) -> Result<()> {
        let written = self
            .pods
            .modify(uuid, |current| {
                current
                    .filter(|pod| !pod.meta.is_deleting())
                    .map(|mut pod| {
                        pod.meta.deletion_timestamp = time::now();
                        pod
                    })
            })
            .await?;

        if written.is_some() {
            info!(pod_uuid = %uuid, "Pod deletion requested");
        } else {
            debug!(pod_uuid = %uuid, "Pod already deleting or gone");
        }
        Ok(())
    }

    /// Drops a pod that is stuck in `Unknown`.
    pub async fn cleanup(&self, uuid: &str) -> Result<()> {
        let pod = self.get(uuid).await?;
        if pod.digest() != ContainerStateDigest::Unknown {
            return Err(Error::InvalidArgument(format!(
                "pod {uuid} is {}, only unknown pods can be cleaned up",
                pod.digest()
            )));
        }
        self.pods.delete(uuid).await?;
        self.records.delete(uuid).await?;
        info!(pod_uuid = %uuid, "Pod cleaned up");
        Ok(())
    }

    // =========================================================================
    // Local reconcile
    // =========================================================================

    /// Advances one pod record held by this node.
    pub async fn reconcile_local(&self, key: &str, raw: &[u8]) -> Result<Disposition> {
        let mut base: Pod = match kvs::decode(key, raw) {
            Ok(pod) => pod,
            Err(e) => {
                warn!(key = %key, error = %e, "Reaping invalid pod record");
                return Ok(Disposition::Delete);
            }
        };
        let mut pod = base.clone();

        if pod.meta.is_deleting() {
            return self.reconcile_deleting(&mut base, &mut pod).await;
        }

        if pod.status.running_node.is_empty() {
            self.schedule(&mut base, &mut pod).await?;
            return Ok(Disposition::Keep);
        }

        if pod.spec.target_node.is_empty() || pod.spec.target_node == pod.status.running_node {
            self.reconcile_stable(&mut base, &mut pod).await?;
        } else {
            self.reconcile_migrating(&mut base, &mut pod).await?;
        }
        Ok(Disposition::Keep)
    }

    /// Reaps checkpoint records that are invalid or whose pod is gone.
    pub async fn reconcile_record_local(&self, key: &str, raw: &[u8]) -> Result<Disposition> {
        let record: Record = match kvs::decode(key, raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %key, error = %e, "Reaping invalid record");
                return Ok(Disposition::Delete);
            }
        };

        match self.pods.get(&record.meta.uuid).await? {
            Some(_) => Ok(Disposition::Keep),
            None => {
                debug!(pod_uuid = %record.meta.uuid, "Reaping record of a removed pod");
                Ok(Disposition::Delete)
            }
        }
    }

    async fn reconcile_deleting(&self, base: &mut Pod, pod: &mut Pod) -> Result<Disposition> {
        let digest = pod.digest();
        if pod.status.running_node.is_empty() || digest == ContainerStateDigest::Terminated {
            info!(pod_uuid = %pod.meta.uuid, "Pod deleted");
            return Ok(Disposition::Delete);
        }

        if digest == ContainerStateDigest::Unknown {
            let overdue = time::age(&pod.meta.deletion_timestamp)
                .and_then(|age| age.to_std().ok())
                .is_some_and(|age| age > self.force_termination_timeout);
            if overdue {
                warn!(
                    pod_uuid = %pod.meta.uuid,
                    state = %pod.state_message(),
                    "Deleting pod whose containers never reported termination"
                );
                return Ok(Disposition::Delete);
            }
        }

        self.send_reconcile(base, pod).await?;
        Ok(Disposition::Keep)
    }

    async fn schedule(&self, base: &mut Pod, pod: &mut Pod) -> Result<()> {
        let scheduler = pod.scheduler();
        if scheduler.scheduler_type != SCHEDULER_CREATOR {
            return Err(Error::UnsupportedScheduler(scheduler.scheduler_type));
        }

        pod.status.running_node = pod.meta.creator_node.clone();
        pod.spec.target_node = pod.meta.creator_node.clone();
        if !self.commit(base, pod).await? {
            return Ok(());
        }
        info!(
            pod_uuid = %pod.meta.uuid,
            running_node = %pod.status.running_node,
            "Pod scheduled"
        );
        Ok(())
    }

    async fn reconcile_stable(&self, base: &mut Pod, pod: &mut Pod) -> Result<()> {
        let digest = pod.digest();
        if !matches!(
            digest,
            ContainerStateDigest::Terminated | ContainerStateDigest::Unknown
        ) {
            return self.send_reconcile(base, pod).await;
        }

        let mut restarted = Vec::new();
        for (spec, status) in pod
            .spec
            .containers
            .iter()
            .zip(pod.status.container_statuses.iter_mut())
        {
            if spec.restart_policy.should_restart(status) {
                status.reset_for_restart();
                restarted.push(spec.name.as_str());
            }
        }

        if !restarted.is_empty() {
            info!(
                pod_uuid = %pod.meta.uuid,
                containers = %restarted.join(","),
                "Restarting containers"
            );
            if !self.commit(base, pod).await? {
                return Ok(());
            }
            return self.send_reconcile(base, pod).await;
        }

        if digest == ContainerStateDigest::Unknown {
            // Let the running node refresh statuses it can still observe.
            if let Err(e) = self
                .messaging
                .reconcile_container(&pod.status.running_node, &pod.meta.uuid)
                .await
            {
                debug!(pod_uuid = %pod.meta.uuid, error = %e, "Running node still unreachable");
            }
        }
        Ok(())
    }

    async fn reconcile_migrating(&self, base: &mut Pod, pod: &mut Pod) -> Result<()> {
        let rehost = match pod.digest() {
            ContainerStateDigest::Terminated => true,
            ContainerStateDigest::Unknown => pod
                .spec
                .containers
                .iter()
                .zip(&pod.status.container_statuses)
                .filter(|(_, status)| status.phase() == ContainerPhase::Unknown)
                .all(|(spec, _)| spec.restart_policy == RestartPolicy::Always),
            _ => false,
        };

        if !rehost {
            // Ask the current host to stop.
            return self.send_reconcile(base, pod).await;
        }

        let from = pod.status.running_node.clone();
        pod.rehost_to_target();
        if !self.commit(base, pod).await? {
            return Ok(());
        }
        info!(
            pod_uuid = %pod.meta.uuid,
            from = %from,
            to = %pod.status.running_node,
            "Pod rehosted"
        );
        Ok(())
    }

    /// Prompts the running node; on failure the stall is recorded as unknown.
    async fn send_reconcile(&self, base: &mut Pod, pod: &mut Pod) -> Result<()> {
        let running_node = pod.status.running_node.clone();
        let Err(e) = self
            .messaging
            .reconcile_container(&running_node, &pod.meta.uuid)
            .await
        else {
            return Ok(());
        };

        warn!(pod_uuid = %pod.meta.uuid, running_node = %running_node, error = %e, "Failed to reach running node");
        let reason = format!("failed to call reconciliation to {running_node}: {e}");
        for status in &mut pod.status.container_statuses {
            status.mark_unknown(reason.clone());
        }
        self.commit(base, pod).await?;
        Err(e.into())
    }

    /// Writes `pod` if the stored record still equals `base`, which then
    /// becomes `pod`.
    ///
    /// A record changed since the snapshot was taken, by a deletion or a
    /// migration for instance, is left for the next pass.
    async fn commit(&self, base: &mut Pod, pod: &Pod) -> Result<bool> {
        if self.pods.replace(base, pod).await? {
            *base = pod.clone();
            return Ok(true);
        }
        debug!(pod_uuid = %pod.meta.uuid, "Pod changed since the snapshot, deferring");
        Ok(false)
    }
}
