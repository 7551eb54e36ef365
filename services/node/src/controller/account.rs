//! Account controller.
//!
//! Accounts aggregate the liveness of an owner's pods and nodes. Every node
//! hosting a pod refreshes its entry on each keep-alive tick; the node
//! holding the account's primary replica removes entries whose timestamp
//! stopped changing, and tombstones the account once nothing changes at all.
//!
//! Staleness is judged by how long a timestamp has stayed the same on the
//! local clock, so node clocks never need to agree.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use burrow_api::{time, Account, AccountNodeState, AccountPodState};
use burrow_id::AccountUuid;
use burrow_reconcile::ObservationLog;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::container::ContainerInfo;
use super::Disposition;
use crate::config::ControllerSettings;
use crate::error::Result;
use crate::kvs::{self, AccountKvs};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Entry {
    Pod(String),
    Node(String),
}

pub struct AccountController {
    node_id: String,
    accounts: AccountKvs,
    state_lifetime: Duration,
    account_lifetime: Duration,
    /// Account name to the observation log of its entries.
    logs: Mutex<HashMap<String, ObservationLog<Entry>>>,
}

impl AccountController {
    pub fn new(node_id: impl Into<String>, accounts: AccountKvs, settings: &ControllerSettings) -> Self {
        Self {
            node_id: node_id.into(),
            accounts,
            state_lifetime: settings.state_lifetime,
            account_lifetime: settings.account_lifetime,
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Merges pod entries and an optional node entry into the account,
    /// creating the record on first use.
    pub async fn update_pod_and_node_state(
        &self,
        account: &str,
        pods: BTreeMap<String, AccountPodState>,
        node_id: &str,
        node_state: Option<AccountNodeState>,
    ) -> Result<()> {
        let creator = self.node_id.clone();
        self.accounts
            .modify(AccountUuid::from_name(account).as_str(), |current| {
                let mut record = current.unwrap_or_else(|| Account::new(account, &creator));
                record.state.pods.extend(pods);
                if let Some(node_state) = node_state {
                    record.state.nodes.insert(node_id.to_string(), node_state);
                }
                Some(record)
            })
            .await?;
        debug!(account = %account, "Account state refreshed");
        Ok(())
    }

    /// Pod entries of `account`; empty when the account does not exist.
    pub async fn get_pod_state(&self, account: &str) -> Result<BTreeMap<String, AccountPodState>> {
        Ok(self
            .accounts
            .get_by_name(account)
            .await?
            .map(|a| a.state.pods)
            .unwrap_or_default())
    }

    /// Node entries of `account`; empty when the account does not exist.
    pub async fn get_node_state(
        &self,
        account: &str,
    ) -> Result<BTreeMap<String, AccountNodeState>> {
        Ok(self
            .accounts
            .get_by_name(account)
            .await?
            .map(|a| a.state.nodes)
            .unwrap_or_default())
    }

    /// Refreshes the accounts of locally hosted pods.
    ///
    /// Pods are grouped by owner; `own_account` also gets this node's entry.
    pub async fn keep_alive(
        &self,
        infos: &[ContainerInfo],
        own_account: &str,
        node_state: AccountNodeState,
    ) -> Result<()> {
        let now = time::now();
        let mut by_owner: BTreeMap<&str, BTreeMap<String, AccountPodState>> = BTreeMap::new();
        for info in infos.iter().filter(|i| !i.owner.is_empty()) {
            by_owner.entry(info.owner.as_str()).or_default().insert(
                info.pod_uuid.clone(),
                AccountPodState {
                    running_node: self.node_id.clone(),
                    timestamp: now.clone(),
                },
            );
        }
        by_owner.entry(own_account).or_default();

        let mut node_state = Some(node_state);
        for (owner, pods) in by_owner {
            let node = if owner == own_account {
                node_state.take()
            } else {
                None
            };
            if let Err(e) = self
                .update_pod_and_node_state(owner, pods, &self.node_id, node)
                .await
            {
                warn!(account = %owner, error = %e, "Keep-alive failed");
            }
        }
        Ok(())
    }

    /// Garbage-collects one account record held by this node.
    pub async fn reconcile_local(&self, key: &str, raw: &[u8]) -> Result<Disposition> {
        let account: Account = match kvs::decode(key, raw) {
            Ok(account) => account,
            Err(e) => {
                warn!(key = %key, error = %e, "Reaping invalid account record");
                return Ok(Disposition::Delete);
            }
        };
        let name = account.meta.name.clone();
        let now = Instant::now();

        let (stale_pods, stale_nodes, idle) = {
            let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
            let log = logs
                .entry(name.clone())
                .or_insert_with(|| ObservationLog::new(now));

            let mut stale_pods = BTreeMap::new();
            for (uuid, pod) in &account.state.pods {
                let entry = Entry::Pod(uuid.clone());
                if log.observe(&entry, &pod.timestamp, now) > self.state_lifetime {
                    log.forget(&entry, now);
                    stale_pods.insert(uuid.clone(), pod.timestamp.clone());
                }
            }
            let mut stale_nodes = BTreeMap::new();
            for (nid, node) in &account.state.nodes {
                let entry = Entry::Node(nid.clone());
                if log.observe(&entry, &node.timestamp, now) > self.state_lifetime {
                    log.forget(&entry, now);
                    stale_nodes.insert(nid.clone(), node.timestamp.clone());
                }
            }
            log.touch(now);
            log.purge(now, self.state_lifetime * 2);
            (stale_pods, stale_nodes, log.idle_for(now))
        };

        if !stale_pods.is_empty() || !stale_nodes.is_empty() {
            info!(
                account = %name,
                pods = stale_pods.len(),
                nodes = stale_nodes.len(),
                "Removing stale account entries"
            );
            // Entries refreshed since our read are kept.
            self.accounts
                .modify(&account.meta.uuid, |current| {
                    current.map(|mut record| {
                        record
                            .state
                            .pods
                            .retain(|uuid, pod| stale_pods.get(uuid) != Some(&pod.timestamp));
                        record
                            .state
                            .nodes
                            .retain(|nid, node| stale_nodes.get(nid) != Some(&node.timestamp));
                        record
                    })
                })
                .await?;
            return Ok(Disposition::Keep);
        }

        if idle > self.account_lifetime {
            info!(account = %name, idle_secs = idle.as_secs(), "Account expired");
            self.logs
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&name);
            return Ok(Disposition::Delete);
        }

        Ok(Disposition::Keep)
    }

    /// Forgets logs of accounts this node no longer sees.
    pub fn clean_logs(&self) {
        let now = Instant::now();
        let max_age = self.state_lifetime * 2;
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        let before = logs.len();
        logs.retain(|_, log| log.unchecked_for(now) <= max_age);
        let dropped = before - logs.len();
        if dropped > 0 {
            debug!(dropped, "Dropped idle account logs");
        }
    }

    #[cfg(test)]
    fn log_count(&self) -> usize {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
