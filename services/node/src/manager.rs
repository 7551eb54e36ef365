//! Local reconcile manager.
//!
//! Two tickers drive the controllers:
//!
//! - **Reconcile** (3s): snapshot the records whose primary replica is on
//!   this node and hand each to its controller. A controller may ask for
//!   the record to be tombstoned.
//! - **Keep-alive** (30s): refresh account entries for locally hosted pods
//!   and this node, publish the node, and drop idle account logs.
//!
//! Per-record failures are logged and never stop a pass.

use burrow_api::{ResourceKey, ResourceType};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::ControllerSettings;
use crate::controller::{Controllers, Disposition};
use crate::error::Result;
use crate::kvs::{Kvs, RecordKvs};

pub struct Manager {
    kvs: Kvs,
    controllers: Controllers,
    account: String,
    settings: ControllerSettings,
}

impl Manager {
    pub fn new(
        kvs: Kvs,
        controllers: Controllers,
        account: impl Into<String>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            kvs,
            controllers,
            account: account.into(),
            settings,
        }
    }

    /// Run both tickers until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            reconcile_interval_secs = self.settings.reconcile_interval.as_secs(),
            keepalive_interval_secs = self.settings.keepalive_interval.as_secs(),
            "Starting local reconcile loop"
        );

        let mut reconcile_interval = tokio::time::interval(self.settings.reconcile_interval);
        let mut keepalive_interval = tokio::time::interval(self.settings.keepalive_interval);

        loop {
            tokio::select! {
                _ = reconcile_interval.tick() => {
                    self.reconcile_once().await;
                }
                _ = keepalive_interval.tick() => {
                    self.keep_alive_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Local reconcile loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the locally held records.
    pub async fn reconcile_once(&self) {
        let entries = match self.kvs.local_data().await {
            Ok(entries) => entries,
            Err(e) => {
                debug!(error = %e, "Skipping reconcile tick");
                return;
            }
        };

        for (key, raw) in entries {
            let parsed = match ResourceKey::parse(&key) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unrecognized key");
                    continue;
                }
            };

            match self.dispatch(&parsed, &key, &raw).await {
                Ok(Disposition::Keep) => {}
                Ok(Disposition::Delete) => {
                    if let Err(e) = self.tombstone(&parsed, &key).await {
                        warn!(key = %key, error = %e, "Failed to tombstone record");
                    }
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Reconcile failed");
                }
            }
        }
    }

    async fn dispatch(&self, parsed: &ResourceKey, key: &str, raw: &[u8]) -> Result<Disposition> {
        let c = &self.controllers;
        match parsed.resource_type {
            ResourceType::Pod => c.pods.reconcile_local(key, raw).await,
            ResourceType::Record => c.pods.reconcile_record_local(key, raw).await,
            ResourceType::Account => c.accounts.reconcile_local(key, raw).await,
            ResourceType::Object => c.objects.reconcile_local(key, raw).await,
            // Node presence travels by spread, not through the KVS.
            ResourceType::Node => Ok(Disposition::Keep),
        }
    }

    async fn tombstone(&self, parsed: &ResourceKey, key: &str) -> Result<()> {
        self.kvs.tombstone(key).await?;
        if parsed.resource_type == ResourceType::Pod {
            self.kvs.tombstone(&RecordKvs::key(&parsed.uuid)).await?;
        }
        debug!(key = %key, "Record tombstoned");
        Ok(())
    }

    /// Refresh account liveness and publish this node.
    pub async fn keep_alive_once(&self) {
        let c = &self.controllers;
        let infos = c.containers.get_container_infos().await;
        if let Err(e) = c
            .accounts
            .keep_alive(&infos, &self.account, c.nodes.node_state())
            .await
        {
            warn!(error = %e, "Account keep-alive failed");
        }

        if let Err(e) = c.nodes.tick().await {
            warn!(error = %e, "Node publication failed");
        }

        c.accounts.clean_logs();
        c.objects.cleanup();
    }
}
