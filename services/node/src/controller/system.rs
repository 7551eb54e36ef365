//! System controller: joins the overlay and wires a session.
//!
//! A session exists between `connect` and `disconnect`. It owns the
//! controllers, the inbound message handlers, the dispatcher task, and the
//! local reconcile manager. Reconnection is left to the substrate.

use std::sync::Arc;

use burrow_api::{NodeType, Vector3};
use serde::Serialize;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    AccountController, ContainerController, Controllers, NodeController, ObjectController,
    PodController,
};
use crate::config::ControllerSettings;
use crate::cri::Cri;
use crate::error::{Error, Result};
use crate::kvs::Kvs;
use crate::manager::Manager;
use crate::messaging::{
    install_handlers, run_dispatcher, uninstall_handlers, Dispatcher, MessagingDriver,
};
use crate::substrate::Substrate;

/// Returned by a successful connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectInfo {
    pub account: String,
    pub node: String,
}

/// Snapshot of the node for the frontend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub connected: bool,
    pub account: Option<String>,
    pub node: String,
    pub node_name: Option<String>,
    pub node_type: Option<NodeType>,
    pub position: Option<Vector3>,
    pub publicity: f64,
}

struct Session {
    account: String,
    controllers: Controllers,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct SystemController {
    substrate: Arc<dyn Substrate>,
    cri: Arc<dyn Cri>,
    settings: ControllerSettings,
    session: RwLock<Option<Session>>,
}

impl SystemController {
    pub fn new(substrate: Arc<dyn Substrate>, cri: Arc<dyn Cri>, settings: ControllerSettings) -> Self {
        Self {
            substrate,
            cri,
            settings,
            session: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Joins the overlay and starts the session's tasks.
    pub async fn connect(
        &self,
        url: &str,
        account: &str,
        token: &str,
        node_name: &str,
        node_type: &str,
    ) -> Result<ConnectInfo> {
        let node_type = NodeType::parse(node_type)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown node type '{node_type}'")))?;
        if account.is_empty() {
            return Err(Error::InvalidArgument("account is required".to_string()));
        }

        let mut session = self.session.write().await;
        if session.is_some() {
            return Err(Error::InvalidArgument("already connected".to_string()));
        }

        self.substrate.connect(url, token).await?;
        let node_id = self.substrate.local_node_id();
        let settings = &self.settings;

        let kvs = Kvs::new(Arc::clone(&self.substrate));
        let messaging = MessagingDriver::new(Arc::clone(&self.substrate));
        let nodes = Arc::new(NodeController::new(
            Arc::clone(&self.substrate),
            account,
            node_name,
            node_type,
            settings,
        ));
        let controllers = Controllers {
            pods: Arc::new(PodController::new(
                kvs.pods(),
                kvs.records(),
                messaging.clone(),
                settings,
            )),
            containers: Arc::new(ContainerController::new(
                &node_id,
                kvs.pods(),
                Arc::clone(&self.cri),
                settings,
            )),
            accounts: Arc::new(AccountController::new(&node_id, kvs.accounts(), settings)),
            objects: Arc::new(ObjectController::new(
                &node_id,
                kvs.objects(),
                kvs.pods(),
                Arc::clone(&nodes),
                messaging,
                settings,
            )),
            nodes,
        };

        let (tx, rx) = mpsc::channel(settings.message_queue_depth.max(1));
        install_handlers(self.substrate.as_ref(), tx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = Dispatcher {
            containers: Arc::clone(&controllers.containers),
            nodes: Arc::clone(&controllers.nodes),
            objects: Arc::clone(&controllers.objects),
        };
        let dispatcher_task = tokio::spawn(run_dispatcher(dispatcher, rx, shutdown_rx.clone()));

        let manager = Manager::new(kvs, controllers.clone(), account, settings.clone());
        let manager_task = tokio::spawn(async move { manager.run(shutdown_rx).await });

        *session = Some(Session {
            account: account.to_string(),
            controllers,
            shutdown: shutdown_tx,
            tasks: vec![dispatcher_task, manager_task],
        });

        info!(
            node_id = %node_id,
            account = %account,
            node_name = %node_name,
            node_type = %node_type,
            "Connected to overlay"
        );
        Ok(ConnectInfo {
            account: account.to_string(),
            node: node_id,
        })
    }

    /// Stops the session's tasks and leaves the overlay.
    pub async fn disconnect(&self) -> Result<()> {
        let Some(session) = self.session.write().await.take() else {
            debug!("Disconnect without a session");
            return Ok(());
        };

        let _ = session.shutdown.send(true);
        uninstall_handlers(self.substrate.as_ref());
        for task in session.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Session task ended abnormally");
            }
        }

        self.substrate.disconnect().await?;
        info!(account = %session.account, "Disconnected from overlay");
        Ok(())
    }

    /// Controllers of the current session.
    pub async fn controllers(&self) -> Result<Controllers> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.controllers.clone())
            .ok_or(Error::NotConnected)
    }

    pub async fn get_account(&self) -> Option<String> {
        self.session.read().await.as_ref().map(|s| s.account.clone())
    }

    pub fn get_node(&self) -> String {
        self.substrate.local_node_id()
    }

    pub async fn set_position(
        &self,
        latitude: f64,
        longitude: f64,
        altitude: Option<f64>,
    ) -> Result<Vector3> {
        self.controllers()
            .await?
            .nodes
            .set_position(latitude, longitude, altitude)
            .await
    }

    pub async fn info(&self) -> SystemInfo {
        let session = self.session.read().await;
        let nodes = session.as_ref().map(|s| &s.controllers.nodes);
        SystemInfo {
            connected: self.substrate.is_connected(),
            account: session.as_ref().map(|s| s.account.clone()),
            node: self.substrate.local_node_id(),
            node_name: nodes.map(|n| n.name().to_string()),
            node_type: nodes.map(|n| n.node_type()),
            position: nodes.and_then(|n| n.position()),
            publicity: nodes.map(|n| n.publicity()).unwrap_or_default(),
        }
    }
}
