//! In-process container runtime for development and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use burrow_api::time;
use tracing::{debug, info};

use super::*;

#[derive(Debug, Default)]
struct MockState {
    sandboxes: BTreeMap<String, PodSandbox>,
    containers: BTreeMap<String, MockContainer>,
    images: BTreeMap<String, Image>,
}

#[derive(Debug, Clone)]
struct MockContainer {
    status: ContainerStatus,
    sandbox_id: String,
}

impl MockContainer {
    fn summary(&self) -> Container {
        Container {
            id: self.status.id.clone(),
            pod_sandbox_id: self.sandbox_id.clone(),
            metadata: self.status.metadata.clone(),
            image: self.status.image.clone(),
            image_ref: self.status.image_ref.clone(),
            state: self.status.state,
            created_at: self.status.created_at.clone(),
        }
    }
}

/// Mock runtime.
///
/// Containers move `Created -> Running -> Exited`. Stops exit with code 0
/// unless stops are being ignored, which simulates a container that never
/// exits.
pub struct MockCri {
    state: Mutex<MockState>,

    /// Counter for generating sandbox, container, and image ids.
    counter: AtomicU64,

    fail_pulls: AtomicBool,
    fail_creates: AtomicBool,
    ignore_stops: AtomicBool,
    /// Milliseconds every `PullImage` takes.
    pull_delay_ms: AtomicU64,
}

impl MockCri {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            counter: AtomicU64::new(0),
            fail_pulls: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            ignore_stops: AtomicBool::new(false),
            pull_delay_ms: AtomicU64::new(0),
        }
    }

    /// A runtime whose image pulls always fail.
    pub fn failing() -> Self {
        let cri = Self::new();
        cri.set_fail_pulls(true);
        cri
    }

    pub fn set_fail_pulls(&self, fail: bool) {
        self.fail_pulls.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Makes every image pull take `delay`, cached images included.
    pub fn set_pull_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.pull_delay_ms.store(millis, Ordering::SeqCst);
    }

    /// When set, `StopContainer` succeeds but the container keeps running.
    pub fn set_ignore_stops(&self, ignore: bool) {
        self.ignore_stops.store(ignore, Ordering::SeqCst);
    }

    /// Makes a running container exit with `exit_code`.
    pub fn exit_container(&self, container_id: &str, exit_code: i32) -> bool {
        let mut state = self.lock();
        let Some(container) = state.containers.get_mut(container_id) else {
            return false;
        };
        container.status.state = ContainerState::Exited;
        container.status.finished_at = time::now();
        container.status.exit_code = exit_code;
        info!(container_id, exit_code, "[MOCK] Container exited");
        true
    }

    /// Makes a container report `Unknown`.
    pub fn lose_container(&self, container_id: &str) -> bool {
        let mut state = self.lock();
        let Some(container) = state.containers.get_mut(container_id) else {
            return false;
        };
        container.status.state = ContainerState::Unknown;
        true
    }

    /// Adds a container to a sandbox behind the controller's back.
    pub fn inject_container(&self, sandbox_id: &str, name: &str) -> Option<String> {
        let mut state = self.lock();
        if !state.sandboxes.contains_key(sandbox_id) {
            return None;
        }
        let id = self.next_id("container");
        let now = time::now();
        state.containers.insert(
            id.clone(),
            MockContainer {
                status: ContainerStatus {
                    id: id.clone(),
                    metadata: ContainerMetadata {
                        name: name.to_string(),
                    },
                    state: ContainerState::Running,
                    created_at: now.clone(),
                    started_at: now,
                    finished_at: String::new(),
                    exit_code: 0,
                    image: ImageSpec {
                        image: String::new(),
                    },
                    image_ref: String::new(),
                },
                sandbox_id: sandbox_id.to_string(),
            },
        );
        Some(id)
    }

    pub fn sandboxes(&self) -> Vec<PodSandbox> {
        self.lock().sandboxes.values().cloned().collect()
    }

    /// The sandbox created for pod `uid`, if any.
    pub fn sandbox_for_pod(&self, uid: &str) -> Option<PodSandbox> {
        self.lock()
            .sandboxes
            .values()
            .find(|s| s.metadata.uid == uid)
            .cloned()
    }

    pub fn containers(&self) -> Vec<Container> {
        self.lock()
            .containers
            .values()
            .map(MockContainer::summary)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{n:016x}")
    }
}

impl Default for MockCri {
    fn default() -> Self {
        Self::new()
    }
}

fn sandbox_not_found(id: &str) -> CriError {
    CriError::NotFound {
        kind: "sandbox",
        id: id.to_string(),
    }
}

fn container_not_found(id: &str) -> CriError {
    CriError::NotFound {
        kind: "container",
        id: id.to_string(),
    }
}

#[async_trait]
impl Cri for MockCri {
    async fn run_pod_sandbox(
        &self,
        request: RunPodSandboxRequest,
    ) -> Result<RunPodSandboxResponse, CriError> {
        let id = self.next_id("sandbox");
        info!(
            sandbox_id = %id,
            pod_uuid = %request.metadata.uid,
            "[MOCK] Sandbox created"
        );
        self.lock().sandboxes.insert(
            id.clone(),
            PodSandbox {
                id: id.clone(),
                metadata: request.metadata,
                state: PodSandboxState::Ready,
                created_at: time::now(),
            },
        );
        Ok(RunPodSandboxResponse { pod_sandbox_id: id })
    }

    async fn stop_pod_sandbox(&self, request: PodSandboxRef) -> Result<(), CriError> {
        let mut state = self.lock();
        let sandbox = state
            .sandboxes
            .get_mut(&request.pod_sandbox_id)
            .ok_or_else(|| sandbox_not_found(&request.pod_sandbox_id))?;
        sandbox.state = PodSandboxState::NotReady;

        let now = time::now();
        for container in state.containers.values_mut() {
            if container.sandbox_id == request.pod_sandbox_id
                && container.status.state != ContainerState::Exited
            {
                container.status.state = ContainerState::Exited;
                container.status.finished_at = now.clone();
            }
        }
        Ok(())
    }

    async fn remove_pod_sandbox(&self, request: PodSandboxRef) -> Result<(), CriError> {
        let mut state = self.lock();
        if state.sandboxes.remove(&request.pod_sandbox_id).is_none() {
            return Err(sandbox_not_found(&request.pod_sandbox_id));
        }
        state
            .containers
            .retain(|_, c| c.sandbox_id != request.pod_sandbox_id);
        info!(sandbox_id = %request.pod_sandbox_id, "[MOCK] Sandbox removed");
        Ok(())
    }

    async fn pod_sandbox_status(
        &self,
        request: PodSandboxRef,
    ) -> Result<PodSandboxStatusResponse, CriError> {
        let state = self.lock();
        let sandbox = state
            .sandboxes
            .get(&request.pod_sandbox_id)
            .ok_or_else(|| sandbox_not_found(&request.pod_sandbox_id))?;
        let containers_statuses = state
            .containers
            .values()
            .filter(|c| c.sandbox_id == request.pod_sandbox_id)
            .map(|c| c.status.clone())
            .collect();
        Ok(PodSandboxStatusResponse {
            status: sandbox.clone(),
            containers_statuses,
            timestamp: time::now(),
        })
    }

    async fn list_pod_sandbox(
        &self,
        request: ListPodSandboxRequest,
    ) -> Result<ListPodSandboxResponse, CriError> {
        let filter = request.filter;
        let items = self
            .lock()
            .sandboxes
            .values()
            .filter(|s| filter.id.as_ref().is_none_or(|id| *id == s.id))
            .filter(|s| filter.state.is_none_or(|st| st == s.state))
            .cloned()
            .collect();
        Ok(ListPodSandboxResponse { items })
    }

    async fn create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<CreateContainerResponse, CriError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(CriError::Call {
                method: "CreateContainer",
                message: "mock runtime configured to fail".to_string(),
            });
        }

        let mut state = self.lock();
        if !state.sandboxes.contains_key(&request.pod_sandbox_id) {
            return Err(sandbox_not_found(&request.pod_sandbox_id));
        }
        let image_ref = state
            .images
            .get(&request.config.image.image)
            .map(|i| i.id.clone())
            .ok_or_else(|| CriError::NotFound {
                kind: "image",
                id: request.config.image.image.clone(),
            })?;

        let id = self.next_id("container");
        debug!(
            container_id = %id,
            name = %request.config.metadata.name,
            "[MOCK] Container created"
        );
        state.containers.insert(
            id.clone(),
            MockContainer {
                status: ContainerStatus {
                    id: id.clone(),
                    metadata: request.config.metadata,
                    state: ContainerState::Created,
                    created_at: time::now(),
                    started_at: String::new(),
                    finished_at: String::new(),
                    exit_code: 0,
                    image: request.config.image,
                    image_ref,
                },
                sandbox_id: request.pod_sandbox_id,
            },
        );
        Ok(CreateContainerResponse { container_id: id })
    }

    async fn start_container(&self, request: ContainerRef) -> Result<(), CriError> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(&request.container_id)
            .ok_or_else(|| container_not_found(&request.container_id))?;
        if container.status.state != ContainerState::Created {
            return Err(CriError::Call {
                method: "StartContainer",
                message: format!("container {} is not in created state", request.container_id),
            });
        }
        container.status.state = ContainerState::Running;
        container.status.started_at = time::now();
        Ok(())
    }

    async fn stop_container(&self, request: ContainerRef) -> Result<(), CriError> {
        let mut state = self.lock();
        let container = state
            .containers
            .get_mut(&request.container_id)
            .ok_or_else(|| container_not_found(&request.container_id))?;
        if self.ignore_stops.load(Ordering::SeqCst) {
            debug!(container_id = %request.container_id, "[MOCK] Ignoring stop");
            return Ok(());
        }
        if container.status.state != ContainerState::Exited {
            container.status.state = ContainerState::Exited;
            container.status.finished_at = time::now();
            container.status.exit_code = 0;
        }
        Ok(())
    }

    async fn remove_container(&self, request: ContainerRef) -> Result<(), CriError> {
        self.lock()
            .containers
            .remove(&request.container_id)
            .map(|_| ())
            .ok_or_else(|| container_not_found(&request.container_id))
    }

    async fn list_containers(
        &self,
        request: ListContainersRequest,
    ) -> Result<ListContainersResponse, CriError> {
        let filter = request.filter;
        let containers = self
            .lock()
            .containers
            .values()
            .filter(|c| filter.id.as_ref().is_none_or(|id| *id == c.status.id))
            .filter(|c| filter.state.is_none_or(|st| st == c.status.state))
            .filter(|c| {
                filter
                    .pod_sandbox_id
                    .as_ref()
                    .is_none_or(|id| *id == c.sandbox_id)
            })
            .map(MockContainer::summary)
            .collect();
        Ok(ListContainersResponse { containers })
    }

    async fn container_status(
        &self,
        request: ContainerRef,
    ) -> Result<ContainerStatusResponse, CriError> {
        self.lock()
            .containers
            .get(&request.container_id)
            .map(|c| ContainerStatusResponse {
                status: c.status.clone(),
            })
            .ok_or_else(|| container_not_found(&request.container_id))
    }

    async fn list_images(
        &self,
        request: ListImagesRequest,
    ) -> Result<ListImagesResponse, CriError> {
        let images = self
            .lock()
            .images
            .values()
            .filter(|i| request.image.as_ref().is_none_or(|spec| *spec == i.spec))
            .cloned()
            .collect();
        Ok(ListImagesResponse { images })
    }

    async fn pull_image(&self, request: PullImageRequest) -> Result<PullImageResponse, CriError> {
        let delay = self.pull_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            debug!(image = %request.image.image, delay_ms = delay, "[MOCK] Slow pull");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_pulls.load(Ordering::SeqCst) {
            return Err(CriError::Call {
                method: "PullImage",
                message: format!("failed to fetch {}", request.image.image),
            });
        }

        let mut state = self.lock();
        if let Some(image) = state.images.get(&request.image.image) {
            return Ok(PullImageResponse {
                image_ref: image.id.clone(),
            });
        }
        let id = self.next_id("image");
        info!(image = %request.image.image, image_ref = %id, "[MOCK] Image pulled");
        state.images.insert(
            request.image.image.clone(),
            Image {
                id: id.clone(),
                spec: request.image,
                runtime: Vec::new(),
            },
        );
        Ok(PullImageResponse { image_ref: id })
    }

    async fn remove_image(&self, request: RemoveImageRequest) -> Result<(), CriError> {
        self.lock()
            .images
            .remove(&request.image.image)
            .map(|_| ())
            .ok_or_else(|| CriError::NotFound {
                kind: "image",
                id: request.image.image,
            })
    }
}
