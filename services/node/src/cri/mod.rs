//! Container runtime interface.
//!
//! A CRI-shaped API over sandboxes, containers, and images. The real runtime
//! lives outside this crate; [`mock::MockCri`] is used in development and
//! tests.

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mock::MockCri;

/// Runtime failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CriError {
    /// The referenced sandbox, container, or image does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// The runtime rejected or failed the call.
    #[error("{method} failed: {message}")]
    Call {
        method: &'static str,
        message: String,
    },
}

// =============================================================================
// Sandbox
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandboxMetadata {
    pub name: String,
    /// Pod uuid; unique across the overlay.
    pub uid: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodSandboxState {
    Ready,
    NotReady,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPodSandboxRequest {
    pub metadata: PodSandboxMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPodSandboxResponse {
    /// Node-local id, unrelated to the pod uuid.
    pub pod_sandbox_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSandboxRef {
    pub pod_sandbox_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandbox {
    pub id: String,
    pub metadata: PodSandboxMetadata,
    pub state: PodSandboxState,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSandboxStatusResponse {
    pub status: PodSandbox,
    pub containers_statuses: Vec<ContainerStatus>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PodSandboxFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PodSandboxState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPodSandboxRequest {
    #[serde(default)]
    pub filter: PodSandboxFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPodSandboxResponse {
    pub items: Vec<PodSandbox>,
}

// =============================================================================
// Container
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub metadata: ContainerMetadata,
    pub image: ImageSpec,
    pub runtime: Vec<String>,
    pub args: Vec<String>,
    pub envs: Vec<KeyValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContainerRequest {
    pub pod_sandbox_id: String,
    pub config: ContainerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateContainerResponse {
    pub container_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRef {
    pub container_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub pod_sandbox_id: String,
    pub metadata: ContainerMetadata,
    pub image: ImageSpec,
    pub image_ref: String,
    pub state: ContainerState,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerStatus {
    pub id: String,
    pub metadata: ContainerMetadata,
    pub state: ContainerState,
    pub created_at: String,
    #[serde(default)]
    pub started_at: String,
    #[serde(default)]
    pub finished_at: String,
    #[serde(default)]
    pub exit_code: i32,
    pub image: ImageSpec,
    pub image_ref: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ContainerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_sandbox_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListContainersRequest {
    #[serde(default)]
    pub filter: ContainerFilter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListContainersResponse {
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStatusResponse {
    pub status: ContainerStatus,
}

// =============================================================================
// Image
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub spec: ImageSpec,
    /// Wasm runtimes the image supports, e.g. `go:1.20`.
    pub runtime: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListImagesRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListImagesResponse {
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullImageRequest {
    pub image: ImageSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullImageResponse {
    pub image_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveImageRequest {
    pub image: ImageSpec,
}

/// Container runtime interface.
#[async_trait]
pub trait Cri: Send + Sync {
    async fn run_pod_sandbox(
        &self,
        request: RunPodSandboxRequest,
    ) -> Result<RunPodSandboxResponse, CriError>;

    async fn stop_pod_sandbox(&self, request: PodSandboxRef) -> Result<(), CriError>;

    /// Removes the sandbox and any containers left in it.
    async fn remove_pod_sandbox(&self, request: PodSandboxRef) -> Result<(), CriError>;

    async fn pod_sandbox_status(
        &self,
        request: PodSandboxRef,
    ) -> Result<PodSandboxStatusResponse, CriError>;

    async fn list_pod_sandbox(
        &self,
        request: ListPodSandboxRequest,
    ) -> Result<ListPodSandboxResponse, CriError>;

    async fn create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<CreateContainerResponse, CriError>;

    async fn start_container(&self, request: ContainerRef) -> Result<(), CriError>;

    async fn stop_container(&self, request: ContainerRef) -> Result<(), CriError>;

    async fn remove_container(&self, request: ContainerRef) -> Result<(), CriError>;

    async fn list_containers(
        &self,
        request: ListContainersRequest,
    ) -> Result<ListContainersResponse, CriError>;

    async fn container_status(
        &self,
        request: ContainerRef,
    ) -> Result<ContainerStatusResponse, CriError>;

    async fn list_images(&self, request: ListImagesRequest)
        -> Result<ListImagesResponse, CriError>;

    async fn pull_image(&self, request: PullImageRequest) -> Result<PullImageResponse, CriError>;

    async fn remove_image(&self, request: RemoveImageRequest) -> Result<(), CriError>;
}
