//! Capability boundary to the external container runtime.
//!
//! The session controller only ever talks to [`ContainerRuntime`]; the Docker
//! adapter lives in [`docker`].

use std::{collections::BTreeMap, time::Duration};

pub mod docker;

pub use docker::DockerRuntime;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),
    #[error("container runtime error: {0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Host port -> container port publication requested at create time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub container_port: u16,
    pub host_port: u16,
}

/// Everything needed to create one session container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=value` pairs.
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub port_bindings: Vec<PortBinding>,
    /// Docker bind syntax: `source:target[:ro]`.
    pub binds: Vec<String>,
    /// Mount point -> tmpfs options.
    pub tmpfs: BTreeMap<String, String>,
    pub shm_size_bytes: Option<i64>,
}

/// A port the runtime reports for a container. `public_port` is `None` when
/// the internal port is exposed but not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedPort {
    pub private_port: u16,
    pub public_port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    /// Raw runtime name; Docker prefixes it with `/`.
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PublishedPort>,
    pub running: bool,
}

impl ContainerInfo {
    /// Name without the runtime's leading separator.
    pub fn display_name(&self) -> &str {
        self.name.strip_prefix('/').unwrap_or(&self.name)
    }

    pub fn public_port_for(&self, private_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .filter(|p| p.private_port == private_port)
            .find_map(|p| p.public_port)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Returns the runtime handle (container id).
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Running containers whose image reference contains `image_match`, in
    /// runtime order.
    async fn list_running(&self, image_match: &str) -> Result<Vec<ContainerInfo>, RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Fire-and-forget: returns once the runtime accepted the exec, without
    /// waiting for the command to finish.
    async fn exec_detached(&self, id: &str, cmd: Vec<String>) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// `remove_volumes` only covers anonymous volumes; named volumes survive.
    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError>;

    /// Create-if-absent.
    async fn ensure_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError>;

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;
}
