use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
        RemoveContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions},
    models::{ContainerInspectResponse, ContainerSummary, HostConfig, PortMap},
    volume::{CreateVolumeOptions, RemoveVolumeOptions},
};

use super::{ContainerInfo, ContainerRuntime, ContainerSpec, PublishedPort, RuntimeError};

/// [`ContainerRuntime`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Unix socket / `DOCKER_HOST`, whichever the local defaults resolve to.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

fn map_err(e: BollardError) -> RuntimeError {
    match e {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Other(format!("{status_code}: {message}")),
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

/// 304 means "already in the requested state".
fn is_not_modified(e: &BollardError) -> bool {
    matches!(
        e,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn build_config(spec: &ContainerSpec) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    let mut port_bindings = HashMap::new();
    for b in &spec.port_bindings {
        let key = format!("{}/tcp", b.container_port);
        exposed_ports.insert(key.clone(), HashMap::new());
        port_bindings.insert(
            key,
            Some(vec![bollard::models::PortBinding {
                host_ip: None,
                host_port: Some(b.host_port.to_string()),
            }]),
        );
    }

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: if spec.binds.is_empty() {
            None
        } else {
            Some(spec.binds.clone())
        },
        tmpfs: if spec.tmpfs.is_empty() {
            None
        } else {
            Some(spec.tmpfs.clone().into_iter().collect())
        },
        shm_size: spec.shm_size_bytes,
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.clone()),
        labels: Some(spec.labels.clone().into_iter().collect()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn ports_from_map(map: Option<PortMap>) -> Vec<PublishedPort> {
    let mut out = Vec::new();
    for (key, bindings) in map.unwrap_or_default() {
        // Keys look like "3001/tcp".
        let Some(private_port) = key.split('/').next().and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };
        let published: Vec<u16> = bindings
            .unwrap_or_default()
            .iter()
            .filter_map(|b| b.host_port.as_deref())
            .filter_map(|p| p.parse::<u16>().ok())
            .collect();
        if published.is_empty() {
            out.push(PublishedPort {
                private_port,
                public_port: None,
            });
        }
        for public_port in published {
            out.push(PublishedPort {
                private_port,
                public_port: Some(public_port),
            });
        }
    }
    out.sort_by_key(|p| (p.private_port, p.public_port));
    out
}

fn info_from_inspect(resp: ContainerInspectResponse) -> ContainerInfo {
    let config = resp.config.unwrap_or_default();
    ContainerInfo {
        id: resp.id.unwrap_or_default(),
        name: resp.name.unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        labels: config.labels.unwrap_or_default().into_iter().collect(),
        ports: ports_from_map(resp.network_settings.and_then(|n| n.ports)),
        running: resp.state.and_then(|s| s.running).unwrap_or(false),
    }
}

fn info_from_summary(c: ContainerSummary) -> ContainerInfo {
    ContainerInfo {
        id: c.id.unwrap_or_default(),
        name: c
            .names
            .and_then(|names| names.into_iter().next())
            .unwrap_or_default(),
        image: c.image.unwrap_or_default(),
        labels: c.labels.unwrap_or_default().into_iter().collect(),
        ports: c
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| PublishedPort {
                private_port: p.private_port,
                public_port: p.public_port,
            })
            .collect(),
        running: c.state.as_deref() == Some("running"),
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(map_err)?;
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let resp = self
            .docker
            .create_container(Some(options), build_config(spec))
            .await
            .map_err(map_err)?;
        for w in &resp.warnings {
            tracing::warn!(container = %spec.name, warning = %w, "docker create warning");
        }
        Ok(resp.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        match self.docker.start_container::<String>(id, None).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn list_running(&self, image_match: &str) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_err)?;
        Ok(containers
            .into_iter()
            .filter(|c| c.image.as_deref().is_some_and(|i| i.contains(image_match)))
            .map(info_from_summary)
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let resp = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_err)?;
        Ok(info_from_inspect(resp))
    }

    async fn exec_detached(&self, id: &str, cmd: Vec<String>) -> Result<(), RuntimeError> {
        let exec = self
            .docker
            .create_exec(
                id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(map_err)?;
        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let t = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        match self
            .docker
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_err(e)),
        }
    }

    async fn remove_container(&self, id: &str, remove_volumes: bool) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    v: remove_volumes,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_err)
    }

    async fn ensure_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        match self.docker.inspect_volume(name).await {
            Ok(_) => {
                tracing::info!(volume = %name, "reusing existing volume");
                return Ok(());
            }
            Err(e) => {
                let e = map_err(e);
                if !e.is_not_found() {
                    return Err(e);
                }
            }
        }

        let options = CreateVolumeOptions {
            name: name.to_string(),
            labels: labels.clone().into_iter().collect(),
            ..Default::default()
        };
        self.docker.create_volume(options).await.map_err(map_err)?;
        tracing::info!(volume = %name, "created volume");
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: false }))
            .await
            .map_err(map_err)
    }
}
