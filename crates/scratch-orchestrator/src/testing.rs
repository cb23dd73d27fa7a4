//! In-memory stand-ins for Docker and the OS port table.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use crate::port_alloc::PortProbe;
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, PublishedPort, RuntimeError};

#[derive(Debug, Default)]
pub struct FakeProbe {
    busy: Mutex<HashSet<u16>>,
    probes: AtomicUsize,
}

impl FakeProbe {
    pub fn occupy(&self, port: u16) {
        self.busy.lock().unwrap().insert(port);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PortProbe for FakeProbe {
    async fn is_free(&self, port: u16) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent allocations actually interleave.
        tokio::task::yield_now().await;
        !self.busy.lock().unwrap().contains(&port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Ping,
    Create,
    Start,
    List,
    Exec,
    Stop,
    Remove,
    Volume,
}

#[derive(Debug, Clone)]
struct FakeContainer {
    info: ContainerInfo,
    spec: ContainerSpec,
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    containers: BTreeMap<String, FakeContainer>,
    volumes: BTreeMap<String, BTreeMap<String, String>>,
    execs: Vec<(String, Vec<String>)>,
    failures: HashMap<FakeOp, RuntimeError>,
}

/// Docker-like semantics where the orchestrator cares: names and host ports
/// are exclusive, ports are only reported while running, stop/remove on an
/// unknown id is `NotFound`.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn fail(&self, op: FakeOp, err: RuntimeError) {
        self.state.lock().unwrap().failures.insert(op, err);
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().execs.clone()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    pub fn spec_of(&self, id: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.spec.clone())
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.keys().cloned().collect()
    }

    pub fn volume_labels(&self, name: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().unwrap().volumes.get(name).cloned()
    }

    /// Removes a container behind the orchestrator's back.
    pub fn remove_out_of_band(&self, id: &str) {
        self.state.lock().unwrap().containers.remove(id);
    }

    /// Adds a running container that was not created through the gateway.
    pub fn seed_running(&self, name: &str, image: &str) -> String {
        self.seed(ContainerInfo {
            name: format!("/{name}"),
            image: image.to_string(),
            running: true,
            ..Default::default()
        })
    }

    pub fn seed(&self, mut info: ContainerInfo) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("seed{:04}", state.next_id);
        info.id = id.clone();
        let spec = ContainerSpec {
            name: info.display_name().to_string(),
            image: info.image.clone(),
            labels: info.labels.clone(),
            ..Default::default()
        };
        state.containers.insert(id.clone(), FakeContainer { info, spec });
        id
    }

    fn check(state: &FakeState, op: FakeOp) -> Result<(), RuntimeError> {
        match state.failures.get(&op) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        Self::check(&self.state.lock().unwrap(), FakeOp::Ping)
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::Create)?;
        if state
            .containers
            .values()
            .any(|c| c.info.display_name() == spec.name)
        {
            return Err(RuntimeError::Conflict(format!(
                "container name {} already in use",
                spec.name
            )));
        }
        state.next_id += 1;
        let id = format!("fake{:04}", state.next_id);
        let info = ContainerInfo {
            id: id.clone(),
            name: format!("/{}", spec.name),
            image: spec.image.clone(),
            labels: spec.labels.clone(),
            ports: Vec::new(),
            running: false,
        };
        state.containers.insert(
            id.clone(),
            FakeContainer {
                info,
                spec: spec.clone(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::Start)?;
        let spec = state
            .containers
            .get(id)
            .map(|c| c.spec.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;

        for b in &spec.port_bindings {
            let taken = state.containers.iter().any(|(other_id, c)| {
                other_id != id
                    && c.info.running
                    && c.info.ports.iter().any(|p| p.public_port == Some(b.host_port))
            });
            if taken {
                return Err(RuntimeError::Other(format!(
                    "port {} is already allocated",
                    b.host_port
                )));
            }
        }

        let c = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        c.info.running = true;
        c.info.ports = spec
            .port_bindings
            .iter()
            .map(|b| PublishedPort {
                private_port: b.container_port,
                public_port: Some(b.host_port),
            })
            .collect();
        Ok(())
    }

    async fn list_running(&self, image_match: &str) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::List)?;
        Ok(state
            .containers
            .values()
            .filter(|c| c.info.running && c.info.image.contains(image_match))
            .map(|c| c.info.clone())
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let state = self.state.lock().unwrap();
        state
            .containers
            .get(id)
            .map(|c| c.info.clone())
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))
    }

    async fn exec_detached(&self, id: &str, cmd: Vec<String>) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::Exec)?;
        if !state.containers.get(id).is_some_and(|c| c.info.running) {
            return Err(RuntimeError::NotFound(format!(
                "no running container: {id}"
            )));
        }
        state.execs.push((id.to_string(), cmd));
        Ok(())
    }

    async fn stop_container(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::Stop)?;
        let c = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(format!("no such container: {id}")))?;
        c.info.running = false;
        c.info.ports.clear();
        Ok(())
    }

    async fn remove_container(&self, id: &str, _remove_volumes: bool) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::Remove)?;
        match state.containers.get(id) {
            None => Err(RuntimeError::NotFound(format!("no such container: {id}"))),
            Some(c) if c.info.running => Err(RuntimeError::Conflict(format!(
                "cannot remove running container {id}"
            ))),
            Some(_) => {
                state.containers.remove(id);
                Ok(())
            }
        }
    }

    async fn ensure_volume(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::Volume)?;
        state
            .volumes
            .entry(name.to_string())
            .or_insert_with(|| labels.clone());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&state, FakeOp::Volume)?;
        if !state.volumes.contains_key(name) {
            return Err(RuntimeError::NotFound(format!("no such volume: {name}")));
        }
        let prefix = format!("{name}:");
        if state
            .containers
            .values()
            .any(|c| c.spec.binds.iter().any(|b| b.starts_with(&prefix)))
        {
            return Err(RuntimeError::Conflict(format!("volume {name} is in use")));
        }
        state.volumes.remove(name);
        Ok(())
    }
}
