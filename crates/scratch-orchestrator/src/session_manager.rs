//! Create / list / destroy on top of the runtime gateway.
//!
//! No session state is kept here. The runtime's container list is the only
//! record of which sessions exist; the allocator's reservation table only
//! covers the window between picking a port and the runtime binding it.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use scratch_session::{CreatedSession, InvalidTransition, SessionState, SessionView, labels};

use crate::{
    error::SessionError,
    identity,
    port_alloc::{PortAllocator, PortProbe, PortRange, Reservation},
    profile::{Profile, SessionProfile},
    provisioning::ProvisioningTrigger,
    public_url::{PublicUrls, UrlStrategy},
    runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, PortBinding},
};

/// Longest display name accepted, in characters.
pub const MAX_NAME_CHARS: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile: SessionProfile,
    pub pool: PortRange,
    pub url_strategy: UrlStrategy,
    /// Host path bound read-only at the profile's homepage target.
    pub homepage: Option<String>,
    pub settle_delay: Duration,
    pub provision_delay: Duration,
    pub reservation_ttl: Duration,
    pub stop_timeout: Duration,
}

impl SessionConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let spec = profile.spec();
        Self {
            pool: spec.default_pool,
            profile: spec,
            url_strategy: UrlStrategy::Localhost,
            homepage: None,
            settle_delay: Duration::from_secs(2),
            provision_delay: Duration::from_secs(5),
            reservation_ttl: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    runtime: Arc<dyn ContainerRuntime>,
    allocator: PortAllocator,
    trigger: ProvisioningTrigger,
    urls: PublicUrls,
    config: Arc<SessionConfig>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        runtime: Arc<dyn ContainerRuntime>,
        probe: Arc<dyn PortProbe>,
    ) -> Self {
        let allocator = PortAllocator::new(config.pool, probe, config.reservation_ttl);
        let trigger = ProvisioningTrigger::new(runtime.clone(), config.provision_delay);
        let urls = PublicUrls::new(config.url_strategy.clone(), config.pool);
        Self {
            runtime,
            allocator,
            trigger,
            urls,
            config: Arc::new(config),
        }
    }

    pub fn profile(&self) -> Profile {
        self.config.profile.profile
    }

    pub fn pool(&self) -> PortRange {
        self.allocator.range()
    }

    pub fn url_mode(&self) -> &'static str {
        self.urls.strategy().mode_name()
    }

    /// Whether the container runtime answers at all.
    pub async fn ping(&self) -> Result<(), SessionError> {
        Ok(self.runtime.ping().await?)
    }

    pub async fn create(&self, raw_name: &str) -> Result<CreatedSession, SessionError> {
        validate_name(raw_name)?;
        let session_id = identity::normalize(raw_name);
        if !identity::is_normalized(&session_id) {
            return Err(SessionError::InvalidInput(
                "name has no usable characters".to_string(),
            ));
        }

        let mut life = Lifecycle::new(&session_id);
        life.advance(SessionState::Allocating);
        let reservation = match self.allocator.allocate().await {
            Ok(reservation) => reservation,
            Err(exhausted) => {
                let err = SessionError::CapacityExceeded {
                    start: exhausted.start,
                    end: exhausted.end,
                    capacity: self.allocator.range().len(),
                };
                life.fail(&err);
                return Err(err);
            }
        };

        let port = reservation.port;
        let container_name = identity::container_name(&session_id, port);
        let container_id = match self
            .launch(&mut life, raw_name, &session_id, &container_name, &reservation)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.allocator.release(&reservation);
                life.fail(&e);
                return Err(e);
            }
        };

        if let Some(script) = self.config.profile.provisioning_script {
            // Detached: the handle is dropped and the outcome only reaches the log.
            drop(
                self.trigger
                    .fire(container_id.clone(), container_name.clone(), script),
            );
        }

        tokio::time::sleep(self.config.settle_delay).await;
        life.advance(SessionState::Ready);

        let url = self.urls.url_for(port);
        tracing::info!(
            session_id = %session_id,
            container = %container_name,
            port,
            url = %url,
            "session ready"
        );
        Ok(CreatedSession {
            name: raw_name.to_string(),
            session_id,
            container_id,
            container_name,
            port,
            url,
        })
    }

    /// Volume, create, start. A container that fails to start is left in
    /// place for an operator to inspect.
    async fn launch(
        &self,
        life: &mut Lifecycle<'_>,
        raw_name: &str,
        session_id: &str,
        container_name: &str,
        reservation: &Reservation,
    ) -> Result<String, SessionError> {
        let profile = &self.config.profile;
        let volume = match profile.volume_mount {
            Some(_) => {
                let volume = identity::volume_name(session_id);
                let mut volume_labels = BTreeMap::new();
                volume_labels.insert(
                    labels::MANAGED_BY.to_string(),
                    labels::MANAGED_BY_VALUE.to_string(),
                );
                volume_labels.insert(labels::SESSION_ID.to_string(), session_id.to_string());
                self.runtime
                    .ensure_volume(&volume, &volume_labels)
                    .await
                    .map_err(SessionError::provisioning("volume"))?;
                Some(volume)
            }
            None => None,
        };

        let spec = self.container_spec(raw_name, session_id, container_name, reservation, volume);
        let container_id = self
            .runtime
            .create_container(&spec)
            .await
            .map_err(SessionError::provisioning("create"))?;

        life.advance(SessionState::Provisioning);
        if let Err(e) = self.runtime.start_container(&container_id).await {
            tracing::warn!(
                container = %container_name,
                container_id = %container_id,
                error = %e,
                "container created but failed to start; left for manual cleanup"
            );
            return Err(SessionError::provisioning("start")(e));
        }
        Ok(container_id)
    }

    fn container_spec(
        &self,
        raw_name: &str,
        session_id: &str,
        container_name: &str,
        reservation: &Reservation,
        volume: Option<String>,
    ) -> ContainerSpec {
        let profile = &self.config.profile;
        let port = reservation.port;

        let mut spec_labels = BTreeMap::new();
        spec_labels.insert(
            labels::MANAGED_BY.to_string(),
            labels::MANAGED_BY_VALUE.to_string(),
        );
        spec_labels.insert(labels::SESSION_ID.to_string(), session_id.to_string());
        spec_labels.insert(labels::DISPLAY_NAME.to_string(), raw_name.to_string());
        spec_labels.insert(labels::PORT.to_string(), port.to_string());
        spec_labels.insert(
            labels::RESERVATION.to_string(),
            reservation.token.clone(),
        );
        spec_labels.insert(
            labels::PROFILE.to_string(),
            profile.profile.as_str().to_string(),
        );
        spec_labels.insert(
            labels::CREATED_AT.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );

        let mut binds = Vec::new();
        if let (Some(volume), Some(mount)) = (&volume, &profile.volume_mount) {
            binds.push(format!("{volume}:{mount}"));
            spec_labels.insert(labels::VOLUME.to_string(), volume.clone());
        }
        if let (Some(host), Some(target)) = (&self.config.homepage, &profile.homepage_target) {
            binds.push(format!("{host}:{target}:ro"));
        }

        ContainerSpec {
            name: container_name.to_string(),
            image: profile.image.clone(),
            env: profile.env.iter().map(|(k, v)| format!("{k}={v}")).collect(),
            labels: spec_labels,
            port_bindings: vec![PortBinding {
                container_port: profile.service_port,
                host_port: port,
            }],
            binds,
            tmpfs: profile.tmpfs.clone(),
            shm_size_bytes: profile.shm_size_bytes,
        }
    }

    /// Running session containers, in runtime order.
    pub async fn list(&self) -> Result<Vec<SessionView>, SessionError> {
        let containers = self
            .runtime
            .list_running(&self.config.profile.image_match)
            .await?;
        Ok(containers.iter().map(|c| self.view(c)).collect())
    }

    fn view(&self, c: &ContainerInfo) -> SessionView {
        let port = c.public_port_for(self.config.profile.service_port);
        let url = port.map(|p| self.urls.url_for(p));
        SessionView {
            id: c.id.clone(),
            name: c.display_name().to_string(),
            session_id: c.label(labels::SESSION_ID).map(str::to_string),
            display_name: c.label(labels::DISPLAY_NAME).map(str::to_string),
            port,
            view_url: url.clone(),
            url,
        }
    }

    /// Stops and removes one session container. The per-user volume is kept.
    pub async fn destroy(&self, id: &str) -> Result<(), SessionError> {
        if id.trim().is_empty() {
            return Err(SessionError::InvalidInput("session id is required".to_string()));
        }
        let what = format!("session {id}");
        let info = self
            .runtime
            .inspect_container(id)
            .await
            .map_err(SessionError::from_lookup(&what))?;
        if !self.is_session(&info) {
            return Err(SessionError::NotFound(what));
        }

        let name = info.display_name().to_string();
        let session_id = info.label(labels::SESSION_ID).unwrap_or(name.as_str()).to_string();
        let mut life = Lifecycle::observed(&session_id);
        life.advance(SessionState::Stopping);

        let result = async {
            self.runtime
                .stop_container(&info.id, self.config.stop_timeout)
                .await
                .map_err(SessionError::from_lookup(&what))?;
            self.runtime
                .remove_container(&info.id, true)
                .await
                .map_err(SessionError::from_lookup(&what))
        }
        .await;
        if let Err(e) = result {
            life.fail(&e);
            return Err(e);
        }
        life.advance(SessionState::Destroyed);

        // Only the reservation this container was created under is dropped;
        // once it has expired the port may already belong to a newer create.
        let port = info.label(labels::PORT).and_then(|p| p.parse::<u16>().ok());
        if let (Some(port), Some(token)) = (port, info.label(labels::RESERVATION)) {
            self.allocator.release_if(port, token);
        }
        tracing::info!(container = %name, port = ?port, "session destroyed");
        Ok(())
    }

    /// Administrative removal of a per-user volume.
    pub async fn remove_volume(&self, name: &str) -> Result<(), SessionError> {
        let valid = name
            .strip_prefix(identity::CONTAINER_PREFIX)
            .is_some_and(identity::is_normalized);
        if !valid {
            return Err(SessionError::InvalidInput(format!(
                "not a session volume name: {name}"
            )));
        }
        let what = format!("volume {name}");
        self.runtime
            .remove_volume(name)
            .await
            .map_err(SessionError::from_lookup(&what))?;
        tracing::info!(volume = %name, "volume removed");
        Ok(())
    }

    fn is_session(&self, info: &ContainerInfo) -> bool {
        info.label(labels::MANAGED_BY) == Some(labels::MANAGED_BY_VALUE)
            || info.image.contains(&self.config.profile.image_match)
    }
}

fn validate_name(raw_name: &str) -> Result<(), SessionError> {
    if raw_name.trim().is_empty() {
        return Err(SessionError::InvalidInput("name is required".to_string()));
    }
    if raw_name.chars().count() > MAX_NAME_CHARS {
        return Err(SessionError::InvalidInput(format!(
            "name is longer than {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(())
}

/// Per-operation view of one session's state machine; only used for logging.
struct Lifecycle<'a> {
    session_id: &'a str,
    state: SessionState,
}

impl<'a> Lifecycle<'a> {
    fn new(session_id: &'a str) -> Self {
        Self {
            session_id,
            state: SessionState::Requested,
        }
    }

    /// A session re-derived from a container the runtime already runs.
    fn observed(session_id: &'a str) -> Self {
        Self {
            session_id,
            state: SessionState::Ready,
        }
    }

    fn advance(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            let err = InvalidTransition {
                from: self.state,
                to: next,
            };
            tracing::error!(session_id = %self.session_id, error = %err, "lifecycle bug");
            return;
        }
        tracing::debug!(
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            "session transition"
        );
        self.state = next;
    }

    fn fail(&mut self, err: &SessionError) {
        tracing::warn!(
            session_id = %self.session_id,
            state = %self.state,
            code = err.code(),
            error = %err,
            "session operation failed"
        );
        self.advance(SessionState::Error);
    }
}
