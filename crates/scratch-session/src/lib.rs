/// Label keys attached to every container and volume the orchestrator creates.
///
/// The runtime is the only store of session metadata, so anything the
/// orchestrator needs to read back later lives here rather than in the name.
pub mod labels {
    pub const MANAGED_BY: &str = "scratch.managed-by";
    pub const MANAGED_BY_VALUE: &str = "scratch-orchestrator";
    pub const SESSION_ID: &str = "scratch.session.id";
    pub const DISPLAY_NAME: &str = "scratch.session.display-name";
    pub const PORT: &str = "scratch.session.port";
    pub const VOLUME: &str = "scratch.session.volume";
    pub const PROFILE: &str = "scratch.profile";
    pub const CREATED_AT: &str = "scratch.session.created-at";
    /// Token of the port reservation taken when the container was created.
    pub const RESERVATION: &str = "scratch.session.reservation";
}

/// Lifecycle of a single session.
///
/// ```text
/// Requested -> Allocating -> Provisioning -> Ready -> Stopping -> Destroyed
///      \___________\______________\___________\__________\-----> Error
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Requested,
    Allocating,
    Provisioning,
    Ready,
    Stopping,
    Destroyed,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Destroyed | Self::Error)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == Self::Error {
            return true;
        }
        matches!(
            (self, next),
            (Self::Requested, Self::Allocating)
                | (Self::Allocating, Self::Provisioning)
                | (Self::Provisioning, Self::Ready)
                | (Self::Ready, Self::Stopping)
                | (Self::Stopping, Self::Destroyed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Allocating => "allocating",
            Self::Provisioning => "provisioning",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Destroyed => "destroyed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: SessionState,
    pub to: SessionState,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid session transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for InvalidTransition {}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSession {
    /// Display name exactly as the caller supplied it.
    pub name: String,
    pub session_id: String,
    pub container_id: String,
    pub container_name: String,
    pub port: u16,
    pub url: String,
}

/// A session as re-derived from one running container.
///
/// Transient: two list calls may observe different runtime snapshots.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub id: String,
    pub name: String,
    pub session_id: Option<String>,
    pub display_name: Option<String>,
    /// `None` when the container does not publish the service port.
    pub port: Option<u16>,
    pub url: Option<String>,
    pub view_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_legal() {
        let path = [
            SessionState::Requested,
            SessionState::Allocating,
            SessionState::Provisioning,
            SessionState::Ready,
            SessionState::Stopping,
            SessionState::Destroyed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn error_is_reachable_from_every_non_terminal_state() {
        for s in [
            SessionState::Requested,
            SessionState::Allocating,
            SessionState::Provisioning,
            SessionState::Ready,
            SessionState::Stopping,
        ] {
            assert!(s.can_transition_to(SessionState::Error));
        }
    }

    #[test]
    fn terminal_states_absorb() {
        assert!(!SessionState::Destroyed.can_transition_to(SessionState::Error));
        assert!(!SessionState::Error.can_transition_to(SessionState::Requested));
        assert!(!SessionState::Destroyed.can_transition_to(SessionState::Ready));
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(!SessionState::Requested.can_transition_to(SessionState::Ready));
        assert!(!SessionState::Ready.can_transition_to(SessionState::Destroyed));
        assert!(!SessionState::Provisioning.can_transition_to(SessionState::Allocating));
    }

    #[test]
    fn session_view_serializes_camel_case_with_null_port() {
        let v = SessionView {
            id: "abc".to_string(),
            name: "scratch_x_5801".to_string(),
            session_id: Some("x".to_string()),
            display_name: None,
            port: None,
            url: None,
            view_url: None,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert!(json.get("port").unwrap().is_null());
        assert!(json.get("viewUrl").unwrap().is_null());
        assert_eq!(json.get("sessionId").unwrap(), "x");
    }
}
