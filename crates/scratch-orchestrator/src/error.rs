use crate::runtime::RuntimeError;

/// Failures reported to callers of the session controller.
///
/// None of these are retried inside the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("no capacity: all {capacity} session ports ({start}..={end}) are in use")]
    CapacityExceeded { start: u16, end: u16, capacity: usize },

    /// The runtime rejected a create/start step. A partially created
    /// container may remain and is not rolled back.
    #[error("provisioning failed during {stage}: {source}")]
    ProvisioningFailed {
        stage: &'static str,
        #[source]
        source: RuntimeError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl SessionError {
    /// Stable machine-readable code for API bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::ProvisioningFailed { .. } => "provisioning_failed",
            Self::NotFound(_) => "not_found",
            Self::Runtime(_) => "runtime_error",
        }
    }

    pub(crate) fn provisioning(stage: &'static str) -> impl FnOnce(RuntimeError) -> Self {
        move |source| Self::ProvisioningFailed { stage, source }
    }

    /// `NotFound` from the runtime becomes a caller-facing `NotFound`.
    pub(crate) fn from_lookup(what: &str) -> impl FnOnce(RuntimeError) -> Self + '_ {
        move |e| match e {
            RuntimeError::NotFound(_) => Self::NotFound(what.to_string()),
            other => Self::Runtime(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_maps_not_found() {
        let e = SessionError::from_lookup("session abc")(RuntimeError::NotFound("x".into()));
        assert!(matches!(e, SessionError::NotFound(ref s) if s == "session abc"));

        let e = SessionError::from_lookup("session abc")(RuntimeError::Other("boom".into()));
        assert_eq!(e.code(), "runtime_error");
    }

    #[test]
    fn provisioning_keeps_cause() {
        let e = SessionError::provisioning("start")(RuntimeError::Conflict("port taken".into()));
        assert_eq!(e.code(), "provisioning_failed");
        assert_eq!(
            e.to_string(),
            "provisioning failed during start: conflict: port taken"
        );
    }

    #[test]
    fn capacity_message_mentions_range() {
        let e = SessionError::CapacityExceeded {
            start: 5801,
            end: 5810,
            capacity: 10,
        };
        assert!(e.to_string().contains("5801..=5810"));
    }
}
