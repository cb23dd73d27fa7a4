//! Best-effort post-start setup inside a session container.
//!
//! The trigger runs detached from the request that created the session. It
//! never retries and its outcome only reaches the log.

use std::{sync::Arc, time::Duration};

use crate::runtime::{ContainerRuntime, RuntimeError};

/// Installs code-server on first boot and starts it on :8080, logging to
/// `/config/code-server.log`.
pub const CODE_SERVER_SCRIPT: &str = r#"#!/bin/bash
if ! command -v code-server &> /dev/null; then
    curl -fsSL https://code-server.dev/install.sh | sh
fi

mkdir -p /config/.config/code-server
mkdir -p /config/workspace
cat > /config/.config/code-server/config.yaml << EOF
bind-addr: 0.0.0.0:8080
auth: none
password:
cert: false
EOF

nohup code-server --config /config/.config/code-server/config.yaml /config/workspace > /config/code-server.log 2>&1 &
echo "code-server started on port 8080"
"#;

/// The only failure class that is swallowed instead of returned.
#[derive(Debug, thiserror::Error)]
#[error("provisioning degraded for {container}: {source}")]
pub struct ProvisioningDegraded {
    pub container: String,
    #[source]
    pub source: RuntimeError,
}

#[derive(Clone)]
pub struct ProvisioningTrigger {
    runtime: Arc<dyn ContainerRuntime>,
    delay: Duration,
}

impl ProvisioningTrigger {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, delay: Duration) -> Self {
        Self { runtime, delay }
    }

    /// Schedules `script` to run in `container_id` after the configured delay.
    ///
    /// The handle carries no result; callers normally drop it.
    pub fn fire(
        &self,
        container_id: String,
        container_name: String,
        script: &'static str,
    ) -> tokio::task::JoinHandle<()> {
        let runtime = self.runtime.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match run(runtime.as_ref(), &container_id, &container_name, script).await {
                Ok(()) => {
                    tracing::info!(container = %container_name, "provisioning script dispatched");
                }
                Err(e) => {
                    tracing::warn!(container = %container_name, error = %e, "provisioning failed; session stays up without it");
                }
            }
        })
    }
}

async fn run(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    container_name: &str,
    script: &str,
) -> Result<(), ProvisioningDegraded> {
    let cmd = vec!["bash".to_string(), "-c".to_string(), script.to_string()];
    runtime
        .exec_detached(container_id, cmd)
        .await
        .map_err(|source| ProvisioningDegraded {
            container: container_name.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeOp, FakeRuntime};

    #[tokio::test]
    async fn fires_one_exec_after_delay() {
        let rt = Arc::new(FakeRuntime::default());
        let id = rt.seed_running("scratch_a_5801", "lscr.io/linuxserver/firefox:latest");
        let trigger = ProvisioningTrigger::new(rt.clone(), Duration::from_millis(5));

        trigger
            .fire(id.clone(), "scratch_a_5801".to_string(), CODE_SERVER_SCRIPT)
            .await
            .unwrap();

        let execs = rt.execs();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].0, id);
        assert_eq!(execs[0].1[0], "bash");
        assert!(execs[0].1[2].contains("code-server"));
    }

    #[tokio::test]
    async fn exec_failure_is_swallowed() {
        let rt = Arc::new(FakeRuntime::default());
        let id = rt.seed_running("scratch_a_5801", "lscr.io/linuxserver/firefox:latest");
        rt.fail(FakeOp::Exec, RuntimeError::Other("exec refused".to_string()));
        let trigger = ProvisioningTrigger::new(rt.clone(), Duration::ZERO);

        // The task completes normally; nothing propagates.
        trigger
            .fire(id, "scratch_a_5801".to_string(), CODE_SERVER_SCRIPT)
            .await
            .unwrap();
        assert!(rt.execs().is_empty());
    }

    #[tokio::test]
    async fn degraded_error_names_container() {
        let rt = FakeRuntime::default();
        let err = run(&rt, "missing", "scratch_gone_5801", "true")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("scratch_gone_5801"));
        assert!(err.source.is_not_found());
    }
}
