use thiserror::Error;

// ── Command execution ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` failed (exit {code}): {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("unexpected output from `{command}`: {detail}")]
    Parse { command: String, detail: String },
}

impl CommandError {
    /// True when the command failed because the object it targets does not
    /// exist (container, network, route). Removal paths treat this as success.
    pub fn is_not_found(&self) -> bool {
        match self {
            CommandError::Failed { stderr, .. } => {
                let stderr = stderr.to_ascii_lowercase();
                stderr.contains("no such") || stderr.contains("not found")
            }
            _ => false,
        }
    }
}

// ── Provisioning ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("{step}: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: CommandError,
    },
    #[error("could not resolve {what} of node {node}")]
    Address { node: String, what: &'static str },
    #[error("control plane of {node} not reachable after {attempts} attempts")]
    ControlPlane { node: String, attempts: u32 },
}

impl ProvisionError {
    pub(crate) fn step(step: &'static str) -> impl FnOnce(CommandError) -> Self {
        move |source| ProvisionError::Step { step, source }
    }
}

// ── Cleanup ─────────────────────────────────────────────────────────

/// A teardown step that failed. Collected, logged, never escalated.
#[derive(Debug, Error)]
#[error("{step}: {source}")]
pub struct CleanupError {
    pub step: String,
    #[source]
    pub source: CommandError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_detection() {
        let err = CommandError::Failed {
            command: "docker rm -f lb-node".into(),
            code: 1,
            stderr: "Error response from daemon: No such container: lb-node".into(),
        };
        assert!(err.is_not_found());

        let err = CommandError::Failed {
            command: "docker network rm l4lb".into(),
            code: 1,
            stderr: "Error response from daemon: network l4lb not found".into(),
        };
        assert!(err.is_not_found());

        let err = CommandError::Failed {
            command: "ip route del 10.0.0.4/32".into(),
            code: 2,
            stderr: "RTNETLINK answers: Operation not permitted".into(),
        };
        assert!(!err.is_not_found());
    }
}
