//! Fault-isolated teardown.
//!
//! Every resource the harness acquires is recorded as a [`TeardownStep`] the
//! moment it exists. [`TeardownLedger::run`] replays the steps newest-first;
//! each step runs in its own fault boundary and failures are collected into a
//! [`TeardownReport`] instead of being raised.

use std::fmt;
use std::net::IpAddr;

use crate::error::{CleanupError, CommandError};
use crate::host::{host_prefix, HostNet};
use crate::runtime::{NetworkHandle, NodeRuntime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownStep {
    /// SUT container running inside a node.
    RemoveSut { node: String, container: String },
    RemoveRoute { destination: IpAddr },
    RemoveNode { name: String },
    RemoveNetwork { handle: NetworkHandle },
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownStep::RemoveSut { node, container } => {
                write!(f, "remove SUT {container} on {node}")
            }
            TeardownStep::RemoveRoute { destination } => {
                write!(f, "remove route {}", host_prefix(*destination))
            }
            TeardownStep::RemoveNode { name } => write!(f, "remove node {name}"),
            TeardownStep::RemoveNetwork { handle } => {
                write!(f, "remove network {}", handle.name())
            }
        }
    }
}

impl TeardownStep {
    fn execute<R: NodeRuntime, H: HostNet>(&self, runtime: &R, host: &H) -> Result<(), CommandError> {
        match self {
            TeardownStep::RemoveSut { node, container } => {
                let out = runtime.exec_in_node(node, &["docker", "rm", "-f", container])?;
                if out.success() {
                    return Ok(());
                }
                let err = CommandError::Failed {
                    command: format!("docker exec {node} docker rm -f {container}"),
                    code: out.exit_code,
                    stderr: out.stderr.trim().to_string(),
                };
                if err.is_not_found() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
            TeardownStep::RemoveRoute { destination } => host.remove_route(*destination),
            TeardownStep::RemoveNode { name } => runtime.remove_node(name),
            TeardownStep::RemoveNetwork { handle } => runtime.remove_network(handle),
        }
    }
}

/// Outcome of a teardown run.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub completed: Vec<String>,
    pub failures: Vec<CleanupError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered record of acquired resources.
#[derive(Debug, Default)]
pub struct TeardownLedger {
    steps: Vec<TeardownStep>,
}

impl TeardownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a step. Recording the same step twice keeps one copy.
    pub fn push(&mut self, step: TeardownStep) {
        if !self.steps.contains(&step) {
            self.steps.push(step);
        }
    }

    pub fn steps(&self) -> &[TeardownStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Executes all recorded steps, newest first, and drains the ledger.
    ///
    /// A second call is a no-op. A failing step never stops the remaining ones.
    pub fn run<R: NodeRuntime, H: HostNet>(&mut self, runtime: &R, host: &H) -> TeardownReport {
        let mut report = TeardownReport::default();
        while let Some(step) = self.steps.pop() {
            let name = step.to_string();
            match step.execute(runtime, host) {
                Ok(()) => {
                    tracing::info!(step = %name, "teardown");
                    report.completed.push(name);
                }
                Err(source) => {
                    tracing::warn!(step = %name, error = %source, "teardown step failed");
                    report.failures.push(CleanupError { step: name, source });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeHost, FakeRuntime};
    use crate::runtime::ExecOutput;

    fn ledger() -> TeardownLedger {
        let mut ledger = TeardownLedger::new();
        ledger.push(TeardownStep::RemoveNetwork {
            handle: NetworkHandle::new("l4lb"),
        });
        ledger.push(TeardownStep::RemoveNode {
            name: "lb-node".into(),
        });
        ledger.push(TeardownStep::RemoveNode {
            name: "nginx".into(),
        });
        ledger.push(TeardownStep::RemoveRoute {
            destination: "10.0.0.4".parse().unwrap(),
        });
        ledger.push(TeardownStep::RemoveSut {
            node: "lb-node".into(),
            container: "cilium-lb".into(),
        });
        ledger
    }

    #[test]
    fn runs_newest_first() {
        let runtime = FakeRuntime::new();
        let host = FakeHost::new();
        let report = ledger().run(&runtime, &host);

        assert!(report.is_clean());
        assert_eq!(
            report.completed,
            vec![
                "remove SUT cilium-lb on lb-node",
                "remove route 10.0.0.4/32",
                "remove node nginx",
                "remove node lb-node",
                "remove network l4lb",
            ]
        );
        assert_eq!(runtime.removed_nodes(), vec!["nginx", "lb-node"]);
        assert_eq!(runtime.removed_networks(), vec!["l4lb"]);
        assert_eq!(host.removed_routes().len(), 1);
    }

    #[test]
    fn failure_does_not_stop_remaining_steps() {
        let runtime = FakeRuntime::new();
        runtime.fail_remove_node("nginx");
        let host = FakeHost::new();
        host.fail_routes();

        let report = ledger().run(&runtime, &host);

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].step, "remove route 10.0.0.4/32");
        assert_eq!(report.failures[1].step, "remove node nginx");
        // Everything after the failures still ran.
        assert_eq!(runtime.removed_nodes(), vec!["lb-node"]);
        assert_eq!(runtime.removed_networks(), vec!["l4lb"]);
    }

    #[test]
    fn second_run_is_noop() {
        let runtime = FakeRuntime::new();
        let host = FakeHost::new();
        let mut ledger = ledger();

        ledger.run(&runtime, &host);
        let again = ledger.run(&runtime, &host);

        assert!(again.completed.is_empty());
        assert!(ledger.is_empty());
        assert_eq!(runtime.removed_networks().len(), 1);
    }

    #[test]
    fn missing_sut_container_counts_as_removed() {
        let runtime = FakeRuntime::new();
        runtime.respond(
            "lb-node",
            "docker rm -f cilium-lb",
            ExecOutput::failed(1, "Error: No such container: cilium-lb"),
        );
        let mut ledger = TeardownLedger::new();
        ledger.push(TeardownStep::RemoveSut {
            node: "lb-node".into(),
            container: "cilium-lb".into(),
        });

        let report = ledger.run(&runtime, &FakeHost::new());
        assert!(report.is_clean());
    }

    #[test]
    fn duplicate_steps_recorded_once() {
        let mut ledger = TeardownLedger::new();
        let step = TeardownStep::RemoveNode {
            name: "lb-node".into(),
        };
        ledger.push(step.clone());
        ledger.push(step);
        assert_eq!(ledger.steps().len(), 1);
    }
}
