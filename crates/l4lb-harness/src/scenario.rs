//! Phases and the scenario builder.
//!
//! A scenario is a plain ordered list of [`Phase`]s. Nothing runs until the
//! list is handed to [`crate::orchestrator::Harness::run`].

use std::fmt;
use std::net::SocketAddr;

use crate::sut::{RecorderDefinition, ServiceDefinition, ServiceId, SutConfiguration};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseAction {
    /// Reinstall the SUT with the base configuration overlaid by `variant`.
    Install {
        variant: SutConfiguration,
        extra_args: Vec<String>,
    },
    DefineService(ServiceDefinition),
    /// Delete, then confirm the id is gone from the service list.
    DeleteService(ServiceId),
    Snapshot(String),
    AssertSnapshotEqual { left: String, right: String },
    AssertInvariant(ServiceId),
    /// `None` uses the configured attempt count.
    Probe {
        target: SocketAddr,
        attempts: Option<u32>,
    },
    WaitReady(SocketAddr),
    DefineRecorder(RecorderDefinition),
    DeleteRecorder(u16),
}

impl fmt::Display for PhaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseAction::Install { variant, .. } => write!(f, "install [{variant}]"),
            PhaseAction::DefineService(svc) => write!(f, "define service {}", svc.id),
            PhaseAction::DeleteService(id) => write!(f, "delete service {id}"),
            PhaseAction::Snapshot(label) => write!(f, "snapshot {label}"),
            PhaseAction::AssertSnapshotEqual { left, right } => {
                write!(f, "assert {left} == {right}")
            }
            PhaseAction::AssertInvariant(id) => write!(f, "check Maglev table of service {id}"),
            PhaseAction::Probe { target, .. } => write!(f, "probe {target}"),
            PhaseAction::WaitReady(target) => write!(f, "wait for {target}"),
            PhaseAction::DefineRecorder(rec) => write!(f, "define recorder {}", rec.id),
            PhaseAction::DeleteRecorder(id) => write!(f, "delete recorder {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phase {
    pub label: String,
    pub action: PhaseAction,
}

/// Fluent construction of a phase list.
///
/// ```
/// use l4lb_harness::scenario::Scenario;
/// use l4lb_harness::sut::SutConfiguration;
///
/// let phases = Scenario::new()
///     .install("baseline", SutConfiguration::new())
///     .snapshot("before")
///     .build();
/// assert_eq!(phases.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct Scenario {
    phases: Vec<Phase>,
}

impl Scenario {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(mut self, label: impl Into<String>, action: PhaseAction) -> Self {
        self.phases.push(Phase {
            label: label.into(),
            action,
        });
        self
    }

    pub fn install(self, label: &str, variant: SutConfiguration) -> Self {
        self.install_with_args(label, variant, Vec::new())
    }

    pub fn install_with_args(
        self,
        label: &str,
        variant: SutConfiguration,
        extra_args: Vec<String>,
    ) -> Self {
        self.phase(
            label,
            PhaseAction::Install {
                variant,
                extra_args,
            },
        )
    }

    pub fn define_service(self, service: ServiceDefinition) -> Self {
        let label = format!("define service {}", service.id);
        self.phase(label, PhaseAction::DefineService(service))
    }

    pub fn delete_service(self, id: ServiceId) -> Self {
        self.phase(format!("delete service {id}"), PhaseAction::DeleteService(id))
    }

    /// Snapshot phases are labelled by the snapshot label itself.
    pub fn snapshot(self, label: &str) -> Self {
        self.phase(
            format!("snapshot {label}"),
            PhaseAction::Snapshot(label.to_string()),
        )
    }

    pub fn assert_snapshots_equal(self, left: &str, right: &str) -> Self {
        self.phase(
            format!("{left} == {right}"),
            PhaseAction::AssertSnapshotEqual {
                left: left.to_string(),
                right: right.to_string(),
            },
        )
    }

    pub fn assert_invariant(self, id: ServiceId) -> Self {
        self.phase(format!("maglev sanity {id}"), PhaseAction::AssertInvariant(id))
    }

    pub fn probe(self, target: SocketAddr) -> Self {
        self.phase(
            format!("probe {target}"),
            PhaseAction::Probe {
                target,
                attempts: None,
            },
        )
    }

    pub fn wait_ready(self, target: SocketAddr) -> Self {
        self.phase(format!("wait {target}"), PhaseAction::WaitReady(target))
    }

    pub fn define_recorder(self, recorder: RecorderDefinition) -> Self {
        let label = format!("define recorder {}", recorder.id);
        self.phase(label, PhaseAction::DefineRecorder(recorder))
    }

    pub fn delete_recorder(self, id: u16) -> Self {
        self.phase(format!("delete recorder {id}"), PhaseAction::DeleteRecorder(id))
    }

    pub fn build(self) -> Vec<Phase> {
        self.phases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_order_and_labels() {
        let id = ServiceId::new(1).unwrap();
        let vip: SocketAddr = "10.0.0.4:80".parse().unwrap();
        let phases = Scenario::new()
            .install("maglev/native", SutConfiguration::new())
            .wait_ready(vip)
            .assert_invariant(id)
            .snapshot("native")
            .assert_snapshots_equal("native", "disabled")
            .build();

        let labels: Vec<_> = phases.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "maglev/native",
                "wait 10.0.0.4:80",
                "maglev sanity 1",
                "snapshot native",
                "native == disabled",
            ]
        );
        assert_eq!(phases[2].action, PhaseAction::AssertInvariant(id));
    }

    #[test]
    fn action_display() {
        let action = PhaseAction::Install {
            variant: SutConfiguration::new().with("bpf-lb-acceleration", "disabled"),
            extra_args: vec![],
        };
        assert_eq!(action.to_string(), "install [--bpf-lb-acceleration=disabled]");
        assert_eq!(PhaseAction::DeleteRecorder(2).to_string(), "delete recorder 2");
    }
}
