//! Sequential phase execution.
//!
//! [`Harness`] is the single context a scenario runs in: the SUT client, the
//! lifecycle manager, the prober and all scenario-scoped state. Phases run in
//! order and the first failure ends the run.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::error::{AssertionError, PhaseError, ScenarioError};
use crate::invariant;
use crate::lifecycle::Lifecycle;
use crate::probe::{HttpProbe, Prober};
use crate::recorder;
use crate::scenario::{Phase, PhaseAction};
use crate::snapshot::SnapshotTable;
use crate::sut::{listing_has_id, ServiceDefinition, ServiceId, SutClient, SutConfiguration};

/// State that lives exactly as long as one scenario.
#[derive(Debug, Default)]
pub struct ScenarioState {
    pub snapshots: SnapshotTable,
    /// Services defined and not yet deleted, by id.
    pub services: BTreeMap<ServiceId, ServiceDefinition>,
    pub recorders: BTreeSet<u16>,
    /// Configuration of the most recent install.
    pub installed: Option<SutConfiguration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTiming {
    pub label: String,
    pub elapsed: Duration,
}

/// Per-phase timings of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub phases: Vec<PhaseTiming>,
}

impl RunSummary {
    pub fn total(&self) -> Duration {
        self.phases.iter().map(|p| p.elapsed).sum()
    }
}

pub struct Harness<S, P> {
    sut: S,
    lifecycle: Lifecycle,
    prober: Prober<P>,
    state: ScenarioState,
}

impl<S: SutClient, P: HttpProbe> Harness<S, P> {
    pub fn new(sut: S, lifecycle: Lifecycle, prober: Prober<P>) -> Self {
        Self {
            sut,
            lifecycle,
            prober,
            state: ScenarioState::default(),
        }
    }

    pub fn sut(&self) -> &S {
        &self.sut
    }

    pub fn state(&self) -> &ScenarioState {
        &self.state
    }

    /// Runs `phases` in order, stopping at the first failing phase.
    pub fn run(&mut self, phases: &[Phase]) -> Result<RunSummary, ScenarioError> {
        let mut summary = RunSummary::default();
        let total = phases.len();

        for (index, phase) in phases.iter().enumerate() {
            tracing::info!(
                phase = index + 1,
                total,
                label = %phase.label,
                action = %phase.action,
                "phase started"
            );
            let start = Instant::now();

            if let Err(source) = self.execute(&phase.action) {
                tracing::error!(
                    phase = index + 1,
                    label = %phase.label,
                    error = %source,
                    "phase failed"
                );
                return Err(ScenarioError {
                    index,
                    label: phase.label.clone(),
                    source,
                });
            }

            let elapsed = start.elapsed();
            tracing::info!(phase = index + 1, label = %phase.label, ?elapsed, "phase passed");
            summary.phases.push(PhaseTiming {
                label: phase.label.clone(),
                elapsed,
            });
        }

        tracing::info!(phases = total, elapsed = ?summary.total(), "scenario passed");
        Ok(summary)
    }

    fn execute(&mut self, action: &PhaseAction) -> Result<(), PhaseError> {
        let sut = &self.sut;
        let prober = &self.prober;
        let lifecycle = &self.lifecycle;
        let state = &mut self.state;

        match action {
            PhaseAction::Install {
                variant,
                extra_args,
            } => {
                let effective = lifecycle.install(sut, variant, extra_args)?;
                state.installed = Some(effective);
            }
            PhaseAction::DefineService(service) => {
                sut.service_update(service)?;
                tracing::info!(
                    id = %service.id,
                    frontend = %service.frontend,
                    backends = service.backends.len(),
                    "service defined"
                );
                state.services.insert(service.id, service.clone());
            }
            PhaseAction::DeleteService(id) => {
                sut.service_delete(*id)?;
                state.services.remove(id);
                let listing = sut.service_list()?;
                if listing_has_id(&listing, id.get()) {
                    tracing::error!(%id, "service list:\n{listing}");
                    return Err(AssertionError::StillListed {
                        what: "service",
                        id: id.get(),
                    }
                    .into());
                }
            }
            PhaseAction::Snapshot(label) => {
                state.snapshots.capture(sut, label)?;
            }
            PhaseAction::AssertSnapshotEqual { left, right } => {
                state.snapshots.assert_equal(left, right)?;
            }
            PhaseAction::AssertInvariant(id) => {
                let service = state
                    .services
                    .get(id)
                    .ok_or(AssertionError::UnknownService(*id))?;
                invariant::assert_maglev_sane(sut, service)?;
            }
            PhaseAction::Probe { target, attempts } => prober.probe(*target, *attempts)?,
            PhaseAction::WaitReady(target) => prober.wait_ready(*target)?,
            PhaseAction::DefineRecorder(def) => {
                recorder::define_recorder(sut, def)?;
                state.recorders.insert(def.id);
            }
            PhaseAction::DeleteRecorder(id) => {
                recorder::delete_recorder(sut, *id)?;
                state.recorders.remove(id);
            }
        }
        Ok(())
    }
}
