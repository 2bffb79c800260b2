//! In-memory [`SutClient`] and [`HttpProbe`] for tests.
//!
//! Both are cheap to clone and clones share state, mirroring
//! `l4lb_testenv::fake`.

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::SutError;
use crate::probe::{HttpProbe, ProbeError};
use crate::sut::{
    AddressFamily, HashTableView, RecorderDefinition, ServiceDefinition, ServiceFlag, ServiceId,
    SutClient, SutConfiguration, SutHealth,
};

// ── SUT ─────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SutState {
    config: Option<SutConfiguration>,
    installs: Vec<(SutConfiguration, Vec<String>)>,
    services: BTreeMap<ServiceId, ServiceDefinition>,
    recorders: BTreeMap<u16, RecorderDefinition>,
    status_calls: u32,
    unhealthy_polls: u32,

    fail_next_install: bool,
    drop_services_on_install: bool,
    leak_config: Option<String>,
    stale_v4_table: bool,
    ignore_service_deletes: bool,
    keep_deleted_recorders: bool,
    fail_recorder_update: bool,
}

/// A SUT that keeps its service and recorder tables across reinstalls, like
/// an agent restoring state from pinned maps.
#[derive(Debug, Clone, Default)]
pub struct FakeSut {
    state: Arc<Mutex<SutState>>,
}

impl FakeSut {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SutState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every install reports unhealthy for the next `polls` status calls.
    pub fn unhealthy_polls(&self, polls: u32) {
        self.state().unhealthy_polls = polls;
    }

    pub fn fail_next_install(&self) {
        self.state().fail_next_install = true;
    }

    /// Installs forget all services (a broken restore).
    pub fn drop_services_on_install(&self) {
        self.state().drop_services_on_install = true;
    }

    /// The value of agent option `option` shows up in every service row, so
    /// snapshots taken under different configurations differ.
    pub fn leak_config_into_listing(&self, option: &str) {
        self.state().leak_config = Some(option.to_string());
    }

    /// The IPv4 Maglev view is populated regardless of backends.
    pub fn stale_v4_table(&self) {
        self.state().stale_v4_table = true;
    }

    pub fn ignore_service_deletes(&self) {
        self.state().ignore_service_deletes = true;
    }

    pub fn keep_deleted_recorders(&self) {
        self.state().keep_deleted_recorders = true;
    }

    pub fn fail_recorder_update(&self) {
        self.state().fail_recorder_update = true;
    }

    pub fn installs(&self) -> Vec<(SutConfiguration, Vec<String>)> {
        self.state().installs.clone()
    }

    pub fn status_calls(&self) -> u32 {
        self.state().status_calls
    }

    pub fn services(&self) -> Vec<ServiceDefinition> {
        self.state().services.values().cloned().collect()
    }

    pub fn recorder_ids(&self) -> Vec<u16> {
        self.state().recorders.keys().copied().collect()
    }
}

fn service_type(flags: &[ServiceFlag]) -> &'static str {
    match flags.first() {
        Some(ServiceFlag::NodePort) => "NodePort",
        Some(ServiceFlag::LoadBalancer) => "LoadBalancer",
        Some(ServiceFlag::ClusterInternal) => "ClusterIP",
        Some(ServiceFlag::ExternalIp) | None => "ExternalIPs",
    }
}

fn maglev_view(service: &ServiceDefinition, family: AddressFamily) -> String {
    if service.backends_of(family) == 0 {
        return String::new();
    }
    let ids: Vec<String> = (1..=service.backends.len())
        .cycle()
        .take(7)
        .map(|i| i.to_string())
        .collect();
    ids.join(",")
}

impl SutClient for FakeSut {
    fn install(&self, options: &SutConfiguration, extra_args: &[String]) -> Result<(), SutError> {
        let mut state = self.state();
        if std::mem::take(&mut state.fail_next_install) {
            return Err(SutError::Command {
                action: "start SUT",
                exit_code: 125,
                stderr: "injected failure".into(),
            });
        }
        state.installs.push((options.clone(), extra_args.to_vec()));
        state.config = Some(options.clone());
        state.status_calls = 0;
        if state.drop_services_on_install {
            state.services.clear();
        }
        Ok(())
    }

    fn status(&self) -> Result<SutHealth, SutError> {
        let mut state = self.state();
        state.status_calls += 1;
        if state.config.is_none() || state.status_calls <= state.unhealthy_polls {
            return Ok(SutHealth::Unhealthy);
        }
        Ok(SutHealth::Healthy)
    }

    fn service_list(&self) -> Result<String, SutError> {
        let state = self.state();
        let leaked = state.leak_config.as_deref().map(|option| {
            state
                .config
                .as_ref()
                .and_then(|c| c.get(option))
                .unwrap_or("-")
                .to_string()
        });

        // One backend per row; later backends go on indented continuation
        // rows, as `cilium-dbg service list` prints them.
        let mut out = String::from("ID   Frontend                 Service Type   Backend\n");
        for svc in state.services.values() {
            let mut backends = svc
                .backends
                .iter()
                .enumerate()
                .map(|(i, b)| format!("{} => {b} (active)", i + 1));
            let mut row = format!(
                "{:<4} {:<24} {:<14} {}",
                svc.id.to_string(),
                svc.frontend.to_string(),
                service_type(&svc.flags),
                backends.next().unwrap_or_default(),
            );
            if let Some(value) = &leaked {
                row.push_str(&format!(" [{value}]"));
            }
            out.push_str(&row);
            out.push('\n');
            for backend in backends {
                out.push_str(&format!("{:<45}{backend}\n", ""));
            }
        }
        Ok(out)
    }

    fn service_update(&self, service: &ServiceDefinition) -> Result<(), SutError> {
        self.state().services.insert(service.id, service.clone());
        Ok(())
    }

    fn service_delete(&self, id: ServiceId) -> Result<(), SutError> {
        let mut state = self.state();
        if state.ignore_service_deletes {
            return Ok(());
        }
        match state.services.remove(&id) {
            Some(_) => Ok(()),
            None => Err(SutError::Command {
                action: "service delete",
                exit_code: 1,
                stderr: format!("service {id} not found"),
            }),
        }
    }

    fn hash_table_list(&self, id: ServiceId) -> Result<HashTableView, SutError> {
        let state = self.state();
        let mut view = state
            .services
            .get(&id)
            .map(|svc| HashTableView {
                v4: maglev_view(svc, AddressFamily::V4),
                v6: maglev_view(svc, AddressFamily::V6),
            })
            .unwrap_or_default();
        if state.stale_v4_table && view.v4.is_empty() {
            view.v4 = "1,1,1,1,1,1,1".into();
        }
        Ok(view)
    }

    fn recorder_update(&self, recorder: &RecorderDefinition) -> Result<(), SutError> {
        let mut state = self.state();
        if state.fail_recorder_update {
            return Err(SutError::Command {
                action: "recorder update",
                exit_code: 1,
                stderr: "injected failure".into(),
            });
        }
        state.recorders.insert(recorder.id, recorder.clone());
        Ok(())
    }

    fn recorder_delete(&self, id: u16) -> Result<(), SutError> {
        let mut state = self.state();
        if !state.keep_deleted_recorders {
            state.recorders.remove(&id);
        }
        Ok(())
    }

    fn recorder_list(&self) -> Result<String, SutError> {
        let state = self.state();
        let mut out = String::from("ID   Capture Length   Wildcard Filters\n");
        for rec in state.recorders.values() {
            for (i, filter) in rec.filters.iter().enumerate() {
                let (id, caplen) = if i == 0 {
                    (rec.id.to_string(), rec.caplen.to_string())
                } else {
                    (String::new(), String::new())
                };
                out.push_str(&format!("{id:<4} {caplen:<16} {filter}\n"));
            }
            if rec.filters.is_empty() {
                out.push_str(&format!("{:<4} {:<16}\n", rec.id, rec.caplen));
            }
        }
        Ok(out)
    }
}

// ── HTTP probe ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ProbeState {
    script: VecDeque<bool>,
    calls: u32,
    targets: Vec<SocketAddr>,
}

/// Probe whose outcomes are scripted in advance.
///
/// Outcomes are consumed in order and the last one keeps answering. With
/// nothing scripted every probe succeeds.
#[derive(Debug, Clone, Default)]
pub struct ScriptedProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn script(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.state().script.extend(outcomes);
    }

    pub fn calls(&self) -> u32 {
        self.state().calls
    }

    pub fn targets(&self) -> Vec<SocketAddr> {
        self.state().targets.clone()
    }
}

impl HttpProbe for ScriptedProbe {
    fn probe(&self, target: SocketAddr) -> Result<(), ProbeError> {
        let mut state = self.state();
        state.calls += 1;
        state.targets.push(target);
        let ok = if state.script.len() > 1 {
            state.script.pop_front().unwrap_or(true)
        } else {
            state.script.front().copied().unwrap_or(true)
        };
        if ok {
            Ok(())
        } else {
            Err(ProbeError {
                target,
                reason: "connection refused".into(),
            })
        }
    }
}
