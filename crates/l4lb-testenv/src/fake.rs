//! In-memory [`NodeRuntime`] and [`HostNet`] for tests.
//!
//! Clones share state, so a test can hand one clone to the code under test
//! and inspect the recorded calls through another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::CommandError;
use crate::host::HostNet;
use crate::runtime::{ExecOutput, NetworkHandle, NetworkSpec, NodeRuntime, NodeSpec};

// ── Runtime ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RuntimeState {
    networks: Vec<NetworkSpec>,
    nodes: Vec<NodeSpec>,
    removed_nodes: Vec<String>,
    removed_networks: Vec<String>,
    execs: Vec<(String, String)>,
    responses: HashMap<(String, String), VecDeque<ExecOutput>>,
    fail_create_node: HashSet<String>,
    fail_remove_node: HashSet<String>,
    fail_create_network: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<RuntimeState>>,
}

fn failed(command: String) -> CommandError {
    CommandError::Failed {
        command,
        code: 1,
        stderr: "injected failure".into(),
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queues a response for `command` (space-joined) executed in `node`.
    ///
    /// Queued responses are consumed in order; the last one keeps answering.
    /// Unscripted commands succeed with empty output.
    pub fn respond(&self, node: &str, command: &str, output: ExecOutput) {
        self.state()
            .responses
            .entry((node.to_string(), command.to_string()))
            .or_default()
            .push_back(output);
    }

    /// Scripts the interface index and addresses `Topology::provision` reads.
    pub fn seed_node(&self, node: &str, iface: &str, ifindex: u32, ipv4: &str, ipv6: &str) {
        self.respond(
            node,
            &format!("cat /sys/class/net/{iface}/iflink"),
            ExecOutput::ok(format!("{ifindex}\n")),
        );
        self.respond(
            node,
            &format!("ip -o -4 addr show {iface}"),
            ExecOutput::ok(format!(
                "23: {iface}    inet {ipv4}/24 brd 172.29.0.255 scope global {iface}\\       valid_lft forever preferred_lft forever\n"
            )),
        );
        self.respond(
            node,
            &format!("ip -o -6 addr show {iface}"),
            ExecOutput::ok(format!(
                "23: {iface}    inet6 {ipv6}/64 scope global nodad \\       valid_lft forever preferred_lft forever\n\
                 23: {iface}    inet6 fe80::42:acff:fe1d:2/64 scope link \\       valid_lft forever preferred_lft forever\n"
            )),
        );
    }

    pub fn fail_create_node(&self, name: &str) {
        self.state().fail_create_node.insert(name.to_string());
    }

    pub fn fail_remove_node(&self, name: &str) {
        self.state().fail_remove_node.insert(name.to_string());
    }

    pub fn fail_create_network(&self) {
        self.state().fail_create_network = true;
    }

    pub fn created_networks(&self) -> Vec<NetworkSpec> {
        self.state().networks.clone()
    }

    pub fn created_nodes(&self) -> Vec<NodeSpec> {
        self.state().nodes.clone()
    }

    pub fn removed_nodes(&self) -> Vec<String> {
        self.state().removed_nodes.clone()
    }

    pub fn removed_networks(&self) -> Vec<String> {
        self.state().removed_networks.clone()
    }

    /// `(node, command)` pairs in execution order.
    pub fn execs(&self) -> Vec<(String, String)> {
        self.state().execs.clone()
    }

    /// Commands executed in `node`, in order.
    pub fn execs_in(&self, node: &str) -> Vec<String> {
        self.state()
            .execs
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

impl NodeRuntime for FakeRuntime {
    fn create_network(&self, spec: &NetworkSpec) -> Result<NetworkHandle, CommandError> {
        let mut state = self.state();
        if state.fail_create_network {
            return Err(failed(format!("docker network create {}", spec.name)));
        }
        state.networks.push(spec.clone());
        Ok(NetworkHandle::new(&spec.name))
    }

    fn create_node(&self, spec: &NodeSpec) -> Result<String, CommandError> {
        let mut state = self.state();
        if state.fail_create_node.contains(&spec.name) {
            return Err(failed(format!("docker run {}", spec.name)));
        }
        state.nodes.push(spec.clone());
        Ok(spec.name.clone())
    }

    fn remove_node(&self, name: &str) -> Result<(), CommandError> {
        let mut state = self.state();
        if state.fail_remove_node.contains(name) {
            return Err(failed(format!("docker rm -f {name}")));
        }
        state.removed_nodes.push(name.to_string());
        Ok(())
    }

    fn remove_network(&self, handle: &NetworkHandle) -> Result<(), CommandError> {
        self.state().removed_networks.push(handle.name().to_string());
        Ok(())
    }

    fn exec_in_node(&self, name: &str, command: &[&str]) -> Result<ExecOutput, CommandError> {
        let mut state = self.state();
        let command = command.join(" ");
        state.execs.push((name.to_string(), command.clone()));
        let output = match state.responses.get_mut(&(name.to_string(), command)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => ExecOutput::default(),
        };
        Ok(output)
    }
}

// ── Host ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct HostState {
    offload_disabled: Vec<String>,
    routes: Vec<(IpAddr, IpAddr)>,
    removed_routes: Vec<IpAddr>,
    fail_routes: bool,
    fail_offload: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_routes(&self) {
        self.state().fail_routes = true;
    }

    pub fn fail_offload(&self) {
        self.state().fail_offload = true;
    }

    pub fn offload_disabled(&self) -> Vec<String> {
        self.state().offload_disabled.clone()
    }

    pub fn routes(&self) -> Vec<(IpAddr, IpAddr)> {
        self.state().routes.clone()
    }

    pub fn removed_routes(&self) -> Vec<IpAddr> {
        self.state().removed_routes.clone()
    }
}

impl HostNet for FakeHost {
    fn link_by_index(&self, ifindex: u32) -> Result<String, CommandError> {
        Ok(format!("veth{ifindex}"))
    }

    fn disable_offload(&self, link: &str) -> Result<(), CommandError> {
        let mut state = self.state();
        if state.fail_offload {
            return Err(failed(format!("ethtool -K {link} rx off tx off")));
        }
        state.offload_disabled.push(link.to_string());
        Ok(())
    }

    fn add_route(&self, destination: IpAddr, via: IpAddr) -> Result<(), CommandError> {
        let mut state = self.state();
        if state.fail_routes {
            return Err(failed(format!("ip route add {destination}")));
        }
        state.routes.push((destination, via));
        Ok(())
    }

    fn remove_route(&self, destination: IpAddr) -> Result<(), CommandError> {
        let mut state = self.state();
        if state.fail_routes {
            return Err(failed(format!("ip route del {destination}")));
        }
        state.removed_routes.push(destination);
        Ok(())
    }
}
