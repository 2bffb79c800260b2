use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use crate::error::ProvisionError;
use crate::host::HostNet;
use crate::poll::{Poll, PollOutcome};
use crate::runtime::{Mount, NetworkHandle, NetworkSpec, NodeRuntime, NodeSpec};
use crate::teardown::{TeardownLedger, TeardownStep};

/// Name and image of one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub name: String,
    pub image: String,
}

/// Shape of the two-node test topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySpec {
    pub network: String,
    pub ipv4_subnet: String,
    pub ipv6_subnet: String,
    /// Node that hosts the SUT. Runs its own container engine.
    pub lb_node: NodeConfig,
    /// Fixed workload node serving HTTP on port 80.
    pub target_node: NodeConfig,
    /// Interface attached to the network inside each node.
    pub interface: String,
    pub ready_interval: Duration,
    pub ready_attempts: u32,
}

impl Default for TopologySpec {
    fn default() -> Self {
        Self {
            network: "l4lb-conformance".into(),
            ipv4_subnet: "172.29.0.0/24".into(),
            ipv6_subnet: "fc00:c111::/64".into(),
            lb_node: NodeConfig {
                name: "lb-node".into(),
                image: "docker:dind".into(),
            },
            target_node: NodeConfig {
                name: "nginx".into(),
                image: "nginx:stable".into(),
            },
            interface: "eth0".into(),
            ready_interval: Duration::from_secs(1),
            ready_attempts: 120,
        }
    }
}

/// Addresses of a node on the test network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAddrs {
    pub ipv4: Ipv4Addr,
    pub ipv6: Ipv6Addr,
}

/// A provisioned two-node topology.
///
/// Owns no resources itself: everything it created is recorded in the
/// [`TeardownLedger`] passed to [`Topology::provision`].
#[derive(Debug, Clone)]
pub struct Topology {
    pub network: NetworkHandle,
    pub lb_node: String,
    pub target_node: String,
    pub lb_addrs: NodeAddrs,
    pub target_addrs: NodeAddrs,
    /// Host side of the LB node's veth pair.
    pub lb_host_link: String,
}

impl Topology {
    /// Builds the network and both nodes, disables checksum offload on the LB
    /// node's host link and waits for the LB node's container engine.
    ///
    /// Aborts on the first failure. Whatever was created up to that point is
    /// already in `ledger`.
    pub fn provision<R: NodeRuntime, H: HostNet>(
        runtime: &R,
        host: &H,
        spec: &TopologySpec,
        ledger: &mut TeardownLedger,
    ) -> Result<Self, ProvisionError> {
        let network = NetworkHandle::new(&spec.network);

        // Leftovers from an aborted run (best effort)
        let _ = runtime.remove_node(&spec.lb_node.name);
        let _ = runtime.remove_node(&spec.target_node.name);
        let _ = runtime.remove_network(&network);

        let network = runtime
            .create_network(&NetworkSpec {
                name: spec.network.clone(),
                subnets: vec![spec.ipv4_subnet.clone(), spec.ipv6_subnet.clone()],
            })
            .map_err(ProvisionError::step("create network"))?;
        ledger.push(TeardownStep::RemoveNetwork {
            handle: network.clone(),
        });

        let lb_node = runtime
            .create_node(&NodeSpec {
                name: spec.lb_node.name.clone(),
                image: spec.lb_node.image.clone(),
                network: network.clone(),
                privileged: true,
                mounts: vec![Mount::same_path("/lib/modules")],
            })
            .map_err(ProvisionError::step("create LB node"))?;
        ledger.push(TeardownStep::RemoveNode {
            name: lb_node.clone(),
        });

        let target_node = runtime
            .create_node(&NodeSpec {
                name: spec.target_node.name.clone(),
                image: spec.target_node.image.clone(),
                network: network.clone(),
                privileged: false,
                mounts: Vec::new(),
            })
            .map_err(ProvisionError::step("create target node"))?;
        ledger.push(TeardownStep::RemoveNode {
            name: target_node.clone(),
        });

        exec_checked(runtime, &lb_node, &["mount", "bpffs", "/sys/fs/bpf", "-t", "bpf"])
            .map_err(ProvisionError::step("mount bpffs"))?;

        // The veth type docker uses cannot offload checksums; leaving offload
        // on corrupts packets the SUT forwards.
        let iflink = node_iflink(runtime, &lb_node, &spec.interface)?;
        let lb_host_link = host
            .link_by_index(iflink)
            .map_err(ProvisionError::step("resolve LB host link"))?;
        host.disable_offload(&lb_host_link)
            .map_err(ProvisionError::step("disable checksum offload"))?;
        tracing::info!(link = %lb_host_link, "checksum offload disabled");

        let lb_addrs = node_addrs(runtime, &lb_node, &spec.interface)?;
        let target_addrs = node_addrs(runtime, &target_node, &spec.interface)?;

        wait_for_engine(runtime, &lb_node, spec)?;

        tracing::info!(
            network = %network.name(),
            lb_node = %lb_node,
            lb_ipv4 = %lb_addrs.ipv4,
            lb_ipv6 = %lb_addrs.ipv6,
            target_node = %target_node,
            target_ipv4 = %target_addrs.ipv4,
            target_ipv6 = %target_addrs.ipv6,
            "topology provisioned"
        );

        Ok(Self {
            network,
            lb_node,
            target_node,
            lb_addrs,
            target_addrs,
            lb_host_link,
        })
    }

    /// Routes `destination` from the host through the LB node, using the LB
    /// node address of the same family.
    pub fn add_route<H: HostNet>(
        &self,
        host: &H,
        destination: IpAddr,
        ledger: &mut TeardownLedger,
    ) -> Result<(), ProvisionError> {
        let via = match destination {
            IpAddr::V4(_) => IpAddr::V4(self.lb_addrs.ipv4),
            IpAddr::V6(_) => IpAddr::V6(self.lb_addrs.ipv6),
        };
        host.add_route(destination, via)
            .map_err(ProvisionError::step("add VIP route"))?;
        ledger.push(TeardownStep::RemoveRoute { destination });
        tracing::info!(%destination, %via, "route added");
        Ok(())
    }
}

fn exec_checked<R: NodeRuntime>(
    runtime: &R,
    node: &str,
    command: &[&str],
) -> Result<String, crate::error::CommandError> {
    let out = runtime.exec_in_node(node, command)?;
    if !out.success() {
        return Err(crate::error::CommandError::Failed {
            command: format!("docker exec {node} {}", command.join(" ")),
            code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

fn node_iflink<R: NodeRuntime>(runtime: &R, node: &str, iface: &str) -> Result<u32, ProvisionError> {
    let path = format!("/sys/class/net/{iface}/iflink");
    let out = exec_checked(runtime, node, &["cat", &path])
        .map_err(ProvisionError::step("read iflink"))?;
    out.trim().parse().map_err(|_| ProvisionError::Address {
        node: node.to_string(),
        what: "host link index",
    })
}

fn node_addrs<R: NodeRuntime>(runtime: &R, node: &str, iface: &str) -> Result<NodeAddrs, ProvisionError> {
    let v4 = exec_checked(runtime, node, &["ip", "-o", "-4", "addr", "show", iface])
        .map_err(ProvisionError::step("read IPv4 address"))?;
    let v6 = exec_checked(runtime, node, &["ip", "-o", "-6", "addr", "show", iface])
        .map_err(ProvisionError::step("read IPv6 address"))?;

    let ipv4 = match parse_global_addr(&v4, "inet") {
        Some(IpAddr::V4(addr)) => addr,
        _ => {
            return Err(ProvisionError::Address {
                node: node.to_string(),
                what: "IPv4 address",
            })
        }
    };
    let ipv6 = match parse_global_addr(&v6, "inet6") {
        Some(IpAddr::V6(addr)) => addr,
        _ => {
            return Err(ProvisionError::Address {
                node: node.to_string(),
                what: "IPv6 address",
            })
        }
    };
    Ok(NodeAddrs { ipv4, ipv6 })
}

/// First global-scope address of kind `inet`/`inet6` in `ip -o addr` output.
pub fn parse_global_addr(output: &str, kind: &str) -> Option<IpAddr> {
    output
        .lines()
        .filter(|line| line.contains("scope global"))
        .find_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == kind)?;
            let cidr = tokens.next()?;
            cidr.split('/').next()?.parse().ok()
        })
}

fn wait_for_engine<R: NodeRuntime>(
    runtime: &R,
    node: &str,
    spec: &TopologySpec,
) -> Result<(), ProvisionError> {
    let poll = Poll::bounded(spec.ready_interval, spec.ready_attempts);
    match poll.run("node container engine", |_| {
        runtime
            .exec_in_node(node, &["docker", "ps"])
            .map(|out| out.success().then_some(()))
    }) {
        PollOutcome::Ready(()) => Ok(()),
        PollOutcome::NotReady { attempts } => Err(ProvisionError::ControlPlane {
            node: node.to_string(),
            attempts,
        }),
        PollOutcome::Erred(source) => Err(ProvisionError::Step {
            step: "probe node container engine",
            source,
        }),
    }
}
