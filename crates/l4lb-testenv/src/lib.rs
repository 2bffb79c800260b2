//! Test environment toolkit for the L4LB conformance harness.
//!
//! Provides a Docker-backed node/network runtime, host-side link and route
//! control, bounded polling, two-node topology provisioning, and a
//! fault-isolated teardown ledger.

mod command;
pub mod error;
pub mod fake;
pub mod host;
pub mod poll;
pub mod runtime;
pub mod teardown;
pub mod topology;

pub mod test_util;

pub use error::{CleanupError, CommandError, ProvisionError};
pub use host::{HostNet, SudoHost};
pub use poll::{Poll, PollOutcome};
pub use runtime::{DockerCli, ExecOutput, Mount, NetworkHandle, NetworkSpec, NodeRuntime, NodeSpec};
pub use teardown::{TeardownLedger, TeardownReport, TeardownStep};
pub use topology::{NodeAddrs, NodeConfig, Topology, TopologySpec};
