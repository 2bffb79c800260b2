//! Conformance harness for a kernel L4 load balancer.
//!
//! This crate contains:
//! - **SUT client**: typed control-plane interface and its `cilium-dbg` implementation
//! - **Lifecycle**: (re)install with a configuration, poll until healthy
//! - **Checks**: service-table snapshots, Maglev table invariants, HTTP probes, recorders
//! - **Orchestration**: ordered phases over one explicit harness context
//! - **Finalizer**: exactly-once, fault-isolated environment teardown

pub mod config;
pub mod error;
pub mod fake;
pub mod finalizer;
pub mod fixtures;
pub mod invariant;
pub mod lifecycle;
pub mod orchestrator;
pub mod probe;
pub mod recorder;
pub mod scenario;
pub mod snapshot;
pub mod sut;
