//! Error taxonomy.
//!
//! Provisioning and cleanup errors live in `l4lb_testenv`; everything the
//! harness itself raises is defined here.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use l4lb_testenv::CommandError;
use thiserror::Error;

use crate::sut::{AddressFamily, ServiceId};

// ── SUT control plane ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SutError {
    #[error("{action}: {source}")]
    Runtime {
        action: &'static str,
        #[source]
        source: CommandError,
    },
    #[error("{action} exited with {exit_code}: {stderr}")]
    Command {
        action: &'static str,
        exit_code: i32,
        stderr: String,
    },
    #[error("{action}: malformed output: {detail}")]
    Malformed { action: &'static str, detail: String },
}

// ── Install ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("failed to start SUT: {0}")]
    Start(#[source] SutError),
    #[error("SUT not healthy after {attempts} status polls")]
    NeverHealthy { attempts: u32 },
    #[error("SUT status query failed: {0}")]
    Status(#[source] SutError),
}

// ── Assertions ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AssertionError {
    #[error(
        "snapshot `{left_label}` differs from `{right_label}`\n\
         --- {left_label}\n{left}\n--- {right_label}\n{right}"
    )]
    SnapshotMismatch {
        left_label: String,
        right_label: String,
        left: String,
        right: String,
    },
    #[error("no snapshot labelled `{0}`")]
    MissingSnapshot(String),
    #[error(
        "service {service}: {family} Maglev table populated={populated} \
         with {backends} {family} backend(s)\n{dump}"
    )]
    Invariant {
        service: ServiceId,
        family: AddressFamily,
        populated: bool,
        backends: usize,
        dump: String,
    },
    #[error("{failed}/{attempts} probes to {target} failed (last: {last_error})")]
    ProbeFailed {
        target: SocketAddr,
        failed: u32,
        attempts: u32,
        last_error: String,
    },
    #[error("{target} not ready after {attempts} attempts")]
    NotReady { target: SocketAddr, attempts: u32 },
    #[error("{what} {id} still listed after delete")]
    StillListed { what: &'static str, id: u16 },
    #[error("{what} {id} not listed after update")]
    NotListed { what: &'static str, id: u16 },
    #[error("service {0} was never defined in this scenario")]
    UnknownService(ServiceId),
}

// ── Phases ──────────────────────────────────────────────────────────

/// Why a single phase failed.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error(transparent)]
    Assertion(#[from] AssertionError),
    #[error(transparent)]
    Sut(#[from] SutError),
}

/// A scenario aborted at phase `index` (zero-based). Messages number
/// phases from 1.
#[derive(Debug, Error)]
#[error("phase {number} `{label}` failed: {source}", number = .index + 1)]
pub struct ScenarioError {
    pub index: usize,
    pub label: String,
    #[source]
    pub source: PhaseError,
}

// ── Config / data ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
#[error("prefix length {len} out of range for {addr}")]
pub struct InvalidPrefix {
    pub addr: IpAddr,
    pub len: u8,
}
