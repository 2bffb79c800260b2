//! Typed control interface to the system under test.
//!
//! [`SutClient`] has one method per control-plane action the harness needs.
//! [`cilium::CiliumSut`] drives a Cilium agent inside the LB node;
//! [`crate::fake::FakeSut`] is an in-memory stand-in for orchestration tests.

pub mod cilium;

use std::collections::BTreeMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU16;

use crate::error::{InvalidPrefix, SutError};

pub use cilium::CiliumSut;

// ── Configuration ───────────────────────────────────────────────────

/// Agent options, option name → value, rendered as `--name=value`.
///
/// Never mutated in place: [`with`](Self::with) and [`merged`](Self::merged)
/// return new values. Applying a different configuration means reinstalling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SutConfiguration {
    options: BTreeMap<String, String>,
}

impl SutConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(&self, name: &str, value: &str) -> Self {
        let mut options = self.options.clone();
        options.insert(name.to_string(), value.to_string());
        Self { options }
    }

    /// `self` overlaid with every option of `other`.
    pub fn merged(&self, other: &SutConfiguration) -> Self {
        let mut options = self.options.clone();
        options.extend(other.options.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self { options }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn to_args(&self) -> Vec<String> {
        self.options
            .iter()
            .map(|(k, v)| format!("--{k}={v}"))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SutConfiguration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            options: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl fmt::Display for SutConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_args().join(" "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SutHealth {
    Healthy,
    Unhealthy,
}

// ── Services ────────────────────────────────────────────────────────

/// Service id. Zero is reserved by the SUT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceId(NonZeroU16);

impl ServiceId {
    pub fn new(id: u16) -> Option<Self> {
        NonZeroU16::new(id).map(Self)
    }

    pub fn get(self) -> u16 {
        self.0.get()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub const ALL: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressFamily::V4 => f.write_str("IPv4"),
            AddressFamily::V6 => f.write_str("IPv6"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceFlag {
    /// Traffic originates from inside the cluster.
    ClusterInternal,
    NodePort,
    ExternalIp,
    LoadBalancer,
}

impl ServiceFlag {
    pub fn as_arg(self) -> &'static str {
        match self {
            ServiceFlag::ClusterInternal => "--k8s-cluster-internal",
            ServiceFlag::NodePort => "--k8s-node-port",
            ServiceFlag::ExternalIp => "--k8s-external",
            ServiceFlag::LoadBalancer => "--k8s-load-balancer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub id: ServiceId,
    pub frontend: SocketAddr,
    pub backends: Vec<SocketAddr>,
    pub flags: Vec<ServiceFlag>,
}

impl ServiceDefinition {
    pub fn backends_of(&self, family: AddressFamily) -> usize {
        self.backends
            .iter()
            .filter(|b| AddressFamily::of(&b.ip()) == family)
            .count()
    }
}

/// Per-family views of one service's consistent-hash (Maglev) table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashTableView {
    pub v4: String,
    pub v6: String,
}

impl HashTableView {
    pub fn view(&self, family: AddressFamily) -> &str {
        match family {
            AddressFamily::V4 => &self.v4,
            AddressFamily::V6 => &self.v6,
        }
    }

    pub fn is_populated(&self, family: AddressFamily) -> bool {
        !self.view(family).trim().is_empty()
    }
}

// ── Recorders ───────────────────────────────────────────────────────

/// Address prefix with a validated length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Prefix {
    addr: IpAddr,
    len: u8,
}

impl Prefix {
    pub fn new(addr: IpAddr, len: u8) -> Result<Self, InvalidPrefix> {
        if len > Self::max_len(&addr) {
            return Err(InvalidPrefix { addr, len });
        }
        Ok(Self { addr, len })
    }

    /// Like [`new`](Self::new) but clamps `len` to the family maximum.
    pub fn saturating(addr: IpAddr, len: u8) -> Self {
        Self {
            addr,
            len: len.min(Self::max_len(&addr)),
        }
    }

    fn max_len(addr: &IpAddr) -> u8 {
        match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }
    }

    pub fn addr(&self) -> IpAddr {
        self.addr
    }

    pub fn bits(&self) -> u8 {
        self.len
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    Udp,
    Any,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
            Protocol::Any => f.write_str("ANY"),
        }
    }
}

/// One capture filter: source/destination prefix and port, protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterTuple {
    pub src: Prefix,
    pub src_port: u16,
    pub dst: Prefix,
    pub dst_port: u16,
    pub protocol: Protocol,
}

impl fmt::Display for FilterTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.src, self.src_port, self.dst, self.dst_port, self.protocol
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderDefinition {
    pub id: u16,
    pub caplen: u32,
    pub filters: Vec<FilterTuple>,
}

impl RecorderDefinition {
    /// Filters as the comma-separated list `recorder update --filters` takes.
    pub fn filters_arg(&self) -> String {
        self.filters
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

// ── Client ──────────────────────────────────────────────────────────

pub trait SutClient {
    /// Replaces any running instance with a fresh one started with `options`
    /// followed by `extra_args`. A missing previous instance is not an error.
    fn install(&self, options: &SutConfiguration, extra_args: &[String]) -> Result<(), SutError>;

    fn status(&self) -> Result<SutHealth, SutError>;

    /// Full textual service table.
    fn service_list(&self) -> Result<String, SutError>;

    fn service_update(&self, service: &ServiceDefinition) -> Result<(), SutError>;

    fn service_delete(&self, id: ServiceId) -> Result<(), SutError>;

    fn hash_table_list(&self, id: ServiceId) -> Result<HashTableView, SutError>;

    fn recorder_update(&self, recorder: &RecorderDefinition) -> Result<(), SutError>;

    fn recorder_delete(&self, id: u16) -> Result<(), SutError>;

    fn recorder_list(&self) -> Result<String, SutError>;
}

/// True if some row of a tabular listing has `id` in its `ID` column.
///
/// Both `service list` and `recorder list` start each object's first row
/// with the numeric id. Further backends or filters of the same object sit
/// on continuation rows that start with whitespace and are skipped.
pub fn listing_has_id(listing: &str, id: u16) -> bool {
    let id = id.to_string();
    listing
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .any(|line| line.split_whitespace().next() == Some(id.as_str()))
}
