//! Host-side network control: veth lookup, NIC offload, routes.

use std::net::IpAddr;

use crate::command::{self, render};
use crate::error::CommandError;

pub trait HostNet {
    /// Name of the host link with the given interface index.
    fn link_by_index(&self, ifindex: u32) -> Result<String, CommandError>;

    /// Disables rx/tx checksum offload on a host link.
    fn disable_offload(&self, link: &str) -> Result<(), CommandError>;

    fn add_route(&self, destination: IpAddr, via: IpAddr) -> Result<(), CommandError>;

    /// Removes a host route. A route that does not exist is not an error.
    fn remove_route(&self, destination: IpAddr) -> Result<(), CommandError>;
}

/// [`HostNet`] implemented with `ip` and `ethtool` through `sudo`.
#[derive(Debug, Clone, Default)]
pub struct SudoHost;

impl SudoHost {
    pub fn new() -> Self {
        Self
    }

    fn sudo(&self, args: &[&str]) -> Result<String, CommandError> {
        tracing::debug!(command = %render("sudo", args), "host");
        command::run_ok("sudo", args)
    }
}

impl HostNet for SudoHost {
    fn link_by_index(&self, ifindex: u32) -> Result<String, CommandError> {
        let output = self.sudo(&["ip", "-o", "link", "show"])?;
        parse_link_name(&output, ifindex).ok_or_else(|| CommandError::Parse {
            command: "ip -o link show".into(),
            detail: format!("no link with index {ifindex}"),
        })
    }

    fn disable_offload(&self, link: &str) -> Result<(), CommandError> {
        self.sudo(&["ethtool", "-K", link, "rx", "off", "tx", "off"])
            .map(|_| ())
    }

    fn add_route(&self, destination: IpAddr, via: IpAddr) -> Result<(), CommandError> {
        let dst = host_prefix(destination);
        let via = via.to_string();
        self.sudo(&["ip", "route", "add", &dst, "via", &via])
            .map(|_| ())
    }

    fn remove_route(&self, destination: IpAddr) -> Result<(), CommandError> {
        let dst = host_prefix(destination);
        match self.sudo(&["ip", "route", "del", &dst]) {
            // RTNETLINK answers: No such process
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }
}

/// `/32` or `/128` prefix for a single address.
pub fn host_prefix(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => format!("{v4}/32"),
        IpAddr::V6(v6) => format!("{v6}/128"),
    }
}

/// Finds the link name for `ifindex` in `ip -o link show` output.
///
/// Lines look like `12: veth3f2a1b0@if11: <BROADCAST,...> mtu 1500 ...`; the
/// `@ifN` peer suffix is stripped.
pub fn parse_link_name(output: &str, ifindex: u32) -> Option<String> {
    output.lines().find_map(|line| {
        let mut parts = line.splitn(3, ':');
        let idx: u32 = parts.next()?.trim().parse().ok()?;
        if idx != ifindex {
            return None;
        }
        let name = parts.next()?.trim();
        let name = name.split('@').next().unwrap_or(name);
        Some(name.to_string())
    })
}
