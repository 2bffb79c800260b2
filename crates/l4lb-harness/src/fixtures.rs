//! Literal scenario data: agent variants, capture filters and the standard
//! end-to-end scenario.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::scenario::{Phase, Scenario};
use crate::sut::{
    FilterTuple, Prefix, Protocol, RecorderDefinition, ServiceDefinition, ServiceFlag, ServiceId,
    SutConfiguration,
};

/// Entries per fixture filter list. Large enough to force the SUT to
/// regenerate its capture program.
pub const FILTER_COUNT: u8 = 32;

pub const RECORDER_CAPLEN: u32 = 100;

// ── Agent variants ──────────────────────────────────────────────────

pub fn variant(algorithm: &str, acceleration: &str) -> SutConfiguration {
    SutConfiguration::new()
        .with("bpf-lb-algorithm", algorithm)
        .with("bpf-lb-acceleration", acceleration)
}

// ── Recorder filters ────────────────────────────────────────────────

fn protocol(i: u8) -> Protocol {
    match i % 3 {
        0 => Protocol::Tcp,
        1 => Protocol::Udp,
        _ => Protocol::Any,
    }
}

/// `(i * step + offset) mod (max + 1)`; visits every length in `0..=max`
/// when `step` is coprime to `max + 1`.
fn stride(i: u8, step: u16, offset: u16, max: u16) -> u8 {
    ((u16::from(i) * step + offset) % (max + 1)) as u8
}

/// 32 IPv4 filters. Source and destination prefix lengths step through
/// 0..=32 at different strides so no two entries share both.
pub fn recorder_filters_v4() -> Vec<FilterTuple> {
    let src = IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2));
    let dst = IpAddr::V4(Ipv4Addr::new(3, 3, 3, 3));
    (0..FILTER_COUNT)
        .map(|i| FilterTuple {
            src: Prefix::saturating(src, stride(i, 7, 0, 32)),
            src_port: 0,
            dst: Prefix::saturating(dst, stride(i, 13, 5, 32)),
            dst_port: if i % 2 == 0 { 80 } else { 0 },
            protocol: protocol(i),
        })
        .collect()
}

/// 32 IPv6 filters, prefix lengths over 0..=128.
pub fn recorder_filters_v6() -> Vec<FilterTuple> {
    let src = IpAddr::V6(Ipv6Addr::new(0xf00d, 0, 0, 0, 0, 0, 0, 1));
    let dst = IpAddr::V6(Ipv6Addr::new(0xcafe, 0, 0, 0, 0, 0, 0, 2));
    (0..FILTER_COUNT)
        .map(|i| FilterTuple {
            src: Prefix::saturating(src, stride(i, 11, 0, 128)),
            src_port: 0,
            dst: Prefix::saturating(dst, stride(i, 17, 3, 128)),
            dst_port: if i % 2 == 0 { 80 } else { 0 },
            protocol: protocol(i),
        })
        .collect()
}

// ── Standard scenario ───────────────────────────────────────────────

/// Addresses the standard scenario needs from the provisioned topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioTargets {
    /// IPv4 VIP fronting the IPv6 backend.
    pub vip4: SocketAddr,
    /// IPv6 VIP fronting the IPv4 backend (NAT46/64).
    pub vip6: SocketAddr,
    pub backend_v4: SocketAddr,
    pub backend_v6: SocketAddr,
}

pub fn service_v4_vip(targets: &ScenarioTargets) -> Option<ServiceDefinition> {
    Some(ServiceDefinition {
        id: ServiceId::new(1)?,
        frontend: targets.vip4,
        backends: vec![targets.backend_v6],
        flags: vec![ServiceFlag::ExternalIp],
    })
}

pub fn service_v6_vip(targets: &ScenarioTargets) -> Option<ServiceDefinition> {
    Some(ServiceDefinition {
        id: ServiceId::new(2)?,
        frontend: targets.vip6,
        backends: vec![targets.backend_v4],
        flags: vec![ServiceFlag::ExternalIp],
    })
}

/// Reinstall/restore walk-through:
///
/// 1. maglev + XDP: service 1 (IPv4 VIP, IPv6 backend), wait, check Maglev
///    table, probe, snapshot.
/// 2. maglev with XDP disabled, then random + XDP: snapshot after each and
///    assert the service table survived unchanged; probe again.
/// 3. Define and delete an IPv4 and an IPv6 recorder with 32 filters each.
/// 4. Service 2 (IPv6 VIP, IPv4 backend) through the NAT46/64 gateway.
/// 5. Delete both services.
pub fn standard_scenario(targets: &ScenarioTargets) -> Vec<Phase> {
    let (Some(svc1), Some(svc2)) = (service_v4_vip(targets), service_v6_vip(targets)) else {
        return Vec::new();
    };
    let id1 = svc1.id;
    let id2 = svc2.id;

    Scenario::new()
        .install("install maglev/native", variant("maglev", "native"))
        .define_service(svc1)
        .wait_ready(targets.vip4)
        .assert_invariant(id1)
        .probe(targets.vip4)
        .snapshot("maglev-native")
        // restore across acceleration change
        .install("reinstall maglev/disabled", variant("maglev", "disabled"))
        .snapshot("maglev-disabled")
        .assert_snapshots_equal("maglev-native", "maglev-disabled")
        .assert_invariant(id1)
        .probe(targets.vip4)
        // restore across algorithm change
        .install("reinstall random/native", variant("random", "native"))
        .snapshot("random-native")
        .assert_snapshots_equal("maglev-native", "random-native")
        .probe(targets.vip4)
        .define_recorder(RecorderDefinition {
            id: 1,
            caplen: RECORDER_CAPLEN,
            filters: recorder_filters_v4(),
        })
        .delete_recorder(1)
        .define_recorder(RecorderDefinition {
            id: 2,
            caplen: RECORDER_CAPLEN,
            filters: recorder_filters_v6(),
        })
        .delete_recorder(2)
        .define_service(svc2)
        .wait_ready(targets.vip6)
        .probe(targets.vip6)
        .delete_service(id2)
        .delete_service(id1)
        .build()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::scenario::PhaseAction;

    fn targets() -> ScenarioTargets {
        ScenarioTargets {
            vip4: "10.0.0.4:80".parse().unwrap(),
            vip6: "[fd00:dead:beef::4]:80".parse().unwrap(),
            backend_v4: "172.29.0.3:80".parse().unwrap(),
            backend_v6: "[fc00:c111::3]:80".parse().unwrap(),
        }
    }

    #[test]
    fn filter_lists_have_32_distinct_prefix_pairs() {
        for filters in [recorder_filters_v4(), recorder_filters_v6()] {
            assert_eq!(filters.len(), 32);
            let pairs: HashSet<_> = filters
                .iter()
                .map(|f| (f.src.bits(), f.dst.bits()))
                .collect();
            assert_eq!(pairs.len(), 32);
            let srcs: HashSet<_> = filters.iter().map(|f| f.src.bits()).collect();
            let dsts: HashSet<_> = filters.iter().map(|f| f.dst.bits()).collect();
            assert!(srcs.len() > 1 && dsts.len() > 1);
        }
    }

    #[test]
    fn v6_filters_use_long_prefixes() {
        let max = recorder_filters_v6()
            .iter()
            .map(|f| f.src.bits().max(f.dst.bits()))
            .max();
        assert!(max > Some(32));
    }

    #[test]
    fn standard_scenario_shape() {
        let phases = standard_scenario(&targets());
        let installs = phases
            .iter()
            .filter(|p| matches!(p.action, PhaseAction::Install { .. }))
            .count();
        assert_eq!(installs, 3);

        // every equality assert refers to snapshots taken earlier
        let mut taken = HashSet::new();
        for phase in &phases {
            match &phase.action {
                PhaseAction::Snapshot(label) => {
                    taken.insert(label.clone());
                }
                PhaseAction::AssertSnapshotEqual { left, right } => {
                    assert!(taken.contains(left) && taken.contains(right));
                }
                _ => {}
            }
        }

        assert_eq!(
            phases.last().map(|p| &p.action),
            Some(&PhaseAction::DeleteService(ServiceId::new(1).unwrap()))
        );
    }
}
