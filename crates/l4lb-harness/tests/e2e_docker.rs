//! Full run against real Docker nodes. Needs a Docker daemon, passwordless
//! sudo and network access to pull the agent image; skipped otherwise.

use std::net::{IpAddr, SocketAddr};

use l4lb_harness::config::HarnessConfig;
use l4lb_harness::finalizer::{Finalizer, Finish, HoldPolicy};
use l4lb_harness::fixtures::{standard_scenario, ScenarioTargets};
use l4lb_harness::lifecycle::Lifecycle;
use l4lb_harness::orchestrator::Harness;
use l4lb_harness::probe::{Prober, ReqwestProbe};
use l4lb_harness::sut::CiliumSut;
use l4lb_testenv::test_util::{check_privileges, unique_name};
use l4lb_testenv::{DockerCli, SudoHost, TeardownStep, Topology};

#[test]
fn standard_scenario_on_docker() {
    if !check_privileges() {
        eprintln!("Skipping test, unsufficient privileges or missing tools");
        return;
    }
    if std::env::var_os("L4LB_E2E").is_none() {
        eprintln!("Skipping test, set L4LB_E2E=1 to run the end-to-end scenario");
        return;
    }

    let mut config = HarnessConfig::default();
    config.topology.network = unique_name("l4lb_net");
    config.topology.lb_node.name = unique_name("l4lb_lb");
    config.topology.target_node.name = unique_name("l4lb_web");

    let runtime = DockerCli::new();
    let host = SudoHost::new();
    let mut finalizer = Finalizer::new(runtime.clone(), host.clone(), HoldPolicy::Never);

    let topology = Topology::provision(&runtime, &host, &config.topology, finalizer.ledger_mut())
        .expect("Failed to provision topology");
    for vip in config.scenario.vips() {
        topology
            .add_route(&host, vip, finalizer.ledger_mut())
            .expect("Failed to add VIP route");
    }
    finalizer.register(TeardownStep::RemoveSut {
        node: topology.lb_node.clone(),
        container: config.sut.container.clone(),
    });

    let image = config.sut.image("cilium", "latest");
    let sut = CiliumSut::new(
        runtime.clone(),
        &topology.lb_node,
        &config.sut.container,
        &image,
    );
    let http = ReqwestProbe::new(config.probe.http_timeout).expect("Failed to build HTTP client");
    let mut harness = Harness::new(
        sut,
        Lifecycle::new(config.sut.base_options.clone(), config.install),
        Prober::new(http, config.probe),
    );

    let port = config.scenario.port;
    let targets = ScenarioTargets {
        vip4: SocketAddr::new(IpAddr::V4(config.scenario.vip4), port),
        vip6: SocketAddr::new(IpAddr::V6(config.scenario.vip6), port),
        backend_v4: SocketAddr::new(IpAddr::V4(topology.target_addrs.ipv4), port),
        backend_v6: SocketAddr::new(IpAddr::V6(topology.target_addrs.ipv6), port),
    };
    let result = harness.run(&standard_scenario(&targets));

    match finalizer.finish() {
        Some(Finish::TornDown(report)) => assert!(report.is_clean(), "{:?}", report.failures),
        other => panic!("unexpected finish: {other:?}"),
    }
    result.expect("scenario failed");
}
