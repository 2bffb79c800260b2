//! L4LB conformance run
//!
//! Provisions a two-node Docker topology, installs the load balancer image
//! selected by OWNER/TAG inside the LB node, runs the standard reinstall and
//! restore scenario against it and tears everything down.
//!
//! Exit code 0 when every phase passes, 1 otherwise.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use l4lb_harness::config::HarnessConfig;
use l4lb_harness::finalizer::{Finalizer, Finish, HoldPolicy};
use l4lb_harness::fixtures::{standard_scenario, ScenarioTargets};
use l4lb_harness::lifecycle::Lifecycle;
use l4lb_harness::orchestrator::Harness;
use l4lb_harness::probe::{Prober, ReqwestProbe};
use l4lb_harness::sut::CiliumSut;
use l4lb_testenv::{DockerCli, SudoHost, TeardownStep, Topology};

/// End-to-end L4 load balancer conformance harness.
#[derive(Parser, Debug)]
#[command(name = "l4lb-harness", about = "L4LB reinstall/restore conformance run")]
struct Cli {
    /// Image repository owner.
    #[arg(default_value = "cilium")]
    owner: String,

    /// Image tag.
    #[arg(default_value = "latest")]
    tag: String,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Keep the environment after the run without asking.
    #[arg(long, conflicts_with = "no_hold")]
    hold: bool,

    /// Tear the environment down without asking.
    #[arg(long)]
    no_hold: bool,
}

impl Cli {
    fn hold_policy(&self) -> HoldPolicy {
        if self.hold {
            HoldPolicy::Always
        } else if self.no_hold {
            HoldPolicy::Never
        } else {
            HoldPolicy::AskIfTerminal
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = match &cli.config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::default(),
    };
    let image = config.sut.image(&cli.owner, &cli.tag);
    tracing::info!(
        image = %image,
        network = %config.topology.network,
        lb_node = %config.topology.lb_node.name,
        "l4lb-harness starting"
    );

    let runtime = DockerCli::new();
    let host = SudoHost::new();

    // Bound before anything exists so every exit path below tears down.
    let mut finalizer = Finalizer::new(runtime.clone(), host.clone(), cli.hold_policy());

    let topology = Topology::provision(&runtime, &host, &config.topology, finalizer.ledger_mut())
        .context("provisioning topology")?;
    for vip in config.scenario.vips() {
        topology
            .add_route(&host, vip, finalizer.ledger_mut())
            .context("adding VIP route")?;
    }
    finalizer.register(TeardownStep::RemoveSut {
        node: topology.lb_node.clone(),
        container: config.sut.container.clone(),
    });

    let port = config.scenario.port;
    let targets = ScenarioTargets {
        vip4: SocketAddr::new(IpAddr::V4(config.scenario.vip4), port),
        vip6: SocketAddr::new(IpAddr::V6(config.scenario.vip6), port),
        backend_v4: SocketAddr::new(IpAddr::V4(topology.target_addrs.ipv4), port),
        backend_v6: SocketAddr::new(IpAddr::V6(topology.target_addrs.ipv6), port),
    };

    let sut = CiliumSut::new(
        runtime.clone(),
        &topology.lb_node,
        &config.sut.container,
        &image,
    );
    let http = ReqwestProbe::new(config.probe.http_timeout).context("building HTTP client")?;
    let mut harness = Harness::new(
        sut,
        Lifecycle::new(config.sut.base_options.clone(), config.install),
        Prober::new(http, config.probe),
    );

    let passed = match harness.run(&standard_scenario(&targets)) {
        Ok(summary) => {
            for timing in &summary.phases {
                tracing::info!(phase = %timing.label, elapsed = ?timing.elapsed, "timing");
            }
            tracing::info!(total = ?summary.total(), "PASS");
            true
        }
        Err(e) => {
            tracing::error!("FAIL: {e}");
            false
        }
    };

    match finalizer.finish() {
        Some(Finish::TornDown(report)) => {
            for failure in &report.failures {
                tracing::warn!("leftover: {failure}");
            }
        }
        Some(Finish::Held { steps }) => {
            tracing::info!(resources = steps.len(), "environment held; remove manually");
        }
        None => {}
    }

    Ok(passed)
}
