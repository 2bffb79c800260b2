use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;

use l4lb_testenv::{NodeConfig, TopologySpec};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::lifecycle::InstallSettings;
use crate::probe::ProbeSettings;
use crate::sut::SutConfiguration;

pub const DEFAULT_IMAGE_TEMPLATE: &str = "quay.io/{owner}/cilium-ci:{tag}";

/// Agent options every install starts from.
pub const DEFAULT_BASE_OPTIONS: &[(&str, &str)] = &[
    ("enable-ipv4", "true"),
    ("enable-ipv6", "true"),
    ("datapath-mode", "lb-only"),
    ("bpf-lb-algorithm", "maglev"),
    ("bpf-lb-maglev-table-size", "65521"),
    ("bpf-lb-acceleration", "native"),
    ("bpf-lb-mode", "snat"),
    ("enable-nat46x64-gateway", "true"),
    ("devices", "eth0"),
    ("routing-mode", "native"),
    ("enable-recorder", "true"),
];

// ── Input (TOML) ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfigInput {
    pub topology: TopologyConfigInput,
    pub sut: SutConfigInput,
    pub install: InstallConfigInput,
    pub probe: ProbeConfigInput,
    pub scenario: ScenarioConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyConfigInput {
    pub network: Option<String>,
    pub ipv4_subnet: Option<String>,
    pub ipv6_subnet: Option<String>,
    pub lb_node: Option<String>,
    pub lb_image: Option<String>,
    pub target_node: Option<String>,
    pub target_image: Option<String>,
    pub interface: Option<String>,
    pub ready_interval_ms: Option<u64>,
    pub ready_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SutConfigInput {
    pub image_template: Option<String>,
    pub container: Option<String>,
    /// Overrides and additions to the default agent options. Values may be
    /// strings, integers or booleans.
    pub options: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstallConfigInput {
    pub poll_interval_ms: Option<u64>,
    /// 0 waits for health indefinitely.
    pub max_status_polls: Option<u32>,
    pub settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProbeConfigInput {
    pub attempts: Option<u32>,
    pub ready_attempts: Option<u32>,
    pub ready_interval_ms: Option<u64>,
    pub http_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioConfigInput {
    pub vip4: Option<Ipv4Addr>,
    pub vip6: Option<Ipv6Addr>,
    pub port: Option<u16>,
}

// ── Resolved ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SutSettings {
    pub image_template: String,
    pub container: String,
    pub base_options: SutConfiguration,
}

impl Default for SutSettings {
    fn default() -> Self {
        Self {
            image_template: DEFAULT_IMAGE_TEMPLATE.to_string(),
            container: "cilium-lb".to_string(),
            base_options: DEFAULT_BASE_OPTIONS.iter().copied().collect(),
        }
    }
}

impl SutSettings {
    pub fn image(&self, owner: &str, tag: &str) -> String {
        self.image_template
            .replace("{owner}", owner)
            .replace("{tag}", tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScenarioSettings {
    pub vip4: Ipv4Addr,
    pub vip6: Ipv6Addr,
    pub port: u16,
}

impl Default for ScenarioSettings {
    fn default() -> Self {
        Self {
            vip4: Ipv4Addr::new(10, 0, 0, 4),
            vip6: Ipv6Addr::new(0xfd00, 0xdead, 0xbeef, 0, 0, 0, 0, 4),
            port: 80,
        }
    }
}

impl ScenarioSettings {
    pub fn vips(&self) -> [IpAddr; 2] {
        [IpAddr::V4(self.vip4), IpAddr::V6(self.vip6)]
    }
}

#[derive(Debug, Clone, Default)]
pub struct HarnessConfig {
    pub topology: TopologySpec,
    pub sut: SutSettings,
    pub install: InstallSettings,
    pub probe: ProbeSettings,
    pub scenario: ScenarioSettings,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn option_value(name: &str, value: toml::Value) -> Result<String, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(s),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        other => Err(ConfigError::Invalid(format!(
            "sut.options.{name}: unsupported value {other}"
        ))),
    }
}

impl HarnessConfigInput {
    pub fn resolve(self) -> Result<HarnessConfig, ConfigError> {
        let defaults = HarnessConfig::default();

        let t = self.topology;
        let d = defaults.topology;
        let topology = TopologySpec {
            network: non_empty(t.network).unwrap_or(d.network),
            ipv4_subnet: non_empty(t.ipv4_subnet).unwrap_or(d.ipv4_subnet),
            ipv6_subnet: non_empty(t.ipv6_subnet).unwrap_or(d.ipv6_subnet),
            lb_node: NodeConfig {
                name: non_empty(t.lb_node).unwrap_or(d.lb_node.name),
                image: non_empty(t.lb_image).unwrap_or(d.lb_node.image),
            },
            target_node: NodeConfig {
                name: non_empty(t.target_node).unwrap_or(d.target_node.name),
                image: non_empty(t.target_image).unwrap_or(d.target_node.image),
            },
            interface: non_empty(t.interface).unwrap_or(d.interface),
            ready_interval: t
                .ready_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.ready_interval),
            ready_attempts: t.ready_attempts.unwrap_or(d.ready_attempts).max(1),
        };
        if topology.lb_node.name == topology.target_node.name {
            return Err(ConfigError::Invalid(format!(
                "LB and target node are both named `{}`",
                topology.lb_node.name
            )));
        }

        let mut overrides = SutConfiguration::new();
        for (name, value) in self.sut.options {
            let value = option_value(&name, value)?;
            overrides = overrides.with(&name, &value);
        }
        let image_template =
            non_empty(self.sut.image_template).unwrap_or(defaults.sut.image_template);
        if !image_template.contains("{tag}") {
            return Err(ConfigError::Invalid(format!(
                "sut.image_template `{image_template}` has no {{tag}} placeholder"
            )));
        }
        let sut = SutSettings {
            image_template,
            container: non_empty(self.sut.container).unwrap_or(defaults.sut.container),
            base_options: defaults.sut.base_options.merged(&overrides),
        };

        let d = defaults.install;
        let install = InstallSettings {
            poll_interval: self
                .install
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.poll_interval),
            max_status_polls: match self.install.max_status_polls {
                Some(0) => None,
                Some(n) => Some(n),
                None => d.max_status_polls,
            },
            settle: self
                .install
                .settle_ms
                .map(Duration::from_millis)
                .unwrap_or(d.settle),
        };

        let d = defaults.probe;
        let probe = ProbeSettings {
            attempts: self.probe.attempts.unwrap_or(d.attempts).max(1),
            ready_attempts: self.probe.ready_attempts.unwrap_or(d.ready_attempts).max(1),
            ready_interval: self
                .probe
                .ready_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(d.ready_interval),
            http_timeout: self
                .probe
                .http_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(d.http_timeout),
        };

        let d = defaults.scenario;
        let scenario = ScenarioSettings {
            vip4: self.scenario.vip4.unwrap_or(d.vip4),
            vip6: self.scenario.vip6.unwrap_or(d.vip6),
            port: self.scenario.port.unwrap_or(d.port),
        };

        Ok(HarnessConfig {
            topology,
            sut,
            install,
            probe,
            scenario,
        })
    }
}

impl HarnessConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(HarnessConfig::default());
        }
        let parsed: HarnessConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_is_default() {
        let cfg = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.topology, TopologySpec::default());
        assert_eq!(cfg.sut.container, "cilium-lb");
        assert_eq!(cfg.sut.base_options.get("datapath-mode"), Some("lb-only"));
        assert_eq!(cfg.install.max_status_polls, Some(100));
        assert_eq!(cfg.probe.attempts, 10);
        assert_eq!(cfg.scenario.vip4, Ipv4Addr::new(10, 0, 0, 4));
    }

    #[test]
    fn image_from_owner_and_tag() {
        let sut = SutSettings::default();
        assert_eq!(
            sut.image("cilium", "latest"),
            "quay.io/cilium/cilium-ci:latest"
        );
        assert_eq!(
            sut.image("someone", "abc123"),
            "quay.io/someone/cilium-ci:abc123"
        );
    }

    #[test]
    fn options_override_and_extend_defaults() {
        let toml = r#"
[sut.options]
bpf-lb-maglev-table-size = 16381
enable-ipv6 = false
debug = "true"
"#;
        let cfg = HarnessConfig::from_toml_str(toml).unwrap();
        let opts = &cfg.sut.base_options;
        assert_eq!(opts.get("bpf-lb-maglev-table-size"), Some("16381"));
        assert_eq!(opts.get("enable-ipv6"), Some("false"));
        assert_eq!(opts.get("debug"), Some("true"));
        assert_eq!(opts.get("bpf-lb-algorithm"), Some("maglev"));
    }

    #[test]
    fn zero_status_polls_means_unbounded() {
        let cfg = HarnessConfig::from_toml_str(
            "[install]\nmax_status_polls = 0\npoll_interval_ms = 500\n",
        )
        .unwrap();
        assert_eq!(cfg.install.max_status_polls, None);
        assert_eq!(cfg.install.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn topology_overrides() {
        let toml = r#"
[topology]
network = "l4lb-ci"
lb_node = "lb"
target_node = "web"
target_image = "nginx:1.27"
ready_attempts = 0

[scenario]
vip6 = "fd00::10"
"#;
        let cfg = HarnessConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.topology.network, "l4lb-ci");
        assert_eq!(cfg.topology.lb_node.name, "lb");
        assert_eq!(cfg.topology.lb_node.image, "docker:dind");
        assert_eq!(cfg.topology.target_node.image, "nginx:1.27");
        assert_eq!(cfg.topology.ready_attempts, 1);
        assert_eq!(cfg.scenario.vip6, "fd00::10".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(matches!(
            HarnessConfig::from_toml_str("[topology\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            HarnessConfig::from_toml_str("[topology]\nlb_node = \"x\"\ntarget_node = \"x\"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HarnessConfig::from_toml_str("[sut]\nimage_template = \"quay.io/x/y\"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            HarnessConfig::from_toml_str("[sut.options]\ndevices = [\"eth0\"]\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = HarnessConfig::load(Path::new("/nonexistent/l4lb.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
