//! [`SutClient`] for a Cilium agent in LB-only mode.
//!
//! The agent runs as a container on the LB node's own engine; every call is a
//! `docker exec` into the LB node, then either `docker run/rm` or
//! `docker exec <agent> cilium-dbg ...`.

use l4lb_testenv::{ExecOutput, NodeRuntime};
use serde_json::Value;

use super::{
    HashTableView, RecorderDefinition, ServiceDefinition, ServiceId, SutClient,
    SutConfiguration, SutHealth,
};
use crate::error::SutError;

pub struct CiliumSut<R> {
    runtime: R,
    node: String,
    container: String,
    image: String,
}

impl<R: NodeRuntime> CiliumSut<R> {
    pub fn new(runtime: R, node: &str, container: &str, image: &str) -> Self {
        Self {
            runtime,
            node: node.to_string(),
            container: container.to_string(),
            image: image.to_string(),
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    fn exec(&self, action: &'static str, command: &[&str]) -> Result<ExecOutput, SutError> {
        self.runtime
            .exec_in_node(&self.node, command)
            .map_err(|source| SutError::Runtime { action, source })
    }

    /// `cilium-dbg <args>` inside the agent container, failing on non-zero exit.
    fn dbg(&self, action: &'static str, args: &[&str]) -> Result<String, SutError> {
        let mut command = vec!["docker", "exec", self.container.as_str(), "cilium-dbg"];
        command.extend_from_slice(args);
        let out = self.exec(action, &command)?;
        checked(action, out)
    }
}

fn checked(action: &'static str, out: ExecOutput) -> Result<String, SutError> {
    if !out.success() {
        return Err(SutError::Command {
            action,
            exit_code: out.exit_code,
            stderr: out.stderr.trim().to_string(),
        });
    }
    Ok(out.stdout)
}

impl<R: NodeRuntime> SutClient for CiliumSut<R> {
    fn install(&self, options: &SutConfiguration, extra_args: &[String]) -> Result<(), SutError> {
        let out = self.exec("remove SUT", &["docker", "rm", "-f", &self.container])?;
        if !out.success() && !out.stderr.contains("No such container") {
            return Err(SutError::Command {
                action: "remove SUT",
                exit_code: out.exit_code,
                stderr: out.stderr.trim().to_string(),
            });
        }

        let agent_args = options.to_args();
        let mut command = vec![
            "docker",
            "run",
            "--name",
            self.container.as_str(),
            "-td",
            "-v",
            "/sys/fs/bpf:/sys/fs/bpf",
            "-v",
            "/lib/modules:/lib/modules",
            "--privileged=true",
            "--network=host",
            self.image.as_str(),
            "cilium-agent",
        ];
        command.extend(agent_args.iter().map(String::as_str));
        command.extend(extra_args.iter().map(String::as_str));

        tracing::debug!(image = %self.image, args = %agent_args.join(" "), "starting agent");
        let out = self.exec("start SUT", &command)?;
        checked("start SUT", out).map(|_| ())
    }

    fn status(&self) -> Result<SutHealth, SutError> {
        let out = self.exec(
            "status",
            &["docker", "exec", &self.container, "cilium-dbg", "status"],
        )?;
        Ok(if out.success() {
            SutHealth::Healthy
        } else {
            SutHealth::Unhealthy
        })
    }

    fn service_list(&self) -> Result<String, SutError> {
        self.dbg("service list", &["service", "list"])
    }

    fn service_update(&self, service: &ServiceDefinition) -> Result<(), SutError> {
        let id = service.id.to_string();
        let frontend = service.frontend.to_string();
        let backends = service
            .backends
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut args = vec![
            "service",
            "update",
            "--id",
            id.as_str(),
            "--frontend",
            frontend.as_str(),
            "--backends",
            backends.as_str(),
        ];
        args.extend(service.flags.iter().map(|f| f.as_arg()));
        self.dbg("service update", &args).map(|_| ())
    }

    fn service_delete(&self, id: ServiceId) -> Result<(), SutError> {
        let id = id.to_string();
        self.dbg("service delete", &["service", "delete", &id])
            .map(|_| ())
    }

    fn hash_table_list(&self, id: ServiceId) -> Result<HashTableView, SutError> {
        let json = self.dbg("maglev list", &["bpf", "lb", "maglev", "list", "-o", "json"])?;
        parse_maglev_json(&json, id)
    }

    fn recorder_update(&self, recorder: &RecorderDefinition) -> Result<(), SutError> {
        let id = recorder.id.to_string();
        let caplen = recorder.caplen.to_string();
        let filters = recorder.filters_arg();
        self.dbg(
            "recorder update",
            &[
                "recorder", "update", "--id", &id, "--caplen", &caplen, "--filters", &filters,
            ],
        )
        .map(|_| ())
    }

    fn recorder_delete(&self, id: u16) -> Result<(), SutError> {
        let id = id.to_string();
        self.dbg("recorder delete", &["recorder", "delete", "--id", &id])
            .map(|_| ())
    }

    fn recorder_list(&self) -> Result<String, SutError> {
        self.dbg("recorder list", &["recorder", "list"])
    }
}

/// Extracts the IPv4 and IPv6 entries for `id` from
/// `cilium-dbg bpf lb maglev list -o json`.
///
/// The agent keys entries `"[<id>]/v4"`; the unbracketed `"<id>/v4"` form
/// is accepted too. `null`, an empty string or an empty array read as an
/// empty (unpopulated) view. A missing entry also reads as empty, but the
/// keys that were present are logged so a key mismatch is visible.
pub fn parse_maglev_json(json: &str, id: ServiceId) -> Result<HashTableView, SutError> {
    let value: Value = serde_json::from_str(json).map_err(|e| SutError::Malformed {
        action: "maglev list",
        detail: e.to_string(),
    })?;

    let table = match value {
        Value::Object(map) => map,
        Value::Null => return Ok(HashTableView::default()),
        other => {
            return Err(SutError::Malformed {
                action: "maglev list",
                detail: format!("expected an object, got {other}"),
            })
        }
    };

    let view = |family: &str| -> String {
        let entry = table
            .get(&format!("[{id}]/{family}"))
            .or_else(|| table.get(&format!("{id}/{family}")));
        match entry {
            None => {
                let present: Vec<&str> = table.keys().map(String::as_str).collect();
                tracing::warn!(
                    service = %id,
                    family,
                    present = %present.join(" "),
                    "no Maglev entry for service"
                );
                String::new()
            }
            Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(a)) if a.is_empty() => String::new(),
            Some(other) => other.to_string(),
        }
    };

    Ok(HashTableView {
        v4: view("v4"),
        v6: view("v6"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sut::{ServiceFlag, SutConfiguration};
    use l4lb_testenv::fake::FakeRuntime;

    fn sut(runtime: &FakeRuntime) -> CiliumSut<FakeRuntime> {
        CiliumSut::new(
            runtime.clone(),
            "lb-node",
            "cilium-lb",
            "quay.io/cilium/cilium-ci:latest",
        )
    }

    #[test]
    fn install_replaces_previous_instance() {
        let runtime = FakeRuntime::new();
        runtime.respond(
            "lb-node",
            "docker rm -f cilium-lb",
            ExecOutput::failed(1, "Error response from daemon: No such container: cilium-lb"),
        );
        let options = SutConfiguration::new()
            .with("bpf-lb-algorithm", "maglev")
            .with("bpf-lb-acceleration", "native");

        sut(&runtime)
            .install(&options, &["--devices=eth0".to_string()])
            .unwrap();

        let execs = runtime.execs_in("lb-node");
        assert_eq!(execs[0], "docker rm -f cilium-lb");
        assert_eq!(
            execs[1],
            "docker run --name cilium-lb -td -v /sys/fs/bpf:/sys/fs/bpf \
             -v /lib/modules:/lib/modules --privileged=true --network=host \
             quay.io/cilium/cilium-ci:latest cilium-agent \
             --bpf-lb-acceleration=native --bpf-lb-algorithm=maglev --devices=eth0"
        );
    }

    #[test]
    fn install_fails_when_agent_does_not_start() {
        let runtime = FakeRuntime::new();
        runtime.respond(
            "lb-node",
            "docker run --name cilium-lb -td -v /sys/fs/bpf:/sys/fs/bpf \
             -v /lib/modules:/lib/modules --privileged=true --network=host \
             quay.io/cilium/cilium-ci:latest cilium-agent",
            ExecOutput::failed(125, "manifest unknown"),
        );
        let err = sut(&runtime)
            .install(&SutConfiguration::new(), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            SutError::Command {
                action: "start SUT",
                exit_code: 125,
                ..
            }
        ));
    }

    #[test]
    fn status_maps_exit_code() {
        let runtime = FakeRuntime::new();
        let cmd = "docker exec cilium-lb cilium-dbg status";
        runtime.respond("lb-node", cmd, ExecOutput::failed(1, "agent not ready"));
        runtime.respond("lb-node", cmd, ExecOutput::ok("KVStore: Disabled"));

        let sut = sut(&runtime);
        assert_eq!(sut.status().unwrap(), SutHealth::Unhealthy);
        assert_eq!(sut.status().unwrap(), SutHealth::Healthy);
    }

    #[test]
    fn service_update_renders_frontend_backends_and_flags() {
        let runtime = FakeRuntime::new();
        let svc = ServiceDefinition {
            id: ServiceId::new(1).unwrap(),
            frontend: "10.0.0.4:80".parse().unwrap(),
            backends: vec!["[fc00:c111::3]:80".parse().unwrap()],
            flags: vec![ServiceFlag::ExternalIp],
        };
        sut(&runtime).service_update(&svc).unwrap();

        assert_eq!(
            runtime.execs_in("lb-node"),
            vec![
                "docker exec cilium-lb cilium-dbg service update --id 1 \
                 --frontend 10.0.0.4:80 --backends [fc00:c111::3]:80 --k8s-external"
            ]
        );
    }

    #[test]
    fn command_failure_carries_stderr() {
        let runtime = FakeRuntime::new();
        runtime.respond(
            "lb-node",
            "docker exec cilium-lb cilium-dbg service delete 9",
            ExecOutput::failed(1, "Error: service not found\n"),
        );
        let err = sut(&runtime)
            .service_delete(ServiceId::new(9).unwrap())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "service delete exited with 1: Error: service not found"
        );
    }

    #[test]
    fn recorder_update_passes_filter_list() {
        let runtime = FakeRuntime::new();
        let rec = RecorderDefinition {
            id: 2,
            caplen: 100,
            filters: crate::fixtures::recorder_filters_v4(),
        };
        sut(&runtime).recorder_update(&rec).unwrap();
        let exec = &runtime.execs_in("lb-node")[0];
        assert!(exec.starts_with(
            "docker exec cilium-lb cilium-dbg recorder update --id 2 --caplen 100 --filters "
        ));
        assert!(exec.ends_with(&rec.filters_arg()));
    }

    #[test]
    fn maglev_views_per_family() {
        let id = ServiceId::new(1).unwrap();
        let json = r#"{
            "1/v4": "",
            "1/v6": "2,2,2,2,2,2",
            "2/v4": "3,3,3"
        }"#;
        let view = parse_maglev_json(json, id).unwrap();
        assert_eq!(view.v4, "");
        assert_eq!(view.v6, "2,2,2,2,2,2");

        let view = parse_maglev_json(json, ServiceId::new(2).unwrap()).unwrap();
        assert!(view.is_populated(crate::sut::AddressFamily::V4));
        assert!(!view.is_populated(crate::sut::AddressFamily::V6));
    }

    #[test]
    fn maglev_bracketed_keys() {
        let json = r#"{
            "[1]/v4": "",
            "[1]/v6": "5,5,5,5,5,5,5",
            "[12]/v4": "7,7,7"
        }"#;
        let view = parse_maglev_json(json, ServiceId::new(1).unwrap()).unwrap();
        assert_eq!(view.v4, "");
        assert_eq!(view.v6, "5,5,5,5,5,5,5");

        let view = parse_maglev_json(json, ServiceId::new(12).unwrap()).unwrap();
        assert_eq!(view.v4, "7,7,7");
        assert_eq!(view.v6, "");

        // "[2]" must not pick up "[12]"
        let view = parse_maglev_json(json, ServiceId::new(2).unwrap()).unwrap();
        assert_eq!(view, HashTableView::default());
    }

    #[test]
    fn maglev_bracketed_key_wins_over_plain() {
        let json = r#"{"[1]/v4": "9,9", "1/v4": "1,1"}"#;
        let view = parse_maglev_json(json, ServiceId::new(1).unwrap()).unwrap();
        assert_eq!(view.v4, "9,9");
    }

    #[test]
    fn maglev_arrays_and_null() {
        let id = ServiceId::new(1).unwrap();
        let view = parse_maglev_json(r#"{"1/v4": [], "1/v6": [4, 4, 4]}"#, id).unwrap();
        assert_eq!(view.v4, "");
        assert_eq!(view.v6, "[4,4,4]");

        assert_eq!(parse_maglev_json("null", id).unwrap(), HashTableView::default());
        assert!(parse_maglev_json("[1,2]", id).is_err());
        assert!(parse_maglev_json("not json", id).is_err());
    }
}
