//! Node/network runtime.
//!
//! [`NodeRuntime`] is the narrow control surface the harness uses to create
//! and remove containers ("nodes") and the virtual network they share, and to
//! execute commands inside a node. [`DockerCli`] implements it by shelling out
//! to the `docker` binary.

use crate::command::{self, render};
use crate::error::CommandError;

/// Output of a command executed inside a node.
///
/// A non-zero exit is not an error at this layer; callers decide what a
/// failing command means.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A virtual network segment to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    /// CIDR subnets; an IPv6 subnet enables IPv6 on the network.
    pub subnets: Vec<String>,
}

/// Handle to a created network (its name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkHandle(pub String);

impl NetworkHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Bind mount from the host into a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
}

impl Mount {
    pub fn same_path(path: &str) -> Self {
        Self {
            source: path.to_string(),
            target: path.to_string(),
        }
    }
}

/// A compute node (container) to start on a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSpec {
    pub name: String,
    pub image: String,
    pub network: NetworkHandle,
    pub privileged: bool,
    pub mounts: Vec<Mount>,
}

pub trait NodeRuntime {
    fn create_network(&self, spec: &NetworkSpec) -> Result<NetworkHandle, CommandError>;

    /// Starts a detached node; the node name doubles as its handle.
    fn create_node(&self, spec: &NodeSpec) -> Result<String, CommandError>;

    /// Removes a node. A node that does not exist is not an error.
    fn remove_node(&self, name: &str) -> Result<(), CommandError>;

    /// Removes a network. A network that does not exist is not an error.
    fn remove_network(&self, handle: &NetworkHandle) -> Result<(), CommandError>;

    fn exec_in_node(&self, name: &str, command: &[&str]) -> Result<ExecOutput, CommandError>;
}

/// [`NodeRuntime`] backed by the `docker` command line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".into(),
        }
    }
}

impl DockerCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn docker(&self, args: &[&str]) -> Result<String, CommandError> {
        tracing::debug!(command = %render(&self.binary, args), "docker");
        command::run_ok(&self.binary, args)
    }
}

impl NodeRuntime for DockerCli {
    fn create_network(&self, spec: &NetworkSpec) -> Result<NetworkHandle, CommandError> {
        let mut args = vec!["network", "create"];
        if spec.subnets.iter().any(|s| s.contains(':')) {
            args.push("--ipv6");
        }
        for subnet in &spec.subnets {
            args.push("--subnet");
            args.push(subnet);
        }
        args.push(&spec.name);
        self.docker(&args)?;
        Ok(NetworkHandle::new(&spec.name))
    }

    fn create_node(&self, spec: &NodeSpec) -> Result<String, CommandError> {
        let volumes: Vec<String> = spec
            .mounts
            .iter()
            .map(|m| format!("{}:{}", m.source, m.target))
            .collect();

        let mut args = vec![
            "run",
            "-d",
            "--name",
            &spec.name,
            "--hostname",
            &spec.name,
            "--network",
            spec.network.name(),
        ];
        if spec.privileged {
            args.push("--privileged");
        }
        for volume in &volumes {
            args.push("-v");
            args.push(volume);
        }
        args.push(&spec.image);
        self.docker(&args)?;
        Ok(spec.name.clone())
    }

    fn remove_node(&self, name: &str) -> Result<(), CommandError> {
        match self.docker(&["rm", "-f", name]) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    fn remove_network(&self, handle: &NetworkHandle) -> Result<(), CommandError> {
        match self.docker(&["network", "rm", handle.name()]) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    fn exec_in_node(&self, name: &str, cmd: &[&str]) -> Result<ExecOutput, CommandError> {
        let mut args = vec!["exec", name];
        args.extend_from_slice(cmd);
        tracing::debug!(command = %render(&self.binary, &args), "docker exec");
        let output = command::run(&self.binary, &args)?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::check_privileges;

    #[test]
    fn exec_output_success() {
        assert!(ExecOutput::ok("hello").success());
        assert!(!ExecOutput::failed(1, "boom").success());
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let docker = DockerCli::with_binary("/nonexistent/docker-binary");
        let err = docker.remove_node("whatever").unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[test]
    fn remove_missing_node_is_ok() {
        if !check_privileges() {
            eprintln!("Skipping test, docker unavailable");
            return;
        }

        let name = crate::test_util::unique_name("l4lb_gone");
        DockerCli::new()
            .remove_node(&name)
            .expect("removing a missing node should succeed");
    }
}
