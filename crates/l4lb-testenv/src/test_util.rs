use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

/// Monotonically increasing counter for generating unique test resource names.
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Check whether the Docker daemon is reachable and passwordless `sudo` is
/// available. Returns `false` if the test environment cannot provision real
/// nodes, networks and host routes.
pub fn check_privileges() -> bool {
    let docker = match Command::new("docker").arg("info").output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    };
    let sudo = match Command::new("sudo").args(["-n", "true"]).output() {
        Ok(o) => o.status.success(),
        Err(_) => false,
    };
    docker && sudo
}

/// Longest name accepted for a Linux interface, and so for a Docker bridge.
const MAX_NAME_LEN: usize = 15;

/// `<prefix>_<pid>_<seq>`, unique within this host for the test run.
///
/// When the result would exceed [`MAX_NAME_LEN`] the prefix is shortened,
/// never the pid or sequence suffix, so names from one process never collide.
pub fn unique_name(prefix: &str) -> String {
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix = format!("_{:x}_{seq}", std::process::id() % 0xFFFF);
    let keep = MAX_NAME_LEN.saturating_sub(suffix.len());
    let head: String = prefix.chars().take(keep).collect();
    format!("{head}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_names_differ_and_fit() {
        let a = unique_name("l4lb_x");
        let b = unique_name("l4lb_x");
        assert_ne!(a, b);
        assert!(a.len() <= MAX_NAME_LEN);
    }

    #[test]
    fn long_prefix_keeps_sequence_suffix() {
        let names: Vec<String> = (0..20).map(|_| unique_name("l4lb_network")).collect();
        for name in &names {
            assert!(name.len() <= MAX_NAME_LEN, "{name}");
            assert!(name.starts_with("l4lb"), "{name}");
        }
        let mut distinct = names.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), names.len());

        let pid = format!("_{:x}_", std::process::id() % 0xFFFF);
        assert!(names.iter().all(|n| n.contains(&pid)));
    }
}
