//! Exactly-once environment teardown.
//!
//! The [`Finalizer`] is created before anything is provisioned and owns the
//! [`TeardownLedger`]. Teardown runs on the first [`Finalizer::finish`] call,
//! or on drop if `finish` was never reached (early return, `?`, panic).

use std::io::{BufRead, IsTerminal, Write};

use l4lb_testenv::{HostNet, NodeRuntime, TeardownLedger, TeardownReport, TeardownStep};

/// Whether to leave the environment in place for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldPolicy {
    Never,
    Always,
    /// Prompt on stdin when it is a terminal; tear down otherwise.
    AskIfTerminal,
}

impl HoldPolicy {
    fn should_hold(self) -> bool {
        match self {
            HoldPolicy::Never => false,
            HoldPolicy::Always => true,
            HoldPolicy::AskIfTerminal => {
                let stdin = std::io::stdin();
                if !stdin.is_terminal() {
                    return false;
                }
                ask_hold(&mut stdin.lock(), &mut std::io::stderr())
            }
        }
    }
}

/// Asks `Hold the environment for debugging? [y/N]`. Anything but `y`/`yes`
/// (or a read error) means no.
pub fn ask_hold<R: BufRead, W: Write>(input: &mut R, prompt: &mut W) -> bool {
    let _ = write!(prompt, "Hold the environment for debugging? [y/N] ");
    let _ = prompt.flush();
    let mut answer = String::new();
    if input.read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[derive(Debug)]
pub enum Finish {
    TornDown(TeardownReport),
    /// Environment left running; the steps that would have run, newest first.
    Held { steps: Vec<String> },
}

pub struct Finalizer<R: NodeRuntime, H: HostNet> {
    runtime: R,
    host: H,
    ledger: TeardownLedger,
    hold: HoldPolicy,
    finished: bool,
}

impl<R: NodeRuntime, H: HostNet> Finalizer<R, H> {
    pub fn new(runtime: R, host: H, hold: HoldPolicy) -> Self {
        Self {
            runtime,
            host,
            ledger: TeardownLedger::new(),
            hold,
            finished: false,
        }
    }

    pub fn ledger_mut(&mut self) -> &mut TeardownLedger {
        &mut self.ledger
    }

    pub fn register(&mut self, step: TeardownStep) {
        self.ledger.push(step);
    }

    pub fn set_hold(&mut self, hold: HoldPolicy) {
        self.hold = hold;
    }

    /// Tears the environment down, unless the hold policy says otherwise.
    /// Only the first call does anything; later calls return `None`.
    pub fn finish(&mut self) -> Option<Finish> {
        if std::mem::replace(&mut self.finished, true) {
            return None;
        }

        if !self.ledger.is_empty() && self.hold.should_hold() {
            let steps: Vec<String> = self
                .ledger
                .steps()
                .iter()
                .rev()
                .map(ToString::to_string)
                .collect();
            tracing::warn!(resources = steps.len(), "holding environment, nothing torn down");
            for step in &steps {
                tracing::info!("pending: {step}");
            }
            return Some(Finish::Held { steps });
        }

        let report = self.ledger.run(&self.runtime, &self.host);
        if report.is_clean() {
            tracing::info!(steps = report.completed.len(), "teardown complete");
        } else {
            tracing::warn!(
                completed = report.completed.len(),
                failed = report.failures.len(),
                "teardown finished with failures"
            );
        }
        Some(Finish::TornDown(report))
    }
}

impl<R: NodeRuntime, H: HostNet> Drop for Finalizer<R, H> {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use l4lb_testenv::fake::{FakeHost, FakeRuntime};
    use l4lb_testenv::NetworkHandle;

    fn populated(finalizer: &mut Finalizer<FakeRuntime, FakeHost>) {
        finalizer.register(TeardownStep::RemoveNetwork {
            handle: NetworkHandle::new("net"),
        });
        finalizer.register(TeardownStep::RemoveNode { name: "lb".into() });
        finalizer.register(TeardownStep::RemoveRoute {
            destination: "10.0.0.4".parse().unwrap(),
        });
    }

    #[test]
    fn finish_runs_once() {
        let runtime = FakeRuntime::new();
        let host = FakeHost::new();
        let mut finalizer = Finalizer::new(runtime.clone(), host.clone(), HoldPolicy::Never);
        populated(&mut finalizer);

        match finalizer.finish() {
            Some(Finish::TornDown(report)) => {
                assert!(report.is_clean());
                assert_eq!(
                    report.completed,
                    vec!["remove route 10.0.0.4/32", "remove node lb", "remove network net"]
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(finalizer.finish().is_none());
        drop(finalizer);

        assert_eq!(runtime.removed_nodes(), vec!["lb"]);
        assert_eq!(runtime.removed_networks(), vec!["net"]);
        assert_eq!(host.removed_routes().len(), 1);
    }

    #[test]
    fn drop_tears_down() {
        let runtime = FakeRuntime::new();
        {
            let mut finalizer = Finalizer::new(runtime.clone(), FakeHost::new(), HoldPolicy::Never);
            populated(&mut finalizer);
        }
        assert_eq!(runtime.removed_nodes(), vec!["lb"]);
    }

    #[test]
    fn drop_during_panic_tears_down() {
        let runtime = FakeRuntime::new();
        let r = runtime.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let mut finalizer = Finalizer::new(r, FakeHost::new(), HoldPolicy::Never);
            populated(&mut finalizer);
            panic!("phase blew up");
        }));
        assert!(result.is_err());
        assert_eq!(runtime.removed_networks(), vec!["net"]);
    }

    #[test]
    fn hold_leaves_everything() {
        let runtime = FakeRuntime::new();
        let mut finalizer = Finalizer::new(runtime.clone(), FakeHost::new(), HoldPolicy::Always);
        populated(&mut finalizer);

        match finalizer.finish() {
            Some(Finish::Held { steps }) => assert_eq!(steps.len(), 3),
            other => panic!("unexpected: {other:?}"),
        }
        drop(finalizer);
        assert!(runtime.removed_nodes().is_empty());
    }

    #[test]
    fn prompt_answers() {
        let mut out = Vec::new();
        assert!(ask_hold(&mut "y\n".as_bytes(), &mut out));
        assert!(ask_hold(&mut "YES\n".as_bytes(), &mut out));
        assert!(!ask_hold(&mut "\n".as_bytes(), &mut out));
        assert!(!ask_hold(&mut "".as_bytes(), &mut out));
        assert!(String::from_utf8(out)
            .unwrap()
            .starts_with("Hold the environment for debugging? [y/N]"));
    }
}
