//! HTTP reachability through a VIP.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use l4lb_testenv::{Poll, PollOutcome};
use thiserror::Error;

use crate::error::AssertionError;

#[derive(Debug, Error)]
#[error("GET http://{target}/: {reason}")]
pub struct ProbeError {
    pub target: SocketAddr,
    pub reason: String,
}

/// One connectivity check against `target`.
pub trait HttpProbe {
    fn probe(&self, target: SocketAddr) -> Result<(), ProbeError>;
}

/// Blocking `GET http://<target>/`. Any HTTP response counts as reachable;
/// status and body are not inspected.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::blocking::Client,
}

impl ReqwestProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

impl HttpProbe for ReqwestProbe {
    fn probe(&self, target: SocketAddr) -> Result<(), ProbeError> {
        let url = format!("http://{target}/");
        match self.client.get(&url).send() {
            Ok(resp) => {
                tracing::trace!(%target, status = %resp.status(), "probe answered");
                Ok(())
            }
            Err(e) => Err(ProbeError {
                target,
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Requests per `Probe` phase; all must succeed.
    pub attempts: u32,
    pub ready_attempts: u32,
    pub ready_interval: Duration,
    pub http_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            attempts: 10,
            ready_attempts: 10,
            ready_interval: Duration::from_secs(1),
            http_timeout: Duration::from_secs(2),
        }
    }
}

pub struct Prober<P> {
    http: P,
    settings: ProbeSettings,
}

impl<P: HttpProbe> Prober<P> {
    pub fn new(http: P, settings: ProbeSettings) -> Self {
        Self { http, settings }
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    /// Sends `attempts` requests (the configured default when `None`).
    /// Fails if any of them fails.
    pub fn probe(&self, target: SocketAddr, attempts: Option<u32>) -> Result<(), AssertionError> {
        let attempts = attempts.unwrap_or(self.settings.attempts);
        let mut failed = 0;
        let mut last_error = None;
        for attempt in 1..=attempts {
            if let Err(e) = self.http.probe(target) {
                tracing::warn!(%target, attempt, error = %e, "probe failed");
                failed += 1;
                last_error = Some(e.reason);
            }
        }

        if failed > 0 {
            return Err(AssertionError::ProbeFailed {
                target,
                failed,
                attempts,
                last_error: last_error.unwrap_or_default(),
            });
        }
        tracing::info!(%target, attempts, "all probes succeeded");
        Ok(())
    }

    /// Polls `target` until one request succeeds.
    pub fn wait_ready(&self, target: SocketAddr) -> Result<(), AssertionError> {
        let poll = Poll::bounded(self.settings.ready_interval, self.settings.ready_attempts);
        let outcome = poll.run(&format!("{target} reachable"), |_| {
            Ok::<_, Infallible>(self.http.probe(target).ok())
        });
        match outcome {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::NotReady { attempts } => Err(AssertionError::NotReady { target, attempts }),
            PollOutcome::Erred(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::ScriptedProbe;

    fn settings() -> ProbeSettings {
        ProbeSettings {
            ready_interval: Duration::ZERO,
            ..ProbeSettings::default()
        }
    }

    fn vip() -> SocketAddr {
        "10.0.0.4:80".parse().unwrap()
    }

    #[test]
    fn ten_of_ten_succeed() {
        let http = ScriptedProbe::new();
        let prober = Prober::new(http.clone(), settings());
        prober.probe(vip(), None).unwrap();
        assert_eq!(http.calls(), 10);
    }

    #[test]
    fn single_failure_fails_the_phase() {
        let http = ScriptedProbe::new();
        http.script([true, true, true, false, true]);
        let prober = Prober::new(http.clone(), settings());

        match prober.probe(vip(), Some(5)).unwrap_err() {
            AssertionError::ProbeFailed {
                failed, attempts, ..
            } => {
                assert_eq!(failed, 1);
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(http.calls(), 5);
    }

    #[test]
    fn wait_ready_first_success_wins() {
        let http = ScriptedProbe::new();
        http.script([false, false, true]);
        let prober = Prober::new(http.clone(), settings());
        prober.wait_ready(vip()).unwrap();
        assert_eq!(http.calls(), 3);
    }

    #[test]
    fn wait_ready_exhausts() {
        let http = ScriptedProbe::new();
        http.script([false]);
        let prober = Prober::new(http.clone(), settings());
        assert!(matches!(
            prober.wait_ready(vip()),
            Err(AssertionError::NotReady { attempts: 10, .. })
        ));
    }

    #[test]
    fn unreachable_target_is_an_error() {
        // Nothing listens on port 9 of the loopback address.
        let probe = ReqwestProbe::new(Duration::from_millis(500)).unwrap();
        assert!(probe.probe("127.0.0.1:9".parse().unwrap()).is_err());
    }
}
