//! SUT (re)installation.

use std::time::Duration;

use l4lb_testenv::{Poll, PollOutcome};

use crate::error::InstallError;
use crate::sut::{SutClient, SutConfiguration, SutHealth};

/// Health polling and settle timing for [`Lifecycle::install`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallSettings {
    pub poll_interval: Duration,
    /// `None` waits for health indefinitely.
    pub max_status_polls: Option<u32>,
    /// Pause after the SUT reports healthy, before any other phase runs.
    pub settle: Duration,
}

impl Default for InstallSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_status_polls: Some(100),
            settle: Duration::from_secs(1),
        }
    }
}

impl InstallSettings {
    fn poll(&self) -> Poll {
        match self.max_status_polls {
            Some(max) => Poll::bounded(self.poll_interval, max),
            None => Poll::unbounded(self.poll_interval),
        }
    }
}

/// Installs the SUT with a base configuration overlaid by per-phase variants.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    base: SutConfiguration,
    settings: InstallSettings,
}

impl Lifecycle {
    pub fn new(base: SutConfiguration, settings: InstallSettings) -> Self {
        Self { base, settings }
    }

    pub fn base(&self) -> &SutConfiguration {
        &self.base
    }

    /// Replaces the running SUT with one started from `base ⊕ variant` and
    /// `extra_args`, then blocks until it reports healthy.
    ///
    /// Returns the effective configuration.
    pub fn install<S: SutClient>(
        &self,
        sut: &S,
        variant: &SutConfiguration,
        extra_args: &[String],
    ) -> Result<SutConfiguration, InstallError> {
        let effective = self.base.merged(variant);
        tracing::info!(config = %variant, "installing SUT");

        sut.install(&effective, extra_args)
            .map_err(InstallError::Start)?;

        let outcome = self.settings.poll().run("SUT health", |_| {
            sut.status()
                .map(|health| (health == SutHealth::Healthy).then_some(()))
        });
        match outcome {
            PollOutcome::Ready(()) => {}
            PollOutcome::NotReady { attempts } => {
                return Err(InstallError::NeverHealthy { attempts })
            }
            PollOutcome::Erred(e) => return Err(InstallError::Status(e)),
        }

        std::thread::sleep(self.settings.settle);
        tracing::info!(config = %variant, "SUT healthy");
        Ok(effective)
    }
}
