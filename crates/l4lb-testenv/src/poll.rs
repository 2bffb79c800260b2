//! Bounded, blocking polling.
//!
//! Readiness of nodes, the SUT and freshly programmed services is only ever
//! inferred by asking again. [`Poll`] runs a check at a fixed interval up to an
//! optional attempt budget and reports one of three outcomes.

use std::time::Duration;

/// Fixed-interval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub interval: Duration,
    /// `None` polls until the check succeeds or errs.
    pub max_attempts: Option<u32>,
}

/// Result of a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T, E> {
    Ready(T),
    NotReady { attempts: u32 },
    Erred(E),
}

impl Poll {
    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
        }
    }

    /// Runs `check` until it yields `Ok(Some(_))`, yields `Err`, or the attempt
    /// budget is exhausted. `check` receives the 1-based attempt number.
    ///
    /// Sleeps `interval` between attempts, never after the last one.
    pub fn run<T, E, F>(&self, what: &str, mut check: F) -> PollOutcome<T, E>
    where
        F: FnMut(u32) -> Result<Option<T>, E>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match check(attempt) {
                Ok(Some(value)) => {
                    tracing::debug!(what, attempt, "ready");
                    return PollOutcome::Ready(value);
                }
                Ok(None) => tracing::debug!(what, attempt, "not ready"),
                Err(e) => return PollOutcome::Erred(e),
            }

            if let Some(max) = self.max_attempts {
                if attempt >= max {
                    return PollOutcome::NotReady { attempts: attempt };
                }
            }
            std::thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_on_first_success() {
        let poll = Poll::bounded(Duration::ZERO, 10);
        let mut calls = 0;
        let outcome: PollOutcome<u32, ()> = poll.run("counter", |attempt| {
            calls += 1;
            Ok((attempt == 3).then_some(attempt))
        });
        assert_eq!(outcome, PollOutcome::Ready(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn exhausts_budget() {
        let poll = Poll::bounded(Duration::ZERO, 4);
        let mut calls = 0;
        let outcome: PollOutcome<(), ()> = poll.run("never", |_| {
            calls += 1;
            Ok(None)
        });
        assert_eq!(outcome, PollOutcome::NotReady { attempts: 4 });
        assert_eq!(calls, 4);
    }

    #[test]
    fn error_stops_polling() {
        let poll = Poll::unbounded(Duration::ZERO);
        let mut calls = 0;
        let outcome: PollOutcome<(), &str> = poll.run("broken", |attempt| {
            calls += 1;
            if attempt == 2 {
                Err("exec failed")
            } else {
                Ok(None)
            }
        });
        assert_eq!(outcome, PollOutcome::Erred("exec failed"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn zero_budget_still_checks_once() {
        let poll = Poll::bounded(Duration::ZERO, 0);
        let outcome: PollOutcome<(), ()> = poll.run("once", |_| Ok(None));
        assert_eq!(outcome, PollOutcome::NotReady { attempts: 1 });
    }
}
