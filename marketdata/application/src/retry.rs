use marketdata_domain::RetryPolicy;
use std::fmt::Display;
use std::future::Future;
use tracing::{debug, warn};

use crate::shutdown::Shutdown;

/// Explicit retry state machine:
/// `Attempting(n) -> {done | BackingOff(n) -> Attempting(n+1) | exhausted}`.
///
/// The wrapped operation must be safe to repeat; a retry replays it in
/// full. Exhaustion is a return value, never a propagated error.
pub struct RetryRunner {
    policy: RetryPolicy,
}

enum RetryState {
    Attempting(u32),
    BackingOff(u32),
}

/// Terminal result of one retried invocation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: E },
    /// Shutdown fired during a backoff sleep; no terminal outcome.
    Interrupted,
}

impl RetryRunner {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run<T, E, F, Fut>(&self, shutdown: &Shutdown, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut state = RetryState::Attempting(1);

        loop {
            match state {
                RetryState::Attempting(attempt) => match op(attempt).await {
                    Ok(value) => {
                        return RetryOutcome::Succeeded {
                            value,
                            attempts: attempt,
                        }
                    }
                    Err(e) if attempt < self.policy.max_attempts() => {
                        warn!(
                            "Attempt {}/{} failed: {}",
                            attempt,
                            self.policy.max_attempts(),
                            e
                        );
                        state = RetryState::BackingOff(attempt);
                    }
                    Err(e) => {
                        return RetryOutcome::Exhausted {
                            attempts: attempt,
                            last_error: e,
                        }
                    }
                },
                RetryState::BackingOff(attempt) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    debug!("Backing off {:?} before attempt {}", delay, attempt + 1);
                    if !shutdown.sleep(delay).await {
                        return RetryOutcome::Interrupted;
                    }
                    state = RetryState::Attempting(attempt + 1);
                }
            }
        }
    }
}
