use std::time::Duration;

use crate::entries::{EntryStatus, EntryStatusView};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub backoff: f64,
    pub max_interval: Duration,
    pub deadline: Duration,
    /// Consecutive transport failures tolerated before giving up.
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(600),
            backoff: 1.5,
            max_interval: Duration::from_secs(5),
            deadline: Duration::from_secs(120),
            max_consecutive_failures: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollState {
    Submitted,
    Polling {
        attempts: u32,
        interval: Duration,
        consecutive_failures: u32,
    },
    Completed(EntryStatusView),
    Errored(EntryStatusView),
    TimedOut,
    /// Too many consecutive transport failures.
    Unreachable {
        last_error: String,
    },
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Submitted | PollState::Polling { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    Started,
    Status(EntryStatusView),
    TransportFailure(String),
    DeadlineElapsed,
}

/// Pure transition function; the driver owns the clock and the transport.
#[derive(Debug, Clone)]
pub struct PollMachine {
    config: PollConfig,
    state: PollState,
}

impl PollMachine {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            state: PollState::Submitted,
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Delay before the next status read, if still polling.
    pub fn next_delay(&self) -> Option<Duration> {
        match &self.state {
            PollState::Polling { interval, .. } => Some(*interval),
            _ => None,
        }
    }

    pub fn handle(&mut self, event: PollEvent) -> &PollState {
        if !self.state.is_terminal() {
            let current = std::mem::replace(&mut self.state, PollState::Submitted);
            self.state = self.transition(current, event);
        }
        &self.state
    }

    fn transition(&self, state: PollState, event: PollEvent) -> PollState {
        match (state, event) {
            (_, PollEvent::DeadlineElapsed) => PollState::TimedOut,
            (PollState::Submitted, PollEvent::Started) => PollState::Polling {
                attempts: 0,
                interval: self.config.initial_interval,
                consecutive_failures: 0,
            },
            (
                PollState::Polling {
                    attempts, interval, ..
                },
                PollEvent::Status(view),
            ) => match view.status {
                EntryStatus::Complete => PollState::Completed(view),
                EntryStatus::Error => PollState::Errored(view),
                EntryStatus::Pending | EntryStatus::Processing => PollState::Polling {
                    attempts: attempts + 1,
                    interval: self.backoff(interval),
                    consecutive_failures: 0,
                },
            },
            (
                PollState::Polling {
                    attempts,
                    interval,
                    consecutive_failures,
                },
                PollEvent::TransportFailure(err),
            ) => {
                let failures = consecutive_failures + 1;
                if failures > self.config.max_consecutive_failures {
                    PollState::Unreachable { last_error: err }
                } else {
                    PollState::Polling {
                        attempts: attempts + 1,
                        interval: self.backoff(interval),
                        consecutive_failures: failures,
                    }
                }
            }
            // Status before Started, or Started twice: nothing to do.
            (state, _) => state,
        }
    }

    fn backoff(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.config.backoff).round() as u64;
        Duration::from_millis(next_ms).min(self.config.max_interval)
    }
}
