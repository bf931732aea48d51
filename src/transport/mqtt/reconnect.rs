//! Recovery scheduling after a lost connection
//!
//! Pure decision logic for the two-stage reconnect: one attempt 5 s after
//! the loss, a second one at the 10 s mark if the first did not bring the
//! session back, then nothing. Attempts run serially in the supervisor task,
//! so at most one is ever outstanding.

use std::time::Duration;

/// Fixed two-stage recovery schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay from the loss event to the first attempt
    pub first_delay: Duration,
    /// Deadline from the loss event for the second (final) attempt
    pub second_deadline: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            first_delay: Duration::from_secs(5),
            second_deadline: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Number of attempts the schedule allows.
    pub const MAX_ATTEMPTS: u32 = 2;
}

/// Decision for the next recovery step
#[derive(Debug, PartialEq)]
pub enum ReconnectDecision {
    /// Sleep `delay`, then run recovery attempt `attempt` (1-based)
    Attempt { attempt: u32, delay: Duration },
    /// Shutdown was requested while waiting
    AbortShutdownRequested,
    /// Both scheduled attempts are spent
    GiveUp,
}

/// Decide the next recovery step.
///
/// `attempts_so_far` counts attempts already made since the loss event;
/// `elapsed_since_loss` is measured from that event. The second attempt
/// fills whatever remains of the deadline window, so a slow first attempt
/// shrinks (possibly to zero) the second delay rather than pushing the
/// deadline out.
pub fn next_attempt(
    policy: &ReconnectPolicy,
    attempts_so_far: u32,
    elapsed_since_loss: Duration,
    shutdown_requested: bool,
) -> ReconnectDecision {
    if shutdown_requested {
        return ReconnectDecision::AbortShutdownRequested;
    }

    match attempts_so_far {
        0 => ReconnectDecision::Attempt {
            attempt: 1,
            delay: policy.first_delay.saturating_sub(elapsed_since_loss),
        },
        1 => ReconnectDecision::Attempt {
            attempt: 2,
            delay: policy.second_deadline.saturating_sub(elapsed_since_loss),
        },
        _ => ReconnectDecision::GiveUp,
    }
}
