//! The per-exchange deadline timer.

use std::future::Future;
use std::pin::Pin;

use tokio::time::{Instant, Sleep};
use tracing::trace;

/// Lifecycle of a [`Deadline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerState {
    /// No deadline applies to the exchange.
    Disarmed,

    /// Waiting for either expiry or cancellation.
    Armed,

    /// Expired before the exchange completed.
    Fired,

    /// Canceled because the exchange completed first.
    Canceled,
}

/// A single timer raced against every I/O operation of one exchange.
///
/// The expiry instant is fixed when the exchange is submitted. The timer
/// itself is created the first time it is raced, since that happens inside
/// the engine's runtime.
pub(crate) struct Deadline {
    expires_at: Option<Instant>,
    sleep: Option<Pin<Box<Sleep>>>,
    state: TimerState,
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("expires_at", &self.expires_at)
            .field("state", &self.state)
            .finish()
    }
}

impl Deadline {
    /// A deadline which expires at `expires_at`, or never when `None`.
    pub(crate) fn new(expires_at: Option<Instant>) -> Self {
        Self {
            expires_at,
            sleep: None,
            state: if expires_at.is_some() {
                TimerState::Armed
            } else {
                TimerState::Disarmed
            },
        }
    }

    pub(crate) fn state(&self) -> TimerState {
        self.state
    }

    /// Run `future` until it completes or the deadline expires.
    ///
    /// Returns `None` on expiry, after which the deadline stays fired and
    /// every later race returns `None` immediately. When both are ready, the
    /// future's output wins.
    pub(crate) async fn race<F: Future>(&mut self, future: F) -> Option<F::Output> {
        match self.state {
            TimerState::Fired => return None,
            TimerState::Disarmed | TimerState::Canceled => return Some(future.await),
            TimerState::Armed => {}
        }

        let Some(expires_at) = self.expires_at else {
            return Some(future.await);
        };
        let sleep = self
            .sleep
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(expires_at)));

        tokio::select! {
            biased;
            output = future => Some(output),
            () = sleep.as_mut() => {
                trace!("deadline fired");
                self.sleep = None;
                self.state = TimerState::Fired;
                None
            }
        }
    }

    /// Stop the timer. Returns `true` if this call canceled an armed timer;
    /// canceling a fired, canceled or disarmed deadline does nothing.
    pub(crate) fn cancel(&mut self) -> bool {
        if self.state == TimerState::Armed {
            self.sleep = None;
            self.state = TimerState::Canceled;
            trace!("deadline canceled");
            true
        } else {
            false
        }
    }
}
