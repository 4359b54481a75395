//! Single-shot, cancellable escalation timers.
//!
//! A timer never calls back into the state machine directly. Firing produces
//! the [`TimerHandle`] that was returned by `schedule`, delivered as an event
//! to whoever owns the machine, so a fire is always processed on the same
//! execution context as every other transition.
//!
//! Handles are never reused. The owner compares a fired handle against the
//! one it is waiting for and drops anything else, which makes cancel-after-
//! fire a no-op and rules out double escalation when cancel and fire race.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::tracing::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("failed to schedule escalation timer: {0}")]
    SchedulingFailed(String),
}

pub trait EscalationTimer: Send {
    /// Arm a single-shot timeout `delay` from now.
    ///
    /// Any handle still live on this timer is cancelled first, so at most
    /// one timeout is ever pending.
    fn schedule(&mut self, delay: Duration) -> Result<TimerHandle, TimerError>;

    /// Cancel `handle` if it is still pending. Unknown, already fired or
    /// already cancelled handles are ignored.
    fn cancel(&mut self, handle: TimerHandle);
}

/// Timer backed by spawned tokio tasks.
///
/// When the delay elapses the task sends `wrap(handle)` on the owner's
/// event queue.
pub struct TokioTimer<E> {
    tx: mpsc::Sender<E>,
    wrap: fn(TimerHandle) -> E,
    next_id: u64,
    active: Option<(TimerHandle, CancellationToken)>,
}

impl<E: Send + 'static> TokioTimer<E> {
    pub fn new(tx: mpsc::Sender<E>, wrap: fn(TimerHandle) -> E) -> Self {
        Self {
            tx,
            wrap,
            next_id: 0,
            active: None,
        }
    }

    fn cancel_active(&mut self) {
        if let Some((handle, token)) = self.active.take() {
            trace!(timer = handle.id(), "Cancelling escalation timer");
            token.cancel();
        }
    }
}

impl<E: Send + 'static> EscalationTimer for TokioTimer<E> {
    fn schedule(&mut self, delay: Duration) -> Result<TimerHandle, TimerError> {
        self.cancel_active();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TimerError::SchedulingFailed(e.to_string()))?;
        if self.tx.is_closed() {
            return Err(TimerError::SchedulingFailed("event queue closed".into()));
        }

        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let tx = self.tx.clone();
        let event = (self.wrap)(handle);

        runtime.spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if tx.send(event).await.is_err() {
                        debug!(timer = handle.id(), "Event queue closed before timer fired");
                    }
                }
            }
        });

        self.active = Some((handle, token));
        Ok(handle)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if matches!(&self.active, Some((active, _)) if *active == handle) {
            self.cancel_active();
        }
    }
}

impl<E> Drop for TokioTimer<E> {
    fn drop(&mut self) {
        if let Some((_, token)) = self.active.take() {
            token.cancel();
        }
    }
}

/// Timer driven by an explicit clock instead of the runtime.
///
/// Used for replaying captures and for tests: the driver moves the clock
/// with [`advance_to`](Self::advance_to) and delivers whatever became due.
#[derive(Debug)]
pub struct ManualTimer {
    now: Instant,
    next_id: u64,
    pending: Option<(TimerHandle, Instant)>,
    fail_next: bool,
}

impl ManualTimer {
    pub fn new(now: Instant) -> Self {
        Self {
            now,
            next_id: 0,
            pending: None,
            fail_next: false,
        }
    }

    /// Move the clock forward and return the pending handle if its deadline
    /// has been reached. The returned handle is no longer pending.
    pub fn advance_to(&mut self, now: Instant) -> Option<TimerHandle> {
        self.now = self.now.max(now);
        match self.pending {
            Some((handle, deadline)) if deadline <= self.now => {
                self.pending = None;
                Some(handle)
            }
            _ => None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|(_, deadline)| deadline)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Make the next `schedule` call fail.
    pub fn fail_next_schedule(&mut self) {
        self.fail_next = true;
    }
}

impl EscalationTimer for ManualTimer {
    fn schedule(&mut self, delay: Duration) -> Result<TimerHandle, TimerError> {
        self.pending = None;
        if std::mem::take(&mut self.fail_next) {
            return Err(TimerError::SchedulingFailed("injected failure".into()));
        }
        let deadline = self.now.checked_add(delay).ok_or_else(|| {
            TimerError::SchedulingFailed(format!("delay {delay:?} out of range"))
        })?;
        self.next_id += 1;
        let handle = TimerHandle(self.next_id);
        self.pending = Some((handle, deadline));
        Ok(handle)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if matches!(self.pending, Some((pending, _)) if pending == handle) {
            self.pending = None;
        }
    }
}
