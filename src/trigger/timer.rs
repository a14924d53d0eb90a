//! Periodic millisecond timer backend
//!
//! While armed, a background task fires once per `ms-period` milliseconds.
//! Scheduling is absolute (next expiry = previous expiry + period) so
//! wakeup jitter does not accumulate across shots.
//!
//! `ms-phase` is a one-shot shift: the next expiry moves by the written
//! number of milliseconds and the schedule stays re-anchored there. Writing
//! `1000 - ticks_ms(last shot)` with a one-second period is the idiom for
//! pulling firings onto wall-clock second boundaries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{BackendState, TriggerInner};

/// Poll interval while armed with `ms-period = 0`
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Volatile state of a timer backend
#[derive(Default)]
pub(super) struct TimerState {
    task: Option<JoinHandle<()>>,
    /// Pending one-shot schedule shift in milliseconds
    pending_phase_ms: u32,
}

impl TimerState {
    pub(super) fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Starts the periodic task; no-op if one is already running
pub(super) fn start(inner: &Arc<TriggerInner>) {
    let mut state = inner.backend();
    let BackendState::Timer(t) = &mut *state else {
        return;
    };
    if t.task.as_ref().is_some_and(|h| !h.is_finished()) {
        return;
    }
    let task_inner = Arc::clone(inner);
    t.task = Some(tokio::spawn(run(task_inner)));
}

/// Aborts the periodic task
pub(super) fn stop(inner: &Arc<TriggerInner>) {
    let mut state = inner.backend();
    if let BackendState::Timer(t) = &mut *state {
        t.abort();
    }
}

/// Queues a one-shot schedule shift, replacing any unconsumed one
pub(super) fn set_phase(inner: &Arc<TriggerInner>, phase_ms: u32) {
    let mut state = inner.backend();
    if let BackendState::Timer(t) = &mut *state {
        t.pending_phase_ms = phase_ms;
    }
}

fn take_phase(inner: &TriggerInner) -> Duration {
    let mut state = inner.backend();
    if let BackendState::Timer(t) = &mut *state {
        Duration::from_millis(u64::from(std::mem::take(&mut t.pending_phase_ms)))
    } else {
        Duration::ZERO
    }
}

async fn run(inner: Arc<TriggerInner>) {
    // anchor of the absolute schedule; dropped while the period is zero
    let mut next: Option<Instant> = None;
    loop {
        if !inner.is_armed() {
            return;
        }
        let period_ms = inner.attr_or_zero("ms-period");
        if period_ms == 0 {
            next = None;
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        }
        let period = Duration::from_millis(u64::from(period_ms));
        let shift = take_phase(&inner);
        let at = match next {
            Some(anchor) => anchor + shift,
            None => Instant::now() + period + shift,
        };
        tokio::time::sleep_until(at).await;
        if !inner.is_armed() {
            return;
        }
        inner.emit(inner.clock().now());
        next = Some(at + period);
    }
}
