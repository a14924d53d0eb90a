//! High-resolution timer backend
//!
//! The expiry is a single instant in engine-clock nanoseconds, programmed
//! through either attribute encoding (64-bit scalar split across
//! `exp-scalar-l`/`exp-scalar-h`, or `exp-sec`/`exp-nsec`). Writing the
//! high/seconds half programs; the low half only stores.
//!
//! Firing policy:
//! - expiry at or before now → fire immediately, in the caller's context
//! - expiry in the future → a task sleeps until the instant
//! - expiry reached while disabled → latched, delivered on the next enable
//! - `period-ns != 0` → after each shot the expiry advances by whole
//!   periods until it is in the future again, so a stall collapses missed
//!   periods into one shot instead of a burst
//!
//! `slack-ns` is the tolerated gap between the programmed instant and the
//! timestamp recorded in the produced control; shots are stamped at the
//! actual fire instant, immediately after wakeup.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::{BackendState, TriggerInner};

/// Volatile state of an hrt backend
#[derive(Default)]
pub(super) struct HrtState {
    task: Option<JoinHandle<()>>,
    /// Expiry that elapsed while disabled, waiting for the next enable
    pending: Option<u64>,
}

impl HrtState {
    pub(super) fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.pending = None;
    }
}

/// Programs a new expiry, replacing any in-flight program or latched shot
pub(super) fn program(inner: &Arc<TriggerInner>, expiry_ns: u64) {
    {
        let mut state = inner.backend();
        let BackendState::Hrt(h) = &mut *state else {
            return;
        };
        h.abort();
    }
    let now = inner.clock().now_ns();
    if expiry_ns <= now {
        if inner.is_armed() {
            inner.emit(inner.clock().now());
            arm_next_period(inner, expiry_ns);
        } else {
            latch(inner, expiry_ns);
        }
    } else {
        spawn_wait(inner, expiry_ns);
    }
}

/// Delivers a shot latched while the trigger was disabled
pub(super) fn deliver_pending(inner: &Arc<TriggerInner>) {
    let latched = {
        let mut state = inner.backend();
        match &mut *state {
            BackendState::Hrt(h) => h.pending.take(),
            _ => None,
        }
    };
    if let Some(expiry_ns) = latched {
        inner.emit(inner.clock().now());
        arm_next_period(inner, expiry_ns);
    }
}

fn latch(inner: &TriggerInner, expiry_ns: u64) {
    let mut state = inner.backend();
    if let BackendState::Hrt(h) = &mut *state {
        h.pending = Some(expiry_ns);
        tracing::debug!(expiry_ns, "hrt expiry latched while disabled");
    }
}

/// Continues a periodic chain after a shot fired at `fired_expiry_ns`
fn arm_next_period(inner: &Arc<TriggerInner>, fired_expiry_ns: u64) {
    let period = u64::from(inner.attr_or_zero("period-ns"));
    if period == 0 {
        return;
    }
    spawn_wait(inner, forward(fired_expiry_ns, period, inner.clock().now_ns()));
}

/// Next expiry strictly after `now`, advancing from `expiry` in whole periods
fn forward(expiry_ns: u64, period_ns: u64, now_ns: u64) -> u64 {
    let mut next = expiry_ns + period_ns;
    if next <= now_ns {
        let missed = (now_ns - next) / period_ns + 1;
        next += missed * period_ns;
    }
    next
}

fn spawn_wait(inner: &Arc<TriggerInner>, expiry_ns: u64) {
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(run(task_inner, expiry_ns));
    let mut state = inner.backend();
    if let BackendState::Hrt(h) = &mut *state {
        if let Some(old) = h.task.replace(handle) {
            old.abort();
        }
    } else {
        handle.abort();
    }
}

async fn run(inner: Arc<TriggerInner>, mut expiry_ns: u64) {
    loop {
        tokio::time::sleep_until(inner.clock().instant_at(expiry_ns)).await;
        if !inner.is_armed() {
            latch(&inner, expiry_ns);
            return;
        }
        inner.emit(inner.clock().now());
        let period = u64::from(inner.attr_or_zero("period-ns"));
        if period == 0 {
            return;
        }
        expiry_ns = forward(expiry_ns, period, inner.clock().now_ns());
    }
}

#[cfg(test)]
mod tests {
    use super::forward;

    #[test]
    fn forward_advances_one_period() {
        assert_eq!(forward(1_000, 100, 1_050), 1_100);
    }

    #[test]
    fn forward_collapses_missed_periods() {
        // fired at 1_000 with period 100, but now is already 2_345:
        // the 13 missed expiries fold into the single next one
        assert_eq!(forward(1_000, 100, 2_345), 2_400);
    }

    #[test]
    fn forward_lands_strictly_after_now() {
        assert_eq!(forward(1_000, 100, 1_100), 1_200);
    }
}
