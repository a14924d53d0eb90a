//! Trigger engine
//!
//! A trigger decides *when* its channel set captures a block. The state
//! machine is two-state — `Disabled ⇄ Armed` — and firing is an internal
//! event that only happens while armed. Three backends exist, hot-swapped
//! by name:
//!
//! - **user** — fires only on an explicit [`Trigger::fire`] command
//! - **timer** — fires every `ms-period` milliseconds; `ms-phase` shifts
//!   the schedule once to align firings within the second
//! - **hrt** — fires at a programmed engine-clock instant, optionally
//!   repeating every `period-ns`; expiries that elapse while disabled are
//!   latched and delivered on the next enable
//!
//! Each armed backend drives its own timing task; consumers never
//! participate in firing. A firing that meets a full buffer drops the block
//! and moves on — producers do not backpressure.

mod hrt;
mod timer;
mod user;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::attrs::{AttrDef, AttrStore};
use crate::control::{AttrSnapshot, NSAMPLES_MAX};
use crate::error::{DaqError, DaqResult};
use crate::time::{DaqClock, TimeSpec};

/// Backend names accepted by a trigger hot-swap
pub const TRIGGER_BACKENDS: &[&str] = &["user", "timer", "hrt"];

/// One shot's worth of capture parameters, handed to the channel set
#[derive(Debug, Clone)]
pub(crate) struct Shot {
    /// `min(pre + post, NSAMPLES_MAX)`
    pub nsamples: u32,
    /// Trigger attribute snapshot taken at fire time
    pub attrs: AttrSnapshot,
}

/// Receiver of trigger firings; implemented by the owning channel set
pub(crate) trait FireSink: Send + Sync {
    fn fire(&self, stamp: TimeSpec, shot: &Shot);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriggerKind {
    User,
    Timer,
    Hrt,
}

impl TriggerKind {
    fn name(self) -> &'static str {
        match self {
            TriggerKind::User => "user",
            TriggerKind::Timer => "timer",
            TriggerKind::Hrt => "hrt",
        }
    }
}

/// Backend-specific volatile state, guarded by one mutex
enum BackendState {
    User,
    Timer(timer::TimerState),
    Hrt(hrt::HrtState),
}

/// Handle to one trigger instance
///
/// Clones share the same instance. Swapping a channel set's trigger
/// replaces the instance; stale handles keep working but are detached from
/// the channel set's current choice.
#[derive(Clone)]
pub struct Trigger {
    inner: Arc<TriggerInner>,
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

struct TriggerInner {
    kind: TriggerKind,
    armed: AtomicBool,
    attrs: AttrStore,
    clock: DaqClock,
    sink: Weak<dyn FireSink>,
    backend: Mutex<BackendState>,
}

/// Attributes shared by every backend
static COMMON_ATTRS: [AttrDef; 2] = [
    AttrDef::rw("post-samples", 1).slot(1),
    AttrDef::rw("pre-samples", 0).slot(2),
];

static TIMER_ATTRS: [AttrDef; 2] = [
    AttrDef::rw("ms-period", 0).slot(3),
    AttrDef::rw("ms-phase", 0).slot(4),
];

static HRT_ATTRS: [AttrDef; 6] = [
    AttrDef::rw("period-ns", 0).slot(3),
    AttrDef::rw("slack-ns", 0).slot(4),
    AttrDef::rw("exp-scalar-l", 0),
    AttrDef::rw("exp-scalar-h", 0),
    AttrDef::rw("exp-sec", 0),
    AttrDef::rw("exp-nsec", 0),
];

impl Trigger {
    /// Creates a backend by name, disabled and at default attribute values
    pub(crate) fn new(
        name: &str,
        clock: DaqClock,
        sink: Weak<dyn FireSink>,
    ) -> DaqResult<Self> {
        let (kind, extra): (TriggerKind, &'static [AttrDef]) = match name {
            "user" => (TriggerKind::User, &[]),
            "timer" => (TriggerKind::Timer, &TIMER_ATTRS),
            "hrt" => (TriggerKind::Hrt, &HRT_ATTRS),
            other => {
                return Err(DaqError::UnknownBackend {
                    kind: "trigger",
                    name: other.to_string(),
                })
            }
        };
        let mut defs = COMMON_ATTRS.to_vec();
        defs.extend_from_slice(extra);
        let backend = match kind {
            TriggerKind::User => BackendState::User,
            TriggerKind::Timer => BackendState::Timer(timer::TimerState::default()),
            TriggerKind::Hrt => BackendState::Hrt(hrt::HrtState::default()),
        };
        Ok(Self {
            inner: Arc::new(TriggerInner {
                kind,
                armed: AtomicBool::new(false),
                attrs: AttrStore::new("trigger", &defs),
                clock,
                sink,
                backend: Mutex::new(backend),
            }),
        })
    }

    /// Backend name
    pub fn kind(&self) -> &'static str {
        self.inner.kind.name()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_armed()
    }

    /// Arms the trigger and returns the new state.
    ///
    /// An hrt backend delivers a latched expiry immediately; a timer
    /// backend starts its periodic task.
    pub fn enable(&self) -> bool {
        if !self.inner.armed.swap(true, Ordering::SeqCst) {
            tracing::debug!(backend = self.kind(), "trigger armed");
            match self.inner.kind {
                TriggerKind::Timer => timer::start(&self.inner),
                TriggerKind::Hrt => hrt::deliver_pending(&self.inner),
                TriggerKind::User => {}
            }
        }
        true
    }

    /// Disarms the trigger and returns the new state.
    ///
    /// Further firings stop promptly; a capture already inside a channel's
    /// critical section completes. An hrt expiry elapsing after this call
    /// is latched for the next enable.
    pub fn disable(&self) -> bool {
        if self.inner.armed.swap(false, Ordering::SeqCst) {
            tracing::debug!(backend = self.kind(), "trigger disarmed");
            if self.inner.kind == TriggerKind::Timer {
                timer::stop(&self.inner);
            }
        }
        false
    }

    /// Manual fire command.
    ///
    /// Only the user backend accepts it; the result tells whether a shot
    /// was produced (`false` while disabled).
    pub fn fire(&self) -> DaqResult<bool> {
        user::fire(&self.inner)
    }

    /// Reads a trigger attribute
    pub fn get_attr(&self, name: &str) -> DaqResult<u32> {
        self.inner.attrs.get(name)
    }

    /// Writes a trigger attribute and applies its side effect.
    ///
    /// Writing `exp-scalar-h` or `exp-sec` programs the hrt expiry from the
    /// previously stored low half; writing `ms-phase` queues a one-shot
    /// schedule shift on the timer backend.
    pub fn set_attr(&self, name: &str, value: u32) -> DaqResult<()> {
        self.inner.attrs.set(name, value)?;
        match (self.inner.kind, name) {
            (TriggerKind::Hrt, "exp-scalar-h") => {
                let low = self.inner.attrs.get("exp-scalar-l")?;
                let expiry = (u64::from(value) << 32) | u64::from(low);
                hrt::program(&self.inner, expiry);
            }
            (TriggerKind::Hrt, "exp-sec") => {
                let nsec = self.inner.attrs.get("exp-nsec")?;
                let expiry = u64::from(value) * crate::time::NSEC_PER_SEC + u64::from(nsec);
                hrt::program(&self.inner, expiry);
            }
            (TriggerKind::Timer, "ms-phase") => timer::set_phase(&self.inner, value),
            _ => {}
        }
        Ok(())
    }

    /// True if the backend defines the attribute
    pub fn has_attr(&self, name: &str) -> bool {
        self.inner.attrs.contains(name)
    }

    /// Stops the timing task and drops any latched expiry. Used when the
    /// instance is swapped out or the device is torn down.
    pub(crate) fn shutdown(&self) {
        self.inner.armed.store(false, Ordering::SeqCst);
        self.inner.abort_tasks();
    }
}

impl TriggerInner {
    fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    fn clock(&self) -> &DaqClock {
        &self.clock
    }

    fn attr_or_zero(&self, name: &str) -> u32 {
        self.attrs.get(name).unwrap_or(0)
    }

    fn backend(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.backend.lock().expect("trigger backend state poisoned")
    }

    /// Produces one shot on the owning channel set
    fn emit(&self, stamp: TimeSpec) {
        let Some(sink) = self.sink.upgrade() else {
            return;
        };
        let pre = self.attr_or_zero("pre-samples");
        let post = self.attr_or_zero("post-samples");
        let shot = Shot {
            nsamples: pre.saturating_add(post).min(NSAMPLES_MAX),
            attrs: self.attrs.snapshot(self.is_armed()),
        };
        tracing::trace!(
            backend = self.kind.name(),
            secs = stamp.secs,
            ticks = stamp.ticks,
            nsamples = shot.nsamples,
            "trigger fired"
        );
        sink.fire(stamp, &shot);
    }

    fn abort_tasks(&self) {
        let mut state = self.backend();
        match &mut *state {
            BackendState::User => {}
            BackendState::Timer(t) => t.abort(),
            BackendState::Hrt(h) => h.abort(),
        }
    }
}

impl Drop for TriggerInner {
    fn drop(&mut self) {
        if let Ok(state) = self.backend.get_mut() {
            match state {
                BackendState::User => {}
                BackendState::Timer(t) => t.abort(),
                BackendState::Hrt(h) => h.abort(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_name() {
        let clock = DaqClock::new();
        let err = Trigger::new("gpio", clock, Weak::<NullSink>::new()).unwrap_err();
        assert!(matches!(
            err,
            DaqError::UnknownBackend { kind: "trigger", .. }
        ));
    }

    #[test]
    fn backend_attribute_tables() {
        let clock = DaqClock::new();
        let user = Trigger::new("user", clock.clone(), Weak::<NullSink>::new()).unwrap();
        assert!(user.has_attr("post-samples"));
        assert!(!user.has_attr("ms-period"));

        let timer = Trigger::new("timer", clock.clone(), Weak::<NullSink>::new()).unwrap();
        assert!(timer.has_attr("ms-period"));
        assert!(timer.has_attr("ms-phase"));
        assert!(!timer.has_attr("slack-ns"));

        let hrt = Trigger::new("hrt", clock, Weak::<NullSink>::new()).unwrap();
        assert!(hrt.has_attr("slack-ns"));
        assert!(hrt.has_attr("exp-scalar-l"));
        assert!(matches!(
            hrt.set_attr("ms-period", 10).unwrap_err(),
            DaqError::UnknownAttr { .. }
        ));
    }

    #[test]
    fn fire_rejected_on_timed_backends() {
        let clock = DaqClock::new();
        let timer = Trigger::new("timer", clock, Weak::<NullSink>::new()).unwrap();
        assert!(matches!(
            timer.fire().unwrap_err(),
            DaqError::FireNotSupported { backend: "timer" }
        ));
    }

    #[test]
    fn user_fire_while_disabled_is_a_no_op() {
        let clock = DaqClock::new();
        let user = Trigger::new("user", clock, Weak::<NullSink>::new()).unwrap();
        assert!(!user.fire().unwrap());
        user.enable();
        // sink is gone, but the command itself is accepted while armed
        assert!(user.fire().unwrap());
    }

    struct NullSink;
    impl FireSink for NullSink {
        fn fire(&self, _stamp: TimeSpec, _shot: &Shot) {}
    }
}
