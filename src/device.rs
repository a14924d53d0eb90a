//! Device topology
//!
//! A [`Device`] is the root of a fixed tree: it owns channel sets, each
//! channel set owns channels plus exactly one trigger and one buffer-backend
//! choice. Channel sets and channels are fixed at construction from a
//! [`DeviceSpec`]; triggers and buffers hot-swap afterwards.
//!
//! Enable state cascades downward only. Disabling an ancestor clears every
//! descendant's own flag, and an `enable()` under a disabled ancestor is
//! accepted without effect — re-enabling a parent never resurrects its
//! children. Effective state is recomputed on every read as the AND of the
//! entity's own flag and its ancestors'.
//!
//! The per-channel critical section (one mutex around queue, sequence
//! counter, current control and in-progress delivery) is the only spot
//! where the firing side and the consumer side meet. Channels are fully
//! independent; nothing locks across two channels.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::attrs::{AttrDef, AttrStore};
use crate::buffer::{BlockQueue, BufferCfg};
use crate::consumer::{ConsumerHandle, OpenMode};
use crate::control::{Block, Control};
use crate::error::{DaqError, DaqResult};
use crate::time::{DaqClock, TimeSpec};
use crate::trigger::{FireSink, Shot, Trigger, TRIGGER_BACKENDS};

/// Channel alarm bit: a produced block was dropped on buffer overflow
pub const ALARM_LOST_BLOCK: u32 = 1 << 0;

// ---------------------------------------------------------------------------
// Specification
// ---------------------------------------------------------------------------

/// Topology description consumed by [`Device::new`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    pub csets: Vec<CsetSpec>,
}

/// One channel set in a [`DeviceSpec`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsetSpec {
    pub name: String,
    /// Number of ordinary channels
    #[serde(default = "defaults::channels")]
    pub channels: usize,
    /// Bytes per sample
    #[serde(default = "defaults::ssize")]
    pub ssize: u32,
    /// Whether a synthetic interleave channel exists alongside the
    /// ordinary ones
    #[serde(default)]
    pub interleave: bool,
    /// Initial trigger backend
    #[serde(default = "defaults::trigger")]
    pub trigger: String,
    /// Initial buffer backend
    #[serde(default = "defaults::buffer")]
    pub buffer: String,
}

mod defaults {
    pub fn channels() -> usize {
        1
    }
    pub fn ssize() -> u32 {
        1
    }
    pub fn trigger() -> String {
        "user".to_string()
    }
    pub fn buffer() -> String {
        "kmalloc".to_string()
    }
}

impl DeviceSpec {
    /// Starts a fluent builder for a device named `name`
    pub fn builder(name: impl Into<String>) -> DeviceSpecBuilder {
        DeviceSpecBuilder {
            spec: DeviceSpec {
                name: name.into(),
                csets: Vec::new(),
            },
        }
    }

    /// Loads a topology from its JSON form
    pub fn from_json(json: &str) -> DaqResult<Self> {
        serde_json::from_str(json).map_err(|e| DaqError::InvalidSpec {
            reason: e.to_string(),
        })
    }
}

/// Fluent builder for [`DeviceSpec`]
pub struct DeviceSpecBuilder {
    spec: DeviceSpec,
}

impl DeviceSpecBuilder {
    /// Adds a channel set; the closure adjusts it from the defaults
    /// (1 channel, 1-byte samples, user trigger, kmalloc buffer).
    pub fn cset(mut self, name: impl Into<String>, configure: impl FnOnce(&mut CsetSpec)) -> Self {
        let mut cs = CsetSpec {
            name: name.into(),
            channels: defaults::channels(),
            ssize: defaults::ssize(),
            interleave: false,
            trigger: defaults::trigger(),
            buffer: defaults::buffer(),
        };
        configure(&mut cs);
        self.spec.csets.push(cs);
        self
    }

    pub fn into_spec(self) -> DeviceSpec {
        self.spec
    }

    /// Validates the spec and builds the device
    pub fn build(self) -> DaqResult<Device> {
        Device::new(self.spec)
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

struct DeviceInner {
    name: String,
    clock: DaqClock,
    enabled: AtomicBool,
    attrs: AttrStore,
    csets: Vec<Arc<CsetInner>>,
}

pub(crate) struct CsetInner {
    name: String,
    clock: DaqClock,
    device: Weak<DeviceInner>,
    enabled: AtomicBool,
    channels: Vec<Arc<ChanInner>>,
    interleave: Option<Arc<ChanInner>>,
    trigger: Mutex<Trigger>,
}

pub(crate) struct ChanInner {
    name: String,
    ssize: u32,
    /// Samples per shot multiplier: `n_chan` on the interleave channel, 1
    /// on ordinary channels
    sample_factor: u32,
    is_interleave: bool,
    cset: Weak<CsetInner>,
    enabled: AtomicBool,
    alarms: AtomicU32,
    attrs: AttrStore,
    state: Mutex<ChanState>,
    readers: Notify,
}

pub(crate) struct ChanState {
    pub(crate) queue: BlockQueue,
    pub(crate) seq: u32,
    pub(crate) current_ctrl: Option<Control>,
}

impl CsetInner {
    fn effective_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
            && self
                .device
                .upgrade()
                .is_some_and(|d| d.enabled.load(Ordering::SeqCst))
    }

    fn interleave_active(&self) -> bool {
        self.interleave
            .as_ref()
            .is_some_and(|i| i.enabled.load(Ordering::SeqCst))
    }

    /// Every channel, synthetic one included
    fn all_channels(&self) -> impl Iterator<Item = &Arc<ChanInner>> {
        self.channels.iter().chain(self.interleave.iter())
    }

    /// Clears every channel's own enable flag (ancestor went down)
    fn force_disable_channels(&self) {
        for ch in self.all_channels() {
            ch.enabled.store(false, Ordering::SeqCst);
        }
    }
}

impl FireSink for CsetInner {
    fn fire(&self, stamp: TimeSpec, shot: &Shot) {
        if !self.effective_enabled() {
            return;
        }
        if self.interleave_active() {
            if let Some(chan) = &self.interleave {
                chan.capture(stamp, shot);
            }
        } else {
            for chan in &self.channels {
                if chan.enabled.load(Ordering::SeqCst) {
                    chan.capture(stamp, shot);
                }
            }
        }
    }
}

impl ChanInner {
    fn new(
        name: String,
        ssize: u32,
        sample_factor: u32,
        is_interleave: bool,
        cset: Weak<CsetInner>,
        buffer: BufferCfg,
        enabled: bool,
    ) -> Self {
        Self {
            name,
            ssize,
            sample_factor,
            is_interleave,
            cset,
            enabled: AtomicBool::new(enabled),
            alarms: AtomicU32::new(0),
            attrs: AttrStore::new(
                "channel",
                &[
                    AttrDef::rw("gain-factor", 1).slot(1),
                    AttrDef::rw("offset", 0).slot(2),
                    AttrDef::ro("resolution-bits", ssize * 8).slot(3),
                    AttrDef::rw("vref-src", 0).slot(4),
                ],
            ),
            state: Mutex::new(ChanState {
                queue: BlockQueue::new(buffer),
                seq: 0,
                current_ctrl: None,
            }),
            readers: Notify::new(),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, ChanState> {
        self.state.lock().expect("channel state poisoned")
    }

    fn is_effectively_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
            && self.cset.upgrade().is_some_and(|c| c.effective_enabled())
    }

    fn try_enable(&self) -> bool {
        let Some(cset) = self.cset.upgrade() else {
            return false;
        };
        if !cset.effective_enabled() {
            // accepted, no effect: the disabled ancestor wins
            return false;
        }
        if self.is_interleave {
            // interleave and ordinary channels are mutually exclusive
            for ch in &cset.channels {
                ch.enabled.store(false, Ordering::SeqCst);
            }
            self.enabled.store(true, Ordering::SeqCst);
            true
        } else {
            if cset.interleave_active() {
                return false;
            }
            self.enabled.store(true, Ordering::SeqCst);
            true
        }
    }

    /// Produces one block for this channel. Always advances the sequence
    /// counter and overwrites the current control, even when the queue
    /// rejects the block.
    fn capture(&self, stamp: TimeSpec, shot: &Shot) {
        let nsamples = shot.nsamples.saturating_mul(self.sample_factor);
        let attr_channel = self.attrs.snapshot(true);
        let mut st = self.state();
        let seq = st.seq;
        st.seq = st.seq.wrapping_add(1);
        let ctrl = Control {
            seq,
            nsamples,
            ssize: self.ssize,
            stamp,
            attr_trigger: shot.attrs,
            attr_channel,
        };
        st.current_ctrl = Some(ctrl.clone());
        let data = fill_pattern(seq, ctrl.data_len());
        match st.queue.push(Block { ctrl, data }) {
            Ok(()) => {
                drop(st);
                self.readers.notify_waiters();
            }
            Err(_) => {
                drop(st);
                self.alarms.fetch_or(ALARM_LOST_BLOCK, Ordering::SeqCst);
                tracing::warn!(channel = %self.name, seq, "block dropped on overflow");
            }
        }
    }

    pub(crate) fn has_block(&self) -> bool {
        !self.state().queue.is_empty()
    }

    /// Suspends until at least one block is queued
    pub(crate) async fn wait_ready(&self) {
        loop {
            let notified = self.readers.notified();
            tokio::pin!(notified);
            // register interest before checking, so a push between the
            // check and the await cannot be missed
            notified.as_mut().enable();
            if self.has_block() {
                return;
            }
            notified.await;
        }
    }

    /// Atomic dequeue: the one point where consumer handles take blocks,
    /// inside the channel critical section. Concurrent readers therefore
    /// get each block exactly once.
    pub(crate) fn pop_block(&self) -> Option<Block> {
        self.state().queue.pop()
    }
}

/// Deterministic ramp standing in for sampling electronics
fn fill_pattern(seq: u32, len: usize) -> Vec<u8> {
    (0..len).map(|i| (seq as usize).wrapping_add(i) as u8).collect()
}

// ---------------------------------------------------------------------------
// Public handles
// ---------------------------------------------------------------------------

/// Root handle of one acquisition device
///
/// Dropping the device tears it down: triggers disabled, buffers flushed.
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Validates `spec` and builds the topology. Must be called within a
    /// Tokio runtime; the engine clock epoch is fixed here.
    pub fn new(spec: DeviceSpec) -> DaqResult<Self> {
        for cs in &spec.csets {
            if cs.channels == 0 {
                return Err(DaqError::InvalidSpec {
                    reason: format!("channel set '{}' has no channels", cs.name),
                });
            }
            if cs.ssize == 0 {
                return Err(DaqError::InvalidSpec {
                    reason: format!("channel set '{}' has zero sample size", cs.name),
                });
            }
            if !TRIGGER_BACKENDS.contains(&cs.trigger.as_str()) {
                return Err(DaqError::UnknownBackend {
                    kind: "trigger",
                    name: cs.trigger.clone(),
                });
            }
            // also resolves the buffer backend name
            BufferCfg::from_name(&cs.buffer)?;
        }

        let clock = DaqClock::new();
        let device_clock = clock.clone();
        let inner = Arc::new_cyclic(|weak_dev: &Weak<DeviceInner>| DeviceInner {
            name: spec.name.clone(),
            clock: device_clock,
            enabled: AtomicBool::new(true),
            attrs: AttrStore::new("device", &[AttrDef::ro("version", 1)]),
            csets: spec
                .csets
                .iter()
                .map(|cs| build_cset(cs, weak_dev.clone(), clock.clone()))
                .collect(),
        });
        tracing::debug!(device = %inner.name, csets = inner.csets.len(), "device built");
        Ok(Self { inner })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current engine time; the epoch is this device's construction
    pub fn now(&self) -> TimeSpec {
        self.inner.clock.now()
    }

    /// Nanoseconds since the engine epoch
    pub fn now_ns(&self) -> u64 {
        self.inner.clock.now_ns()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Enables the device itself; children stay as they are
    pub fn enable(&self) -> bool {
        self.inner.enabled.store(true, Ordering::SeqCst);
        true
    }

    /// Disables the device and forces every descendant's own flag down
    pub fn disable(&self) -> bool {
        self.inner.enabled.store(false, Ordering::SeqCst);
        for cset in &self.inner.csets {
            cset.enabled.store(false, Ordering::SeqCst);
            cset.force_disable_channels();
        }
        false
    }

    pub fn n_csets(&self) -> usize {
        self.inner.csets.len()
    }

    pub fn cset(&self, index: usize) -> Option<ChannelSet> {
        self.inner.csets.get(index).map(|inner| ChannelSet {
            inner: Arc::clone(inner),
        })
    }

    pub fn get_attr(&self, name: &str) -> DaqResult<u32> {
        self.inner.attrs.get(name)
    }

    pub fn set_attr(&self, name: &str, value: u32) -> DaqResult<()> {
        self.inner.attrs.set(name, value)
    }

    /// Disables every trigger and flushes every buffer. Idempotent; also
    /// runs on drop.
    pub fn teardown(&self) {
        for cset in &self.inner.csets {
            {
                let trigger = cset.trigger.lock().expect("trigger slot poisoned");
                trigger.disable();
                trigger.shutdown();
            }
            for chan in cset.all_channels() {
                chan.state().queue.flush();
            }
        }
        tracing::debug!(device = %self.inner.name, "device torn down");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Handle to one channel set
#[derive(Clone)]
pub struct ChannelSet {
    inner: Arc<CsetInner>,
}

impl ChannelSet {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.effective_enabled()
    }

    /// Enables the set; a no-op while the device is disabled
    pub fn enable(&self) -> bool {
        let device_up = self
            .inner
            .device
            .upgrade()
            .is_some_and(|d| d.enabled.load(Ordering::SeqCst));
        if !device_up {
            return false;
        }
        self.inner.enabled.store(true, Ordering::SeqCst);
        true
    }

    /// Disables the set and forces its channels' own flags down
    pub fn disable(&self) -> bool {
        self.inner.enabled.store(false, Ordering::SeqCst);
        self.inner.force_disable_channels();
        false
    }

    pub fn is_interleaved(&self) -> bool {
        self.inner.interleave.is_some()
    }

    pub fn n_channels(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<Channel> {
        self.inner.channels.get(index).map(|inner| Channel {
            inner: Arc::clone(inner),
        })
    }

    /// The synthetic interleave channel, when the set was built with one
    pub fn interleave(&self) -> Option<Channel> {
        self.inner.interleave.as_ref().map(|inner| Channel {
            inner: Arc::clone(inner),
        })
    }

    /// Handle to the currently installed trigger instance
    pub fn trigger(&self) -> Trigger {
        self.inner
            .trigger
            .lock()
            .expect("trigger slot poisoned")
            .clone()
    }

    /// Name of the currently installed trigger backend
    pub fn current_trigger(&self) -> &'static str {
        self.trigger().kind()
    }

    /// Replaces the trigger with a fresh instance of the named backend.
    ///
    /// The old instance's timing task stops and its volatile state is gone;
    /// the new instance starts disabled at default attribute values.
    pub fn set_current_trigger(&self, name: &str) -> DaqResult<()> {
        let weak: Weak<CsetInner> = Arc::downgrade(&self.inner);
        let sink: Weak<dyn FireSink> = weak;
        let fresh = Trigger::new(name, self.inner.clock.clone(), sink)?;
        let mut slot = self.inner.trigger.lock().expect("trigger slot poisoned");
        slot.shutdown();
        *slot = fresh;
        tracing::debug!(cset = %self.inner.name, backend = name, "trigger swapped");
        Ok(())
    }

    /// Name of the buffer backend currently backing the set's channels
    pub fn current_buffer(&self) -> &'static str {
        // all channels share one backend choice; read it off the first
        self.inner
            .all_channels()
            .next()
            .map(|ch| ch.state().queue.cfg().name())
            .unwrap_or("kmalloc")
    }

    /// Swaps every channel's queue for a fresh one of the named backend at
    /// its default capacity. Queued blocks become unreachable.
    pub fn set_current_buffer(&self, name: &str) -> DaqResult<()> {
        let cfg = BufferCfg::from_name(name)?;
        for chan in self.inner.all_channels() {
            chan.state().queue = BlockQueue::new(cfg);
        }
        tracing::debug!(cset = %self.inner.name, backend = name, "buffer swapped");
        Ok(())
    }
}

/// Handle to one channel
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChanInner>,
}

impl Channel {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_interleave(&self) -> bool {
        self.inner.is_interleave
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_effectively_enabled()
    }

    /// Enables the channel. Accepted but without effect under a disabled
    /// ancestor; rejected while the opposite interleave side is active.
    pub fn enable(&self) -> bool {
        self.inner.try_enable()
    }

    pub fn disable(&self) -> bool {
        self.inner.enabled.store(false, Ordering::SeqCst);
        false
    }

    /// Reads a channel attribute; `alarms` reads the live alarm mask
    pub fn get_attr(&self, name: &str) -> DaqResult<u32> {
        if name == "alarms" {
            return Ok(self.inner.alarms.load(Ordering::SeqCst));
        }
        self.inner.attrs.get(name)
    }

    /// Writes a channel attribute. Writing `alarms` clears the bits set in
    /// the written value (write-1-to-clear).
    pub fn set_attr(&self, name: &str, value: u32) -> DaqResult<()> {
        if name == "alarms" {
            self.inner.alarms.fetch_and(!value, Ordering::SeqCst);
            return Ok(());
        }
        self.inner.attrs.set(name, value)
    }

    /// Live alarm bitmask
    pub fn alarms(&self) -> u32 {
        self.inner.alarms.load(Ordering::SeqCst)
    }

    /// Control of the most recently produced block, overflowed or not
    pub fn current_ctrl(&self) -> Option<Control> {
        self.inner.state().current_ctrl.clone()
    }

    /// Discards all queued blocks; sequence numbering and the current
    /// control are untouched
    pub fn flush(&self) -> usize {
        self.inner.state().queue.flush()
    }

    /// Number of queued blocks
    pub fn buffer_len(&self) -> usize {
        self.inner.state().queue.len()
    }

    /// Name of this channel's buffer backend
    pub fn current_buffer(&self) -> &'static str {
        self.inner.state().queue.cfg().name()
    }

    /// Reads a buffer attribute (`max-buffer-len` / `max-buffer-kb`,
    /// depending on the installed backend)
    pub fn get_buffer_attr(&self, name: &str) -> DaqResult<u32> {
        let st = self.inner.state();
        match (st.queue.cfg(), name) {
            (BufferCfg::Kmalloc { max_len }, "max-buffer-len") => Ok(max_len as u32),
            (BufferCfg::Vmalloc { max_kb }, "max-buffer-kb") => Ok(max_kb as u32),
            _ => Err(DaqError::UnknownAttr {
                owner: "buffer".to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Writes a buffer attribute, resizing with the backend's retention
    /// policy: kmalloc keeps queued blocks, vmalloc flushes.
    pub fn set_buffer_attr(&self, name: &str, value: u32) -> DaqResult<()> {
        let mut st = self.inner.state();
        match (st.queue.cfg(), name) {
            (BufferCfg::Kmalloc { .. }, "max-buffer-len") => {
                st.queue.resize(BufferCfg::Kmalloc {
                    max_len: value as usize,
                });
                Ok(())
            }
            (BufferCfg::Vmalloc { .. }, "max-buffer-kb") => {
                st.queue.resize(BufferCfg::Vmalloc {
                    max_kb: value as usize,
                });
                Ok(())
            }
            _ => Err(DaqError::UnknownAttr {
                owner: "buffer".to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Opens a consumer handle on this channel's buffer
    pub fn open(&self, mode: OpenMode) -> ConsumerHandle {
        ConsumerHandle::new(Arc::clone(&self.inner), mode)
    }
}

fn build_cset(spec: &CsetSpec, device: Weak<DeviceInner>, clock: DaqClock) -> Arc<CsetInner> {
    // backend names were validated in Device::new
    let buffer = BufferCfg::from_name(&spec.buffer).expect("buffer backend validated");
    Arc::new_cyclic(|weak: &Weak<CsetInner>| {
        let channels = (0..spec.channels)
            .map(|i| {
                Arc::new(ChanInner::new(
                    format!("{}/chan{}", spec.name, i),
                    spec.ssize,
                    1,
                    false,
                    weak.clone(),
                    buffer,
                    true,
                ))
            })
            .collect();
        let interleave = spec.interleave.then(|| {
            Arc::new(ChanInner::new(
                format!("{}/chani", spec.name),
                spec.ssize,
                spec.channels as u32,
                true,
                weak.clone(),
                buffer,
                false,
            ))
        });
        let sink: Weak<dyn FireSink> = weak.clone();
        let trigger = Trigger::new(&spec.trigger, clock.clone(), sink)
            .expect("trigger backend validated");
        CsetInner {
            name: spec.name.clone(),
            clock,
            device,
            enabled: AtomicBool::new(true),
            channels,
            interleave,
            trigger: Mutex::new(trigger),
        }
    })
}
