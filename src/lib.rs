//! daqflow — data-acquisition buffering and triggering engine
//!
//! This crate decides *when* a device channel captures a block of samples,
//! *where* captured blocks are queued, and *how* they are delivered to one
//! or more readers without loss accounting errors, duplicates or timing
//! drift.
//!
//! The moving parts:
//!
//! - a fixed [`Device`] → [`ChannelSet`] → [`Channel`] topology with
//!   downward-cascading enable state, built from a [`DeviceSpec`]
//! - a [`Trigger`] per channel set (user / timer / hrt backends,
//!   hot-swappable) whose firings stamp and produce [`Block`]s
//! - a bounded block queue per channel (kmalloc / vmalloc policies via
//!   [`BufferCfg`]) that drops-and-alarms on overflow instead of
//!   backpressuring the producer
//! - a [`ConsumerHandle`] per reader with level-triggered readiness,
//!   whole-record control reads, short-read data streaming and
//!   exactly-once dequeue across concurrent readers
//!
//! Timing sources run as Tokio tasks, so a [`Device`] must be created and
//! driven inside a Tokio runtime.
//!
//! # Example
//!
//! ```rust,no_run
//! use daqflow::{Device, DeviceSpec, OpenMode};
//! use std::time::Duration;
//!
//! # async fn example() -> daqflow::DaqResult<()> {
//! let device = DeviceSpec::builder("zero")
//!     .cset("input8", |c| c.channels = 4)
//!     .build()?;
//!
//! let cset = device.cset(0).expect("built above");
//! cset.set_current_trigger("timer")?;
//! let trigger = cset.trigger();
//! trigger.set_attr("ms-period", 100)?;
//! trigger.enable();
//!
//! let mut reader = cset.channel(0).expect("built above").open(OpenMode::Blocking);
//! if reader.is_ready(Duration::from_secs(1)).await {
//!     let (ctrl, data) = reader.read_block().await?;
//!     assert_eq!(data.len(), ctrl.data_len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod attrs;
pub mod buffer;
pub mod consumer;
pub mod control;
pub mod device;
mod error;
pub mod time;
pub mod trigger;

pub use buffer::BufferCfg;
pub use consumer::{ConsumerHandle, OpenMode};
pub use control::{AttrSnapshot, Block, Control, CTRL_RECORD_SIZE, NSAMPLES_MAX};
pub use device::{Channel, ChannelSet, CsetSpec, Device, DeviceSpec, ALARM_LOST_BLOCK};
pub use error::{DaqError, DaqResult};
pub use time::{DaqClock, TimeSpec};
pub use trigger::{Trigger, TRIGGER_BACKENDS};
