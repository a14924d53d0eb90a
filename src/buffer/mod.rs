//! Bounded block queues
//!
//! Each channel owns one [`BlockQueue`], a FIFO of captured blocks with one
//! of two capacity policies selected by [`BufferCfg`]:
//!
//! - **kmalloc** — bounded by block count (`max-buffer-len`)
//! - **vmalloc** — bounded by payload bytes (`max-buffer-kb`)
//!
//! A push beyond capacity rejects the incoming block; the queue never evicts
//! to make room and the producer never blocks. Resize semantics differ per
//! policy: a count-bounded queue keeps everything already stored even when
//! the new limit is below the current occupancy, while a byte-bounded queue
//! always empties as part of the resize.
//!
//! The queue itself is not synchronized; the owning channel serializes all
//! access through its own critical section.

mod cfg;
mod queue;

pub use cfg::BufferCfg;
pub use queue::BlockQueue;
