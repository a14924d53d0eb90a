//! FIFO block queue with bounded capacity

use std::collections::VecDeque;

use crate::buffer::BufferCfg;
use crate::control::Block;
use crate::error::{DaqError, DaqResult};

/// Bounded FIFO of captured blocks
///
/// Owned by exactly one channel and always accessed inside that channel's
/// critical section. The queue tracks payload bytes alongside block count so
/// both capacity policies are O(1) to enforce.
#[derive(Debug)]
pub struct BlockQueue {
    cfg: BufferCfg,
    blocks: VecDeque<Block>,
    payload_bytes: usize,
}

impl BlockQueue {
    pub fn new(cfg: BufferCfg) -> Self {
        Self {
            cfg,
            blocks: VecDeque::new(),
            payload_bytes: 0,
        }
    }

    /// Active capacity policy
    pub fn cfg(&self) -> BufferCfg {
        self.cfg
    }

    /// Queued block count
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Enqueues a block, rejecting it when the queue is at capacity.
    ///
    /// The rejected block is dropped, not stored; the caller records the
    /// loss in the channel alarm mask and carries on.
    pub fn push(&mut self, block: Block) -> DaqResult<()> {
        let fits = match self.cfg {
            BufferCfg::Kmalloc { max_len } => self.blocks.len() < max_len,
            BufferCfg::Vmalloc { max_kb } => {
                self.payload_bytes + block.payload_len() <= max_kb * 1024
            }
        };
        if !fits {
            return Err(DaqError::Overflow {
                seq: block.ctrl.seq,
            });
        }
        self.payload_bytes += block.payload_len();
        self.blocks.push_back(block);
        Ok(())
    }

    /// Dequeues the oldest block
    pub fn pop(&mut self) -> Option<Block> {
        let block = self.blocks.pop_front()?;
        self.payload_bytes -= block.payload_len();
        Some(block)
    }

    /// Discards every queued block, returning how many were dropped.
    ///
    /// Flushing touches neither the channel's current control nor its
    /// sequence counter.
    pub fn flush(&mut self) -> usize {
        let dropped = self.blocks.len();
        self.blocks.clear();
        self.payload_bytes = 0;
        dropped
    }

    /// Applies a new capacity limit.
    ///
    /// Count-bounded queues keep already-stored blocks even when occupancy
    /// exceeds the new limit; only future pushes see the new bound.
    /// Byte-bounded queues empty as part of every resize, in either
    /// direction. Switching policy is not a resize; swap in a fresh queue
    /// for that.
    pub fn resize(&mut self, cfg: BufferCfg) {
        if matches!(cfg, BufferCfg::Vmalloc { .. }) {
            let dropped = self.flush();
            if dropped > 0 {
                tracing::debug!(dropped, "byte-bounded resize emptied the queue");
            }
        }
        self.cfg = cfg;
    }
}

impl Default for BlockQueue {
    fn default() -> Self {
        Self::new(BufferCfg::default())
    }
}
