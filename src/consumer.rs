//! Consumer interface
//!
//! A [`ConsumerHandle`] reads blocks out of one channel's buffer through
//! two logical streams: the control stream (fixed-size records, delivered
//! whole or not at all) and the data stream (raw payload bytes, short reads
//! legal).
//!
//! Dequeuing is the only shared step — it happens inside the channel's
//! critical section, so with any number of concurrent readers each block is
//! taken by exactly one of them, and readers racing for an empty buffer see
//! would-block or a timeout, never a duplicate. Once dequeued, a block
//! belongs to the handle that took it; delivery of its control and data
//! then progresses independently. Reading a block's control and then the
//! next control releases the block even if its data was never touched, and
//! fully reading a block's data releases it even if its control was never
//! read.

use std::sync::Arc;
use std::time::Duration;

use crate::control::{Block, Control, CTRL_RECORD_SIZE};
use crate::device::ChanInner;
use crate::error::{DaqError, DaqResult};

/// Blocking behavior of a consumer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads suspend until a block is available
    Blocking,
    /// Reads on an empty buffer fail with [`DaqError::WouldBlock`]
    NonBlocking,
}

/// Delivery progress of the block this handle dequeued last
struct InProgress {
    block: Block,
    ctrl_read: bool,
    data_off: usize,
}

impl InProgress {
    fn new(block: Block) -> Self {
        Self {
            block,
            ctrl_read: false,
            data_off: 0,
        }
    }
}

/// Reader handle on one channel's buffer
pub struct ConsumerHandle {
    chan: Arc<ChanInner>,
    mode: OpenMode,
    current: Option<InProgress>,
}

impl ConsumerHandle {
    pub(crate) fn new(chan: Arc<ChanInner>, mode: OpenMode) -> Self {
        Self {
            chan,
            mode,
            current: None,
        }
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Level-triggered readiness: resolves `true` as soon as at least one
    /// block is queued, `false` once `timeout` elapses first.
    pub async fn is_ready(&self, timeout: Duration) -> bool {
        if self.chan.has_block() {
            return true;
        }
        tokio::time::timeout(timeout, self.chan.wait_ready())
            .await
            .is_ok()
    }

    /// Dequeues and returns the next control record.
    ///
    /// A repeated control read advances to the next block; the previous
    /// block is released whether or not its data was consumed.
    pub async fn read_ctrl(&mut self) -> DaqResult<Control> {
        loop {
            if let Some(ctrl) = self.take_ctrl() {
                return Ok(ctrl);
            }
            match self.mode {
                OpenMode::NonBlocking => return Err(DaqError::WouldBlock),
                OpenMode::Blocking => self.chan.wait_ready().await,
            }
        }
    }

    /// Like [`read_ctrl`](Self::read_ctrl) but gives up after `wait`,
    /// regardless of the handle's mode.
    pub async fn read_ctrl_timeout(&mut self, wait: Duration) -> DaqResult<Control> {
        let waited_ms = wait.as_millis() as u64;
        tokio::time::timeout(wait, async {
            loop {
                if let Some(ctrl) = self.take_ctrl() {
                    return ctrl;
                }
                self.chan.wait_ready().await;
            }
        })
        .await
        .map_err(|_| DaqError::Timeout { waited_ms })
    }

    /// Reads the next control in its wire form. The destination must hold
    /// the full record: any other size fails with [`DaqError::TornRead`]
    /// without consuming anything.
    pub async fn read_ctrl_raw(&mut self, buf: &mut [u8]) -> DaqResult<()> {
        if buf.len() != CTRL_RECORD_SIZE {
            return Err(DaqError::TornRead {
                expected: CTRL_RECORD_SIZE,
                requested: buf.len(),
            });
        }
        let ctrl = self.read_ctrl().await?;
        buf.copy_from_slice(&ctrl.encode());
        Ok(())
    }

    /// Streams payload bytes of the current block into `buf`.
    ///
    /// Returns the number of bytes copied, which may be less than
    /// requested; completing a block's payload releases the block and a
    /// further read starts on the next one. With no block in progress the
    /// call dequeues one directly — skipping the control is the reader's
    /// choice.
    pub async fn read_data(&mut self, buf: &mut [u8]) -> DaqResult<usize> {
        loop {
            if let Some(n) = self.take_data(buf) {
                return Ok(n);
            }
            match self.mode {
                OpenMode::NonBlocking => return Err(DaqError::WouldBlock),
                OpenMode::Blocking => self.chan.wait_ready().await,
            }
        }
    }

    /// Convenience: one whole block, control plus full payload
    pub async fn read_block(&mut self) -> DaqResult<(Control, Vec<u8>)> {
        let ctrl = self.read_ctrl().await?;
        let mut data = vec![0u8; ctrl.data_len()];
        let mut off = 0;
        while off < data.len() {
            let n = self.read_data(&mut data[off..]).await?;
            if n == 0 {
                break;
            }
            off += n;
        }
        Ok((ctrl, data))
    }

    fn take_ctrl(&mut self) -> Option<Control> {
        if self.current.as_ref().is_some_and(|p| p.ctrl_read) {
            self.current = None;
        }
        if self.current.is_none() {
            self.current = Some(InProgress::new(self.chan.pop_block()?));
        }
        let p = self.current.as_mut()?;
        p.ctrl_read = true;
        Some(p.block.ctrl.clone())
    }

    fn take_data(&mut self, buf: &mut [u8]) -> Option<usize> {
        if self.current.is_none() {
            self.current = Some(InProgress::new(self.chan.pop_block()?));
        }
        let p = self.current.as_mut()?;
        let remaining = p.block.data.len() - p.data_off;
        let n = remaining.min(buf.len());
        buf[..n].copy_from_slice(&p.block.data[p.data_off..p.data_off + n]);
        p.data_off += n;
        if p.data_off >= p.block.data.len() {
            self.current = None;
        }
        Some(n)
    }
}
