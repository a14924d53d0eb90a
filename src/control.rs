//! Block and control data model
//!
//! A captured shot travels as a [`Block`]: a fixed-size [`Control`] header
//! plus the raw sample payload. The control side carries the channel-scoped
//! sequence number, the capture timestamp, the sample geometry and a
//! slot-indexed snapshot of the trigger and channel attribute values that
//! were in force at capture time.
//!
//! Controls compare field-wise, snapshots included; two shots captured at
//! different instants are therefore never equal. The wire form of a control
//! is exactly [`CTRL_RECORD_SIZE`] bytes and is only ever delivered whole.

use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};
use crate::time::TimeSpec;

/// Number of snapshot slots per attribute set
pub const SNAPSHOT_SLOTS: usize = 16;

/// Size in bytes of one encoded control record
pub const CTRL_RECORD_SIZE: usize = 512;

/// Upper bound on samples per shot; `pre + post` is capped here
pub const NSAMPLES_MAX: u32 = 16 * 1024;

/// Encoding version stamped into every control record
const CTRL_VERSION: u16 = 1;

/// Slot-indexed copy of an entity's mirrored attribute values
///
/// `mask` has one bit per occupied slot. Slot 0 always carries the owning
/// entity's enable flag; the remaining slots are assigned per attribute
/// table (see [`crate::attrs`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSnapshot {
    pub mask: u16,
    pub values: [u32; SNAPSHOT_SLOTS],
}

impl AttrSnapshot {
    /// Stores a value in a slot and marks it occupied
    pub fn set(&mut self, slot: usize, value: u32) {
        debug_assert!(slot < SNAPSHOT_SLOTS);
        self.values[slot] = value;
        self.mask |= 1 << slot;
    }

    /// Reads a slot, `None` if the slot is not occupied
    pub fn get(&self, slot: usize) -> Option<u32> {
        if slot < SNAPSHOT_SLOTS && self.mask & (1 << slot) != 0 {
            Some(self.values[slot])
        } else {
            None
        }
    }
}

/// Metadata header of one captured block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Channel-scoped sequence number, one per capture attempt
    pub seq: u32,
    /// Samples in the paired data payload
    pub nsamples: u32,
    /// Bytes per sample
    pub ssize: u32,
    /// Capture instant on the engine clock
    pub stamp: TimeSpec,
    /// Trigger attribute values at capture time
    pub attr_trigger: AttrSnapshot,
    /// Channel attribute values at capture time
    pub attr_channel: AttrSnapshot,
}

impl Control {
    /// Byte length of the data payload this control describes
    pub fn data_len(&self) -> usize {
        self.nsamples as usize * self.ssize as usize
    }

    /// Encodes the control into its fixed-size little-endian wire form
    pub fn encode(&self) -> [u8; CTRL_RECORD_SIZE] {
        let mut buf = [0u8; CTRL_RECORD_SIZE];
        let mut off = 0;
        put_u16(&mut buf, &mut off, CTRL_VERSION);
        put_u16(&mut buf, &mut off, 0); // reserved
        put_u32(&mut buf, &mut off, self.seq);
        put_u32(&mut buf, &mut off, self.nsamples);
        put_u32(&mut buf, &mut off, self.ssize);
        put_u64(&mut buf, &mut off, self.stamp.secs);
        put_u32(&mut buf, &mut off, self.stamp.ticks);
        put_u16(&mut buf, &mut off, self.attr_trigger.mask);
        put_u16(&mut buf, &mut off, self.attr_channel.mask);
        for v in self.attr_trigger.values {
            put_u32(&mut buf, &mut off, v);
        }
        for v in self.attr_channel.values {
            put_u32(&mut buf, &mut off, v);
        }
        buf
    }

    /// Decodes a full control record; the slice must be the exact record size
    pub fn decode(buf: &[u8]) -> DaqResult<Self> {
        if buf.len() != CTRL_RECORD_SIZE {
            return Err(DaqError::TornRead {
                expected: CTRL_RECORD_SIZE,
                requested: buf.len(),
            });
        }
        let mut off = 0;
        let _version = get_u16(buf, &mut off);
        let _reserved = get_u16(buf, &mut off);
        let seq = get_u32(buf, &mut off);
        let nsamples = get_u32(buf, &mut off);
        let ssize = get_u32(buf, &mut off);
        let secs = get_u64(buf, &mut off);
        let ticks = get_u32(buf, &mut off);
        let trig_mask = get_u16(buf, &mut off);
        let chan_mask = get_u16(buf, &mut off);
        let mut attr_trigger = AttrSnapshot {
            mask: trig_mask,
            values: [0; SNAPSHOT_SLOTS],
        };
        for v in attr_trigger.values.iter_mut() {
            *v = get_u32(buf, &mut off);
        }
        let mut attr_channel = AttrSnapshot {
            mask: chan_mask,
            values: [0; SNAPSHOT_SLOTS],
        };
        for v in attr_channel.values.iter_mut() {
            *v = get_u32(buf, &mut off);
        }
        Ok(Self {
            seq,
            nsamples,
            ssize,
            stamp: TimeSpec { secs, ticks },
            attr_trigger,
            attr_channel,
        })
    }
}

/// One captured unit: control header plus raw sample bytes
///
/// Invariant: `data.len() == ctrl.data_len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub ctrl: Control,
    pub data: Vec<u8>,
}

impl Block {
    /// Bytes of payload this block occupies in a byte-bounded buffer
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }
}

fn put_u16(buf: &mut [u8], off: &mut usize, v: u16) {
    buf[*off..*off + 2].copy_from_slice(&v.to_le_bytes());
    *off += 2;
}

fn put_u32(buf: &mut [u8], off: &mut usize, v: u32) {
    buf[*off..*off + 4].copy_from_slice(&v.to_le_bytes());
    *off += 4;
}

fn put_u64(buf: &mut [u8], off: &mut usize, v: u64) {
    buf[*off..*off + 8].copy_from_slice(&v.to_le_bytes());
    *off += 8;
}

fn get_u16(buf: &[u8], off: &mut usize) -> u16 {
    let v = u16::from_le_bytes([buf[*off], buf[*off + 1]]);
    *off += 2;
    v
}

fn get_u32(buf: &[u8], off: &mut usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[*off..*off + 4]);
    *off += 4;
    u32::from_le_bytes(b)
}

fn get_u64(buf: &[u8], off: &mut usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[*off..*off + 8]);
    *off += 8;
    u64::from_le_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_control(seq: u32) -> Control {
        let mut attr_trigger = AttrSnapshot::default();
        attr_trigger.set(0, 1);
        attr_trigger.set(1, 64); // post
        attr_trigger.set(2, 16); // pre
        let mut attr_channel = AttrSnapshot::default();
        attr_channel.set(0, 1);
        attr_channel.set(1, 3);
        Control {
            seq,
            nsamples: 80,
            ssize: 2,
            stamp: TimeSpec {
                secs: 12,
                ticks: 345_678_901,
            },
            attr_trigger,
            attr_channel,
        }
    }

    #[test]
    fn snapshot_slots_and_mask() {
        let mut snap = AttrSnapshot::default();
        assert_eq!(snap.get(1), None);
        snap.set(1, 42);
        assert_eq!(snap.get(1), Some(42));
        assert_eq!(snap.mask, 0b10);
        assert_eq!(snap.get(2), None);
    }

    #[test]
    fn control_equality_is_field_wise() {
        let a = sample_control(7);
        let mut b = a.clone();
        assert_eq!(a, b);

        // any snapshot slot difference breaks equality
        b.attr_channel.set(2, 99);
        assert_ne!(a, b);

        let mut c = a.clone();
        c.stamp.ticks += 1;
        assert_ne!(a, c);
    }

    #[test]
    fn encode_is_record_sized() {
        let ctrl = sample_control(3);
        let wire = ctrl.encode();
        assert_eq!(wire.len(), CTRL_RECORD_SIZE);
        let back = Control::decode(&wire).unwrap();
        assert_eq!(ctrl, back);
    }

    #[test]
    fn decode_rejects_partial_record() {
        let ctrl = sample_control(3);
        let wire = ctrl.encode();
        let err = Control::decode(&wire[..256]).unwrap_err();
        assert!(matches!(
            err,
            DaqError::TornRead {
                expected: CTRL_RECORD_SIZE,
                requested: 256
            }
        ));
    }

    #[test]
    fn data_len_matches_geometry() {
        let ctrl = sample_control(0);
        assert_eq!(ctrl.data_len(), 160);
    }
}
