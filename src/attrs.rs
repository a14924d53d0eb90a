//! Attribute store
//!
//! Every entity in the topology (device, channel, trigger, buffer) owns a
//! small table of named `u32` attributes with a per-attribute writability
//! flag. Writes are immediately visible to readers; attributes that carry a
//! snapshot slot are also mirrored into the next control produced by the
//! owning channel or trigger.
//!
//! The table sits behind one mutex, so a read of one attribute can never
//! observe a torn write to another. Unknown names and writes to read-only
//! attributes are rejected here, before they can reach any state machine.

use std::sync::Mutex;

use crate::control::AttrSnapshot;
use crate::error::{DaqError, DaqResult};

/// Static definition of one attribute
#[derive(Debug, Clone, Copy)]
pub struct AttrDef {
    pub name: &'static str,
    pub initial: u32,
    pub writable: bool,
    /// Snapshot slot this attribute is mirrored into, if any
    pub slot: Option<usize>,
}

impl AttrDef {
    pub const fn rw(name: &'static str, initial: u32) -> Self {
        Self {
            name,
            initial,
            writable: true,
            slot: None,
        }
    }

    pub const fn ro(name: &'static str, initial: u32) -> Self {
        Self {
            name,
            initial,
            writable: false,
            slot: None,
        }
    }

    pub const fn slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }
}

#[derive(Debug)]
struct AttrEntry {
    def: AttrDef,
    value: u32,
}

/// Mutable attribute table owned by one entity
#[derive(Debug)]
pub struct AttrStore {
    owner: &'static str,
    entries: Mutex<Vec<AttrEntry>>,
}

impl AttrStore {
    /// Builds a store from a definition table; `owner` names the entity in
    /// error messages.
    pub fn new(owner: &'static str, defs: &[AttrDef]) -> Self {
        let entries = defs
            .iter()
            .map(|def| AttrEntry {
                def: *def,
                value: def.initial,
            })
            .collect();
        Self {
            owner,
            entries: Mutex::new(entries),
        }
    }

    /// True if the table defines `name`
    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .lock()
            .expect("attribute table poisoned")
            .iter()
            .any(|e| e.def.name == name)
    }

    /// Reads an attribute value
    pub fn get(&self, name: &str) -> DaqResult<u32> {
        let entries = self.entries.lock().expect("attribute table poisoned");
        entries
            .iter()
            .find(|e| e.def.name == name)
            .map(|e| e.value)
            .ok_or_else(|| self.unknown(name))
    }

    /// Writes an attribute value; fails on read-only or unknown names and
    /// leaves the stored value untouched in both cases.
    pub fn set(&self, name: &str, value: u32) -> DaqResult<()> {
        let mut entries = self.entries.lock().expect("attribute table poisoned");
        let entry = entries
            .iter_mut()
            .find(|e| e.def.name == name)
            .ok_or_else(|| self.unknown(name))?;
        if !entry.def.writable {
            return Err(DaqError::ReadOnlyAttr {
                name: name.to_string(),
            });
        }
        entry.value = value;
        Ok(())
    }

    /// Copies every slot-carrying attribute into a snapshot. Slot 0 is
    /// reserved for the owning entity's enable flag.
    pub fn snapshot(&self, enabled: bool) -> AttrSnapshot {
        let entries = self.entries.lock().expect("attribute table poisoned");
        let mut snap = AttrSnapshot::default();
        snap.set(0, u32::from(enabled));
        for e in entries.iter() {
            if let Some(slot) = e.def.slot {
                snap.set(slot, e.value);
            }
        }
        snap
    }

    fn unknown(&self, name: &str) -> DaqError {
        DaqError::UnknownAttr {
            owner: self.owner.to_string(),
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AttrStore {
        AttrStore::new(
            "test entity",
            &[
                AttrDef::rw("post-samples", 0).slot(1),
                AttrDef::rw("pre-samples", 0).slot(2),
                AttrDef::ro("resolution-bits", 16).slot(3),
                AttrDef::rw("slack-ns", 0),
            ],
        )
    }

    #[test]
    fn write_read_round_trip() {
        let s = store();
        s.set("post-samples", 1024).unwrap();
        assert_eq!(s.get("post-samples").unwrap(), 1024);

        // stress the round trip the way the attribute surface is exercised
        let mut increment: i64 = 1;
        for _ in 0..100 {
            let v = i64::from(s.get("pre-samples").unwrap());
            let next = (v + increment) as u32;
            s.set("pre-samples", next).unwrap();
            assert_eq!(s.get("pre-samples").unwrap(), next);
            increment = -increment;
        }
    }

    #[test]
    fn read_only_write_fails_and_preserves_value() {
        let s = store();
        let err = s.set("resolution-bits", 8).unwrap_err();
        assert!(matches!(err, DaqError::ReadOnlyAttr { .. }));
        assert_eq!(s.get("resolution-bits").unwrap(), 16);
    }

    #[test]
    fn unknown_attribute_is_rejected() {
        let s = store();
        assert!(matches!(
            s.get("ms-period").unwrap_err(),
            DaqError::UnknownAttr { .. }
        ));
        assert!(matches!(
            s.set("ms-period", 100).unwrap_err(),
            DaqError::UnknownAttr { .. }
        ));
    }

    #[test]
    fn snapshot_mirrors_slots() {
        let s = store();
        s.set("post-samples", 64).unwrap();
        s.set("pre-samples", 16).unwrap();
        s.set("slack-ns", 10_000_000).unwrap(); // no slot, not mirrored

        let snap = s.snapshot(true);
        assert_eq!(snap.get(0), Some(1));
        assert_eq!(snap.get(1), Some(64));
        assert_eq!(snap.get(2), Some(16));
        assert_eq!(snap.get(3), Some(16)); // read-only attrs are mirrored too
        assert_eq!(snap.get(4), None);

        let snap = s.snapshot(false);
        assert_eq!(snap.get(0), Some(0));
    }
}
