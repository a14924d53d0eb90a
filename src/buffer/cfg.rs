//! Buffer backend configuration

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DaqError, DaqResult};

/// Default block-count limit for a kmalloc queue
pub const DEFAULT_MAX_LEN: usize = 16;

/// Default payload limit in KiB for a vmalloc queue
pub const DEFAULT_MAX_KB: usize = 128;

/// Capacity policy for a channel's block queue
///
/// Hot-swapping a channel set's buffer backend replaces each channel's queue
/// with a fresh one built from the named policy at its default limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferCfg {
    /// Count-bounded queue: at most `max_len` blocks
    Kmalloc { max_len: usize },
    /// Byte-bounded queue: at most `max_kb * 1024` bytes of payload
    Vmalloc { max_kb: usize },
}

impl BufferCfg {
    /// Resolves a backend name to its default configuration
    pub fn from_name(name: &str) -> DaqResult<Self> {
        match name {
            "kmalloc" => Ok(BufferCfg::Kmalloc {
                max_len: DEFAULT_MAX_LEN,
            }),
            "vmalloc" => Ok(BufferCfg::Vmalloc {
                max_kb: DEFAULT_MAX_KB,
            }),
            other => Err(DaqError::UnknownBackend {
                kind: "buffer",
                name: other.to_string(),
            }),
        }
    }

    /// Backend name as it appears on the attribute surface
    pub fn name(&self) -> &'static str {
        match self {
            BufferCfg::Kmalloc { .. } => "kmalloc",
            BufferCfg::Vmalloc { .. } => "vmalloc",
        }
    }

    /// Rejects zero-capacity configurations
    pub fn validate(&self) -> Result<(), &'static str> {
        match self {
            BufferCfg::Kmalloc { max_len: 0 } => Err("kmalloc limit must be > 0"),
            BufferCfg::Vmalloc { max_kb: 0 } => Err("vmalloc limit must be > 0"),
            _ => Ok(()),
        }
    }
}

impl Default for BufferCfg {
    fn default() -> Self {
        BufferCfg::Kmalloc {
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

impl fmt::Display for BufferCfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferCfg::Kmalloc { max_len } => write!(f, "kmalloc(max_len={max_len})"),
            BufferCfg::Vmalloc { max_kb } => write!(f, "vmalloc(max_kb={max_kb})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        let k = BufferCfg::from_name("kmalloc").unwrap();
        assert_eq!(k, BufferCfg::Kmalloc { max_len: 16 });
        assert_eq!(k.name(), "kmalloc");

        let v = BufferCfg::from_name("vmalloc").unwrap();
        assert_eq!(v, BufferCfg::Vmalloc { max_kb: 128 });
        assert_eq!(v.name(), "vmalloc");
    }

    #[test]
    fn unknown_backend_rejected() {
        assert!(matches!(
            BufferCfg::from_name("ringbuf").unwrap_err(),
            DaqError::UnknownBackend { kind: "buffer", .. }
        ));
    }

    #[test]
    fn validation() {
        assert!(BufferCfg::Kmalloc { max_len: 1 }.validate().is_ok());
        assert!(BufferCfg::Kmalloc { max_len: 0 }.validate().is_err());
        assert!(BufferCfg::Vmalloc { max_kb: 0 }.validate().is_err());
    }

    #[test]
    fn default_is_kmalloc() {
        assert_eq!(BufferCfg::default().name(), "kmalloc");
    }
}
