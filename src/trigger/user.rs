//! User-commanded trigger backend
//!
//! No timing source of its own: a shot is produced only when an external
//! caller issues the fire command while the trigger is armed. Commands
//! arriving while disabled are swallowed (reported as not-fired, not an
//! error); commands sent to a timed backend are rejected before they reach
//! any state machine.

use std::sync::Arc;

use super::{TriggerInner, TriggerKind};
use crate::error::{DaqError, DaqResult};

/// Executes a manual fire command against `inner`
pub(super) fn fire(inner: &Arc<TriggerInner>) -> DaqResult<bool> {
    if inner.kind != TriggerKind::User {
        return Err(DaqError::FireNotSupported {
            backend: inner.kind.name(),
        });
    }
    if !inner.is_armed() {
        return Ok(false);
    }
    let stamp = inner.clock().now();
    inner.emit(stamp);
    Ok(true)
}
