//! Connector-credential pair lifecycle state machine.
//!
//! ```text
//!            pause               delete
//!   ACTIVE ─────────▶ PAUSED ───────────▶ DELETING ──▶ (row removed)
//!     ▲    ◀─────────   │  ▲                  ▲
//!     │      resume     │  │                  │
//!     └──── INVALID ◀───┘  └──── INVALID ─────┘
//! ```
//!
//! `DELETING` is terminal: the orchestrator removes the row at the end of
//! its run instead of moving it to another state. Re-entering `DELETING`
//! is allowed so an interrupted deletion can be resumed.

use crate::error::{LifecycleError, Result};
use crate::models::{CcPairStatus, ConnectorCredentialPair};

/// Whether a deletion run may start (or resume) for this pair.
pub fn can_start_deletion(ccp: &ConnectorCredentialPair) -> bool {
    ccp.status != CcPairStatus::Active
}

/// Fails with a precondition error naming the pause step when `ccp` is active.
pub fn assert_deletable(ccp: &ConnectorCredentialPair) -> Result<()> {
    if can_start_deletion(ccp) {
        Ok(())
    } else {
        Err(LifecycleError::Precondition(format!(
            "connector credential pair {} ('{}') is ACTIVE; pause it before deleting",
            ccp.id, ccp.name
        )))
    }
}

/// Validates a status change and returns the new status.
pub fn transition(from: CcPairStatus, to: CcPairStatus) -> Result<CcPairStatus> {
    use CcPairStatus::*;

    let allowed = match (from, to) {
        (Active, Paused) | (Paused, Active) => true,
        (Active, Invalid) | (Paused, Invalid) | (Invalid, Paused) => true,
        (Paused, Deleting) | (Invalid, Deleting) | (Deleting, Deleting) => true,
        (a, b) if a == b && a != Deleting => true,
        _ => false,
    };

    if allowed {
        return Ok(to);
    }

    let reason = match (from, to) {
        (Active, Deleting) => "pause the connector before deleting it".to_string(),
        (Deleting, _) => "deletion is irreversible once started".to_string(),
        _ => format!("{} -> {} is not a valid transition", from, to),
    };
    Err(LifecycleError::Precondition(reason))
}
