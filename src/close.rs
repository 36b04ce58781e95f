//! Iteration close lifecycle.
//!
//! ```text
//!            close()                 flush ok
//!   Open ───────────────▶ ClosedInFrontend ───────────▶ ClosedInBackend
//!    │                          ▲
//!    │ streaming step ended     │ close()
//!    ▼                          │
//!   ClosedTemporarily ──────────┘
//! ```
//!
//! `ClosedTemporarily` is internal: it records that the backend finalized a
//! step while the iteration was still logically open. It never returns to
//! `Open`, and it accepts mutations exactly like `Open`.

use crate::error::{PmdError, Result};

/// Close state of one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseStatus {
    /// Not closed
    #[default]
    Open,
    /// Closed by the user, close not yet propagated to the backend
    ClosedInFrontend,
    /// Close propagated and finalized in the backend
    ClosedInBackend,
    /// Step finalized by a streaming backend, still logically open
    ClosedTemporarily,
}

impl CloseStatus {
    /// Whether attribute and data mutations are legal
    pub fn is_mutable(self) -> bool {
        matches!(self, CloseStatus::Open | CloseStatus::ClosedTemporarily)
    }

    /// Whether the user has closed the iteration
    pub fn is_closed(self) -> bool {
        matches!(
            self,
            CloseStatus::ClosedInFrontend | CloseStatus::ClosedInBackend
        )
    }

    /// Fail with `InvalidState` unless mutations are legal
    pub(crate) fn check_mutable(self, iteration: u64) -> Result<()> {
        if self.is_mutable() {
            Ok(())
        } else {
            Err(PmdError::InvalidState(format!(
                "iteration {iteration} has been closed ({self:?}) and cannot be modified"
            )))
        }
    }

    /// State after the user requests a close
    pub(crate) fn request_close(self) -> Self {
        match self {
            CloseStatus::Open | CloseStatus::ClosedTemporarily => CloseStatus::ClosedInFrontend,
            closed => closed,
        }
    }

    /// State after a flush that carried the close task succeeded
    pub(crate) fn after_flush(self) -> Self {
        match self {
            CloseStatus::ClosedInFrontend => CloseStatus::ClosedInBackend,
            other => other,
        }
    }

    /// State after a streaming step ended with the iteration still open
    pub(crate) fn after_step(self) -> Self {
        match self {
            CloseStatus::Open => CloseStatus::ClosedTemporarily,
            other => other,
        }
    }
}
