//! Per-call state machine
//!
//! Created → Enqueued → Executing → CompletedPendingDelivery → Delivered →
//! DestroyQueued → Released. Every transition is a compare-and-swap from the
//! immediately preceding state; Released is terminal.

use crate::errors::{FfiError, Result};
use crossbeam::atomic::AtomicCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallState {
    Created,
    Enqueued,
    Executing,
    CompletedPendingDelivery,
    Delivered,
    DestroyQueued,
    Released,
}

impl CallState {
    /// The only state reachable from `self`
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::Enqueued),
            Self::Enqueued => Some(Self::Executing),
            Self::Executing => Some(Self::CompletedPendingDelivery),
            Self::CompletedPendingDelivery => Some(Self::Delivered),
            Self::Delivered => Some(Self::DestroyQueued),
            Self::DestroyQueued => Some(Self::Released),
            Self::Released => None,
        }
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Released)
    }

    /// Queued or running: the result buffer has not been written yet
    #[inline]
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Enqueued | Self::Executing)
    }

    /// Result has been handed to the caller side
    #[inline]
    pub fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered | Self::DestroyQueued | Self::Released)
    }
}

/// Atomic holder of a `CallState`
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicCell<CallState>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicCell::new(CallState::Created),
        }
    }

    #[inline]
    pub fn get(&self) -> CallState {
        self.state.load()
    }

    /// Move from `from` to its successor
    pub fn advance(&self, from: CallState) -> Result<CallState> {
        let to = from.next().ok_or_else(|| {
            FfiError::InvalidAsyncResult(format!("{:?} is terminal", from))
        })?;

        self.state.compare_exchange(from, to).map_err(|actual| {
            FfiError::InvalidAsyncResult(format!(
                "transition {:?} -> {:?} rejected, state is {:?}",
                from, to, actual
            ))
        })?;
        Ok(to)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
