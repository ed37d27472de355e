//! Cooperative cancellation for long-running merges.
//!
//! The merger reports fixed work-unit increments at document and term
//! boundaries. The callback is injected, never global, so callers can wire
//! it to a scheduler and tests can trigger cancellation at any exact
//! boundary.

use crate::error::{Result, StrataError};

/// Collaborator invoked with work-unit counts during a merge. Raising
/// [`crate::error::StrataError::MergeAborted`] makes the merge unwind
/// cleanly: readers closed, partial outputs discarded.
pub trait CheckAbort {
    /// Report `units` of completed work; return the abort error to cancel.
    fn work(&mut self, units: u64) -> Result<()>;
}

impl<F> CheckAbort for F
where
    F: FnMut(u64) -> Result<()>,
{
    fn work(&mut self, units: u64) -> Result<()> {
        self(units)
    }
}

/// A no-op abort check for merges that should always run to completion.
#[derive(Debug, Default)]
pub struct NoAbort;

impl CheckAbort for NoAbort {
    fn work(&mut self, _units: u64) -> Result<()> {
        Ok(())
    }
}

/// Aborts once the accumulated work crosses a threshold. Deterministic, so
/// tests can cancel a merge at a chosen document boundary.
#[derive(Debug)]
pub struct AbortAfter {
    threshold: u64,
    accumulated: u64,
}

impl AbortAfter {
    /// Abort once more than `threshold` units have been reported.
    pub fn new(threshold: u64) -> Self {
        AbortAfter {
            threshold,
            accumulated: 0,
        }
    }

    /// Total units reported so far.
    pub fn accumulated(&self) -> u64 {
        self.accumulated
    }
}

impl CheckAbort for AbortAfter {
    fn work(&mut self, units: u64) -> Result<()> {
        self.accumulated += units;
        if self.accumulated > self.threshold {
            Err(StrataError::aborted(format!(
                "abort threshold {} exceeded at {} units",
                self.threshold, self.accumulated
            )))
        } else {
            Ok(())
        }
    }
}
