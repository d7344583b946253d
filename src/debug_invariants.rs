//! Structural invariant checks for the color partition and the community state.
//!
//! Checks are cheap enough for tests but linear in the graph size, so the
//! optimizer only runs them through [`debug_invariants!`](crate::debug_invariants),
//! i.e. in debug builds or with the `check-invariants` / `strict-invariants`
//! features.

use crate::modularity_error::ModularityError;

/// Relative tolerance used when comparing accumulated weight sums.
pub const WEIGHT_TOLERANCE: f64 = 1e-7;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Validate invariants and return the first violation encountered.
    fn validate_invariants(&self) -> Result<(), ModularityError>;

    /// Panic on the first violation when invariant checking is enabled.
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "structure check failed");
    }
}

/// Turns a failed condition into [`ModularityError::InvariantViolation`].
#[inline]
pub(crate) fn ensure<F>(condition: bool, describe: F) -> Result<(), ModularityError>
where
    F: FnOnce() -> String,
{
    if condition {
        Ok(())
    } else {
        Err(ModularityError::InvariantViolation(describe()))
    }
}

/// `a ≈ b` relative to `scale` or the larger magnitude, whichever is bigger.
///
/// Partial sums of a live accumulator lose the low bits of small terms once a
/// large one has passed through, so callers pass the total they were drawn
/// from as `scale`.
#[inline]
pub(crate) fn weights_match(a: f64, b: f64, scale: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(scale.abs()).max(1.0);
    (a - b).abs() <= WEIGHT_TOLERANCE * scale
}

/// Run a fallible check and panic on error when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}
