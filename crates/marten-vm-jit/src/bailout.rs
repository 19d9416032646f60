//! JIT bailout mechanism.
//!
//! Compiled code never rewinds. When an op meets a value its guard does not
//! cover, the backend leaves compiled code with the frame's pc still on
//! that op and the interpreter executes it. Execution returns to compiled
//! code at the next instruction boundary.
//!
//! # Bailout flow
//!
//! ```text
//! compiled op:
//!   guard
//!     ├─ holds → fast path result
//!     └─ fails → Bailout(reason), pc unchanged
//!
//! backend:
//!   if reason counts toward deopt:
//!     bailouts += 1
//!     if bailouts >= deopt threshold:
//!       drop compiled code, unlink callers, never compile again
//!   interpreter step at pc
//! ```

/// Number of guard failures before a code block is deoptimized.
///
/// After this many bailouts the block is permanently returned to the
/// interpreter and will never be compiled again.
pub const DEOPT_THRESHOLD: u32 = 10;

/// Reason for a bailout from compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BailoutReason {
    /// Type guard failed (e.g., expected int32 but got string).
    TypeGuardFailure,
    /// Integer arithmetic overflowed or produced negative zero.
    Overflow,
    /// The op has no compiled form and always runs in the interpreter.
    UnsupportedOperation,
}

impl BailoutReason {
    /// Whether this bailout means the compiled code speculated wrong.
    ///
    /// Unsupported operations are known at translation time and are not
    /// held against the code block.
    #[inline]
    pub fn counts_toward_deopt(self) -> bool {
        !matches!(self, BailoutReason::UnsupportedOperation)
    }

    /// Short name for logs
    pub fn name(self) -> &'static str {
        match self {
            BailoutReason::TypeGuardFailure => "type_guard",
            BailoutReason::Overflow => "overflow",
            BailoutReason::UnsupportedOperation => "unsupported",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speculation_failures_count_toward_deopt() {
        assert!(BailoutReason::TypeGuardFailure.counts_toward_deopt());
        assert!(BailoutReason::Overflow.counts_toward_deopt());
        assert!(!BailoutReason::UnsupportedOperation.counts_toward_deopt());
    }

    #[test]
    fn deopt_threshold_is_positive() {
        const { assert!(DEOPT_THRESHOLD > 0) };
    }
}
