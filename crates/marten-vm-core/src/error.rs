//! VM error types

use std::sync::Arc;

use marten_vm_bytecode::BytecodeError;
use thiserror::Error;

use crate::value::Value;

/// Host-level VM errors.
///
/// Script-level failures never surface here: they are values thrown inside
/// the machine and reported through [`Completion`].
#[derive(Debug, Error)]
pub enum VmError {
    /// Malformed or inconsistent compiled unit
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] BytecodeError),

    /// Attempt to call a non-function from the host
    #[error("TypeError: {0} is not a function")]
    NotCallable(String),

    /// Exception info could not be rebuilt
    #[error("exception info unavailable: {0}")]
    ExceptionInfoUnavailable(String),

    /// Internal error
    #[error("InternalError: {0}")]
    InternalError(String),
}

impl VmError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;

/// Why execution stopped without completing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
    /// Register file capacity or call depth exceeded
    StackExhausted,
    /// Watchdog fired or the host requested termination
    Watchdog,
}

impl std::fmt::Display for InterruptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterruptReason::StackExhausted => f.write_str("Maximum call stack size exceeded"),
            InterruptReason::Watchdog => f.write_str("Execution interrupted"),
        }
    }
}

/// Source location an exception was thrown from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAttribution {
    /// Source URL
    pub url: Arc<str>,
    /// Line number
    pub line: u32,
    /// Position of the failing operation within the source
    pub divot: u32,
    /// Distance back to the expression start
    pub start_offset: u32,
    /// Distance forward to the expression end
    pub end_offset: u32,
}

/// An exception that escaped the outermost frame
#[derive(Debug, Clone)]
pub struct UncaughtException {
    /// The thrown value
    pub value: Value,
    /// The thrown value as a string
    pub message: String,
    /// Where it was thrown, when known
    pub attribution: Option<SourceAttribution>,
}

impl std::fmt::Display for UncaughtException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Uncaught {}", self.message)?;
        if let Some(at) = &self.attribution {
            write!(f, " at {}:{}", at.url, at.line)?;
        }
        Ok(())
    }
}

/// Outcome of an execution request
#[derive(Debug, Clone)]
pub enum Completion {
    /// Ran to completion
    Normal(Value),
    /// An exception escaped
    Throw(UncaughtException),
    /// Stopped by an interrupt; the machine is unwound to the entry frame
    Interrupted(InterruptReason),
}

impl Completion {
    /// Whether execution completed normally
    pub fn is_normal(&self) -> bool {
        matches!(self, Completion::Normal(_))
    }

    /// Result value of a normal completion
    pub fn value(&self) -> Option<&Value> {
        match self {
            Completion::Normal(value) => Some(value),
            _ => None,
        }
    }

    /// Thrown exception, if any
    pub fn exception(&self) -> Option<&UncaughtException> {
        match self {
            Completion::Throw(exception) => Some(exception),
            _ => None,
        }
    }
}

/// Abrupt exit from an operation inside the machine
#[derive(Debug, Clone)]
pub enum Abrupt {
    /// A script exception
    Throw(Value),
    /// A non-catchable interrupt
    Interrupted(InterruptReason),
}

impl From<InterruptReason> for Abrupt {
    fn from(reason: InterruptReason) -> Self {
        Abrupt::Interrupted(reason)
    }
}

/// Result of an operation that may throw
pub type OpResult<T> = std::result::Result<T, Abrupt>;

/// Native error constructors, indexed by `new_error`'s type operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// `Error`
    Error,
    /// `EvalError`
    EvalError,
    /// `RangeError`
    RangeError,
    /// `ReferenceError`
    ReferenceError,
    /// `SyntaxError`
    SyntaxError,
    /// `TypeError`
    TypeError,
    /// `URIError`
    URIError,
}

impl ErrorKind {
    /// All kinds in operand order
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Error,
        ErrorKind::EvalError,
        ErrorKind::RangeError,
        ErrorKind::ReferenceError,
        ErrorKind::SyntaxError,
        ErrorKind::TypeError,
        ErrorKind::URIError,
    ];

    /// Kind for a `new_error` operand
    pub fn from_i32(value: i32) -> Option<Self> {
        usize::try_from(value).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Constructor name
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::EvalError => "EvalError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::URIError => "URIError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_operands() {
        assert_eq!(ErrorKind::from_i32(0), Some(ErrorKind::Error));
        assert_eq!(ErrorKind::from_i32(5).map(ErrorKind::name), Some("TypeError"));
        assert_eq!(ErrorKind::from_i32(7), None);
        assert_eq!(ErrorKind::from_i32(-1), None);
    }

    #[test]
    fn test_uncaught_display() {
        let exception = UncaughtException {
            value: Value::Int32(1),
            message: "1".into(),
            attribution: Some(SourceAttribution {
                url: Arc::from("a.js"),
                line: 3,
                divot: 0,
                start_offset: 0,
                end_offset: 0,
            }),
        };
        assert_eq!(exception.to_string(), "Uncaught 1 at a.js:3");
    }
}
