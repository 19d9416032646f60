//! # Marten VM JIT
//!
//! Baseline compiling backend for hot code blocks.
//!
//! Hot blocks are translated into pre-decoded ops with resolved operands
//! and absolute targets. Integer arithmetic and comparisons run behind
//! type guards; anything the translator does not specialize bails out to
//! the interpreter at the same bytecode offset. Code that keeps failing its
//! guards is deoptimized and every call site linked to it is unlinked.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod bailout;
pub mod compiler;
pub mod config;
pub mod runtime;
pub mod translator;

pub use bailout::{BailoutReason, DEOPT_THRESHOLD};
pub use compiler::{CompiledCode, JitError, compile};
pub use config::{HOT_THRESHOLD, JitConfig};
pub use runtime::{JitBackend, JitStats};
pub use translator::JitOp;
