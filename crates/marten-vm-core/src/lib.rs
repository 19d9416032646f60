//! # Marten VM Core
//!
//! Execution core of the Marten register-based JavaScript VM.
//!
//! ## Design Principles
//!
//! - **Code blocks**: linked instructions plus every per-function side
//!   table (constants, handlers, lazily rebuilt line info, inline caches)
//! - **Hidden classes**: objects share [`Structure`]s through cached
//!   transitions, so structure identity is a valid cache key
//! - **Inline caches**: one record per access site, shared by the
//!   interpreter and the compiling backend
//! - **Heap frames**: frames live in the register file, not on the Rust
//!   stack; only host callbacks recurse
//! - **Interruptible**: a watchdog flag is polled at loop back-edges and
//!   call entry

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod activation;
pub mod backend;
pub mod builtins;
pub mod code_block;
pub mod debugger;
mod dump;
pub mod error;
pub mod eval;
pub mod exception_info;
pub mod host;
pub mod inline_cache;
pub mod interpreter;
pub mod lock;
pub mod object;
pub mod operations;
pub mod register_file;
pub mod scope;
pub mod sort;
pub mod structure;
pub mod value;
pub mod vm;
pub mod watchdog;

pub use backend::ExecutionBackend;
pub use builtins::Realm;
pub use code_block::{CodeBlock, CodeBlockId, FunctionTemplate, OwnerNode, SourceProvider, UnitOwner};
pub use debugger::{DebugHook, Debugger};
pub use error::{
    Abrupt, Completion, ErrorKind, InterruptReason, OpResult, SourceAttribution, UncaughtException,
    VmError, VmResult,
};
pub use eval::EvalCompiler;
pub use host::{HostCallContext, HostFunction};
pub use inline_cache::{CallLinkInfo, CachedAccess, GlobalResolveInfo, StructureStubInfo, StubState};
pub use interpreter::Interpreter;
pub use lock::{JsLock, JsLockGuard};
pub use object::{JsObject, ObjectKind};
pub use register_file::{CallFrame, RegisterFile};
pub use scope::ScopeChain;
pub use structure::{PropertyAttributes, Structure};
pub use value::Value;
pub use vm::{Vm, VmConfig};
pub use watchdog::{InterruptHandle, Watchdog};
