//! Debugger hooks

use crate::code_block::CodeBlock;
use crate::value::Value;

/// Events carried by the `debug` instruction's hook operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugHook {
    /// Function body entered
    DidEnterCallFrame,
    /// Function about to return
    WillLeaveCallFrame,
    /// New statement
    WillExecuteStatement,
    /// Program about to start
    WillExecuteProgram,
    /// Program finished
    DidExecuteProgram,
    /// Source-level breakpoint
    DidReachBreakpoint,
}

impl DebugHook {
    /// Hook for a `debug` operand
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => DebugHook::DidEnterCallFrame,
            1 => DebugHook::WillLeaveCallFrame,
            2 => DebugHook::WillExecuteStatement,
            3 => DebugHook::WillExecuteProgram,
            4 => DebugHook::DidExecuteProgram,
            5 => DebugHook::DidReachBreakpoint,
            _ => return None,
        })
    }
}

/// Receives hook events when a debugger is attached to the VM.
///
/// Without one, `debug` instructions do nothing.
pub trait Debugger: Send {
    /// A `debug` instruction ran
    fn hook(&mut self, event: DebugHook, code_block: &CodeBlock, first_line: u32, last_line: u32);

    /// An exception is about to unwind; `has_handler` tells whether a
    /// handler will catch it in the current execution
    fn exception(&mut self, _value: &Value, _code_block: &CodeBlock, _line: u32, _has_handler: bool) {}
}
