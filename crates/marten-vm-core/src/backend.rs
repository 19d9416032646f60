//! Execution backends

use crate::error::Completion;
use crate::vm::Vm;

/// Something that can run the frames above an entry depth to completion.
///
/// The VM pushes the entry frame and hands control to the backend; the
/// backend returns once the register file is back at `entry_depth`. Host
/// callbacks re-enter through the same backend.
pub trait ExecutionBackend: Send {
    /// Backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Run until the frame stack unwinds to `entry_depth`
    fn run(&mut self, vm: &mut Vm, entry_depth: usize) -> Completion;
}
