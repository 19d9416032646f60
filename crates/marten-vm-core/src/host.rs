//! Host function ABI
//!
//! Host functions are plain Rust closures. They return `Ok(value)` or
//! `Err(exception)`; the `Err` side is the exception out-slot and is thrown
//! into script at the call site. A [`HostCallContext`] lets a host function
//! call back into script synchronously.

use std::sync::Arc;

use crate::backend::ExecutionBackend;
use crate::code_block::CodeBlock;
use crate::error::{Completion, ErrorKind, VmError};
use crate::object::JsObject;
use crate::value::Value;
use crate::vm::Vm;

/// Native function signature: context, callee, `this`, arguments
pub type NativeFunction = dyn Fn(&mut HostCallContext<'_>, &Arc<JsObject>, &Value, &[Value]) -> Result<Value, Value>
    + Send
    + Sync;

/// Host function payload of a function object
#[derive(Clone)]
pub struct HostFunction {
    /// Function name
    pub name: Arc<str>,
    /// Declared parameter count
    pub length: u32,
    /// Implementation
    pub func: Arc<NativeFunction>,
}

impl HostFunction {
    /// Wrap a closure
    pub fn new<F>(name: &str, length: u32, func: F) -> Self
    where
        F: Fn(&mut HostCallContext<'_>, &Arc<JsObject>, &Value, &[Value]) -> Result<Value, Value>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: Arc::from(name),
            length,
            func: Arc::new(func),
        }
    }
}

impl std::fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("length", &self.length)
            .finish()
    }
}

/// What a host function can do with the VM that called it
pub struct HostCallContext<'a> {
    vm: &'a mut Vm,
    backend: &'a mut dyn ExecutionBackend,
    is_construct: bool,
}

impl<'a> HostCallContext<'a> {
    /// Context for one host call
    pub fn new(vm: &'a mut Vm, backend: &'a mut dyn ExecutionBackend, is_construct: bool) -> Self {
        Self {
            vm,
            backend,
            is_construct,
        }
    }

    /// The VM
    pub fn vm(&mut self) -> &mut Vm {
        self.vm
    }

    /// Whether the call is `new f(...)`
    pub fn is_construct(&self) -> bool {
        self.is_construct
    }

    /// Call `func` and wait for it.
    ///
    /// An interrupt inside the callee surfaces as `Err`; the caller must
    /// return it, and the VM turns it back into an interrupt.
    pub fn call(&mut self, func: &Value, this: Value, args: &[Value]) -> Result<Value, Value> {
        match self.vm.call(self.backend, func, this, args) {
            Ok(completion) => self.settle(completion),
            Err(VmError::NotCallable(what)) => {
                Err(self.error(ErrorKind::TypeError, &format!("{what} is not a function")))
            }
            Err(err) => Err(self.error(ErrorKind::Error, &err.to_string())),
        }
    }

    /// Run global or eval code with the global scope
    pub fn execute(&mut self, code_block: &Arc<CodeBlock>) -> Result<Value, Value> {
        let completion = self.vm.execute(self.backend, code_block);
        self.settle(completion)
    }

    fn settle(&mut self, completion: Completion) -> Result<Value, Value> {
        match completion {
            Completion::Normal(value) => Ok(value),
            Completion::Throw(exception) => Err(exception.value),
            Completion::Interrupted(reason) => {
                self.vm.set_pending_interrupt(reason);
                Err(Value::Undefined)
            }
        }
    }

    /// New error object of `kind`, for returning as `Err`
    pub fn error(&self, kind: ErrorKind, message: &str) -> Value {
        Value::Object(self.vm.new_error(kind, message))
    }
}
