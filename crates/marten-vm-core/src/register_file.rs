//! Register file and call frames
//!
//! All frames share one value slab. A frame's registers are addressed
//! relative to its base: parameters (with `this` lowest) sit just below it,
//! locals and temporaries at and above it. Constant registers are never
//! stored in the slab; reads of the constant range go to the code block.

use std::sync::Arc;

use crate::code_block::CodeBlock;
use crate::error::InterruptReason;
use crate::object::{JsObject, ObjectKind};
use crate::scope::ScopeChain;
use crate::value::Value;

/// One activation record
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Executing code; `None` for a host function frame
    pub code_block: Option<Arc<CodeBlock>>,
    /// Absolute slot of register 0
    pub base: usize,
    /// Arguments passed, including `this`
    pub argument_count: usize,
    /// Function object being executed
    pub callee: Option<Arc<JsObject>>,
    /// Current scope chain
    pub scope: ScopeChain,
    /// Scopes pushed by `push_scope` in this frame
    pub local_scope_depth: u32,
    /// Offset of the next instruction to execute
    pub pc: usize,
    /// Caller register receiving the return value
    pub return_register: i32,
    /// Entered through `construct`
    pub is_construct: bool,
    /// `arguments` object, once created
    pub arguments: Option<Arc<JsObject>>,
    /// Activation, once created
    pub activation: Option<Arc<JsObject>>,
    /// Arguments beyond the declared parameters
    pub extra_arguments: Vec<Value>,
    /// Entered from the host rather than from a script call
    pub is_host_entry: bool,
    constants: (i32, i32),
}

impl CallFrame {
    /// Frame for script code
    pub fn script(
        code_block: Arc<CodeBlock>,
        base: usize,
        argument_count: usize,
        callee: Option<Arc<JsObject>>,
        scope: ScopeChain,
    ) -> Self {
        let start = code_block.num_vars() as i32;
        let end = start + code_block.num_constants() as i32;
        Self {
            code_block: Some(code_block),
            base,
            argument_count,
            callee,
            scope,
            local_scope_depth: 0,
            pc: 0,
            return_register: 0,
            is_construct: false,
            arguments: None,
            activation: None,
            extra_arguments: Vec::new(),
            is_host_entry: false,
            constants: (start, end),
        }
    }

    /// Frame for a host function call
    pub fn host(base: usize, argument_count: usize, callee: Arc<JsObject>) -> Self {
        Self {
            code_block: None,
            base,
            argument_count,
            callee: Some(callee),
            scope: ScopeChain::default(),
            local_scope_depth: 0,
            pc: 0,
            return_register: 0,
            is_construct: false,
            arguments: None,
            activation: None,
            extra_arguments: Vec::new(),
            is_host_entry: false,
            constants: (0, 0),
        }
    }

    /// Executing code block.
    ///
    /// # Panics
    ///
    /// Panics on a host frame.
    #[inline]
    pub fn code(&self) -> &Arc<CodeBlock> {
        match &self.code_block {
            Some(code_block) => code_block,
            None => panic!("host frame has no code block"),
        }
    }

    /// Registers the frame occupies at and above its base
    pub fn frame_size(&self) -> usize {
        self.code_block
            .as_ref()
            .map_or(0, |code_block| code_block.num_callee_registers() as usize)
    }

    /// Whether `register` lies in the constant range
    #[inline]
    pub fn is_constant(&self, register: i32) -> bool {
        register >= self.constants.0 && register < self.constants.1
    }
}

/// Value slab plus frame stack
#[derive(Debug)]
pub struct RegisterFile {
    slots: Vec<Value>,
    frames: Vec<CallFrame>,
    capacity: usize,
    max_depth: usize,
    high_water: usize,
}

impl RegisterFile {
    /// Register file holding at most `capacity` slots and `max_depth` frames
    pub fn new(capacity: usize, max_depth: usize) -> Self {
        Self {
            slots: Vec::new(),
            frames: Vec::new(),
            capacity,
            max_depth,
            high_water: 0,
        }
    }

    /// Absolute slot of `register` in the frame at `base`
    #[inline]
    pub fn absolute(base: usize, register: i32) -> usize {
        (base as isize + register as isize) as usize
    }

    /// Slot `index`
    #[inline]
    pub fn slot(&self, index: usize) -> &Value {
        &self.slots[index]
    }

    /// Overwrite slot `index`
    #[inline]
    pub fn set_slot(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
    }

    /// Grow the slab to at least `end` slots
    pub fn ensure(&mut self, end: usize) -> Result<(), InterruptReason> {
        if end > self.capacity {
            return Err(InterruptReason::StackExhausted);
        }
        if end > self.slots.len() {
            self.slots.resize(end, Value::Undefined);
        }
        self.high_water = self.high_water.max(end);
        Ok(())
    }

    /// Slot capacity limit
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most slots ever in use
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// First slot above the top frame
    pub fn next_free(&self) -> usize {
        self.frames
            .last()
            .map_or(0, |frame| frame.base + frame.frame_size())
    }

    /// Active frames, outermost first
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Number of active frames
    #[inline]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost frame
    #[inline]
    pub fn top(&self) -> &CallFrame {
        match self.frames.last() {
            Some(frame) => frame,
            None => panic!("no active call frame"),
        }
    }

    /// Innermost frame, mutably
    #[inline]
    pub fn top_mut(&mut self) -> &mut CallFrame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => panic!("no active call frame"),
        }
    }

    /// Push a frame and clear its locals and temporaries to `undefined`
    pub fn push_frame(&mut self, frame: CallFrame) -> Result<(), InterruptReason> {
        if self.frames.len() >= self.max_depth {
            return Err(InterruptReason::StackExhausted);
        }
        let end = frame.base + frame.frame_size();
        self.ensure(end)?;
        self.slots[frame.base..end].fill(Value::Undefined);
        self.frames.push(frame);
        Ok(())
    }

    /// Pop the innermost frame, tearing off its activation and arguments
    pub fn pop_frame(&mut self) -> Option<CallFrame> {
        let frame = self.frames.pop()?;
        self.tear_off(&frame);
        if self.frames.is_empty() {
            self.slots.clear();
        }
        Some(frame)
    }

    /// Copy a frame's escaped activation and arguments into owned storage
    pub fn tear_off(&self, frame: &CallFrame) {
        if let Some(activation) = &frame.activation {
            if let ObjectKind::Activation(data) = activation.kind() {
                data.write().tear_off(self);
            }
        }
        if let Some(arguments) = &frame.arguments {
            if let ObjectKind::Arguments(data) = arguments.kind() {
                data.write().tear_off(self);
            }
        }
    }

    /// Read `register` of the innermost frame
    #[inline]
    pub fn read(&self, register: i32) -> Value {
        let frame = self.top();
        if frame.is_constant(register) {
            return frame.code().get_constant(register);
        }
        self.slots[Self::absolute(frame.base, register)].clone()
    }

    /// Write `register` of the innermost frame
    #[inline]
    pub fn write(&mut self, register: i32, value: Value) {
        let index = Self::absolute(self.top().base, register);
        self.slots[index] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_block::UnitOwner;
    use marten_vm_bytecode::{BytecodeBuilder, ConstantValue, OpcodeTable};

    fn code_block(num_vars: u32, constant: i32) -> Arc<CodeBlock> {
        let mut b = BytecodeBuilder::function("f", 1, num_vars);
        let k = b.constant(ConstantValue::Int32(constant));
        b.ret(k);
        let unit = b.finish().unwrap();
        Arc::new(CodeBlock::link(UnitOwner::new(unit), &OpcodeTable::identity()))
    }

    #[test]
    fn test_constants_read_from_code_block() {
        let mut registers = RegisterFile::new(64, 8);
        let block = code_block(2, 41);
        registers
            .push_frame(CallFrame::script(block, 2, 2, None, ScopeChain::default()))
            .unwrap();
        assert_eq!(registers.read(2).as_int32(), Some(41));
        registers.write(0, Value::Int32(7));
        assert_eq!(registers.read(0).as_int32(), Some(7));
        assert_eq!(registers.slot(2).as_int32(), Some(7));
    }

    #[test]
    fn test_capacity_and_depth_limits() {
        let block = code_block(4, 0);
        let mut registers = RegisterFile::new(6, 8);
        let frame = CallFrame::script(Arc::clone(&block), 2, 2, None, ScopeChain::default());
        assert_eq!(registers.push_frame(frame), Err(InterruptReason::StackExhausted));

        let mut registers = RegisterFile::new(1024, 2);
        for _ in 0..2 {
            let base = registers.next_free() + 2;
            let frame = CallFrame::script(Arc::clone(&block), base, 2, None, ScopeChain::default());
            registers.push_frame(frame).unwrap();
        }
        let frame = CallFrame::script(block, 100, 2, None, ScopeChain::default());
        assert_eq!(registers.push_frame(frame), Err(InterruptReason::StackExhausted));
        assert_eq!(registers.depth(), 2);
    }

    #[test]
    fn test_pop_tears_off_activation() {
        let block = code_block(1, 0);
        let mut registers = RegisterFile::new(64, 8);
        let mut frame = CallFrame::script(Arc::clone(&block), 2, 2, None, ScopeChain::default());
        let activation = JsObject::new(
            crate::structure::Structure::root(),
            ObjectKind::Activation(parking_lot::RwLock::new(
                crate::activation::ActivationData::new(Arc::clone(&block), 2),
            )),
        );
        frame.activation = Some(Arc::clone(&activation));
        registers.ensure(2).unwrap();
        registers.set_slot(1, Value::Int32(5));
        registers.push_frame(frame).unwrap();
        registers.write(0, Value::string("local"));
        registers.pop_frame();

        let ObjectKind::Activation(data) = activation.kind() else {
            unreachable!()
        };
        let data = data.read();
        assert!(data.is_torn_off());
        assert_eq!(data.read(&registers, -1).as_int32(), Some(5));
        assert_eq!(data.read(&registers, 0).as_str(), Some("local"));
    }
}
