//! Activations and `arguments` objects
//!
//! Both alias the registers of a live call frame. When the frame goes
//! away (return, unwind, interrupt) they are torn off: the aliased
//! registers are copied into storage the object owns, so closures and
//! escaped `arguments` objects keep working.

use std::sync::Arc;

use crate::code_block::CodeBlock;
use crate::register_file::RegisterFile;
use crate::value::Value;

/// Where an activation or `arguments` object reads its registers
#[derive(Debug, Clone)]
pub enum FrameStorage {
    /// Aliases the frame whose base is `base`
    Live {
        /// Frame base in the register file
        base: usize,
    },
    /// Copy of the parameter and variable registers
    TornOff(Vec<Value>),
}

/// Variable object of a function that needs a full scope chain
#[derive(Debug)]
pub struct ActivationData {
    code_block: Arc<CodeBlock>,
    storage: FrameStorage,
}

impl ActivationData {
    /// Activation over the live frame at `base`
    pub fn new(code_block: Arc<CodeBlock>, base: usize) -> Self {
        Self {
            code_block,
            storage: FrameStorage::Live { base },
        }
    }

    /// Code block whose frame this is
    pub fn code_block(&self) -> &Arc<CodeBlock> {
        &self.code_block
    }

    /// Whether the frame has been copied out
    pub fn is_torn_off(&self) -> bool {
        matches!(self.storage, FrameStorage::TornOff(_))
    }

    fn torn_off_index(&self, register: i32) -> usize {
        (register + self.code_block.num_parameters() as i32) as usize
    }

    /// Read a parameter or variable register
    pub fn read(&self, registers: &RegisterFile, register: i32) -> Value {
        match &self.storage {
            FrameStorage::Live { base } => registers.slot(RegisterFile::absolute(*base, register)).clone(),
            FrameStorage::TornOff(values) => values
                .get(self.torn_off_index(register))
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Write a parameter or variable register
    pub fn write(&mut self, registers: &mut RegisterFile, register: i32, value: Value) {
        let index = self.torn_off_index(register);
        match &mut self.storage {
            FrameStorage::Live { base } => {
                registers.set_slot(RegisterFile::absolute(*base, register), value)
            }
            FrameStorage::TornOff(values) => {
                if index < values.len() {
                    values[index] = value;
                }
            }
        }
    }

    /// Copy the frame's parameters and variables out of the register file
    pub fn tear_off(&mut self, registers: &RegisterFile) {
        let FrameStorage::Live { base } = self.storage else {
            return;
        };
        let num_parameters = self.code_block.num_parameters() as i32;
        let num_vars = self.code_block.num_vars() as i32;
        let values = (-num_parameters..num_vars)
            .map(|register| registers.slot(RegisterFile::absolute(base, register)).clone())
            .collect();
        self.storage = FrameStorage::TornOff(values);
    }

    /// Named variable lookup through the code block's symbol table
    pub fn get_symbol(&self, registers: &RegisterFile, name: &str) -> Option<Value> {
        let slot = self.code_block.symbol(name)?;
        Some(self.read(registers, slot.register))
    }

    /// Named variable store; `None` if the name is not a variable here.
    /// Stores to read-only variables are ignored.
    pub fn put_symbol(&mut self, registers: &mut RegisterFile, name: &str, value: Value) -> Option<()> {
        let slot = self.code_block.symbol(name)?;
        if !slot.read_only {
            self.write(registers, slot.register, value);
        }
        Some(())
    }
}

/// Indexed view of a call's arguments
#[derive(Debug)]
pub struct ArgumentsData {
    count: usize,
    num_parameters: u32,
    storage: FrameStorage,
    extra: Vec<Value>,
}

impl ArgumentsData {
    /// Arguments of the live frame at `base`. `count` excludes `this`;
    /// `extra` holds arguments beyond the declared parameters.
    pub fn new(count: usize, num_parameters: u32, base: usize, extra: Vec<Value>) -> Self {
        Self {
            count,
            num_parameters,
            storage: FrameStorage::Live { base },
            extra,
        }
    }

    /// `arguments.length` at creation
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no arguments were passed
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Declared parameters, without `this`
    fn declared(&self) -> usize {
        self.num_parameters.saturating_sub(1) as usize
    }

    fn parameter_register(&self, index: usize) -> i32 {
        index as i32 + 1 - self.num_parameters as i32
    }

    /// `arguments[index]`
    pub fn get(&self, registers: &RegisterFile, index: usize) -> Option<Value> {
        if index >= self.count {
            return None;
        }
        if index >= self.declared() {
            return self.extra.get(index - self.declared()).cloned();
        }
        Some(match &self.storage {
            FrameStorage::Live { base } => registers
                .slot(RegisterFile::absolute(*base, self.parameter_register(index)))
                .clone(),
            FrameStorage::TornOff(values) => values[index].clone(),
        })
    }

    /// `arguments[index] = value`; `false` if `index` is out of range
    pub fn set(&mut self, registers: &mut RegisterFile, index: usize, value: Value) -> bool {
        if index >= self.count {
            return false;
        }
        let declared = self.declared();
        if index >= declared {
            self.extra[index - declared] = value;
            return true;
        }
        let register = self.parameter_register(index);
        match &mut self.storage {
            FrameStorage::Live { base } => {
                registers.set_slot(RegisterFile::absolute(*base, register), value)
            }
            FrameStorage::TornOff(values) => values[index] = value,
        }
        true
    }

    /// Copy the aliased parameters out of the register file
    pub fn tear_off(&mut self, registers: &RegisterFile) {
        let FrameStorage::Live { base } = self.storage else {
            return;
        };
        let aliased = self.count.min(self.declared());
        let values = (0..aliased)
            .map(|i| {
                registers
                    .slot(RegisterFile::absolute(base, self.parameter_register(i)))
                    .clone()
            })
            .collect();
        self.storage = FrameStorage::TornOff(values);
    }

    /// Whether the frame has been copied out
    pub fn is_torn_off(&self) -> bool {
        matches!(self.storage, FrameStorage::TornOff(_))
    }
}
