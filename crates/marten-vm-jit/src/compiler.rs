//! Baseline compiler: code block to [`CompiledCode`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use marten_vm_bytecode::OpcodeTable;
use marten_vm_core::CodeBlock;

use crate::translator::{self, JitOp};

/// Share of instructions that must translate natively, in percent
const MIN_NATIVE_PERCENT: usize = 50;

const NO_BOUNDARY: u32 = u32::MAX;

/// Errors produced by the baseline compiler.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// An instruction word that should start an instruction does not.
    #[error("no instruction boundary at pc {pc}")]
    NoInstructionBoundary {
        /// Offending offset
        pc: usize,
    },

    /// Jump target is not an instruction boundary of the code block.
    #[error("invalid jump target {target} from pc {pc} (len={instruction_count})")]
    InvalidJumpTarget {
        /// Jumping instruction
        pc: usize,
        /// Absolute target
        target: usize,
        /// Instruction words in the block
        instruction_count: usize,
    },

    /// Too little of the block has a compiled form to be worth running.
    #[error("only {native} of {total} instructions compile natively")]
    Unprofitable {
        /// Natively compiled instructions
        native: usize,
        /// All instructions
        total: usize,
    },
}

/// One compiled instruction
#[derive(Debug, Clone)]
pub struct CompiledOp {
    /// Bytecode offset of the instruction
    pub offset: usize,
    /// Offset of the following instruction
    pub next: usize,
    /// Pre-decoded operation
    pub op: JitOp,
}

/// Pre-decoded form of a code block, attached as its backend data
#[derive(Debug)]
pub struct CompiledCode {
    ops: Vec<CompiledOp>,
    /// Bytecode offset to index in `ops`
    index: Vec<u32>,
    native: usize,
    bailouts: AtomicU32,
}

impl CompiledCode {
    /// Compiled code attached to `code_block`, if it is ours
    pub fn attached(code_block: &CodeBlock) -> Option<Arc<CompiledCode>> {
        code_block.compiled_code()?.downcast::<CompiledCode>().ok()
    }

    /// Op starting at bytecode offset `pc`
    #[inline]
    pub fn at(&self, pc: usize) -> Option<&CompiledOp> {
        match self.index.get(pc) {
            Some(&i) if i != NO_BOUNDARY => self.ops.get(i as usize),
            _ => None,
        }
    }

    /// All ops in bytecode order
    pub fn ops(&self) -> &[CompiledOp] {
        &self.ops
    }

    /// Number of ops with a native form
    pub fn native_count(&self) -> usize {
        self.native
    }

    /// Count a guard failure; returns the running total
    pub fn record_bailout(&self) -> u32 {
        self.bailouts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Guard failures so far
    pub fn bailouts(&self) -> u32 {
        self.bailouts.load(Ordering::Relaxed)
    }
}

/// Translate every instruction of `code_block`.
///
/// Fails when the stream is malformed or when too few instructions have a
/// compiled form.
pub fn compile(code_block: &CodeBlock, opcodes: &OpcodeTable) -> Result<CompiledCode, JitError> {
    let instructions = code_block.instructions();
    let mut ops = Vec::new();
    let mut index = vec![NO_BOUNDARY; instructions.len()];

    let mut offset = 0;
    while offset < instructions.len() {
        let op = instructions[offset]
            .tag()
            .and_then(|tag| opcodes.decode(tag))
            .ok_or(JitError::NoInstructionBoundary { pc: offset })?;
        let next = offset + op.length();
        index[offset] = ops.len() as u32;
        ops.push(CompiledOp {
            offset,
            next,
            op: translator::translate(code_block, offset, op),
        });
        offset = next;
    }

    for compiled in &ops {
        if let Some(target) = compiled.op.target() {
            if index.get(target).is_none_or(|&i| i == NO_BOUNDARY) {
                return Err(JitError::InvalidJumpTarget {
                    pc: compiled.offset,
                    target,
                    instruction_count: instructions.len(),
                });
            }
        }
    }

    let native = ops.iter().filter(|compiled| compiled.op.is_native()).count();
    if native * 100 < ops.len() * MIN_NATIVE_PERCENT {
        return Err(JitError::Unprofitable {
            native,
            total: ops.len(),
        });
    }

    Ok(CompiledCode {
        ops,
        index,
        native,
        bailouts: AtomicU32::new(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_vm_bytecode::{BytecodeBuilder, ConstantValue, OpcodeId};
    use marten_vm_core::UnitOwner;

    fn link(builder: BytecodeBuilder) -> CodeBlock {
        CodeBlock::link(UnitOwner::new(builder.finish().unwrap()), &OpcodeTable::identity())
    }

    /// `for (i = 0; i < 10; ++i) {}`
    fn counting_loop() -> CodeBlock {
        let mut b = BytecodeBuilder::program(1);
        let i = b.local(0);
        let zero = b.constant(ConstantValue::Int32(0));
        let ten = b.constant(ConstantValue::Int32(10));
        b.enter();
        b.mov(i, zero);
        let top = b.here();
        b.emit(OpcodeId::PreInc, &[i.into()]);
        b.emit(OpcodeId::LoopIfLess, &[i.into(), ten.into(), top.into()]);
        b.end(i);
        link(b)
    }

    #[test]
    fn one_op_per_instruction_boundary() {
        let code_block = counting_loop();
        let code = compile(&code_block, &OpcodeTable::identity()).unwrap();
        let names: Vec<_> = code.ops().iter().map(|c| format!("{:?}", c.op)).collect();
        assert_eq!(code.ops().len(), 5, "{names:?}");
        assert_eq!(code.native_count(), 5);

        for compiled in code.ops() {
            assert_eq!(code.at(compiled.offset).unwrap().offset, compiled.offset);
        }
        // Operand words are not boundaries.
        assert!(code.at(code.ops()[1].offset + 1).is_none());
    }

    #[test]
    fn loop_target_is_absolute() {
        let code_block = counting_loop();
        let code = compile(&code_block, &OpcodeTable::identity()).unwrap();
        let increment = code.ops()[2].offset;
        let JitOp::BranchLess { target, back_edge, when, .. } = &code.ops()[3].op else {
            panic!("expected a branch, got {:?}", code.ops()[3].op);
        };
        assert_eq!(*target, increment);
        assert!(*back_edge);
        assert!(*when);
    }

    #[test]
    fn permuted_tags_decode_the_same() {
        let unit = {
            let mut b = BytecodeBuilder::program(1);
            let i = b.local(0);
            let one = b.constant(ConstantValue::Int32(1));
            b.enter();
            b.binary(OpcodeId::Add, i, one, one);
            b.end(i);
            b.finish().unwrap()
        };
        let opcodes = OpcodeTable::shuffled(7);
        let code_block = CodeBlock::link(UnitOwner::new(unit), &opcodes);
        let code = compile(&code_block, &opcodes).unwrap();
        assert!(matches!(code.ops()[1].op, JitOp::Arith { .. }));
    }

    #[test]
    fn mostly_unsupported_block_is_unprofitable() {
        let mut b = BytecodeBuilder::program(1);
        let o = b.local(0);
        b.enter();
        for _ in 0..4 {
            b.new_object(o);
        }
        b.end(o);
        let error = compile(&link(b), &OpcodeTable::identity()).unwrap_err();
        assert!(matches!(error, JitError::Unprofitable { native: 2, total: 6 }));
    }

    #[test]
    fn bailouts_accumulate() {
        let code = compile(&counting_loop(), &OpcodeTable::identity()).unwrap();
        assert_eq!(code.record_bailout(), 1);
        assert_eq!(code.record_bailout(), 2);
        assert_eq!(code.bailouts(), 2);
    }
}
