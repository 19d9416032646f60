//! Bytecode to pre-decoded op translation.
//!
//! Each instruction boundary becomes one [`JitOp`] with its operands read
//! out of the instruction stream, identifiers resolved and jump targets
//! kept absolute. Opcodes without a specialized form become
//! [`JitOp::Interpret`].

use std::sync::Arc;

use marten_vm_bytecode::OpcodeId;
use marten_vm_core::CodeBlock;

/// Integer arithmetic with an overflow guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntArith {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
}

impl IntArith {
    /// `None` when the result leaves int32 or would be negative zero
    #[inline]
    pub fn apply(self, a: i32, b: i32) -> Option<i32> {
        match self {
            IntArith::Add => a.checked_add(b),
            IntArith::Sub => a.checked_sub(b),
            IntArith::Mul => a.checked_mul(b).filter(|&r| r != 0 || (a >= 0 && b >= 0)),
        }
    }
}

/// Comparison producing a boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    /// `<` on int32 operands
    Less,
    /// `<=` on int32 operands
    LessEq,
    /// `===` on any operands
    StrictEq,
    /// `!==` on any operands
    NStrictEq,
}

/// One pre-decoded instruction
#[derive(Debug, Clone)]
pub enum JitOp {
    /// Reset locals to `undefined`
    Enter {
        /// Locals to reset
        num_vars: u32,
    },
    /// Register copy
    Mov {
        /// Destination
        dst: i32,
        /// Source
        src: i32,
    },
    /// Guarded int32 arithmetic
    Arith {
        /// Operation
        kind: IntArith,
        /// Destination
        dst: i32,
        /// Left operand
        lhs: i32,
        /// Right operand
        rhs: i32,
    },
    /// Comparison into a register
    Compare {
        /// Comparison
        kind: Compare,
        /// Destination
        dst: i32,
        /// Left operand
        lhs: i32,
        /// Right operand
        rhs: i32,
    },
    /// Guarded in-place int32 increment or decrement
    Increment {
        /// Register updated in place
        register: i32,
        /// `1` or `-1`
        delta: i32,
    },
    /// Unconditional jump
    Jump {
        /// Absolute target
        target: usize,
        /// Loop back-edge; polls the interrupt flag
        back_edge: bool,
    },
    /// Jump on truthiness
    Branch {
        /// Tested register
        cond: i32,
        /// Jump when truthiness equals this
        when: bool,
        /// Absolute target
        target: usize,
        /// Loop back-edge; polls the interrupt flag
        back_edge: bool,
    },
    /// Jump on an int32 `<`
    BranchLess {
        /// Left operand
        lhs: i32,
        /// Right operand
        rhs: i32,
        /// Jump when `lhs < rhs` equals this
        when: bool,
        /// Absolute target
        target: usize,
        /// Loop back-edge; polls the interrupt flag
        back_edge: bool,
    },
    /// Property read with a patchable single-structure fast path
    GetById {
        /// Destination
        dst: i32,
        /// Base object
        base: i32,
        /// Property name
        ident: Arc<str>,
        /// Structure stub index
        stub: usize,
    },
    /// Property write through the inline cache
    PutById {
        /// Base object
        base: i32,
        /// Property name
        ident: Arc<str>,
        /// Stored value
        value: i32,
        /// Structure stub index
        stub: usize,
    },
    /// Global variable read through its resolve cache
    ResolveGlobal {
        /// Destination
        dst: i32,
        /// Variable name
        ident: Arc<str>,
        /// Global resolve site index
        site: usize,
    },
    /// Call through a call link site
    Call {
        /// Destination of the result
        dst: i32,
        /// Callee
        func: i32,
        /// First register of the `this` plus arguments window
        first: i32,
        /// Window size including `this`
        argc: i32,
        /// Call link index
        link: usize,
    },
    /// Leave the frame
    Return {
        /// Returned register
        value: i32,
    },
    /// No compiled form; always bails out
    Interpret(OpcodeId),
}

impl JitOp {
    /// Whether the op runs without the interpreter's help
    pub fn is_native(&self) -> bool {
        !matches!(self, JitOp::Interpret(_))
    }

    /// Jump target, if the op has one
    pub fn target(&self) -> Option<usize> {
        match self {
            JitOp::Jump { target, .. }
            | JitOp::Branch { target, .. }
            | JitOp::BranchLess { target, .. } => Some(*target),
            _ => None,
        }
    }
}

/// Translate the instruction `op` at `offset` of `code_block`
/// Loop back-edges; only these feed the hotness counter
pub fn is_back_edge(op: OpcodeId) -> bool {
    matches!(op, OpcodeId::Loop | OpcodeId::LoopIfTrue | OpcodeId::LoopIfLess)
}

pub fn translate(code_block: &CodeBlock, offset: usize, op: OpcodeId) -> JitOp {
    let instructions = code_block.instructions();
    let operand = |i: usize| instructions[offset + i].operand();
    let target = |i: usize| operand(i) as usize;
    let ident = |i: usize| Arc::clone(code_block.identifier(operand(i) as usize));

    match op {
        OpcodeId::Enter => JitOp::Enter {
            num_vars: code_block.num_vars(),
        },
        OpcodeId::Mov => JitOp::Mov {
            dst: operand(1),
            src: operand(2),
        },
        OpcodeId::Add | OpcodeId::Sub | OpcodeId::Mul => JitOp::Arith {
            kind: match op {
                OpcodeId::Add => IntArith::Add,
                OpcodeId::Sub => IntArith::Sub,
                _ => IntArith::Mul,
            },
            dst: operand(1),
            lhs: operand(2),
            rhs: operand(3),
        },
        OpcodeId::Less | OpcodeId::LessEq | OpcodeId::StrictEq | OpcodeId::NStrictEq => JitOp::Compare {
            kind: match op {
                OpcodeId::Less => Compare::Less,
                OpcodeId::LessEq => Compare::LessEq,
                OpcodeId::StrictEq => Compare::StrictEq,
                _ => Compare::NStrictEq,
            },
            dst: operand(1),
            lhs: operand(2),
            rhs: operand(3),
        },
        OpcodeId::PreInc | OpcodeId::PreDec => JitOp::Increment {
            register: operand(1),
            delta: if op == OpcodeId::PreInc { 1 } else { -1 },
        },
        OpcodeId::Jmp | OpcodeId::Loop => JitOp::Jump {
            target: target(1),
            back_edge: is_back_edge(op),
        },
        OpcodeId::JTrue | OpcodeId::JFalse | OpcodeId::LoopIfTrue => JitOp::Branch {
            cond: operand(1),
            when: op != OpcodeId::JFalse,
            target: target(2),
            back_edge: is_back_edge(op),
        },
        OpcodeId::JLess | OpcodeId::JNLess | OpcodeId::LoopIfLess => JitOp::BranchLess {
            lhs: operand(1),
            rhs: operand(2),
            when: op != OpcodeId::JNLess,
            target: target(3),
            back_edge: is_back_edge(op),
        },
        OpcodeId::GetById => JitOp::GetById {
            dst: operand(1),
            base: operand(2),
            ident: ident(3),
            stub: operand(4) as usize,
        },
        OpcodeId::PutById => JitOp::PutById {
            base: operand(1),
            ident: ident(2),
            value: operand(3),
            stub: operand(4) as usize,
        },
        OpcodeId::ResolveGlobal => JitOp::ResolveGlobal {
            dst: operand(1),
            ident: ident(2),
            site: operand(3) as usize,
        },
        OpcodeId::Call => JitOp::Call {
            dst: operand(1),
            func: operand(2),
            first: operand(3),
            argc: operand(4),
            link: operand(5) as usize,
        },
        OpcodeId::Ret | OpcodeId::End => JitOp::Return { value: operand(1) },
        other => JitOp::Interpret(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_arith_guards() {
        assert_eq!(IntArith::Add.apply(2, 3), Some(5));
        assert_eq!(IntArith::Add.apply(i32::MAX, 1), None);
        assert_eq!(IntArith::Sub.apply(i32::MIN, 1), None);
        assert_eq!(IntArith::Mul.apply(-4, 5), Some(-20));
        assert_eq!(IntArith::Mul.apply(1 << 16, 1 << 16), None);
    }

    #[test]
    fn negative_zero_product_is_rejected() {
        assert_eq!(IntArith::Mul.apply(0, 7), Some(0));
        assert_eq!(IntArith::Mul.apply(0, -7), None);
        assert_eq!(IntArith::Mul.apply(-7, 0), None);
    }
}
