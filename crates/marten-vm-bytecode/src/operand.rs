//! Register operands and their classification

use serde::{Deserialize, Serialize};

/// Register operand.
///
/// Parameters (including `this`) use negative indices, locals start at 0,
/// then come the constant registers, then temporaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Register(pub i32);

/// Classification of a register index within one code block's frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// `this` or a declared parameter
    Parameter,
    /// Declared variable
    Local,
    /// Constant pool entry with the given pool index
    Constant(usize),
    /// Scratch register
    Temporary,
}

impl Register {
    /// Create a new register
    #[inline]
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    /// Get register index
    #[inline]
    pub const fn index(self) -> i32 {
        self.0
    }

    /// Register holding parameter `n` (0 is `this`) of a frame with
    /// `num_parameters` parameters
    #[inline]
    pub const fn parameter(n: u32, num_parameters: u32) -> Self {
        Self(n as i32 - num_parameters as i32)
    }

    /// Register holding constant pool entry `index`
    #[inline]
    pub const fn constant(index: u32, num_vars: u32) -> Self {
        Self((num_vars + index) as i32)
    }

    /// Classify using only the frame bounds
    #[inline]
    pub const fn kind(self, num_vars: u32, num_constants: u32) -> RegisterKind {
        let index = self.0;
        if index < 0 {
            RegisterKind::Parameter
        } else if (index as u32) < num_vars {
            RegisterKind::Local
        } else if (index as u32) < num_vars + num_constants {
            RegisterKind::Constant(index as usize - num_vars as usize)
        } else {
            RegisterKind::Temporary
        }
    }
}

impl From<i32> for Register {
    fn from(index: i32) -> Self {
        Self(index)
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}
