//! Instruction words

use serde::{Deserialize, Serialize};

use crate::error::{BytecodeError, Result};
use crate::opcode::{OpcodeId, OpcodeTable};

/// One fixed-width word of a linked instruction stream.
///
/// The opcode word of an instruction at offset `o` is followed by
/// `length(op) - 1` operand words that only the dispatch for that opcode
/// interprets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    /// Opcode tag, resolved through an [`OpcodeTable`]
    Opcode(u32),
    /// Operand value
    Operand(i32),
}

impl Instruction {
    /// Operand payload.
    ///
    /// # Panics
    ///
    /// Panics on an opcode word. Streams are validated at load time, so this
    /// only fires on a broken invariant.
    #[inline]
    pub fn operand(self) -> i32 {
        match self {
            Instruction::Operand(value) => value,
            Instruction::Opcode(tag) => panic!("expected operand word, found opcode tag {tag}"),
        }
    }

    /// Opcode tag, if this is an opcode word
    #[inline]
    pub fn tag(self) -> Option<u32> {
        match self {
            Instruction::Opcode(tag) => Some(tag),
            Instruction::Operand(_) => None,
        }
    }
}

/// Symbolic instruction word as produced by a bytecode generator.
///
/// Serialized untagged: opcodes are mnemonic strings, operands are numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Word {
    /// Symbolic opcode
    Op(OpcodeId),
    /// Operand value
    Operand(i32),
}

impl From<OpcodeId> for Word {
    fn from(op: OpcodeId) -> Self {
        Word::Op(op)
    }
}

impl From<i32> for Word {
    fn from(value: i32) -> Self {
        Word::Operand(value)
    }
}

/// Translate symbolic words into tagged instructions
pub fn link(words: &[Word], table: &OpcodeTable) -> Vec<Instruction> {
    words
        .iter()
        .map(|word| match *word {
            Word::Op(op) => Instruction::Opcode(table.tag(op)),
            Word::Operand(value) => Instruction::Operand(value),
        })
        .collect()
}

/// Translate tagged instructions back into symbolic words
pub fn unlink(instructions: &[Instruction], table: &OpcodeTable) -> Result<Vec<Word>> {
    instructions
        .iter()
        .map(|instruction| match *instruction {
            Instruction::Opcode(tag) => table
                .decode(tag)
                .map(Word::Op)
                .ok_or(BytecodeError::InvalidOpcode(tag)),
            Instruction::Operand(value) => Ok(Word::Operand(value)),
        })
        .collect()
}

/// Iterate `(offset, opcode)` over instruction boundaries of symbolic code.
///
/// Stops at the first word that is not an opcode.
pub fn boundaries(words: &[Word]) -> impl Iterator<Item = (usize, OpcodeId)> + '_ {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let Some(Word::Op(op)) = words.get(offset) else {
            return None;
        };
        let at = offset;
        offset += op.length();
        Some((at, *op))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_with_shuffled_table() {
        let words = vec![
            Word::Op(OpcodeId::Enter),
            Word::Op(OpcodeId::Ret),
            Word::Operand(0),
        ];
        let table = OpcodeTable::shuffled(7);
        let linked = link(&words, &table);
        assert_eq!(linked[0], Instruction::Opcode(table.tag(OpcodeId::Enter)));
        assert_eq!(linked[2].operand(), 0);
        assert_eq!(unlink(&linked, &table).unwrap(), words);
    }

    #[test]
    fn test_word_json_shape() {
        let words: Vec<Word> = serde_json::from_str(r#"["add", 0, -3, -2]"#).unwrap();
        assert_eq!(words[0], Word::Op(OpcodeId::Add));
        assert_eq!(words[2], Word::Operand(-3));
    }

    #[test]
    fn test_boundaries() {
        let words = vec![
            Word::Op(OpcodeId::Enter),
            Word::Op(OpcodeId::Mov),
            Word::Operand(0),
            Word::Operand(1),
            Word::Op(OpcodeId::Ret),
            Word::Operand(0),
        ];
        let offsets: Vec<_> = boundaries(&words).map(|(offset, _)| offset).collect();
        assert_eq!(offsets, vec![0, 1, 4]);
    }

    #[test]
    #[should_panic(expected = "expected operand word")]
    fn test_operand_on_opcode_panics() {
        Instruction::Opcode(3).operand();
    }
}
