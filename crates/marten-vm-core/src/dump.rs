//! Code block disassembly

use std::fmt::Write;

use marten_vm_bytecode::{OpcodeId, OpcodeTable, OperandKind, RegisterKind, SimpleJumpTable};

use crate::code_block::CodeBlock;
use crate::inline_cache::{CachedAccess, StubState};

impl CodeBlock {
    /// Human readable listing of the instructions and every side table
    pub fn dump(&self, opcodes: &OpcodeTable) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_dump(&mut out, opcodes);
        out
    }

    fn write_dump(&self, out: &mut String, opcodes: &OpcodeTable) -> std::fmt::Result {
        let instructions = self.instructions();
        let mut offset = 0;
        let mut count = 0;
        while offset < instructions.len() {
            let op = instructions[offset]
                .tag()
                .and_then(|tag| opcodes.decode(tag))
                .unwrap_or_else(|| panic!("no instruction boundary at {offset}"));
            count += 1;
            offset += op.length();
        }
        writeln!(
            out,
            "{} instructions; {} parameter(s); {} callee register(s)",
            count,
            self.num_parameters(),
            self.num_callee_registers()
        )?;
        if let Some(name) = self.name() {
            writeln!(out, "function {name}")?;
        }
        writeln!(out)?;

        let mut offset = 0;
        while offset < instructions.len() {
            let Some(op) = instructions[offset].tag().and_then(|tag| opcodes.decode(tag)) else {
                break;
            };
            self.write_instruction(out, offset, op)?;
            offset += op.length();
        }

        self.write_tables(out)
    }

    fn write_instruction(&self, out: &mut String, offset: usize, op: OpcodeId) -> std::fmt::Result {
        write!(out, "[{offset:4}] {:<22}", op.name())?;
        let instructions = self.instructions();
        for (i, kind) in op.operands().iter().enumerate() {
            let value = instructions[offset + 1 + i].operand();
            if i > 0 {
                out.push_str(", ");
            }
            match kind {
                OperandKind::Register => self.write_register(out, value)?,
                OperandKind::Identifier => {
                    write!(out, "id{value}({})", self.identifier(value as usize))?
                }
                OperandKind::Immediate => write!(out, "{value}")?,
                OperandKind::Target => write!(out, "->{value}")?,
                OperandKind::Function => write!(out, "f{value}")?,
                OperandKind::FunctionExpression => write!(out, "fe{value}")?,
                OperandKind::RegExp => {
                    let regexp = self.regexp(value as usize);
                    write!(out, "re{value}(/{}/{})", regexp.pattern, regexp.flags)?
                }
                OperandKind::UnexpectedConstant => {
                    write!(out, "k{value}({:?})", self.unexpected_constant(value as usize))?
                }
                OperandKind::StructureStub => write!(out, "stub{value}")?,
                OperandKind::GlobalResolve => write!(out, "global{value}")?,
                OperandKind::CallLink => write!(out, "link{value}")?,
                OperandKind::ImmediateTable
                | OperandKind::CharacterTable
                | OperandKind::StringTable => write!(out, "table{value}")?,
            }
        }
        writeln!(out)
    }

    fn write_register(&self, out: &mut String, register: i32) -> std::fmt::Result {
        match self.register_kind(register) {
            RegisterKind::Constant(_) => write!(out, "r{register}(={:?})", self.get_constant(register)),
            _ if register == self.this_register() => write!(out, "this"),
            _ => write!(out, "r{register}"),
        }
    }

    fn write_tables(&self, out: &mut String) -> std::fmt::Result {
        if !self.identifiers().is_empty() {
            writeln!(out, "\nIdentifiers:")?;
            for (i, name) in self.identifiers().iter().enumerate() {
                writeln!(out, "  id{i} = {name}")?;
            }
        }

        if !self.constants().is_empty() {
            writeln!(out, "\nConstants:")?;
            for (i, value) in self.constants().iter().enumerate() {
                writeln!(out, "   r{} = {value:?}", self.num_vars() as usize + i)?;
            }
        }

        if !self.unexpected_constants().is_empty() {
            writeln!(out, "\nUnexpected Constants:")?;
            for (i, value) in self.unexpected_constants().iter().enumerate() {
                writeln!(out, "  k{i} = {value:?}")?;
            }
        }

        if !self.regexps().is_empty() {
            writeln!(out, "\nRegExps:")?;
            for (i, regexp) in self.regexps().iter().enumerate() {
                writeln!(out, "  re{i} = /{}/{}", regexp.pattern, regexp.flags)?;
            }
        }

        if self.structure_stub_count() > 0 {
            writeln!(out, "\nStructures:")?;
            for i in 0..self.structure_stub_count() {
                let stub = self.structure_stub_info(i);
                let description = match stub.state() {
                    StubState::Unset => continue,
                    StubState::Monomorphic(access) => access.describe().to_string(),
                    StubState::Polymorphic(list) => {
                        let names: Vec<_> = list.iter().map(CachedAccess::describe).collect();
                        format!("polymorphic [{}]", names.join(", "))
                    }
                    StubState::Generic => "generic".to_string(),
                };
                writeln!(
                    out,
                    "  [{:4}] {description} (hits: {}, misses: {})",
                    stub.bytecode_offset,
                    stub.hits(),
                    stub.misses()
                )?;
            }
        }

        if !self.exception_handlers().is_empty() {
            writeln!(out, "\nException Handlers:")?;
            for (i, handler) in self.exception_handlers().iter().enumerate() {
                writeln!(
                    out,
                    "\t {}: {{ start: [{:4}] end: [{:4}] target: [{:4}] }}",
                    i + 1,
                    handler.start,
                    handler.end,
                    handler.target
                )?;
            }
        }

        write_simple_tables(out, "Immediate Switch Jump Tables", self.immediate_switch_jump_tables(), |key| {
            key.to_string()
        })?;
        write_simple_tables(out, "Character Switch Jump Tables", self.character_switch_jump_tables(), |key| {
            char::from_u32(key as u32).map_or_else(|| key.to_string(), |c| format!("{c:?}"))
        })?;

        if !self.string_switch_jump_tables().is_empty() {
            writeln!(out, "\nString Switch Jump Tables:")?;
            for (i, table) in self.string_switch_jump_tables().iter().enumerate() {
                writeln!(out, "  table{i} = {{")?;
                for (key, target) in table.sorted() {
                    writeln!(out, "\t\t{key:?} => {target:04}")?;
                }
                writeln!(out, "      }}")?;
            }
        }
        Ok(())
    }
}

fn write_simple_tables(
    out: &mut String,
    title: &str,
    tables: &[SimpleJumpTable],
    key_name: impl Fn(i32) -> String,
) -> std::fmt::Result {
    if tables.is_empty() {
        return Ok(());
    }
    writeln!(out, "\n{title}:")?;
    for (i, table) in tables.iter().enumerate() {
        writeln!(out, "  table{i} = {{")?;
        for (slot, target) in table.branches.iter().enumerate() {
            if let Some(target) = target {
                let key = table.min + slot as i32;
                writeln!(out, "\t\t{:>4} => {target:04}", key_name(key))?;
            }
        }
        writeln!(out, "      }}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use marten_vm_bytecode::{BytecodeBuilder, ConstantValue, OpcodeTable, Register};

    use crate::code_block::{CodeBlock, UnitOwner};

    fn sample() -> CodeBlock {
        let mut b = BytecodeBuilder::function("sample", 1, 1);
        let a = b.parameter(1);
        let one = b.constant(ConstantValue::Int32(1));
        let start = b.here();
        b.get_by_id(Register(0), a, "x");
        b.binary(marten_vm_bytecode::OpcodeId::Add, Register(0), Register(0), one);
        let end = b.here();
        let target = b.here();
        b.ret(Register(0));
        b.handler(start, end, target, 0);
        CodeBlock::link(UnitOwner::new(b.finish().unwrap()), &OpcodeTable::identity())
    }

    #[test]
    fn test_dump_layout() {
        let code_block = sample();
        let text = code_block.dump(&OpcodeTable::identity());
        assert!(text.starts_with("3 instructions; 2 parameter(s);"));
        assert!(text.contains("[   0] get_by_id"));
        assert!(text.contains("id0(x)"));
        assert!(text.contains("r1(=1)"));
        assert!(text.contains("Identifiers:\n  id0 = x"));
        assert!(text.contains("\t 1: { start: [   0] end: [   9] target: [   9] }"));
    }

    #[test]
    fn test_dump_reports_cache_state() {
        let code_block = Arc::new(sample());
        code_block
            .structure_stub_info(0)
            .install(crate::inline_cache::CachedAccess::GetArrayLength);
        let text = code_block.dump(&OpcodeTable::identity());
        assert!(text.contains("Structures:\n  [   0] get_array_length"));
    }
}
