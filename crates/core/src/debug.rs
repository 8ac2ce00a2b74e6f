//! Bytecode Disassembler
//!
//! Pretty-prints chunks one instruction per line:
//! `offset line OPCODE [operand]`. The offset a call returns is the start
//! of the next instruction, which is how callers walk variable-length
//! encodings like `CLOSURE`.

use std::fmt::Write;

use crate::chunk::{Chunk, OpCode};
use crate::heap::Heap;

/// Disassemble a whole chunk under a `== name ==` header.
pub fn disassemble_chunk(heap: &Heap, chunk: &Chunk, name: &str, out: &mut String) {
    let _ = writeln!(out, "== {} ==", name);
    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(heap, chunk, offset, out);
    }
}

/// Disassemble and print the chunk to stderr, away from program output.
pub fn dump_chunk(heap: &Heap, chunk: &Chunk, name: &str) {
    let mut out = String::new();
    disassemble_chunk(heap, chunk, name, &mut out);
    eprint!("{}", out);
}

/// Disassemble the instruction at `offset`; returns the offset of the next
/// instruction.
pub fn disassemble_instruction(heap: &Heap, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = write!(out, "{:04} ", offset);
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.lines[offset]);
    }

    let byte = chunk.code[offset];
    let Ok(op) = OpCode::try_from(byte) else {
        let _ = writeln!(out, "Unknown opcode {}", byte);
        return offset + 1;
    };

    match op {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::DefineGlobalPerm
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::GetSuper
        | OpCode::Class
        | OpCode::Method => constant_instruction(heap, name_of(op), chunk, offset, out),
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call
        | OpCode::List
        | OpCode::Dictionary => byte_instruction(name_of(op), chunk, offset, out),
        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(name_of(op), 1, chunk, offset, out),
        OpCode::Loop => jump_instruction(name_of(op), -1, chunk, offset, out),
        OpCode::Invoke | OpCode::SuperInvoke => {
            invoke_instruction(heap, name_of(op), chunk, offset, out)
        }
        OpCode::Closure => closure_instruction(heap, chunk, offset, out),
        _ => simple_instruction(name_of(op), offset, out),
    }
}

fn name_of(op: OpCode) -> &'static str {
    match op {
        OpCode::Constant => "CONSTANT",
        OpCode::Nil => "NIL",
        OpCode::True => "TRUE",
        OpCode::False => "FALSE",
        OpCode::Pop => "POP",
        OpCode::GetLocal => "GET_LOCAL",
        OpCode::SetLocal => "SET_LOCAL",
        OpCode::GetGlobal => "GET_GLOBAL",
        OpCode::DefineGlobal => "DEFINE_GLOBAL",
        OpCode::DefineGlobalPerm => "DEFINE_GLOBAL_PERM",
        OpCode::SetGlobal => "SET_GLOBAL",
        OpCode::GetUpvalue => "GET_UPVALUE",
        OpCode::SetUpvalue => "SET_UPVALUE",
        OpCode::GetProperty => "GET_PROPERTY",
        OpCode::SetProperty => "SET_PROPERTY",
        OpCode::GetSuper => "GET_SUPER",
        OpCode::Equal => "EQUAL",
        OpCode::Greater => "GREATER",
        OpCode::Less => "LESS",
        OpCode::Add => "ADD",
        OpCode::Subtract => "SUBTRACT",
        OpCode::Multiply => "MULTIPLY",
        OpCode::Divide => "DIVIDE",
        OpCode::Not => "NOT",
        OpCode::Negate => "NEGATE",
        OpCode::Print => "PRINT",
        OpCode::Jump => "JUMP",
        OpCode::JumpIfFalse => "JUMP_IF_FALSE",
        OpCode::Loop => "LOOP",
        OpCode::Call => "CALL",
        OpCode::Invoke => "INVOKE",
        OpCode::SuperInvoke => "SUPER_INVOKE",
        OpCode::Closure => "CLOSURE",
        OpCode::CloseUpvalue => "CLOSE_UPVALUE",
        OpCode::Return => "RETURN",
        OpCode::Class => "CLASS",
        OpCode::Inherit => "INHERIT",
        OpCode::Method => "METHOD",
        OpCode::List => "LIST",
        OpCode::Dictionary => "DICTIONARY",
        OpCode::GetItem => "GET_ITEM",
        OpCode::SetItem => "SET_ITEM",
    }
}

fn simple_instruction(name: &str, offset: usize, out: &mut String) -> usize {
    let _ = writeln!(out, "{}", name);
    offset + 1
}

fn byte_instruction(name: &str, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let slot = chunk.code[offset + 1];
    let _ = writeln!(out, "{:<16} {:4}", name, slot);
    offset + 2
}

fn constant_instruction(
    heap: &Heap,
    name: &str,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let constant = chunk.code[offset + 1];
    let value = heap.format_value(chunk.constants[constant as usize]);
    let _ = writeln!(out, "{:<16} {:4} '{}'", name, constant, value);
    offset + 2
}

fn invoke_instruction(
    heap: &Heap,
    name: &str,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let constant = chunk.code[offset + 1];
    let arg_count = chunk.code[offset + 2];
    let value = heap.format_value(chunk.constants[constant as usize]);
    let _ = writeln!(out, "{:<16} ({} args) {:4} '{}'", name, arg_count, constant, value);
    offset + 3
}

fn jump_instruction(name: &str, sign: i64, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]) as i64;
    let target = offset as i64 + 3 + sign * jump;
    let _ = writeln!(out, "{:<16} {:4} -> {}", name, offset, target);
    offset + 3
}

fn closure_instruction(heap: &Heap, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let mut offset = offset + 1;
    let constant = chunk.code[offset];
    offset += 1;
    let function_value = chunk.constants[constant as usize];
    let _ = writeln!(
        out,
        "{:<16} {:4} {}",
        "CLOSURE",
        constant,
        heap.format_value(function_value)
    );

    let upvalue_count = heap.as_function(function_value.as_object()).upvalue_count;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[offset];
        let index = chunk.code[offset + 1];
        let _ = writeln!(
            out,
            "{:04}      |                     {} {}",
            offset,
            if is_local == 1 { "local" } else { "upvalue" },
            index
        );
        offset += 2;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_constant_and_simple_shapes() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        let constant = chunk.add_constant(Value::number(1.2)) as u8;
        chunk.write_op(OpCode::Constant, 123);
        chunk.write(constant, 123);
        chunk.write_op(OpCode::Return, 123);

        let mut out = String::new();
        disassemble_chunk(&heap, &chunk, "test", &mut out);

        assert!(out.starts_with("== test ==\n"));
        assert!(out.contains("0000  123 CONSTANT            0 '1.2'"));
        // Same source line as the previous instruction prints a bar.
        assert!(out.contains("0002    | RETURN"));
    }

    #[test]
    fn test_jump_targets() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::JumpIfFalse, 1);
        chunk.write(0, 1);
        chunk.write(4, 1);
        let mut out = String::new();
        let next = disassemble_instruction(&heap, &chunk, 0, &mut out);
        assert_eq!(next, 3);
        assert!(out.contains("JUMP_IF_FALSE       0 -> 7"));
    }

    #[test]
    fn test_decoded_lengths_cover_the_chunk_exactly() {
        // Walking a chunk by decoded instruction lengths and re-copying each
        // span must reproduce the byte sequence exactly.
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::GetLocal, 1);
        chunk.write(3, 1);
        chunk.write_op(OpCode::Jump, 1);
        chunk.write(0, 1);
        chunk.write(1, 1);
        chunk.write_op(OpCode::Pop, 2);
        chunk.write_op(OpCode::Return, 2);

        let mut rebuilt = Vec::new();
        let mut offset = 0;
        let mut scratch = String::new();
        while offset < chunk.len() {
            let next = disassemble_instruction(&heap, &chunk, offset, &mut scratch);
            rebuilt.extend_from_slice(&chunk.code[offset..next]);
            offset = next;
        }
        assert_eq!(rebuilt, chunk.code);
    }
}
