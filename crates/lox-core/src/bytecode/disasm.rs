//! disasm.rs — Désassembleur "lisible humain" pour le bytecode Lox.
//!
//! Deux niveaux :
//!  - `disassemble_instruction` : une instruction décodée + l'offset suivant
//!    (aussi utilisé par la trace d'exécution de la VM)
//!  - `disassemble_chunk` / `disassemble_function` : listing complet, avec
//!    colonne de lignes (`|` quand la ligne ne change pas), constantes
//!    résolues, et récursion dans les fonctions du pool
//!
//! Aucune dépendance externe : pure std.

use std::fmt::Write as _;

use crate::bytecode::chunk::Chunk;
use crate::bytecode::ops::OpCode;
use crate::value::{LoxFunction, Value};

/// Décode l'instruction à `offset`. Retourne la ligne de listing (sans
/// retour chariot) et l'offset de l'instruction suivante.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut out = String::new();
    let _ = write!(out, "{offset:04} ");

    if chunk.lines().same_as_previous(offset as u32) {
        out.push_str("   | ");
    } else {
        let line = chunk.lines().line_for(offset as u32).unwrap_or(0);
        let _ = write!(out, "{line:4} ");
    }

    let Ok(op) = OpCode::try_from(chunk.code[offset]) else {
        let _ = write!(out, "Unknown opcode {}", chunk.code[offset]);
        return (out, offset + 1);
    };

    use OpCode::*;
    let next = match op {
        Constant | GetGlobal | DefineGlobal | SetGlobal => {
            constant_instruction(&mut out, op, chunk, offset)
        }
        ConstantLong => constant_long_instruction(&mut out, chunk, offset),
        GetLocal | SetLocal | Call => byte_instruction(&mut out, op, chunk, offset),
        Jump | JumpIfFalse => jump_instruction(&mut out, op, 1, chunk, offset),
        Loop => jump_instruction(&mut out, op, -1, chunk, offset),
        _ => {
            let _ = write!(out, "{}", op.mnemonic());
            offset + 1
        }
    };
    (out, next)
}

/// Listing complet d'un chunk.
pub fn disassemble_chunk(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");
    let mut offset = 0;
    while offset < chunk.len() {
        let (line, next) = disassemble_instruction(chunk, offset);
        let _ = writeln!(out, "{line}");
        offset = next;
    }
    out
}

/// Listing d'une fonction et, récursivement, de toutes les fonctions de son
/// pool de constantes.
pub fn disassemble_function(function: &LoxFunction) -> String {
    let mut out = disassemble_chunk(&function.chunk, &function.to_string());
    for (_, value) in function.chunk.constants().iter() {
        if let Value::Fun(inner) = value {
            out.push('\n');
            out.push_str(&disassemble_function(inner));
        }
    }
    out
}

fn constant_preview(chunk: &Chunk, idx: u32) -> String {
    match chunk.constants().get(idx) {
        Some(value) => value.to_string(),
        None => "<invalid>".to_string(),
    }
}

fn constant_instruction(out: &mut String, op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let idx = u32::from(chunk.code[offset + 1]);
    let _ = write!(out, "{:<16} {:4} '{}'", op.mnemonic(), idx, constant_preview(chunk, idx));
    offset + 2
}

fn constant_long_instruction(out: &mut String, chunk: &Chunk, offset: usize) -> usize {
    let idx = (u32::from(chunk.code[offset + 1]) << 16)
        | (u32::from(chunk.code[offset + 2]) << 8)
        | u32::from(chunk.code[offset + 3]);
    let _ = write!(
        out,
        "{:<16} {:4} '{}'",
        OpCode::ConstantLong.mnemonic(),
        idx,
        constant_preview(chunk, idx)
    );
    offset + 4
}

fn byte_instruction(out: &mut String, op: OpCode, chunk: &Chunk, offset: usize) -> usize {
    let slot = chunk.code[offset + 1];
    let _ = write!(out, "{:<16} {:4}", op.mnemonic(), slot);
    offset + 2
}

fn jump_instruction(out: &mut String, op: OpCode, sign: i64, chunk: &Chunk, offset: usize) -> usize {
    let jump = i64::from(chunk.read_u16(offset + 1));
    let target = offset as i64 + 3 + sign * jump;
    let _ = write!(out, "{:<16} {:4} -> {}", op.mnemonic(), offset, target);
    offset + 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Interner;

    #[test]
    fn lists_constants_and_same_line_marker() {
        let mut interner = Interner::new();
        let mut chunk = Chunk::new();
        chunk.write_constant(Value::Number(1.2), 1);
        chunk.write_constant(Value::Str(interner.intern("hi")), 1);
        chunk.write_op(OpCode::Return, 2);

        let listing = disassemble_chunk(&chunk, "test");
        assert!(listing.starts_with("== test ==\n"));
        assert!(listing.contains("OP_CONSTANT"));
        assert!(listing.contains("'1.2'"));
        assert!(listing.contains("'hi'"));
        // La deuxième instruction est sur la même ligne source que la première.
        assert!(listing.contains("   | "));
        assert!(listing.contains("OP_RETURN"));
    }

    #[test]
    fn jump_targets_are_resolved() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::JumpIfFalse, 1);
        chunk.write_byte(0, 1);
        chunk.write_byte(2, 1);
        chunk.write_op(OpCode::Pop, 1);
        chunk.write_op(OpCode::Pop, 1);

        let (line, next) = disassemble_instruction(&chunk, 0);
        assert_eq!(next, 3);
        assert!(line.contains("OP_JUMP_IF_FALSE"));
        assert!(line.contains("-> 5"));
    }
}
