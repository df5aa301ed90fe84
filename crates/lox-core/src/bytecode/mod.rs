//! Bytecode core for Lox: opcodes, chunk format, disassembler.
//! Re-export pour usage simple ailleurs.

pub mod chunk;
pub mod disasm;
pub mod ops;

pub use chunk::{Chunk, ConstPool, LinePair, LineTable};
pub use ops::{OpCode, SHORT_CONSTANT_LIMIT};
