//! Crate root: wires together the compilation pipeline.
//!
//! - `lexer` turns source text into tokens on demand.
//! - `parser` checks syntax and types and drives `codegen` as it recognises
//!   each construct; `symbols` (backed by `hashtable`) tracks declared names.
//! - `jasmin` renders the compiled program as JVM assembly; `vm` runs it.
//! - `driver` reads files, writes the `.j` output and calls the assembler.
//! - `error` centralises the diagnostics shared by every stage.

pub mod codegen;
pub mod driver;
pub mod error;
pub mod hashtable;
pub mod jasmin;
pub mod lexer;
pub mod parser;
pub mod symbols;
pub mod token;
pub mod valtype;
pub mod vm;

pub use codegen::Program;
pub use error::{CompileError, CompileResult};

/// Compile a source string into instruction buffers.
pub fn compile(source: &str) -> CompileResult<Program> {
  parser::parse(source)
}

/// Compile a source string into Jasmin assembly text.
pub fn generate_assembly(source: &str) -> CompileResult<String> {
  let program = compile(source)?;
  Ok(jasmin::render(&program))
}
