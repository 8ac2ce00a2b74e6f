//! Fer Compiler
//!
//! Source text goes in, a heap-allocated top-level function comes out:
//! the scanner produces tokens on demand, and the single-pass Pratt
//! compiler emits bytecode straight into the function under construction.
//! There is no AST.
//!
//! ```ignore
//! let mut heap = Heap::new();
//! let function = fer_compiler::compile(source, &mut heap, &roots, &options)?;
//! ```
//!
//! The `roots` callback exists for the collector: compiling allocates
//! (functions, interned strings), and if an allocation crosses the GC
//! threshold the compiler marks its own chain of in-progress functions
//! plus whatever roots the embedder supplies.

pub mod compiler;
pub mod scanner;

pub use compiler::{CompileError, CompileOptions, compile};
pub use scanner::{Scanner, Token, TokenKind};
