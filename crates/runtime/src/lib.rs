//! Fer Runtime
//!
//! The virtual machine that executes compiled Fer bytecode, plus the
//! native library it installs into the global environment.
//!
//! ```ignore
//! let mut vm = Vm::new(VmOptions::default());
//! vm.interpret("print 1 + 2;")?;
//! ```
//!
//! One `Vm` per embedding: it owns the heap, the stacks, and the global
//! tables, so a REPL just keeps calling `interpret` on the same instance.

pub mod error;
mod natives;
pub mod vm;

pub use error::{CompileError, InterpretError, RuntimeError};
pub use vm::{FRAMES_MAX, NativeFn, STACK_MAX, Vm, VmOptions};
