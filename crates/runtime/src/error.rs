//! Interpreter Error Types
//!
//! Compile errors carry the diagnostics the compiler collected; runtime
//! errors carry the message plus the formatted call trace. Both propagate
//! as values so embedders (the CLI, tests) decide where they get printed.

pub use fer_compiler::CompileError;

/// A runtime failure: the message plus one `[line L] in name` entry per
/// active call frame, innermost first.
#[derive(Debug)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<String>,
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        for line in &self.trace {
            write!(f, "\n{}", line)?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}

/// What `interpret` can come back with. The CLI maps these onto its exit
/// codes (65 and 70).
#[derive(Debug)]
pub enum InterpretError {
    Compile(CompileError),
    Runtime(RuntimeError),
}

impl std::fmt::Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::Compile(e) => write!(f, "{}", e),
            InterpretError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for InterpretError {}

impl From<CompileError> for InterpretError {
    fn from(e: CompileError) -> Self {
        InterpretError::Compile(e)
    }
}

impl From<RuntimeError> for InterpretError {
    fn from(e: RuntimeError) -> Self {
        InterpretError::Runtime(e)
    }
}
