//! Error and result types crossing the compile/run boundary.
//!
//! Plain enums with `Display` impls, matching the rest of the corpus's
//! avoidance of `thiserror`/`anyhow`.

use std::fmt;

#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    pub at: String,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] Error at '{}': {}", self.line, self.at, self.message)
    }
}

/// A runtime error, already formatted with its frame trace.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub message: String,
    /// One entry per active frame at the moment of the error, innermost first.
    pub trace: Vec<String>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for line in &self.trace {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

/// The embedder-facing outcome of `interpret`.
#[derive(Debug, Clone)]
pub enum InterpretResult {
    Ok,
    Exit(i32),
    CompileError(Vec<CompileError>),
    RuntimeError(RuntimeError),
}

impl InterpretResult {
    /// Exit code an embedder CLI would use (`{0, n, 65, 70}`;
    /// `74` for I/O errors is assigned by the CLI itself, not here).
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretResult::Ok => 0,
            InterpretResult::Exit(code) => *code,
            InterpretResult::CompileError(_) => 65,
            InterpretResult::RuntimeError(_) => 70,
        }
    }
}
