//! Ember Compiler: the scanner and single-pass bytecode compiler, plus the
//! top-level entry point that wires a compiled script into a fresh VM.

pub mod compiler;
pub mod scanner;

use ember_core::Heap;
use ember_runtime::{InterpretResult, Vm, VmConfig};

/// Compiles `source` and runs it to completion with the given configuration,
/// writing program output to stdout. On a compile failure, returns
/// `InterpretResult::CompileError` directly without ever constructing a VM.
pub fn run(source: &[u8], config: VmConfig) -> InterpretResult {
    let mut heap = Heap::new();
    match compiler::compile(source, &mut heap) {
        Ok(script) => {
            let mut vm = Vm::new(heap, config);
            vm.interpret_function(script)
        }
        Err(errors) => InterpretResult::CompileError(errors),
    }
}

/// Like [`run`], but writes program output into `sink` instead of stdout --
/// the hook integration tests use to capture `print` output deterministically.
pub fn run_with_output(
    source: &[u8],
    config: VmConfig,
    sink: Box<dyn std::io::Write>,
) -> InterpretResult {
    let mut heap = Heap::new();
    match compiler::compile(source, &mut heap) {
        Ok(script) => {
            let mut vm = Vm::with_output(heap, config, sink);
            vm.interpret_function(script)
        }
        Err(errors) => InterpretResult::CompileError(errors),
    }
}
