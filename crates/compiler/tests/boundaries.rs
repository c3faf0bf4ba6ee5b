//! Overflow checks at the exact limits the compiler and VM enforce: the
//! constant pool, parameter/argument counts, exception handler depth, and
//! call-frame depth.

use ember_runtime::{InterpretResult, VmConfig};

fn run(source: &str) -> InterpretResult {
    emberc::run(source.as_bytes(), VmConfig::default())
}

#[test]
fn constant_pool_overflow_is_a_compile_error() {
    let mut source = String::new();
    for i in 0..300 {
        source.push_str(&format!("var v{i} = {i}.5;\n"));
    }
    match run(&source) {
        InterpretResult::CompileError(errors) => {
            assert!(!errors.is_empty());
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn too_many_function_parameters_is_a_compile_error() {
    let params: Vec<String> = (0..256).map(|i| format!("p{i}")).collect();
    let source = format!("fun f({}) {{ return 0; }}", params.join(", "));
    match run(&source) {
        InterpretResult::CompileError(errors) => {
            assert!(errors.iter().any(|e| e.message.contains("255 parameters")));
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn too_many_call_arguments_is_a_compile_error() {
    let args: Vec<String> = (0..256).map(|i| i.to_string()).collect();
    let source = format!("fun f() {{ return 0; }}\nf({});", args.join(", "));
    match run(&source) {
        InterpretResult::CompileError(errors) => {
            assert!(errors.iter().any(|e| e.message.contains("255 arguments")));
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
}

#[test]
fn seventeenth_exception_handler_is_a_runtime_error() {
    let mut source = String::new();
    for _ in 0..17 {
        source.push_str("try {\n");
    }
    source.push_str("throw Exception(\"deep\");\n");
    for _ in 0..17 {
        source.push_str("} finally {}\n");
    }
    match run(&source) {
        InterpretResult::RuntimeError(err) => {
            assert!(err.message.contains("exception handlers"), "unexpected message: {}", err.message);
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn deep_recursion_overflows_the_call_stack() {
    let source = r#"
        fun recurse(n) {
            if (n <= 0) return 0;
            return 1 + recurse(n - 1);
        }
        print recurse(200);
    "#;
    match run(source) {
        InterpretResult::RuntimeError(err) => {
            assert!(err.message.contains("stack overflow"), "unexpected message: {}", err.message);
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
}
