//! End-to-end scenarios run through the full compile-then-interpret
//! pipeline, each checking both the reported outcome and the exact bytes
//! written by `print`.

use ember_runtime::{InterpretResult, VmConfig};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// A `Write` sink backed by a shared buffer, so the bytes written during
/// `run_with_output` (which takes ownership of the `Box<dyn Write>`) can
/// still be inspected afterward through the other handle on the same `Rc`.
#[derive(Clone)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl SharedBuf {
    fn new() -> Self {
        SharedBuf(Rc::new(RefCell::new(Vec::new())))
    }

    fn as_string(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("program output is valid UTF-8")
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().flush()
    }
}

fn run(source: &str) -> (InterpretResult, String) {
    let sink = SharedBuf::new();
    let result = emberc::run_with_output(source.as_bytes(), VmConfig::default(), Box::new(sink.clone()));
    (result, sink.as_string())
}

#[test]
fn arithmetic_precedence() {
    let (result, output) = run("print 1 + 2 * 3;");
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "7\n");
}

#[test]
fn closure_counter_keeps_private_state() {
    let source = r#"
        fun make() {
            var i = 0;
            fun next() {
                i = i + 1;
                return i;
            }
            return next;
        }
        var c = make();
        print c();
        print c();
        print c();
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "1\n2\n3\n");
}

#[test]
fn class_and_super_dispatch() {
    let source = r#"
        class A {
            greet() {
                print "A";
            }
        }
        class B < A {
            greet() {
                super.greet();
                print "B";
            }
        }
        B().greet();
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "A\nB\n");
}

#[test]
fn exception_caught_and_finally_still_runs() {
    let source = r#"
        try {
            throw Exception("boom");
        } catch (Exception as e) {
            print e.message;
        } finally {
            print "done";
        }
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "boom\ndone\n");
}

#[test]
fn for_loop_closures_capture_distinct_values() {
    let source = r#"
        var fs = [];
        for (var i = 0; i < 3; i = i + 1) {
            fs.append(|| i);
        }
        for (var k = 0; k < 3; k = k + 1) print fs[k]();
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "0\n1\n2\n");
}

#[test]
fn exit_reports_program_defined_code() {
    let (result, _) = run("exit(42);");
    match result {
        InterpretResult::Exit(code) => assert_eq!(code, 42),
        other => panic!("expected InterpretResult::Exit(42), got {other:?}"),
    }
    assert_eq!(result.exit_code(), 42);
}

#[test]
fn continue_inside_for_loop_preserves_body_mutation() {
    // A `continue` must still write the per-iteration shadow copy of the
    // loop variable back to the outer slot before looping, or a mutation
    // made earlier in the body is silently lost and the increment clause
    // acts on the loop's pre-mutation value instead.
    let source = r#"
        var out = "";
        for (var i = 0; i < 4; i = i + 1) {
            if (i == 1) {
                i = i + 10;
                continue;
            }
            out = out + i + ",";
        }
        print out;
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    // i=0 appends; i=1 is mutated to 11 and continues, so the increment
    // clause advances it to 12, which fails the condition and ends the loop.
    assert_eq!(output, "0,\n");
}

#[test]
fn break_inside_switch_does_not_leak_the_discriminant() {
    // If `break` inside a `switch` skipped popping the discriminant, the
    // leaked value would sit under every local declared afterward in the
    // same frame, shifting `after` one stack slot away from where the
    // compiler thinks it lives -- `return after` would read the leaked
    // discriminant (`2`) instead of the string.
    let source = r#"
        fun classify(n) {
            switch (n) {
                case 2: {
                    break;
                }
            }
            var after = "after";
            return after;
        }
        print classify(2);
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "after\n");
}

#[test]
fn catch_binding_survives_a_try_body_local() {
    // If the VM pushed the caught exception without first cutting the
    // stack back to the handler's own depth, `a` (still live on the stack
    // when `throw` runs) would end up sitting in the slot the compiler
    // assigned to `e`, and `e.message` would fail against a number instead
    // of the exception.
    let source = r#"
        try {
            var a = 1;
            throw Exception("x");
        } catch (Exception as e) {
            print e.message;
        }
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "x\n");
}

#[test]
fn array_auto_box_mutates_the_shared_backing_array() {
    // `xs.append(...)` auto-boxes the raw array `xs` through
    // `Vm::promote_primitive` -> the `Array` wrapper's `init`. If `init`
    // cloned the backing vector instead of wrapping the original handle,
    // the mutation would land on a throwaway copy and `xs` would still
    // print as empty afterward.
    let source = r#"
        var xs = [];
        xs.append(1);
        xs.append(2);
        print xs[0];
        print xs[1];
    "#;
    let (result, output) = run(source);
    assert!(matches!(result, InterpretResult::Ok));
    assert_eq!(output, "1\n2\n");
}
