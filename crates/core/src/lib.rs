//! Ember Core: the value, object, and heap model shared by the compiler and
//! the virtual machine.
//!
//! # Modules
//!
//! - `value`: the tagged `Value` sum and its equality/truthiness/printing
//!   rules.
//! - `object`: heap object payloads (strings, functions, closures, classes,
//!   instances, ...).
//! - `table`: the open-addressed hash table backing globals, fields, and
//!   methods.
//! - `chunk`: a compiled function body -- bytecode, constants, line map.
//! - `opcode`: the bytecode instruction set.
//! - `heap`: the object arena, string interner, and GC mark/sweep mechanics.
//! - `gc`: the collector's four-phase orchestration over a `Heap`.

pub mod chunk;
pub mod gc;
pub mod heap;
pub mod object;
pub mod opcode;
pub mod table;
pub mod value;

pub use chunk::Chunk;
pub use heap::Heap;
pub use object::{
    Method, NativeFn, NativeOutcome, Obj, ObjArray, ObjBoundMethod, ObjClass, ObjClosure,
    ObjFunction, ObjInstance, ObjKind, ObjNative, ObjString, ObjUpvalue, UpvalueState,
};
pub use opcode::OpCode;
pub use table::Table;
pub use value::{format_number, format_value, values_equal, ObjHandle, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_gives_identity_equal_handles() {
        let mut heap = Heap::new();
        let a = heap.intern(b"hello");
        let b = heap.intern(b"hello");
        assert_eq!(a, b);
        let c = heap.intern(b"world");
        assert_ne!(a, c);
    }

    #[test]
    fn table_respects_load_factor() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        for i in 0..200 {
            let key = heap.intern(format!("key{i}").as_bytes());
            table.set(&heap, key, Value::Number(i as f64));
        }
        assert!(table.len() as f64 <= table.capacity() as f64 * 0.75 + 1.0);
        for i in 0..200 {
            let key = heap.intern(format!("key{i}").as_bytes());
            assert_eq!(table.get(&heap, key), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn table_tombstone_then_reinsert() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let key = heap.intern(b"x");
        table.set(&heap, key, Value::Number(1.0));
        assert!(table.delete(&heap, key));
        assert_eq!(table.get(&heap, key), None);
        table.set(&heap, key, Value::Number(2.0));
        assert_eq!(table.get(&heap, key), Some(Value::Number(2.0)));
    }

    #[test]
    fn chunk_line_lookup_is_monotonic() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Nil, 1);
        chunk.write_op(OpCode::Pop, 2);
        chunk.write_op(OpCode::Pop, 5);
        assert_eq!(chunk.line_of(0), 1);
        assert_eq!(chunk.line_of(1), 1);
        assert_eq!(chunk.line_of(2), 2);
        assert_eq!(chunk.line_of(3), 5);
    }

    #[test]
    fn unreachable_objects_are_collected() {
        let mut heap = Heap::new();
        let garbage = heap.intern(b"garbage");
        assert_eq!(heap.live_count(), 1);
        gc::collect(&mut heap, |_heap| {
            // no roots: everything is garbage
        });
        let _ = garbage;
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn gc_keeps_marked_roots() {
        let mut heap = Heap::new();
        let kept = heap.intern(b"kept");
        let _garbage = heap.intern(b"garbage");
        gc::collect(&mut heap, |heap| heap.mark_handle(kept));
        assert_eq!(heap.live_count(), 1);
        assert_eq!(heap.string_bytes(kept), b"kept");
    }

    #[test]
    fn gc_is_idempotent_with_no_new_allocations() {
        let mut heap = Heap::new();
        let kept = heap.intern(b"kept");
        gc::collect(&mut heap, |heap| heap.mark_handle(kept));
        let after_first = heap.live_count();
        gc::collect(&mut heap, |heap| heap.mark_handle(kept));
        assert_eq!(heap.live_count(), after_first);
    }

    #[test]
    fn boxed_number_equals_bare_number() {
        let mut heap = Heap::new();
        let name = heap.intern(b"Number");
        let class = heap.insert(Obj::Class(ObjClass::new(name)));
        let boxed = heap.insert(Obj::Instance(ObjInstance {
            class,
            this_: Value::Number(3.0),
            fields: Table::new(),
        }));
        assert!(values_equal(&heap, Value::Obj(boxed), Value::Number(3.0)));
    }

    #[test]
    fn truthiness_matches_spec() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
    }
}
