//! Heap object payloads.
//!
//! Every heap-allocated thing the language can produce -- strings,
//! functions, closures, upvalues, classes, instances, bound methods,
//! natives, arrays -- is a variant of [`Obj`]. [`Heap`](crate::heap::Heap)
//! owns the arena; objects never hold raw pointers to each other, only
//! [`ObjHandle`]s.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::{ObjHandle, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
    Native,
    Array,
}

#[derive(Debug)]
pub struct ObjString {
    pub bytes: Box<[u8]>,
    pub hash: u32,
}

#[derive(Debug)]
pub struct ObjFunction {
    pub arity: u8,
    pub upvalue_count: u8,
    pub chunk: Chunk,
    /// `None` for the implicit top-level script function.
    pub name: Option<ObjHandle>,
}

#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjHandle,
    pub upvalues: Vec<ObjHandle>,
}

#[derive(Debug)]
pub enum UpvalueState {
    /// Index into the VM's value stack; the upvalue is still "open".
    Open(usize),
    /// The value has been moved into the upvalue's own storage.
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

/// A method or initializer, as stored in a class's method table: either a
/// user-defined closure/function or a host-supplied native (used by the
/// reserved wrapper classes).
pub type Method = Value;

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjHandle,
    pub superclass: Option<ObjHandle>,
    pub initializer: Option<Method>,
    pub methods: Table,
    pub static_methods: Table,
    pub static_fields: Table,
}

impl ObjClass {
    pub fn new(name: ObjHandle) -> Self {
        ObjClass {
            name,
            superclass: None,
            initializer: None,
            methods: Table::new(),
            static_methods: Table::new(),
            static_fields: Table::new(),
        }
    }
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjHandle,
    /// Self-reference (`Value::Obj` pointing back at this instance) for a
    /// normal instance, or a boxed primitive for `Number`/`Boolean`/`String`/
    /// `Array` wrapper instances.
    pub this_: Value,
    pub fields: Table,
}

#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: Value,
}

/// Outcome of a native call: a return value, a thrown exception instance, or
/// a non-local exit request (`exit(n)`). Keeping this separate from `Result`
/// lets the VM distinguish "exception to propagate" from "fatal, jump to the
/// embedder's exit trampoline" without natives needing a `&mut Vm`.
#[derive(Debug)]
pub enum NativeOutcome {
    Value(Value),
    Throw(Value),
    Exit(i32),
}

/// `this_or_receiver` holds the receiver for wrapper-class methods/
/// initializers (mirroring the "implicit" out-slot of the source VM, which
/// doubles as `this` when the native is invoked as a method) and is `Nil`
/// for plain free functions like `clock`.
pub type NativeFn = fn(heap: &mut crate::heap::Heap, this_or_receiver: Value, args: &[Value]) -> NativeOutcome;

pub struct ObjNative {
    pub name: ObjHandle,
    /// -1 means variadic.
    pub arity: i32,
    pub function: NativeFn,
}

impl std::fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjNative").field("arity", &self.arity).finish()
    }
}

#[derive(Debug)]
pub struct ObjArray {
    pub items: Vec<Value>,
}

#[derive(Debug)]
pub enum Obj {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    Native(ObjNative),
    Array(ObjArray),
}

impl Obj {
    pub fn kind(&self) -> ObjKind {
        match self {
            Obj::String(_) => ObjKind::String,
            Obj::Function(_) => ObjKind::Function,
            Obj::Closure(_) => ObjKind::Closure,
            Obj::Upvalue(_) => ObjKind::Upvalue,
            Obj::Class(_) => ObjKind::Class,
            Obj::Instance(_) => ObjKind::Instance,
            Obj::BoundMethod(_) => ObjKind::BoundMethod,
            Obj::Native(_) => ObjKind::Native,
            Obj::Array(_) => ObjKind::Array,
        }
    }

    /// Rough byte footprint used to drive the GC's allocation threshold
    /// (`bytesAllocated`). Not exact down to the allocator
    /// byte, but monotonic in the object's real size.
    pub fn heap_size(&self) -> usize {
        let base = std::mem::size_of::<Obj>();
        base + match self {
            Obj::String(s) => s.bytes.len(),
            Obj::Function(f) => f.chunk.code.len() + f.chunk.constants.len() * std::mem::size_of::<Value>(),
            Obj::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjHandle>(),
            Obj::Upvalue(_) => 0,
            Obj::Class(c) => c.methods.capacity() * 24 + c.static_methods.capacity() * 24,
            Obj::Instance(i) => i.fields.capacity() * 24,
            Obj::BoundMethod(_) => 0,
            Obj::Native(_) => 0,
            Obj::Array(a) => a.items.capacity() * std::mem::size_of::<Value>(),
        }
    }

    pub fn as_string(&self) -> Option<&ObjString> {
        match self {
            Obj::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&ObjFunction> {
        match self {
            Obj::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut ObjFunction> {
        match self {
            Obj::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ObjClosure> {
        match self {
            Obj::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ObjClass> {
        match self {
            Obj::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self) -> Option<&mut ObjClass> {
        match self {
            Obj::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&ObjInstance> {
        match self {
            Obj::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut ObjInstance> {
        match self {
            Obj::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_upvalue(&self) -> Option<&ObjUpvalue> {
        match self {
            Obj::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_upvalue_mut(&mut self) -> Option<&mut ObjUpvalue> {
        match self {
            Obj::Upvalue(u) => Some(u),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ObjArray> {
        match self {
            Obj::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut ObjArray> {
        match self {
            Obj::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_native(&self) -> Option<&ObjNative> {
        match self {
            Obj::Native(n) => Some(n),
            _ => None,
        }
    }
}
