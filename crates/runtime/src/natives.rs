//! Host-supplied native functions: the global free functions (`clock`,
//! `exit`, the reflective `*Field` family) and the reserved wrapper classes
//! `Number`/`Boolean`/`String`/`Array`/`Exception`.
//!
//! Every native here has the shape `fn(&mut Heap, Value, &[Value]) ->
//! NativeOutcome` -- no `&mut Vm` -- so `ember-core` can own the type and
//! `ember-runtime`'s VM stays the only thing that knows how to call one.

use ember_core::{
    format_value, Heap, NativeFn, NativeOutcome, Obj, ObjArray, ObjClass, ObjHandle, ObjInstance,
    ObjKind, ObjNative, Table, Value,
};

fn throw(heap: &mut Heap, message: impl Into<String>) -> NativeOutcome {
    NativeOutcome::Throw(make_exception(heap, &message.into()))
}

/// Swaps a class's method table out, lets `f` mutate it with an unaliased
/// `&Heap` available for hashing, then swaps it back. `Table::set`/`delete`
/// need `&Heap` to hash the key, which conflicts with holding `&mut Heap` to
/// reach the table in the first place -- this is how every write to a
/// heap-resident `Table` in this module resolves that.
fn with_class_methods(heap: &mut Heap, class: ObjHandle, f: impl FnOnce(&mut Table, &Heap)) {
    let mut table = match heap.get_mut(class) {
        Obj::Class(c) => std::mem::take(&mut c.methods),
        _ => return,
    };
    f(&mut table, heap);
    if let Obj::Class(c) = heap.get_mut(class) {
        c.methods = table;
    }
}

fn instance_set_field(heap: &mut Heap, inst: ObjHandle, key: ObjHandle, value: Value) {
    let mut fields = match heap.get_mut(inst) {
        Obj::Instance(i) => std::mem::take(&mut i.fields),
        _ => return,
    };
    fields.set(heap, key, value);
    if let Obj::Instance(i) = heap.get_mut(inst) {
        i.fields = fields;
    }
}

fn instance_delete_field(heap: &mut Heap, inst: ObjHandle, key: ObjHandle) {
    let mut fields = match heap.get_mut(inst) {
        Obj::Instance(i) => std::mem::take(&mut i.fields),
        _ => return,
    };
    fields.delete(heap, key);
    if let Obj::Instance(i) = heap.get_mut(inst) {
        i.fields = fields;
    }
}

fn instance_get_field(heap: &Heap, inst: ObjHandle, key: ObjHandle) -> Option<Value> {
    match heap.get(inst) {
        Obj::Instance(i) => i.fields.get(heap, key),
        _ => None,
    }
}

/// Builds an `Exception` instance with the given message field, using the
/// class the VM registered under its well-known name at startup.
pub fn make_exception(heap: &mut Heap, message: &str) -> Value {
    let class = heap.well_known("Exception").expect("Exception class registered at VM startup");
    let handle = heap.insert(Obj::Instance(ObjInstance { class, this_: Value::Nil, fields: Table::new() }));
    let self_value = Value::Obj(handle);
    if let Obj::Instance(inst) = heap.get_mut(handle) {
        inst.this_ = self_value;
    }
    let key = heap.intern(b"message");
    let msg = heap.intern(message.as_bytes());
    instance_set_field(heap, handle, key, Value::Obj(msg));
    self_value
}

fn raw_string(heap: &Heap, value: Value) -> Option<String> {
    match value {
        Value::Obj(h) if heap.kind_of(h) == ObjKind::String => {
            Some(String::from_utf8_lossy(heap.string_bytes(h)).into_owned())
        }
        _ => None,
    }
}

fn instance_handle(heap: &Heap, value: Value) -> Option<ObjHandle> {
    match value {
        Value::Obj(h) if heap.kind_of(h) == ObjKind::Instance => Some(h),
        _ => None,
    }
}

/// The handles of the five reserved classes, installed once per `Vm`.
pub struct WrapperClasses {
    pub number: ObjHandle,
    pub boolean: ObjHandle,
    pub string: ObjHandle,
    pub array: ObjHandle,
    pub exception: ObjHandle,
}

fn define_native(heap: &mut Heap, globals: &mut Table, name: &str, arity: i32, function: NativeFn) {
    let name_handle = heap.intern(name.as_bytes());
    let native = heap.insert(Obj::Native(ObjNative { name: name_handle, arity, function }));
    globals.set(heap, name_handle, Value::Obj(native));
}

fn install_class(
    heap: &mut Heap,
    globals: &mut Table,
    name: &str,
    init: NativeFn,
    methods: &[(&str, i32, NativeFn)],
) -> ObjHandle {
    let name_handle = heap.intern(name.as_bytes());
    let mut class = ObjClass::new(name_handle);
    let init_name = heap.intern(b"init");
    let init_native = heap.insert(Obj::Native(ObjNative { name: init_name, arity: -1, function: init }));
    class.initializer = Some(Value::Obj(init_native));
    let handle = heap.insert(Obj::Class(class));
    for (method_name, arity, function) in methods {
        let mname = heap.intern(method_name.as_bytes());
        let native = heap.insert(Obj::Native(ObjNative { name: mname, arity: *arity, function: *function }));
        with_class_methods(heap, handle, |table, heap| {
            table.set(heap, mname, Value::Obj(native));
        });
    }
    globals.set(heap, name_handle, Value::Obj(handle));
    handle
}

/// Installs the global free functions and the five reserved classes into
/// `globals`, returning their handles for the VM's auto-boxing path.
pub fn install(heap: &mut Heap, globals: &mut Table) -> WrapperClasses {
    define_native(heap, globals, "clock", 0, native_clock);
    define_native(heap, globals, "exit", -1, native_exit);
    define_native(heap, globals, "hasField", 2, native_has_field);
    define_native(heap, globals, "getField", 2, native_get_field);
    define_native(heap, globals, "setField", 3, native_set_field);
    define_native(heap, globals, "deleteField", 2, native_delete_field);

    let number = install_class(heap, globals, "Number", number_init, &[("toPrecision", 1, number_to_precision)]);
    let boolean = install_class(heap, globals, "Boolean", boolean_init, &[]);
    let string = install_class(heap, globals, "String", string_init, &[]);
    let array = install_class(
        heap,
        globals,
        "Array",
        array_init,
        &[("append", 1, array_append), ("pop", 0, array_pop)],
    );
    let exception = install_class(heap, globals, "Exception", exception_init, &[]);

    heap.register_well_known("Number", number);
    heap.register_well_known("Boolean", boolean);
    heap.register_well_known("String", string);
    heap.register_well_known("Array", array);
    heap.register_well_known("Exception", exception);

    WrapperClasses { number, boolean, string, array, exception }
}

// --- free functions ---------------------------------------------------

fn native_clock(_heap: &mut Heap, _this: Value, _args: &[Value]) -> NativeOutcome {
    let seconds = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    NativeOutcome::Value(Value::Number(seconds))
}

fn native_exit(heap: &mut Heap, _this: Value, args: &[Value]) -> NativeOutcome {
    match args.first().copied() {
        None => NativeOutcome::Exit(0),
        Some(Value::Number(n)) => NativeOutcome::Exit(n as i32),
        Some(_) => throw(heap, "exit() expects a number"),
    }
}

fn native_has_field(heap: &mut Heap, _this: Value, args: &[Value]) -> NativeOutcome {
    let (Some(inst), Some(name)) = (
        args.first().and_then(|v| instance_handle(heap, *v)),
        args.get(1).and_then(|v| raw_string(heap, *v)),
    ) else {
        return throw(heap, "hasField expects (instance, string)");
    };
    let key = heap.intern(name.as_bytes());
    NativeOutcome::Value(Value::Bool(instance_get_field(heap, inst, key).is_some()))
}

fn native_get_field(heap: &mut Heap, _this: Value, args: &[Value]) -> NativeOutcome {
    let (Some(inst), Some(name)) = (
        args.first().and_then(|v| instance_handle(heap, *v)),
        args.get(1).and_then(|v| raw_string(heap, *v)),
    ) else {
        return throw(heap, "getField expects (instance, string)");
    };
    let key = heap.intern(name.as_bytes());
    match instance_get_field(heap, inst, key) {
        Some(v) => NativeOutcome::Value(v),
        None => throw(heap, format!("undefined field '{name}'")),
    }
}

fn native_set_field(heap: &mut Heap, _this: Value, args: &[Value]) -> NativeOutcome {
    let (Some(inst), Some(name), Some(value)) = (
        args.first().and_then(|v| instance_handle(heap, *v)),
        args.get(1).and_then(|v| raw_string(heap, *v)),
        args.get(2).copied(),
    ) else {
        return throw(heap, "setField expects (instance, string, value)");
    };
    let key = heap.intern(name.as_bytes());
    instance_set_field(heap, inst, key, value);
    NativeOutcome::Value(value)
}

fn native_delete_field(heap: &mut Heap, _this: Value, args: &[Value]) -> NativeOutcome {
    let (Some(inst), Some(name)) = (
        args.first().and_then(|v| instance_handle(heap, *v)),
        args.get(1).and_then(|v| raw_string(heap, *v)),
    ) else {
        return throw(heap, "deleteField expects (instance, string)");
    };
    let key = heap.intern(name.as_bytes());
    instance_delete_field(heap, inst, key);
    NativeOutcome::Value(Value::Nil)
}

// --- Number -------------------------------------------------------------

fn number_init(heap: &mut Heap, this: Value, args: &[Value]) -> NativeOutcome {
    let Value::Obj(inst) = this else { return NativeOutcome::Value(Value::Nil) };
    let raw = match args.first().copied() {
        None => Value::Number(0.0),
        Some(v) => match v.unwrap_one_layer(heap) {
            n @ Value::Number(_) => n,
            Value::Obj(h) if heap.kind_of(h) == ObjKind::String => {
                let text = String::from_utf8_lossy(heap.string_bytes(h)).into_owned();
                match text.trim().parse::<f64>() {
                    Ok(n) => Value::Number(n),
                    Err(_) => return throw(heap, format!("cannot parse '{text}' as a number")),
                }
            }
            _ => return throw(heap, "Number() expects a number or a string"),
        },
    };
    if let Obj::Instance(i) = heap.get_mut(inst) {
        i.this_ = raw;
    }
    NativeOutcome::Value(Value::Nil)
}

fn number_to_precision(heap: &mut Heap, this: Value, args: &[Value]) -> NativeOutcome {
    let raw = match this {
        Value::Obj(inst) => match heap.get(inst) {
            Obj::Instance(i) => i.this_.as_number(),
            _ => None,
        },
        _ => None,
    };
    let Some(n) = raw else { return throw(heap, "toPrecision called on a non-number") };
    let digits = match args.first().and_then(|v| v.as_number()) {
        Some(d) if d >= 0.0 => d as usize,
        _ => return throw(heap, "toPrecision expects a non-negative digit count"),
    };
    let text = format!("{n:.digits$}");
    let handle = heap.intern(text.as_bytes());
    NativeOutcome::Value(Value::Obj(handle))
}

// --- Boolean --------------------------------------------------------------

fn boolean_init(heap: &mut Heap, this: Value, args: &[Value]) -> NativeOutcome {
    let Value::Obj(inst) = this else { return NativeOutcome::Value(Value::Nil) };
    let value = match args.first().copied() {
        None => Value::Bool(false),
        Some(v) => match v.unwrap_one_layer(heap) {
            Value::Nil => Value::Bool(false),
            b @ Value::Bool(_) => b,
            Value::Number(n) => Value::Bool(n != 0.0),
            Value::Obj(h) if heap.kind_of(h) == ObjKind::String => {
                let text = String::from_utf8_lossy(heap.string_bytes(h)).to_lowercase();
                match text.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => return throw(heap, format!("cannot parse '{text}' as a boolean")),
                }
            }
            _ => return throw(heap, "Boolean() expects nil, a number, a string, or a boolean"),
        },
    };
    if let Obj::Instance(i) = heap.get_mut(inst) {
        i.this_ = value;
    }
    NativeOutcome::Value(Value::Nil)
}

// --- String -----------------------------------------------------------

fn string_init(heap: &mut Heap, this: Value, args: &[Value]) -> NativeOutcome {
    let Value::Obj(inst) = this else { return NativeOutcome::Value(Value::Nil) };
    let text = match args.first().copied() {
        None => String::new(),
        Some(v) => format_value(heap, v.unwrap_one_layer(heap)),
    };
    let len = text.len() as f64;
    let string_handle = heap.intern(text.as_bytes());
    if let Obj::Instance(i) = heap.get_mut(inst) {
        i.this_ = Value::Obj(string_handle);
    }
    let key = heap.intern(b"length");
    instance_set_field(heap, inst, key, Value::Number(len));
    NativeOutcome::Value(Value::Nil)
}

// --- Array --------------------------------------------------------------

fn array_init(heap: &mut Heap, this: Value, args: &[Value]) -> NativeOutcome {
    let Value::Obj(inst) = this else { return NativeOutcome::Value(Value::Nil) };
    // With an existing array, wraps it in place -- the wrapper and the raw
    // array share one `Obj::Array`, so mutating through the wrapper (e.g. the
    // auto-boxing `Vm::promote_primitive` does for `fs.append(...)`) is
    // visible to every other binding still holding the raw array.
    let array_handle = match args.first().copied() {
        None => heap.insert(Obj::Array(ObjArray { items: Vec::new() })),
        Some(v) => match v.unwrap_one_layer(heap) {
            Value::Number(n) if n >= 0.0 => heap.insert(Obj::Array(ObjArray { items: vec![Value::Nil; n as usize] })),
            Value::Obj(h) if heap.kind_of(h) == ObjKind::Array => h,
            _ => return throw(heap, "Array() expects no argument, a non-negative count, or an array"),
        },
    };
    if let Obj::Instance(i) = heap.get_mut(inst) {
        i.this_ = Value::Obj(array_handle);
    }
    NativeOutcome::Value(Value::Nil)
}

fn array_backing(heap: &Heap, this: Value) -> Option<ObjHandle> {
    match this {
        Value::Obj(inst) => match heap.get(inst) {
            Obj::Instance(i) => match i.this_ {
                Value::Obj(h) if heap.kind_of(h) == ObjKind::Array => Some(h),
                _ => None,
            },
            _ => None,
        },
        _ => None,
    }
}

fn array_append(heap: &mut Heap, this: Value, args: &[Value]) -> NativeOutcome {
    let Some(&value) = args.first() else { return throw(heap, "append expects one argument") };
    let Some(arr) = array_backing(heap, this) else { return throw(heap, "append called on a non-array") };
    if let Obj::Array(a) = heap.get_mut(arr) {
        a.items.push(value);
    }
    NativeOutcome::Value(this)
}

fn array_pop(heap: &mut Heap, this: Value, _args: &[Value]) -> NativeOutcome {
    let Some(arr) = array_backing(heap, this) else { return throw(heap, "pop called on a non-array") };
    let popped = match heap.get_mut(arr) {
        Obj::Array(a) => a.items.pop(),
        _ => None,
    };
    match popped {
        Some(v) => NativeOutcome::Value(v),
        None => throw(heap, "pop called on an empty array"),
    }
}

// --- Exception ------------------------------------------------------------

fn exception_init(heap: &mut Heap, this: Value, args: &[Value]) -> NativeOutcome {
    let Value::Obj(inst) = this else { return NativeOutcome::Value(Value::Nil) };
    let message = args.first().copied().unwrap_or(Value::Nil);
    let key = heap.intern(b"message");
    instance_set_field(heap, inst, key, message);
    NativeOutcome::Value(Value::Nil)
}
