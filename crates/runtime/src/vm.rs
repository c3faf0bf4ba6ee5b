//! The stack-based virtual machine: call frames, the opcode dispatch loop,
//! upvalue threading, class/instance/bound-method dispatch, primitive
//! auto-boxing, and exception propagation with `finally` semantics
//! semantics.

use std::io::Write;

use ember_core::{
    gc, values_equal, format_value, Heap, NativeOutcome, Obj, ObjArray,
    ObjBoundMethod, ObjClass, ObjClosure, ObjHandle, ObjInstance, ObjKind, ObjUpvalue, OpCode,
    Table, UpvalueState, Value,
};

use crate::config::VmConfig;
use crate::natives::{self, WrapperClasses};

/// A per-call activation record. `slot_base` is the stack index of the
/// callee itself (slot 0 relative to the frame is `this`/the function
/// value); arguments occupy `slot_base + 1 ..`.
struct Frame {
    closure: ObjHandle,
    ip: usize,
    slot_base: usize,
    handlers: Vec<ExceptionHandler>,
}

#[derive(Clone, Copy)]
struct ExceptionHandler {
    /// The interned name of the declared catch type. Interned strings are
    /// identity-equal, so matching a thrown instance's class chain against
    /// this needs no global lookup.
    class_name: ObjHandle,
    handler_addr: usize,
    finally_addr: Option<usize>,
    /// Stack height when the handler was pushed, i.e. before the try body's
    /// own locals. The compiler's catch/finally blocks start a fresh scope
    /// at this same depth, so the runtime stack has to be cut back to it
    /// before handing control to either one -- otherwise a try-body local
    /// still sitting above this height lands in the slot the catch binding
    /// (or a finally-block local) expects to own.
    stack_depth: usize,
}

enum StepResult {
    Continue,
    Finished,
}

/// What unwinds the dispatch loop out of normal instruction stepping: either
/// a thrown exception (to be matched against handler stacks) or the `exit()`
/// non-local jump.
enum Unwind {
    Exception(Value),
    Exit(i32),
}

enum RunOutcome {
    Ok,
    Exit(i32),
    RuntimeError(String),
}

pub struct Vm {
    pub heap: Heap,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Table,
    /// Sorted by descending target stack index, mirroring the source VM's
    /// singly linked open-upvalue list.
    open_upvalues: Vec<ObjHandle>,
    config: VmConfig,
    wrappers: WrapperClasses,
    /// Set by `propagate_exception` when a `finally` must run before an
    /// unmatched exception keeps propagating; consumed by `PropagateException`.
    pending_exception: Option<Value>,
    out: Box<dyn Write>,
}

impl Vm {
    /// Takes ownership of a `Heap` already populated by compilation (the
    /// top-level script function and everything its constant pools
    /// reference) and installs the native globals and wrapper classes into
    /// it.
    pub fn new(heap: Heap, config: VmConfig) -> Self {
        Self::with_output(heap, config, Box::new(std::io::stdout()))
    }

    pub fn with_output(mut heap: Heap, config: VmConfig, out: Box<dyn Write>) -> Self {
        heap.next_gc = config.initial_next_gc;
        let mut globals = Table::new();
        let wrappers = natives::install(&mut heap, &mut globals);
        Vm {
            heap,
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
            open_upvalues: Vec::new(),
            config,
            wrappers,
            pending_exception: None,
            out,
        }
    }

    pub fn exception_class(&self) -> ObjHandle {
        self.wrappers.exception
    }

    /// Wraps `function` in a zero-upvalue closure, installs it as the sole
    /// frame, and runs to completion.
    pub fn interpret_function(&mut self, function: ObjHandle) -> crate::error::InterpretResult {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        let closure = self.heap.insert(Obj::Closure(ObjClosure { function, upvalues: Vec::new() }));
        self.stack.push(Value::Obj(closure));
        self.frames.push(Frame { closure, ip: 0, slot_base: 0, handlers: Vec::new() });

        let span = tracing::info_span!("interpret");
        let _enter = span.enter();
        match self.run() {
            RunOutcome::Ok => crate::error::InterpretResult::Ok,
            RunOutcome::Exit(code) => crate::error::InterpretResult::Exit(code),
            RunOutcome::RuntimeError(full) => {
                let mut lines = full.lines();
                let message = lines.next().unwrap_or_default().to_string();
                let trace = lines.map(str::to_string).collect();
                crate::error::InterpretResult::RuntimeError(crate::error::RuntimeError { message, trace })
            }
        }
    }

    fn run(&mut self) -> RunOutcome {
        loop {
            if self.heap.needs_collect() {
                self.collect_garbage();
            }
            let byte = self.read_byte();
            let op = OpCode::from_byte(byte);
            match self.step(op) {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Finished) => return RunOutcome::Ok,
                Err(Unwind::Exit(code)) => return RunOutcome::Exit(code),
                Err(Unwind::Exception(exc)) => {
                    if let Err(message) = self.propagate_exception(exc) {
                        return RunOutcome::RuntimeError(message);
                    }
                }
            }
        }
    }

    fn step(&mut self, op: OpCode) -> Result<StepResult, Unwind> {
        match op {
            OpCode::Constant => {
                let v = self.read_constant();
                self.push(v);
            }
            OpCode::ConstantZero => {
                let v = self.chunk_constant(0);
                self.push(v);
            }
            OpCode::ConstantOne => {
                let v = self.chunk_constant(1);
                self.push(v);
            }
            OpCode::ConstantTwo => {
                let v = self.chunk_constant(2);
                self.push(v);
            }
            OpCode::Nil => self.push(Value::Nil),
            OpCode::True => self.push(Value::Bool(true)),
            OpCode::False => self.push(Value::Bool(false)),
            OpCode::Pop => {
                self.pop();
            }
            OpCode::Dup => {
                let v = *self.stack.last().expect("dup needs a value");
                self.push(v);
            }
            OpCode::GetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.current_frame().slot_base;
                self.push(self.stack[base + slot]);
            }
            OpCode::SetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.current_frame().slot_base;
                let v = *self.stack.last().expect("set local needs a value");
                self.stack[base + slot] = v;
            }
            OpCode::GetGlobal => {
                let name = self.read_constant_string_handle();
                match self.globals.get(&self.heap, name) {
                    Some(v) => self.push(v),
                    None => {
                        let text = self.name_text(name);
                        return Err(self.runtime_error(format!("undefined variable '{text}'")));
                    }
                }
            }
            OpCode::DefineGlobal => {
                let name = self.read_constant_string_handle();
                let v = self.pop();
                self.globals.set(&self.heap, name, v);
            }
            OpCode::SetGlobal => {
                let name = self.read_constant_string_handle();
                if !self.globals.contains(&self.heap, name) {
                    let text = self.name_text(name);
                    return Err(self.runtime_error(format!("undefined variable '{text}'")));
                }
                let v = *self.stack.last().expect("set global needs a value");
                self.globals.set(&self.heap, name, v);
            }
            OpCode::GetUpvalue => {
                let idx = self.read_byte() as usize;
                let closure = self.current_frame().closure;
                let up = self.heap.get(closure).as_closure().expect("closure frame").upvalues[idx];
                let value = match self.heap.get(up) {
                    Obj::Upvalue(u) => match u.state {
                        UpvalueState::Open(slot) => self.stack[slot],
                        UpvalueState::Closed(v) => v,
                    },
                    _ => unreachable!("upvalue handle"),
                };
                self.push(value);
            }
            OpCode::SetUpvalue => {
                let idx = self.read_byte() as usize;
                let closure = self.current_frame().closure;
                let up = self.heap.get(closure).as_closure().expect("closure frame").upvalues[idx];
                let v = *self.stack.last().expect("set upvalue needs a value");
                let open_slot = match self.heap.get(up) {
                    Obj::Upvalue(u) => match u.state {
                        UpvalueState::Open(slot) => Some(slot),
                        UpvalueState::Closed(_) => None,
                    },
                    _ => unreachable!("upvalue handle"),
                };
                match open_slot {
                    Some(slot) => self.stack[slot] = v,
                    None => {
                        if let Obj::Upvalue(u) = self.heap.get_mut(up) {
                            u.state = UpvalueState::Closed(v);
                        }
                    }
                }
            }
            OpCode::GetProperty => {
                let name = self.read_constant_string_handle();
                let receiver = self.pop();
                let value = self.get_property(receiver, name)?;
                self.push(value);
            }
            OpCode::SetProperty => {
                let name = self.read_constant_string_handle();
                let value = self.pop();
                let receiver = self.pop();
                self.set_property(receiver, name, value)?;
                self.push(value);
            }
            OpCode::GetIndex => {
                let index = self.pop();
                let target = self.pop();
                let value = self.index_get(target, index)?;
                self.push(value);
            }
            OpCode::SetIndex => {
                let value = self.pop();
                let index = self.pop();
                let target = self.pop();
                self.index_set(target, index, value)?;
                self.push(value);
            }
            OpCode::GetSuper => {
                let name = self.read_constant_string_handle();
                let value = self.get_super(name)?;
                self.push(value);
            }
            OpCode::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(values_equal(&self.heap, a, b)));
            }
            OpCode::Greater => self.numeric_compare(|a, b| a > b)?,
            OpCode::Less => self.numeric_compare(|a, b| a < b)?,
            OpCode::Add => self.op_add()?,
            OpCode::Subtract => self.numeric_binop(|a, b| a - b)?,
            OpCode::Multiply => self.numeric_binop(|a, b| a * b)?,
            OpCode::Divide => self.numeric_binop(|a, b| a / b)?,
            OpCode::Modulus => self.numeric_binop(|a, b| a % b)?,
            OpCode::Exponent => self.numeric_binop(|a, b| a.powf(b))?,
            OpCode::Not => {
                let v = self.pop();
                self.push(Value::Bool(!v.is_truthy()));
            }
            OpCode::Negate => {
                let v = self.pop();
                match v.unwrap_one_layer(&self.heap).as_number() {
                    Some(n) => self.push(Value::Number(-n)),
                    None => return Err(self.runtime_error("operand must be a number")),
                }
            }
            OpCode::Print => {
                let v = self.pop();
                let text = format_value(&self.heap, v);
                let _ = writeln!(self.out, "{text}");
            }
            OpCode::Jump => {
                let offset = self.read_u16() as usize;
                self.current_frame_mut().ip += offset;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_u16() as usize;
                let cond = *self.stack.last().expect("condition on stack");
                if !cond.is_truthy() {
                    self.current_frame_mut().ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = self.read_u16() as usize;
                self.current_frame_mut().ip -= offset;
            }
            OpCode::Call => {
                let argc = self.read_byte() as usize;
                self.call_value(argc)?;
            }
            OpCode::Invoke => {
                let name = self.read_constant_string_handle();
                let argc = self.read_byte() as usize;
                self.invoke(name, argc)?;
            }
            OpCode::SuperInvoke => {
                let name = self.read_constant_string_handle();
                let argc = self.read_byte() as usize;
                self.super_invoke(name, argc)?;
            }
            OpCode::Closure => self.make_closure(),
            OpCode::CloseUpvalue => {
                let idx = self.stack.len() - 1;
                self.close_upvalues_from(idx);
                self.pop();
            }
            OpCode::Return => {
                let result = self.pop();
                let frame = self.frames.pop().expect("return with no active frame");
                self.close_upvalues_from(frame.slot_base);
                self.stack.truncate(frame.slot_base);
                if self.frames.is_empty() {
                    return Ok(StepResult::Finished);
                }
                self.push(result);
            }
            OpCode::Class => {
                let name = self.read_constant_string_handle();
                let class = self.heap.insert(Obj::Class(ObjClass::new(name)));
                self.push(Value::Obj(class));
            }
            OpCode::Inherit => self.inherit()?,
            OpCode::Method => {
                let name = self.read_constant_string_handle();
                let method = self.pop();
                if let Value::Obj(class) = *self.stack.last().expect("class for method") {
                    self.define_method_on(class, name, method);
                    if self.heap.string_bytes(name) == b"init" {
                        if let Obj::Class(c) = self.heap.get_mut(class) {
                            c.initializer = Some(method);
                        }
                    }
                }
            }
            OpCode::StaticMethod => {
                let name = self.read_constant_string_handle();
                let method = self.pop();
                if let Value::Obj(class) = *self.stack.last().expect("class for static method") {
                    self.define_static_method_on(class, name, method);
                }
            }
            OpCode::StaticField => {
                let name = self.read_constant_string_handle();
                let value = self.pop();
                if let Value::Obj(class) = *self.stack.last().expect("class for static field") {
                    self.define_static_field_on(class, name, value);
                }
            }
            OpCode::Array => {
                let count = self.read_byte() as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.pop());
                }
                items.reverse();
                let handle = self.heap.insert(Obj::Array(ObjArray { items }));
                self.push(Value::Obj(handle));
            }
            OpCode::PushExceptionHandler => {
                let class_name = self.read_constant_string_handle();
                let handler_addr = self.read_u16() as usize;
                let finally_raw = self.read_u16();
                let finally_addr = if finally_raw == 0xFFFF { None } else { Some(finally_raw as usize) };
                if self.current_frame().handlers.len() >= self.config.handlers_max {
                    return Err(self.runtime_error("too many exception handlers"));
                }
                let stack_depth = self.stack.len();
                self.current_frame_mut().handlers.push(ExceptionHandler {
                    class_name,
                    handler_addr,
                    finally_addr,
                    stack_depth,
                });
            }
            OpCode::PopExceptionHandler => {
                self.current_frame_mut().handlers.pop();
            }
            OpCode::Throw => {
                let v = self.pop();
                let exc = match v {
                    Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Instance => v,
                    _ => natives::make_exception(&mut self.heap, "can only throw instances"),
                };
                self.attach_stack_trace(exc);
                return Err(Unwind::Exception(exc));
            }
            OpCode::PropagateException => {
                let sentinel = self.pop();
                if sentinel.is_truthy() {
                    let exc = self.pending_exception.take().expect("sentinel true without a pending exception");
                    return Err(Unwind::Exception(exc));
                }
            }
        }
        Ok(StepResult::Continue)
    }

    // --- stack/frame plumbing ----------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("stack underflow")
    }

    fn current_frame(&self) -> &Frame {
        self.frames.last().expect("no active frame")
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active frame")
    }

    fn chunk_byte(&self, offset: usize) -> u8 {
        let frame = self.current_frame();
        let closure = self.heap.get(frame.closure).as_closure().expect("closure frame");
        let function = self.heap.get(closure.function).as_function().expect("function");
        function.chunk.code[offset]
    }

    fn chunk_constant(&self, idx: usize) -> Value {
        let frame = self.current_frame();
        let closure = self.heap.get(frame.closure).as_closure().expect("closure frame");
        let function = self.heap.get(closure.function).as_function().expect("function");
        function.chunk.constants[idx]
    }

    fn read_byte(&mut self) -> u8 {
        let ip = self.current_frame().ip;
        let byte = self.chunk_byte(ip);
        self.current_frame_mut().ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte() as usize;
        self.chunk_constant(idx)
    }

    fn read_constant_string_handle(&mut self) -> ObjHandle {
        match self.read_constant() {
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::String => h,
            _ => panic!("bytecode named a non-string constant where a name was expected"),
        }
    }

    fn name_text(&self, handle: ObjHandle) -> String {
        String::from_utf8_lossy(self.heap.string_bytes(handle)).into_owned()
    }

    // --- arithmetic -----------------------------------------------------

    fn numeric_binop(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), Unwind> {
        let b = self.pop();
        let a = self.pop();
        let (Some(x), Some(y)) =
            (a.unwrap_one_layer(&self.heap).as_number(), b.unwrap_one_layer(&self.heap).as_number())
        else {
            return Err(self.runtime_error("operands must be numbers"));
        };
        self.push(Value::Number(op(x, y)));
        Ok(())
    }

    fn numeric_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), Unwind> {
        let b = self.pop();
        let a = self.pop();
        let (Some(x), Some(y)) =
            (a.unwrap_one_layer(&self.heap).as_number(), b.unwrap_one_layer(&self.heap).as_number())
        else {
            return Err(self.runtime_error("operands must be numbers"));
        };
        self.push(Value::Bool(op(x, y)));
        Ok(())
    }

    fn is_string(&self, v: Value) -> bool {
        matches!(v, Value::Obj(h) if self.heap.kind_of(h) == ObjKind::String)
    }

    fn op_add(&mut self) -> Result<(), Unwind> {
        let b = self.pop();
        let a = self.pop();
        let au = a.unwrap_one_layer(&self.heap);
        let bu = b.unwrap_one_layer(&self.heap);
        match (au, bu) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x + y)),
            _ if self.is_string(au) || self.is_string(bu) => {
                let left = format_value(&self.heap, au);
                let right = format_value(&self.heap, bu);
                let handle = self.heap.intern(format!("{left}{right}").as_bytes());
                self.push(Value::Obj(handle));
            }
            _ => return Err(self.runtime_error("operands must be two numbers or involve a string")),
        }
        Ok(())
    }

    // --- properties / indexing ------------------------------------------

    fn promote_primitive(&mut self, value: Value) -> Result<ObjHandle, Unwind> {
        let class = match value {
            Value::Number(_) => self.wrappers.number,
            Value::Bool(_) => self.wrappers.boolean,
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::String => self.wrappers.string,
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Array => self.wrappers.array,
            _ => return Err(self.runtime_error("value has no properties")),
        };
        let instance = self.heap.insert(Obj::Instance(ObjInstance { class, this_: Value::Nil, fields: Table::new() }));
        let self_value = Value::Obj(instance);
        if let Obj::Instance(i) = self.heap.get_mut(instance) {
            i.this_ = self_value;
        }
        let init = match self.heap.get(class) {
            Obj::Class(c) => c.initializer,
            _ => None,
        };
        if let Some(Value::Obj(native_handle)) = init {
            let function = match self.heap.get(native_handle) {
                Obj::Native(n) => n.function,
                _ => return Ok(instance),
            };
            match function(&mut self.heap, self_value, std::slice::from_ref(&value)) {
                NativeOutcome::Value(_) => {}
                NativeOutcome::Throw(exc) => return Err(Unwind::Exception(exc)),
                NativeOutcome::Exit(code) => return Err(Unwind::Exit(code)),
            }
        }
        Ok(instance)
    }

    fn get_property(&mut self, receiver: Value, name: ObjHandle) -> Result<Value, Unwind> {
        let instance = match receiver {
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Instance => h,
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Class => return self.get_static(h, name),
            other => self.promote_primitive(other)?,
        };
        if let Some(v) = match self.heap.get(instance) {
            Obj::Instance(i) => i.fields.get(&self.heap, name),
            _ => None,
        } {
            return Ok(v);
        }
        let method = self.resolve_method(instance, name)?;
        let bound = self.heap.insert(Obj::BoundMethod(ObjBoundMethod { receiver: Value::Obj(instance), method }));
        Ok(Value::Obj(bound))
    }

    fn get_static(&mut self, class: ObjHandle, name: ObjHandle) -> Result<Value, Unwind> {
        if let Some(v) = match self.heap.get(class) {
            Obj::Class(c) => c.static_fields.get(&self.heap, name),
            _ => None,
        } {
            return Ok(v);
        }
        if let Some(v) = match self.heap.get(class) {
            Obj::Class(c) => c.static_methods.get(&self.heap, name),
            _ => None,
        } {
            return Ok(v);
        }
        Err(self.runtime_error("undefined static member"))
    }

    fn resolve_method(&mut self, instance: ObjHandle, name: ObjHandle) -> Result<Value, Unwind> {
        let mut class = match self.heap.get(instance) {
            Obj::Instance(i) => Some(i.class),
            _ => None,
        };
        while let Some(c) = class {
            if let Some(m) = match self.heap.get(c) {
                Obj::Class(cl) => cl.methods.get(&self.heap, name),
                _ => None,
            } {
                return Ok(m);
            }
            class = match self.heap.get(c) {
                Obj::Class(cl) => cl.superclass,
                _ => None,
            };
        }
        Err(self.runtime_error("undefined property"))
    }

    fn set_property(&mut self, receiver: Value, name: ObjHandle, value: Value) -> Result<(), Unwind> {
        match receiver {
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Instance => {
                let mut fields = match self.heap.get_mut(h) {
                    Obj::Instance(i) => std::mem::take(&mut i.fields),
                    _ => unreachable!("checked kind above"),
                };
                fields.set(&self.heap, name, value);
                if let Obj::Instance(i) = self.heap.get_mut(h) {
                    i.fields = fields;
                }
                Ok(())
            }
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Class => {
                self.define_static_field_on(h, name, value);
                Ok(())
            }
            _ => Err(self.runtime_error("only instances and classes have settable properties")),
        }
    }

    fn define_method_on(&mut self, class: ObjHandle, name: ObjHandle, value: Value) {
        let mut table = match self.heap.get_mut(class) {
            Obj::Class(c) => std::mem::take(&mut c.methods),
            _ => return,
        };
        table.set(&self.heap, name, value);
        if let Obj::Class(c) = self.heap.get_mut(class) {
            c.methods = table;
        }
    }

    fn define_static_method_on(&mut self, class: ObjHandle, name: ObjHandle, value: Value) {
        let mut table = match self.heap.get_mut(class) {
            Obj::Class(c) => std::mem::take(&mut c.static_methods),
            _ => return,
        };
        table.set(&self.heap, name, value);
        if let Obj::Class(c) = self.heap.get_mut(class) {
            c.static_methods = table;
        }
    }

    fn define_static_field_on(&mut self, class: ObjHandle, name: ObjHandle, value: Value) {
        let mut table = match self.heap.get_mut(class) {
            Obj::Class(c) => std::mem::take(&mut c.static_fields),
            _ => return,
        };
        table.set(&self.heap, name, value);
        if let Obj::Class(c) = self.heap.get_mut(class) {
            c.static_fields = table;
        }
    }

    fn inherit(&mut self) -> Result<(), Unwind> {
        let subclass_val = *self.stack.last().expect("subclass on stack");
        let superclass_val = self.stack[self.stack.len() - 2];
        let (Value::Obj(sub), Value::Obj(sup)) = (subclass_val, superclass_val) else {
            return Err(self.runtime_error("superclass must be a class"));
        };
        if self.heap.kind_of(sup) != ObjKind::Class {
            return Err(self.runtime_error("superclass must be a class"));
        }
        let inherited: Vec<(ObjHandle, Value)> = match self.heap.get(sup) {
            Obj::Class(c) => c.methods.iter().collect(),
            _ => Vec::new(),
        };
        let inherited_init = match self.heap.get(sup) {
            Obj::Class(c) => c.initializer,
            _ => None,
        };
        let mut merged = Table::new();
        for (k, v) in inherited {
            merged.set(&self.heap, k, v);
        }
        if let Obj::Class(c) = self.heap.get_mut(sub) {
            c.superclass = Some(sup);
            c.methods = merged;
            c.initializer = inherited_init;
        }
        Ok(())
    }

    fn index_get(&mut self, target: Value, index: Value) -> Result<Value, Unwind> {
        let Value::Obj(h) = target else { return Err(self.runtime_error("only arrays can be indexed")) };
        if self.heap.kind_of(h) != ObjKind::Array {
            return Err(self.runtime_error("only arrays can be indexed"));
        }
        let Some(i) = index.as_number() else { return Err(self.runtime_error("array index must be a number")) };
        let idx = i as i64;
        let len = self.heap.get(h).as_array().expect("array kind checked above").items.len();
        if idx < 0 || idx as usize >= len {
            return Err(self.runtime_error("array index out of bounds"));
        }
        Ok(self.heap.get(h).as_array().expect("array kind checked above").items[idx as usize])
    }

    fn index_set(&mut self, target: Value, index: Value, value: Value) -> Result<(), Unwind> {
        let Value::Obj(h) = target else { return Err(self.runtime_error("only arrays can be indexed")) };
        if self.heap.kind_of(h) != ObjKind::Array {
            return Err(self.runtime_error("only arrays can be indexed"));
        }
        let Some(i) = index.as_number() else { return Err(self.runtime_error("array index must be a number")) };
        let idx = i as i64;
        let len = self.heap.get(h).as_array().expect("array kind checked above").items.len();
        if idx < 0 || idx as usize >= len {
            return Err(self.runtime_error("array index out of bounds"));
        }
        if let Obj::Array(a) = self.heap.get_mut(h) {
            a.items[idx as usize] = value;
        }
        Ok(())
    }

    fn get_super(&mut self, name: ObjHandle) -> Result<Value, Unwind> {
        let superclass_val = self.pop();
        let Value::Obj(superclass) = superclass_val else {
            return Err(self.runtime_error("super requires a superclass"));
        };
        let receiver = self.stack[self.current_frame().slot_base];
        let method = match self.heap.get(superclass) {
            Obj::Class(c) => c.methods.get(&self.heap, name),
            _ => None,
        };
        match method {
            Some(m) => {
                let bound = self.heap.insert(Obj::BoundMethod(ObjBoundMethod { receiver, method: m }));
                Ok(Value::Obj(bound))
            }
            None => Err(self.runtime_error("undefined method in superclass")),
        }
    }

    // --- calls ------------------------------------------------------------

    fn call_value(&mut self, argc: usize) -> Result<(), Unwind> {
        let slot_base = self.stack.len() - argc - 1;
        let callee = self.stack[slot_base];
        match callee {
            Value::Obj(h) => match self.heap.kind_of(h) {
                ObjKind::Closure => self.call_closure(h, slot_base, argc),
                ObjKind::Class => self.call_class(h, slot_base, argc),
                ObjKind::BoundMethod => self.call_bound_method(h, slot_base, argc),
                ObjKind::Native => self.call_native(h, slot_base, argc, false),
                _ => Err(self.runtime_error("can only call functions, classes, and methods")),
            },
            _ => Err(self.runtime_error("can only call functions, classes, and methods")),
        }
    }

    fn call_method_value(&mut self, method: Value, slot_base: usize, argc: usize, is_init: bool) -> Result<(), Unwind> {
        match method {
            Value::Obj(h) => match self.heap.kind_of(h) {
                ObjKind::Closure => self.call_closure(h, slot_base, argc),
                ObjKind::Native => self.call_native(h, slot_base, argc, is_init),
                _ => Err(self.runtime_error("invalid method")),
            },
            _ => Err(self.runtime_error("invalid method")),
        }
    }

    fn call_closure(&mut self, closure: ObjHandle, slot_base: usize, argc: usize) -> Result<(), Unwind> {
        let function = self.heap.get(closure).as_closure().expect("closure handle").function;
        let arity = self.heap.get(function).as_function().expect("function handle").arity as usize;
        if argc != arity {
            return Err(self.runtime_error(format!("expected {arity} arguments but got {argc}")));
        }
        if self.frames.len() >= self.config.frames_max {
            return Err(self.runtime_error("stack overflow"));
        }
        if self.stack.len() >= self.config.stack_max {
            return Err(self.runtime_error("stack overflow"));
        }
        self.frames.push(Frame { closure, ip: 0, slot_base, handlers: Vec::new() });
        Ok(())
    }

    fn call_class(&mut self, class: ObjHandle, slot_base: usize, argc: usize) -> Result<(), Unwind> {
        let instance = self.heap.insert(Obj::Instance(ObjInstance { class, this_: Value::Nil, fields: Table::new() }));
        let self_value = Value::Obj(instance);
        if let Obj::Instance(i) = self.heap.get_mut(instance) {
            i.this_ = self_value;
        }
        self.stack[slot_base] = self_value;
        let initializer = match self.heap.get(class) {
            Obj::Class(c) => c.initializer,
            _ => None,
        };
        match initializer {
            Some(init) => self.call_method_value(init, slot_base, argc, true),
            None => {
                if argc != 0 {
                    return Err(self.runtime_error("expected 0 arguments for a class with no initializer"));
                }
                self.stack.truncate(slot_base + 1);
                Ok(())
            }
        }
    }

    fn call_bound_method(&mut self, bm: ObjHandle, slot_base: usize, argc: usize) -> Result<(), Unwind> {
        let (receiver, method) = match self.heap.get(bm) {
            Obj::BoundMethod(b) => (b.receiver, b.method),
            _ => unreachable!("bound method handle"),
        };
        self.stack[slot_base] = receiver;
        self.call_method_value(method, slot_base, argc, false)
    }

    fn call_native(&mut self, native: ObjHandle, slot_base: usize, argc: usize, is_init: bool) -> Result<(), Unwind> {
        let (function, arity) = match self.heap.get(native) {
            Obj::Native(n) => (n.function, n.arity),
            _ => unreachable!("native handle"),
        };
        if arity >= 0 && argc as i32 != arity {
            return Err(self.runtime_error(format!("expected {arity} arguments but got {argc}")));
        }
        let receiver = self.stack[slot_base];
        let args: Vec<Value> = self.stack[slot_base + 1..].to_vec();
        self.stack.truncate(slot_base);
        match function(&mut self.heap, receiver, &args) {
            NativeOutcome::Value(v) => {
                self.push(if is_init { receiver } else { v });
                Ok(())
            }
            NativeOutcome::Throw(exc) => {
                self.attach_stack_trace(exc);
                Err(Unwind::Exception(exc))
            }
            NativeOutcome::Exit(code) => Err(Unwind::Exit(code)),
        }
    }

    fn invoke(&mut self, name: ObjHandle, argc: usize) -> Result<(), Unwind> {
        let slot_base = self.stack.len() - argc - 1;
        let receiver = self.stack[slot_base];
        match receiver {
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Instance => {
                if let Some(v) = match self.heap.get(h) {
                    Obj::Instance(i) => i.fields.get(&self.heap, name),
                    _ => None,
                } {
                    self.stack[slot_base] = v;
                    return self.call_value(argc);
                }
                let method = self.resolve_method(h, name)?;
                self.call_method_value(method, slot_base, argc, false)
            }
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Class => {
                let method = match self.heap.get(h) {
                    Obj::Class(c) => c.static_methods.get(&self.heap, name),
                    _ => None,
                };
                match method {
                    Some(m) => self.call_method_value(m, slot_base, argc, false),
                    None => Err(self.runtime_error("undefined static method")),
                }
            }
            other => {
                let instance = self.promote_primitive(other)?;
                self.stack[slot_base] = Value::Obj(instance);
                let method = self.resolve_method(instance, name)?;
                self.call_method_value(method, slot_base, argc, false)
            }
        }
    }

    fn super_invoke(&mut self, name: ObjHandle, argc: usize) -> Result<(), Unwind> {
        let superclass_val = self.pop();
        let Value::Obj(superclass) = superclass_val else {
            return Err(self.runtime_error("super requires a superclass"));
        };
        let slot_base = self.stack.len() - argc - 1;
        let method = match self.heap.get(superclass) {
            Obj::Class(c) => c.methods.get(&self.heap, name),
            _ => None,
        };
        match method {
            Some(m) => self.call_method_value(m, slot_base, argc, false),
            None => Err(self.runtime_error("undefined method in superclass")),
        }
    }

    // --- closures / upvalues ----------------------------------------------

    fn make_closure(&mut self) {
        let function = match self.read_constant() {
            Value::Obj(h) if self.heap.kind_of(h) == ObjKind::Function => h,
            _ => panic!("OP_CLOSURE's constant must be a function"),
        };
        let upvalue_count = self.heap.get(function).as_function().expect("function handle").upvalue_count as usize;
        let parent_closure = self.current_frame().closure;
        let parent_slot_base = self.current_frame().slot_base;
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;
            if is_local {
                let stack_index = parent_slot_base + index;
                upvalues.push(self.capture_upvalue(stack_index));
            } else {
                let handle = self.heap.get(parent_closure).as_closure().expect("closure handle").upvalues[index];
                upvalues.push(handle);
            }
        }
        let closure = self.heap.insert(Obj::Closure(ObjClosure { function, upvalues }));
        self.push(Value::Obj(closure));
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> ObjHandle {
        for &h in &self.open_upvalues {
            if let Obj::Upvalue(u) = self.heap.get(h) {
                if let UpvalueState::Open(idx) = u.state {
                    if idx == stack_index {
                        return h;
                    }
                }
            }
        }
        let handle = self.heap.insert(Obj::Upvalue(ObjUpvalue { state: UpvalueState::Open(stack_index) }));
        self.open_upvalues.push(handle);
        let mut entries: Vec<(usize, ObjHandle)> = self
            .open_upvalues
            .iter()
            .map(|&h| {
                let idx = match self.heap.get(h) {
                    Obj::Upvalue(u) => match u.state {
                        UpvalueState::Open(i) => i,
                        UpvalueState::Closed(_) => 0,
                    },
                    _ => 0,
                };
                (idx, h)
            })
            .collect();
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        self.open_upvalues = entries.into_iter().map(|(_, h)| h).collect();
        handle
    }

    fn close_upvalues_from(&mut self, from: usize) {
        let mut remaining = Vec::new();
        for &h in &self.open_upvalues {
            let idx = match self.heap.get(h) {
                Obj::Upvalue(u) => match u.state {
                    UpvalueState::Open(i) => Some(i),
                    UpvalueState::Closed(_) => None,
                },
                _ => None,
            };
            match idx {
                Some(i) if i >= from => {
                    let value = self.stack[i];
                    if let Obj::Upvalue(u) = self.heap.get_mut(h) {
                        u.state = UpvalueState::Closed(value);
                    }
                }
                _ => remaining.push(h),
            }
        }
        self.open_upvalues = remaining;
    }

    // --- exceptions ---------------------------------------------------

    fn runtime_error(&mut self, message: impl Into<String>) -> Unwind {
        let exc = natives::make_exception(&mut self.heap, &message.into());
        self.attach_stack_trace(exc);
        Unwind::Exception(exc)
    }

    fn attach_stack_trace(&mut self, exc: Value) {
        let Value::Obj(inst) = exc else { return };
        let mut lines = Vec::new();
        for frame in self.frames.iter().rev() {
            let Obj::Closure(c) = self.heap.get(frame.closure) else { continue };
            let Obj::Function(f) = self.heap.get(c.function) else { continue };
            let line = f.chunk.line_of(frame.ip.saturating_sub(1));
            let name = match f.name {
                Some(n) => self.name_text(n),
                None => "script".to_string(),
            };
            lines.push(format!("[line {line}] in {name}"));
        }
        let trace = lines.join("\n");
        let key = self.heap.intern(b"stackTrace");
        let value = self.heap.intern(trace.as_bytes());
        let mut fields = match self.heap.get_mut(inst) {
            Obj::Instance(i) => std::mem::take(&mut i.fields),
            _ => return,
        };
        fields.set(&self.heap, key, Value::Obj(value));
        if let Obj::Instance(i) = self.heap.get_mut(inst) {
            i.fields = fields;
        }
    }

    fn class_matches(&self, class: ObjHandle, name: ObjHandle) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            let Obj::Class(cl) = self.heap.get(c) else { return false };
            if cl.name == name {
                return true;
            }
            current = cl.superclass;
        }
        false
    }

    fn format_unhandled(&mut self, exc: Value) -> String {
        let Value::Obj(h) = exc else { return "Unhandled exception".to_string() };
        let class = match self.heap.get(h) {
            Obj::Instance(i) => i.class,
            _ => return "Unhandled exception".to_string(),
        };
        let class_name = match self.heap.get(class) {
            Obj::Class(c) => self.name_text(c.name),
            _ => "Exception".to_string(),
        };
        let message_key = self.heap.intern(b"message");
        let trace_key = self.heap.intern(b"stackTrace");
        let message = match self.heap.get(h) {
            Obj::Instance(i) => i.fields.get(&self.heap, message_key),
            _ => None,
        };
        let trace = match self.heap.get(h) {
            Obj::Instance(i) => i.fields.get(&self.heap, trace_key),
            _ => None,
        };
        let message_text = message.map(|v| format_value(&self.heap, v)).unwrap_or_default();
        let trace_text = match trace {
            Some(Value::Obj(th)) => self.name_text(th),
            _ => String::new(),
        };
        format!("Unhandled {class_name}: \"{message_text}\"\n{trace_text}")
    }

    /// Walks the handler stacks of the current frame, then each caller in
    /// turn, looking for a declared catch type matching `exc`'s class or an
    /// ancestor.
    fn propagate_exception(&mut self, exc: Value) -> Result<(), String> {
        let exc_class = match exc {
            Value::Obj(h) => match self.heap.get(h) {
                Obj::Instance(i) => i.class,
                _ => return Err(self.format_unhandled(exc)),
            },
            _ => return Err(self.format_unhandled(exc)),
        };

        loop {
            if self.frames.is_empty() {
                return Err(self.format_unhandled(exc));
            }
            let frame_idx = self.frames.len() - 1;
            let handlers = self.frames[frame_idx].handlers.clone();
            let mut matched: Option<(usize, ExceptionHandler)> = None;
            let mut fallback: Option<(usize, ExceptionHandler)> = None;
            for (i, h) in handlers.iter().enumerate().rev() {
                if self.class_matches(exc_class, h.class_name) {
                    matched = Some((i, *h));
                    break;
                }
                if fallback.is_none() && h.finally_addr.is_some() {
                    fallback = Some((i, *h));
                }
            }
            if let Some((i, handler)) = matched {
                self.frames[frame_idx].handlers.truncate(i);
                self.close_upvalues_from(handler.stack_depth);
                self.stack.truncate(handler.stack_depth);
                self.frames[frame_idx].ip = handler.handler_addr;
                self.push(exc);
                return Ok(());
            }
            if let Some((i, handler)) = fallback {
                self.frames[frame_idx].handlers.truncate(i);
                self.close_upvalues_from(handler.stack_depth);
                self.stack.truncate(handler.stack_depth);
                self.pending_exception = Some(exc);
                self.frames[frame_idx].ip = handler.finally_addr.expect("fallback always carries a finally");
                self.push(Value::Bool(true));
                return Ok(());
            }
            let popped = self.frames.pop().expect("frame_idx was valid");
            self.close_upvalues_from(popped.slot_base);
            self.stack.truncate(popped.slot_base);
        }
    }

    // --- GC ---------------------------------------------------------------

    fn collect_garbage(&mut self) {
        let stack = self.stack.clone();
        let frame_closures: Vec<ObjHandle> = self.frames.iter().map(|f| f.closure).collect();
        let handler_classes: Vec<ObjHandle> =
            self.frames.iter().flat_map(|f| f.handlers.iter().map(|h| h.class_name)).collect();
        let globals: Vec<(ObjHandle, Value)> = self.globals.iter().collect();
        let open_upvalues = self.open_upvalues.clone();
        let pending = self.pending_exception;
        gc::collect(&mut self.heap, |heap| {
            for v in &stack {
                heap.mark_value(*v);
            }
            for h in &frame_closures {
                heap.mark_handle(*h);
            }
            for h in &handler_classes {
                heap.mark_handle(*h);
            }
            for (k, v) in &globals {
                heap.mark_handle(*k);
                heap.mark_value(*v);
            }
            for h in &open_upvalues {
                heap.mark_handle(*h);
            }
            if let Some(v) = pending {
                heap.mark_value(v);
            }
        });
    }
}
