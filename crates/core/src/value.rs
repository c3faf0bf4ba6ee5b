//! The `Value` type: the tagged sum every Ember expression evaluates to.
//!
//! A `Value` is either one of the three primitive payloads (`Nil`, `Bool`,
//! `Number`) or a handle into the heap (`Obj`). It is always `Copy` -- heap
//! objects are reached through [`ObjHandle`], never embedded directly, so
//! passing a `Value` around never clones heap data.

use crate::heap::Heap;
use crate::object::{Obj, ObjKind};
use std::fmt;

/// An index into [`Heap`]'s object arena. Stable for the object's lifetime;
/// never reused while the object is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Number(f64),
    Obj(ObjHandle),
}

impl Value {
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_bool(self) -> bool {
        matches!(self, Value::Bool(_))
    }

    pub fn is_number(self) -> bool {
        matches!(self, Value::Number(_))
    }

    pub fn is_obj(self) -> bool {
        matches!(self, Value::Obj(_))
    }

    pub fn as_number(self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_obj(self) -> Option<ObjHandle> {
        match self {
            Value::Obj(h) => Some(h),
            _ => None,
        }
    }

    pub fn is_obj_kind(self, heap: &Heap, kind: ObjKind) -> bool {
        self.as_obj().is_some_and(|h| heap.get(h).kind() == kind)
    }

    /// Everything is truthy except `nil` and `false` -- notably, `0` and `""`
    /// are truthy.
    pub fn is_truthy(self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Unwraps exactly one layer of primitive boxing (an `Instance` whose
    /// `this_` slot holds a primitive). Never recurses -- an instance boxing
    /// another instance is left alone.
    pub fn unwrap_one_layer(self, heap: &Heap) -> Value {
        if let Value::Obj(h) = self {
            if let Obj::Instance(inst) = heap.get(h) {
                if !inst.this_.is_obj_kind(heap, ObjKind::Instance) {
                    return inst.this_;
                }
            }
        }
        self
    }
}

/// Structural equality for primitives, identity for objects (strings compare
/// equal iff they are the same interned handle). Both sides are unwrapped one
/// layer first so a boxed `Number(3)` equals a bare `3`.
pub fn values_equal(heap: &Heap, a: Value, b: Value) -> bool {
    let a = a.unwrap_one_layer(heap);
    let b = b.unwrap_one_layer(heap);
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Obj(x), Value::Obj(y)) => x == y,
        _ => false,
    }
}

/// Formats a number the way `%g` would: the shortest decimal representation
/// that round-trips, with no trailing `.0` for integral values.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    let mut s = format!("{}", n);
    if !s.contains('.') && !s.contains('e') {
        s.push_str(".0");
    }
    s
}

/// Renders a value for `print`.
/// Strings print unquoted; array elements wrap strings in `"`; instances
/// print as `<instance ClassName>` unless boxing a primitive.
pub fn format_value(heap: &Heap, value: Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::Obj(h) => format_obj(heap, h, false),
    }
}

fn format_obj(heap: &Heap, handle: ObjHandle, quote_strings: bool) -> String {
    match heap.get(handle) {
        Obj::String(s) => {
            let text = String::from_utf8_lossy(&s.bytes);
            if quote_strings {
                format!("\"{}\"", text)
            } else {
                text.into_owned()
            }
        }
        Obj::Function(f) => match f.name {
            Some(name) => format!("<fn {}>", String::from_utf8_lossy(heap.string_bytes(name))),
            None => "<script>".to_string(),
        },
        Obj::Closure(c) => format_obj(heap, c.function, quote_strings),
        Obj::Class(c) => String::from_utf8_lossy(heap.string_bytes(c.name)).into_owned(),
        Obj::Instance(inst) => {
            if !inst.this_.is_obj_kind(heap, ObjKind::Instance) {
                format_value(heap, inst.this_)
            } else {
                let class = heap.get(inst.class).as_class().expect("instance class");
                format!(
                    "<instance {}>",
                    String::from_utf8_lossy(heap.string_bytes(class.name))
                )
            }
        }
        Obj::BoundMethod(bm) => format_value(heap, bm.method),
        Obj::Native(n) => format!("<native {}>", String::from_utf8_lossy(heap.string_bytes(n.name))),
        Obj::Upvalue(_) => "<upvalue>".to_string(),
        Obj::Array(arr) => {
            let items: Vec<String> = arr
                .items
                .iter()
                .map(|v| match v {
                    Value::Obj(h) if heap.get(*h).kind() == ObjKind::String => {
                        format_obj(heap, *h, true)
                    }
                    other => format_value(heap, *other),
                })
                .collect();
            format!("[{}]", items.join(", "))
        }
    }
}

impl fmt::Display for ObjHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
