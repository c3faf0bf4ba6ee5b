//! Bytecode instruction set.
//!
//! Each opcode is one byte followed by zero or more operand bytes (encoded
//! big-endian when wider than a byte, to match the rest of the VM's
//! big-endian jump offsets). `OpCode::from_byte` is total: any unrecognized
//! byte is a VM-internal bug, not a user-facing error, since bytecode is
//! never untrusted input from the language's own compiler (the binary
//! loader, by contrast, validates explicitly -- see `ember-runtime::codec`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Constant = 0,
    ConstantZero,
    ConstantOne,
    ConstantTwo,
    Nil,
    True,
    False,
    Pop,
    Dup,
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    GetUpvalue,
    SetUpvalue,
    GetProperty,
    SetProperty,
    GetIndex,
    SetIndex,
    GetSuper,
    Equal,
    Greater,
    Less,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulus,
    Exponent,
    Not,
    Negate,
    Print,
    Jump,
    JumpIfFalse,
    Loop,
    Call,
    Invoke,
    SuperInvoke,
    Closure,
    CloseUpvalue,
    Return,
    Class,
    Inherit,
    Method,
    StaticMethod,
    StaticField,
    Array,
    PushExceptionHandler,
    PopExceptionHandler,
    Throw,
    PropagateException,
}

impl OpCode {
    pub fn from_byte(byte: u8) -> OpCode {
        use OpCode::*;
        const TABLE: &[OpCode] = &[
            Constant, ConstantZero, ConstantOne, ConstantTwo, Nil, True, False, Pop, Dup,
            GetLocal, SetLocal, GetGlobal, DefineGlobal, SetGlobal, GetUpvalue, SetUpvalue,
            GetProperty, SetProperty, GetIndex, SetIndex, GetSuper, Equal, Greater, Less, Add,
            Subtract, Multiply, Divide, Modulus, Exponent, Not, Negate, Print, Jump, JumpIfFalse,
            Loop, Call, Invoke, SuperInvoke, Closure, CloseUpvalue, Return, Class, Inherit,
            Method, StaticMethod, StaticField, Array, PushExceptionHandler, PopExceptionHandler,
            Throw, PropagateException,
        ];
        TABLE[byte as usize]
    }
}
