//! Binary bytecode file format: the script function
//! first, then every function it reaches in BFS order, with strings
//! deduplicated into a trailing pool and constant-pool references to other
//! functions/strings recorded as pool indices, patched on load.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use ember_core::{Chunk, Heap, Obj, ObjFunction, ObjHandle, ObjKind, Value};

const MAGIC: [u32; 3] = [0x0000_020B, 0x0E17_0000, 0x636C_6F78];
const TRAILER: u32 = 0x7CAD_BEEF;

const SEG_FUNCTIONS: u32 = 1;
const SEG_END_FUNCTIONS: u32 = 2;
const SEG_FUNCTION: u32 = 3;
const SEG_FUNCTION_END: u32 = 4;
const SEG_STRINGS: u32 = 5;
const SEG_END_STRINGS: u32 = 6;

#[derive(Debug, Clone)]
pub enum CodecError {
    BadMagic,
    UnexpectedSegment { wanted: &'static str },
    BadConstantTag(u8),
    BadTrailer,
    Truncated,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::BadMagic => write!(f, "not an ember bytecode file"),
            CodecError::UnexpectedSegment { wanted } => write!(f, "expected {wanted} segment marker"),
            CodecError::BadConstantTag(tag) => write!(f, "unknown constant tag {tag}"),
            CodecError::BadTrailer => write!(f, "missing or corrupt trailer"),
            CodecError::Truncated => write!(f, "unexpected end of file"),
        }
    }
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Walks `script`'s constant pools breadth-first, collecting every reachable
/// function (itself included, first) and every reachable string, each
/// assigned a pool index in first-seen order.
fn collect_pools(heap: &Heap, script: ObjHandle) -> (Vec<ObjHandle>, Vec<ObjHandle>) {
    let mut functions = vec![script];
    let mut func_index = HashMap::new();
    func_index.insert(script, 0u32);
    let mut queue = VecDeque::from([script]);
    while let Some(f) = queue.pop_front() {
        let function = heap.get(f).as_function().expect("function handle");
        for c in &function.chunk.constants {
            if let Value::Obj(h) = c {
                if heap.kind_of(*h) == ObjKind::Function && !func_index.contains_key(h) {
                    func_index.insert(*h, functions.len() as u32);
                    functions.push(*h);
                    queue.push_back(*h);
                }
            }
        }
    }

    let mut strings = Vec::new();
    let mut string_index: HashMap<ObjHandle, u32> = HashMap::new();
    let mut note = |h: ObjHandle, strings: &mut Vec<ObjHandle>, string_index: &mut HashMap<ObjHandle, u32>| {
        string_index.entry(h).or_insert_with(|| {
            strings.push(h);
            (strings.len() - 1) as u32
        });
    };
    for &f in &functions {
        let function = heap.get(f).as_function().expect("function handle");
        if let Some(name) = function.name {
            note(name, &mut strings, &mut string_index);
        }
        for c in &function.chunk.constants {
            if let Value::Obj(h) = c {
                if heap.kind_of(*h) == ObjKind::String {
                    note(*h, &mut strings, &mut string_index);
                }
            }
        }
    }
    (functions, strings)
}

/// Serializes `script` (and everything it reaches) into the bytecode file
/// format. `source_path` is recorded for diagnostics only.
pub fn encode(heap: &Heap, script: ObjHandle, source_path: &str) -> Vec<u8> {
    let (functions, strings) = collect_pools(heap, script);
    let func_index: HashMap<ObjHandle, u32> =
        functions.iter().enumerate().map(|(i, &h)| (h, i as u32)).collect();
    let string_index: HashMap<ObjHandle, u32> =
        strings.iter().enumerate().map(|(i, &h)| (h, i as u32)).collect();

    let mut out = Vec::new();
    for word in MAGIC {
        out.extend_from_slice(&word.to_le_bytes());
    }
    write_bytes(&mut out, source_path.as_bytes());

    out.extend_from_slice(&SEG_FUNCTIONS.to_le_bytes());
    for &f in &functions {
        out.extend_from_slice(&SEG_FUNCTION.to_le_bytes());
        let function = heap.get(f).as_function().expect("function handle");
        match function.name {
            None => out.push(0),
            Some(name) => {
                out.push(1);
                out.extend_from_slice(&string_index[&name].to_le_bytes());
            }
        }
        out.push(function.arity);
        out.push(function.upvalue_count);

        let code_len = function.chunk.code.len() as u32;
        out.extend_from_slice(&code_len.to_le_bytes());
        out.extend_from_slice(&code_len.to_le_bytes());
        out.extend_from_slice(&function.chunk.code);

        let lines = function.chunk.line_table();
        let lines_len = lines.len() as u32;
        out.extend_from_slice(&lines_len.to_le_bytes());
        out.extend_from_slice(&lines_len.to_le_bytes());
        for &(offset, line) in lines {
            out.extend_from_slice(&(offset as u32).to_le_bytes());
            out.extend_from_slice(&line.to_le_bytes());
        }

        out.extend_from_slice(&(function.chunk.constants.len() as u32).to_le_bytes());
        for c in &function.chunk.constants {
            match c {
                Value::Number(n) => {
                    out.push(0);
                    out.extend_from_slice(&n.to_bits().to_le_bytes());
                }
                Value::Obj(h) if heap.kind_of(*h) == ObjKind::String => {
                    out.push(1);
                    out.extend_from_slice(&string_index[h].to_le_bytes());
                }
                Value::Obj(h) if heap.kind_of(*h) == ObjKind::Function => {
                    out.push(2);
                    out.extend_from_slice(&func_index[h].to_le_bytes());
                }
                _ => unreachable!("the compiler only ever puts numbers, strings, or functions in a constant pool"),
            }
        }
        out.extend_from_slice(&SEG_FUNCTION_END.to_le_bytes());
    }
    out.extend_from_slice(&SEG_END_FUNCTIONS.to_le_bytes());

    out.extend_from_slice(&SEG_STRINGS.to_le_bytes());
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    for &h in &strings {
        write_bytes(&mut out, heap.string_bytes(h));
    }
    out.extend_from_slice(&SEG_END_STRINGS.to_le_bytes());

    out.extend_from_slice(&TRAILER.to_le_bytes());
    out
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.bytes.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn length_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn expect_marker(&mut self, wanted: u32, label: &'static str) -> Result<(), CodecError> {
        if self.u32()? != wanted {
            return Err(CodecError::UnexpectedSegment { wanted: label });
        }
        Ok(())
    }
}

enum RawConstant {
    Number(f64),
    String(u32),
    Function(u32),
}

struct RawFunction {
    name_idx: Option<u32>,
    arity: u8,
    upvalue_count: u8,
    code: Vec<u8>,
    lines: Vec<(usize, u32)>,
    constants: Vec<RawConstant>,
}

/// Deserializes a bytecode file into `heap`, returning the script function's
/// handle. Interns strings through the normal interner rather than
/// allocating fresh ones, so a reloaded program shares string identity with
/// anything already on `heap`.
pub fn decode(bytes: &[u8], heap: &mut Heap) -> Result<ObjHandle, CodecError> {
    let mut r = Reader::new(bytes);
    for expected in MAGIC {
        if r.u32()? != expected {
            return Err(CodecError::BadMagic);
        }
    }
    let _source_path = r.length_prefixed()?;

    r.expect_marker(SEG_FUNCTIONS, "SEG_FUNCTIONS")?;
    let mut raw_functions = Vec::new();
    loop {
        let marker = r.u32()?;
        if marker == SEG_END_FUNCTIONS {
            break;
        }
        if marker != SEG_FUNCTION {
            return Err(CodecError::UnexpectedSegment { wanted: "SEG_FUNCTION" });
        }
        let tag = r.u8()?;
        let name_idx = if tag == 0 { None } else { Some(r.u32()?) };
        let arity = r.u8()?;
        let upvalue_count = r.u8()?;

        let code_len = r.u32()? as usize;
        let _code_cap = r.u32()?;
        let code = r.take(code_len)?.to_vec();

        let lines_len = r.u32()? as usize;
        let _lines_cap = r.u32()?;
        let mut lines = Vec::with_capacity(lines_len);
        for _ in 0..lines_len {
            let offset = r.u32()? as usize;
            let line = r.u32()?;
            lines.push((offset, line));
        }

        let const_count = r.u32()? as usize;
        let mut constants = Vec::with_capacity(const_count);
        for _ in 0..const_count {
            match r.u8()? {
                0 => constants.push(RawConstant::Number(f64::from_bits(r.u64()?))),
                1 => constants.push(RawConstant::String(r.u32()?)),
                2 => constants.push(RawConstant::Function(r.u32()?)),
                other => return Err(CodecError::BadConstantTag(other)),
            }
        }
        r.expect_marker(SEG_FUNCTION_END, "SEG_FUNCTION_END")?;
        raw_functions.push(RawFunction { name_idx, arity, upvalue_count, code, lines, constants });
    }

    r.expect_marker(SEG_STRINGS, "SEG_STRINGS")?;
    let string_count = r.u32()? as usize;
    let mut string_bytes_list = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        string_bytes_list.push(r.length_prefixed()?.to_vec());
    }
    r.expect_marker(SEG_END_STRINGS, "SEG_END_STRINGS")?;
    if r.u32()? != TRAILER {
        return Err(CodecError::BadTrailer);
    }

    let string_handles: Vec<ObjHandle> = string_bytes_list.iter().map(|b| heap.intern(b)).collect();

    // Functions are allocated up front (with placeholder empty chunks) so
    // forward FUNCTION constant references resolve before their chunks are
    // filled in on a second pass.
    let function_handles: Vec<ObjHandle> = raw_functions
        .iter()
        .map(|rf| {
            heap.insert(Obj::Function(ObjFunction {
                arity: rf.arity,
                upvalue_count: rf.upvalue_count,
                chunk: Chunk::new(),
                name: rf.name_idx.map(|i| string_handles[i as usize]),
            }))
        })
        .collect();

    for (idx, rf) in raw_functions.iter().enumerate() {
        let mut chunk = Chunk::new();
        chunk.code = rf.code.clone();
        for &(offset, line) in &rf.lines {
            chunk.push_line_entry(offset, line);
        }
        for c in &rf.constants {
            let value = match *c {
                RawConstant::Number(n) => Value::Number(n),
                RawConstant::String(i) => Value::Obj(string_handles[i as usize]),
                RawConstant::Function(i) => Value::Obj(function_handles[i as usize]),
            };
            chunk.add_constant(value);
        }
        if let Obj::Function(f) = heap.get_mut(function_handles[idx]) {
            f.chunk = chunk;
        }
    }

    Ok(function_handles[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::OpCode;

    fn sample_program(heap: &mut Heap) -> ObjHandle {
        let name = heap.intern(b"greet");
        let mut inner_chunk = Chunk::new();
        inner_chunk.write_op(OpCode::Nil, 1);
        inner_chunk.write_op(OpCode::Return, 1);
        let inner = heap.insert(Obj::Function(ObjFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: inner_chunk,
            name: Some(name),
        }));

        let mut script_chunk = Chunk::new();
        let greeting = heap.intern(b"hello");
        let str_idx = script_chunk.add_constant(Value::Obj(greeting));
        let fn_idx = script_chunk.add_constant(Value::Obj(inner));
        script_chunk.write_op(OpCode::Constant, 1);
        script_chunk.write_byte(str_idx as u8, 1);
        script_chunk.write_op(OpCode::Print, 1);
        script_chunk.write_op(OpCode::Constant, 2);
        script_chunk.write_byte(fn_idx as u8, 2);
        script_chunk.write_op(OpCode::Pop, 2);
        script_chunk.write_op(OpCode::Nil, 3);
        script_chunk.write_op(OpCode::Return, 3);

        heap.insert(Obj::Function(ObjFunction { arity: 0, upvalue_count: 0, chunk: script_chunk, name: None }))
    }

    #[test]
    fn round_trips_functions_and_strings() {
        let mut heap = Heap::new();
        let script = sample_program(&mut heap);
        let bytes = encode(&heap, script, "demo.ember");

        let mut reloaded_heap = Heap::new();
        let reloaded = decode(&bytes, &mut reloaded_heap).expect("decode");

        let original_fn = heap.get(script).as_function().unwrap();
        let reloaded_fn = reloaded_heap.get(reloaded).as_function().unwrap();
        assert_eq!(original_fn.chunk.code, reloaded_fn.chunk.code);
        assert_eq!(original_fn.chunk.constants.len(), reloaded_fn.chunk.constants.len());
        assert_eq!(reloaded_heap.live_count() > 0, true);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut heap = Heap::new();
        let mut bytes = vec![0u8; 16];
        bytes[0] = 0xFF;
        assert!(matches!(decode(&bytes, &mut heap), Err(CodecError::BadMagic)));
    }

    #[test]
    fn rejects_truncated_input() {
        let mut heap = Heap::new();
        let script = sample_program(&mut heap);
        let mut bytes = encode(&heap, script, "demo.ember");
        bytes.truncate(bytes.len() - 4);
        assert!(decode(&bytes, &mut Heap::new()).is_err());
    }
}
