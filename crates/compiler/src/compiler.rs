//! Single-pass Pratt-parser compiler: no AST, bytecode emitted directly into
//! a [`Chunk`] as the parser descends. Mirrors the
//! scanner's preference for an explicit state machine over building an
//! intermediate tree.

use ember_core::chunk::MAX_CONSTANTS;
use ember_core::{Chunk, Heap, Obj, ObjFunction, ObjHandle, OpCode, Value};
use ember_runtime::CompileError;

use crate::scanner::{Scanner, Token, TokenKind};

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment,
    Container,
    Ternary,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Exponent,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn one_higher(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Container,
            Container => Ternary,
            Ternary => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Exponent,
            Exponent => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

#[derive(Clone, Copy, PartialEq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local {
    name: Vec<u8>,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

struct FunctionScope {
    name: Option<ObjHandle>,
    arity: u8,
    kind: FunctionKind,
    chunk: Chunk,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

impl FunctionScope {
    fn new(kind: FunctionKind, name: Option<ObjHandle>) -> Self {
        // Slot 0 is reserved for `this` (methods/initializers) or the
        // callee itself (plain functions and the script). Naming it "this"
        // for methods/initializers (rather than leaving it anonymous) lets
        // `this` resolve through the ordinary local/upvalue chain, so a
        // closure nested inside a method captures it like any other name.
        let reserved_name = if kind == FunctionKind::Method || kind == FunctionKind::Initializer {
            b"this".to_vec()
        } else {
            Vec::new()
        };
        let reserved = Local { name: reserved_name, depth: 0, is_captured: false };
        FunctionScope {
            name,
            arity: 0,
            kind,
            chunk: Chunk::new(),
            locals: vec![reserved],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassScope {
    has_superclass: bool,
}

struct LoopScope {
    continue_target: usize,
    scope_depth: i32,
    break_jumps: Vec<usize>,
    is_loop: bool,
    /// `for`-loops with a declared variable copy it into a per-iteration
    /// shadow local (inner slot) and write it back to the outer slot at
    /// the bottom of each iteration. `continue` jumps past that write-back,
    /// so it replays the same copy here before popping the shadow scope.
    for_shadow: Option<(u8, u8)>,
}

/// Compiles one source file into a heap-resident script function. Holds a
/// stack of [`FunctionScope`]s (one per nested `fun`/method/lambda/script),
/// a stack of [`ClassScope`]s (for `super` resolution) and a stack of
/// [`LoopScope`]s (for `break`/`continue` and `switch` cleanup).
pub struct Compiler<'src, 'h> {
    scanner: Scanner<'src>,
    heap: &'h mut Heap,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    functions: Vec<FunctionScope>,
    classes: Vec<ClassScope>,
    loops: Vec<LoopScope>,
}

/// Compiles `source` into a fresh script function living in `heap`.
///
/// On success returns the raw `ObjHandle` of an `Obj::Function` with
/// `name: None`, ready for [`ember_runtime::Vm::interpret_function`]. On
/// failure returns every accumulated diagnostic rather than stopping at the
/// first one, matching the scanner's own error-token style of carrying on.
pub fn compile(source: &[u8], heap: &mut Heap) -> Result<ObjHandle, Vec<CompileError>> {
    let mut scanner = Scanner::new(source);
    let first = scanner.scan_token();
    let mut compiler = Compiler {
        scanner,
        heap,
        previous: first.clone(),
        current: first,
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        functions: vec![FunctionScope::new(FunctionKind::Script, None)],
        classes: Vec::new(),
        loops: Vec::new(),
    };
    // Prime `current` properly: the token scanned above is both the first
    // "current" and a placeholder "previous" until `advance()` runs once.
    compiler.advance();
    while !compiler.check(TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_function_scope();
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(function)
    }
}

impl<'src, 'h> Compiler<'src, 'h> {
    // --- token stream -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current.clone();
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.error_message().to_string();
            self.error_at_current(&message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn check_contextual_keyword(&self, text: &str) -> bool {
        self.current.kind == TokenKind::Identifier && self.current.text() == text
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    // --- error reporting ----------------------------------------------

    fn error_at_current(&mut self, message: &str) {
        let token = self.current.clone();
        self.error_at(&token, message);
    }

    fn error_at_previous(&mut self, message: &str) {
        let token = self.previous.clone();
        self.error_at(&token, message);
    }

    fn error_at(&mut self, token: &Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let at = match token.kind {
            TokenKind::Eof => "end".to_string(),
            TokenKind::Error => token.error_message().to_string(),
            _ => token.text().to_string(),
        };
        self.errors.push(CompileError { line: token.line, at, message: message.to_string() });
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return
                | TokenKind::Try
                | TokenKind::Switch => return,
                _ => self.advance(),
            }
        }
    }

    // --- chunk/bytecode helpers -----------------------------------------

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.functions.last_mut().expect("active function scope").chunk
    }

    fn chunk_len(&self) -> usize {
        self.functions.last().expect("active function scope").chunk.code.len()
    }

    fn line(&self) -> u32 {
        self.previous.line
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.line();
        self.chunk_mut().write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.chunk_mut().write_op(op, line);
    }

    fn emit_two(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_u16_placeholder(&mut self) -> usize {
        let offset = self.chunk_len();
        self.emit_byte(0xFF);
        self.emit_byte(0xFF);
        offset
    }

    /// Emits a jump opcode plus a two-byte placeholder offset, returning the
    /// placeholder's position for later patching.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_u16_placeholder()
    }

    /// Patches a previously-emitted jump to land at the current end of the
    /// chunk (a forward jump's offset is relative to just past its operand).
    fn patch_jump(&mut self, offset: usize) {
        let target = self.chunk_len();
        let jump = target - (offset + 2);
        if jump > u16::MAX as usize {
            self.error_at_previous("jump distance too large");
            return;
        }
        self.chunk_mut().patch_u16(offset, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let distance = self.chunk_len() + 2 - loop_start;
        if distance > u16::MAX as usize {
            self.error_at_previous("loop body too large");
        }
        self.emit_byte(((distance as u16) >> 8) as u8);
        self.emit_byte((distance as u16) as u8);
    }

    /// Patches a two-byte operand (recorded by [`emit_u16_placeholder`]) to
    /// an absolute chunk offset, for `PushExceptionHandler`'s handler/finally
    /// addresses -- unlike `Jump`/`Loop`, those are read by the VM as
    /// absolute instruction pointers, not relative offsets.
    fn patch_absolute(&mut self, offset: usize, target: usize) {
        if target > u16::MAX as usize {
            self.error_at_previous("chunk too large to address");
            return;
        }
        self.chunk_mut().patch_u16(offset, target as u16);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = self.chunk_mut().add_constant(value);
        if idx >= MAX_CONSTANTS {
            self.error_at_previous("too many constants in one chunk");
            return 0;
        }
        idx as u8
    }

    fn identifier_constant(&mut self, name: &[u8]) -> u8 {
        let handle = self.heap.intern(name);
        self.make_constant(Value::Obj(handle))
    }

    /// Emits a constant, using the index-based `ConstantZero/One/Two`
    /// shortcuts when the constant lands at one of those indices.
    fn emit_constant(&mut self, value: Value) {
        let idx = self.chunk_mut().add_constant(value);
        if idx >= MAX_CONSTANTS {
            self.error_at_previous("too many constants in one chunk");
            return;
        }
        match idx {
            0 => self.emit_op(OpCode::ConstantZero),
            1 => self.emit_op(OpCode::ConstantOne),
            2 => self.emit_op(OpCode::ConstantTwo),
            _ => self.emit_two(OpCode::Constant, idx as u8),
        }
    }

    // --- scopes/locals ----------------------------------------------------

    fn begin_scope(&mut self) {
        self.functions.last_mut().expect("active function scope").scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let depth = {
            let scope = self.functions.last_mut().expect("active function scope");
            scope.scope_depth -= 1;
            scope.scope_depth
        };
        loop {
            let captured = {
                let scope = self.functions.last_mut().expect("active function scope");
                match scope.locals.last() {
                    Some(local) if local.depth > depth => {
                        let captured = local.is_captured;
                        scope.locals.pop();
                        captured
                    }
                    _ => break,
                }
            };
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn scope_depth(&self) -> i32 {
        self.functions.last().expect("active function scope").scope_depth
    }

    fn add_local(&mut self, name: &[u8]) {
        let scope = self.functions.last_mut().expect("active function scope");
        if scope.locals.len() >= MAX_LOCALS {
            self.error_at_previous("too many local variables in one function");
            return;
        }
        scope.locals.push(Local { name: name.to_vec(), depth: -1, is_captured: false });
    }

    fn mark_initialized(&mut self) {
        let scope = self.functions.last_mut().expect("active function scope");
        if scope.scope_depth == 0 {
            return;
        }
        let depth = scope.scope_depth;
        if let Some(local) = scope.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn declare_variable(&mut self, name: &[u8]) {
        let scope = self.functions.last().expect("active function scope");
        if scope.scope_depth == 0 {
            return;
        }
        let depth = scope.scope_depth;
        for local in scope.locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                self.error_at_previous("a variable with this name is already declared in this scope");
                return;
            }
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme.to_vec();
        self.declare_variable(&name);
        if self.scope_depth() > 0 {
            return 0;
        }
        self.identifier_constant(&name)
    }

    fn define_variable(&mut self, global_idx: u8) {
        if self.scope_depth() > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_two(OpCode::DefineGlobal, global_idx);
    }

    fn resolve_local(&self, depth_from_top: usize, name: &[u8]) -> Option<u8> {
        let scope = &self.functions[self.functions.len() - 1 - depth_from_top];
        for (i, local) in scope.locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    return None;
                }
                return Some(i as u8);
            }
        }
        None
    }

    /// Searches the immediately enclosing function, then recurses outward,
    /// threading upvalue descriptors through every intermediate scope.
    fn resolve_upvalue(&mut self, depth_from_top: usize, name: &[u8]) -> Option<u8> {
        if depth_from_top + 1 >= self.functions.len() {
            return None;
        }
        if let Some(local_idx) = self.resolve_local(depth_from_top + 1, name) {
            let scope_idx = self.functions.len() - 1 - (depth_from_top + 1);
            self.functions[scope_idx].locals[local_idx as usize].is_captured = true;
            return Some(self.add_upvalue(depth_from_top, local_idx, true));
        }
        if let Some(upvalue_idx) = self.resolve_upvalue(depth_from_top + 1, name) {
            return Some(self.add_upvalue(depth_from_top, upvalue_idx, false));
        }
        None
    }

    fn add_upvalue(&mut self, depth_from_top: usize, index: u8, is_local: bool) -> u8 {
        let scope_idx = self.functions.len() - 1 - depth_from_top;
        let scope = &mut self.functions[scope_idx];
        for (i, up) in scope.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        if scope.upvalues.len() >= MAX_UPVALUES {
            self.error_at_previous("too many closure variables in one function");
            return 0;
        }
        scope.upvalues.push(UpvalueDesc { index, is_local });
        (scope.upvalues.len() - 1) as u8
    }

    // --- function scope lifecycle ------------------------------------------

    fn push_function_scope(&mut self, kind: FunctionKind, name: Option<ObjHandle>) {
        self.functions.push(FunctionScope::new(kind, name));
    }

    fn end_function_scope(&mut self) -> ObjHandle {
        self.emit_return_default();
        let scope = self.functions.pop().expect("function scope to end");
        let function = ObjFunction {
            arity: scope.arity,
            upvalue_count: scope.upvalues.len() as u8,
            chunk: scope.chunk,
            name: scope.name,
        };
        self.heap.insert(Obj::Function(function))
    }

    fn emit_return_default(&mut self) {
        let kind = self.functions.last().expect("active function scope").kind;
        if kind == FunctionKind::Initializer {
            self.emit_two(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    /// Wraps the just-ended function in a `Closure` opcode with its upvalue
    /// descriptor operands, run from the *enclosing* scope (the function
    /// itself has already been popped by `end_function_scope`).
    fn emit_closure(&mut self, function: ObjHandle, upvalues: &[UpvalueDesc]) {
        let idx = self.make_constant(Value::Obj(function));
        self.emit_two(OpCode::Closure, idx);
        for up in upvalues {
            self.emit_byte(if up.is_local { 1 } else { 0 });
            self.emit_byte(up.index);
        }
    }

    // --- variables ----------------------------------------------------

    fn named_variable(&mut self, name: &[u8], can_assign: bool) {
        let (get_op, set_op, arg) = if let Some(local) = self.resolve_local(0, name) {
            (OpCode::GetLocal, OpCode::SetLocal, local)
        } else if let Some(upvalue) = self.resolve_upvalue(0, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, upvalue)
        } else {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        };

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_two(set_op, arg);
            return;
        }
        if can_assign {
            if let Some(op) = self.current.kind.compound_op() {
                self.advance();
                self.emit_two(get_op, arg);
                self.expression();
                self.emit_op(op);
                self.emit_two(set_op, arg);
                return;
            }
        }
        self.emit_two(get_op, arg);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous.lexeme.to_vec();
        self.named_variable(&name, can_assign);
    }

    // --- top-level dispatch ---------------------------------------------

    fn declaration(&mut self) {
        if self.match_kind(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_kind(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_kind(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_kind(TokenKind::Print) {
            self.print_statement();
        } else if self.match_kind(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block_body();
            self.end_scope();
        } else if self.match_kind(TokenKind::If) {
            self.if_statement();
        } else if self.match_kind(TokenKind::While) {
            self.while_statement();
        } else if self.match_kind(TokenKind::For) {
            self.for_statement();
        } else if self.match_kind(TokenKind::Switch) {
            self.switch_statement();
        } else if self.match_kind(TokenKind::Try) {
            self.try_statement();
        } else if self.match_kind(TokenKind::Return) {
            self.return_statement();
        } else if self.match_kind(TokenKind::Throw) {
            self.throw_statement();
        } else if self.match_kind(TokenKind::Break) {
            self.break_statement();
        } else if self.match_kind(TokenKind::Continue) {
            self.continue_statement();
        } else {
            self.expression_statement();
        }
    }

    // --- declarations -------------------------------------------------

    fn var_declaration(&mut self) {
        let global = self.parse_variable("expect a variable name");
        if self.match_kind(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "expect ';' after a variable declaration");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("expect a function name");
        self.mark_initialized();
        let name = self.previous.lexeme.to_vec();
        self.function(FunctionKind::Function, &name);
        self.define_variable(global);
    }

    const RESERVED_CLASS_NAMES: [&'static [u8]; 5] =
        [b"Number", b"Boolean", b"String", b"Array", b"Exception"];

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "expect a class name");
        let name_token = self.previous.clone();
        let name = name_token.lexeme.to_vec();
        if Self::RESERVED_CLASS_NAMES.contains(&name.as_slice()) {
            self.error_at_previous("cannot redeclare a reserved built-in class");
        }
        self.declare_variable(&name);
        let name_const = self.identifier_constant(&name);
        self.emit_two(OpCode::Class, name_const);
        self.define_variable(name_const);

        self.classes.push(ClassScope { has_superclass: false });

        if self.match_kind(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "expect a superclass name");
            let super_name = self.previous.lexeme.to_vec();
            if super_name == name {
                self.error_at_previous("a class cannot inherit from itself");
            }
            self.variable_get_only(&super_name);
            self.begin_scope();
            self.add_local(b"super");
            self.mark_initialized();
            self.named_variable(&name, false);
            // `Inherit` peeks both the subclass (top) and superclass
            // (second from top) without popping either. The superclass
            // value underneath stays in place as the `super` local's
            // backing slot -- `end_scope` pops it when the class body
            // closes -- only the transient subclass copy is discarded here.
            self.emit_op(OpCode::Inherit);
            self.emit_op(OpCode::Pop);
            self.classes.last_mut().expect("class scope just pushed").has_superclass = true;
        }

        self.named_variable(&name, false);
        self.consume(TokenKind::LeftBrace, "expect '{' before class body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.class_member();
        }
        self.consume(TokenKind::RightBrace, "expect '}' after class body");
        self.emit_op(OpCode::Pop);

        if self.classes.last().expect("class scope").has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    /// Reads a plain variable reference for its value only, never treating
    /// it as an assignment target (used for the superclass name, which is
    /// never itself assignable syntax in this position).
    fn variable_get_only(&mut self, name: &[u8]) {
        self.named_variable(name, false);
    }

    fn class_member(&mut self) {
        let is_static = self.match_kind(TokenKind::Static);
        // `init` scans as its own keyword token rather than `Identifier`,
        // so it needs to be accepted here alongside plain member names.
        let is_init = self.check(TokenKind::Init);
        if !is_init && !self.check(TokenKind::Identifier) {
            self.error_at_current("expect a member name");
            return;
        }
        self.advance();
        let name = if is_init { b"init".to_vec() } else { self.previous.lexeme.to_vec() };
        if self.check(TokenKind::LeftParen) {
            let name_const = self.identifier_constant(&name);
            let kind = if !is_static && is_init {
                FunctionKind::Initializer
            } else {
                FunctionKind::Method
            };
            self.function(kind, &name);
            let op = if is_static { OpCode::StaticMethod } else { OpCode::Method };
            self.emit_two(op, name_const);
        } else if self.match_kind(TokenKind::Equal) {
            if !is_static {
                self.error_at_previous("instance fields must be declared inside a method, not the class body");
                return;
            }
            let name_const = self.identifier_constant(&name);
            self.expression();
            self.consume(TokenKind::Semicolon, "expect ';' after a static field initializer");
            self.emit_two(OpCode::StaticField, name_const);
        } else {
            self.error_at_current("expect '(' for a method or '=' for a static field");
        }
    }

    fn function(&mut self, kind: FunctionKind, name: &[u8]) {
        let name_handle = self.heap.intern(name);
        self.push_function_scope(kind, Some(name_handle));
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "expect '(' after a function name");
        if !self.check(TokenKind::RightParen) {
            loop {
                let scope = self.functions.last_mut().expect("active function scope");
                scope.arity += 1;
                if scope.arity > 255 {
                    self.error_at_current("a function cannot have more than 255 parameters");
                }
                let param = self.parse_variable("expect a parameter name");
                self.define_variable(param);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expect ')' after parameters");
        self.consume(TokenKind::LeftBrace, "expect '{' before a function body");
        self.block_body();
        self.finish_function();
    }

    /// Closes the current function scope and emits the `Closure` opcode
    /// that wraps it, into the *enclosing* scope's bytecode.
    fn finish_function(&mut self) {
        let upvalues = self.functions.last().expect("active function scope").upvalues.clone();
        let function = self.end_function_scope();
        self.emit_closure(function, &upvalues);
    }

    /// `|a, b| expr` or `|a, b| { ... }`. The opening `|` has already been
    /// consumed by the caller (it is recognized as a prefix rule on the
    /// `Pipe` token); a bare `||` scans as two adjacent `Pipe` tokens and
    /// falls out of the parameter loop immediately.
    fn lambda(&mut self) {
        self.push_function_scope(FunctionKind::Function, None);
        self.begin_scope();
        if !self.check(TokenKind::Pipe) {
            loop {
                let scope = self.functions.last_mut().expect("active function scope");
                scope.arity += 1;
                if scope.arity > 255 {
                    self.error_at_current("a closure cannot have more than 255 parameters");
                }
                let param = self.parse_variable("expect a parameter name");
                self.define_variable(param);
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::Pipe, "expect '|' after closure parameters");
        if self.match_kind(TokenKind::LeftBrace) {
            self.block_body();
        } else {
            self.expression();
            self.emit_op(OpCode::Return);
        }
        self.finish_function();
    }

    // --- blocks/statements ----------------------------------------------

    fn block_body(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "expect '}' to close a block");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "expect ';' after a value");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "expect ';' after an expression");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "expect '(' after 'if'");
        self.expression();
        self.consume(TokenKind::RightParen, "expect ')' after the condition");
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        if self.match_kind(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        self.consume(TokenKind::LeftParen, "expect '(' after 'while'");
        self.expression();
        self.consume(TokenKind::RightParen, "expect ')' after the condition");
        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.loops.push(LoopScope {
            continue_target: loop_start,
            scope_depth: self.scope_depth(),
            break_jumps: Vec::new(),
            is_loop: true,
            for_shadow: None,
        });
        self.statement();
        self.emit_loop(loop_start);
        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
        let scope = self.loops.pop().expect("loop scope just pushed");
        for jump in scope.break_jumps {
            self.patch_jump(jump);
        }
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "expect '(' after 'for'");

        let mut declared_var: Option<(Vec<u8>, u8)> = None;
        if self.match_kind(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_kind(TokenKind::Var) {
            let name = {
                self.consume(TokenKind::Identifier, "expect a variable name");
                self.previous.lexeme.to_vec()
            };
            self.declare_variable(&name);
            if self.match_kind(TokenKind::Equal) {
                self.expression();
            } else {
                self.emit_op(OpCode::Nil);
            }
            self.consume(TokenKind::Semicolon, "expect ';' after a loop initializer");
            self.mark_initialized();
            let slot = self.resolve_local(0, &name).expect("just declared");
            declared_var = Some((name, slot));
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump = None;
        if !self.match_kind(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "expect ';' after a loop condition");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.check(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "expect ')' after for clauses");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        } else {
            self.consume(TokenKind::RightParen, "expect ')' after for clauses");
        }

        self.loops.push(LoopScope {
            continue_target: loop_start,
            scope_depth: self.scope_depth(),
            break_jumps: Vec::new(),
            is_loop: true,
            for_shadow: None,
        });

        match declared_var {
            Some((name, outer_slot)) => {
                // Fresh per-iteration copy, shadowing the loop variable under
                // its own name so the body's references (and any closures it
                // creates) resolve to this iteration's copy rather than the
                // outer slot that the increment clause mutates.
                self.begin_scope();
                self.emit_two(OpCode::GetLocal, outer_slot);
                self.add_local(&name);
                self.mark_initialized();
                let inner_slot = (self.functions.last().expect("active function scope").locals.len() - 1) as u8;
                self.loops.last_mut().expect("loop scope just pushed").for_shadow = Some((inner_slot, outer_slot));
                self.statement();
                self.emit_two(OpCode::GetLocal, inner_slot);
                self.emit_two(OpCode::SetLocal, outer_slot);
                self.emit_op(OpCode::Pop);
                self.end_scope();
            }
            None => self.statement(),
        }

        self.emit_loop(loop_start);
        if let Some(jump) = exit_jump {
            self.patch_jump(jump);
            self.emit_op(OpCode::Pop);
        }
        let scope = self.loops.pop().expect("loop scope just pushed");
        for jump in scope.break_jumps {
            self.patch_jump(jump);
        }
        self.end_scope();
    }

    /// `switch` compiles its discriminant as an anonymous compiler-local so
    /// `end_scope`'s usual local-cleanup walk pops it without any bespoke
    /// bookkeeping. `break`'s target depth is recorded from outside the
    /// discriminant's own scope, so a `break` pops the discriminant itself
    /// on its way out instead of leaking it past the jump.
    fn switch_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "expect '(' after 'switch'");
        self.expression();
        self.consume(TokenKind::RightParen, "expect ')' after the switch value");
        self.consume(TokenKind::LeftBrace, "expect '{' before switch body");

        let outer_depth = self.scope_depth();
        self.begin_scope();
        self.add_local(b"");
        self.mark_initialized();

        self.loops.push(LoopScope {
            continue_target: 0,
            scope_depth: outer_depth,
            break_jumps: Vec::new(),
            is_loop: false,
            for_shadow: None,
        });

        if !self.check(TokenKind::Case) && !self.check(TokenKind::Default) && !self.check(TokenKind::RightBrace) {
            self.error_at_current("a statement cannot appear before the first 'case' or 'default'");
        }

        let mut pending_jump: Option<usize> = None;
        let mut seen_default = false;
        while self.check(TokenKind::Case) || self.check(TokenKind::Default) {
            if let Some(jump) = pending_jump.take() {
                self.patch_jump(jump);
            }
            if self.match_kind(TokenKind::Case) {
                if seen_default {
                    self.error_at_previous("'default' must be the last case in a switch");
                }
                self.emit_op(OpCode::Dup);
                self.expression();
                self.consume(TokenKind::Colon, "expect ':' after a case value");
                self.emit_op(OpCode::Equal);
                pending_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
                self.emit_op(OpCode::Pop);
            } else {
                self.consume(TokenKind::Default, "expect 'default'");
                self.consume(TokenKind::Colon, "expect ':' after 'default'");
                seen_default = true;
            }
            while !self.check(TokenKind::Case)
                && !self.check(TokenKind::Default)
                && !self.check(TokenKind::RightBrace)
                && !self.check(TokenKind::Eof)
            {
                self.statement();
            }
        }
        if let Some(jump) = pending_jump {
            self.patch_jump(jump);
        }
        self.consume(TokenKind::RightBrace, "expect '}' to close a switch body");

        // `end_scope` first so break's own pops and the normal-path pops
        // are disjoint code paths -- patching break jumps to land here
        // (after cleanup) avoids a double pop of the discriminant.
        self.end_scope();
        let scope = self.loops.pop().expect("loop scope just pushed");
        for jump in scope.break_jumps {
            self.patch_jump(jump);
        }
    }

    /// `break` pops every local declared inside the nearest loop/switch
    /// scope, then jumps past it -- shared machinery for both constructs.
    fn break_statement(&mut self) {
        if self.loops.is_empty() {
            self.error_at_previous("'break' outside a loop or switch");
        } else {
            self.emit_pops_above(self.loops.last().expect("checked non-empty").scope_depth);
            let jump = self.emit_jump(OpCode::Jump);
            self.loops.last_mut().expect("checked non-empty").break_jumps.push(jump);
        }
        self.consume(TokenKind::Semicolon, "expect ';' after 'break'");
    }

    fn continue_statement(&mut self) {
        match self.loops.iter().rposition(|l| l.is_loop) {
            Some(idx) => {
                let (target, depth, shadow) =
                    (self.loops[idx].continue_target, self.loops[idx].scope_depth, self.loops[idx].for_shadow);
                if let Some((inner_slot, outer_slot)) = shadow {
                    self.emit_two(OpCode::GetLocal, inner_slot);
                    self.emit_two(OpCode::SetLocal, outer_slot);
                    self.emit_op(OpCode::Pop);
                }
                self.emit_pops_above(depth);
                self.emit_loop(target);
            }
            None => self.error_at_previous("'continue' outside a loop"),
        }
        self.consume(TokenKind::Semicolon, "expect ';' after 'continue'");
    }

    /// Pops (via `Pop`/`CloseUpvalue`) every local declared deeper than
    /// `target_depth` in the current function, without touching the
    /// compiler's own bookkeeping -- used for non-local exits (`break`,
    /// `continue`) that jump past a scope's normal `end_scope` call.
    fn emit_pops_above(&mut self, target_depth: i32) {
        let scope = self.functions.last().expect("active function scope");
        let to_pop: Vec<bool> =
            scope.locals.iter().rev().take_while(|l| l.depth > target_depth).map(|l| l.is_captured).collect();
        for captured in to_pop {
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn return_statement(&mut self) {
        let kind = self.functions.last().expect("active function scope").kind;
        if kind == FunctionKind::Script {
            self.error_at_previous("cannot return from top-level code");
        }
        if self.match_kind(TokenKind::Semicolon) {
            self.emit_return_default();
            return;
        }
        if kind == FunctionKind::Initializer {
            self.error_at_previous("cannot return a value from an initializer");
        }
        self.expression();
        self.consume(TokenKind::Semicolon, "expect ';' after a return value");
        self.emit_op(OpCode::Return);
    }

    fn throw_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "expect ';' after a thrown value");
        self.emit_op(OpCode::Throw);
    }

    /// A deliberately-unmatchable name: no identifier can scan to this byte
    /// sequence, so a catch-less `try { } finally { }` always falls through
    /// `class_matches` into the VM's `fallback` (finally-only) path.
    const UNMATCHABLE_CATCH_NAME: &'static [u8] = b" unmatched ";

    /// `try` compiles to a `PushExceptionHandler` region whose operands are
    /// patched once the catch/finally addresses are known. Both the
    /// try-body's normal-completion path and the catch-body's
    /// normal-completion path push an identical `false` sentinel before
    /// falling into any compiled `finally` block, matching the shape of the
    /// `true` sentinel the VM's own fallback path pushes ahead of
    /// `PropagateException`.
    fn try_statement(&mut self) {
        let class_idx_offset = self.chunk_len();
        self.emit_op(OpCode::PushExceptionHandler);
        self.emit_byte(0xFF);
        let handler_addr_offset = self.emit_u16_placeholder();
        let finally_addr_offset = self.emit_u16_placeholder();

        self.consume(TokenKind::LeftBrace, "expect '{' to open a try body");
        self.begin_scope();
        self.block_body();
        self.end_scope();
        self.emit_op(OpCode::PopExceptionHandler);

        let has_catch = self.check(TokenKind::Catch);
        let mut skip_jump = None;
        if has_catch {
            self.emit_op(OpCode::False);
            skip_jump = Some(self.emit_jump(OpCode::Jump));
        }

        if has_catch {
            self.advance();
            self.consume(TokenKind::LeftParen, "expect '(' after 'catch'");
            self.consume(TokenKind::Identifier, "expect an exception type name");
            let type_name = self.previous.lexeme.to_vec();
            let class_idx = self.identifier_constant(&type_name);
            self.patch_byte(class_idx_offset + 1, class_idx);
            let handler_target = self.chunk_len();
            self.patch_absolute(handler_addr_offset, handler_target);

            self.begin_scope();
            // The matched exception value arrives pre-pushed by the VM; it
            // always occupies a local slot, named if bound with `as name`
            // or anonymous otherwise, so cleanup pops exactly one value.
            let mut bound = false;
            if self.check_contextual_keyword("as") {
                self.advance();
                self.consume(TokenKind::Identifier, "expect a binding name after 'as'");
                let name = self.previous.lexeme.to_vec();
                self.add_local(&name);
                bound = true;
            }
            self.consume(TokenKind::RightParen, "expect ')' after a catch clause");
            if !bound {
                self.add_local(b"");
            }
            self.mark_initialized();
            self.consume(TokenKind::LeftBrace, "expect '{' to open a catch body");
            self.block_body();
            self.end_scope();
            self.emit_op(OpCode::False);
        } else {
            self.patch_byte_with_unmatchable_name(class_idx_offset);
        }

        if let Some(jump) = skip_jump {
            self.patch_jump(jump);
        }

        let has_finally = self.match_kind(TokenKind::Finally);
        if !has_catch && !has_finally {
            self.error_at_previous("expect 'catch' or 'finally' after a try body");
            return;
        }

        if has_finally {
            if !has_catch {
                // the try-normal path reaches here directly; it still needs
                // exactly one sentinel before falling into finally.
                self.emit_op(OpCode::False);
            }
            let finally_target = self.chunk_len();
            self.patch_absolute(finally_addr_offset, finally_target);
            self.consume(TokenKind::LeftBrace, "expect '{' to open a finally body");
            self.begin_scope();
            self.block_body();
            self.end_scope();
            self.emit_op(OpCode::PropagateException);
        } else {
            self.patch_absolute(finally_addr_offset, 0xFFFF);
            self.emit_op(OpCode::Pop);
        }
    }

    fn patch_byte(&mut self, offset: usize, value: u8) {
        self.chunk_mut().code[offset] = value;
    }

    fn patch_byte_with_unmatchable_name(&mut self, class_idx_offset: usize) {
        let idx = self.identifier_constant(Self::UNMATCHABLE_CATCH_NAME);
        self.patch_byte(class_idx_offset + 1, idx);
    }

    // --- expressions --------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix(self.previous.kind, can_assign) {
            self.error_at_previous("expect an expression");
            return;
        }
        while precedence <= self.current.kind.infix_precedence() {
            self.advance();
            self.infix(self.previous.kind, can_assign);
        }
        if can_assign && self.match_kind(TokenKind::Equal) {
            self.error_at_previous("invalid assignment target");
        }
    }

    fn prefix(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        match kind {
            TokenKind::LeftParen => self.grouping(),
            TokenKind::LeftBracket => self.array_literal(),
            TokenKind::Minus | TokenKind::Bang => self.unary(),
            TokenKind::Number => self.number(),
            TokenKind::String => self.string(),
            TokenKind::True | TokenKind::False | TokenKind::Nil => self.literal(kind),
            TokenKind::Identifier => self.variable(can_assign),
            TokenKind::This => self.this_expr(),
            TokenKind::Super => self.super_expr(),
            TokenKind::Pipe => self.lambda(),
            _ => return false,
        }
        true
    }

    fn infix(&mut self, kind: TokenKind, can_assign: bool) {
        match kind {
            TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Slash
            | TokenKind::Star
            | TokenKind::StarStar
            | TokenKind::Percent
            | TokenKind::BangEqual
            | TokenKind::EqualEqual
            | TokenKind::Greater
            | TokenKind::GreaterEqual
            | TokenKind::Less
            | TokenKind::LessEqual => self.binary(kind),
            TokenKind::And => self.and_(),
            TokenKind::Or => self.or_(),
            TokenKind::Question => self.ternary(),
            TokenKind::LeftParen => self.call(),
            TokenKind::Dot => self.dot(can_assign),
            TokenKind::LeftBracket => self.index_(can_assign),
            _ => {}
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "expect ')' after an expression");
    }

    fn unary(&mut self) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary() only called for Minus/Bang"),
        }
    }

    fn binary(&mut self, op_kind: TokenKind) {
        let next = op_kind.infix_precedence().one_higher();
        // `**` is right-associative: parse its right operand at its own
        // precedence rather than one higher.
        let rhs_precedence = if op_kind == TokenKind::StarStar { Precedence::Exponent } else { next };
        self.parse_precedence(rhs_precedence);
        match op_kind {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::Percent => self.emit_op(OpCode::Modulus),
            TokenKind::StarStar => self.emit_op(OpCode::Exponent),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            _ => unreachable!("binary() only called for arithmetic/comparison tokens"),
        }
    }

    fn ternary(&mut self) {
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Ternary);
        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        self.consume(TokenKind::Colon, "expect ':' in a ternary expression");
        self.parse_precedence(Precedence::Ternary);
        self.patch_jump(else_jump);
    }

    fn and_(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self) {
        let text = self.previous.text();
        let value: f64 = text.parse().unwrap_or_else(|_| {
            self.had_error = true;
            0.0
        });
        self.emit_constant(Value::Number(value));
    }

    fn string(&mut self) {
        let bytes = self.previous.literal.clone().expect("string token carries decoded bytes");
        let handle = self.heap.intern(&bytes);
        self.emit_constant(Value::Obj(handle));
    }

    fn literal(&mut self, kind: TokenKind) {
        match kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("literal() only called for True/False/Nil"),
        }
    }

    /// `[ ]` array literal. Elements parse at `Container` precedence so a
    /// bare `,`-separated list inside the brackets can't be mistaken for a
    /// comma operator at a lower precedence.
    fn array_literal(&mut self) {
        let mut count: u16 = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.parse_precedence(Precedence::Container);
                count += 1;
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
                if self.check(TokenKind::RightBracket) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "expect ']' to close an array literal");
        if count > 255 {
            self.error_at_previous("an array literal cannot have more than 255 elements");
            return;
        }
        self.emit_two(OpCode::Array, count as u8);
    }

    fn call(&mut self) {
        let argc = self.argument_list();
        self.emit_two(OpCode::Call, argc);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u16 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                count += 1;
                if count > 255 {
                    self.error_at_previous("a call cannot have more than 255 arguments");
                }
                if !self.match_kind(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "expect ')' after arguments");
        count as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "expect a property name after '.'");
        let name = self.previous.lexeme.to_vec();
        let name_const = self.identifier_constant(&name);

        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_two(OpCode::SetProperty, name_const);
            return;
        }
        if can_assign {
            if let Some(op) = self.current.kind.compound_op() {
                self.advance();
                self.emit_op(OpCode::Dup);
                self.emit_two(OpCode::GetProperty, name_const);
                self.expression();
                self.emit_op(op);
                self.emit_two(OpCode::SetProperty, name_const);
                return;
            }
        }
        if self.match_kind(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_two(OpCode::Invoke, name_const);
            self.emit_byte(argc);
            return;
        }
        self.emit_two(OpCode::GetProperty, name_const);
    }

    /// Index get/set only -- compound assignment through `a[i] += v` is not
    /// supported, since duplicating both the target and the index ahead of
    /// `GetIndex`/`SetIndex` needs more than a single `Dup` (see DESIGN.md).
    fn index_(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "expect ']' after an index expression");
        if can_assign && self.match_kind(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetIndex);
            return;
        }
        self.emit_op(OpCode::GetIndex);
    }

    fn this_expr(&mut self) {
        if self.classes.is_empty() {
            self.error_at_previous("'this' outside a method");
        }
        self.named_variable(b"this", false);
    }

    fn super_expr(&mut self) {
        if self.classes.is_empty() {
            self.error_at_previous("'super' outside a method");
        } else if !self.classes.last().expect("checked non-empty").has_superclass {
            self.error_at_previous("'super' used in a class with no superclass");
        }
        self.consume(TokenKind::Dot, "expect '.' after 'super'");
        self.consume(TokenKind::Identifier, "expect a superclass method name");
        let name = self.previous.lexeme.to_vec();
        let name_const = self.identifier_constant(&name);

        if self.match_kind(TokenKind::LeftParen) {
            self.named_variable(b"this", false);
            let argc = self.argument_list();
            self.named_variable(b"super", false);
            self.emit_two(OpCode::SuperInvoke, name_const);
            self.emit_byte(argc);
        } else {
            self.named_variable(b"super", false);
            self.emit_two(OpCode::GetSuper, name_const);
        }
    }
}

impl TokenKind {
    fn infix_precedence(self) -> Precedence {
        use TokenKind::*;
        match self {
            Or => Precedence::Or,
            And => Precedence::And,
            EqualEqual | BangEqual => Precedence::Equality,
            Greater | GreaterEqual | Less | LessEqual => Precedence::Comparison,
            Plus | Minus => Precedence::Term,
            Star | Slash | Percent => Precedence::Factor,
            StarStar => Precedence::Exponent,
            Question => Precedence::Ternary,
            LeftParen | Dot | LeftBracket => Precedence::Call,
            _ => Precedence::None,
        }
    }

    fn compound_op(self) -> Option<OpCode> {
        match self {
            TokenKind::PlusEqual => Some(OpCode::Add),
            TokenKind::MinusEqual => Some(OpCode::Subtract),
            TokenKind::StarEqual => Some(OpCode::Multiply),
            TokenKind::SlashEqual => Some(OpCode::Divide),
            TokenKind::PercentEqual => Some(OpCode::Modulus),
            _ => None,
        }
    }
}
