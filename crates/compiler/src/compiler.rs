//! Single-Pass Bytecode Compiler
//!
//! A Pratt parser that emits bytecode as it goes. The parser never looks
//! past one token (`current` plus `previous`); every expression form is
//! driven by the rule table's prefix/infix entries and their precedences.
//!
//! One `FnCompiler` exists per function being compiled, chained through
//! `enclosing` up to the implicit top-level script. The chain is what
//! resolves upvalues, and it doubles as a GC root set: the functions under
//! construction hold every chunk and constant allocated so far, so when a
//! compile-time allocation triggers a collection the chain is marked along
//! with whatever external roots the caller handed in.
//!
//! Errors are collected, not returned eagerly: the first error in a
//! statement flips panic mode, later ones are suppressed, and
//! `synchronize` clears the panic at the next statement boundary so one
//! mistake doesn't cascade.

use fer_core::chunk::{Chunk, OpCode};
use fer_core::heap::Heap;
use fer_core::object::{Obj, ObjFunction};
use fer_core::value::{ObjRef, Value};

use crate::scanner::{Scanner, Token, TokenKind};

/// Locals and upvalues are addressed by a single byte.
const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

#[derive(Debug, Default, Clone)]
pub struct CompileOptions {
    /// Disassemble each function to stderr as it finishes compiling.
    pub dump_bytecode: bool,
}

/// All diagnostics collected during one compile. `compile` yields no
/// function if any were reported.
#[derive(Debug)]
pub struct CompileError {
    pub diagnostics: Vec<String>,
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.diagnostics.join("\n"))
    }
}

impl std::error::Error for CompileError {}

/// Precedence lattice, lowest to highest. Binary operators parse their
/// right operand one level up, which is what makes them left-associative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . () []
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

/// One row of the Pratt table: how to parse a token in prefix position, in
/// infix position, and how strongly it binds as an infix operator.
struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Function,
    Initializer,
    Method,
    Script,
}

#[derive(Debug)]
struct Local<'src> {
    name: &'src [u8],
    /// Lexical depth, or -1 while the initializer is still being compiled
    /// so `var x = x;` is caught.
    depth: i32,
    is_captured: bool,
    is_perm: bool,
}

#[derive(Debug, Clone, Copy)]
struct UpvalueMeta {
    index: u8,
    is_local: bool,
}

#[derive(Debug)]
struct LoopContext {
    /// Where `continue` and the loop's back-edge jump to. For `for` loops
    /// with an increment this is the increment block.
    start: usize,
    /// Locals above this depth are discarded by `break`/`continue`.
    scope_depth: i32,
    break_jumps: Vec<usize>,
}

/// Per-function compile state. The enclosing chain reaches up to the
/// top-level script.
struct FnCompiler<'src> {
    enclosing: Option<Box<FnCompiler<'src>>>,
    function: ObjRef,
    fn_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueMeta>,
    scope_depth: i32,
    loops: Vec<LoopContext>,
}

impl<'src> FnCompiler<'src> {
    fn new(function: ObjRef, fn_type: FunctionType) -> FnCompiler<'src> {
        // Slot 0 belongs to the compiler: it holds the receiver in methods
        // and the callee everywhere else.
        let slot_zero = Local {
            name: if fn_type != FunctionType::Function {
                b"this" as &[u8]
            } else {
                b""
            },
            depth: 0,
            is_captured: false,
            is_perm: false,
        };
        FnCompiler {
            enclosing: None,
            function,
            fn_type,
            locals: vec![slot_zero],
            upvalues: Vec::new(),
            scope_depth: 0,
            loops: Vec::new(),
        }
    }
}

struct ClassCompiler {
    enclosing: Option<Box<ClassCompiler>>,
    has_superclass: bool,
}

pub struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<String>,
    heap: &'h mut Heap,
    /// Roots beyond the compiler chain (the VM's globals and friends),
    /// marked whenever a compile-time allocation triggers a collection.
    extra_roots: &'h dyn Fn(&mut Heap),
    compiler: Box<FnCompiler<'src>>,
    class_compiler: Option<Box<ClassCompiler>>,
    options: &'h CompileOptions,
}

/// Compile `source` (raw bytes; non-ASCII content only means anything
/// inside string literals) to its top-level function. Diagnostics go to
/// the returned error; nothing is printed here.
pub fn compile(
    source: &[u8],
    heap: &mut Heap,
    extra_roots: &dyn Fn(&mut Heap),
    options: &CompileOptions,
) -> Result<ObjRef, CompileError> {
    let mut parser = Parser::new(source, heap, extra_roots, options);
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    let (function, _) = parser.pop_compiler();
    if parser.had_error {
        Err(CompileError {
            diagnostics: parser.diagnostics,
        })
    } else {
        Ok(function)
    }
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(
        source: &'src [u8],
        heap: &'h mut Heap,
        extra_roots: &'h dyn Fn(&mut Heap),
        options: &'h CompileOptions,
    ) -> Parser<'src, 'h> {
        // A REPL session may arrive with a heap already near its trigger.
        if heap.should_collect() {
            heap.collect(|h| extra_roots(h));
        }
        let function = heap.alloc(Obj::Function(ObjFunction::default()));
        let placeholder = Token {
            kind: TokenKind::Eof,
            lexeme: b"",
            line: 1,
        };
        Parser {
            scanner: Scanner::new(source),
            current: placeholder,
            previous: placeholder,
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            heap,
            extra_roots,
            compiler: Box::new(FnCompiler::new(function, FunctionType::Script)),
            class_compiler: None,
            options,
        }
    }

    // =========================================================================
    // Heap access with GC discipline
    // =========================================================================

    /// Allocate, collecting first if the heap asks for it. Collecting
    /// before the allocation keeps the fresh handle safe until the next
    /// allocation site.
    fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(obj)
    }

    fn intern(&mut self, bytes: &[u8]) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern(bytes)
    }

    fn collect_garbage(&mut self) {
        let extra_roots = self.extra_roots;
        let Parser { heap, compiler, .. } = self;
        heap.collect(|h| {
            let mut frame: Option<&FnCompiler> = Some(compiler);
            while let Some(c) = frame {
                h.mark_object(c.function);
                frame = c.enclosing.as_deref();
            }
            extra_roots(h);
        });
    }

    // =========================================================================
    // Error reporting
    // =========================================================================

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;

        let mut diagnostic = format!("[line {}] Error", token.line);
        match token.kind {
            TokenKind::Eof => diagnostic.push_str(" at end"),
            TokenKind::Error => {}
            _ => {
                diagnostic
                    .push_str(&format!(" at '{}'", String::from_utf8_lossy(token.lexeme)));
            }
        }
        diagnostic.push_str(&format!(": {}", message));

        self.diagnostics.push(diagnostic);
        self.had_error = true;
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    // =========================================================================
    // Token stream
    // =========================================================================

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            // Error tokens carry their diagnostic as the lexeme.
            let message = String::from_utf8_lossy(self.current.lexeme).into_owned();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // =========================================================================
    // Emitting
    // =========================================================================

    fn current_chunk(&self) -> &Chunk {
        &self.heap.as_function(self.compiler.function).chunk
    }

    fn current_chunk_mut(&mut self) -> &mut Chunk {
        let function = self.compiler.function;
        &mut self.heap.function_mut(function).chunk
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        // +2 covers the offset operand itself.
        let offset = self.current_chunk().len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }

        self.emit_byte(((offset >> 8) & 0xff) as u8);
        self.emit_byte((offset & 0xff) as u8);
    }

    /// Emit a jump with a placeholder offset; returns where to patch.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.current_chunk().len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        // -2 adjusts for the offset operand the jump reads past.
        let jump = self.current_chunk().len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }

        let chunk = self.current_chunk_mut();
        chunk.code[offset] = ((jump >> 8) & 0xff) as u8;
        chunk.code[offset + 1] = (jump & 0xff) as u8;
    }

    fn emit_return(&mut self) {
        if self.compiler.fn_type == FunctionType::Initializer {
            // An initializer always hands back the fresh instance.
            self.emit_op(OpCode::GetLocal);
            self.emit_byte(0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let constant = self.current_chunk_mut().add_constant(value);
        if constant > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        constant as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_op(OpCode::Constant);
        self.emit_byte(constant);
    }

    fn identifier_constant(&mut self, name: &[u8]) -> u8 {
        let s = self.intern(name);
        self.make_constant(Value::object(s))
    }

    // =========================================================================
    // Compiler frames
    // =========================================================================

    fn push_compiler(&mut self, fn_type: FunctionType) {
        let function = self.alloc(Obj::Function(ObjFunction::default()));
        let fresh = Box::new(FnCompiler::new(function, fn_type));
        let enclosing = std::mem::replace(&mut self.compiler, fresh);
        self.compiler.enclosing = Some(enclosing);

        // Interning the name can collect; the function is already rooted
        // through the chain by now.
        if fn_type != FunctionType::Script {
            let name = self.intern(self.previous.lexeme);
            self.heap.function_mut(function).name = Some(name);
        }
    }

    fn pop_compiler(&mut self) -> (ObjRef, Vec<UpvalueMeta>) {
        self.emit_return();
        let function = self.compiler.function;
        let upvalues = std::mem::take(&mut self.compiler.upvalues);
        self.heap.function_mut(function).upvalue_count = upvalues.len();

        if self.options.dump_bytecode && !self.had_error {
            let f = self.heap.as_function(function);
            let name = match f.name {
                Some(name) => self.heap.string_lossy(name).into_owned(),
                None => "<script>".to_string(),
            };
            fer_core::debug::dump_chunk(self.heap, &self.heap.as_function(function).chunk, &name);
        }

        if let Some(enclosing) = self.compiler.enclosing.take() {
            self.compiler = enclosing;
        }
        (function, upvalues)
    }

    // =========================================================================
    // Scopes and variables
    // =========================================================================

    fn begin_scope(&mut self) {
        self.compiler.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.compiler.scope_depth -= 1;

        while let Some(local) = self.compiler.locals.last() {
            if local.depth <= self.compiler.scope_depth {
                break;
            }
            let captured = local.is_captured;
            self.compiler.locals.pop();
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: &'src [u8], is_perm: bool) {
        if self.compiler.locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.compiler.locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
            is_perm,
        });
    }

    fn declare_variable(&mut self, is_perm: bool) {
        if self.compiler.scope_depth == 0 {
            return;
        }

        let name = self.previous.lexeme;
        let mut duplicate = false;
        for local in self.compiler.locals.iter().rev() {
            if local.depth != -1 && local.depth < self.compiler.scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }

        self.add_local(name, is_perm);
    }

    fn parse_variable(&mut self, error_message: &str, is_perm: bool) -> u8 {
        self.consume(TokenKind::Identifier, error_message);

        self.declare_variable(is_perm);
        if self.compiler.scope_depth > 0 {
            return 0;
        }

        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_initialized(&mut self) {
        if self.compiler.scope_depth == 0 {
            return;
        }
        let depth = self.compiler.scope_depth;
        if let Some(local) = self.compiler.locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8, is_perm: bool) {
        if self.compiler.scope_depth > 0 {
            self.mark_initialized();
            return;
        }

        if is_perm {
            self.emit_op(OpCode::DefineGlobalPerm);
        } else {
            self.emit_op(OpCode::DefineGlobal);
        }
        self.emit_byte(global);
    }

    fn named_variable(&mut self, name: &'src [u8], can_assign: bool) {
        let mut resolution_errors: Vec<&'static str> = Vec::new();

        let (get_op, set_op, arg, is_perm_local) =
            if let Some(slot) = resolve_local(&self.compiler, name, &mut resolution_errors) {
                let is_perm = self.compiler.locals[slot as usize].is_perm;
                (OpCode::GetLocal, OpCode::SetLocal, slot, is_perm)
            } else if let Some(slot) =
                resolve_upvalue(&mut self.compiler, name, &mut resolution_errors)
            {
                (OpCode::GetUpvalue, OpCode::SetUpvalue, slot, false)
            } else {
                let arg = self.identifier_constant(name);
                (OpCode::GetGlobal, OpCode::SetGlobal, arg, false)
            };

        for message in resolution_errors {
            self.error(message);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            if is_perm_local {
                self.error("Can't reassign to permanent variable");
            }
            self.expression();
            self.emit_op(set_op);
            self.emit_byte(arg);
        } else {
            self.emit_op(get_op);
            self.emit_byte(arg);
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };

        // Only targets parsed at assignment precedence may consume `=`.
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        // Number lexemes are pure ASCII digits and an optional dot.
        let value: f64 = std::str::from_utf8(self.previous.lexeme)
            .ok()
            .and_then(|lexeme| lexeme.parse().ok())
            .unwrap_or(0.0);
        self.emit_constant(Value::number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // Trim the quotes, then interpret escapes into the canonical bytes.
        let text = unescape(&lexeme[1..lexeme.len() - 1]);
        let s = self.intern(&text);
        self.emit_constant(Value::object(s));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => {}
        }
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous.lexeme, can_assign);
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;

        // Compile the operand first; the instruction acts on its result.
        self.parse_precedence(Precedence::Unary);

        match operator {
            TokenKind::Bang => self.emit_op(OpCode::Not),
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            _ => {}
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let rule = get_rule(operator);
        self.parse_precedence(rule.precedence.next());

        match operator {
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
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => {}
        }
    }

    fn and_(&mut self, _can_assign: bool) {
        // Short-circuit: if the left side is falsey it stays as the result.
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);

        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut arg_count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if arg_count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                arg_count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        arg_count as u8
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op(OpCode::Call);
        self.emit_byte(arg_count);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'");
        let name = self.identifier_constant(self.previous.lexeme);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetProperty);
            self.emit_byte(name);
        } else if self.match_token(TokenKind::LeftParen) {
            // receiver.name(args) collapses into one instruction.
            let arg_count = self.argument_list();
            self.emit_op(OpCode::Invoke);
            self.emit_byte(name);
            self.emit_byte(arg_count);
        } else {
            self.emit_op(OpCode::GetProperty);
            self.emit_byte(name);
        }
    }

    fn list(&mut self, _can_assign: bool) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBracket) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 elements in one list");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBracket, "Expect ']' after list.");
        self.emit_op(OpCode::List);
        self.emit_byte(count as u8);
    }

    fn dictionary(&mut self, _can_assign: bool) {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightBrace) {
            loop {
                self.expression();
                self.consume(TokenKind::Colon, "Expect ':' after key.");
                self.expression();

                if count == 255 {
                    self.error("Can't have more than 255 elements in dictionary");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after dictionary.");
        self.emit_op(OpCode::Dictionary);
        self.emit_byte(count as u8);
    }

    fn subscript(&mut self, can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightBracket, "Expect ']' after index.");

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_op(OpCode::SetItem);
        } else {
            self.emit_op(OpCode::GetItem);
        }
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_compiler.is_none() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    fn super_(&mut self, _can_assign: bool) {
        match &self.class_compiler {
            None => self.error("Can't use 'super' outside of a class."),
            Some(class) if !class.has_superclass => {
                self.error("Can't use 'super' in a class with no superclass.");
            }
            Some(_) => {}
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.identifier_constant(self.previous.lexeme);

        self.named_variable(b"this", false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(b"super", false);
            self.emit_op(OpCode::SuperInvoke);
            self.emit_byte(name);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(b"super", false);
            self.emit_op(OpCode::GetSuper);
            self.emit_byte(name);
        }
    }

    // =========================================================================
    // Declarations and statements
    // =========================================================================

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else if self.match_token(TokenKind::Perm) {
            self.perm_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Break) {
            self.break_statement();
        } else if self.match_token(TokenKind::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name", false);

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global, false);
    }

    fn perm_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.", true);

        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.error("Permanent variable must be initialized.");
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );

        self.define_variable(global, true);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.", false);
        // A function may refer to itself; it is initialized before its body.
        self.mark_initialized();
        self.function(FunctionType::Function);
        self.define_variable(global, false);
    }

    fn function(&mut self, fn_type: FunctionType) {
        self.push_compiler(fn_type);
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let function = self.compiler.function;
                self.heap.function_mut(function).arity += 1;
                if self.heap.as_function(function).arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters");
                }
                let constant = self.parse_variable("Expect parameter name", false);
                self.define_variable(constant, false);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        // No end_scope: the frame unwinds wholesale at runtime.
        let (function, upvalues) = self.pop_compiler();
        let constant = self.make_constant(Value::object(function));
        self.emit_op(OpCode::Closure);
        self.emit_byte(constant);

        for upvalue in upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);

        let fn_type = if self.previous.lexeme == b"init" {
            FunctionType::Initializer
        } else {
            FunctionType::Method
        };
        self.function(fn_type);

        self.emit_op(OpCode::Method);
        self.emit_byte(constant);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable(false);

        self.emit_op(OpCode::Class);
        self.emit_byte(name_constant);
        self.define_variable(name_constant, false);

        let enclosing = self.class_compiler.take();
        self.class_compiler = Some(Box::new(ClassCompiler {
            enclosing,
            has_superclass: false,
        }));

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);

            if class_name == self.previous.lexeme {
                self.error("A class can't inherit from itself");
            }

            // `super` lives in its own scope so sibling classes each bind
            // their own.
            self.begin_scope();
            self.add_local(b"super", false);
            self.define_variable(0, false);

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            if let Some(class) = self.class_compiler.as_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        let has_superclass = self
            .class_compiler
            .as_ref()
            .is_some_and(|class| class.has_superclass);
        if has_superclass {
            self.end_scope();
        }

        self.class_compiler = self.class_compiler.take().and_then(|class| class.enclosing);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn return_statement(&mut self) {
        if self.compiler.fn_type == FunctionType::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.compiler.fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }

            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.current_chunk().len();
        self.compiler.loops.push(LoopContext {
            start: loop_start,
            scope_depth: self.compiler.scope_depth,
            break_jumps: Vec::new(),
        });

        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);

        if let Some(finished) = self.compiler.loops.pop() {
            for jump in finished.break_jumps {
                self.patch_jump(jump);
            }
        }
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.current_chunk().len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // The increment textually precedes the body but runs after it:
            // jump over it into the body, then loop back through it.
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current_chunk().len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.compiler.loops.push(LoopContext {
            start: loop_start,
            scope_depth: self.compiler.scope_depth,
            break_jumps: Vec::new(),
        });

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }

        if let Some(finished) = self.compiler.loops.pop() {
            for jump in finished.break_jumps {
                self.patch_jump(jump);
            }
        }
        self.end_scope();
    }

    fn break_statement(&mut self) {
        if self.compiler.loops.is_empty() {
            self.error("Can't use 'break' outside of a loop.");
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after 'break'.");

        self.discard_locals();

        let jump = self.emit_jump(OpCode::Jump);
        if let Some(current) = self.compiler.loops.last_mut() {
            current.break_jumps.push(jump);
        }
    }

    fn continue_statement(&mut self) {
        if self.compiler.loops.is_empty() {
            self.error("Can't use 'continue' outside of a loop.");
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after 'continue'.");

        self.discard_locals();
        if let Some(start) = self.compiler.loops.last().map(|current| current.start) {
            self.emit_loop(start);
        }
    }

    /// Pop (or close) every local above the innermost loop's depth without
    /// forgetting them: the jump leaves the scope, the compiler state
    /// doesn't.
    fn discard_locals(&mut self) {
        let Some(loop_depth) = self.compiler.loops.last().map(|l| l.scope_depth) else {
            return;
        };

        let mut discards = Vec::new();
        for local in self.compiler.locals.iter().rev() {
            if local.depth <= loop_depth {
                break;
            }
            discards.push(local.is_captured);
        }
        for captured in discards {
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
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
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Find `name` among the compiler's locals, innermost first. A hit on a
/// still-uninitialized slot records the self-reference error but resolves
/// anyway so compilation can continue.
fn resolve_local(
    compiler: &FnCompiler,
    name: &[u8],
    errors: &mut Vec<&'static str>,
) -> Option<u8> {
    for (i, local) in compiler.locals.iter().enumerate().rev() {
        if local.name == name {
            if local.depth == -1 {
                errors.push("Can't read local variable in its own initializer.");
            }
            return Some(i as u8);
        }
    }
    None
}

fn add_upvalue(
    compiler: &mut FnCompiler,
    index: u8,
    is_local: bool,
    errors: &mut Vec<&'static str>,
) -> u8 {
    for (i, upvalue) in compiler.upvalues.iter().enumerate() {
        if upvalue.index == index && upvalue.is_local == is_local {
            return i as u8;
        }
    }

    if compiler.upvalues.len() == MAX_UPVALUES {
        errors.push("Too many closure variables in function.");
        return 0;
    }

    compiler.upvalues.push(UpvalueMeta { index, is_local });
    (compiler.upvalues.len() - 1) as u8
}

/// Resolve `name` as an upvalue: a local of the enclosing function (which
/// gets marked captured), or transitively an upvalue of it. Each level of
/// the chain records its own upvalue entry.
fn resolve_upvalue(
    compiler: &mut FnCompiler,
    name: &[u8],
    errors: &mut Vec<&'static str>,
) -> Option<u8> {
    compiler.enclosing.as_ref()?;

    let local = {
        let enclosing = compiler.enclosing.as_deref_mut()?;
        let local = resolve_local(enclosing, name, errors);
        if let Some(slot) = local {
            enclosing.locals[slot as usize].is_captured = true;
        }
        local
    };
    if let Some(slot) = local {
        return Some(add_upvalue(compiler, slot, true, errors));
    }

    let upvalue = resolve_upvalue(compiler.enclosing.as_deref_mut()?, name, errors);
    if let Some(slot) = upvalue {
        return Some(add_upvalue(compiler, slot, false, errors));
    }

    None
}

// =============================================================================
// Rule table
// =============================================================================

fn get_rule<'src, 'h>(kind: TokenKind) -> ParseRule<'src, 'h> {
    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'h>>,
        Option<ParseFn<'src, 'h>>,
        Precedence,
    ) = match kind {
        TokenKind::LeftParen => (Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        TokenKind::LeftBracket => (Some(Parser::list), Some(Parser::subscript), Precedence::Call),
        TokenKind::LeftBrace => (Some(Parser::dictionary), None, Precedence::None),
        TokenKind::Dot => (None, Some(Parser::dot), Precedence::Call),
        TokenKind::Minus => (Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        TokenKind::Plus => (None, Some(Parser::binary), Precedence::Term),
        TokenKind::Slash => (None, Some(Parser::binary), Precedence::Factor),
        TokenKind::Star => (None, Some(Parser::binary), Precedence::Factor),
        TokenKind::Bang => (Some(Parser::unary), None, Precedence::None),
        TokenKind::BangEqual => (None, Some(Parser::binary), Precedence::Equality),
        TokenKind::EqualEqual => (None, Some(Parser::binary), Precedence::Equality),
        TokenKind::Greater => (None, Some(Parser::binary), Precedence::Comparison),
        TokenKind::GreaterEqual => (None, Some(Parser::binary), Precedence::Comparison),
        TokenKind::Less => (None, Some(Parser::binary), Precedence::Comparison),
        TokenKind::LessEqual => (None, Some(Parser::binary), Precedence::Comparison),
        TokenKind::Identifier => (Some(Parser::variable), None, Precedence::None),
        TokenKind::String => (Some(Parser::string), None, Precedence::None),
        TokenKind::Number => (Some(Parser::number), None, Precedence::None),
        TokenKind::And => (None, Some(Parser::and_), Precedence::And),
        TokenKind::Or => (None, Some(Parser::or_), Precedence::Or),
        TokenKind::False => (Some(Parser::literal), None, Precedence::None),
        TokenKind::Nil => (Some(Parser::literal), None, Precedence::None),
        TokenKind::True => (Some(Parser::literal), None, Precedence::None),
        TokenKind::Super => (Some(Parser::super_), None, Precedence::None),
        TokenKind::This => (Some(Parser::this_), None, Precedence::None),
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

/// Interpret the backslash escapes of a string literal. An unrecognized
/// escape keeps the escaped byte as written.
fn unescape(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut bytes = body.iter().copied();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        match bytes.next() {
            Some(b'n') => out.push(b'\n'),
            Some(b't') => out.push(b'\t'),
            Some(b'r') => out.push(b'\r'),
            Some(b'"') => out.push(b'"'),
            Some(b'\\') => out.push(b'\\'),
            Some(other) => out.push(other),
            None => out.push(b'\\'),
        }
    }
    out
}
