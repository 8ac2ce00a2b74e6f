//! The Fer Virtual Machine
//!
//! A stack machine over the bytecode the compiler emits. Fixed limits keep
//! the frame layout simple: at most 64 call frames, with the value stack
//! reserved at 64 x 256 slots up front. A `CallFrame` is a closure, an
//! instruction offset into its chunk, and the stack index of its slot 0
//! (the callee or receiver).
//!
//! The VM owns the heap and drives collection: before any allocation that
//! finds the heap past its trigger, it marks the value stack, the active
//! frames' closures, the open upvalues, both global tables and the `init`
//! sentinel, then lets the collector run. Compilation goes through the same
//! discipline with the compiler chain as extra roots.
//!
//! Runtime errors return as values carrying the formatted call trace; the
//! stacks are reset before `interpret` hands the error to the caller.

use std::io::{self, Write};
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;

use fer_compiler::{CompileOptions, compile};
use fer_core::chunk::OpCode;
use fer_core::debug;
use fer_core::heap::Heap;
use fer_core::object::{
    Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjDictionary, ObjInstance, ObjList, ObjNative,
    ObjUpvalue,
};
use fer_core::table::Table;
use fer_core::value::{ObjRef, Value};

use crate::error::{InterpretError, RuntimeError};
use crate::natives;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

/// A host function: receives the VM, the argument count, and the stack
/// index of the first argument. Returns the value that replaces the callee
/// and arguments on the stack.
pub type NativeFn = fn(&mut Vm, usize, usize) -> Value;

#[derive(Debug, Clone, Default)]
pub struct VmOptions {
    /// Disassemble each instruction to stderr as it executes.
    pub trace_execution: bool,
    /// Disassemble each function after it compiles.
    pub dump_bytecode: bool,
    /// Collect on every allocation.
    pub stress_gc: bool,
}

/// One ongoing call. `slots` indexes the value stack at the frame's slot 0.
struct CallFrame {
    closure: ObjRef,
    ip: usize,
    slots: usize,
}

pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    /// Names bound by `perm`; assignment checks here first.
    global_perms: Table,
    /// Open upvalues, sorted by stack slot, highest first.
    open_upvalues: Vec<ObjRef>,
    /// The interned "init", kept alive for initializer lookups.
    init_string: ObjRef,
    /// Registry the heap's `NativeId`s index into.
    native_fns: Vec<NativeFn>,
    pub(crate) rng: StdRng,
    pub(crate) start_time: Instant,
    pub(crate) out: Box<dyn Write>,
    options: VmOptions,
}

impl Vm {
    pub fn new(options: VmOptions) -> Vm {
        Vm::with_output(options, Box::new(io::stdout()))
    }

    /// Build a VM whose program output (`print`, the io natives) goes to
    /// `out` instead of stdout.
    pub fn with_output(options: VmOptions, out: Box<dyn Write>) -> Vm {
        let mut heap = Heap::new();
        heap.set_stress(options.stress_gc);
        let init_string = heap.intern(b"init");

        let mut vm = Vm {
            heap,
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::with_capacity(FRAMES_MAX),
            globals: Table::new(),
            global_perms: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
            native_fns: Vec::new(),
            // Unseeded programs get a stable sequence; `seed` reseeds.
            rng: StdRng::seed_from_u64(0),
            start_time: Instant::now(),
            out,
            options,
        };
        natives::install(&mut vm);
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Compile and run one source. Source is bytes; non-ASCII content
    /// passes through string literals untouched. REPL sessions call this
    /// per line; globals persist across calls.
    pub fn interpret(&mut self, source: impl AsRef<[u8]>) -> Result<(), InterpretError> {
        let source = source.as_ref();
        let compile_options = CompileOptions {
            dump_bytecode: self.options.dump_bytecode,
        };

        let function = {
            let Vm {
                heap,
                stack,
                frames,
                open_upvalues,
                globals,
                global_perms,
                init_string,
                ..
            } = self;
            let roots = |h: &mut Heap| {
                for value in stack.iter() {
                    h.mark_value(*value);
                }
                for frame in frames.iter() {
                    h.mark_object(frame.closure);
                }
                for upvalue in open_upvalues.iter() {
                    h.mark_object(*upvalue);
                }
                for (key, value) in globals.iter() {
                    h.mark_object(key);
                    h.mark_value(value);
                }
                for (key, value) in global_perms.iter() {
                    h.mark_object(key);
                    h.mark_value(value);
                }
                h.mark_object(*init_string);
            };
            compile(source, heap, &roots, &compile_options)?
        };

        // Root the function across the closure allocation.
        self.push(Value::object(function));
        let closure = self.alloc(Obj::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop();
        self.push(Value::object(closure));

        let result = self
            .call_closure(closure, 0)
            .and_then(|()| self.run());
        if let Err(e) = result {
            self.reset_stack();
            return Err(InterpretError::Runtime(e));
        }
        Ok(())
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
    }

    // =========================================================================
    // Heap access with GC discipline
    // =========================================================================

    pub(crate) fn alloc(&mut self, obj: Obj) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(obj)
    }

    pub(crate) fn intern(&mut self, bytes: &[u8]) -> ObjRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern(bytes)
    }

    fn collect_garbage(&mut self) {
        let Vm {
            heap,
            stack,
            frames,
            open_upvalues,
            globals,
            global_perms,
            init_string,
            ..
        } = self;
        heap.collect(|h| {
            for value in stack.iter() {
                h.mark_value(*value);
            }
            for frame in frames.iter() {
                h.mark_object(frame.closure);
            }
            for upvalue in open_upvalues.iter() {
                h.mark_object(*upvalue);
            }
            for (key, value) in globals.iter() {
                h.mark_object(key);
                h.mark_value(value);
            }
            for (key, value) in global_perms.iter() {
                h.mark_object(key);
                h.mark_value(value);
            }
            h.mark_object(*init_string);
        });
    }

    // =========================================================================
    // Native registration
    // =========================================================================

    pub(crate) fn define_native(&mut self, name: &str, function: NativeFn) {
        // Both the name and the wrapper object stay rooted on the stack
        // while the other allocation can collect.
        let name_ref = self.intern(name.as_bytes());
        self.push(Value::object(name_ref));

        let id = fer_core::object::NativeId(self.native_fns.len() as u32);
        self.native_fns.push(function);
        let native = self.alloc(Obj::Native(ObjNative {
            name: name_ref,
            function: id,
        }));
        self.push(Value::object(native));

        let hash = self.heap.string_hash(name_ref);
        self.globals.set(name_ref, hash, Value::object(native));

        self.pop();
        self.pop();
    }

    // =========================================================================
    // Stack
    // =========================================================================

    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("value stack underflow")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    fn current_frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn current_frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    fn read_byte(&mut self) -> u8 {
        let frame = self.current_frame();
        let function = self.heap.as_closure(frame.closure).function;
        let byte = self.heap.as_function(function).chunk.code[frame.ip];
        self.current_frame_mut().ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        let frame = self.current_frame();
        let function = self.heap.as_closure(frame.closure).function;
        self.heap.as_function(function).chunk.constants[index]
    }

    /// Read a constant known to be an interned name.
    fn read_string(&mut self) -> ObjRef {
        self.read_constant().as_object()
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Build a runtime error carrying the active call trace, innermost
    /// frame first.
    fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        let message = message.into();
        tracing::debug!(%message, frames = self.frames.len(), "runtime error");
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let function = self.heap.as_closure(frame.closure).function;
            let f = self.heap.as_function(function);
            // ip sits one past the faulting instruction.
            let line = f.chunk.lines[frame.ip.saturating_sub(1)];
            let location = match f.name {
                Some(name) => format!("{}()", self.heap.string_lossy(name)),
                None => "script".to_string(),
            };
            trace.push(format!("[line {}] in {}", line, location));
        }
        RuntimeError { message, trace }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), RuntimeError> {
        if !callee.is_object() {
            return Err(self.runtime_error("Can only call functions and classes."));
        }
        let callee_ref = callee.as_object();

        enum Callee {
            Closure,
            Native(NativeFn),
            Class,
            Bound(Value, ObjRef),
            Other,
        }
        let kind = match self.heap.get(callee_ref) {
            Obj::Closure(_) => Callee::Closure,
            Obj::Native(native) => Callee::Native(self.native_fns[native.function.0 as usize]),
            Obj::Class(_) => Callee::Class,
            Obj::BoundMethod(bound) => Callee::Bound(bound.receiver, bound.method),
            _ => Callee::Other,
        };

        match kind {
            Callee::Closure => self.call_closure(callee_ref, arg_count),
            Callee::Native(native_fn) => {
                let base = self.stack.len() - arg_count;
                let result = native_fn(self, arg_count, base);
                // The callee and its arguments collapse into the result.
                self.stack.truncate(base - 1);
                self.push(result);
                Ok(())
            }
            Callee::Class => {
                let instance = self.alloc(Obj::Instance(ObjInstance {
                    class: callee_ref,
                    fields: Table::new(),
                }));
                let slot = self.stack.len() - arg_count - 1;
                self.stack[slot] = Value::object(instance);

                let hash = self.heap.string_hash(self.init_string);
                let initializer = self
                    .heap
                    .as_class(callee_ref)
                    .methods
                    .get(self.init_string, hash);
                if let Some(initializer) = initializer {
                    self.call_closure(initializer.as_object(), arg_count)
                } else if arg_count != 0 {
                    Err(self.runtime_error(format!("Expected 0 arguments but got {}.", arg_count)))
                } else {
                    Ok(())
                }
            }
            Callee::Bound(receiver, method) => {
                let slot = self.stack.len() - arg_count - 1;
                self.stack[slot] = receiver;
                self.call_closure(method, arg_count)
            }
            Callee::Other => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn call_closure(&mut self, closure: ObjRef, arg_count: usize) -> Result<(), RuntimeError> {
        let function = self.heap.as_closure(closure).function;
        let arity = self.heap.as_function(function).arity;
        if arg_count != arity {
            return Err(
                self.runtime_error(format!("Expected {} arguments but got {}.", arity, arg_count))
            );
        }

        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }

        self.frames.push(CallFrame {
            closure,
            ip: 0,
            slots: self.stack.len() - arg_count - 1,
        });
        Ok(())
    }

    fn invoke(&mut self, name: ObjRef, arg_count: usize) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count);
        if !receiver.is_object() {
            return Err(self.runtime_error("Only instances have methods."));
        }

        let (class, field) = match self.heap.get(receiver.as_object()) {
            Obj::Instance(instance) => {
                let hash = self.heap.string_hash(name);
                (instance.class, instance.fields.get(name, hash))
            }
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };

        // A field shadows the method table; call whatever it holds.
        if let Some(field) = field {
            let slot = self.stack.len() - arg_count - 1;
            self.stack[slot] = field;
            return self.call_value(field, arg_count);
        }

        self.invoke_from_class(class, name, arg_count)
    }

    fn invoke_from_class(
        &mut self,
        class: ObjRef,
        name: ObjRef,
        arg_count: usize,
    ) -> Result<(), RuntimeError> {
        let hash = self.heap.string_hash(name);
        match self.heap.as_class(class).methods.get(name, hash) {
            Some(method) => self.call_closure(method.as_object(), arg_count),
            None => Err(self.runtime_error(format!(
                "Undefined property '{}'.",
                self.heap.string_lossy(name)
            ))),
        }
    }

    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> Result<(), RuntimeError> {
        let hash = self.heap.string_hash(name);
        let Some(method) = self.heap.as_class(class).methods.get(name, hash) else {
            return Err(self.runtime_error(format!(
                "Undefined property '{}'.",
                self.heap.string_lossy(name)
            )));
        };

        let bound = self.alloc(Obj::BoundMethod(ObjBoundMethod {
            receiver: self.peek(0),
            method: method.as_object(),
        }));
        self.pop();
        self.push(Value::object(bound));
        Ok(())
    }

    // =========================================================================
    // Upvalues
    // =========================================================================

    /// Find or create the open upvalue for `slot`. The list stays sorted by
    /// slot, highest first, so each stack slot has at most one upvalue.
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = self.open_upvalues.len();
        for (i, &upvalue) in self.open_upvalues.iter().enumerate() {
            let open_slot = match self.heap.as_upvalue(upvalue) {
                ObjUpvalue::Open(s) => *s,
                ObjUpvalue::Closed(_) => continue,
            };
            if open_slot == slot {
                return upvalue;
            }
            if open_slot < slot {
                insert_at = i;
                break;
            }
        }

        let created = self.alloc(Obj::Upvalue(ObjUpvalue::Open(slot)));
        self.open_upvalues.insert(insert_at, created);
        created
    }

    /// Close every open upvalue at or above `last`: the value moves off the
    /// stack into the upvalue itself.
    fn close_upvalues(&mut self, last: usize) {
        while let Some(&upvalue) = self.open_upvalues.first() {
            let slot = match self.heap.as_upvalue(upvalue) {
                ObjUpvalue::Open(s) => *s,
                ObjUpvalue::Closed(_) => {
                    self.open_upvalues.remove(0);
                    continue;
                }
            };
            if slot < last {
                break;
            }
            let value = self.stack[slot];
            *self.heap.upvalue_mut(upvalue) = ObjUpvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn concatenate(&mut self) {
        let b = self.peek(0).as_object();
        let a = self.peek(1).as_object();
        let mut combined =
            Vec::with_capacity(self.heap.string_bytes(a).len() + self.heap.string_bytes(b).len());
        combined.extend_from_slice(self.heap.string_bytes(a));
        combined.extend_from_slice(self.heap.string_bytes(b));

        // Operands stay on the stack as roots until the result exists.
        let result = self.intern(&combined);
        self.pop();
        self.pop();
        self.push(Value::object(result));
    }

    fn binary_numeric(&mut self, op: OpCode) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        let result = match op {
            OpCode::Subtract => Value::number(a - b),
            OpCode::Multiply => Value::number(a * b),
            OpCode::Divide => Value::number(a / b),
            OpCode::Greater => Value::bool(a > b),
            OpCode::Less => Value::bool(a < b),
            _ => unreachable!("not a numeric binary opcode"),
        };
        self.push(result);
        Ok(())
    }

    fn is_string_value(&self, value: Value) -> bool {
        value.is_object() && self.heap.is_string(value.as_object())
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.options.trace_execution {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let op = match OpCode::try_from(byte) {
                Ok(op) => op,
                Err(_) => return Err(self.runtime_error(format!("Unknown opcode {}.", byte))),
            };

            match op {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(Value::NIL),
                OpCode::True => self.push(Value::TRUE),
                OpCode::False => self.push(Value::FALSE),
                OpCode::Pop => {
                    self.pop();
                }

                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots;
                    let value = self.stack[base + slot];
                    self.push(value);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.current_frame().slots;
                    self.stack[base + slot] = self.peek(0);
                }

                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            return Err(self.runtime_error(format!(
                                "Undefined variable '{}'.",
                                self.heap.string_lossy(name)
                            )));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.pop();
                }
                OpCode::DefineGlobalPerm => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.globals.set(name, hash, value);
                    self.global_perms.set(name, hash, Value::TRUE);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.heap.string_hash(name);
                    if self.global_perms.get(name, hash).is_some() {
                        return Err(self.runtime_error(format!(
                            "Can't reassign to permanent variable '{}'.",
                            self.heap.string_lossy(name)
                        )));
                    }
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        // Assignment must not conjure the variable.
                        self.globals.delete(name, hash);
                        return Err(self.runtime_error(format!(
                            "Undefined variable '{}'.",
                            self.heap.string_lossy(name)
                        )));
                    }
                }

                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.current_frame().closure;
                    let upvalue = self.heap.as_closure(closure).upvalues[slot];
                    let value = match self.heap.as_upvalue(upvalue) {
                        ObjUpvalue::Open(stack_slot) => self.stack[*stack_slot],
                        ObjUpvalue::Closed(value) => *value,
                    };
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.current_frame().closure;
                    let upvalue = self.heap.as_closure(closure).upvalues[slot];
                    let value = self.peek(0);
                    match self.heap.upvalue_mut(upvalue) {
                        ObjUpvalue::Open(stack_slot) => {
                            let stack_slot = *stack_slot;
                            self.stack[stack_slot] = value;
                        }
                        ObjUpvalue::Closed(closed) => *closed = value,
                    }
                }

                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0);
                    if !receiver.is_object() {
                        return Err(self.runtime_error("Only instances have properties."));
                    }
                    let (class, field) = match self.heap.get(receiver.as_object()) {
                        Obj::Instance(instance) => {
                            let hash = self.heap.string_hash(name);
                            (instance.class, instance.fields.get(name, hash))
                        }
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };

                    // Fields win over methods.
                    if let Some(value) = field {
                        self.pop();
                        self.push(value);
                    } else {
                        self.bind_method(class, name)?;
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let target = self.peek(1);
                    if !target.is_object()
                        || !matches!(self.heap.get(target.as_object()), Obj::Instance(_))
                    {
                        return Err(self.runtime_error("Only instances have fields."));
                    }
                    let hash = self.heap.string_hash(name);
                    let value = self.peek(0);
                    self.heap
                        .instance_mut(target.as_object())
                        .fields
                        .set(name, hash, value);

                    // Assignment leaves the value as the expression result.
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = self.pop().as_object();
                    self.bind_method(superclass, name)?;
                }

                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::bool(a.equals(b)));
                }
                OpCode::Greater | OpCode::Less => self.binary_numeric(op)?,
                OpCode::Add => {
                    let b = self.peek(0);
                    let a = self.peek(1);
                    if self.is_string_value(a) && self.is_string_value(b) {
                        self.concatenate();
                    } else if a.is_number() && b.is_number() {
                        let b = self.pop().as_number();
                        let a = self.pop().as_number();
                        self.push(Value::number(a + b));
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                OpCode::Subtract | OpCode::Multiply | OpCode::Divide => self.binary_numeric(op)?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    let value = self.pop().as_number();
                    self.push(Value::number(-value));
                }

                OpCode::Print => {
                    let value = self.pop();
                    // Bytes, not text: string content reaches the output
                    // exactly as stored.
                    let mut bytes = Vec::new();
                    self.heap.write_value(value, &mut bytes);
                    bytes.push(b'\n');
                    let _ = self.out.write_all(&bytes);
                }

                OpCode::Jump => {
                    let offset = self.read_short() as usize;
                    self.current_frame_mut().ip += offset;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short() as usize;
                    if self.peek(0).is_falsey() {
                        self.current_frame_mut().ip += offset;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short() as usize;
                    self.current_frame_mut().ip -= offset;
                }

                OpCode::Call => {
                    let arg_count = self.read_byte() as usize;
                    let callee = self.peek(arg_count);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    self.invoke(name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte() as usize;
                    let superclass = self.pop().as_object();
                    self.invoke_from_class(superclass, name, arg_count)?;
                }

                OpCode::Closure => {
                    let function = self.read_constant().as_object();
                    let upvalue_count = self.heap.as_function(function).upvalue_count;
                    let closure = self.alloc(Obj::Closure(ObjClosure {
                        function,
                        upvalues: Vec::with_capacity(upvalue_count),
                    }));
                    // Rooted while the captures below may allocate.
                    self.push(Value::object(closure));

                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() == 1;
                        let index = self.read_byte() as usize;
                        let upvalue = if is_local {
                            let base = self.current_frame().slots;
                            self.capture_upvalue(base + index)
                        } else {
                            let enclosing = self.current_frame().closure;
                            self.heap.as_closure(enclosing).upvalues[index]
                        };
                        self.heap.closure_mut(closure).upvalues.push(upvalue);
                    }
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }

                OpCode::Return => {
                    let result = self.pop();
                    let frame = self.frames.pop().expect("no active call frame");
                    self.close_upvalues(frame.slots);

                    if self.frames.is_empty() {
                        // The script closure itself.
                        self.pop();
                        return Ok(());
                    }

                    self.stack.truncate(frame.slots);
                    self.push(result);
                }

                OpCode::Class => {
                    let name = self.read_string();
                    let class = self.alloc(Obj::Class(ObjClass {
                        name,
                        methods: Table::new(),
                    }));
                    self.push(Value::object(class));
                }
                OpCode::Inherit => {
                    let superclass = self.peek(1);
                    if !superclass.is_object()
                        || !matches!(self.heap.get(superclass.as_object()), Obj::Class(_))
                    {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }

                    // Copied before the subclass declares its own methods,
                    // so overrides land on top.
                    let methods = self.heap.as_class(superclass.as_object()).methods.clone();
                    let subclass = self.peek(0).as_object();
                    methods.add_all(&mut self.heap.class_mut(subclass).methods);
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0);
                    let class = self.peek(1).as_object();
                    let hash = self.heap.string_hash(name);
                    self.heap.class_mut(class).methods.set(name, hash, method);
                    self.pop();
                }

                OpCode::List => {
                    let count = self.read_byte() as usize;
                    let start = self.stack.len() - count;
                    // Copied while still on the stack; the originals stay
                    // rooted through the allocation.
                    let items: Vec<Value> = self.stack[start..].to_vec();
                    let list = self.alloc(Obj::List(ObjList { items }));
                    self.stack.truncate(start);
                    self.push(Value::object(list));
                }
                OpCode::Dictionary => {
                    let count = self.read_byte() as usize;
                    let start = self.stack.len() - 2 * count;

                    for i in 0..count {
                        let key = self.stack[start + 2 * i];
                        if !self.is_string_value(key) {
                            return Err(self.runtime_error("Dictionary key must be a string."));
                        }
                    }

                    let dict = self.alloc(Obj::Dictionary(ObjDictionary::default()));
                    for i in 0..count {
                        let key = self.stack[start + 2 * i].as_object();
                        let value = self.stack[start + 2 * i + 1];
                        let hash = self.heap.string_hash(key);
                        self.heap.dictionary_mut(dict).table.set(key, hash, value);
                    }
                    self.stack.truncate(start);
                    self.push(Value::object(dict));
                }
                OpCode::GetItem => {
                    let index = self.pop();
                    let container = self.pop();
                    if !container.is_object() {
                        return Err(self.runtime_error("Can only index lists and dictionaries."));
                    }
                    let result = match self.heap.get(container.as_object()) {
                        Obj::List(list) => {
                            if !index.is_number() {
                                return Err(self.runtime_error("List index must be a number."));
                            }
                            let i = index.as_number() as i64;
                            if i < 0 || i as usize >= list.items.len() {
                                return Err(self.runtime_error("List index out of range."));
                            }
                            list.items[i as usize]
                        }
                        Obj::Dictionary(dict) => {
                            if !index.is_object() || !self.heap.is_string(index.as_object()) {
                                return Err(
                                    self.runtime_error("Dictionary key must be a string.")
                                );
                            }
                            let key = index.as_object();
                            let hash = self.heap.string_hash(key);
                            match dict.table.get(key, hash) {
                                Some(value) => value,
                                None => {
                                    return Err(self.runtime_error(format!(
                                        "Undefined key '{}'.",
                                        self.heap.string_lossy(key)
                                    )));
                                }
                            }
                        }
                        _ => {
                            return Err(
                                self.runtime_error("Can only index lists and dictionaries.")
                            );
                        }
                    };
                    self.push(result);
                }
                OpCode::SetItem => {
                    let value = self.pop();
                    let index = self.pop();
                    let container = self.pop();
                    if !container.is_object() {
                        return Err(self.runtime_error("Can only index lists and dictionaries."));
                    }
                    let container_ref = container.as_object();

                    if matches!(self.heap.get(container_ref), Obj::List(_)) {
                        if !index.is_number() {
                            return Err(self.runtime_error("List index must be a number."));
                        }
                        let i = index.as_number() as i64;
                        let len = self.heap.as_list(container_ref).items.len();
                        if i < 0 || i as usize >= len {
                            return Err(self.runtime_error("List index out of range."));
                        }
                        self.heap.list_mut(container_ref).items[i as usize] = value;
                    } else if matches!(self.heap.get(container_ref), Obj::Dictionary(_)) {
                        if !index.is_object() || !self.heap.is_string(index.as_object()) {
                            return Err(self.runtime_error("Dictionary key must be a string."));
                        }
                        let key = index.as_object();
                        let hash = self.heap.string_hash(key);
                        self.heap
                            .dictionary_mut(container_ref)
                            .table
                            .set(key, hash, value);
                    } else {
                        return Err(self.runtime_error("Can only index lists and dictionaries."));
                    }
                    self.push(value);
                }
            }
        }
    }

    fn trace_instruction(&self) {
        let mut line = String::from("          ");
        for value in &self.stack {
            line.push_str(&format!("[ {} ]", self.heap.format_value(*value)));
        }

        let frame = self.current_frame();
        let function = self.heap.as_closure(frame.closure).function;
        let chunk = &self.heap.as_function(function).chunk;
        let mut text = String::new();
        debug::disassemble_instruction(&self.heap, chunk, frame.ip, &mut text);

        eprintln!("{}", line);
        eprint!("{}", text);
    }
}
