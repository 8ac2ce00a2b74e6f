//! Fer Core: values, heap, and bytecode
//!
//! The shared foundation under the Fer compiler and virtual machine:
//! - `value`: 8-byte NaN-boxed values (numbers free, everything else tagged)
//! - `object`: the heap object variants (strings through bound methods)
//! - `heap`: the object arena, string interner, and mark-sweep collector
//! - `table`: the open-addressed hash table behind globals, fields, methods,
//!   dictionaries, and the interner
//! - `chunk`: bytecode buffers with line tables and constant pools
//! - `debug`: the disassembler

pub mod chunk;
pub mod debug;
pub mod heap;
pub mod object;
pub mod table;
pub mod value;

pub use chunk::{Chunk, OpCode};
pub use heap::{Heap, format_number};
pub use object::{
    FerString, NativeId, Obj, ObjBoundMethod, ObjClass, ObjClosure, ObjDictionary, ObjFunction,
    ObjInstance, ObjList, ObjNative, ObjUpvalue,
};
pub use table::{Table, hash_bytes};
pub use value::{ObjRef, Value};
