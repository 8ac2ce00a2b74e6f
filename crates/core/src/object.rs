//! Heap Object Variants
//!
//! Every heap-allocated Fer value is one of the variants of [`Obj`]. The
//! original layout used first-field struct punning for a common header;
//! here the header (mark bit, identity) lives in the arena slot and the
//! payload is a tagged sum, so downcasts are match arms.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::{ObjRef, Value};

/// Index into the VM's native-function registry. The registry itself lives
/// in the runtime crate; the heap only stores the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeId(pub u32);

/// An interned, immutable string with its cached FNV-1a hash. Strings are
/// byte sequences, not UTF-8: whatever bytes a source literal or a file
/// held pass through unchanged.
#[derive(Debug)]
pub struct FerString {
    pub bytes: Box<[u8]>,
    pub hash: u32,
}

/// A growable list of values.
#[derive(Debug, Default)]
pub struct ObjList {
    pub items: Vec<Value>,
}

/// A dictionary with interned-string keys.
#[derive(Debug, Default)]
pub struct ObjDictionary {
    pub table: Table,
}

/// A compiled function. Immutable once compilation finishes; the top-level
/// script has no name.
#[derive(Debug, Default)]
pub struct ObjFunction {
    pub arity: usize,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<ObjRef>,
}

/// A function plus the upvalues it closed over. The upvalue array always
/// ends up with exactly `upvalue_count` entries.
#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

/// A captured variable: open while its slot is still live on the value
/// stack, closed once it owns the value.
#[derive(Debug)]
pub enum ObjUpvalue {
    Open(usize),
    Closed(Value),
}

/// A host function exposed to Fer code. Natives validate their own
/// argument counts (some are variadic), so none is recorded here.
#[derive(Debug)]
pub struct ObjNative {
    pub name: ObjRef,
    pub function: NativeId,
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
}

#[derive(Debug)]
pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
}

/// A method closure bound to its receiver; calling it puts the receiver in
/// slot 0.
#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: ObjRef,
}

#[derive(Debug)]
pub enum Obj {
    String(FerString),
    List(ObjList),
    Dictionary(ObjDictionary),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Native(ObjNative),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
}

impl Obj {
    /// The name `typeof` and diagnostics use. Callables all answer
    /// "function".
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::String(_) => "string",
            Obj::List(_) => "list",
            Obj::Dictionary(_) => "dictionary",
            Obj::Function(_) | Obj::Closure(_) | Obj::Native(_) | Obj::BoundMethod(_) => "function",
            Obj::Upvalue(_) => "upvalue",
            Obj::Class(_) => "class",
            Obj::Instance(_) => "instance",
        }
    }

    /// Append every object this one references to `out`. This is the edge
    /// enumeration the collector blackens gray objects with.
    pub fn trace(&self, out: &mut Vec<ObjRef>) {
        fn value_edge(value: Value, out: &mut Vec<ObjRef>) {
            if value.is_object() {
                out.push(value.as_object());
            }
        }
        fn table_edges(table: &Table, out: &mut Vec<ObjRef>) {
            for (key, value) in table.iter() {
                out.push(key);
                value_edge(value, out);
            }
        }

        match self {
            Obj::String(_) | Obj::Native(_) => {}
            Obj::List(list) => {
                for item in &list.items {
                    value_edge(*item, out);
                }
            }
            Obj::Dictionary(dict) => table_edges(&dict.table, out),
            Obj::Function(function) => {
                if let Some(name) = function.name {
                    out.push(name);
                }
                for constant in &function.chunk.constants {
                    value_edge(*constant, out);
                }
            }
            Obj::Closure(closure) => {
                out.push(closure.function);
                out.extend_from_slice(&closure.upvalues);
            }
            Obj::Upvalue(upvalue) => {
                if let ObjUpvalue::Closed(value) = upvalue {
                    value_edge(*value, out);
                }
            }
            Obj::Class(class) => {
                out.push(class.name);
                table_edges(&class.methods, out);
            }
            Obj::Instance(instance) => {
                out.push(instance.class);
                table_edges(&instance.fields, out);
            }
            Obj::BoundMethod(bound) => {
                value_edge(bound.receiver, out);
                out.push(bound.method);
            }
        }
    }

    /// Rough byte size used for the collector's allocation budget.
    pub fn size_estimate(&self) -> usize {
        let payload = match self {
            Obj::String(s) => s.bytes.len(),
            Obj::List(l) => l.items.capacity() * std::mem::size_of::<Value>(),
            Obj::Dictionary(d) => d.table.len() * 2 * std::mem::size_of::<Value>(),
            Obj::Function(f) => {
                f.chunk.code.len()
                    + f.chunk.lines.len() * 4
                    + f.chunk.constants.len() * std::mem::size_of::<Value>()
            }
            Obj::Closure(c) => c.upvalues.len() * std::mem::size_of::<ObjRef>(),
            Obj::Class(c) => c.methods.len() * 2 * std::mem::size_of::<Value>(),
            Obj::Instance(i) => i.fields.len() * 2 * std::mem::size_of::<Value>(),
            Obj::Upvalue(_) | Obj::Native(_) | Obj::BoundMethod(_) => 0,
        };
        std::mem::size_of::<Obj>() + payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_traces_function_and_upvalues() {
        let closure = Obj::Closure(ObjClosure {
            function: ObjRef(3),
            upvalues: vec![ObjRef(5), ObjRef(9)],
        });
        let mut out = Vec::new();
        closure.trace(&mut out);
        assert_eq!(out, vec![ObjRef(3), ObjRef(5), ObjRef(9)]);
    }

    #[test]
    fn test_open_upvalue_has_no_edges() {
        let mut out = Vec::new();
        Obj::Upvalue(ObjUpvalue::Open(12)).trace(&mut out);
        assert!(out.is_empty());

        Obj::Upvalue(ObjUpvalue::Closed(Value::object(ObjRef(4)))).trace(&mut out);
        assert_eq!(out, vec![ObjRef(4)]);
    }

    #[test]
    fn test_callables_share_a_type_name() {
        let f = Obj::Function(ObjFunction::default());
        let n = Obj::Native(ObjNative {
            name: ObjRef(0),
            function: NativeId(0),
        });
        assert_eq!(f.type_name(), "function");
        assert_eq!(n.type_name(), "function");
    }
}
