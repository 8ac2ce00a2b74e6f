//! String natives
//!
//! `str, len, sub, upper, lower, index, split, trim, chr, ord`. Strings
//! are byte sequences to these operations, as they are to the scanner;
//! every result carries the input bytes unchanged.

use fer_core::object::{Obj, ObjList};
use fer_core::value::Value;

use super::{arg, number_arg, string_arg};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native("str", str_native);
    vm.define_native("len", len_native);
    vm.define_native("sub", sub_native);
    vm.define_native("upper", upper_native);
    vm.define_native("lower", lower_native);
    vm.define_native("index", index_native);
    vm.define_native("split", split_native);
    vm.define_native("trim", trim_native);
    vm.define_native("chr", chr_native);
    vm.define_native("ord", ord_native);
}

/// Render nil, booleans, and numbers as strings; strings pass through.
fn str_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let value = arg(vm, base, 0);
    if value.is_object() && vm.heap.is_string(value.as_object()) {
        return value;
    }

    let mut text = Vec::new();
    if value.is_nil() || value.is_bool() || value.is_number() {
        vm.heap.write_value(value, &mut text);
    }
    Value::object(vm.intern(&text))
}

/// Length of a string (bytes), list, or dictionary.
fn len_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let value = arg(vm, base, 0);
    if !value.is_object() {
        return Value::NIL;
    }
    match vm.heap.get(value.as_object()) {
        Obj::String(s) => Value::number(s.bytes.len() as f64),
        Obj::List(list) => Value::number(list.items.len() as f64),
        Obj::Dictionary(dict) => Value::number(dict.table.len() as f64),
        _ => Value::NIL,
    }
}

/// sub(str, start[, length]) -> substring; out-of-range yields "".
fn sub_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if !(2..=3).contains(&arg_count) {
        return Value::NIL;
    }
    let Some(s) = string_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let Some(start) = number_arg(vm, base, 1) else {
        return Value::NIL;
    };

    let total = vm.heap.string_bytes(s).len() as i64;
    let start = start as i64;
    let mut length = total - start;
    if arg_count == 3 {
        let Some(requested) = number_arg(vm, base, 2) else {
            return Value::NIL;
        };
        let requested = requested as i64;
        if requested < length {
            length = requested;
        }
    }

    if start < 0 || start >= total || length <= 0 {
        return Value::object(vm.intern(b""));
    }

    let bytes = vm.heap.string_bytes(s)[start as usize..(start + length) as usize].to_vec();
    Value::object(vm.intern(&bytes))
}

fn upper_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(s) = string_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let text = vm.heap.string_bytes(s).to_ascii_uppercase();
    Value::object(vm.intern(&text))
}

fn lower_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(s) = string_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let text = vm.heap.string_bytes(s).to_ascii_lowercase();
    Value::object(vm.intern(&text))
}

/// Byte offset of the first occurrence of needle, or -1.
fn index_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let (Some(haystack), Some(needle)) = (string_arg(vm, base, 0), string_arg(vm, base, 1)) else {
        return Value::NIL;
    };

    let haystack = vm.heap.string_bytes(haystack);
    let needle = vm.heap.string_bytes(needle);
    let found = if needle.is_empty() {
        Some(0)
    } else if needle.len() > haystack.len() {
        None
    } else {
        haystack
            .windows(needle.len())
            .position(|window| window == needle)
    };
    match found {
        Some(offset) => Value::number(offset as f64),
        None => Value::number(-1.0),
    }
}

/// Split on any of the delimiter's bytes; empty pieces are dropped.
fn split_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let (Some(s), Some(delimiter)) = (string_arg(vm, base, 0), string_arg(vm, base, 1)) else {
        return Value::NIL;
    };

    let parts: Vec<Vec<u8>> = {
        let text = vm.heap.string_bytes(s);
        let delims = vm.heap.string_bytes(delimiter);
        text.split(|b| delims.contains(b))
            .filter(|piece| !piece.is_empty())
            .map(|piece| piece.to_vec())
            .collect()
    };

    // The list goes on the stack so the part strings allocated into it
    // survive any collection along the way.
    let list = vm.alloc(Obj::List(ObjList::default()));
    vm.push(Value::object(list));
    for part in parts {
        let piece = vm.intern(&part);
        vm.heap.list_mut(list).items.push(Value::object(piece));
    }
    vm.pop();
    Value::object(list)
}

fn trim_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(s) = string_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let trimmed = vm.heap.string_bytes(s).trim_ascii().to_vec();
    Value::object(vm.intern(&trimmed))
}

/// Single-byte string from a character code.
fn chr_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(code) = number_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let byte = [code as u8];
    Value::object(vm.intern(&byte))
}

/// Code of the first byte; nil for the empty string.
fn ord_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(s) = string_arg(vm, base, 0) else {
        return Value::NIL;
    };
    match vm.heap.string_bytes(s).first() {
        Some(&byte) => Value::number(byte as f64),
        None => Value::NIL,
    }
}
