//! Collection natives
//!
//! Lists: `push, pop, insert, remove, contains`. Dictionaries: `keys,
//! hasKey, delete`.

use fer_core::object::{Obj, ObjList};
use fer_core::value::{ObjRef, Value};

use super::{arg, number_arg, string_arg};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native("push", push_native);
    vm.define_native("pop", pop_native);
    vm.define_native("insert", insert_native);
    vm.define_native("remove", remove_native);
    vm.define_native("contains", contains_native);
    vm.define_native("keys", keys_native);
    vm.define_native("hasKey", has_key_native);
    vm.define_native("delete", delete_native);
}

fn list_arg(vm: &Vm, base: usize, index: usize) -> Option<ObjRef> {
    let value = arg(vm, base, index);
    if value.is_object() && matches!(vm.heap.get(value.as_object()), Obj::List(_)) {
        Some(value.as_object())
    } else {
        None
    }
}

fn dictionary_arg(vm: &Vm, base: usize, index: usize) -> Option<ObjRef> {
    let value = arg(vm, base, index);
    if value.is_object() && matches!(vm.heap.get(value.as_object()), Obj::Dictionary(_)) {
        Some(value.as_object())
    } else {
        None
    }
}

/// Append to a list; returns the appended item.
fn push_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let Some(list) = list_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let item = arg(vm, base, 1);
    vm.heap.list_mut(list).items.push(item);
    item
}

/// Remove and return the last element; nil when empty.
fn pop_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(list) = list_arg(vm, base, 0) else {
        return Value::NIL;
    };
    vm.heap.list_mut(list).items.pop().unwrap_or(Value::NIL)
}

/// insert(list, index, item); index may equal the length (append).
fn insert_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 3 {
        return Value::NIL;
    }
    let Some(list) = list_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let Some(index) = number_arg(vm, base, 1) else {
        return Value::NIL;
    };
    let item = arg(vm, base, 2);

    let index = index as i64;
    let len = vm.heap.as_list(list).items.len();
    if index < 0 || index as usize > len {
        return Value::NIL;
    }
    vm.heap.list_mut(list).items.insert(index as usize, item);
    item
}

/// Remove by index; returns the removed element.
fn remove_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let Some(list) = list_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let Some(index) = number_arg(vm, base, 1) else {
        return Value::NIL;
    };

    let index = index as i64;
    let len = vm.heap.as_list(list).items.len();
    if index < 0 || index as usize >= len {
        return Value::NIL;
    }
    vm.heap.list_mut(list).items.remove(index as usize)
}

/// Membership by Fer equality.
fn contains_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let Some(list) = list_arg(vm, base, 0) else {
        return Value::NIL;
    };
    let target = arg(vm, base, 1);

    let found = vm
        .heap
        .as_list(list)
        .items
        .iter()
        .any(|item| item.equals(target));
    Value::bool(found)
}

/// The dictionary's keys, as a list.
fn keys_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(dict) = dictionary_arg(vm, base, 0) else {
        return Value::NIL;
    };

    // The keys stay rooted through the dictionary argument while the list
    // allocation may collect.
    let items: Vec<Value> = vm
        .heap
        .as_dictionary(dict)
        .table
        .iter()
        .map(|(key, _)| Value::object(key))
        .collect();
    let list = vm.alloc(Obj::List(ObjList { items }));
    Value::object(list)
}

fn has_key_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let (Some(dict), Some(key)) = (dictionary_arg(vm, base, 0), string_arg(vm, base, 1)) else {
        return Value::NIL;
    };
    let hash = vm.heap.string_hash(key);
    Value::bool(vm.heap.as_dictionary(dict).table.get(key, hash).is_some())
}

fn delete_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let (Some(dict), Some(key)) = (dictionary_arg(vm, base, 0), string_arg(vm, base, 1)) else {
        return Value::NIL;
    };
    let hash = vm.heap.string_hash(key);
    Value::bool(vm.heap.dictionary_mut(dict).table.delete(key, hash))
}
