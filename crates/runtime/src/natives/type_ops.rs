//! Type natives
//!
//! `typeof` names a value's runtime type; every callable answers
//! "function". `assert` halts the process with status 1 when its first
//! argument is falsey, printing the optional message.

use std::io::Write;

use fer_core::value::Value;

use super::{arg, string_arg};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native("typeof", typeof_native);
    vm.define_native("assert", assert_native);
}

fn typeof_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let value = arg(vm, base, 0);

    let name = if value.is_nil() {
        "nil"
    } else if value.is_bool() {
        "bool"
    } else if value.is_number() {
        "number"
    } else {
        vm.heap.get(value.as_object()).type_name()
    };
    Value::object(vm.intern(name.as_bytes()))
}

fn assert_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count < 1 {
        return Value::NIL;
    }

    if arg(vm, base, 0).is_falsey() {
        let message = if arg_count > 1 {
            string_arg(vm, base, 1).map(|s| vm.heap.string_bytes(s).to_vec())
        } else {
            None
        };
        let message = message.unwrap_or_else(|| b"Assertion failed.".to_vec());
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(&message);
        let _ = stderr.write_all(b"\n");
        std::process::exit(1);
    }
    Value::TRUE
}
