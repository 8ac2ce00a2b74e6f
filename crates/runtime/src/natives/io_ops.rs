//! IO natives
//!
//! `input` prompts on the VM's output writer and reads one line from
//! stdin. `read`/`write` are whole-file operations that report failure as
//! nil/false rather than erroring. `exit` ends the process.

use std::fs;
use std::io::{self, BufRead, Write};

use fer_core::value::Value;

use super::{arg, number_arg, string_arg};
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native("input", input_native);
    vm.define_native("read", read_native);
    vm.define_native("write", write_native);
    vm.define_native("exit", exit_native);
}

fn input_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count > 0 {
        let prompt = arg(vm, base, 0);
        let mut text = Vec::new();
        vm.heap.write_value(prompt, &mut text);
        let _ = vm.out.write_all(&text);
        let _ = vm.out.flush();
    }

    // Raw bytes up to the newline; the line is not required to be UTF-8.
    let mut line = Vec::new();
    match io::stdin().lock().read_until(b'\n', &mut line) {
        Ok(0) | Err(_) => Value::NIL,
        Ok(_) => {
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            Value::object(vm.intern(&line))
        }
    }
}

fn read_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(path) = string_arg(vm, base, 0) else {
        return Value::NIL;
    };

    // File contents are carried as-is; no encoding is assumed.
    let path = vm.heap.string_lossy(path).into_owned();
    match fs::read(&path) {
        Ok(bytes) => Value::object(vm.intern(&bytes)),
        Err(_) => Value::NIL,
    }
}

fn write_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let (Some(path), Some(contents)) = (string_arg(vm, base, 0), string_arg(vm, base, 1)) else {
        return Value::NIL;
    };

    let path = vm.heap.string_lossy(path).into_owned();
    let contents = vm.heap.string_bytes(contents).to_vec();
    Value::bool(fs::write(path, contents).is_ok())
}

fn exit_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    let status = if arg_count == 1 {
        number_arg(vm, base, 0).unwrap_or(0.0) as i32
    } else {
        0
    };
    std::process::exit(status);
}
