//! Time natives
//!
//! `clock` measures elapsed seconds on a monotonic clock anchored at VM
//! construction, for timing. `now` is wall-clock Unix seconds, for
//! timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

use fer_core::value::Value;

use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native("clock", clock_native);
    vm.define_native("now", now_native);
}

fn clock_native(vm: &mut Vm, _arg_count: usize, _base: usize) -> Value {
    Value::number(vm.start_time.elapsed().as_secs_f64())
}

fn now_native(_vm: &mut Vm, _arg_count: usize, _base: usize) -> Value {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as f64)
        .unwrap_or(0.0);
    Value::number(seconds)
}
