//! Math natives
//!
//! `sqrt, pow, floor, ceil, rand, seed, sin, cos, tan`. Randomness comes
//! from the VM's own rng, so a `seed(n)` call makes runs reproducible.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use fer_core::value::Value;

use super::number_arg;
use crate::vm::Vm;

pub(crate) fn install(vm: &mut Vm) {
    vm.define_native("sqrt", sqrt_native);
    vm.define_native("pow", pow_native);
    vm.define_native("floor", floor_native);
    vm.define_native("ceil", ceil_native);
    vm.define_native("rand", rand_native);
    vm.define_native("seed", seed_native);
    vm.define_native("sin", sin_native);
    vm.define_native("cos", cos_native);
    vm.define_native("tan", tan_native);
}

fn unary(
    vm: &mut Vm,
    arg_count: usize,
    base: usize,
    op: fn(f64) -> f64,
) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    match number_arg(vm, base, 0) {
        Some(n) => Value::number(op(n)),
        None => Value::NIL,
    }
}

fn sqrt_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    unary(vm, arg_count, base, f64::sqrt)
}

fn pow_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 2 {
        return Value::NIL;
    }
    let (Some(a), Some(b)) = (number_arg(vm, base, 0), number_arg(vm, base, 1)) else {
        return Value::NIL;
    };
    Value::number(a.powf(b))
}

fn floor_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    unary(vm, arg_count, base, f64::floor)
}

fn ceil_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    unary(vm, arg_count, base, f64::ceil)
}

/// Uniform in [0, 1).
fn rand_native(vm: &mut Vm, _arg_count: usize, _base: usize) -> Value {
    Value::number(vm.rng.gen_range(0.0..1.0))
}

fn seed_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    if arg_count != 1 {
        return Value::NIL;
    }
    let Some(seed) = number_arg(vm, base, 0) else {
        return Value::NIL;
    };
    vm.rng = StdRng::seed_from_u64(seed as u64);
    Value::NIL
}

fn sin_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    unary(vm, arg_count, base, f64::sin)
}

fn cos_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    unary(vm, arg_count, base, f64::cos)
}

fn tan_native(vm: &mut Vm, arg_count: usize, base: usize) -> Value {
    unary(vm, arg_count, base, f64::tan)
}
