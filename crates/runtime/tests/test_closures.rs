//! Closures and upvalues: capture, sharing, and closing.

mod common;

use common::run_ok;

#[test]
fn test_counter_keeps_state() {
    let source = r#"
fun makeCounter() {
  var n = 0;
  fun inc() {
    n = n + 1;
    return n;
  }
  return inc;
}
var c = makeCounter();
print c();
print c();
print c();
"#;
    assert_eq!(run_ok(source), "1\n2\n3\n");
}

#[test]
fn test_counters_are_independent() {
    let source = r#"
fun makeCounter() {
  var n = 0;
  fun inc() {
    n = n + 1;
    return n;
  }
  return inc;
}
var a = makeCounter();
var b = makeCounter();
a(); a();
print a();
print b();
"#;
    assert_eq!(run_ok(source), "3\n1\n");
}

#[test]
fn test_capture_while_still_on_stack() {
    let source = r#"
fun outer() {
  var x = "outside";
  fun inner() {
    print x;
  }
  inner();
}
outer();
"#;
    assert_eq!(run_ok(source), "outside\n");
}

#[test]
fn test_upvalue_survives_frame() {
    let source = r#"
fun outer() {
  var x = "outside";
  fun inner() {
    print x;
  }
  return inner;
}
var closure = outer();
closure();
"#;
    assert_eq!(run_ok(source), "outside\n");
}

#[test]
fn test_closures_share_one_upvalue() {
    let source = r#"
fun make() {
  var shared = 1;
  fun get() { return shared; }
  fun set(v) { shared = v; }
  return [get, set];
}
var pair = make();
var get = pair[0];
var set = pair[1];
set(42);
print get();
"#;
    assert_eq!(run_ok(source), "42\n");
}

#[test]
fn test_block_scope_closes_captured_local() {
    let source = r#"
var f;
{
  var inside = 10;
  fun g() {
    print inside;
  }
  f = g;
}
f();
"#;
    assert_eq!(run_ok(source), "10\n");
}

#[test]
fn test_loop_variable_capture() {
    // Each iteration's body scope gets its own captured slot.
    let source = r#"
var fns = [];
for (var i = 0; i < 3; i = i + 1) {
  var j = i;
  fun f() { return j; }
  push(fns, f);
}
print fns[0]();
print fns[1]();
print fns[2]();
"#;
    assert_eq!(run_ok(source), "0\n1\n2\n");
}

#[test]
fn test_transitive_capture_through_middle_function() {
    let source = r#"
fun outer() {
  var x = "top";
  fun middle() {
    fun bottom() {
      print x;
    }
    return bottom;
  }
  return middle();
}
outer()();
"#;
    assert_eq!(run_ok(source), "top\n");
}

#[test]
fn test_assignment_through_upvalue_before_close() {
    let source = r#"
fun outer() {
  var x = 1;
  fun bump() { x = x + 10; }
  bump();
  bump();
  print x;
}
outer();
"#;
    assert_eq!(run_ok(source), "21\n");
}
