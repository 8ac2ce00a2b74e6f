//! Classes, instances, methods, initializers, and inheritance.

mod common;

use common::{run_err, run_ok};

#[test]
fn test_method_dispatch_with_super() {
    let source = r#"
class A { greet() { print "A"; } }
class B < A { greet() { super.greet(); print "B"; } }
B().greet();
"#;
    assert_eq!(run_ok(source), "A\nB\n");
}

#[test]
fn test_fields() {
    let source = r#"
class Bag {}
var bag = Bag();
bag.x = 1;
bag.x = bag.x + 2;
print bag.x;
"#;
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn test_initializer_binds_this() {
    let source = r#"
class Point {
  init(x, y) {
    this.x = x;
    this.y = y;
  }
  sum() { return this.x + this.y; }
}
var p = Point(3, 4);
print p.x;
print p.sum();
"#;
    assert_eq!(run_ok(source), "3\n7\n");
}

#[test]
fn test_class_without_init_rejects_arguments() {
    let source = r#"
class Empty {}
Empty(1);
"#;
    let err = run_err(source);
    assert!(err.contains("Expected 0 arguments but got 1."));
}

#[test]
fn test_bound_method_remembers_receiver() {
    let source = r#"
class Greeter {
  init(name) { this.name = name; }
  greet() { print "hi " + this.name; }
}
var m = Greeter("ana").greet;
m();
"#;
    assert_eq!(run_ok(source), "hi ana\n");
}

#[test]
fn test_fields_shadow_methods() {
    let source = r#"
fun stranger() { return "field"; }
class Thing {
  act() { return "method"; }
}
var t = Thing();
print t.act();
t.act = stranger;
print t.act();
"#;
    assert_eq!(run_ok(source), "method\nfield\n");
}

#[test]
fn test_inherited_methods() {
    let source = r#"
class A {
  hello() { print "from A"; }
}
class B < A {}
B().hello();
"#;
    assert_eq!(run_ok(source), "from A\n");
}

#[test]
fn test_override_wins() {
    let source = r#"
class A { who() { print "A"; } }
class B < A { who() { print "B"; } }
B().who();
"#;
    assert_eq!(run_ok(source), "B\n");
}

#[test]
fn test_super_in_initializer() {
    let source = r#"
class A {
  init() { this.tag = "base"; }
}
class B < A {
  init() {
    super.init();
    this.extra = "sub";
  }
}
var b = B();
print b.tag;
print b.extra;
"#;
    assert_eq!(run_ok(source), "base\nsub\n");
}

#[test]
fn test_super_binds_statically() {
    // super resolves against the declaring class, not the receiver's.
    let source = r#"
class A { name() { print "A"; } }
class B < A { name() { super.name(); } }
class C < B {}
C().name();
"#;
    assert_eq!(run_ok(source), "A\n");
}

#[test]
fn test_initializer_returns_the_instance() {
    let source = r#"
class P {
  init() { this.x = 1; }
}
print typeof(P());
"#;
    assert_eq!(run_ok(source), "instance\n");
}

#[test]
fn test_class_printing() {
    let source = r#"
class Widget {}
print Widget;
print Widget();
"#;
    assert_eq!(run_ok(source), "Widget\nWidget instance\n");
}

#[test]
fn test_methods_on_this_through_invoke() {
    let source = r#"
class Chain {
  one() { return this.two(); }
  two() { return "end"; }
}
print Chain().one();
"#;
    assert_eq!(run_ok(source), "end\n");
}
