//! Language basics: expressions, statements, scoping, control flow.

mod common;

use common::{run_err, run_ok};

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(run_ok("print 1 + 2 * 3;"), "7\n");
    assert_eq!(run_ok("print (1 + 2) * 3;"), "9\n");
    assert_eq!(run_ok("print 10 - 4 / 2;"), "8\n");
    assert_eq!(run_ok("print -2 * 3;"), "-6\n");
    assert_eq!(run_ok("print 2.5 + 0.25;"), "2.75\n");
}

#[test]
fn test_string_concatenation_and_interning() {
    assert_eq!(run_ok(r#"var a = "he"; var b = "llo"; print a + b;"#), "hello\n");
    // Interning makes the concatenation identical to the literal, and
    // equality on objects is identity.
    assert_eq!(
        run_ok(r#"var a = "he"; var b = "llo"; print a + b == "hello";"#),
        "true\n"
    );
}

#[test]
fn test_string_escapes() {
    assert_eq!(run_ok(r#"print "a\nb";"#), "a\nb\n");
    assert_eq!(run_ok(r#"print "tab\there";"#), "tab\there\n");
    assert_eq!(run_ok(r#"print "say \"hi\"";"#), "say \"hi\"\n");
}

#[test]
fn test_truthiness() {
    assert_eq!(run_ok("print !nil;"), "true\n");
    assert_eq!(run_ok("print !false;"), "true\n");
    assert_eq!(run_ok("print !0;"), "false\n");
    assert_eq!(run_ok(r#"print !"";"#), "false\n");
    assert_eq!(run_ok("print ![];"), "false\n");
}

#[test]
fn test_equality() {
    assert_eq!(run_ok("print 1 == 1;"), "true\n");
    assert_eq!(run_ok("print 1 == 2;"), "false\n");
    assert_eq!(run_ok(r#"print "a" == "a";"#), "true\n");
    assert_eq!(run_ok(r#"print "a" == "b";"#), "false\n");
    assert_eq!(run_ok("print nil == false;"), "false\n");
    assert_eq!(run_ok("print 1 != 2;"), "true\n");
    // Lists compare by identity.
    assert_eq!(run_ok("var a = [1]; var b = [1]; print a == b;"), "false\n");
    assert_eq!(run_ok("var a = [1]; var b = a; print a == b;"), "true\n");
}

#[test]
fn test_comparisons() {
    assert_eq!(run_ok("print 1 < 2;"), "true\n");
    assert_eq!(run_ok("print 2 <= 2;"), "true\n");
    assert_eq!(run_ok("print 3 > 4;"), "false\n");
    assert_eq!(run_ok("print 4 >= 5;"), "false\n");
}

#[test]
fn test_globals() {
    assert_eq!(run_ok("var x = 1; x = x + 1; print x;"), "2\n");
    assert_eq!(run_ok("var x; print x;"), "nil\n");
}

#[test]
fn test_assignment_is_an_expression() {
    assert_eq!(run_ok("var x; var y; x = y = 3; print x; print y;"), "3\n3\n");
}

#[test]
fn test_block_scoping() {
    let source = r#"
var a = "outer";
{
  var a = "inner";
  print a;
}
print a;
"#;
    assert_eq!(run_ok(source), "inner\nouter\n");
}

#[test]
fn test_if_else() {
    assert_eq!(run_ok("if (true) print 1; else print 2;"), "1\n");
    assert_eq!(run_ok("if (false) print 1; else print 2;"), "2\n");
    assert_eq!(run_ok("if (nil) print 1;"), "");
}

#[test]
fn test_logical_operators_short_circuit() {
    assert_eq!(run_ok("print true and 1;"), "1\n");
    assert_eq!(run_ok("print nil and 1;"), "nil\n");
    assert_eq!(run_ok(r#"print false or "x";"#), "x\n");
    assert_eq!(run_ok("print 7 or 8;"), "7\n");
    // The right side must not evaluate when short-circuited.
    assert_eq!(
        run_ok("fun boom() { print \"boom\"; return true; } print false and boom();"),
        "false\n"
    );
}

#[test]
fn test_while_loop() {
    let source = r#"
var i = 0;
var total = 0;
while (i < 5) {
  i = i + 1;
  total = total + i;
}
print total;
"#;
    assert_eq!(run_ok(source), "15\n");
}

#[test]
fn test_for_with_break_and_continue() {
    let source = r#"
for (var i = 0; i < 5; i = i + 1) {
  if (i == 1) continue;
  if (i == 4) break;
  print i;
}
"#;
    assert_eq!(run_ok(source), "0\n2\n3\n");
}

#[test]
fn test_nested_loops_break_inner_only() {
    let source = r#"
for (var i = 0; i < 2; i = i + 1) {
  for (var j = 0; j < 10; j = j + 1) {
    if (j == 1) break;
    print i * 10 + j;
  }
}
"#;
    assert_eq!(run_ok(source), "0\n10\n");
}

#[test]
fn test_while_with_break() {
    let source = r#"
var i = 0;
while (true) {
  if (i == 3) break;
  print i;
  i = i + 1;
}
"#;
    assert_eq!(run_ok(source), "0\n1\n2\n");
}

#[test]
fn test_functions_and_returns() {
    let source = r#"
fun add(a, b) { return a + b; }
print add(1, 2);
print add("x", "y");
"#;
    assert_eq!(run_ok(source), "3\nxy\n");
    // Falling off the end returns nil.
    assert_eq!(run_ok("fun f() {} print f();"), "nil\n");
    assert_eq!(run_ok("fun f() { return; } print f();"), "nil\n");
}

#[test]
fn test_recursion() {
    let source = r#"
fun fib(n) {
  if (n < 2) return n;
  return fib(n - 2) + fib(n - 1);
}
print fib(10);
"#;
    assert_eq!(run_ok(source), "55\n");
}

#[test]
fn test_function_printing() {
    assert_eq!(run_ok("fun f() {} print f;"), "<fn f>\n");
    assert_eq!(run_ok("print len;"), "<native fn>\n");
}

#[test]
fn test_perm_globals() {
    assert_eq!(run_ok("perm greeting = \"hi\"; print greeting;"), "hi\n");
    let err = run_err("perm x = 1; x = 2;");
    assert!(err.contains("Can't reassign to permanent variable 'x'."));
}

#[test]
fn test_perm_local_is_rejected_at_compile_time() {
    let err = run_err("{ perm x = 1; x = 2; }");
    assert!(err.contains("Can't reassign to permanent variable"));
}

#[test]
fn test_number_formatting() {
    assert_eq!(run_ok("print 7;"), "7\n");
    assert_eq!(run_ok("print 2.5;"), "2.5\n");
    assert_eq!(run_ok("print 10 / 4;"), "2.5\n");
    assert_eq!(run_ok("print -0.0;"), "-0\n");
    assert_eq!(run_ok("print 1 / 0;"), "inf\n");
}
