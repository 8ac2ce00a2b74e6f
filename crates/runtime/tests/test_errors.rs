//! Error paths: runtime errors with their traces, compile errors through
//! the interpret entry point, and recovery after failure.

mod common;

use common::{SharedBuffer, run, run_err};
use fer_runtime::{InterpretError, Vm, VmOptions};

#[test]
fn test_calling_a_non_callable() {
    let err = run_err("var x; x();");
    assert!(err.contains("Can only call functions and classes."));
    assert!(err.contains("[line 1] in script"));
}

#[test]
fn test_undefined_variable() {
    let err = run_err("print missing;");
    assert!(err.contains("Undefined variable 'missing'."));
}

#[test]
fn test_assigning_undefined_global() {
    let err = run_err("ghost = 1;");
    assert!(err.contains("Undefined variable 'ghost'."));
}

#[test]
fn test_type_errors() {
    assert!(run_err(r#"print 1 + "a";"#).contains("Operands must be two numbers or two strings."));
    assert!(run_err(r#"print "a" - "b";"#).contains("Operands must be numbers."));
    assert!(run_err("print -nil;").contains("Operand must be a number."));
    assert!(run_err("print nil < 1;").contains("Operands must be numbers."));
}

#[test]
fn test_property_errors() {
    assert!(run_err("var x = 1; print x.field;").contains("Only instances have properties."));
    assert!(run_err("var x = 1; x.field = 2;").contains("Only instances have fields."));
    assert!(run_err("class C {} print C().absent;").contains("Undefined property 'absent'."));
    assert!(run_err("class C {} C().absent();").contains("Undefined property 'absent'."));
    assert!(run_err("var s = \"str\"; s.method();").contains("Only instances have methods."));
}

#[test]
fn test_arity_mismatch() {
    let err = run_err("fun two(a, b) {} two(1);");
    assert!(err.contains("Expected 2 arguments but got 1."));
}

#[test]
fn test_inheriting_from_a_non_class() {
    let err = run_err("var NotClass = 123; class B < NotClass {}");
    assert!(err.contains("Superclass must be a class."));
}

#[test]
fn test_stack_overflow() {
    let err = run_err("fun f() { f(); } f();");
    assert!(err.contains("Stack overflow."));
}

#[test]
fn test_trace_lists_frames_innermost_first() {
    let source = r#"fun a() { b(); }
fun b() { missing; }
a();"#;
    let err = run_err(source);
    assert!(err.contains("Undefined variable 'missing'."));
    let b_at = err.find("in b()").expect("frame for b");
    let a_at = err.find("in a()").expect("frame for a");
    let script_at = err.find("in script").expect("script frame");
    assert!(b_at < a_at && a_at < script_at);
    assert!(err.contains("[line 2] in b()"));
    assert!(err.contains("[line 3] in script"));
}

#[test]
fn test_compile_errors_come_back_as_compile_status() {
    let (_, result) = run("var 1 = 2;");
    assert!(matches!(result, Err(InterpretError::Compile(_))));

    let (_, result) = run("var x; x();");
    assert!(matches!(result, Err(InterpretError::Runtime(_))));
}

#[test]
fn test_output_before_the_error_is_kept() {
    let (output, result) = run("print 1; print 2; nope();");
    assert!(result.is_err());
    assert_eq!(output, "1\n2\n");
}

#[test]
fn test_vm_recovers_after_runtime_error() {
    let buffer = SharedBuffer::default();
    let mut vm = Vm::with_output(VmOptions::default(), Box::new(buffer.clone()));

    assert!(vm.interpret("var x = 1; boom();").is_err());
    // The stacks were reset; the session carries on with its globals.
    vm.interpret("print x;").expect("vm usable after error");
    assert_eq!(buffer.contents(), "1\n");
}

#[test]
fn test_globals_persist_across_interprets() {
    let buffer = SharedBuffer::default();
    let mut vm = Vm::with_output(VmOptions::default(), Box::new(buffer.clone()));

    vm.interpret("var counter = 0;").expect("define");
    vm.interpret("counter = counter + 1;").expect("update");
    vm.interpret("print counter;").expect("read");
    assert_eq!(buffer.contents(), "1\n");
}

#[test]
fn test_perm_is_enforced_across_interprets() {
    let buffer = SharedBuffer::default();
    let mut vm = Vm::with_output(VmOptions::default(), Box::new(buffer.clone()));

    vm.interpret("perm limit = 10;").expect("define");
    let err = vm.interpret("limit = 11;").expect_err("perm write must fail");
    assert!(err.to_string().contains("Can't reassign to permanent variable 'limit'."));
}
