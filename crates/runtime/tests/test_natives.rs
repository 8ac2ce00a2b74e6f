//! The native library: strings, math, types, time, file io.

mod common;

use common::{SharedBuffer, run_ok};
use fer_runtime::{Vm, VmOptions};

#[test]
fn test_str_conversions() {
    assert_eq!(run_ok("print str(42) + \"!\";"), "42!\n");
    assert_eq!(run_ok("print str(2.5);"), "2.5\n");
    assert_eq!(run_ok("print str(true);"), "true\n");
    assert_eq!(run_ok("print str(nil);"), "nil\n");
    assert_eq!(run_ok(r#"print str("already");"#), "already\n");
    // Wrong arity follows the native contract.
    assert_eq!(run_ok("print str();"), "nil\n");
}

#[test]
fn test_len() {
    assert_eq!(run_ok(r#"print len("hello");"#), "5\n");
    assert_eq!(run_ok("print len([1, 2, 3]);"), "3\n");
    assert_eq!(run_ok(r#"print len({"a": 1});"#), "1\n");
    assert_eq!(run_ok("print len(5);"), "nil\n");
}

#[test]
fn test_substring() {
    assert_eq!(run_ok(r#"print sub("hello", 1);"#), "ello\n");
    assert_eq!(run_ok(r#"print sub("hello", 1, 3);"#), "ell\n");
    assert_eq!(run_ok(r#"print sub("hello", 9) == "";"#), "true\n");
    assert_eq!(run_ok(r#"print sub("hello", 2, 100);"#), "llo\n");
}

#[test]
fn test_case_and_trim() {
    assert_eq!(run_ok(r#"print upper("mixed Case");"#), "MIXED CASE\n");
    assert_eq!(run_ok(r#"print lower("MIXED Case");"#), "mixed case\n");
    assert_eq!(run_ok(r#"print trim("  padded  ") + "!";"#), "padded!\n");
}

#[test]
fn test_index_of() {
    assert_eq!(run_ok(r#"print index("haystack", "stack");"#), "3\n");
    assert_eq!(run_ok(r#"print index("haystack", "needle");"#), "-1\n");
}

#[test]
fn test_split() {
    assert_eq!(run_ok(r#"print split("a,b,c", ",");"#), "[a, b, c]\n");
    // Consecutive delimiters collapse; empty pieces are dropped.
    assert_eq!(run_ok(r#"print split("a,,b", ",");"#), "[a, b]\n");
    assert_eq!(run_ok(r#"print len(split("one two,three", " ,"));"#), "3\n");
}

#[test]
fn test_chr_and_ord() {
    assert_eq!(run_ok("print chr(65);"), "A\n");
    assert_eq!(run_ok(r#"print ord("A");"#), "65\n");
    assert_eq!(run_ok(r#"print ord("");"#), "nil\n");
    assert_eq!(run_ok(r#"print chr(ord("z"));"#), "z\n");
}

#[test]
fn test_chr_produces_a_single_raw_byte() {
    // A code above 0x7F is still one byte, and it round-trips.
    assert_eq!(run_ok("print len(chr(200));"), "1\n");
    assert_eq!(run_ok("print ord(chr(200));"), "200\n");
    assert_eq!(run_ok("print ord(chr(255));"), "255\n");
}

#[test]
fn test_non_utf8_bytes_pass_through_output() {
    let buffer = SharedBuffer::default();
    let mut vm = Vm::with_output(VmOptions::default(), Box::new(buffer.clone()));
    vm.interpret("print chr(200) + chr(255);").expect("runs");
    assert_eq!(buffer.raw(), vec![200, 255, b'\n']);
}

#[test]
fn test_math() {
    assert_eq!(run_ok("print sqrt(9);"), "3\n");
    assert_eq!(run_ok("print pow(2, 10);"), "1024\n");
    assert_eq!(run_ok("print floor(2.9);"), "2\n");
    assert_eq!(run_ok("print ceil(2.1);"), "3\n");
    assert_eq!(run_ok("print sin(0);"), "0\n");
    assert_eq!(run_ok("print cos(0);"), "1\n");
    assert_eq!(run_ok("print tan(0);"), "0\n");
    assert_eq!(run_ok(r#"print sqrt("nope");"#), "nil\n");
}

#[test]
fn test_rand_is_seedable() {
    assert_eq!(
        run_ok("seed(42); var a = rand(); seed(42); var b = rand(); print a == b;"),
        "true\n"
    );
    assert_eq!(run_ok("var r = rand(); print r >= 0 and r < 1;"), "true\n");
}

#[test]
fn test_typeof() {
    assert_eq!(run_ok("print typeof(nil);"), "nil\n");
    assert_eq!(run_ok("print typeof(true);"), "bool\n");
    assert_eq!(run_ok("print typeof(1.5);"), "number\n");
    assert_eq!(run_ok(r#"print typeof("s");"#), "string\n");
    assert_eq!(run_ok("print typeof([]);"), "list\n");
    assert_eq!(run_ok("print typeof({});"), "dictionary\n");
    assert_eq!(run_ok("fun f() {} print typeof(f);"), "function\n");
    assert_eq!(run_ok("print typeof(len);"), "function\n");
    assert_eq!(run_ok("class C {} print typeof(C);"), "class\n");
    assert_eq!(run_ok("class C {} print typeof(C());"), "instance\n");
    assert_eq!(
        run_ok("class C { m() {} } print typeof(C().m);"),
        "function\n"
    );
}

#[test]
fn test_assert_passes_through_truthy() {
    assert_eq!(run_ok("print assert(1);"), "true\n");
    assert_eq!(run_ok(r#"print assert("ok", "unused message");"#), "true\n");
}

#[test]
fn test_clock_is_monotonic_and_now_is_wall_time() {
    assert_eq!(run_ok("print clock() >= 0;"), "true\n");
    // A billion seconds puts us safely past 2001.
    assert_eq!(run_ok("print now() > 1000000000;"), "true\n");
}

#[test]
fn test_file_roundtrip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("note.txt");
    let source = format!(
        r#"
print write("{path}", "saved text");
print read("{path}");
"#,
        path = path.display()
    );
    assert_eq!(run_ok(&source), "true\nsaved text\n");
}

#[test]
fn test_file_roundtrip_preserves_raw_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("raw.bin");
    let source = format!(
        r#"
write("{path}", chr(200) + chr(0));
var data = read("{path}");
print len(data);
print ord(data);
"#,
        path = path.display()
    );
    assert_eq!(run_ok(&source), "2\n200\n");
}

#[test]
fn test_read_missing_file_is_nil() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("absent.txt");
    let source = format!(r#"print read("{}");"#, path.display());
    assert_eq!(run_ok(&source), "nil\n");
}

#[test]
fn test_write_to_bad_path_is_false() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("no/such/dir/file.txt");
    let source = format!(r#"print write("{}", "data");"#, path.display());
    assert_eq!(run_ok(&source), "false\n");
}
