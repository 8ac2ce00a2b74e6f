//! Shared harness for the interpreter tests: run a program, capture what
//! it printed, and hand back the outcome.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use fer_runtime::{InterpretError, Vm, VmOptions};

/// An output sink the test keeps a handle to after the VM takes ownership
/// of its clone.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    /// The exact bytes written, for programs whose output is not UTF-8.
    pub fn raw(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn run_with_options(source: &str, options: VmOptions) -> (String, Result<(), InterpretError>) {
    let buffer = SharedBuffer::default();
    let mut vm = Vm::with_output(options, Box::new(buffer.clone()));
    let result = vm.interpret(source);
    (buffer.contents(), result)
}

pub fn run(source: &str) -> (String, Result<(), InterpretError>) {
    run_with_options(source, VmOptions::default())
}

/// Run a program that must succeed; returns its output.
pub fn run_ok(source: &str) -> String {
    let (output, result) = run(source);
    if let Err(e) = result {
        panic!("program failed: {}\noutput so far: {}", e, output);
    }
    output
}

/// Run a program that must fail; returns the error text (message plus
/// trace for runtime errors, diagnostics for compile errors).
pub fn run_err(source: &str) -> String {
    let (output, result) = run(source);
    match result {
        Ok(()) => panic!("expected an error\noutput: {}", output),
        Err(e) => e.to_string(),
    }
}
