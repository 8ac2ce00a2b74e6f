//! Interactive Session
//!
//! One line at a time against a single VM, so globals, classes, and
//! functions defined earlier stay available. History persists to
//! `~/.fer_history`. Errors print and the session continues; ctrl-D ends
//! it.

use std::path::PathBuf;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use fer_runtime::Vm;

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|dir| dir.join(".fer_history"))
}

pub fn run(vm: &mut Vm) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Could not start the line editor: {}", e);
            return;
        }
    };

    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                if let Err(e) = vm.interpret(&line) {
                    eprintln!("{}", e);
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
}
