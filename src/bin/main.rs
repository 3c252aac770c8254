//! The `adder` executable: run a script file, dump its compiled
//! bytecode, or fall into a line-editing REPL when given no file.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use adder::Vm;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

#[derive(Parser)]
#[command(author, version, about = "a small dynamic scripting language", long_about = None)]
struct Cli {
  /// Script to run; omitted to start the REPL.
  file: Option<PathBuf>,

  /// Print the compiled bytecode instead of running it.
  #[arg(long)]
  dump_bytecode: bool,

  /// Enable verbose (debug-level) logging.
  #[arg(short, long)]
  verbose: bool,
}

fn init_logging(verbose: bool) {
  let default_level = if verbose { "debug" } else { "warn" };
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
  tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  match &cli.file {
    Some(path) => run_file(path, cli.dump_bytecode),
    None => run_repl(),
  }
}

fn run_file(path: &Path, dump_bytecode: bool) -> ExitCode {
  let src = match std::fs::read_to_string(path) {
    Ok(s) => s,
    Err(e) => {
      eprintln!("adder: can't read {}: {e}", path.display());
      return ExitCode::from(64);
    }
  };
  let file_name = path.to_string_lossy().into_owned();

  if dump_bytecode {
    match adder::compiler::compile(&src) {
      Ok(function) => {
        print!("{}", function.chunk.disassemble());
        ExitCode::SUCCESS
      }
      Err(e) => {
        eprintln!("{}", e.report(&src, &file_name));
        ExitCode::from(e.exit_code() as u8)
      }
    }
  } else {
    let mut vm = Vm::new();
    match vm.interpret(&src) {
      Ok(()) => ExitCode::SUCCESS,
      Err(e) => {
        eprintln!("{}", e.report(&src, &file_name));
        ExitCode::from(e.exit_code() as u8)
      }
    }
  }
}

fn run_repl() -> ExitCode {
  println!("adder REPL v{}\nPress CTRL-D to exit", env!("CARGO_PKG_VERSION"));

  let mut editor = match DefaultEditor::new() {
    Ok(e) => e,
    Err(e) => {
      eprintln!("adder: couldn't start line editor: {e}");
      return ExitCode::from(70);
    }
  };
  let mut vm = Vm::new();

  loop {
    let mut buffer = String::new();
    match read_multi_line(&mut editor, &mut buffer) {
      Ok(true) => {}
      Ok(false) => return ExitCode::SUCCESS,
      Err(e) => {
        eprintln!("adder: {e}");
        continue;
      }
    }
    if buffer.trim().is_empty() {
      continue;
    }
    if let Err(e) = vm.interpret(&buffer) {
      eprintln!("{}", e.report(&buffer, "<repl>"));
    }
  }
}

/// Reads lines until the input no longer looks like it continues an
/// open block: a line ending in `:` or an indented continuation line
/// both mean "keep reading". Returns `Ok(false)` on EOF/interrupt.
fn read_multi_line(editor: &mut DefaultEditor, buffer: &mut String) -> Result<bool, ReadlineError> {
  loop {
    let prompt = if buffer.is_empty() { ">>> " } else { "... " };
    let line = match editor.readline(prompt) {
      Ok(line) => line,
      Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => return Ok(false),
      Err(e) => return Err(e),
    };
    let _ = editor.add_history_entry(line.as_str());
    if !buffer.is_empty() {
      buffer.push('\n');
    }
    buffer.push_str(&line);

    let last_line = buffer.rsplit('\n').next().unwrap_or("");
    let continues = !last_line.trim().is_empty()
      && (last_line.trim_end().ends_with(':') || last_line.starts_with(|c: char| c.is_ascii_whitespace()));
    if !continues {
      return Ok(true);
    }
  }
}
