//! Shared harness for the black-box tests: run a whole program through
//! the public `Vm` API and hand back whatever it wrote to stdout.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use adder::Vm;

#[derive(Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.borrow_mut().write(buf)
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

impl SharedBuffer {
  pub fn text(&self) -> String {
    String::from_utf8(self.0.borrow().clone()).expect("program wrote non-utf8 stdout")
  }
}

/// Runs `src` to completion and returns everything it printed. Panics
/// (with the rendered diagnostic) on a compile or runtime error.
pub fn run(src: &str) -> String {
  let mut vm = Vm::new();
  let out = SharedBuffer::default();
  vm.set_stdout(Box::new(out.clone()));
  vm
    .interpret(src)
    .unwrap_or_else(|e| panic!("program failed:\n{}", e.report(src, "<test>")));
  out.text()
}

/// Runs `src` and returns the error it failed with, panicking if it
/// ran to completion instead.
pub fn run_err(src: &str) -> adder::Error {
  let mut vm = Vm::new();
  vm.set_stdout(Box::new(SharedBuffer::default()));
  match vm.interpret(src) {
    Ok(()) => panic!("expected `{src}` to fail, but it ran to completion"),
    Err(e) => e,
  }
}
