//! Boundary cases named explicitly by the testable-properties section:
//! empty containers, `range`'s edge forms, power overflow, negative-
//! index slicing, dunder-less arithmetic on instances, and importing a
//! module that doesn't exist.

mod common;
use common::{run, run_err};

#[test]
fn empty_container_literals() {
  assert_eq!(run("print([])"), "[]\n");
  assert_eq!(run("print({})"), "{}\n");
  assert_eq!(run("print(())"), "()\n");
  assert_eq!(run("print(set())"), "{}\n");
}

#[test]
fn range_empty_forms() {
  assert_eq!(run("print(list(range(0)))"), "[]\n");
  assert_eq!(run("print(list(range(5, 5)))"), "[]\n");
  assert_eq!(run("print(list(range(5, 0, -1)))"), "[5, 4, 3, 2, 1]\n");
}

#[test]
fn range_rejects_zero_step() {
  let err = run_err("range(0, 5, 0)");
  assert!(matches!(err, adder::Error::Runtime { .. }));
}

#[test]
fn power_overflow_falls_back_to_float() {
  // 2**100 overflows i64; the result must still come out as a float,
  // not wrap or panic.
  let out = run("print(2 ** 100)");
  assert_eq!(out.trim(), (2f64.powf(100.0)).to_string());
}

#[test]
fn power_within_range_stays_int() {
  assert_eq!(run("print(2 ** 10)"), "1024\n");
}

#[test]
fn slice_with_negative_indices_and_step() {
  let src = "\
var xs = [0, 1, 2, 3, 4]
print(xs[-3:])
print(xs[::-1])
print(xs[1:4])
";
  assert_eq!(run(src), "[2, 3, 4]\n[4, 3, 2, 1, 0]\n[1, 2, 3]\n");
}

#[test]
fn dunderless_arithmetic_on_instance_is_type_error() {
  let src = "\
class NoDunders:
    def __init__(self):
        pass
print(NoDunders() + 1)
";
  let err = run_err(src);
  assert!(matches!(err, adder::Error::Runtime { kind, .. } if format!("{kind}") == "TypeError"));
}

#[test]
fn importing_missing_module_fails_to_load() {
  // No extension named this will ever resolve to a real shared object,
  // so `import` itself fails to load it (rather than silently handing
  // back a module whose first call raises).
  let err = run_err("import definitely_not_a_real_extension_module");
  assert!(matches!(err, adder::Error::Runtime { .. }));
}
