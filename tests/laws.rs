//! The algebraic laws named as testable properties: round-tripping
//! through `int`/`str`, length preservation under comprehension,
//! sort/reverse idempotence, and the floor-division identity.

mod common;
use common::run;

#[test]
fn int_str_round_trip() {
  for n in [0_i64, 1, -1, 42, -1000, i64::from(i32::MAX), i64::from(i32::MIN)] {
    let src = format!("print(int(str({n})) == {n})");
    assert_eq!(run(&src), "true\n", "failed for n = {n}");
  }
}

#[test]
fn comprehension_preserves_length() {
  let src = "\
var it = [1, 2, 3, 4, 5, 6]
print(len([x for x in it]) == len(it))
";
  assert_eq!(run(src), "true\n");
}

#[test]
fn sort_reverse_sort_is_idempotent() {
  let src = "\
var xs = [5, 3, 1, 4, 1, 5, 9, 2, 6]
print(sorted(reversed(sorted(xs))) == sorted(xs))
";
  assert_eq!(run(src), "true\n");
}

#[test]
fn floor_division_identity() {
  let pairs = [(7, 3), (-7, 3), (7, -3), (-7, -3), (1, 7), (0, 5)];
  for (a, b) in pairs {
    let src = format!("print(({a} // {b}) * {b} + ({a} % {b}) == {a})");
    assert_eq!(run(&src), "true\n", "failed for a={a}, b={b}");
  }
}

#[test]
fn floor_division_rounds_toward_negative_infinity() {
  assert_eq!(run("print(-7 // 2)"), "-4\n");
  assert_eq!(run("print(7 // 2)"), "3\n");
}

#[test]
fn float_modulo_sign_follows_divisor() {
  // 5.0 % -3.0 is -1.0 under floor-based modulo (sign follows the
  // divisor), not 2.0 (what `rem_euclid`, which is always non-negative,
  // would give).
  assert_eq!(run("print(5.0 % -3.0)"), "-1\n");
  assert_eq!(run("print(-5.0 % 3.0)"), "1\n");
}

#[test]
fn floor_division_identity_holds_for_floats() {
  let pairs = [(7.0, 3.0), (-7.0, 3.0), (7.0, -3.0), (-7.0, -3.0), (5.0, -3.0)];
  for (a, b) in pairs {
    // `{a:?}`/`{b:?}` (Debug), not `{a}`/`{b}` (Display): Display drops
    // the trailing `.0` on whole-number floats, which would silently
    // turn these into int literals in the generated source below.
    let src = format!("print(({a:?} // {b:?}) * {b:?} + ({a:?} % {b:?}) == {a:?})");
    assert_eq!(run(&src), "true\n", "failed for a={a}, b={b}");
  }
}
