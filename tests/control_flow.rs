//! Regression coverage for loop control flow: a `break` must discard
//! exactly the loop-condition boolean `JUMP_IF_FALSE` peeked, never a
//! real value sitting below it on the stack. A local declared before
//! the loop and read afterward pins the stack height the bytecode
//! assumes at the exit target.

mod common;
use common::run;

#[test]
fn break_in_while_loop_leaves_locals_intact() {
  let src = "\
var guard = 99
var i = 0
while True:
    if i == 3:
        break
    i = i + 1
print(guard)
print(i)
";
  assert_eq!(run(src), "99\n3\n");
}

#[test]
fn break_in_for_loop_leaves_locals_intact() {
  let src = "\
var guard = 7
var total = 0
for x in range(10):
    if x == 4:
        break
    total = total + x
print(guard)
print(total)
";
  assert_eq!(run(src), "7\n6\n");
}

#[test]
fn continue_in_while_loop() {
  let src = "\
var i = 0
var total = 0
while i < 10:
    i = i + 1
    if i % 2 == 0:
        continue
    total = total + i
print(total)
";
  assert_eq!(run(src), "25\n");
}

#[test]
fn nested_loops_break_only_innermost() {
  let src = "\
var count = 0
for x in range(3):
    for y in range(3):
        if y == 1:
            break
        count = count + 1
print(count)
";
  assert_eq!(run(src), "3\n");
}
