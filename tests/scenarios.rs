//! End-to-end scenarios: whole programs run through the public `Vm`,
//! asserting on captured stdout.

mod common;
use common::run;

#[test]
fn arithmetic_precedence() {
  assert_eq!(run("print(1 + 2 * 3)"), "7\n");
}

#[test]
fn recursive_factorial() {
  let src = "\
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)
print(fact(10))
";
  assert_eq!(run(src), "3628800\n");
}

#[test]
fn list_comprehension_of_squares() {
  assert_eq!(run("print([x*x for x in range(5)])"), "[0, 1, 4, 9, 16]\n");
}

#[test]
fn dunder_add_and_str_on_instance() {
  let src = "\
class V:
    def __init__(self, x):
        self.x = x
    def __add__(self, o):
        return V(self.x + o.x)
    def __str__(self):
        return \"V(\" + str(self.x) + \")\"
print(V(2) + V(3))
";
  assert_eq!(run(src), "V(5)\n");
}

#[test]
fn iterate_dict_keys() {
  let src = "\
var d = {\"a\": 1, \"b\": 2}
var s = 0
for k in d:
    s = s + d[k]
print(s)
";
  assert_eq!(run(src), "3\n");
}

#[test]
fn add_coerces_non_string_to_string() {
  assert_eq!(run("print(\"ab\" + 1)"), "ab1\n");
}
