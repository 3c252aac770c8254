//! The fixed built-in function table: installed into every `Vm` at
//! construction time through the exact same `register_fn` path an
//! embedder or an extension module would use (§4.5/§6) — there is no
//! separate "builtin call" opcode or dispatch branch.

use std::cell::RefCell;
use std::rc::Rc;

use derive::native;
use indexmap::IndexMap;

use crate::error::RuntimeErrorKind;
use crate::value::object::SuperProxy;
use crate::value::Value;
use crate::vm::Vm;
use crate::{Error, Result};

pub fn install(vm: &mut Vm) {
  vm.register_fn("print", Rc::new(builtin_print));
  vm.register_fn("input", Rc::new(builtin_input));
  vm.register_fn("int", Rc::new(builtin_int));
  vm.register_fn("float", Rc::new(builtin_float));
  vm.register_fn("str", Rc::new(builtin_str));
  vm.register_fn("bool", Rc::new(builtin_bool));
  vm.register_fn("len", Rc::new(builtin_len));
  vm.register_fn("range", Rc::new(builtin_range));
  vm.register_fn("list", Rc::new(builtin_list));
  vm.register_fn("tuple", Rc::new(builtin_tuple));
  vm.register_fn("dict", Rc::new(builtin_dict));
  vm.register_fn("abs", Rc::new(builtin_abs));
  vm.register_fn("min", Rc::new(builtin_min));
  vm.register_fn("max", Rc::new(builtin_max));
  vm.register_fn("sum", Rc::new(builtin_sum));
  vm.register_fn("pow", Rc::new(builtin_pow));
  vm.register_fn("round", Rc::new(builtin_round));
  vm.register_fn("chr", Rc::new(builtin_chr));
  vm.register_fn("ord", Rc::new(ord));
  vm.register_fn("type", Rc::new(builtin_type));
  vm.register_fn("isinstance", Rc::new(builtin_isinstance));
  vm.register_fn("enumerate", Rc::new(builtin_enumerate));
  vm.register_fn("zip", Rc::new(builtin_zip));
  vm.register_fn("sorted", Rc::new(builtin_sorted));
  vm.register_fn("reversed", Rc::new(builtin_reversed));
  vm.register_fn("super", Rc::new(builtin_super));
}

fn arg(args: &[Value], i: usize) -> Result<&Value> {
  args
    .get(i)
    .ok_or_else(|| Error::runtime(RuntimeErrorKind::ArityError, format!("missing argument {i}")))
}

fn list_items(v: &Value) -> Result<Vec<Value>> {
  match v {
    Value::List(items) => Ok(items.borrow().clone()),
    Value::Tuple(items) => Ok((**items).clone()),
    Value::Set(items) => Ok(items.borrow().clone()),
    Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
    Value::Dict(d) => Ok(d.borrow().keys().map(|k| Value::str(k.clone())).collect()),
    other => Err(Error::type_error(format!("'{}' is not iterable", other.type_name()))),
  }
}

fn builtin_print(vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let mut parts = Vec::with_capacity(args.len());
  for v in args {
    parts.push(vm.stringify(v)?);
  }
  vm.write_stdout(&parts.join(" "));
  vm.write_stdout("\n");
  Ok(Value::Nil)
}

fn builtin_input(vm: &mut Vm, args: &[Value]) -> Result<Value> {
  if let Some(prompt) = args.first() {
    vm.write_stdout(&prompt.to_string());
  }
  let mut line = String::new();
  std::io::stdin()
    .read_line(&mut line)
    .map_err(|e| Error::runtime(RuntimeErrorKind::ImportError, e.to_string()))?;
  if line.ends_with('\n') {
    line.pop();
    if line.ends_with('\r') {
      line.pop();
    }
  }
  Ok(Value::str(line))
}

fn builtin_int(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  match arg(args, 0)? {
    Value::Int(i) => Ok(Value::Int(*i)),
    Value::Float(f) => Ok(Value::Int(*f as i64)),
    Value::Bool(b) => Ok(Value::Int(*b as i64)),
    Value::Str(s) => s
      .trim()
      .parse::<i64>()
      .map(Value::Int)
      .map_err(|_| Error::runtime(RuntimeErrorKind::ValueError, format!("invalid literal for int(): {s:?}"))),
    other => Err(Error::type_error(format!("cannot convert {} to int", other.type_name()))),
  }
}

fn builtin_float(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  match arg(args, 0)? {
    Value::Int(i) => Ok(Value::Float(*i as f64)),
    Value::Float(f) => Ok(Value::Float(*f)),
    Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
    Value::Str(s) => s
      .trim()
      .parse::<f64>()
      .map(Value::Float)
      .map_err(|_| Error::runtime(RuntimeErrorKind::ValueError, format!("invalid literal for float(): {s:?}"))),
    other => Err(Error::type_error(format!("cannot convert {} to float", other.type_name()))),
  }
}

fn builtin_str(vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let text = vm.stringify(arg(args, 0)?)?;
  Ok(Value::str(text))
}

fn builtin_bool(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  Ok(Value::Bool(args.first().map(Value::truthy).unwrap_or(false)))
}

fn builtin_len(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let n = match arg(args, 0)? {
    Value::Str(s) => s.chars().count(),
    Value::List(items) => items.borrow().len(),
    Value::Tuple(items) => items.len(),
    Value::Set(items) => items.borrow().len(),
    Value::Dict(d) => d.borrow().len(),
    other => return Err(Error::type_error(format!("object of type '{}' has no len()", other.type_name()))),
  };
  Ok(Value::Int(n as i64))
}

fn builtin_range(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let (start, stop, step) = match args.len() {
    1 => (0, i64::from_value_int(arg(args, 0)?)?, 1),
    2 => (i64::from_value_int(arg(args, 0)?)?, i64::from_value_int(arg(args, 1)?)?, 1),
    3 => (
      i64::from_value_int(arg(args, 0)?)?,
      i64::from_value_int(arg(args, 1)?)?,
      i64::from_value_int(arg(args, 2)?)?,
    ),
    n => return Err(Error::arity("range", 3, n)),
  };
  if step == 0 {
    return Err(Error::runtime(RuntimeErrorKind::ValueError, "range() arg 3 must not be zero"));
  }
  let mut items = Vec::new();
  let mut i = start;
  while (step > 0 && i < stop) || (step < 0 && i > stop) {
    items.push(Value::Int(i));
    i += step;
  }
  Ok(Value::list(items))
}

trait AsRangeInt {
  fn from_value_int(v: &Value) -> Result<i64>;
}

impl AsRangeInt for i64 {
  fn from_value_int(v: &Value) -> Result<i64> {
    v.as_int()
      .ok_or_else(|| Error::type_error(format!("'{}' object cannot be interpreted as an integer", v.type_name())))
  }
}

fn builtin_list(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  match args.first() {
    Some(v) => Ok(Value::list(list_items(v)?)),
    None => Ok(Value::list(Vec::new())),
  }
}

fn builtin_tuple(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  match args.first() {
    Some(v) => Ok(Value::tuple(list_items(v)?)),
    None => Ok(Value::tuple(Vec::new())),
  }
}

fn builtin_dict(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  match args.first() {
    Some(Value::Dict(d)) => Ok(Value::Dict(Rc::new(RefCell::new(d.borrow().clone())))),
    Some(other) => Err(Error::type_error(format!("cannot build dict from {}", other.type_name()))),
    None => Ok(Value::dict(IndexMap::new())),
  }
}

fn builtin_abs(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  match arg(args, 0)? {
    Value::Int(i) => Ok(Value::Int(i.abs())),
    Value::Float(f) => Ok(Value::Float(f.abs())),
    other => Err(Error::type_error(format!("bad operand type for abs(): '{}'", other.type_name()))),
  }
}

fn numeric_cmp(items: &[Value], want_min: bool) -> Result<Value> {
  if items.is_empty() {
    return Err(Error::runtime(RuntimeErrorKind::ValueError, "arg is an empty sequence"));
  }
  let mut best = items[0].clone();
  for v in &items[1..] {
    let ord = best
      .partial_cmp(v)
      .ok_or_else(|| Error::type_error(format!("'<' not supported between instances of '{}' and '{}'", best.type_name(), v.type_name())))?;
    let replace = if want_min { ord == std::cmp::Ordering::Greater } else { ord == std::cmp::Ordering::Less };
    if replace {
      best = v.clone();
    }
  }
  Ok(best)
}

fn variadic_or_single_iterable(args: &[Value]) -> Result<Vec<Value>> {
  if args.len() == 1 {
    list_items(&args[0]).or_else(|_| Ok(vec![args[0].clone()]))
  } else {
    Ok(args.to_vec())
  }
}

fn builtin_min(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  numeric_cmp(&variadic_or_single_iterable(args)?, true)
}

fn builtin_max(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  numeric_cmp(&variadic_or_single_iterable(args)?, false)
}

fn builtin_sum(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let items = list_items(arg(args, 0)?)?;
  let mut acc = args.get(1).cloned().unwrap_or(Value::Int(0));
  for v in items {
    acc = match (&acc, &v) {
      (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
      (Value::Float(_) | Value::Int(_), Value::Float(_) | Value::Int(_)) => {
        Value::Float(acc.as_float().unwrap() + v.as_float().unwrap())
      }
      _ => return Err(Error::type_error(format!("unsupported operand type(s) for +: '{}' and '{}'", acc.type_name(), v.type_name()))),
    };
  }
  Ok(acc)
}

fn builtin_pow(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let base = arg(args, 0)?;
  let exp = arg(args, 1)?;
  match (base, exp) {
    (Value::Int(b), Value::Int(e)) if *e >= 0 => match b.checked_pow(*e as u32) {
      Some(v) => Ok(Value::Int(v)),
      None => Ok(Value::Float((*b as f64).powf(*e as f64))),
    },
    _ => Ok(Value::Float(
      base.as_float().ok_or_else(|| Error::type_error("pow() requires numeric arguments"))?
        .powf(exp.as_float().ok_or_else(|| Error::type_error("pow() requires numeric arguments"))?),
    )),
  }
}

fn builtin_round(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let x = arg(args, 0)?.as_float().ok_or_else(|| Error::type_error("round() requires a numeric argument"))?;
  match args.get(1) {
    None => Ok(Value::Int(x.round() as i64)),
    Some(ndigits) => {
      let n = ndigits.as_int().ok_or_else(|| Error::type_error("ndigits must be an int"))?;
      let scale = 10f64.powi(n as i32);
      Ok(Value::Float((x * scale).round() / scale))
    }
  }
}

fn builtin_chr(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let code = arg(args, 0)?.as_int().ok_or_else(|| Error::type_error("an integer is required"))?;
  let ch = char::from_u32(code as u32).ok_or_else(|| Error::runtime(RuntimeErrorKind::ValueError, "chr() arg not in range"))?;
  Ok(Value::str(ch.to_string()))
}

// Wired through `#[native]` rather than hand-written against the raw
// `Fn(&mut Vm, &[Value]) -> Result<Value>` ABI, as a worked example of
// the `FromValue`/`IntoValue` path the macro generates: arity and the
// `String` conversion are handled by the expansion, the one-character
// check stays in the body.
#[native]
fn ord(s: String) -> Result<i64> {
  let mut chars = s.chars();
  let (Some(c), None) = (chars.next(), chars.next()) else {
    return Err(Error::runtime(RuntimeErrorKind::ValueError, "ord() expected a character, got a string of different length"));
  };
  Ok(c as i64)
}

fn builtin_type(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  Ok(Value::str(arg(args, 0)?.type_name()))
}

fn builtin_isinstance(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let value = arg(args, 0)?;
  let class = arg(args, 1)?;
  let Value::Class(target) = class else {
    return Err(Error::type_error("isinstance() arg 2 must be a class"));
  };
  let Value::Instance(inst) = value else {
    return Ok(Value::Bool(false));
  };
  let mut cur = Some(inst.borrow().class.clone());
  while let Some(c) = cur {
    if Rc::ptr_eq(&c, target) {
      return Ok(Value::Bool(true));
    }
    cur = c.borrow().parent.clone();
  }
  Ok(Value::Bool(false))
}

fn builtin_enumerate(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let start = match args.get(1) {
    Some(v) => v.as_int().ok_or_else(|| Error::type_error("enumerate() start must be an int"))?,
    None => 0,
  };
  let items = list_items(arg(args, 0)?)?;
  let pairs = items
    .into_iter()
    .enumerate()
    .map(|(i, v)| Value::tuple(vec![Value::Int(start + i as i64), v]))
    .collect();
  Ok(Value::list(pairs))
}

fn builtin_zip(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let sequences: Vec<Vec<Value>> = args.iter().map(list_items).collect::<Result<_>>()?;
  let len = sequences.iter().map(Vec::len).min().unwrap_or(0);
  let mut out = Vec::with_capacity(len);
  for i in 0..len {
    out.push(Value::tuple(sequences.iter().map(|s| s[i].clone()).collect()));
  }
  Ok(Value::list(out))
}

fn builtin_sorted(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let mut items = list_items(arg(args, 0)?)?;
  let reverse = args.get(1).map(Value::truthy).unwrap_or(false);
  let mut err = None;
  items.sort_by(|a, b| {
    a.partial_cmp(b).unwrap_or_else(|| {
      err.get_or_insert_with(|| Error::type_error(format!("'<' not supported between instances of '{}' and '{}'", a.type_name(), b.type_name())));
      std::cmp::Ordering::Equal
    })
  });
  if let Some(e) = err {
    return Err(e);
  }
  if reverse {
    items.reverse();
  }
  Ok(Value::list(items))
}

fn builtin_reversed(_vm: &mut Vm, args: &[Value]) -> Result<Value> {
  let mut items = list_items(arg(args, 0)?)?;
  items.reverse();
  Ok(Value::list(items))
}

/// `super()` reads the innermost active method call's bound `self` and
/// its `defining_class`, producing a `SuperProxy` that resumes method
/// resolution at the parent of the class the currently-running method
/// was installed on.
fn builtin_super(vm: &mut Vm, _args: &[Value]) -> Result<Value> {
  let this = match vm.current_self() {
    Some(Value::Instance(inst)) => inst,
    _ => return Err(Error::runtime(RuntimeErrorKind::NameError, "super(): no current instance")),
  };
  let from_class = vm
    .current_defining_class()
    .ok_or_else(|| Error::runtime(RuntimeErrorKind::NameError, "super(): no current class"))?;
  Ok(Value::Super(Rc::new(SuperProxy { this, from_class })))
}
