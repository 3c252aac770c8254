//! The value representation shared by the compiler, the VM and native
//! functions.
//!
//! Shared variants are `Rc`-backed (see [`object`]) rather than
//! `Arc`-backed: the VM is single-threaded end to end (§5 of the
//! design), so there is no reason to pay for atomic refcounting.

pub mod object;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

pub use object::{BoundMethod, Class, Function, Instance, Module, NativeFn, SuperProxy};

use crate::error::Error;

pub type Rcc<T> = Rc<RefCell<T>>;

#[derive(Clone, Debug)]
pub enum Value {
  Nil,
  Bool(bool),
  Int(i64),
  Float(f64),
  Str(Rc<str>),
  List(Rcc<Vec<Value>>),
  Tuple(Rc<Vec<Value>>),
  Dict(Rcc<IndexMap<String, Value>>),
  /// Membership is by linear structural `==`; keeping this a plain `Vec`
  /// sidesteps needing a total `Hash` over `Value` (which floats don't
  /// admit) for a language whose sets are never large enough to matter.
  Set(Rcc<Vec<Value>>),
  Function(Rc<Function>),
  NativeFn(Rc<NativeFn>),
  BoundMethod(Rc<BoundMethod>),
  Class(Rcc<Class>),
  Instance(Rcc<Instance>),
  Super(Rc<SuperProxy>),
  Module(Rc<Module>),
}

impl Default for Value {
  fn default() -> Self {
    Value::Nil
  }
}

impl Value {
  pub fn str(s: impl Into<Rc<str>>) -> Value {
    Value::Str(s.into())
  }

  pub fn list(items: Vec<Value>) -> Value {
    Value::List(Rc::new(RefCell::new(items)))
  }

  pub fn tuple(items: Vec<Value>) -> Value {
    Value::Tuple(Rc::new(items))
  }

  pub fn dict(items: IndexMap<String, Value>) -> Value {
    Value::Dict(Rc::new(RefCell::new(items)))
  }

  pub fn set(items: Vec<Value>) -> Value {
    Value::Set(Rc::new(RefCell::new(items)))
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Value::Nil => "nil",
      Value::Bool(_) => "bool",
      Value::Int(_) => "int",
      Value::Float(_) => "float",
      Value::Str(_) => "str",
      Value::List(_) => "list",
      Value::Tuple(_) => "tuple",
      Value::Dict(_) => "dict",
      Value::Set(_) => "set",
      Value::Function(_) => "function",
      Value::NativeFn(_) => "native function",
      Value::BoundMethod(_) => "bound method",
      Value::Class(_) => "class",
      Value::Instance(_) => "instance",
      Value::Super(_) => "super",
      Value::Module(_) => "module",
    }
  }

  pub fn is_nil(&self) -> bool {
    matches!(self, Value::Nil)
  }

  /// `Nil`/`False`/`0`/`0.0`/empty string/empty container are falsy;
  /// everything else is truthy.
  pub fn truthy(&self) -> bool {
    match self {
      Value::Nil => false,
      Value::Bool(b) => *b,
      Value::Int(i) => *i != 0,
      Value::Float(f) => *f != 0.0,
      Value::Str(s) => !s.is_empty(),
      Value::List(l) => !l.borrow().is_empty(),
      Value::Tuple(t) => !t.is_empty(),
      Value::Dict(d) => !d.borrow().is_empty(),
      Value::Set(s) => !s.borrow().is_empty(),
      Value::Function(_)
      | Value::NativeFn(_)
      | Value::BoundMethod(_)
      | Value::Class(_)
      | Value::Instance(_)
      | Value::Super(_)
      | Value::Module(_) => true,
    }
  }

  pub fn as_int(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_float(&self) -> Option<f64> {
    match self {
      Value::Int(i) => Some(*i as f64),
      Value::Float(f) => Some(*f),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::Str(s) => Some(s),
      _ => None,
    }
  }

  /// Structural equality: recursive over containers, pointer equality
  /// for callables/instances/modules (dunder-aware equality for
  /// instances is implemented by the VM's `invoke_dunder`, not here).
  pub fn structural_eq(&self, other: &Value) -> bool {
    use Value::*;
    match (self, other) {
      (Nil, Nil) => true,
      (Bool(a), Bool(b)) => a == b,
      (Int(a), Int(b)) => a == b,
      (Float(a), Float(b)) => a == b,
      (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
      (Str(a), Str(b)) => a == b,
      (List(a), List(b)) => {
        Rc::ptr_eq(a, b) || {
          let a = a.borrow();
          let b = b.borrow();
          a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
        }
      }
      (Tuple(a), Tuple(b)) => {
        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
      }
      (Dict(a), Dict(b)) => {
        Rc::ptr_eq(a, b) || {
          let a = a.borrow();
          let b = b.borrow();
          a.len() == b.len()
            && a
              .iter()
              .all(|(k, v)| matches!(b.get(k), Some(bv) if v.structural_eq(bv)))
        }
      }
      (Set(a), Set(b)) => {
        Rc::ptr_eq(a, b) || {
          let a = a.borrow();
          let b = b.borrow();
          a.len() == b.len()
            && a.iter().all(|x| b.iter().any(|y| x.structural_eq(y)))
        }
      }
      (Function(a), Function(b)) => Rc::ptr_eq(a, b),
      (NativeFn(a), NativeFn(b)) => Rc::ptr_eq(a, b),
      (Class(a), Class(b)) => Rc::ptr_eq(a, b),
      (Instance(a), Instance(b)) => Rc::ptr_eq(a, b),
      (Module(a), Module(b)) => Rc::ptr_eq(a, b),
      _ => false,
    }
  }

  /// Ordering used by `<`/`<=`/`>`/`>=` for the primitive numeric/string
  /// types. Returns `None` for anything else (the VM's dunder trampoline
  /// handles `Instance` before falling back to this).
  pub fn partial_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
    use Value::*;
    match (self, other) {
      (Int(a), Int(b)) => a.partial_cmp(b),
      (Float(a), Float(b)) => a.partial_cmp(b),
      (Int(a), Float(b)) => (*a as f64).partial_cmp(b),
      (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)),
      (Str(a), Str(b)) => a.partial_cmp(b),
      _ => None,
    }
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Nil => write!(f, "nil"),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Int(i) => write!(f, "{i}"),
      Value::Float(v) => write!(f, "{v}"),
      Value::Str(s) => write!(f, "{s}"),
      Value::List(l) => {
        write!(f, "[")?;
        for (i, v) in l.borrow().iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write_repr(f, v)?;
        }
        write!(f, "]")
      }
      Value::Tuple(t) => {
        write!(f, "(")?;
        for (i, v) in t.iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write_repr(f, v)?;
        }
        if t.len() == 1 {
          write!(f, ",")?;
        }
        write!(f, ")")
      }
      Value::Dict(d) => {
        write!(f, "{{")?;
        for (i, (k, v)) in d.borrow().iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write!(f, "\"{k}\": ")?;
          write_repr(f, v)?;
        }
        write!(f, "}}")
      }
      Value::Set(s) => {
        write!(f, "{{")?;
        for (i, v) in s.borrow().iter().enumerate() {
          if i > 0 {
            write!(f, ", ")?;
          }
          write_repr(f, v)?;
        }
        write!(f, "}}")
      }
      Value::Function(func) => write!(f, "<function {}>", func.name),
      Value::NativeFn(func) => write!(f, "<native function {}>", func.name),
      Value::BoundMethod(m) => write!(f, "<bound method {}>", m.method),
      Value::Class(c) => write!(f, "<class {}>", c.borrow().name),
      Value::Instance(i) => write!(f, "<{} instance>", i.borrow().class_name()),
      Value::Super(_) => write!(f, "<super>"),
      Value::Module(m) => write!(f, "<module {}>", m.name),
    }
  }
}

fn write_repr(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
  match v {
    Value::Str(s) => write!(f, "{s:?}"),
    other => write!(f, "{other}"),
  }
}

/// Converts a `Value` into a concrete Rust type, used by `#[native]` to
/// extract typed parameters from the `&[Value]` argument slice.
pub trait FromValue: Sized {
  fn from_value(value: &Value) -> crate::Result<Self>;
}

/// Converts a concrete Rust type back into a `Value`, used by
/// `#[native]` to convert a typed return value.
pub trait IntoValue {
  fn into_value(self) -> crate::Result<Value>;
}

impl FromValue for Value {
  fn from_value(value: &Value) -> crate::Result<Self> {
    Ok(value.clone())
  }
}

impl FromValue for i64 {
  fn from_value(value: &Value) -> crate::Result<Self> {
    value
      .as_int()
      .ok_or_else(|| Error::type_error(format!("expected int, got {}", value.type_name())))
  }
}

impl FromValue for f64 {
  fn from_value(value: &Value) -> crate::Result<Self> {
    value
      .as_float()
      .ok_or_else(|| Error::type_error(format!("expected float, got {}", value.type_name())))
  }
}

impl FromValue for bool {
  fn from_value(value: &Value) -> crate::Result<Self> {
    Ok(value.truthy())
  }
}

impl FromValue for String {
  fn from_value(value: &Value) -> crate::Result<Self> {
    value
      .as_str()
      .map(str::to_owned)
      .ok_or_else(|| Error::type_error(format!("expected str, got {}", value.type_name())))
  }
}

impl<T: IntoValue> IntoValue for crate::Result<T> {
  fn into_value(self) -> crate::Result<Value> {
    self.and_then(IntoValue::into_value)
  }
}

impl IntoValue for Value {
  fn into_value(self) -> crate::Result<Value> {
    Ok(self)
  }
}

impl IntoValue for i64 {
  fn into_value(self) -> crate::Result<Value> {
    Ok(Value::Int(self))
  }
}

impl IntoValue for f64 {
  fn into_value(self) -> crate::Result<Value> {
    Ok(Value::Float(self))
  }
}

impl IntoValue for bool {
  fn into_value(self) -> crate::Result<Value> {
    Ok(Value::Bool(self))
  }
}

impl IntoValue for String {
  fn into_value(self) -> crate::Result<Value> {
    Ok(Value::str(self))
  }
}

impl IntoValue for () {
  fn into_value(self) -> crate::Result<Value> {
    Ok(Value::Nil)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn truthiness_of_empty_containers() {
    assert!(!Value::list(vec![]).truthy());
    assert!(Value::list(vec![Value::Int(0)]).truthy());
    assert!(!Value::str("").truthy());
    assert!(!Value::Int(0).truthy());
    assert!(!Value::Float(0.0).truthy());
    assert!(Value::Bool(true).truthy());
  }

  #[test]
  fn structural_equality_recurses_into_lists() {
    let a = Value::list(vec![Value::Int(1), Value::str("x")]);
    let b = Value::list(vec![Value::Int(1), Value::str("x")]);
    assert!(a.structural_eq(&b));
  }

  #[test]
  fn structural_equality_coerces_int_and_float() {
    assert!(Value::Int(2).structural_eq(&Value::Float(2.0)));
  }
}
