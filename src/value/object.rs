//! The object types behind the `Value` variants that need shared,
//! reference-counted storage: functions, classes, instances, bound
//! methods and the opaque module handle.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::Value;
use crate::chunk::Chunk;

/// A user-defined function: `def name(params): ...`.
///
/// Shared via `Rc` because the same `Function` value is both stored in
/// the enclosing chunk's constant pool (so it survives the `def` that
/// created it) and pushed onto the stack/bound into globals every time
/// it is looked up.
#[derive(Debug)]
pub struct Function {
  pub name: String,
  pub arity: usize,
  /// Default values for the trailing `defaults.len()` parameters.
  pub defaults: Vec<Value>,
  pub chunk: Rc<Chunk>,
  /// Set to the enclosing class when this function is installed as a
  /// method via `METHOD`; used to resolve `super()` lookups.
  pub defining_class: Option<Rc<RefCell<Class>>>,
}

impl Function {
  pub fn min_arity(&self) -> usize {
    self.arity - self.defaults.len()
  }
}

pub type NativeFnPtr = Rc<dyn Fn(&mut crate::vm::Vm, &[Value]) -> crate::Result<Value>>;

/// A function implemented in Rust, registered under a name via
/// `Vm::register_fn` or materialized from an extension module.
#[derive(Clone)]
pub struct NativeFn {
  pub name: String,
  pub f: NativeFnPtr,
}

impl std::fmt::Debug for NativeFn {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NativeFn").field("name", &self.name).finish()
  }
}

/// A `receiver.method` pairing created on attribute access; calling it
/// prepends `receiver` to the argument list and calls `method`.
#[derive(Debug, Clone)]
pub struct BoundMethod {
  pub receiver: Value,
  pub method: Value,
}

/// A class: `class Name(Parent):`. Single inheritance; methods are
/// copied from the parent's table at `INHERIT` time so method lookup
/// never has to walk more than one table at runtime (the `parent` link
/// itself is kept only to support `super()`).
#[derive(Debug)]
pub struct Class {
  pub name: String,
  pub parent: Option<Rc<RefCell<Class>>>,
  pub methods: IndexMap<String, Value>,
}

impl Class {
  pub fn new(name: String, parent: Option<Rc<RefCell<Class>>>) -> Class {
    let methods = match &parent {
      Some(p) => p.borrow().methods.clone(),
      None => IndexMap::new(),
    };
    Class { name, parent, methods }
  }

  pub fn find_method(&self, name: &str) -> Option<Value> {
    self.methods.get(name).cloned()
  }
}

/// An instance of a `Class`. Attributes are a plain insertion-ordered
/// map; there is no fixed layout the way compiled fields would give you,
/// matching the dynamic nature of instance attributes in the language.
#[derive(Debug)]
pub struct Instance {
  pub class: Rc<RefCell<Class>>,
  pub attrs: IndexMap<String, Value>,
}

impl Instance {
  pub fn new(class: Rc<RefCell<Class>>) -> Instance {
    Instance {
      class,
      attrs: IndexMap::new(),
    }
  }

  pub fn class_name(&self) -> String {
    self.class.borrow().name.clone()
  }
}

/// The receiver produced by `super()` inside a method body: attribute
/// lookup on it skips `from_class` and walks the MRO starting at its
/// parent, but the bound `self` is still the original instance.
#[derive(Debug, Clone)]
pub struct SuperProxy {
  pub this: Rc<RefCell<Instance>>,
  pub from_class: Rc<RefCell<Class>>,
}

/// An opaque handle to a loaded extension module. `GET_PROPERTY` +
/// `CALL` on this value dispatch into the VM's extension registry
/// (`crate::modules`); no other operation is defined on it.
#[derive(Debug)]
pub struct Module {
  pub name: String,
}
