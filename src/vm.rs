//! The stack-based dispatch loop: a flat value stack, one `Frame` per
//! active call (recursing into the host call stack for nested calls,
//! per the design notes this follows), an insertion-ordered globals map,
//! and the extension/module rendezvous state `LOAD_MODULE`+`CALL` need.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::chunk::{Chunk, OpCode};
use crate::compiler;
use crate::config::VmConfig;
use crate::error::RuntimeErrorKind;
use crate::modules::Registry;
use crate::value::object::{BoundMethod, Class, Function, Instance, NativeFn, NativeFnPtr};
use crate::value::Value;
use crate::{Error, Result};

struct ExceptionHandler {
  handler_ip: usize,
  stack_height: usize,
}

/// A resolved but not-yet-called `module.method` pair, stashed by
/// `GET_PROPERTY` on a `Module` receiver and consumed by the `CALL` that
/// (by construction of the compiler's `.` + `(` grammar) immediately
/// follows it.
struct ModuleCall {
  module: String,
  method: String,
}

/// The pieces of an active call frame that a native function (chiefly
/// the `super()` builtin) needs to see: which function is running and
/// where its locals start, so it can read slot 0 (`self`) and the
/// method's `defining_class`.
struct FrameInfo {
  function: Rc<Function>,
  slots_base: usize,
}

pub struct Vm {
  config: VmConfig,
  stack: Vec<Value>,
  globals: IndexMap<String, Value>,
  frame_depth: usize,
  frames: Vec<FrameInfo>,
  pending_module_call: Option<ModuleCall>,
  pub(crate) extensions: Registry,
  stdout: Box<dyn Write>,
}

impl Default for Vm {
  fn default() -> Vm {
    Vm::new()
  }
}

impl Vm {
  pub fn new() -> Vm {
    Vm::with_config(VmConfig::default())
  }

  pub fn with_config(config: VmConfig) -> Vm {
    let mut vm = Vm {
      config,
      stack: Vec::new(),
      globals: IndexMap::new(),
      frame_depth: 0,
      frames: Vec::new(),
      pending_module_call: None,
      extensions: Registry::with_config(config),
      stdout: Box::new(std::io::stdout()),
    };
    crate::builtins::install(&mut vm);
    vm
  }

  pub fn set_stdout(&mut self, out: Box<dyn Write>) {
    self.stdout = out;
  }

  pub(crate) fn write_stdout(&mut self, text: &str) {
    let _ = self.stdout.write_all(text.as_bytes());
  }

  pub fn register_fn(&mut self, name: &str, f: NativeFnPtr) {
    let value = Value::NativeFn(Rc::new(NativeFn { name: name.to_string(), f }));
    self.globals.insert(name.to_string(), value);
  }

  pub fn get_global(&self, name: &str) -> Option<Value> {
    self.globals.get(name).cloned()
  }

  pub fn set_global(&mut self, name: &str, value: Value) {
    self.globals.insert(name.to_string(), value);
  }

  /// `self` of the innermost active method call, if any — used by the
  /// `super()` builtin.
  pub fn current_self(&self) -> Option<Value> {
    let frame = self.frames.last()?;
    Some(self.stack[frame.slots_base].clone())
  }

  /// The class a method currently executing was installed on via
  /// `METHOD`, if any — used by the `super()` builtin to find where to
  /// resume method resolution.
  pub fn current_defining_class(&self) -> Option<Rc<RefCell<Class>>> {
    self.frames.last()?.function.defining_class.clone()
  }

  /// Compiles and runs a whole program, as the top-level module body.
  pub fn interpret(&mut self, src: &str) -> Result<()> {
    tracing::debug!(len = src.len(), "compiling program");
    let function = compiler::compile(src)?;
    self.run(Rc::new(function))?;
    Ok(())
  }

  pub fn run(&mut self, function: Rc<Function>) -> Result<Value> {
    let base = self.stack.len();
    self.call_function(function, base, 0)
  }

  fn push(&mut self, value: Value) {
    self.stack.push(value);
  }

  fn pop(&mut self) -> Value {
    self.stack.pop().expect("stack underflow")
  }

  fn peek(&self, back: usize) -> Value {
    self.stack[self.stack.len() - 1 - back].clone()
  }

  fn peek_ref(&self, back: usize) -> &Value {
    &self.stack[self.stack.len() - 1 - back]
  }

  // ---- calling convention -------------------------------------------------

  /// `slots_base` is the stack index of local slot 0 (the receiver for
  /// methods/constructors); `argc` is the count of user-supplied
  /// arguments above it (NOT counting an implicit receiver).
  fn call_function(&mut self, function: Rc<Function>, slots_base: usize, argc: usize) -> Result<Value> {
    let min_arity = function.min_arity();
    if argc < min_arity || argc > function.arity {
      return Err(Error::arity(&function.name, function.arity, argc));
    }
    for i in argc..function.arity {
      let default = function.defaults[i - min_arity].clone();
      self.push(default);
    }
    self.run_function(function, slots_base)
  }

  pub fn call_value(&mut self, callee: Value, args: &[Value]) -> Result<Value> {
    let base = self.stack.len();
    self.push(callee);
    for a in args {
      self.push(a.clone());
    }
    self.dispatch_call(args.len() as u8)?;
    Ok(self.stack.drain(base..).next().unwrap_or(Value::Nil))
  }

  /// Runs the `CALL(argc)` opcode's logic: `callee` sits `argc` slots
  /// below the current top. On return the whole call region collapses
  /// to a single slot holding the result.
  fn dispatch_call(&mut self, argc: u8) -> Result<()> {
    let argc = argc as usize;
    let callee_idx = self.stack.len() - argc - 1;
    let callee = self.stack[callee_idx].clone();

    let result = match callee {
      Value::NativeFn(native) => {
        let args: Vec<Value> = self.stack[callee_idx + 1..].to_vec();
        (native.f)(self, &args)?
      }
      Value::Function(func) => {
        let slots_base = callee_idx;
        self.call_function(func, slots_base, argc)?
      }
      Value::BoundMethod(bound) => {
        self.stack[callee_idx] = bound.receiver.clone();
        match &bound.method {
          Value::Function(func) => self.call_function(func.clone(), callee_idx, argc + 1)?,
          Value::NativeFn(native) => {
            let mut args = vec![bound.receiver.clone()];
            args.extend_from_slice(&self.stack[callee_idx + 1..]);
            (native.f)(self, &args)?
          }
          _ => return Err(Error::type_error("bound method wraps a non-callable value")),
        }
      }
      Value::Class(class) => {
        let instance = Rc::new(RefCell::new(Instance::new(class.clone())));
        self.stack[callee_idx] = Value::Instance(instance.clone());
        let init = class.borrow().find_method("__init__");
        match init {
          Some(Value::Function(func)) => {
            self.call_function(func, callee_idx, argc + 1)?;
          }
          Some(_) | None => {
            if argc != 0 {
              return Err(Error::arity(&class.borrow().name, 0, argc));
            }
          }
        }
        Value::Instance(instance)
      }
      Value::Module(module) => {
        let call = self
          .pending_module_call
          .take()
          .filter(|c| c.module == module.name)
          .ok_or_else(|| Error::attribute_error("module", "<call>"))?;
        let args: Vec<Value> = self.stack[callee_idx + 1..].to_vec();
        self.extensions.call(&call.module, &call.method, self, &args)?
      }
      other => return Err(Error::type_error(format!("'{}' is not callable", other.type_name()))),
    };

    self.stack.truncate(callee_idx);
    self.push(result);
    Ok(())
  }

  // ---- the dispatch loop -------------------------------------------------

  fn run_function(&mut self, function: Rc<Function>, slots_base: usize) -> Result<Value> {
    self.frame_depth += 1;
    if self.frame_depth > self.config.max_frames {
      self.frame_depth -= 1;
      return Err(Error::runtime(
        RuntimeErrorKind::RecursionError,
        "maximum recursion depth exceeded",
      ));
    }
    tracing::trace!(function = %function.name, depth = self.frame_depth, "enter frame");

    let chunk = function.chunk.clone();
    self.frames.push(FrameInfo { function: function.clone(), slots_base });
    let result = self.run_chunk(&chunk, slots_base);
    self.frames.pop();

    self.frame_depth -= 1;
    tracing::trace!(function = %function.name, depth = self.frame_depth, "exit frame");
    result
  }

  fn run_chunk(&mut self, chunk: &Chunk, slots_base: usize) -> Result<Value> {
    let mut ip: usize = 0;
    let mut handlers: Vec<ExceptionHandler> = Vec::new();

    loop {
      match self.run_one(chunk, &mut ip, slots_base, &mut handlers) {
        Ok(Some(value)) => return Ok(value),
        Ok(None) => continue,
        Err(e) => {
          if let Some(h) = handlers.pop() {
            self.stack.truncate(h.stack_height);
            self.push(exception_value(&e));
            ip = h.handler_ip;
            continue;
          }
          return Err(e);
        }
      }
    }
  }

  fn read_u8(chunk: &Chunk, ip: &mut usize) -> u8 {
    let b = chunk.code[*ip];
    *ip += 1;
    b
  }

  fn read_u16(chunk: &Chunk, ip: &mut usize) -> u16 {
    let v = chunk.read_u16(*ip);
    *ip += 2;
    v
  }

  /// Executes exactly one opcode. `Ok(Some(v))` means `RETURN` was hit
  /// and the caller should unwind with `v`; `Ok(None)` means keep
  /// looping; `Err` propagates to the nearest `TRY_BEGIN` handler (or
  /// out of the function entirely).
  #[allow(clippy::too_many_lines)]
  fn run_one(
    &mut self,
    chunk: &Chunk,
    ip: &mut usize,
    slots_base: usize,
    handlers: &mut Vec<ExceptionHandler>,
  ) -> Result<Option<Value>> {
    let op = OpCode::try_from(chunk.code[*ip]).expect("invalid opcode");
    *ip += 1;

    match op {
      OpCode::Constant => {
        let idx = Self::read_u8(chunk, ip);
        self.push(chunk.constants[idx as usize].clone());
      }
      OpCode::Nil => self.push(Value::Nil),
      OpCode::True => self.push(Value::Bool(true)),
      OpCode::False => self.push(Value::Bool(false)),
      OpCode::Pop => {
        self.pop();
      }
      OpCode::Dup => {
        let top = self.peek(0);
        self.push(top);
      }
      OpCode::Swap => {
        let len = self.stack.len();
        self.stack.swap(len - 1, len - 2);
      }
      OpCode::GetLocal => {
        let slot = Self::read_u8(chunk, ip) as usize;
        self.push(self.stack[slots_base + slot].clone());
      }
      OpCode::SetLocal => {
        let slot = Self::read_u8(chunk, ip) as usize;
        self.stack[slots_base + slot] = self.peek(0);
      }
      OpCode::GetGlobal => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        let value = self.globals.get(&name).cloned().ok_or_else(|| Error::name_error(&name))?;
        self.push(value);
      }
      OpCode::DefineGlobal => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        let value = self.pop();
        self.globals.insert(name, value);
      }
      OpCode::SetGlobal => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        if !self.globals.contains_key(&name) {
          return Err(Error::name_error(&name));
        }
        self.globals.insert(name, self.peek(0));
      }
      OpCode::GetProperty => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        let receiver = self.pop();
        let value = self.get_property(receiver, &name)?;
        self.push(value);
      }
      OpCode::SetProperty => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        let value = self.pop();
        let receiver = self.pop();
        match receiver {
          Value::Instance(inst) => {
            inst.borrow_mut().attrs.insert(name, value.clone());
          }
          other => return Err(Error::attribute_error(other.type_name(), &name)),
        }
        self.push(value);
      }
      OpCode::Add => self.binary_arith(Arith::Add)?,
      OpCode::Subtract => self.binary_arith(Arith::Sub)?,
      OpCode::Multiply => self.binary_arith(Arith::Mul)?,
      OpCode::Divide => self.binary_arith(Arith::Div)?,
      OpCode::FloorDivide => self.binary_arith(Arith::FloorDiv)?,
      OpCode::Modulo => self.binary_arith(Arith::Mod)?,
      OpCode::Power => self.binary_arith(Arith::Pow)?,
      OpCode::Negate => {
        let v = self.pop();
        let result = match v {
          Value::Int(i) => Value::Int(-i),
          Value::Float(f) => Value::Float(-f),
          other => return Err(Error::type_error(format!("bad operand type for unary -: '{}'", other.type_name()))),
        };
        self.push(result);
      }
      OpCode::Not => {
        let v = self.pop();
        self.push(Value::Bool(!v.truthy()));
      }
      OpCode::Equal => {
        let b = self.pop();
        let a = self.pop();
        let result = self.values_eq(&a, &b)?;
        self.push(Value::Bool(result));
      }
      OpCode::Greater => self.binary_cmp(|o| o == std::cmp::Ordering::Greater, "__gt__")?,
      OpCode::Less => self.binary_cmp(|o| o == std::cmp::Ordering::Less, "__lt__")?,
      OpCode::GreaterEqual => self.binary_cmp(|o| o != std::cmp::Ordering::Less, "__ge__")?,
      OpCode::LessEqual => self.binary_cmp(|o| o != std::cmp::Ordering::Greater, "__le__")?,
      OpCode::In => {
        let haystack = self.pop();
        let needle = self.pop();
        self.push(Value::Bool(self.contains(&haystack, &needle)?));
      }
      OpCode::Jump => {
        let offset = Self::read_u16(chunk, ip);
        *ip += offset as usize;
      }
      OpCode::JumpIfFalse => {
        let offset = Self::read_u16(chunk, ip);
        if !self.peek_ref(0).truthy() {
          *ip += offset as usize;
        }
      }
      OpCode::JumpIfTrue => {
        let offset = Self::read_u16(chunk, ip);
        if self.peek_ref(0).truthy() {
          *ip += offset as usize;
        }
      }
      OpCode::Loop => {
        let offset = Self::read_u16(chunk, ip);
        *ip -= offset as usize;
      }
      OpCode::Call => {
        let argc = Self::read_u8(chunk, ip);
        self.dispatch_call(argc)?;
      }
      OpCode::CallDecorator => {
        let _unused_operand = Self::read_u8(chunk, ip);
        let target = self.pop();
        let decorator = self.pop();
        let result = self.call_value(decorator, &[target])?;
        self.push(result);
      }
      OpCode::CallEnter => {
        let receiver = self.pop();
        let result = self.invoke_method(receiver, "__enter__", &[])?;
        self.push(result);
      }
      OpCode::CallExit => {
        let receiver = self.pop();
        self.invoke_method(receiver, "__exit__", &[Value::Nil, Value::Nil, Value::Nil])?;
      }
      OpCode::Return => {
        let value = self.pop();
        return Ok(Some(value));
      }
      OpCode::LoadModule => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        let module = self.extensions.load(&name)?;
        self.push(module);
      }
      OpCode::BuildList => {
        let count = Self::read_u8(chunk, ip) as usize;
        let items = self.stack.split_off(self.stack.len() - count);
        self.push(Value::list(items));
      }
      OpCode::BuildTuple => {
        let count = Self::read_u8(chunk, ip) as usize;
        let items = self.stack.split_off(self.stack.len() - count);
        self.push(Value::tuple(items));
      }
      OpCode::BuildSet => {
        let count = Self::read_u8(chunk, ip) as usize;
        let items = self.stack.split_off(self.stack.len() - count);
        let mut set: Vec<Value> = Vec::new();
        for item in items {
          if !set.iter().any(|x| x.structural_eq(&item)) {
            set.push(item);
          }
        }
        self.push(Value::set(set));
      }
      OpCode::BuildDict => {
        let count = Self::read_u8(chunk, ip) as usize;
        let items = self.stack.split_off(self.stack.len() - count * 2);
        let mut map = IndexMap::new();
        for pair in items.chunks(2) {
          let key = pair[0].as_str().map(str::to_owned).unwrap_or_else(|| pair[0].to_string());
          map.insert(key, pair[1].clone());
        }
        self.push(Value::dict(map));
      }
      OpCode::ListAppend => {
        let value = self.pop();
        match self.peek_ref(0) {
          Value::List(list) => list.borrow_mut().push(value),
          other => return Err(Error::type_error(format!("cannot append to '{}'", other.type_name()))),
        }
      }
      OpCode::SetAdd => {
        let value = self.pop();
        match self.peek_ref(0) {
          Value::Set(set) => {
            let mut set = set.borrow_mut();
            if !set.iter().any(|x| x.structural_eq(&value)) {
              set.push(value);
            }
          }
          other => return Err(Error::type_error(format!("cannot add to '{}'", other.type_name()))),
        }
      }
      OpCode::IndexGet => {
        let index = self.pop();
        let target = self.pop();
        let value = self.index_get(&target, &index)?;
        self.push(value);
      }
      OpCode::IndexSet => {
        let value = self.pop();
        let index = self.pop();
        let target = self.pop();
        self.index_set(&target, &index, value.clone())?;
        self.push(value);
      }
      OpCode::SliceGet => {
        let step = self.pop();
        let stop = self.pop();
        let start = self.pop();
        let target = self.pop();
        let value = self.slice_get(&target, &start, &stop, &step)?;
        self.push(value);
      }
      OpCode::ForIterLocal => {
        let var_slot = Self::read_u8(chunk, ip) as usize;
        let iter_slot = Self::read_u8(chunk, ip) as usize;
        let idx_slot = Self::read_u8(chunk, ip) as usize;
        let iterable = self.stack[slots_base + iter_slot].clone();
        let index = self.stack[slots_base + idx_slot].as_int().unwrap();
        match self.iter_next(&iterable, index)? {
          Some(next) => {
            self.stack[slots_base + var_slot] = next;
            self.stack[slots_base + idx_slot] = Value::Int(index + 1);
            self.push(Value::Bool(true));
          }
          None => self.push(Value::Bool(false)),
        }
      }
      OpCode::Ternary => {
        let else_value = self.pop();
        let cond = self.pop();
        let then_value = self.pop();
        self.push(if cond.truthy() { then_value } else { else_value });
      }
      OpCode::Class => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        self.push(Value::Class(Rc::new(RefCell::new(Class::new(name, None)))));
      }
      OpCode::Inherit => {
        let parent = self.pop();
        let parent = match parent {
          Value::Class(c) => c,
          other => return Err(Error::type_error(format!("cannot inherit from '{}'", other.type_name()))),
        };
        let class = self.peek_ref(0).clone();
        if let Value::Class(class) = class {
          let name = class.borrow().name.clone();
          let rebuilt = Class::new(name, Some(parent));
          *class.borrow_mut() = rebuilt;
        }
      }
      OpCode::Method => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        let method = self.pop();
        if let Value::Class(class) = self.peek_ref(0).clone() {
          if let Value::Function(func) = method {
            let bound = Function {
              name: func.name.clone(),
              arity: func.arity,
              defaults: func.defaults.clone(),
              chunk: func.chunk.clone(),
              defining_class: Some(class.clone()),
            };
            class.borrow_mut().methods.insert(name, Value::Function(Rc::new(bound)));
          }
        }
      }
      OpCode::Super => {
        // No codegen path emits SUPER: `super()` is compiled as an
        // ordinary call to a builtin of the same name instead.
        return Err(Error::type_error("SUPER opcode is not reachable"));
      }
      OpCode::Assert => {
        let message = self.pop();
        let cond = self.pop();
        if !cond.truthy() {
          let text = if message.is_nil() {
            "assertion failed".to_string()
          } else {
            message.to_string()
          };
          return Err(Error::runtime(RuntimeErrorKind::AssertionError, text));
        }
      }
      OpCode::Delete => {
        let idx = Self::read_u8(chunk, ip);
        let name = chunk.constants[idx as usize].as_str().unwrap().to_string();
        if self.globals.shift_remove(&name).is_none() {
          return Err(Error::name_error(&name));
        }
      }
      OpCode::Raise => {
        let value = self.pop();
        return Err(Error::raised(value));
      }
      OpCode::TryBegin => {
        let offset = Self::read_u16(chunk, ip);
        handlers.push(ExceptionHandler {
          handler_ip: *ip + offset as usize,
          stack_height: self.stack.len(),
        });
      }
      OpCode::TryEnd => {
        handlers.pop();
      }
      OpCode::JumpIfException => {
        // Reserved for multi-clause except dispatch; this implementation
        // supports at most one `except` clause per `try`, so no emitted
        // bytecode uses this opcode yet.
        let _offset = Self::read_u16(chunk, ip);
      }
    }

    Ok(None)
  }

  // ---- property / method resolution --------------------------------------

  fn get_property(&mut self, receiver: Value, name: &str) -> Result<Value> {
    match receiver {
      Value::Instance(inst) => {
        if let Some(v) = inst.borrow().attrs.get(name).cloned() {
          return Ok(v);
        }
        let class = inst.borrow().class.clone();
        let method = class.borrow().find_method(name);
        match method {
          Some(m) => Ok(Value::BoundMethod(Rc::new(BoundMethod {
            receiver: Value::Instance(inst),
            method: m,
          }))),
          None => Err(Error::attribute_error(&inst.borrow().class_name(), name)),
        }
      }
      Value::Super(proxy) => {
        let parent = proxy.from_class.borrow().parent.clone();
        let method = parent.as_ref().and_then(|p| p.borrow().find_method(name));
        match method {
          Some(m) => Ok(Value::BoundMethod(Rc::new(BoundMethod {
            receiver: Value::Instance(proxy.this.clone()),
            method: m,
          }))),
          None => Err(Error::attribute_error("super", name)),
        }
      }
      Value::Class(class) => class
        .borrow()
        .find_method(name)
        .ok_or_else(|| Error::attribute_error(&class.borrow().name, name)),
      Value::Module(module) => {
        self.pending_module_call = Some(ModuleCall {
          module: module.name.clone(),
          method: name.to_string(),
        });
        Ok(Value::Module(module))
      }
      other => Err(Error::attribute_error(other.type_name(), name)),
    }
  }

  fn invoke_method(&mut self, receiver: Value, name: &str, args: &[Value]) -> Result<Value> {
    let bound = self.get_property(receiver, name)?;
    self.call_value(bound, args)
  }

  fn find_instance_dunder(&self, value: &Value, name: &str) -> Option<(Rc<RefCell<Instance>>, Value)> {
    if let Value::Instance(inst) = value {
      let class = inst.borrow().class.clone();
      if let Some(m) = class.borrow().find_method(name) {
        return Some((inst.clone(), m));
      }
    }
    None
  }

  // ---- arithmetic / comparisons -------------------------------------------

  fn binary_arith(&mut self, op: Arith) -> Result<()> {
    let b = self.pop();
    let a = self.pop();

    if let Some((inst, method)) = self.find_instance_dunder(&a, op.dunder()) {
      let result = self.call_value(method, &[Value::Instance(inst), b])?;
      self.push(result);
      return Ok(());
    }

    if op == Arith::Add && (matches!(a, Value::Str(_)) || matches!(b, Value::Str(_))) {
      let lhs = self.stringify(&a)?;
      let rhs = self.stringify(&b)?;
      self.push(Value::str(format!("{lhs}{rhs}")));
      return Ok(());
    }

    let result = match (&a, &b) {
      (Value::Int(x), Value::Int(y)) => op.apply_int(*x, *y)?,
      (Value::Float(_), _) | (_, Value::Float(_)) => {
        let x = a.as_float().ok_or_else(|| type_err_binary(op, &a, &b))?;
        let y = b.as_float().ok_or_else(|| type_err_binary(op, &a, &b))?;
        op.apply_float(x, y)?
      }
      _ => return Err(type_err_binary(op, &a, &b)),
    };
    self.push(result);
    Ok(())
  }

  fn binary_cmp(&mut self, pick: impl Fn(std::cmp::Ordering) -> bool, dunder: &str) -> Result<()> {
    let b = self.pop();
    let a = self.pop();
    if let Some((inst, method)) = self.find_instance_dunder(&a, dunder) {
      let result = self.call_value(method, &[Value::Instance(inst), b])?;
      self.push(result);
      return Ok(());
    }
    let ordering = a
      .partial_cmp(&b)
      .ok_or_else(|| Error::type_error(format!("'<' not supported between '{}' and '{}'", a.type_name(), b.type_name())))?;
    self.push(Value::Bool(pick(ordering)));
    Ok(())
  }

  fn values_eq(&mut self, a: &Value, b: &Value) -> Result<bool> {
    if let Some((inst, method)) = self.find_instance_dunder(a, "__eq__") {
      let result = self.call_value(method, &[Value::Instance(inst), b.clone()])?;
      return Ok(result.truthy());
    }
    Ok(a.structural_eq(b))
  }

  /// Renders a value as text, dispatching to `__str__` first if the
  /// value is an `Instance` that defines it. Used by `ADD`'s string-
  /// coercion rule and by the `print`/`str` builtins, so both agree on
  /// what "the string form of a value" means.
  pub(crate) fn stringify(&mut self, value: &Value) -> Result<String> {
    if let Some((inst, method)) = self.find_instance_dunder(value, "__str__") {
      let result = self.call_value(method, &[Value::Instance(inst)])?;
      return Ok(result.to_string());
    }
    Ok(value.to_string())
  }

  fn contains(&mut self, haystack: &Value, needle: &Value) -> Result<bool> {
    if let Some((inst, method)) = self.find_instance_dunder(haystack, "__contains__") {
      let result = self.call_value(method, &[Value::Instance(inst), needle.clone()])?;
      return Ok(result.truthy());
    }
    match haystack {
      Value::List(l) => Ok(l.borrow().iter().any(|v| v.structural_eq(needle))),
      Value::Tuple(t) => Ok(t.iter().any(|v| v.structural_eq(needle))),
      Value::Set(s) => Ok(s.borrow().iter().any(|v| v.structural_eq(needle))),
      Value::Dict(d) => Ok(needle.as_str().map(|k| d.borrow().contains_key(k)).unwrap_or(false)),
      Value::Str(s) => Ok(needle.as_str().map(|n| s.contains(n)).unwrap_or(false)),
      other => Err(Error::type_error(format!("argument of type '{}' is not iterable", other.type_name()))),
    }
  }

  // ---- indexing / slicing -------------------------------------------------

  fn index_get(&mut self, target: &Value, index: &Value) -> Result<Value> {
    if let Some((inst, method)) = self.find_instance_dunder(target, "__getitem__") {
      return self.call_value(method, &[Value::Instance(inst), index.clone()]);
    }
    match target {
      Value::List(list) => {
        let list = list.borrow();
        let i = normalize_index(index.as_int().ok_or_else(|| Error::type_error("list indices must be integers"))?, list.len())?;
        list.get(i).cloned().ok_or_else(|| Error::index_error("list index out of range"))
      }
      Value::Tuple(t) => {
        let i = normalize_index(index.as_int().ok_or_else(|| Error::type_error("tuple indices must be integers"))?, t.len())?;
        t.get(i).cloned().ok_or_else(|| Error::index_error("tuple index out of range"))
      }
      Value::Str(s) => {
        let bytes = s.as_bytes();
        let i = normalize_index(index.as_int().ok_or_else(|| Error::type_error("string indices must be integers"))?, bytes.len())?;
        bytes
          .get(i)
          .map(|b| Value::str((*b as char).to_string()))
          .ok_or_else(|| Error::index_error("string index out of range"))
      }
      Value::Dict(d) => {
        let key = index.as_str().ok_or_else(|| Error::type_error("dict keys must be strings"))?;
        d.borrow().get(key).cloned().ok_or_else(|| Error::runtime(RuntimeErrorKind::KeyError, format!("'{key}'")))
      }
      other => Err(Error::type_error(format!("'{}' object is not subscriptable", other.type_name()))),
    }
  }

  fn index_set(&mut self, target: &Value, index: &Value, value: Value) -> Result<()> {
    if let Some((inst, method)) = self.find_instance_dunder(target, "__setitem__") {
      self.call_value(method, &[Value::Instance(inst), index.clone(), value])?;
      return Ok(());
    }
    match target {
      Value::List(list) => {
        let mut list = list.borrow_mut();
        let i = normalize_index(index.as_int().ok_or_else(|| Error::type_error("list indices must be integers"))?, list.len())?;
        if i >= list.len() {
          return Err(Error::index_error("list assignment index out of range"));
        }
        list[i] = value;
        Ok(())
      }
      Value::Dict(d) => {
        let key = index.as_str().ok_or_else(|| Error::type_error("dict keys must be strings"))?.to_string();
        d.borrow_mut().insert(key, value);
        Ok(())
      }
      other => Err(Error::type_error(format!("'{}' object does not support item assignment", other.type_name()))),
    }
  }

  fn slice_get(&mut self, target: &Value, start: &Value, stop: &Value, step: &Value) -> Result<Value> {
    let step = if step.is_nil() { 1 } else { step.as_int().ok_or_else(|| Error::type_error("slice step must be an integer"))? };
    if step == 0 {
      return Err(Error::runtime(RuntimeErrorKind::ValueError, "slice step cannot be zero"));
    }

    let collect = |len: usize| -> Vec<usize> {
      let (lo, hi) = (0i64, len as i64);
      let default_start = if step > 0 { lo } else { hi - 1 };
      let default_stop = if step > 0 { hi } else { lo - 1 };
      let raw_start = if start.is_nil() { default_start } else { start.as_int().unwrap_or(default_start) };
      let raw_stop = if stop.is_nil() { default_stop } else { stop.as_int().unwrap_or(default_stop) };
      let norm = |v: i64| -> i64 {
        let v = if v < 0 { v + hi } else { v };
        v.clamp(if step > 0 { lo } else { -1 }, if step > 0 { hi } else { hi - 1 })
      };
      let mut s = norm(raw_start);
      let e = norm(raw_stop);
      let mut out = Vec::new();
      if step > 0 {
        while s < e {
          out.push(s as usize);
          s += step;
        }
      } else {
        while s > e {
          out.push(s as usize);
          s += step;
        }
      }
      out
    };

    match target {
      Value::List(list) => {
        let list = list.borrow();
        let idxs = collect(list.len());
        Ok(Value::list(idxs.into_iter().map(|i| list[i].clone()).collect()))
      }
      Value::Tuple(t) => {
        let idxs = collect(t.len());
        Ok(Value::tuple(idxs.into_iter().map(|i| t[i].clone()).collect()))
      }
      Value::Str(s) => {
        let bytes = s.as_bytes();
        let idxs = collect(bytes.len());
        let out: String = idxs.into_iter().map(|i| bytes[i] as char).collect();
        Ok(Value::str(out))
      }
      other => Err(Error::type_error(format!("'{}' object is not sliceable", other.type_name()))),
    }
  }

  // ---- iteration protocol -------------------------------------------------

  fn iter_next(&self, iterable: &Value, index: i64) -> Result<Option<Value>> {
    let index = index as usize;
    match iterable {
      Value::List(l) => Ok(l.borrow().get(index).cloned()),
      Value::Tuple(t) => Ok(t.get(index).cloned()),
      Value::Set(s) => Ok(s.borrow().get(index).cloned()),
      Value::Str(s) => Ok(s.as_bytes().get(index).map(|b| Value::str((*b as char).to_string()))),
      Value::Dict(d) => Ok(d.borrow().get_index(index).map(|(k, _)| Value::str(k.clone()))),
      other => Err(Error::type_error(format!("'{}' object is not iterable", other.type_name()))),
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Arith {
  Add,
  Sub,
  Mul,
  Div,
  FloorDiv,
  Mod,
  Pow,
}

impl Arith {
  fn dunder(self) -> &'static str {
    match self {
      Arith::Add => "__add__",
      Arith::Sub => "__sub__",
      Arith::Mul => "__mul__",
      Arith::Div => "__truediv__",
      Arith::FloorDiv => "__floordiv__",
      Arith::Mod => "__mod__",
      Arith::Pow => "__pow__",
    }
  }

  fn apply_int(self, a: i64, b: i64) -> Result<Value> {
    Ok(match self {
      Arith::Add => Value::Int(a + b),
      Arith::Sub => Value::Int(a - b),
      Arith::Mul => Value::Int(a * b),
      Arith::Div => {
        if b == 0 {
          return Err(Error::zero_division());
        }
        Value::Int(a / b)
      }
      Arith::FloorDiv => {
        if b == 0 {
          return Err(Error::zero_division());
        }
        Value::Int(floor_div(a, b))
      }
      Arith::Mod => {
        if b == 0 {
          return Err(Error::zero_division());
        }
        Value::Int(a - floor_div(a, b) * b)
      }
      Arith::Pow => {
        if let Ok(exp) = u32::try_from(b) {
          match a.checked_pow(exp) {
            Some(v) => Value::Int(v),
            None => Value::Float((a as f64).powf(b as f64)),
          }
        } else {
          Value::Float((a as f64).powf(b as f64))
        }
      }
    })
  }

  fn apply_float(self, a: f64, b: f64) -> Result<Value> {
    Ok(match self {
      Arith::Add => Value::Float(a + b),
      Arith::Sub => Value::Float(a - b),
      Arith::Mul => Value::Float(a * b),
      Arith::Div => {
        if b == 0.0 {
          return Err(Error::zero_division());
        }
        Value::Float(a / b)
      }
      Arith::FloorDiv => {
        if b == 0.0 {
          return Err(Error::zero_division());
        }
        Value::Float((a / b).floor())
      }
      Arith::Mod => {
        if b == 0.0 {
          return Err(Error::zero_division());
        }
        Value::Float(a - (a / b).floor() * b)
      }
      Arith::Pow => Value::Float(a.powf(b)),
    })
  }
}

/// True mathematical floor division (rounds toward negative infinity),
/// unlike `i64::div_euclid` which rounds toward zero when `b` is
/// negative. Satisfies `(a // b) * b + (a % b) == a` together with the
/// `Mod` arm above.
fn floor_div(a: i64, b: i64) -> i64 {
  let q = a / b;
  let r = a % b;
  if r != 0 && (r < 0) != (b < 0) {
    q - 1
  } else {
    q
  }
}

fn type_err_binary(op: Arith, a: &Value, b: &Value) -> Error {
  Error::type_error(format!(
    "unsupported operand type(s) for {}: '{}' and '{}'",
    op.dunder(),
    a.type_name(),
    b.type_name()
  ))
}

fn normalize_index(i: i64, len: usize) -> Result<usize> {
  let i = if i < 0 { i + len as i64 } else { i };
  if i < 0 {
    return Err(Error::index_error("index out of range"));
  }
  Ok(i as usize)
}

fn exception_value(err: &Error) -> Value {
  match err {
    Error::Runtime { raised: Some(v), .. } => v.clone(),
    other => Value::str(other.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn floor_div_rounds_toward_negative_infinity() {
    assert_eq!(floor_div(7, 3), 2);
    assert_eq!(floor_div(-7, 3), -3);
    assert_eq!(floor_div(7, -3), -3);
    assert_eq!(floor_div(-7, -3), 2);
    assert_eq!(floor_div(0, 5), 0);
  }

  #[test]
  fn int_mod_sign_follows_divisor() {
    let v = Arith::Mod.apply_int(-7, 3).unwrap();
    assert_eq!(v.as_int(), Some(2));
    let v = Arith::Mod.apply_int(7, -3).unwrap();
    assert_eq!(v.as_int(), Some(-2));
  }

  #[test]
  fn float_mod_matches_int_mod_formula() {
    // Regression test for a bug where the float arm used
    // `f64::rem_euclid`, which is always non-negative and doesn't
    // satisfy the floor-division law the int arm does.
    let v = Arith::Mod.apply_float(5.0, -3.0).unwrap();
    assert_eq!(v.as_float(), Some(-1.0));
    let v = Arith::Mod.apply_float(-5.0, 3.0).unwrap();
    assert_eq!(v.as_float(), Some(1.0));
  }

  #[test]
  fn floor_division_identity_holds_for_int_and_float() {
    for (a, b) in [(7, 3), (-7, 3), (7, -3), (-7, -3)] {
      let q = Arith::FloorDiv.apply_int(a, b).unwrap().as_int().unwrap();
      let r = Arith::Mod.apply_int(a, b).unwrap().as_int().unwrap();
      assert_eq!(q * b + r, a, "failed for a={a}, b={b}");
    }
    for (a, b) in [(7.0, 3.0), (-7.0, 3.0), (7.0, -3.0), (-7.0, -3.0)] {
      let q = Arith::FloorDiv.apply_float(a, b).unwrap().as_float().unwrap();
      let r = Arith::Mod.apply_float(a, b).unwrap().as_float().unwrap();
      assert!((q * b + r - a).abs() < 1e-9, "failed for a={a}, b={b}");
    }
  }

  #[test]
  fn division_by_zero_is_an_error() {
    assert!(Arith::Div.apply_int(1, 0).is_err());
    assert!(Arith::FloorDiv.apply_int(1, 0).is_err());
    assert!(Arith::Mod.apply_int(1, 0).is_err());
    assert!(Arith::Div.apply_float(1.0, 0.0).is_err());
    assert!(Arith::Mod.apply_float(1.0, 0.0).is_err());
  }

  #[test]
  fn normalize_index_wraps_negative_offsets() {
    assert_eq!(normalize_index(-1, 5).unwrap(), 4);
    assert_eq!(normalize_index(0, 5).unwrap(), 0);
    assert!(normalize_index(-6, 5).is_err());
  }
}
