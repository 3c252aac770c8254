//! The extension loader: resolves a module name to a platform shared
//! object, pulls its `ms_extension_create` descriptor out, and keeps the
//! library (and any native function pointers it exported) alive for the
//! life of the `Vm`. Only the ABI shape is specified (§4.5/§6 of the
//! design) — the content of any real extension (math, string, http) is
//! out of scope here.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, CStr};
use std::rc::Rc;

use libloading::{Library, Symbol};

use crate::config::VmConfig;
use crate::value::object::Module;
use crate::value::Value;
use crate::vm::Vm;
use crate::{Error, Result};

#[repr(C)]
pub struct ExtensionFn {
  pub name: *const c_char,
  pub func: unsafe extern "C" fn(*mut Vm, c_int, *const Value) -> Value,
}

#[repr(C)]
pub struct ExtensionDescriptor {
  pub name: *const c_char,
  pub function_count: c_int,
  pub functions: *const ExtensionFn,
}

type CreateFn = unsafe extern "C" fn() -> *mut ExtensionDescriptor;
type DestroyFn = unsafe extern "C" fn(*mut ExtensionDescriptor);

struct LoadedExtension {
  // Kept alive for as long as any function pointer it exported might be
  // called; never read directly once loaded.
  _library: Library,
  descriptor: *mut ExtensionDescriptor,
  destroy: Option<DestroyFn>,
  functions: HashMap<String, unsafe extern "C" fn(*mut Vm, c_int, *const Value) -> Value>,
}

impl Drop for LoadedExtension {
  fn drop(&mut self) {
    if let Some(destroy) = self.destroy {
      unsafe { destroy(self.descriptor) };
    }
  }
}

/// The VM's fixed-size (≤`max_extensions`) table of loaded extension
/// modules, keyed by module name.
pub struct Registry {
  loaded: HashMap<String, LoadedExtension>,
  max_extensions: usize,
}

impl Registry {
  pub fn new() -> Registry {
    Registry::with_config(VmConfig::default())
  }

  pub fn with_config(config: VmConfig) -> Registry {
    Registry {
      loaded: HashMap::new(),
      max_extensions: config.max_extensions,
    }
  }

  fn candidate_paths(name: &str) -> Vec<String> {
    let exe_dir = std::env::current_exe()
      .ok()
      .and_then(|p| p.parent().map(|d| d.to_path_buf()))
      .unwrap_or_default();
    let exe_dir = exe_dir.to_string_lossy().to_string();
    vec![
      format!("{exe_dir}/{name}.so"),
      format!("{exe_dir}/{name}.dylib"),
      format!("{exe_dir}/{name}.dll"),
      format!("{exe_dir}/lib{name}.so"),
      format!("{exe_dir}/lib{name}.dylib"),
      name.to_string(),
    ]
  }

  pub fn load(&mut self, name: &str) -> Result<Value> {
    if self.loaded.contains_key(name) {
      return Ok(Value::Module(Rc::new(Module { name: name.to_string() })));
    }
    if self.loaded.len() >= self.max_extensions {
      tracing::error!(module = name, limit = self.max_extensions, "extension registry is full");
      return Err(Error::import(name));
    }

    let mut last_err = None;
    for path in Self::candidate_paths(name) {
      match unsafe { Library::new(&path) } {
        Ok(lib) => {
          tracing::info!(path = %path, "loaded extension");
          return self.register(name, lib);
        }
        Err(e) => {
          tracing::warn!(path = %path, error = %e, "extension load attempt failed, trying next candidate");
          last_err = Some(e);
        }
      }
    }

    tracing::error!(module = name, error = ?last_err, "failed to load extension from every candidate path");
    Err(Error::import(name))
  }

  fn register(&mut self, name: &str, lib: Library) -> Result<Value> {
    let descriptor = unsafe {
      let create: Symbol<CreateFn> = lib
        .get(b"ms_extension_create\0")
        .map_err(|_| Error::import(name))?;
      create()
    };
    if descriptor.is_null() {
      return Err(Error::import(name));
    }

    let destroy: Option<DestroyFn> = unsafe { lib.get(b"ms_extension_destroy\0").ok().map(|s: Symbol<DestroyFn>| *s) };

    let mut functions = HashMap::new();
    unsafe {
      let desc = &*descriptor;
      let count = desc.function_count.max(0) as usize;
      let slice = std::slice::from_raw_parts(desc.functions, count);
      for entry in slice {
        let fn_name = CStr::from_ptr(entry.name).to_string_lossy().to_string();
        functions.insert(fn_name, entry.func);
      }
    }

    self.loaded.insert(
      name.to_string(),
      LoadedExtension {
        _library: lib,
        descriptor,
        destroy,
        functions,
      },
    );
    Ok(Value::Module(Rc::new(Module { name: name.to_string() })))
  }

  pub fn call(&self, module: &str, method: &str, vm: &mut Vm, args: &[Value]) -> Result<Value> {
    let ext = self
      .loaded
      .get(module)
      .ok_or_else(|| Error::attribute_error("module", module))?;
    let func = ext
      .functions
      .get(method)
      .ok_or_else(|| Error::attribute_error(module, method))?;
    Ok(unsafe { func(vm as *mut Vm, args.len() as c_int, args.as_ptr()) })
  }
}

impl Default for Registry {
  fn default() -> Registry {
    Registry::new()
  }
}
