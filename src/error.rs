//! The crate-wide error type.
//!
//! Lex and compile errors carry a [`Span`] so the CLI (or any embedder)
//! can render a [`diag::Report`] pointing at the offending source text.
//! Runtime errors carry only a message and an optional value (the thing
//! that was `raise`d), since by the time one reaches the host the VM's
//! source-level context has already unwound.

use span::Span;
use thiserror::Error as ThisError;

use crate::value::Value;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, ThisError)]
pub enum Error {
  #[error("{message}")]
  Lex { message: String, span: Span },

  #[error("{message}")]
  Compile { message: String, span: Span },

  #[error("{kind}: {message}")]
  Runtime {
    kind: RuntimeErrorKind,
    message: String,
    /// The value bound by a user `raise`, if this error originated from one.
    raised: Option<Value>,
  },

  #[error(transparent)]
  Host(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
  TypeError,
  NameError,
  AttributeError,
  IndexError,
  KeyError,
  ZeroDivisionError,
  ArityError,
  AssertionError,
  RecursionError,
  ImportError,
  ValueError,
  UserException,
}

impl std::fmt::Display for RuntimeErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      RuntimeErrorKind::TypeError => "TypeError",
      RuntimeErrorKind::NameError => "NameError",
      RuntimeErrorKind::AttributeError => "AttributeError",
      RuntimeErrorKind::IndexError => "IndexError",
      RuntimeErrorKind::KeyError => "KeyError",
      RuntimeErrorKind::ZeroDivisionError => "ZeroDivisionError",
      RuntimeErrorKind::ArityError => "ArityError",
      RuntimeErrorKind::AssertionError => "AssertionError",
      RuntimeErrorKind::RecursionError => "RecursionError",
      RuntimeErrorKind::ImportError => "ImportError",
      RuntimeErrorKind::ValueError => "ValueError",
      RuntimeErrorKind::UserException => "Exception",
    };
    write!(f, "{s}")
  }
}

impl Error {
  pub fn lex(message: impl Into<String>, span: impl Into<Span>) -> Error {
    Error::Lex {
      message: message.into(),
      span: span.into(),
    }
  }

  pub fn compile(message: impl Into<String>, span: impl Into<Span>) -> Error {
    Error::Compile {
      message: message.into(),
      span: span.into(),
    }
  }

  pub fn runtime(kind: RuntimeErrorKind, message: impl Into<String>) -> Error {
    Error::Runtime {
      kind,
      message: message.into(),
      raised: None,
    }
  }

  pub fn raised(value: Value) -> Error {
    Error::Runtime {
      kind: RuntimeErrorKind::UserException,
      message: format!("{value}"),
      raised: Some(value),
    }
  }

  pub fn type_error(message: impl Into<String>) -> Error {
    Error::runtime(RuntimeErrorKind::TypeError, message)
  }

  pub fn name_error(name: &str) -> Error {
    Error::runtime(
      RuntimeErrorKind::NameError,
      format!("name '{name}' is not defined"),
    )
  }

  pub fn attribute_error(ty: &str, name: &str) -> Error {
    Error::runtime(
      RuntimeErrorKind::AttributeError,
      format!("'{ty}' object has no attribute '{name}'"),
    )
  }

  pub fn index_error(message: impl Into<String>) -> Error {
    Error::runtime(RuntimeErrorKind::IndexError, message)
  }

  pub fn zero_division() -> Error {
    Error::runtime(RuntimeErrorKind::ZeroDivisionError, "division by zero")
  }

  pub fn arity(name: &str, expected: usize, got: usize) -> Error {
    Error::runtime(
      RuntimeErrorKind::ArityError,
      format!("{name}() expected {expected} argument(s), got {got}"),
    )
  }

  pub fn assertion_failed(message: impl Into<String>) -> Error {
    Error::runtime(RuntimeErrorKind::AssertionError, message)
  }

  pub fn recursion() -> Error {
    Error::runtime(RuntimeErrorKind::RecursionError, "maximum recursion depth exceeded")
  }

  pub fn import(path: &str) -> Error {
    Error::runtime(
      RuntimeErrorKind::ImportError,
      format!("could not load module '{path}'"),
    )
  }

  /// The raised value, if this is a `raise`d user exception.
  pub fn raised_value(&self) -> Option<&Value> {
    match self {
      Error::Runtime { raised, .. } => raised.as_ref(),
      _ => None,
    }
  }

  /// The process exit code this error should map to, per the CLI contract.
  pub fn exit_code(&self) -> i32 {
    match self {
      Error::Lex { .. } | Error::Compile { .. } => 65,
      Error::Runtime { .. } => 70,
      Error::Host(_) => 70,
    }
  }

  /// Render a `diag`-style snippet of this error against `src`, if it
  /// carries a span. Runtime errors have no span by the time they reach
  /// the host (the frame that raised them has already unwound), so they
  /// fall back to a plain one-line message.
  pub fn report(&self, src: &str, file_name: &str) -> String {
    match self {
      Error::Lex { message, span } | Error::Compile { message, span } => diag::Report::error()
        .source(diag::Source::file(file_name.to_string(), src.to_string()))
        .message(message.clone())
        .span(*span)
        .color(false)
        .build()
        .emit_to_string()
        .unwrap_or_else(|_| format!("error: {message}")),
      other => format!("error: {other}"),
    }
  }
}
