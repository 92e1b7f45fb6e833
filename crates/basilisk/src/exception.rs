//! The exception taxonomy, the guest-visible [`Exception`] value, and the
//! host-level [`RunError`] every engine entry point returns.
//!
//! Two error universes exist and must not be confused (§7 of `SPEC_FULL.md`):
//! [`Exception`] lives inside the guest language's own `try`/`except`
//! machinery and is itself addressable from bytecode; [`RunError`] is the
//! Rust-level result type, and only its [`RunError::Raised`] variant is ever
//! catchable by a guest `except:` clause.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::value::Value;

pub type RunResult<T> = Result<T, RunError>;

/// Every built-in exception type the engine constructs internally.
///
/// User-defined exception classes are `Value::Ref` instances of `Class`
/// whose MRO includes one of these as a base; this enum only covers the
/// built-in hierarchy the engine itself raises against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ExcType {
    BaseException,
    SystemExit,
    KeyboardInterrupt,
    GeneratorExit,
    CancelledError,

    Exception,
    ExceptionGroup,

    ArithmeticError,
    FloatingPointError,
    OverflowError,
    ZeroDivisionError,

    LookupError,
    IndexError,
    KeyError,

    TypeError,
    ValueError,
    AttributeError,

    NameError,
    UnboundLocalError,

    RuntimeError,
    RecursionError,
    NotImplementedError,

    StopIteration,
    StopAsyncIteration,

    ImportError,
    ModuleNotFoundError,

    OSError,
    MemoryError,
    AssertionError,
    SystemError,
    TimeoutError,
}

impl ExcType {
    /// The built-in's direct base, per the hierarchy in §7. `BaseException`
    /// is its own root (returns `None`).
    #[must_use]
    pub fn base(self) -> Option<Self> {
        use ExcType::{
            ArithmeticError, AssertionError, AttributeError, BaseException, CancelledError, Exception,
            ExceptionGroup, FloatingPointError, GeneratorExit, ImportError, IndexError, KeyError, KeyboardInterrupt,
            LookupError, MemoryError, ModuleNotFoundError, NameError, NotImplementedError, OSError, OverflowError,
            RecursionError, RuntimeError, StopAsyncIteration, StopIteration, SystemError, SystemExit, TimeoutError,
            TypeError, UnboundLocalError, ValueError, ZeroDivisionError,
        };
        Some(match self {
            BaseException => return None,
            SystemExit | KeyboardInterrupt | GeneratorExit | Exception | CancelledError => BaseException,
            ExceptionGroup
            | ArithmeticError
            | LookupError
            | TypeError
            | ValueError
            | AttributeError
            | NameError
            | RuntimeError
            | StopIteration
            | StopAsyncIteration
            | ImportError
            | OSError
            | MemoryError
            | AssertionError
            | SystemError
            | TimeoutError => Exception,
            FloatingPointError | OverflowError | ZeroDivisionError => ArithmeticError,
            IndexError | KeyError => LookupError,
            UnboundLocalError => NameError,
            RecursionError | NotImplementedError => RuntimeError,
            ModuleNotFoundError => ImportError,
        })
    }

    /// True if `self` is `other` or a descendant of `other` in the built-in
    /// hierarchy — the built-in half of `isinstance`-style exception
    /// matching used by `EXCEPTION_MATCH`.
    #[must_use]
    pub fn is_subtype_of(self, other: Self) -> bool {
        let mut cur = self;
        loop {
            if cur == other {
                return true;
            }
            match cur.base() {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }
}

/// A single entry in an exception's traceback chain: the frame it passed
/// through and the source line active there.
#[derive(Debug, Clone)]
pub struct TracebackEntry {
    pub function_name: String,
    pub line: u32,
}

/// The guest-visible exception value: a type tag, positional `args`, a
/// rendered message, chaining links, and the traceback accumulated as the
/// exception unwinds through frames.
#[derive(Debug, Clone)]
pub struct Exception {
    pub exc_type: ExcType,
    /// For user-defined exception classes, the `Value::Ref` instance this
    /// wraps; `None` for purely built-in exceptions with no user subclass.
    pub class_instance: Option<Value>,
    pub args: Vec<Value>,
    pub message: Option<String>,
    pub cause: Option<Box<Exception>>,
    pub context: Option<Box<Exception>>,
    pub suppress_context: bool,
    pub notes: Vec<String>,
    pub traceback: Vec<TracebackEntry>,
    /// Present only on `ExceptionGroup`: the grouped sub-exceptions.
    pub group_message: Option<String>,
    pub group_children: Vec<Exception>,
}

impl Exception {
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self {
            exc_type,
            class_instance: None,
            args: Vec::new(),
            message,
            cause: None,
            context: None,
            suppress_context: false,
            notes: Vec::new(),
            traceback: Vec::new(),
            group_message: None,
            group_children: Vec::new(),
        }
    }

    #[must_use]
    pub fn group(message: String, children: Vec<Exception>) -> Self {
        Self {
            group_message: Some(message),
            group_children: children,
            ..Self::new(ExcType::ExceptionGroup, None)
        }
    }

    pub fn push_frame(&mut self, function_name: String, line: u32) {
        self.traceback.push(TracebackEntry { function_name, line });
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Exception) -> Self {
        self.suppress_context = true;
        self.cause = Some(Box::new(cause));
        self
    }

    #[must_use]
    pub fn with_context(mut self, context: Exception) -> Self {
        // `raise e1 from e2` already set an explicit cause; don't clobber it
        // with the ambient handler context.
        if self.cause.is_none() {
            self.context = Some(Box::new(context));
        }
        self
    }

    pub fn add_note(&mut self, note: String) {
        self.notes.push(note);
    }

    #[must_use]
    pub fn matches(&self, candidate: ExcType) -> bool {
        self.exc_type.is_subtype_of(candidate)
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(msg) = &self.message {
            write!(f, "{}: {msg}", self.exc_type)
        } else {
            write!(f, "{}", self.exc_type)
        }
    }
}

/// Convenience builder used by opcodes and builtins that only need a
/// built-in exception with a plain string message, with no user subclass
/// involved.
pub(crate) struct SimpleException {
    exc: Exception,
}

impl SimpleException {
    pub(crate) fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self { exc: Exception::new(exc_type, message) }
    }

    pub(crate) fn into_exception(self) -> Exception {
        self.exc
    }

    pub(crate) fn with_frame(mut self, function_name: String, line: u32) -> Exception {
        self.exc.push_frame(function_name, line);
        self.exc
    }
}

impl From<SimpleException> for Exception {
    fn from(value: SimpleException) -> Self {
        value.exc
    }
}

/// The Rust-level result every engine entry point returns.
///
/// Implements `std::error::Error` via `thiserror` for host interop; the
/// three variants are deliberately distinct so an embedder's `match` can
/// tell "the guest raised" apart from "a sandbox limit fired" apart from
/// "the bytecode contract was violated" (§7 supplement).
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The guest program raised an exception that was never caught. This is
    /// the only variant a guest `except:` clause itself can intercept while
    /// it is still propagating — by the time it reaches the host boundary
    /// it is definitionally uncaught.
    #[error("unhandled exception: {0}")]
    Raised(Box<Exception>),
    /// A host-imposed sandbox limit (deadline, cancellation, memory
    /// ceiling) fired. Deliberately *not* catchable by a guest `except:`
    /// clause — see `bytecode::vm::exceptions` for the bypass.
    #[error("sandbox limit exceeded: {0}")]
    Fatal(Box<Exception>),
    /// The `CodeObject` violated its contract with the engine (out-of-range
    /// jump target, local slot, cell index, or constant index). Indicates a
    /// bug in the bytecode producer, not in the guest program.
    #[error("malformed bytecode: {0}")]
    Internal(String),
}

impl RunError {
    #[must_use]
    pub fn exception(&self) -> Option<&Exception> {
        match self {
            Self::Raised(exc) | Self::Fatal(exc) => Some(exc),
            Self::Internal(_) => None,
        }
    }

    /// True when a guest `except:` block is permitted to intercept this
    /// error during unwinding. `Fatal` and `Internal` always bypass guest
    /// handlers, matching the engine's interruption contract (§5).
    #[must_use]
    pub fn is_catchable(&self) -> bool {
        matches!(self, Self::Raised(_))
    }
}

pub(crate) fn simple_raise<T>(exc_type: ExcType, message: impl Into<String>) -> RunResult<T> {
    Err(RunError::Raised(Box::new(Exception::new(exc_type, Some(message.into())))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtype_walks_the_chain() {
        assert!(ExcType::ZeroDivisionError.is_subtype_of(ExcType::ArithmeticError));
        assert!(ExcType::ZeroDivisionError.is_subtype_of(ExcType::Exception));
        assert!(ExcType::ZeroDivisionError.is_subtype_of(ExcType::BaseException));
        assert!(!ExcType::ZeroDivisionError.is_subtype_of(ExcType::KeyError));
    }

    #[test]
    fn cause_implies_suppress_context() {
        let cause = Exception::new(ExcType::KeyError, Some("b".into()));
        let raised = Exception::new(ExcType::ValueError, Some("a".into())).with_cause(cause);
        assert!(raised.suppress_context);
        assert_eq!(raised.cause.unwrap().exc_type, ExcType::KeyError);
    }

    #[test]
    fn explicit_cause_is_not_overwritten_by_ambient_context() {
        let cause = Exception::new(ExcType::KeyError, None);
        let handled = Exception::new(ExcType::IndexError, None);
        let raised = Exception::new(ExcType::ValueError, None).with_cause(cause).with_context(handled);
        assert_eq!(raised.cause.as_ref().unwrap().exc_type, ExcType::KeyError);
        assert!(raised.context.is_none());
    }
}
