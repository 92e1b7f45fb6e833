//! User-defined callables: [`Function`] (a `CodeObject` closed over its
//! defining globals, defaults, and captured cells) and the wrappers that
//! modify how a function binds (`BoundMethod`, `ClassMethod`,
//! `StaticMethod`) — §4.1 and §4.4 of `SPEC_FULL.md`.

use std::rc::Rc;

use crate::code::CodeObject;
use crate::heap::Shared;
use crate::value::Value;

/// A user-defined function: references its `CodeObject`, the globals
/// mapping of the module it was defined in, its positional/keyword-only
/// defaults, and one [`Shared`] cell per free variable it captures.
#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub code: Rc<CodeObject>,
    pub globals: Shared<crate::object::Namespace>,
    pub defaults: Vec<Value>,
    pub kwdefaults: Vec<(Rc<str>, Value)>,
    /// One cell per entry in `code.free_vars`, captured from the enclosing
    /// scope at `MAKE_FUNCTION` time.
    pub closure: Vec<Shared<Option<Value>>>,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>, code: Rc<CodeObject>, globals: Shared<crate::object::Namespace>) -> Self {
        Self {
            name: name.into(),
            code,
            globals,
            defaults: Vec::new(),
            kwdefaults: Vec::new(),
            closure: Vec::new(),
        }
    }
}

/// Pairs a `Function` (or any callable) with a bound `self`, prepended to
/// the positional argument vector on every call (§4.4 step 1).
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub func: Value,
    pub instance: Value,
}
