//! The plumbing layer the object protocol (§4.5) sits on: an ordered
//! string-keyed [`Namespace`] backing globals/builtins/module dicts and
//! class bodies, and the [`Module`] value it's embedded in.
//!
//! `Namespace` is deliberately distinct from the user-facing [`crate::heap::Dict`]
//! that backs `Value::Dict`: namespaces are always keyed by interned
//! identifier strings and never need the general `Value`-keyed hashing
//! machinery a real Python dict does, so keeping them separate avoids
//! paying the generic-hash cost on every `LOAD_GLOBAL`.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::Value;

/// An ordered `name -> Value` mapping used for module/class/builtins
/// namespaces (globals, `__dict__`, the pre-`SETUP_ANNOTATIONS` class
/// body namespace, ...).
#[derive(Debug, Default)]
pub struct Namespace {
    entries: IndexMap<Rc<str>, Value>,
}

impl Namespace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn set(&mut self, name: Rc<str>, value: Value) {
        self.entries.insert(name, value);
    }

    /// Removes a binding, returning whether it existed. Callers decide
    /// whether a missing name is an error (`DELETE_GLOBAL` raises
    /// `NameError`; `IMPORT_STAR` overwrite does not check).
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.entries.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Rc<str>, &Value)> {
        self.entries.iter()
    }
}

/// A module: its dotted name and attribute namespace (`__dict__`).
#[derive(Debug)]
pub struct Module {
    pub name: Rc<str>,
    pub namespace: crate::heap::Shared<Namespace>,
}

impl Module {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>, namespace: crate::heap::Shared<Namespace>) -> Self {
        Self { name: name.into(), namespace }
    }
}

/// Classifies a `Value` for the purposes of descriptor resolution (§4.5).
/// A *data* descriptor implements both `__get__` and (`__set__` or
/// `__delete__`); a *non-data* descriptor implements only `__get__`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    NotADescriptor,
    NonData,
    Data,
}

/// Classifies a class-level attribute value found during an MRO walk.
/// `Property` is always a data descriptor (§4.5); a plain `Function` is a
/// non-data descriptor (it binds to `BoundMethod` on instance access but a
/// plain instance-dict entry still shadows it).
#[must_use]
pub(crate) fn classify_descriptor(value: &Value) -> DescriptorKind {
    match value {
        Value::Property(_) => DescriptorKind::Data,
        Value::Function(_) | Value::ClassMethod(_) | Value::StaticMethod(_) | Value::BuiltinFunc(_) => {
            DescriptorKind::NonData
        }
        _ => DescriptorKind::NotADescriptor,
    }
}
