//! The tagged-union runtime value (§3 of `SPEC_FULL.md`).
//!
//! Immutable data (`Str`, `Bytes`, `Tuple`, `BigInt`, `FrozenSet`, `Range`,
//! `Slice`) is a plain `Rc<_>`: cloning a `Value` is always a refcount bump,
//! never a deep copy, matching the guest language's own by-reference
//! assignment semantics. Mutable, aliasable objects (`List`, `Dict`, `Set`,
//! `Cell`, `Instance`, `Class`, `Module`, `Generator`, `Property`) are
//! `Rc<RefCell<_>>` (the [`crate::heap::Shared`] alias) so every holder of a
//! `Value` observes the same mutation, per §3's aliasing invariant.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::class::{Class, Instance, Property, SuperProxy};
use crate::code::CodeObject;
use crate::exception::Exception;
use crate::function::{BoundMethod, Function};
use crate::generator::GeneratorObj;
use crate::heap::{Dict, PySet, RangeValue, Shared, SliceValue};
use crate::iterator::IteratorObj;
use crate::object::Module;
use crate::py_hash::{hash_bool, hash_bytes, hash_f64, hash_i64, hash_str};

/// A builtin (host-implemented) callable: an identifying name and a dense
/// index the builtin dispatch table (§4.10) switches on. The table itself
/// lives in `builtins`, not here, so this module has no dependency on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub id: u32,
}

/// The universal runtime value. Cloning is always cheap (a refcount bump or
/// a `Copy`), never a deep copy.
#[derive(Debug, Clone)]
pub enum Value {
    /// Distinguished from `None`: the "hole" a declared-but-unassigned local
    /// or cell reads as, never constructible from guest code (§3).
    Undefined,
    None,
    NotImplemented,
    Ellipsis,
    Bool(bool),
    Int(i64),
    BigInt(Rc<BigInt>),
    Float(f64),
    Complex(f64, f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Tuple(Rc<[Value]>),
    FrozenSet(Rc<PySet>),
    Range(Rc<RangeValue>),
    Slice(Rc<SliceValue>),

    List(Shared<Vec<Value>>),
    Dict(Shared<Dict>),
    Set(Shared<PySet>),
    Cell(Shared<Option<Value>>),

    Function(Rc<Function>),
    BuiltinFunc(Rc<BuiltinFunction>),
    BoundMethod(Rc<BoundMethod>),
    ClassMethod(Rc<Value>),
    StaticMethod(Rc<Value>),
    Property(Shared<Property>),

    Class(Shared<Class>),
    Instance(Shared<Instance>),
    Module(Shared<Module>),
    Super(Rc<SuperProxy>),
    Generator(Shared<GeneratorObj>),
    /// The heap-resident state `GET_ITER` produces and `FOR_ITER` advances
    /// (§4.6); never constructible from guest code directly, only ever
    /// pushed by those two opcodes.
    Iterator(Shared<IteratorObj>),
    Code(Rc<CodeObject>),
    /// A built-in-raised exception bound to `as e` in a guest handler, with
    /// no wrapping user-class instance (`Exception::class_instance` is
    /// `None`). A guest-raised user exception subclass is instead carried
    /// through a plain `Instance` via `Exception::class_instance`, so this
    /// variant only appears for the engine's own internal raises.
    Exc(Rc<Exception>),
}

impl Value {
    /// The name `type(x).__name__` would report for a built-in value.
    /// User-defined classes report their own `Class::name` instead, looked
    /// up by the caller (this needs no heap access for built-ins).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::None => "NoneType",
            Self::NotImplemented => "NotImplementedType",
            Self::Ellipsis => "ellipsis",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::Complex(..) => "complex",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Tuple(_) => "tuple",
            Self::FrozenSet(_) => "frozenset",
            Self::Range(_) => "range",
            Self::Slice(_) => "slice",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Set(_) => "set",
            Self::Cell(_) => "cell",
            Self::Function(_) => "function",
            Self::BuiltinFunc(_) => "builtin_function_or_method",
            Self::BoundMethod(_) => "method",
            Self::ClassMethod(_) => "classmethod",
            Self::StaticMethod(_) => "staticmethod",
            Self::Property(_) => "property",
            Self::Class(_) => "type",
            Self::Instance(_) => "object",
            Self::Module(_) => "module",
            Self::Super(_) => "super",
            Self::Generator(_) => "generator",
            Self::Iterator(_) => "iterator",
            Self::Code(_) => "code",
            Self::Exc(exc) => exc.exc_type.into(),
        }
    }

    /// Python's truthiness: `bool(x)` for every built-in container/numeric
    /// type (§3). User-defined `__bool__`/`__len__` overrides are resolved
    /// by the dispatch loop before falling back to this for built-ins.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::None => false,
            Self::NotImplemented | Self::Ellipsis => true,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::BigInt(b) => !num_traits::Zero::is_zero(b.as_ref()),
            Self::Float(f) => *f != 0.0,
            Self::Complex(re, im) => *re != 0.0 || *im != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::Bytes(b) => !b.is_empty(),
            Self::Tuple(t) => !t.is_empty(),
            Self::FrozenSet(s) => !s.is_empty(),
            Self::Range(r) => r.len() != 0,
            Self::List(l) => !l.borrow().is_empty(),
            Self::Dict(d) => !d.borrow().is_empty(),
            Self::Set(s) => !s.borrow().is_empty(),
            Self::Slice(_)
            | Self::Cell(_)
            | Self::Function(_)
            | Self::BuiltinFunc(_)
            | Self::BoundMethod(_)
            | Self::ClassMethod(_)
            | Self::StaticMethod(_)
            | Self::Property(_)
            | Self::Class(_)
            | Self::Instance(_)
            | Self::Module(_)
            | Self::Super(_)
            | Self::Generator(_)
            | Self::Iterator(_)
            | Self::Code(_)
            | Self::Exc(_) => true,
        }
    }

    /// `is`: identity comparison. Heap-allocated variants compare by
    /// pointer; immediate variants (bools, small ints, `None`, ...) compare
    /// by value, matching CPython's observable behavior for cached
    /// singletons and small integers closely enough that no guest program
    /// distinguishes it from true pointer identity (§3).
    #[must_use]
    pub fn identity_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined)
            | (Self::None, Self::None)
            | (Self::NotImplemented, Self::NotImplemented)
            | (Self::Ellipsis, Self::Ellipsis) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b),
            (Self::Bytes(a), Self::Bytes(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::FrozenSet(a), Self::FrozenSet(b)) => Rc::ptr_eq(a, b),
            (Self::Range(a), Self::Range(b)) => Rc::ptr_eq(a, b),
            (Self::Slice(a), Self::Slice(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Dict(a), Self::Dict(b)) => Rc::ptr_eq(a, b),
            (Self::Set(a), Self::Set(b)) => Rc::ptr_eq(a, b),
            (Self::Cell(a), Self::Cell(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::BuiltinFunc(a), Self::BuiltinFunc(b)) => Rc::ptr_eq(a, b),
            (Self::BoundMethod(a), Self::BoundMethod(b)) => Rc::ptr_eq(a, b),
            (Self::ClassMethod(a), Self::ClassMethod(b)) => Rc::ptr_eq(a, b),
            (Self::StaticMethod(a), Self::StaticMethod(b)) => Rc::ptr_eq(a, b),
            (Self::Property(a), Self::Property(b)) => Rc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Rc::ptr_eq(a, b),
            (Self::Instance(a), Self::Instance(b)) => Rc::ptr_eq(a, b),
            (Self::Module(a), Self::Module(b)) => Rc::ptr_eq(a, b),
            (Self::Super(a), Self::Super(b)) => Rc::ptr_eq(a, b),
            (Self::Generator(a), Self::Generator(b)) => Rc::ptr_eq(a, b),
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            (Self::Exc(a), Self::Exc(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Hashes a built-in, known-hashable value. Returns `None` for the
    /// built-in types Python itself refuses to hash (`list`, `dict`, `set`,
    /// and every other mutable container) — the dispatch loop raises
    /// `TypeError: unhashable type` for those, and resolves `__hash__` on
    /// `Instance` values separately (this function never sees instances of
    /// a user class with an overridden `__hash__`).
    #[must_use]
    pub fn basic_hash(&self) -> Option<u64> {
        match self {
            Self::Bool(b) => Some(hash_bool(*b)),
            Self::Int(i) => Some(hash_i64(*i)),
            Self::BigInt(b) => {
                use num_traits::ToPrimitive;
                b.to_i64().map_or_else(|| Some(hash_str(&b.to_string())), |i| Some(hash_i64(i)))
            }
            Self::Float(f) => Some(hash_f64(*f)),
            Self::Str(s) => Some(hash_str(s)),
            Self::Bytes(b) => Some(hash_bytes(b)),
            Self::None => Some(hash_i64(0)),
            Self::NotImplemented | Self::Ellipsis | Self::Undefined => Some(hash_i64(0)),
            Self::Tuple(items) => {
                let mut acc = 0x1234_5678_9abc_defu64;
                for item in items.iter() {
                    acc = acc.wrapping_mul(31).wrapping_add(item.basic_hash()?);
                }
                Some(acc)
            }
            Self::FrozenSet(set) => {
                let mut acc = 0u64;
                for item in set.iter() {
                    acc ^= item.basic_hash()?;
                }
                Some(acc)
            }
            Self::Range(r) => Some(hash_i64(r.start) ^ hash_i64(r.stop) ^ hash_i64(r.step)),
            Self::List(_) | Self::Dict(_) | Self::Set(_) | Self::Cell(_) | Self::Slice(_) | Self::Property(_) => None,
            Self::Function(f) => Some(Rc::as_ptr(f) as u64),
            Self::BuiltinFunc(f) => Some(Rc::as_ptr(f) as u64),
            Self::BoundMethod(m) => Some(Rc::as_ptr(m) as u64),
            Self::ClassMethod(m) | Self::StaticMethod(m) => Some(Rc::as_ptr(m) as u64),
            Self::Class(c) => Some(Rc::as_ptr(c) as u64),
            Self::Instance(i) => Some(Rc::as_ptr(i) as u64),
            Self::Module(m) => Some(Rc::as_ptr(m) as u64),
            Self::Super(s) => Some(Rc::as_ptr(s) as u64),
            Self::Generator(g) => Some(Rc::as_ptr(g) as u64),
            Self::Iterator(it) => Some(Rc::as_ptr(it) as u64),
            Self::Code(c) => Some(Rc::as_ptr(c) as u64),
            Self::Exc(e) => Some(Rc::as_ptr(e) as u64),
            Self::Complex(..) => None,
        }
    }

    #[must_use]
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Self::Function(_) | Self::BuiltinFunc(_) | Self::BoundMethod(_) | Self::Class(_) | Self::ClassMethod(_) | Self::StaticMethod(_)
        )
    }
}

impl fmt::Display for Value {
    /// A best-effort `str()`/`repr()` rendering for built-in types, used by
    /// the default traceback printer and by `print()`. A guest-defined
    /// `__str__`/`__repr__` override is resolved by the dispatch loop, which
    /// never falls through to this impl for `Instance` values with one.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "<undefined>"),
            Self::None => write!(f, "None"),
            Self::NotImplemented => write!(f, "NotImplemented"),
            Self::Ellipsis => write!(f, "Ellipsis"),
            Self::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(b) => write!(f, "{b}"),
            Self::Float(n) => write!(f, "{n}"),
            Self::Complex(re, im) => write!(f, "({re}{im:+}j)"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "b{b:?}"),
            Self::Tuple(items) => {
                write!(f, "(")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Self::Range(r) => write!(f, "range({}, {}, {})", r.start, r.stop, r.step),
            Self::List(_) => write!(f, "[list]"),
            Self::Dict(_) => write!(f, "{{dict}}"),
            Self::Set(_) | Self::FrozenSet(_) => write!(f, "{{set}}"),
            Self::Slice(s) => write!(f, "slice({:?}, {:?}, {:?})", s.start, s.stop, s.step),
            Self::Cell(_) => write!(f, "<cell>"),
            Self::Function(fun) => write!(f, "<function {}>", fun.name),
            Self::BuiltinFunc(b) => write!(f, "<built-in function {}>", b.name),
            Self::BoundMethod(_) => write!(f, "<bound method>"),
            Self::ClassMethod(_) => write!(f, "<classmethod>"),
            Self::StaticMethod(_) => write!(f, "<staticmethod>"),
            Self::Property(_) => write!(f, "<property>"),
            Self::Class(c) => write!(f, "<class '{}'>", c.borrow().name),
            Self::Instance(inst) => write!(f, "<{} object>", inst.borrow().class_name()),
            Self::Module(m) => write!(f, "<module '{}'>", m.borrow().name),
            Self::Super(_) => write!(f, "<super>"),
            Self::Generator(_) => write!(f, "<generator>"),
            Self::Iterator(_) => write!(f, "<iterator>"),
            Self::Code(c) => write!(f, "<code {}>", c.name),
            Self::Exc(exc) => write!(f, "{exc}"),
        }
    }
}

impl Instance {
    /// Convenience accessor for `Display`/error messages; panics only if a
    /// `Class` value somehow wraps a non-`Class` variant, which the engine
    /// never constructs.
    fn class_name(&self) -> Rc<str> {
        match &self.class {
            Value::Class(cls) => cls.borrow().name.clone(),
            _ => unreachable!("Instance::class always holds a Value::Class"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::shared;

    #[test]
    fn int_float_bool_hash_agree() {
        assert_eq!(Value::Int(1).basic_hash(), Value::Float(1.0).basic_hash());
        assert_eq!(Value::Bool(true).basic_hash(), Value::Int(1).basic_hash());
    }

    #[test]
    fn lists_are_unhashable() {
        assert!(Value::List(shared(Vec::new())).basic_hash().is_none());
    }

    #[test]
    fn identity_eq_distinguishes_distinct_lists() {
        let a = Value::List(shared(vec![Value::Int(1)]));
        let b = Value::List(shared(vec![Value::Int(1)]));
        assert!(!a.identity_eq(&b));
        assert!(a.identity_eq(&a.clone()));
    }

    #[test]
    fn falsy_values() {
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Str(Rc::from("")).is_truthy());
        assert!(Value::Str(Rc::from("x")).is_truthy());
        assert!(!Value::None.is_truthy());
    }
}
