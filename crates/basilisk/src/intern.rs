//! Identifier interning: a small cache so that repeated identifier text
//! (attribute names, dunder names, local-variable names) shares one `Rc<str>`
//! allocation across every `CodeObject` that mentions it, instead of each
//! assembled constant/name pool cloning its own copy.
//!
//! This is a much smaller affair than a full string/bytes/bigint interner
//! keyed by dense integer ids: the `Rc<RefCell<_>>`-based object model
//! already makes `Rc<str>` clones a refcount bump, so the only thing worth
//! deduplicating is the *first* allocation of each distinct identifier.

use std::rc::Rc;

use ahash::AHashMap;

/// Caches canonical `Rc<str>` allocations by their text.
#[derive(Debug, Default)]
pub(crate) struct Interner {
    table: AHashMap<Rc<str>, Rc<str>>,
}

impl Interner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical `Rc<str>` for `text`, allocating one and
    /// caching it on first use.
    pub(crate) fn intern(&mut self, text: &str) -> Rc<str> {
        if let Some(existing) = self.table.get(text) {
            return Rc::clone(existing);
        }
        let rc: Rc<str> = Rc::from(text);
        self.table.insert(Rc::clone(&rc), Rc::clone(&rc));
        rc
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.table.len()
    }
}

/// Names the dispatch loop and descriptor/attribute machinery compare
/// against directly. Kept as plain `&'static str` constants rather than an
/// enum: every comparison site already holds an `Rc<str>`/`&str` from a
/// `CodeObject`'s name pool, so a `==` against one of these is exactly as
/// cheap as a discriminant compare and needs no extra lookup table.
pub(crate) mod dunder {
    pub(crate) const INIT: &str = "__init__";
    pub(crate) const NEW: &str = "__new__";
    pub(crate) const GET: &str = "__get__";
    pub(crate) const SET: &str = "__set__";
    pub(crate) const DELETE: &str = "__delete__";
    pub(crate) const EQ: &str = "__eq__";
    pub(crate) const NE: &str = "__ne__";
    pub(crate) const LT: &str = "__lt__";
    pub(crate) const LE: &str = "__le__";
    pub(crate) const GT: &str = "__gt__";
    pub(crate) const GE: &str = "__ge__";
    pub(crate) const HASH: &str = "__hash__";
    pub(crate) const BOOL: &str = "__bool__";
    pub(crate) const LEN: &str = "__len__";
    pub(crate) const ITER: &str = "__iter__";
    pub(crate) const NEXT: &str = "__next__";
    pub(crate) const ENTER: &str = "__enter__";
    pub(crate) const EXIT: &str = "__exit__";
    pub(crate) const AENTER: &str = "__aenter__";
    pub(crate) const AEXIT: &str = "__aexit__";
    pub(crate) const CALL: &str = "__call__";
    pub(crate) const STR: &str = "__str__";
    pub(crate) const REPR: &str = "__repr__";
    pub(crate) const GETATTR: &str = "__getattr__";
    pub(crate) const GETATTRIBUTE: &str = "__getattribute__";
    pub(crate) const SETATTR: &str = "__setattr__";
    pub(crate) const CLASS: &str = "__class__";
    pub(crate) const NAME: &str = "__name__";
    pub(crate) const GETITEM: &str = "__getitem__";
    pub(crate) const SETITEM: &str = "__setitem__";
    pub(crate) const DELITEM: &str = "__delitem__";
    pub(crate) const CONTAINS: &str = "__contains__";

    pub(crate) const ADD: &str = "__add__";
    pub(crate) const RADD: &str = "__radd__";
    pub(crate) const SUB: &str = "__sub__";
    pub(crate) const RSUB: &str = "__rsub__";
    pub(crate) const MUL: &str = "__mul__";
    pub(crate) const RMUL: &str = "__rmul__";
    pub(crate) const TRUEDIV: &str = "__truediv__";
    pub(crate) const RTRUEDIV: &str = "__rtruediv__";
    pub(crate) const FLOORDIV: &str = "__floordiv__";
    pub(crate) const RFLOORDIV: &str = "__rfloordiv__";
    pub(crate) const MOD: &str = "__mod__";
    pub(crate) const RMOD: &str = "__rmod__";
    pub(crate) const POW: &str = "__pow__";
    pub(crate) const RPOW: &str = "__rpow__";
    pub(crate) const MATMUL: &str = "__matmul__";
    pub(crate) const RMATMUL: &str = "__rmatmul__";
    pub(crate) const LSHIFT: &str = "__lshift__";
    pub(crate) const RLSHIFT: &str = "__rlshift__";
    pub(crate) const RSHIFT: &str = "__rshift__";
    pub(crate) const RRSHIFT: &str = "__rrshift__";
    pub(crate) const AND: &str = "__and__";
    pub(crate) const RAND: &str = "__rand__";
    pub(crate) const OR: &str = "__or__";
    pub(crate) const ROR: &str = "__ror__";
    pub(crate) const XOR: &str = "__xor__";
    pub(crate) const RXOR: &str = "__rxor__";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_text_shares_one_allocation() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(interner.len(), 1);
    }

    #[test]
    fn distinct_text_gets_distinct_entries() {
        let mut interner = Interner::new();
        interner.intern("a");
        interner.intern("b");
        assert_eq!(interner.len(), 2);
    }
}
