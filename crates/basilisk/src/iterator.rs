//! Iteration protocol state (§4.6 of `SPEC_FULL.md`): what `GET_ITER`
//! produces and `FOR_ITER` advances. Heap-resident like [`crate::generator::GeneratorObj`]
//! rather than folded into the dispatch loop's operand stack, since a `for`
//! loop's iterator outlives the single instruction that created it.

use std::rc::Rc;

use crate::heap::{RangeValue, Shared};
use crate::value::Value;

/// What a built-in sequence's `GET_ITER` produced. A generator or a
/// user-defined instance with its own `__next__` is already its own
/// iterator (§4.6: "if the value is already an iterator... return it") and
/// so never gets wrapped here — only the built-ins that have no heap
/// representation of their own iteration state need one invented for them.
pub(crate) enum IterKind {
    /// A live view into a list: advancing observes mutations made to the
    /// list after the iterator was created, matching CPython's own
    /// `list_iterator` rather than snapshotting at `GET_ITER` time.
    List { list: Shared<Vec<Value>>, index: usize },
    /// An immutable snapshot (tuple, string characters, bytes, dict keys,
    /// set/frozenset members) taken once at `GET_ITER` time — mutating the
    /// underlying dict/set mid-iteration is documented undefined behavior
    /// in the reference language anyway, so a snapshot is an adequate
    /// simplification here (see `DESIGN.md`).
    Snapshot { items: Rc<[Value]>, index: usize },
    Range { range: Rc<RangeValue>, index: i64 },
}

pub(crate) struct IteratorObj {
    pub(crate) kind: IterKind,
}

impl IteratorObj {
    pub(crate) fn new(kind: IterKind) -> Self {
        Self { kind }
    }
}
