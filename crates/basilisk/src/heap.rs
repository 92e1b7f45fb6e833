//! Allocation accounting and the handful of shared container types
//! (`Dict`, `PySet`, `Range`, `Slice`) that back the corresponding
//! [`crate::value::Value`] variants.
//!
//! Mutable, aliasable runtime objects (`List`, `Dict`, `Set`, `Instance`,
//! `Class`, `Module`, `Cell`, `Generator`) are `Rc<RefCell<_>>` rather than
//! indices into a hand-rolled arena with manual increment/decrement calls.
//! `Rc` already gives us exactly the aliasing semantics §3 requires
//! ("a `Value` used as a mapping key... every holder observes the same
//! mutation") with the refcounting itself checked by the compiler instead
//! of hand-maintained; the one thing a manual arena buys over `Rc` — eager,
//! deterministic reclamation of reference cycles — is explicitly optional
//! per §3 ("the host must tolerate cycles... or accept leakage as out of
//! scope"), and this engine takes that option. See `DESIGN.md` for the
//! full rationale.
//!
//! What a manual arena would have given us for free, this facade gives
//! explicitly: every allocation site calls [`Heap::charge`] so the
//! configured [`crate::resource::ResourceTracker`] ceilings (§5) are still
//! enforced uniformly, even though the objects themselves are not stored
//! here.

use std::cell::RefCell;
use std::rc::Rc;

use crate::exception::{ExcType, RunResult, simple_raise};
use crate::resource::ResourceTracker;
use crate::value::Value;

/// Thin accounting facade wrapping a [`ResourceTracker`]. Every opcode or
/// builtin that allocates a new container or instance calls [`Heap::charge`]
/// with an approximate byte estimate before constructing the `Rc`.
pub(crate) struct Heap<T: ResourceTracker> {
    tracker: T,
}

impl<T: ResourceTracker> Heap<T> {
    pub(crate) fn new(tracker: T) -> Self {
        Self { tracker }
    }

    pub(crate) fn tracker(&self) -> &T {
        &self.tracker
    }

    pub(crate) fn tracker_mut(&mut self) -> &mut T {
        &mut self.tracker
    }

    /// Charges a fresh heap allocation against the configured ceilings.
    pub(crate) fn charge(&mut self, estimate_bytes: usize) -> RunResult<()> {
        self.tracker
            .on_allocate(|| estimate_bytes)
            .map_err(|err| err.into_run_error())
    }

    /// Charges growth of an existing container (`list.append`, `set.add`,
    /// a new dict key) without representing a fresh object.
    pub(crate) fn charge_insert(&mut self) -> RunResult<()> {
        self.tracker.on_container_insert().map_err(|err| err.into_run_error())
    }

    /// Pre-flights an operation whose result may be large (`2 ** n`)
    /// before actually computing it.
    pub(crate) fn charge_large_result(&self, estimate_bytes: usize) -> RunResult<()> {
        if estimate_bytes < crate::resource::LARGE_RESULT_THRESHOLD {
            return Ok(());
        }
        self.tracker
            .check_large_result(estimate_bytes)
            .map_err(|err| err.into_run_error())
    }

    pub(crate) fn check_recursion_depth(&self, current_depth: usize) -> RunResult<()> {
        self.tracker
            .check_recursion_depth(current_depth)
            .map_err(|err| err.into_run_error())
    }

    pub(crate) fn check_time(&mut self) -> RunResult<()> {
        self.tracker.check_time().map_err(|err| err.into_run_error())
    }
}

/// A heap reference shared by every `Value` variant that needs interior
/// mutability (lists, dicts, sets, cells) and by the embedding API's
/// globals namespace.
pub type Shared<Inner> = Rc<RefCell<Inner>>;

pub fn shared<Inner>(value: Inner) -> Shared<Inner> {
    Rc::new(RefCell::new(value))
}

/// An ordered hash map, matching the language's insertion-order iteration
/// guarantee: inserting an existing key updates its value in place (no
/// reorder), deleting a key removes it from the order entirely, and
/// re-inserting a previously deleted key appends at the end again.
///
/// Implemented as a dense entry vector plus a hash-to-indices index,
/// mirroring CPython's own open-addressing-over-a-dense-array dict
/// representation rather than reaching for a library ordered map, since the
/// "deletion removes it from the order" and "insertion order, not sorted
/// order" invariants are exactly what a from-scratch CPython-style dict
/// gets right by construction.
#[derive(Debug, Default)]
pub(crate) struct Dict {
    entries: Vec<Option<DictEntry>>,
    index: ahash::AHashMap<u64, smallvec::SmallVec<[usize; 2]>>,
    len: usize,
}

#[derive(Debug, Clone)]
struct DictEntry {
    hash: u64,
    key: Value,
    value: Value,
}

impl Dict {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Looks up a key by hash, using `eq` to disambiguate collisions.
    /// Returns the dense index of the matching entry, if any.
    fn find(&self, hash: u64, mut eq: impl FnMut(&Value) -> bool) -> Option<usize> {
        let candidates = self.index.get(&hash)?;
        candidates
            .iter()
            .copied()
            .find(|&idx| matches!(&self.entries[idx], Some(entry) if eq(&entry.key)))
    }

    /// Inserts or updates a key, given its precomputed hash and an equality
    /// predicate (equality needs heap context for user `__eq__`, so it is
    /// supplied by the caller rather than computed here).
    pub(crate) fn insert(&mut self, hash: u64, key: Value, value: Value, eq: impl FnMut(&Value) -> bool) -> Option<Value> {
        if let Some(idx) = self.find(hash, eq) {
            let entry = self.entries[idx].as_mut().expect("index points at a live entry");
            return Some(std::mem::replace(&mut entry.value, value));
        }
        let idx = self.entries.len();
        self.entries.push(Some(DictEntry { hash, key, value }));
        self.index.entry(hash).or_default().push(idx);
        self.len += 1;
        None
    }

    pub(crate) fn get(&self, hash: u64, eq: impl FnMut(&Value) -> bool) -> Option<&Value> {
        let idx = self.find(hash, eq)?;
        self.entries[idx].as_ref().map(|entry| &entry.value)
    }

    /// Removes a key, always distinguishing "present" from "absent" to the
    /// caller — per the open question in §9, every delete path raises on a
    /// missing key rather than silently succeeding.
    pub(crate) fn remove(&mut self, hash: u64, eq: impl FnMut(&Value) -> bool) -> Option<(Value, Value)> {
        let idx = self.find(hash, eq)?;
        if let Some(bucket) = self.index.get_mut(&hash) {
            bucket.retain(|&i| i != idx);
        }
        let entry = self.entries[idx].take().expect("index points at a live entry");
        self.len -= 1;
        Some((entry.key, entry.value))
    }

    pub(crate) fn contains(&self, hash: u64, eq: impl FnMut(&Value) -> bool) -> bool {
        self.find(hash, eq).is_some()
    }

    /// Iterates in insertion order, skipping tombstones left by `remove`.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().filter_map(|slot| slot.as_ref().map(|e| (&e.key, &e.value)))
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.len = 0;
    }
}

/// Unordered hashable-value collection backing `Set` and `FrozenSet`.
/// Reuses [`Dict`]'s dense-vector-plus-hash-index storage with a unit
/// value, since the engine needs identical collision/deletion handling for
/// both.
#[derive(Debug, Default)]
pub(crate) struct PySet {
    entries: Dict,
}

impl PySet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn insert(&mut self, hash: u64, value: Value, eq: impl FnMut(&Value) -> bool) -> bool {
        self.entries.insert(hash, value, Value::Undefined, eq).is_none()
    }

    pub(crate) fn contains(&self, hash: u64, eq: impl FnMut(&Value) -> bool) -> bool {
        self.entries.contains(hash, eq)
    }

    pub(crate) fn remove(&mut self, hash: u64, eq: impl FnMut(&Value) -> bool) -> bool {
        self.entries.remove(hash, eq).is_some()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Value> {
        self.entries.iter().map(|(k, _)| k)
    }
}

/// Structural equality restricted to the hashable subset of `Value`
/// (§3): the only values a dict key or set member can ever be. Usable
/// inside a `Dict`/`PySet` `FnMut` closure with no VM access, unlike the
/// general `values_equal` (which needs one to recurse into containers
/// holding instances with a user `__eq__`) — containers are never
/// hashable, so this never needs to.
pub(crate) fn key_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
        (Value::Bool(x), Value::Int(y)) | (Value::Int(y), Value::Bool(x)) => i64::from(*x) == *y,
        (Value::BigInt(x), Value::BigInt(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bytes(x), Value::Bytes(y)) => x == y,
        (Value::None, Value::None) => true,
        (Value::Tuple(x), Value::Tuple(y)) => x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| key_eq(l, r)),
        (Value::FrozenSet(x), Value::FrozenSet(y)) => {
            x.len() == y.len() && x.iter().all(|v| y.iter().any(|o| key_eq(v, o)))
        }
        _ => a.identity_eq(b),
    }
}

/// `start`/`stop`/`step` triple backing the lazy `Range` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub(crate) fn len(&self) -> i64 {
        if self.step > 0 {
            if self.stop <= self.start { 0 } else { (self.stop - self.start - 1) / self.step + 1 }
        } else if self.step < 0 {
            if self.stop >= self.start { 0 } else { (self.start - self.stop - 1) / (-self.step) + 1 }
        } else {
            0
        }
    }

    pub(crate) fn nth(&self, index: i64) -> Option<i64> {
        let value = self.start + index * self.step;
        if index < 0 || index >= self.len() { None } else { Some(value) }
    }
}

/// `start`/`stop`/`step` triple backing `Slice`; any field may be absent
/// (Python's `None` bound).
#[derive(Debug, Clone)]
pub(crate) struct SliceValue {
    pub start: Option<Value>,
    pub stop: Option<Value>,
    pub step: Option<Value>,
}

/// Resolves a slice's bounds against a sequence of length `len`, returning
/// `(start, stop, step)` ready to drive a loop, the way CPython's
/// `slice.indices(len)` does.
pub(crate) fn resolve_slice_indices(start: Option<i64>, stop: Option<i64>, step: Option<i64>, len: i64) -> RunResult<(i64, i64, i64)> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return simple_raise(ExcType::ValueError, "slice step cannot be zero");
    }
    let clamp = |value: i64| -> i64 {
        if value < 0 { (value + len).max(if step < 0 { -1 } else { 0 }) } else { value.min(len) }
    };
    let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
    let start = start.map_or(default_start, clamp);
    let stop = stop.map_or(default_stop, clamp);
    Ok((start, stop, step))
}
