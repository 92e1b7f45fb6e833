//! Container construction, subscription, the iteration protocol, structural
//! pattern matching, and `import` (§4.3, §4.6, §6).

use std::rc::Rc;

use crate::class::Class;
use crate::exception::{ExcType, RunError, RunResult, simple_raise};
use crate::heap::{Dict, PySet, Shared, SliceValue, key_eq, resolve_slice_indices, shared};
use crate::iterator::{IterKind, IteratorObj};
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::Value;

fn wrap_iterator(kind: IterKind) -> Value {
    Value::Iterator(shared(IteratorObj::new(kind)))
}

fn snapshot_iter(items: Rc<[Value]>) -> Value {
    wrap_iterator(IterKind::Snapshot { items, index: 0 })
}

/// `i`, possibly negative, resolved against a sequence of length `len`.
fn normalize_index(i: i64, len: usize) -> RunResult<usize> {
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return simple_raise(ExcType::IndexError, "index out of range");
    }
    Ok(resolved as usize)
}

fn slice_bound(value: &Option<Value>) -> RunResult<Option<i64>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(Value::Int(i)) => Ok(Some(*i)),
        Some(other) => simple_raise(ExcType::TypeError, format!("slice indices must be integers or None, not '{}'", other.type_name())),
    }
}

fn slice_triple(s: &SliceValue, len: i64) -> RunResult<(i64, i64, i64)> {
    resolve_slice_indices(slice_bound(&s.start)?, slice_bound(&s.stop)?, slice_bound(&s.step)?, len)
}

/// Collects the (start, stop, step)-selected elements of a slice into an
/// owned `Vec`, the building block for every sliced-container read.
fn slice_collect<'a>(items: impl Fn(usize) -> &'a Value, len: usize, start: i64, stop: i64, step: i64) -> Vec<Value>
where
    Value: 'a,
{
    let mut out = Vec::new();
    if step > 0 {
        let mut i = start;
        while i < stop && i < len as i64 {
            if i >= 0 {
                out.push(items(i as usize).clone());
            }
            i += step;
        }
    } else {
        let mut i = start;
        while i > stop && i >= 0 {
            if i < len as i64 {
                out.push(items(i as usize).clone());
            }
            i += step;
        }
    }
    out
}

/// A Python pattern's "sequence" type — deliberately excludes `str`/`bytes`,
/// matching the reference language's own carve-out for `match` subjects.
fn is_pattern_sequence(value: &Value) -> bool {
    matches!(value, Value::List(_) | Value::Tuple(_))
}

fn sequence_len(value: &Value) -> usize {
    match value {
        Value::List(l) => l.borrow().len(),
        Value::Tuple(t) => t.len(),
        _ => 0,
    }
}

fn sequence_items(value: &Value) -> Vec<Value> {
    match value {
        Value::List(l) => l.borrow().clone(),
        Value::Tuple(t) => t.to_vec(),
        _ => Vec::new(),
    }
}

fn class_matches(value: &Value, target: &Shared<Class>) -> bool {
    let Value::Instance(inst) = value else { return false };
    let class = inst.borrow().class.clone();
    let Value::Class(cls) = &class else { return false };
    cls.borrow().mro.iter().any(|ancestor| matches!(ancestor, Value::Class(a) if Rc::ptr_eq(a, target)))
}

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    // ---- Construction (§4.3) ----

    pub(crate) fn op_build_tuple(&mut self, count: u16) -> RunResult<()> {
        let items = self.pop_n(count as usize);
        self.heap.charge(items.len() * std::mem::size_of::<Value>())?;
        self.push(Value::Tuple(Rc::from(items)));
        Ok(())
    }

    pub(crate) fn op_build_list(&mut self, count: u16) -> RunResult<()> {
        let items = self.pop_n(count as usize);
        self.heap.charge(items.len() * std::mem::size_of::<Value>())?;
        self.push(Value::List(shared(items)));
        Ok(())
    }

    pub(crate) fn op_build_set(&mut self, count: u16) -> RunResult<()> {
        let items = self.pop_n(count as usize);
        self.heap.charge(items.len() * std::mem::size_of::<Value>())?;
        let mut set = PySet::new();
        for item in items {
            let hash = item
                .basic_hash()
                .ok_or(())
                .or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", item.type_name())))?;
            let probe = item.clone();
            set.insert(hash, item, |k| key_eq(k, &probe));
        }
        self.push(Value::Set(shared(set)));
        Ok(())
    }

    pub(crate) fn op_build_map(&mut self, pair_count: u16) -> RunResult<()> {
        let mut flat = self.pop_n(2 * pair_count as usize);
        self.heap.charge(flat.len() * std::mem::size_of::<Value>())?;
        let mut dict = Dict::new();
        // `pop_n` already restored source order; drain pairs off the front.
        let mut iter = flat.drain(..);
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let hash = key
                .basic_hash()
                .ok_or(())
                .or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", key.type_name())))?;
            let probe = key.clone();
            dict.insert(hash, key, value, |k| key_eq(k, &probe));
        }
        self.push(Value::Dict(shared(dict)));
        Ok(())
    }

    pub(crate) fn op_list_append(&mut self) -> RunResult<()> {
        let item = self.pop();
        let Value::List(list) = self.top() else {
            return Err(RunError::Internal("LIST_APPEND target is not a list".into()));
        };
        list.borrow_mut().push(item);
        self.heap.charge_insert()
    }

    pub(crate) fn op_set_add(&mut self) -> RunResult<()> {
        let item = self.pop();
        let Value::Set(set) = self.top().clone() else {
            return Err(RunError::Internal("SET_ADD target is not a set".into()));
        };
        let hash = item
            .basic_hash()
            .ok_or(())
            .or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", item.type_name())))?;
        let probe = item.clone();
        set.borrow_mut().insert(hash, item, |k| key_eq(k, &probe));
        self.heap.charge_insert()
    }

    pub(crate) fn op_map_add(&mut self) -> RunResult<()> {
        let value = self.pop();
        let key = self.pop();
        let Value::Dict(dict) = self.top().clone() else {
            return Err(RunError::Internal("MAP_ADD target is not a dict".into()));
        };
        let hash = key
            .basic_hash()
            .ok_or(())
            .or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", key.type_name())))?;
        let probe = key.clone();
        dict.borrow_mut().insert(hash, key, value, |k| key_eq(k, &probe));
        self.heap.charge_insert()
    }

    /// Pops `n` values, restoring the order they were pushed in (`pop`
    /// returns LIFO, so the naive collection comes back reversed).
    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            items.push(self.pop());
        }
        items.reverse();
        items
    }

    // ---- Unpacking ----

    pub(crate) fn op_unpack_sequence(&mut self, count: u16) -> RunResult<()> {
        let seq = self.pop();
        let items = self.drain_iterable(seq)?;
        if items.len() != count as usize {
            return simple_raise(
                ExcType::ValueError,
                format!("not enough values to unpack (expected {count}, got {})", items.len()),
            );
        }
        for item in items.into_iter().rev() {
            self.push(item);
        }
        Ok(())
    }

    pub(crate) fn op_unpack_ex(&mut self, before_after: u16) -> RunResult<()> {
        let before_n = (before_after & 0x00ff) as usize;
        let after_n = (before_after >> 8) as usize;
        let seq = self.pop();
        let mut items = self.drain_iterable(seq)?;
        if items.len() < before_n + after_n {
            return simple_raise(
                ExcType::ValueError,
                format!("not enough values to unpack (expected at least {}, got {})", before_n + after_n, items.len()),
            );
        }
        let after = items.split_off(items.len() - after_n);
        let middle = items.split_off(before_n);
        let before = items;
        for item in after.into_iter().rev() {
            self.push(item);
        }
        self.push(Value::List(shared(middle)));
        for item in before.into_iter().rev() {
            self.push(item);
        }
        Ok(())
    }

    /// Unpacking target, §4.3: any iterable, not just a built-in sequence —
    /// `a, b = some_generator()` is as legal as `a, b = [1, 2]`.
    pub(crate) fn drain_iterable(&mut self, value: Value) -> RunResult<Vec<Value>> {
        let iter = self.to_iterator(value)?;
        let mut items = Vec::new();
        while let Some(item) = self.iterator_next(&iter)? {
            items.push(item);
        }
        Ok(items)
    }

    // ---- Subscription ----

    pub(crate) fn op_binary_subscr(&mut self) -> RunResult<()> {
        let index = self.pop();
        let container = self.pop();
        let result = self.subscr_get(&container, &index)?;
        self.push(result);
        Ok(())
    }

    fn subscr_get(&mut self, container: &Value, index: &Value) -> RunResult<Value> {
        match container {
            Value::List(list) => {
                let items = list.borrow();
                match index {
                    Value::Int(i) => Ok(items[normalize_index(*i, items.len())?].clone()),
                    Value::Slice(s) => {
                        let (start, stop, step) = slice_triple(s, items.len() as i64)?;
                        Ok(Value::List(shared(slice_collect(|i| &items[i], items.len(), start, stop, step))))
                    }
                    other => simple_raise(ExcType::TypeError, format!("list indices must be integers or slices, not {}", other.type_name())),
                }
            }
            Value::Tuple(items) => match index {
                Value::Int(i) => Ok(items[normalize_index(*i, items.len())?].clone()),
                Value::Slice(s) => {
                    let (start, stop, step) = slice_triple(s, items.len() as i64)?;
                    Ok(Value::Tuple(Rc::from(slice_collect(|i| &items[i], items.len(), start, stop, step))))
                }
                other => simple_raise(ExcType::TypeError, format!("tuple indices must be integers or slices, not {}", other.type_name())),
            },
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                match index {
                    Value::Int(i) => Ok(Value::Str(Rc::from(chars[normalize_index(*i, chars.len())?].to_string()))),
                    Value::Slice(slice) => {
                        let (start, stop, step) = slice_triple(slice, chars.len() as i64)?;
                        let owned: Vec<Value> = chars.iter().map(|c| Value::Str(Rc::from(c.to_string()))).collect();
                        let picked = slice_collect(|i| &owned[i], owned.len(), start, stop, step);
                        let text: String = picked
                            .into_iter()
                            .map(|v| match v {
                                Value::Str(s) => s.to_string(),
                                _ => unreachable!(),
                            })
                            .collect();
                        Ok(Value::Str(Rc::from(text)))
                    }
                    other => simple_raise(ExcType::TypeError, format!("string indices must be integers or slices, not {}", other.type_name())),
                }
            }
            Value::Bytes(b) => match index {
                Value::Int(i) => Ok(Value::Int(i64::from(b[normalize_index(*i, b.len())?]))),
                Value::Slice(slice) => {
                    let (start, stop, step) = slice_triple(slice, b.len() as i64)?;
                    let owned: Vec<Value> = b.iter().map(|byte| Value::Int(i64::from(*byte))).collect();
                    let picked = slice_collect(|i| &owned[i], owned.len(), start, stop, step);
                    let bytes: Vec<u8> = picked
                        .into_iter()
                        .map(|v| match v {
                            Value::Int(n) => n as u8,
                            _ => unreachable!(),
                        })
                        .collect();
                    Ok(Value::Bytes(Rc::from(bytes)))
                }
                other => simple_raise(ExcType::TypeError, format!("bytes indices must be integers or slices, not {}", other.type_name())),
            },
            Value::Range(r) => match index {
                Value::Int(i) => {
                    let idx = normalize_index(*i, r.len().max(0) as usize)?;
                    r.nth(idx as i64).map(Value::Int).ok_or(()).or_else(|()| simple_raise(ExcType::IndexError, "range object index out of range"))
                }
                other => simple_raise(ExcType::TypeError, format!("range indices must be integers, not {}", other.type_name())),
            },
            Value::Dict(dict) => {
                let hash = index
                    .basic_hash()
                    .ok_or(())
                    .or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", index.type_name())))?;
                dict.borrow()
                    .get(hash, |k| key_eq(k, index))
                    .cloned()
                    .ok_or(())
                    .or_else(|()| simple_raise(ExcType::KeyError, format!("{index}")))
            }
            Value::Instance(_) => {
                let getitem = self.get_attr(container, crate::intern::dunder::GETITEM)?;
                self.call_value(getitem, vec![index.clone()], Vec::new())
            }
            other => simple_raise(ExcType::TypeError, format!("'{}' object is not subscriptable", other.type_name())),
        }
    }

    pub(crate) fn op_store_subscr(&mut self) -> RunResult<()> {
        let index = self.pop();
        let container = self.pop();
        let value = self.pop();
        self.subscr_set(&container, &index, value)
    }

    fn subscr_set(&mut self, container: &Value, index: &Value, value: Value) -> RunResult<()> {
        match container {
            Value::List(list) => {
                let mut items = list.borrow_mut();
                match index {
                    Value::Int(i) => {
                        let idx = normalize_index(*i, items.len())?;
                        items[idx] = value;
                        Ok(())
                    }
                    Value::Slice(s) => {
                        let (start, stop, step) = slice_triple(s, items.len() as i64)?;
                        if step != 1 {
                            return simple_raise(ExcType::ValueError, "extended slice assignment requires a matching-length sequence");
                        }
                        let Value::List(replacement) = value else {
                            return simple_raise(ExcType::TypeError, "can only assign an iterable to a slice");
                        };
                        let lo = start.clamp(0, items.len() as i64) as usize;
                        let hi = stop.clamp(lo as i64, items.len() as i64) as usize;
                        items.splice(lo..hi, replacement.borrow().iter().cloned());
                        Ok(())
                    }
                    other => simple_raise(ExcType::TypeError, format!("list indices must be integers or slices, not {}", other.type_name())),
                }
            }
            Value::Dict(dict) => {
                self.heap.charge_insert()?;
                let hash = index
                    .basic_hash()
                    .ok_or(())
                    .or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", index.type_name())))?;
                dict.borrow_mut().insert(hash, index.clone(), value, |k| key_eq(k, index));
                Ok(())
            }
            Value::Instance(_) => {
                let setitem = self.get_attr(container, crate::intern::dunder::SETITEM)?;
                self.call_value(setitem, vec![index.clone(), value], Vec::new())?;
                Ok(())
            }
            other => simple_raise(ExcType::TypeError, format!("'{}' object does not support item assignment", other.type_name())),
        }
    }

    pub(crate) fn op_delete_subscr(&mut self) -> RunResult<()> {
        let index = self.pop();
        let container = self.pop();
        match &container {
            Value::List(list) => {
                let mut items = list.borrow_mut();
                match &index {
                    Value::Int(i) => {
                        let idx = normalize_index(*i, items.len())?;
                        items.remove(idx);
                        Ok(())
                    }
                    other => simple_raise(ExcType::TypeError, format!("list indices must be integers, not {}", other.type_name())),
                }
            }
            Value::Dict(dict) => {
                let hash = index
                    .basic_hash()
                    .ok_or(())
                    .or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", index.type_name())))?;
                dict.borrow_mut()
                    .remove(hash, |k| key_eq(k, &index))
                    .map(|_| ())
                    .ok_or(())
                    .or_else(|()| simple_raise(ExcType::KeyError, format!("{index}")))
            }
            Value::Instance(_) => {
                let delitem = self.get_attr(&container, crate::intern::dunder::DELITEM)?;
                self.call_value(delitem, vec![index], Vec::new())?;
                Ok(())
            }
            other => simple_raise(ExcType::TypeError, format!("'{}' object doesn't support item deletion", other.type_name())),
        }
    }

    // ---- Iteration (§4.6) ----

    pub(crate) fn op_get_iter(&mut self) -> RunResult<()> {
        let value = self.pop();
        let iter = self.to_iterator(value)?;
        self.push(iter);
        Ok(())
    }

    /// `GET_ITER`'s dispatch rule: a value that's already its own iterator
    /// (a generator, or an instance exposing `__next__`) is returned
    /// unchanged; otherwise `__iter__` is called if present, and built-in
    /// sequences/dicts get a freshly allocated internal iterator.
    fn to_iterator(&mut self, value: Value) -> RunResult<Value> {
        match &value {
            Value::Generator(_) | Value::Iterator(_) => Ok(value),
            Value::Instance(inst) => {
                let class = inst.borrow().class.clone();
                if self.resolve_mro_attr(&class, crate::intern::dunder::NEXT).is_some() {
                    return Ok(value);
                }
                if self.resolve_mro_attr(&class, crate::intern::dunder::ITER).is_some() {
                    let iter_method = self.get_attr(&value, crate::intern::dunder::ITER)?;
                    return self.call_value(iter_method, Vec::new(), Vec::new());
                }
                simple_raise(ExcType::TypeError, format!("'{}' object is not iterable", value.type_name()))
            }
            Value::List(list) => Ok(wrap_iterator(IterKind::List { list: list.clone(), index: 0 })),
            Value::Tuple(items) => Ok(snapshot_iter(items.clone())),
            Value::Str(s) => Ok(snapshot_iter(s.chars().map(|c| Value::Str(Rc::from(c.to_string()))).collect())),
            Value::Bytes(b) => Ok(snapshot_iter(b.iter().map(|byte| Value::Int(i64::from(*byte))).collect())),
            Value::Dict(dict) => Ok(snapshot_iter(dict.borrow().iter().map(|(k, _)| k.clone()).collect())),
            Value::Set(set) => Ok(snapshot_iter(set.borrow().iter().cloned().collect())),
            Value::FrozenSet(set) => Ok(snapshot_iter(set.iter().cloned().collect())),
            Value::Range(r) => Ok(wrap_iterator(IterKind::Range { range: r.clone(), index: 0 })),
            other => simple_raise(ExcType::TypeError, format!("'{}' object is not iterable", other.type_name())),
        }
    }

    /// `FOR_ITER`: advances the iterator left on top of the stack by
    /// `GET_ITER`. On exhaustion, the iterator is discarded and control
    /// jumps to `end_ip`; on a produced value, the iterator is left in
    /// place underneath it for the next iteration.
    pub(crate) fn op_for_iter(&mut self, end_ip: u16) -> RunResult<()> {
        let iter_value = self.top().clone();
        match self.iterator_next(&iter_value)? {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => {
                self.pop();
                self.frames.last_mut().expect("frame").ip = end_ip as usize;
                Ok(())
            }
        }
    }

    /// Advances any iterator-protocol value one step. Shared by `FOR_ITER`
    /// and `YIELD_FROM`'s plain-iterable delegation path.
    pub(crate) fn iterator_next(&mut self, value: &Value) -> RunResult<Option<Value>> {
        match value {
            Value::Generator(gen) => self.generator_send(gen, Value::None),
            Value::Iterator(it) => self.advance_iterator(it),
            Value::Instance(_) => {
                let next = self.get_attr(value, crate::intern::dunder::NEXT)?;
                match self.call_value(next, Vec::new(), Vec::new()) {
                    Ok(v) => Ok(Some(v)),
                    Err(RunError::Raised(exc)) if exc.matches(ExcType::StopIteration) => Ok(None),
                    Err(other) => Err(other),
                }
            }
            other => simple_raise(ExcType::TypeError, format!("'{}' object is not an iterator", other.type_name())),
        }
    }

    fn advance_iterator(&mut self, it: &Shared<IteratorObj>) -> RunResult<Option<Value>> {
        let mut guard = it.borrow_mut();
        match &mut guard.kind {
            IterKind::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                if item.is_some() {
                    *index += 1;
                }
                Ok(item)
            }
            IterKind::Snapshot { items, index } => {
                let item = items.get(*index).cloned();
                if item.is_some() {
                    *index += 1;
                }
                Ok(item)
            }
            IterKind::Range { range, index } => {
                let item = range.nth(*index).map(Value::Int);
                if item.is_some() {
                    *index += 1;
                }
                Ok(item)
            }
        }
    }

    // ---- Structural pattern matching (§4.3) ----

    /// Peeks the match subject, pushing whether it is a sequence pattern
    /// target (`list`/`tuple`, never `str`/`bytes`) of exactly `len`
    /// elements.
    pub(crate) fn exec_match_sequence(&mut self, len: u16) {
        let subject = self.top();
        let matched = is_pattern_sequence(subject) && sequence_len(subject) == len as usize;
        self.push(Value::Bool(matched));
    }

    /// As `MATCH_SEQUENCE`, but for a pattern with a `*rest` capture: only a
    /// minimum length is required.
    pub(crate) fn exec_match_star(&mut self, min: u16) {
        let subject = self.top();
        let matched = is_pattern_sequence(subject) && sequence_len(subject) >= min as usize;
        self.push(Value::Bool(matched));
    }

    /// Pops the subject (already confirmed sequence-shaped by a prior
    /// `MATCH_STAR`) and pushes a single `(before, middle, after)` tuple:
    /// `before`/`after` are tuples of the fixed-length head/tail, `middle`
    /// is the list bound to the pattern's `*rest` name.
    pub(crate) fn exec_extract_star(&mut self, before_after: u16) {
        let before_n = (before_after & 0x00ff) as usize;
        let after_n = (before_after >> 8) as usize;
        let subject = self.pop();
        let mut items = sequence_items(&subject);
        let after: Vec<Value> = items.split_off(items.len().saturating_sub(after_n));
        let middle: Vec<Value> = items.split_off(before_n.min(items.len()));
        let before = items;
        self.push(Value::Tuple(Rc::from(vec![
            Value::Tuple(Rc::from(before)),
            Value::List(shared(middle)),
            Value::Tuple(Rc::from(after)),
        ])));
    }

    /// Peeks the subject, pushing whether it is a mapping pattern target
    /// (`dict`).
    pub(crate) fn exec_match_mapping(&mut self) {
        let matched = matches!(self.top(), Value::Dict(_));
        self.push(Value::Bool(matched));
    }

    /// Pops a tuple of constant key values, peeks the subject dict, and
    /// pushes either a tuple of the corresponding values (all keys present)
    /// or `None` (any key missing — the pattern doesn't match).
    pub(crate) fn exec_match_keys(&mut self, const_idx: u16) -> RunResult<()> {
        let keys = self.frames.last().expect("frame").code.constants[const_idx as usize].clone();
        let Value::Tuple(keys) = keys else {
            return Err(RunError::Internal("MATCH_KEYS constant is not a key tuple".into()));
        };
        let Value::Dict(dict) = self.top().clone() else {
            self.push(Value::None);
            return Ok(());
        };
        let dict = dict.borrow();
        let mut values = Vec::with_capacity(keys.len());
        for key in keys.iter() {
            let Some(hash) = key.basic_hash() else {
                self.push(Value::None);
                return Ok(());
            };
            match dict.get(hash, |k| key_eq(k, key)) {
                Some(value) => values.push(value.clone()),
                None => {
                    self.push(Value::None);
                    return Ok(());
                }
            }
        }
        self.push(Value::Tuple(Rc::from(values)));
        Ok(())
    }

    /// Peeks the subject dict, pushing a shallow copy for a `**rest`
    /// mapping-pattern capture to have keys deleted from as they're matched.
    pub(crate) fn exec_copy_dict(&mut self) -> RunResult<()> {
        let Value::Dict(dict) = self.top().clone() else {
            return Err(RunError::Internal("COPY_DICT target is not a dict".into()));
        };
        let mut copy = Dict::new();
        for (k, v) in dict.borrow().iter() {
            let hash = k.basic_hash().expect("dict keys are always hashable");
            copy.insert(hash, k.clone(), v.clone(), |existing| key_eq(existing, k));
        }
        self.push(Value::Dict(shared(copy)));
        Ok(())
    }

    /// Pops `cls` plus `count - 1` keyword-attribute-name strings, peeks
    /// the subject, and pushes a tuple of the matched attribute values (an
    /// `isinstance` check plus one `__match_args__`-free keyword-only
    /// reading of each named attribute) or `None` on any mismatch.
    pub(crate) fn exec_match_class(&mut self, count: u16) -> RunResult<()> {
        let kw_count = count.saturating_sub(1);
        let mut kw_names = self.pop_n(kw_count as usize);
        let cls_value = self.pop();
        let Value::Class(cls) = &cls_value else {
            return Err(RunError::Internal("MATCH_CLASS operand is not a class".into()));
        };
        let subject = self.top().clone();
        if !class_matches(&subject, cls) {
            self.push(Value::None);
            return Ok(());
        }
        let mut values = Vec::with_capacity(kw_names.len());
        for name in kw_names.drain(..) {
            let Value::Str(name) = name else {
                return Err(RunError::Internal("MATCH_CLASS keyword name is not a string".into()));
            };
            match self.get_attr(&subject, &name) {
                Ok(value) => values.push(value),
                Err(RunError::Raised(exc)) if exc.matches(ExcType::AttributeError) => {
                    self.push(Value::None);
                    return Ok(());
                }
                Err(other) => return Err(other),
            }
        }
        self.push(Value::Tuple(Rc::from(values)));
        Ok(())
    }

    /// Peeks the subject, pushing `len(subject)` — used by a pattern's
    /// `case [a, b, *_]` length guard ahead of `MATCH_STAR`.
    pub(crate) fn exec_get_len(&mut self) -> RunResult<()> {
        let subject = self.top().clone();
        let len = self.generic_len(&subject)?;
        self.push(Value::Int(len as i64));
        Ok(())
    }

    // ---- Import (§6) ----

    /// `IMPORT_NAME idx`: pops `fromlist` then `level` (the compiler always
    /// pushes both, mirroring the reference language's own calling
    /// convention, even though this engine's [`crate::loader::ModuleLoader`]
    /// hook ignores `fromlist` — resolution of an individual imported name
    /// is `IMPORT_FROM`'s job, not the loader's).
    pub(crate) fn op_import_name(&mut self, idx: u16) -> RunResult<()> {
        let _fromlist = self.pop();
        let level = match self.pop() {
            Value::Int(n) => n,
            _ => 0,
        };
        let name = self.frames.last().expect("frame").code.names[idx as usize].clone();
        let package = self.frames.last().expect("frame").globals.borrow().get("__package__").and_then(|v| match v {
            Value::Str(s) => Some(s.to_string()),
            _ => None,
        });
        let module = self.module_loader.resolve_and_load(&name, level, package.as_deref())?;
        self.push(module);
        Ok(())
    }

    /// `IMPORT_FROM idx`: peeks the module `IMPORT_NAME` left on the stack
    /// (kept there for any further `IMPORT_FROM` against the same module)
    /// and pushes `names[idx]` read off its namespace.
    pub(crate) fn op_import_from(&mut self, idx: u16) -> RunResult<()> {
        let name = self.frames.last().expect("frame").code.names[idx as usize].clone();
        let Value::Module(module) = self.top().clone() else {
            return Err(RunError::Internal("IMPORT_FROM target is not a module".into()));
        };
        let value = module
            .borrow()
            .namespace
            .borrow()
            .get(&name)
            .cloned()
            .ok_or(())
            .or_else(|()| simple_raise(ExcType::ImportError, format!("cannot import name '{name}'")))?;
        self.push(value);
        Ok(())
    }

    /// `IMPORT_STAR`: pops the module and copies every non-underscore-
    /// prefixed attribute into the importing frame's globals.
    pub(crate) fn op_import_star(&mut self) -> RunResult<()> {
        let value = self.pop();
        let Value::Module(module) = value else {
            return Err(RunError::Internal("IMPORT_STAR target is not a module".into()));
        };
        let entries: Vec<(Rc<str>, Value)> = module.borrow().namespace.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let frame = self.frames.last().expect("frame");
        let globals = frame.globals.clone();
        for (name, value) in entries {
            if !name.starts_with('_') {
                globals.borrow_mut().set(name, value);
            }
        }
        Ok(())
    }
}
