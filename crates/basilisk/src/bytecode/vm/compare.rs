//! `COMPARE_*`, `EXCEPTION_MATCH`, and the typed-compare superinstructions
//! (§4.3, §4.7).

use crate::bytecode::Opcode;
use crate::class::Class;
use crate::exception::{ExcType, Exception, RunResult, simple_raise};
use crate::heap::Shared;
use crate::intern::dunder;
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::Value;

/// `isinstance`-style check used by both `EXCEPTION_MATCH` and
/// `except*`'s partitioning: does `exc` match the type (or tuple of
/// types) `candidate` names?
pub(crate) fn exception_matches_value(exc: &Exception, candidate: &Value) -> bool {
    match candidate {
        Value::Tuple(items) => items.iter().any(|item| exception_matches_value(exc, item)),
        Value::Class(cls) => {
            if let Some(instance) = &exc.class_instance {
                return instance_is_a(instance, cls);
            }
            let Some(name) = class_exc_name(cls) else { return false };
            name.parse::<ExcType>().is_ok_and(|candidate_type| exc.exc_type.is_subtype_of(candidate_type))
        }
        _ => false,
    }
}

fn class_exc_name(cls: &Shared<Class>) -> Option<String> {
    Some(cls.borrow().name.to_string())
}

/// Walks `instance`'s class MRO looking for `target`, by identity.
pub(crate) fn instance_is_a(instance: &Value, target: &Shared<Class>) -> bool {
    let Value::Instance(inst) = instance else { return false };
    let class = inst.borrow().class.clone();
    let Value::Class(cls) = &class else { return false };
    cls.borrow().mro.iter().any(|ancestor| match ancestor {
        Value::Class(a) => std::rc::Rc::ptr_eq(a, target),
        _ => false,
    })
}

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    /// `EXCEPTION_MATCH`: pops the candidate type, peeks the exception
    /// value beneath it (left on the stack for the handler body), pushes
    /// the boolean result.
    pub(crate) fn exec_exception_match(&mut self) -> RunResult<()> {
        let candidate = self.pop();
        let exc_value = self.top().clone();
        let exc = self.value_to_exception(exc_value)?;
        self.push(Value::Bool(exception_matches_value(&exc, &candidate)));
        Ok(())
    }

    pub(crate) fn exec_compare(&mut self, opcode: Opcode) -> RunResult<()> {
        let b = self.pop();
        let a = self.pop();
        let result = self.compare_values(opcode, &a, &b)?;
        self.push(result);
        Ok(())
    }

    fn compare_values(&mut self, opcode: Opcode, a: &Value, b: &Value) -> RunResult<Value> {
        match opcode {
            Opcode::CompareIs => Ok(Value::Bool(a.identity_eq(b))),
            Opcode::CompareIsNot => Ok(Value::Bool(!a.identity_eq(b))),
            Opcode::CompareIn => self.contains(b, a),
            Opcode::CompareNotIn => match self.contains(b, a)? {
                Value::Bool(found) => Ok(Value::Bool(!found)),
                other => Ok(other),
            },
            Opcode::CompareEq => Ok(Value::Bool(self.values_equal(a, b)?)),
            Opcode::CompareNe => Ok(Value::Bool(!self.values_equal(a, b)?)),
            Opcode::CompareLt | Opcode::CompareLe | Opcode::CompareGt | Opcode::CompareGe => {
                if matches!(a, Value::Instance(_)) || matches!(b, Value::Instance(_)) {
                    let (forward, reflected) = match opcode {
                        Opcode::CompareLt => (dunder::LT, dunder::GT),
                        Opcode::CompareLe => (dunder::LE, dunder::GE),
                        Opcode::CompareGt => (dunder::GT, dunder::LT),
                        Opcode::CompareGe => (dunder::GE, dunder::LE),
                        _ => unreachable!(),
                    };
                    if let Some(result) = self.try_dunder_compare(forward, reflected, a, b)? {
                        return Ok(Value::Bool(result.is_truthy()));
                    }
                }
                let ordering = self.compare_ordered(a, b)?;
                Ok(Value::Bool(match opcode {
                    Opcode::CompareLt => ordering.is_lt(),
                    Opcode::CompareLe => ordering.is_le(),
                    Opcode::CompareGt => ordering.is_gt(),
                    Opcode::CompareGe => ordering.is_ge(),
                    _ => unreachable!(),
                }))
            }
            _ => unreachable!("compare_values called with a non-comparison opcode"),
        }
    }

    /// `==`/`!=` (§3): numeric tower compares across `Int`/`BigInt`/`Float`/
    /// `Bool`; containers compare elementwise; everything else falls back
    /// to identity, matching the built-in semantics the value model
    /// promises (user-defined `__eq__` overrides are resolved by `attr`'s
    /// dunder lookup before reaching this fallback, not within it).
    pub(crate) fn values_equal(&mut self, a: &Value, b: &Value) -> RunResult<bool> {
        use Value::{Bool as VBool, Dict, FrozenSet, List, Set, Tuple};
        Ok(match (a, b) {
            (VBool(x), VBool(y)) => x == y,
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x == y,
            (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => (*x as f64) == *y,
            (VBool(x), Value::Int(y)) | (Value::Int(y), VBool(x)) => i64::from(*x) == *y,
            (Value::BigInt(x), Value::BigInt(y)) => x == y,
            (Value::Str(x), Value::Str(y)) => x == y,
            (Value::Bytes(x), Value::Bytes(y)) => x == y,
            (Value::None, Value::None) => true,
            (Tuple(x), Tuple(y)) => {
                x.len() == y.len() && x.iter().zip(y.iter()).try_fold(true, |acc, (l, r)| Ok::<bool, crate::exception::RunError>(acc && self.values_equal(l, r)?))?
            }
            (List(x), List(y)) => {
                let (xb, yb) = (x.borrow(), y.borrow());
                xb.len() == yb.len() && xb.iter().zip(yb.iter()).try_fold(true, |acc, (l, r)| Ok::<bool, crate::exception::RunError>(acc && self.values_equal(l, r)?))?
            }
            (Dict(x), Dict(y)) => {
                let x_entries: Vec<(Value, Value)> = x.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let y_entries: Vec<(Value, Value)> = y.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                self.entry_lists_equal(&x_entries, &y_entries)?
            }
            (Set(x), Set(y)) => {
                let xs: Vec<Value> = x.borrow().iter().cloned().collect();
                let ys: Vec<Value> = y.borrow().iter().cloned().collect();
                self.value_lists_equal_unordered(&xs, &ys)?
            }
            (FrozenSet(x), FrozenSet(y)) => {
                let xs: Vec<Value> = x.iter().cloned().collect();
                let ys: Vec<Value> = y.iter().cloned().collect();
                self.value_lists_equal_unordered(&xs, &ys)?
            }
            (Value::Instance(_), _) | (_, Value::Instance(_)) => {
                match self.try_dunder_compare(dunder::EQ, dunder::EQ, a, b)? {
                    Some(result) => result.is_truthy(),
                    None => a.identity_eq(b),
                }
            }
            _ => a.identity_eq(b),
        })
    }

    /// Tries `a.__op__(b)` then `b.__rop__(a)` for a rich-comparison opcode,
    /// the same unbound-call shape `binary.rs`'s arithmetic dunder fallback
    /// uses (`resolve_mro_attr` + `call_value` against `inst.borrow().class`).
    /// Either side resolving to `Value::NotImplemented` falls through to the
    /// next candidate instead of being treated as the final answer.
    fn try_dunder_compare(&mut self, forward: &str, reflected: &str, a: &Value, b: &Value) -> RunResult<Option<Value>> {
        if let Value::Instance(inst) = a {
            let class = inst.borrow().class.clone();
            if let Some(method) = self.resolve_mro_attr(&class, forward) {
                let result = self.call_value(method, vec![a.clone(), b.clone()], Vec::new())?;
                if !matches!(result, Value::NotImplemented) {
                    return Ok(Some(result));
                }
            }
        }
        if let Value::Instance(inst) = b {
            let class = inst.borrow().class.clone();
            if let Some(method) = self.resolve_mro_attr(&class, reflected) {
                let result = self.call_value(method, vec![b.clone(), a.clone()], Vec::new())?;
                if !matches!(result, Value::NotImplemented) {
                    return Ok(Some(result));
                }
            }
        }
        Ok(None)
    }

    fn entry_lists_equal(&mut self, x: &[(Value, Value)], y: &[(Value, Value)]) -> RunResult<bool> {
        if x.len() != y.len() {
            return Ok(false);
        }
        for (k, v) in x {
            let mut found = None;
            for (ok, ov) in y {
                if self.values_equal(k, ok)? {
                    found = Some(ov);
                    break;
                }
            }
            match found {
                Some(ov) if self.values_equal(v, ov)? => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    fn value_lists_equal_unordered(&mut self, x: &[Value], y: &[Value]) -> RunResult<bool> {
        if x.len() != y.len() {
            return Ok(false);
        }
        for v in x {
            let mut present = false;
            for ov in y {
                if self.values_equal(v, ov)? {
                    present = true;
                    break;
                }
            }
            if !present {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub(crate) fn compare_ordered(&mut self, a: &Value, b: &Value) -> RunResult<std::cmp::Ordering> {
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
            (Value::Float(x), Value::Float(y)) => x.partial_cmp(y).ok_or(()).or_else(|()| simple_raise(ExcType::ValueError, "cannot order NaN")),
            (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y).ok_or(()).or_else(|()| simple_raise(ExcType::ValueError, "cannot order NaN")),
            (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)).ok_or(()).or_else(|()| simple_raise(ExcType::ValueError, "cannot order NaN")),
            (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
            (Value::Bytes(x), Value::Bytes(y)) => Ok(x.cmp(y)),
            (Value::Tuple(x), Value::Tuple(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    let ord = self.compare_ordered(l, r)?;
                    if ord != std::cmp::Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(x.len().cmp(&y.len()))
            }
            (Value::List(x), Value::List(y)) => {
                let (xb, yb) = (x.borrow().clone(), y.borrow().clone());
                for (l, r) in xb.iter().zip(yb.iter()) {
                    let ord = self.compare_ordered(l, r)?;
                    if ord != std::cmp::Ordering::Equal {
                        return Ok(ord);
                    }
                }
                Ok(xb.len().cmp(&yb.len()))
            }
            _ => simple_raise(ExcType::TypeError, format!("'<' not supported between instances of '{}' and '{}'", a.type_name(), b.type_name())),
        }
    }

    /// `COMPARE_IN`/`COMPARE_NOT_IN`'s underlying membership test.
    fn contains(&mut self, container: &Value, item: &Value) -> RunResult<Value> {
        match container {
            Value::Str(s) => {
                let Value::Str(needle) = item else {
                    return simple_raise(ExcType::TypeError, "'in <string>' requires string as left operand");
                };
                Ok(Value::Bool(s.contains(needle.as_ref())))
            }
            Value::Bytes(b) => {
                let Value::Bytes(needle) = item else {
                    return simple_raise(ExcType::TypeError, "a bytes-like object is required");
                };
                Ok(Value::Bool(needle.is_empty() || b.windows(needle.len().max(1)).any(|w| w == needle.as_ref())))
            }
            Value::Tuple(items) => {
                for v in items.iter() {
                    if self.values_equal(v, item)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Value::List(list) => {
                let items = list.borrow().clone();
                for v in items.iter() {
                    if self.values_equal(v, item)? {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Value::Range(range) => {
                let Value::Int(n) = item else { return Ok(Value::Bool(false)) };
                Ok(Value::Bool((0..range.len()).any(|i| range.nth(i) == Some(*n))))
            }
            Value::Dict(dict) => {
                let hash = item.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", item.type_name())))?;
                Ok(Value::Bool(dict.borrow().contains(hash, |k| crate::heap::key_eq(k, item))))
            }
            Value::Set(set) => {
                let hash = item.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", item.type_name())))?;
                Ok(Value::Bool(set.borrow().contains(hash, |k| crate::heap::key_eq(k, item))))
            }
            Value::FrozenSet(set) => {
                let hash = item.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", item.type_name())))?;
                Ok(Value::Bool(set.contains(hash, |k| crate::heap::key_eq(k, item))))
            }
            other => simple_raise(ExcType::TypeError, format!("argument of type '{}' is not iterable", other.type_name())),
        }
    }

    pub(crate) fn exec_typed_compare(&mut self, opcode: Opcode) -> RunResult<()> {
        let b = self.pop();
        let a = self.pop();
        let (Value::Int(x), Value::Int(y)) = (&a, &b) else {
            let generic_op = match opcode {
                Opcode::CompareLtInt => Opcode::CompareLt,
                Opcode::CompareLeInt => Opcode::CompareLe,
                Opcode::CompareGtInt => Opcode::CompareGt,
                Opcode::CompareGeInt => Opcode::CompareGe,
                Opcode::CompareEqInt => Opcode::CompareEq,
                Opcode::CompareNeInt => Opcode::CompareNe,
                _ => unreachable!(),
            };
            let result = self.compare_values(generic_op, &a, &b)?;
            self.push(result);
            return Ok(());
        };
        let result = match opcode {
            Opcode::CompareLtInt => x < y,
            Opcode::CompareLeInt => x <= y,
            Opcode::CompareGtInt => x > y,
            Opcode::CompareGeInt => x >= y,
            Opcode::CompareEqInt => x == y,
            Opcode::CompareNeInt => x != y,
            _ => unreachable!(),
        };
        self.push(Value::Bool(result));
        Ok(())
    }

    /// `COMPARE_AND_JUMP`/`COMPARE_LT_LOCAL_JUMP`: a fused typed-compare
    /// and conditional branch. Falls back to the plain typed compare (no
    /// branch) whenever the packed opcode isn't `CompareLtLocalJump`,
    /// since the generic `COMPARE_AND_JUMP` form carries its jump target
    /// in the full 16-bit operand rather than a packed field.
    pub(crate) fn exec_compare_and_jump(&mut self, opcode: Opcode, operand: u16) -> RunResult<()> {
        match opcode {
            Opcode::CompareLtLocalJump => {
                let b = self.pop();
                let a = self.pop();
                let taken = match (&a, &b) {
                    (Value::Int(x), Value::Int(y)) => x < y,
                    _ if matches!(a, Value::Instance(_)) || matches!(b, Value::Instance(_)) => {
                        match self.try_dunder_compare(dunder::LT, dunder::GT, &a, &b)? {
                            Some(result) => result.is_truthy(),
                            None => self.compare_ordered(&a, &b)?.is_lt(),
                        }
                    }
                    _ => self.compare_ordered(&a, &b)?.is_lt(),
                };
                if taken {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                }
                Ok(())
            }
            Opcode::CompareAndJump => {
                let b = self.pop();
                let a = self.pop();
                let taken = if matches!(a, Value::Instance(_)) || matches!(b, Value::Instance(_)) {
                    match self.try_dunder_compare(dunder::LT, dunder::GT, &a, &b)? {
                        Some(result) => result.is_truthy(),
                        None => self.compare_ordered(&a, &b)?.is_lt(),
                    }
                } else {
                    self.compare_ordered(&a, &b)?.is_lt()
                };
                if taken {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                }
                Ok(())
            }
            _ => unreachable!(),
        }
    }
}
