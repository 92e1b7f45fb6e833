//! Classes, instances, and the descriptor / attribute-resolution machinery
//! that sits on top of them (§4.5 of `SPEC_FULL.md`).

use std::rc::Rc;

use indexmap::IndexMap;

use crate::exception::{ExcType, RunResult, simple_raise};
use crate::resource::{MAX_INHERITANCE_DEPTH, MAX_MRO_LENGTH};
use crate::value::Value;

/// A user-defined (or built-in-shaped) class: name, bases, a computed MRO,
/// an attribute dict, and the bookkeeping descriptor resolution needs.
#[derive(Debug)]
pub struct Class {
    pub name: Rc<str>,
    pub bases: Vec<Value>,
    /// C3 linearization, `self` first, `object` last. Populated by
    /// [`compute_c3_mro`] at class-creation time.
    pub mro: Vec<Value>,
    pub attrs: IndexMap<Rc<str>, Value>,
    pub metaclass: Option<Value>,
    /// `Some(names)` when `__slots__` was declared: instances of this class
    /// have no attribute dict and writes outside the declared set raise
    /// `AttributeError`.
    pub slots: Option<Vec<Rc<str>>>,
}

impl Class {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>, bases: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            bases,
            mro: Vec::new(),
            attrs: IndexMap::new(),
            metaclass: None,
            slots: None,
        }
    }

    /// Looks up `name` in this class's own `attrs` only (no MRO walk).
    #[must_use]
    pub fn own_attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    /// True if any instance of this class has a dict (i.e. `__slots__` was
    /// not declared on this class or any ancestor). Slots-only classes
    /// never allocate a per-instance attribute dict.
    #[must_use]
    pub fn has_instance_dict(&self) -> bool {
        self.slots.is_none()
    }
}

/// An instance of a user-defined class: a back-reference to its class plus
/// either an attribute dict or a fixed slot-value vector, per §3's
/// `__slots__` invariant.
#[derive(Debug)]
pub struct Instance {
    pub class: Value,
    pub attrs: Option<IndexMap<Rc<str>, Value>>,
    pub slot_values: Option<IndexMap<Rc<str>, Value>>,
}

impl Instance {
    #[must_use]
    pub fn new(class: Value, has_dict: bool) -> Self {
        Self {
            class,
            attrs: has_dict.then(IndexMap::new),
            slot_values: (!has_dict).then(IndexMap::new),
        }
    }
}

/// A data descriptor: `(getter, setter, deleter, doc)`. Always takes
/// precedence over the instance dict during attribute read (§4.5 step 1).
#[derive(Debug, Clone)]
pub struct Property {
    pub getter: Option<Value>,
    pub setter: Option<Value>,
    pub deleter: Option<Value>,
    pub doc: Option<Rc<str>>,
}

impl Property {
    #[must_use]
    pub fn new(getter: Option<Value>) -> Self {
        Self { getter, setter: None, deleter: None, doc: None }
    }

    #[must_use]
    pub fn is_data_descriptor(&self) -> bool {
        // A `Property` always implements `__set__`/`__delete__` (they raise
        // `AttributeError` at call time if no setter/deleter was supplied),
        // so it is unconditionally a data descriptor.
        true
    }
}

/// The proxy `super()` returns: attribute lookup on it starts *after*
/// `start_class` in `instance`'s MRO (§4.5).
#[derive(Debug, Clone)]
pub struct SuperProxy {
    pub instance_or_class: Value,
    pub start_class: Value,
}

/// Computes the C3 linearization (MRO) for a class being defined with the
/// given direct bases. Same algorithm CPython has used since 2.3: merge the
/// bases' own MROs with the base list itself, repeatedly taking a "good
/// head" (a class absent from every other list's tail).
pub(crate) fn compute_c3_mro(self_value: &Value, bases: &[Value], mro_of: impl Fn(&Value) -> RunResult<Vec<Value>>, object_class: &Value) -> RunResult<Vec<Value>> {
    if bases.is_empty() {
        return Ok(vec![self_value.clone(), object_class.clone()]);
    }
    for base in bases {
        if base.identity_eq(self_value) {
            return simple_raise(ExcType::TypeError, "a class cannot inherit from itself");
        }
    }

    let mut linearizations: Vec<Vec<Value>> = Vec::with_capacity(bases.len() + 1);
    for base in bases {
        let lin = mro_of(base)?;
        if lin.len() > MAX_INHERITANCE_DEPTH {
            return simple_raise(
                ExcType::TypeError,
                format!("inheritance chain too deep (maximum depth {MAX_INHERITANCE_DEPTH})"),
            );
        }
        linearizations.push(lin);
    }
    linearizations.push(bases.to_vec());

    let mut result = vec![self_value.clone()];
    loop {
        linearizations.retain(|l| !l.is_empty());
        if linearizations.is_empty() {
            break;
        }

        let mut found = None;
        for lin in &linearizations {
            let candidate = &lin[0];
            let in_tail = linearizations.iter().any(|other| other[1..].iter().any(|v| v.identity_eq(candidate)));
            if !in_tail {
                found = Some(candidate.clone());
                break;
            }
        }

        match found {
            Some(next) => {
                result.push(next.clone());
                for lin in &mut linearizations {
                    if !lin.is_empty() && lin[0].identity_eq(&next) {
                        lin.remove(0);
                    }
                }
            }
            None => {
                return simple_raise(
                    ExcType::TypeError,
                    "cannot create a consistent method resolution order (MRO) for the given bases",
                );
            }
        }

        if result.len() > MAX_MRO_LENGTH {
            return simple_raise(ExcType::TypeError, "MRO exceeds maximum length");
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::shared;

    fn class_value(name: &str, bases: Vec<Value>) -> Value {
        Value::Class(shared(Class::new(name, bases)))
    }

    #[test]
    fn diamond_inheritance_linearizes_depth_first_left_to_right() {
        // class A; class B(A); class C(A); class D(B, C)
        let object_class = class_value("object", vec![]);
        let a = class_value("A", vec![object_class.clone()]);
        let mro_of = |v: &Value| -> RunResult<Vec<Value>> {
            if v.identity_eq(&a) {
                Ok(vec![a.clone(), object_class.clone()])
            } else if v.identity_eq(&object_class) {
                Ok(vec![object_class.clone()])
            } else {
                unreachable!()
            }
        };
        let b = class_value("B", vec![a.clone()]);
        let mro_b = compute_c3_mro(&b, &[a.clone()], mro_of, &object_class).unwrap();
        assert_eq!(mro_b.len(), 3);

        let c = class_value("C", vec![a.clone()]);
        let mro_of_bc = |v: &Value| -> RunResult<Vec<Value>> {
            if v.identity_eq(&b) {
                Ok(mro_b.clone())
            } else if v.identity_eq(&a) {
                Ok(vec![a.clone(), object_class.clone()])
            } else {
                unreachable!()
            }
        };
        let mro_c = compute_c3_mro(&c, &[a.clone()], mro_of_bc, &object_class).unwrap();

        let d = class_value("D", vec![b.clone(), c.clone()]);
        let mro_of_d = |v: &Value| -> RunResult<Vec<Value>> {
            if v.identity_eq(&b) {
                Ok(mro_b.clone())
            } else if v.identity_eq(&c) {
                Ok(mro_c.clone())
            } else {
                unreachable!()
            }
        };
        let mro_d = compute_c3_mro(&d, &[b.clone(), c.clone()], mro_of_d, &object_class).unwrap();
        let names: Vec<String> = mro_d
            .iter()
            .map(|v| match v {
                Value::Class(cls) => cls.borrow().name.to_string(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["D", "B", "C", "A", "object"]);
    }

    #[test]
    fn inconsistent_hierarchy_is_rejected() {
        let object_class = class_value("object", vec![]);
        let a = class_value("A", vec![object_class.clone()]);
        let b = class_value("B", vec![object_class.clone()]);
        // class C(A, B); class D(B, A) then class E(C, D) is inconsistent.
        let mro_of = |v: &Value| -> RunResult<Vec<Value>> {
            if v.identity_eq(&a) || v.identity_eq(&b) {
                Ok(vec![v.clone(), object_class.clone()])
            } else {
                unreachable!()
            }
        };
        let c = class_value("C", vec![a.clone(), b.clone()]);
        let mro_c = compute_c3_mro(&c, &[a.clone(), b.clone()], mro_of, &object_class).unwrap();
        let d = class_value("D", vec![b.clone(), a.clone()]);
        let mro_of2 = |v: &Value| -> RunResult<Vec<Value>> {
            if v.identity_eq(&a) || v.identity_eq(&b) {
                Ok(vec![v.clone(), object_class.clone()])
            } else {
                unreachable!()
            }
        };
        let mro_d = compute_c3_mro(&d, &[b.clone(), a.clone()], mro_of2, &object_class).unwrap();

        let mro_of3 = |v: &Value| -> RunResult<Vec<Value>> {
            if v.identity_eq(&c) {
                Ok(mro_c.clone())
            } else if v.identity_eq(&d) {
                Ok(mro_d.clone())
            } else {
                unreachable!()
            }
        };
        let result = compute_c3_mro(&class_value("E", vec![]), &[c, d], mro_of3, &object_class);
        assert!(result.is_err());
    }
}
