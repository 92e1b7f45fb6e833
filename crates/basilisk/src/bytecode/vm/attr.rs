//! The attribute protocol (§4.5): `LOAD_ATTR`/`STORE_ATTR`/`DELETE_ATTR`,
//! `LOAD_METHOD`/`CALL_METHOD`'s lookup half, and `super()` resolution.

use std::rc::Rc;

use crate::class::{Instance, SuperProxy};
use crate::exception::{ExcType, RunResult, simple_raise};
use crate::object::{DescriptorKind, classify_descriptor};
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::Value;

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    /// `LOAD_ATTR idx`.
    pub(crate) fn op_load_attr(&mut self, idx: u16) -> RunResult<()> {
        let name = self.frames.last().expect("frame").code.names[idx as usize].clone();
        let receiver = self.pop();
        let value = self.get_attr(&receiver, &name)?;
        self.push(value);
        Ok(())
    }

    /// `STORE_ATTR idx`: pops `value` then `receiver`.
    pub(crate) fn op_store_attr(&mut self, idx: u16) -> RunResult<()> {
        let name = self.frames.last().expect("frame").code.names[idx as usize].clone();
        let receiver = self.pop();
        let value = self.pop();
        self.set_attr(&receiver, &name, value)
    }

    /// `DELETE_ATTR idx`.
    pub(crate) fn op_delete_attr(&mut self, idx: u16) -> RunResult<()> {
        let name = self.frames.last().expect("frame").code.names[idx as usize].clone();
        let receiver = self.pop();
        self.delete_attr(&receiver, &name)
    }

    /// `LOAD_METHOD idx`: pushes `(callable, receiver_or_undefined)`, the
    /// same convention `op_call_method` (`call.rs`) unpacks — `receiver`
    /// is `Value::Undefined` when `callable` is already a self-contained
    /// bound callable (a `BoundMethod`, or any attribute that wasn't a
    /// plain unbound `Function`/`BuiltinFunc` pulled straight off the
    /// class), and the actual instance otherwise.
    pub(crate) fn op_load_method(&mut self, idx: u16) -> RunResult<()> {
        let name = self.frames.last().expect("frame").code.names[idx as usize].clone();
        let receiver = self.pop();

        if let Value::Instance(inst) = &receiver
            && let Some(value) = inst.borrow().attrs.as_ref().and_then(|a| a.get(name.as_ref())).cloned()
        {
            self.push(value);
            self.push(Value::Undefined);
            return Ok(());
        }

        let class_value = self.class_of(&receiver);
        if let Some(class_value) = class_value {
            if let Some((value, descriptor)) = self.lookup_mro(&class_value, &name) {
                match descriptor {
                    DescriptorKind::Data => {
                        let bound = self.invoke_descriptor_get(&value, &receiver, &class_value)?;
                        self.push(bound);
                        self.push(Value::Undefined);
                        return Ok(());
                    }
                    DescriptorKind::NonData | DescriptorKind::NotADescriptor => {
                        if matches!(value, Value::Function(_) | Value::BuiltinFunc(_)) {
                            self.push(value);
                            self.push(receiver);
                            return Ok(());
                        }
                        let bound = self.invoke_descriptor_get(&value, &receiver, &class_value)?;
                        self.push(bound);
                        self.push(Value::Undefined);
                        return Ok(());
                    }
                }
            }
        }

        // Built-in types (str/list/dict/set/bytes/tuple/...) have no class
        // value of their own to walk an MRO over, so their method tables
        // (`builtins::methods`) are consulted directly as a last resort,
        // using the same unbound push convention as a plain `Function`.
        if let Some(static_name) = crate::builtins::lookup_method_name(receiver.type_name(), &name) {
            let builtin = Value::BuiltinFunc(Rc::new(crate::value::BuiltinFunction { name: static_name, id: crate::builtins::id::METHOD }));
            self.push(builtin);
            self.push(receiver);
            return Ok(());
        }

        simple_raise(ExcType::AttributeError, format!("'{}' object has no attribute '{name}'", receiver.type_name()))
    }

    /// The five-step read resolution: data descriptor on the type, then
    /// instance `__dict__`/slots, then non-data descriptor or plain class
    /// attribute, then `__getattr__` fallback (not yet supported — see
    /// `DESIGN.md`), else `AttributeError`.
    pub(crate) fn get_attr(&mut self, receiver: &Value, name: &str) -> RunResult<Value> {
        if let Value::Module(module) = receiver {
            let namespace = module.borrow().namespace.clone();
            if let Some(value) = namespace.borrow().get(name) {
                return Ok(value.clone());
            }
            return simple_raise(ExcType::AttributeError, format!("module '{}' has no attribute '{name}'", module.borrow().name));
        }
        if let Value::Super(proxy) = receiver {
            return self.super_get_attr(proxy, name);
        }

        let class_value = self.class_of(receiver);
        let class_lookup = class_value.as_ref().and_then(|c| self.lookup_mro(c, name));

        if let Some((value, DescriptorKind::Data)) = &class_lookup {
            return self.invoke_descriptor_get(value, receiver, class_value.as_ref().expect("class_lookup implies class_value"));
        }

        if let Value::Instance(inst) = receiver {
            let found = inst
                .borrow()
                .attrs
                .as_ref()
                .and_then(|a| a.get(name).cloned())
                .or_else(|| inst.borrow().slot_values.as_ref().and_then(|s| s.get(name).cloned()));
            if let Some(value) = found {
                return Ok(value);
            }
        }
        if let Value::Class(cls) = receiver {
            // Attribute access on the class object itself (not an
            // instance): metaclass data descriptors aside (not modeled),
            // a plain class-level lookup with no instance to bind to.
            if let Some(value) = cls.borrow().own_attr(name) {
                return Ok(value.clone());
            }
            for ancestor in cls.borrow().mro.iter().skip(1) {
                if let Value::Class(a) = ancestor
                    && let Some(value) = a.borrow().own_attr(name)
                {
                    return Ok(value.clone());
                }
            }
        }

        if let Some((value, _)) = class_lookup {
            return self.invoke_descriptor_get(&value, receiver, class_value.as_ref().expect("class_lookup implies class_value"));
        }

        simple_raise(ExcType::AttributeError, format!("'{}' object has no attribute '{name}'", receiver.type_name()))
    }

    /// Write resolution: a data descriptor's `__set__` takes precedence
    /// over the instance `__dict__`; otherwise the instance `__dict__` (or
    /// slot) is written directly, honoring `__slots__` (§3) by rejecting
    /// an undeclared name.
    pub(crate) fn set_attr(&mut self, receiver: &Value, name: &Rc<str>, value: Value) -> RunResult<()> {
        if let Value::Module(module) = receiver {
            module.borrow().namespace.borrow_mut().set(Rc::clone(name), value);
            return Ok(());
        }

        let class_value = self.class_of(receiver);
        if let Some(class_value) = &class_value
            && let Some((descriptor_value, DescriptorKind::Data)) = self.lookup_mro(class_value, name)
            && let Value::Property(prop) = &descriptor_value
        {
            let setter = prop.borrow().setter.clone();
            return match setter {
                Some(setter) => {
                    self.call_value(setter, vec![receiver.clone(), value], Vec::new())?;
                    Ok(())
                }
                None => simple_raise(ExcType::AttributeError, format!("property '{name}' has no setter")),
            };
        }

        match receiver {
            Value::Instance(inst) => {
                let mut inst = inst.borrow_mut();
                if let Some(attrs) = &mut inst.attrs {
                    attrs.insert(Rc::clone(name), value);
                    Ok(())
                } else if let Some(slots) = &mut inst.slot_values {
                    if slots.contains_key(name.as_ref()) || class_declares_slot(&inst.class, name) {
                        slots.insert(Rc::clone(name), value);
                        Ok(())
                    } else {
                        simple_raise(ExcType::AttributeError, format!("'{}' object has no attribute '{name}'", inst.class_type_name()))
                    }
                } else {
                    unreachable!("Instance always has either attrs or slot_values")
                }
            }
            Value::Class(cls) => {
                cls.borrow_mut().attrs.insert(Rc::clone(name), value);
                Ok(())
            }
            other => simple_raise(ExcType::AttributeError, format!("'{}' object attribute '{name}' is read-only", other.type_name())),
        }
    }

    /// `DELETE_ATTR`: symmetric with `set_attr`, minus descriptor-setter
    /// handling (a `Property` deleter, if declared, runs instead).
    pub(crate) fn delete_attr(&mut self, receiver: &Value, name: &str) -> RunResult<()> {
        let class_value = self.class_of(receiver);
        if let Some(class_value) = &class_value
            && let Some((descriptor_value, DescriptorKind::Data)) = self.lookup_mro(class_value, name)
            && let Value::Property(prop) = &descriptor_value
        {
            let deleter = prop.borrow().deleter.clone();
            return match deleter {
                Some(deleter) => {
                    self.call_value(deleter, vec![receiver.clone()], Vec::new())?;
                    Ok(())
                }
                None => simple_raise(ExcType::AttributeError, format!("property '{name}' has no deleter")),
            };
        }
        match receiver {
            Value::Instance(inst) => {
                let mut inst = inst.borrow_mut();
                let removed = if let Some(attrs) = &mut inst.attrs {
                    attrs.shift_remove(name)
                } else if let Some(slots) = &mut inst.slot_values {
                    slots.shift_remove(name)
                } else {
                    None
                };
                match removed {
                    Some(_) => Ok(()),
                    None => simple_raise(ExcType::AttributeError, format!("'{}' object has no attribute '{name}'", inst.class_type_name())),
                }
            }
            other => simple_raise(ExcType::AttributeError, format!("'{}' object attribute '{name}' cannot be deleted", other.type_name())),
        }
    }

    /// The `Value::Class` a receiver is an instance of, for MRO lookup
    /// purposes. Built-in (non-`Instance`) values have no user-visible
    /// class object in this engine, so attribute access on them only ever
    /// sees their own fields (handled by the callers above), not a
    /// class-level descriptor.
    fn class_of(&self, receiver: &Value) -> Option<Value> {
        match receiver {
            Value::Instance(inst) => Some(inst.borrow().class.clone()),
            Value::Class(_) => None,
            _ => None,
        }
    }

    /// Walks `class_value`'s MRO for `name`, returning the attribute and
    /// its descriptor classification.
    fn lookup_mro(&self, class_value: &Value, name: &str) -> Option<(Value, DescriptorKind)> {
        let Value::Class(cls) = class_value else { return None };
        for ancestor in cls.borrow().mro.iter() {
            let Value::Class(a) = ancestor else { continue };
            if let Some(value) = a.borrow().own_attr(name) {
                return Some((value.clone(), classify_descriptor(value)));
            }
        }
        None
    }

    /// Invokes a descriptor's `__get__`: a `Property`'s getter called with
    /// `receiver`, or a plain `Function`/`BuiltinFunc` bound into a
    /// `BoundMethod` (classmethods bind to the class, staticmethods don't
    /// bind at all).
    fn invoke_descriptor_get(&mut self, descriptor: &Value, receiver: &Value, class_value: &Value) -> RunResult<Value> {
        match descriptor {
            Value::Property(prop) => {
                let getter = prop.borrow().getter.clone();
                match getter {
                    Some(getter) => self.call_value(getter, vec![receiver.clone()], Vec::new()),
                    None => simple_raise(ExcType::AttributeError, "unreadable attribute"),
                }
            }
            Value::Function(_) | Value::BuiltinFunc(_) => {
                Ok(Value::BoundMethod(Rc::new(crate::function::BoundMethod { func: descriptor.clone(), instance: receiver.clone() })))
            }
            Value::ClassMethod(inner) => Ok(Value::BoundMethod(Rc::new(crate::function::BoundMethod { func: (**inner).clone(), instance: class_value.clone() }))),
            Value::StaticMethod(inner) => Ok((**inner).clone()),
            other => Ok(other.clone()),
        }
    }

    /// `super()`/`super(Cls, obj)` attribute reads: resolution starts
    /// immediately after `start_class` in `instance_or_class`'s MRO.
    fn super_get_attr(&mut self, proxy: &SuperProxy, name: &str) -> RunResult<Value> {
        let mro = match &proxy.instance_or_class {
            Value::Instance(inst) => match &inst.borrow().class {
                Value::Class(cls) => cls.borrow().mro.clone(),
                _ => unreachable!("Instance::class always holds a Value::Class"),
            },
            Value::Class(cls) => cls.borrow().mro.clone(),
            _ => Vec::new(),
        };
        let start = mro.iter().position(|v| v.identity_eq(&proxy.start_class)).map_or(0, |idx| idx + 1);
        for ancestor in &mro[start.min(mro.len())..] {
            let Value::Class(a) = ancestor else { continue };
            if let Some(value) = a.borrow().own_attr(name) {
                return self.invoke_descriptor_get(value, &proxy.instance_or_class, ancestor);
            }
        }
        simple_raise(ExcType::AttributeError, format!("'super' object has no attribute '{name}'"))
    }
}

fn class_declares_slot(class_value: &Value, name: &str) -> bool {
    let Value::Class(cls) = class_value else { return false };
    let cls = cls.borrow();
    if let Some(slots) = &cls.slots
        && slots.iter().any(|s| s.as_ref() == name)
    {
        return true;
    }
    cls.mro.iter().skip(1).any(|ancestor| {
        let Value::Class(a) = ancestor else { return false };
        a.borrow().slots.as_ref().is_some_and(|slots| slots.iter().any(|s| s.as_ref() == name))
    })
}

impl Instance {
    fn class_type_name(&self) -> Rc<str> {
        match &self.class {
            Value::Class(cls) => cls.borrow().name.clone(),
            _ => unreachable!("Instance::class always holds a Value::Class"),
        }
    }
}
