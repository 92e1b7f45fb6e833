//! Call binding (§4.4): `CALL`/`CALL_KW`/`CALL_EX`/`MAKE_FUNCTION`, and
//! `call_value` — the synchronous single-entry call path every other
//! opcode family (`with`'s `__exit__`, `for`'s `__next__`, an operator's
//! dunder fallback) goes through rather than re-deriving binding itself.

use std::rc::Rc;

use super::StepResult;
use crate::class::Instance;
use crate::exception::{ExcType, RunResult, simple_raise};
use crate::function::Function;
use crate::generator::GeneratorKind;
use crate::heap::shared;
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::Value;

/// What resolving a callable for a call produced: either an immediate
/// result computed without pushing a frame (a builtin, or a generator
/// constructor that only allocates), or a freshly pushed frame the
/// dispatch loop must drive to completion before the call opcode can
/// hand a value back to its caller.
pub(crate) enum CallOutcome {
    Immediate(Value),
    Pushed,
}

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    /// The single synchronous call entry point: binds `args`/`kwargs`
    /// against `callable` and drives it to completion, whatever kind of
    /// callable it turns out to be. Used by opcodes that need a call's
    /// result inline (`with`'s `__exit__`, iterator protocol fallbacks)
    /// rather than threading a `StepResult` back through `execute_one`.
    pub(crate) fn call_value(&mut self, callable: Value, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Value> {
        match self.dispatch_call(callable, args, kwargs)? {
            CallOutcome::Immediate(value) => Ok(value),
            CallOutcome::Pushed => self.drive_to_return(),
        }
    }

    /// Resolves `callable` against `args`/`kwargs` and either computes an
    /// immediate result or pushes a new frame (for a plain `Function`) —
    /// the frame is left on `self.frames` for the caller to drive.
    fn dispatch_call(&mut self, callable: Value, mut args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<CallOutcome> {
        match callable {
            Value::BuiltinFunc(b) => Ok(CallOutcome::Immediate(crate::builtins::call_builtin(self, b.id, b.name, args, kwargs)?)),
            Value::BoundMethod(bound) => {
                args.insert(0, bound.instance.clone());
                self.dispatch_call(bound.func.clone(), args, kwargs)
            }
            Value::ClassMethod(inner) => {
                // The receiver the descriptor protocol already bound is
                // irrelevant here — a bare `call_value` on a classmethod
                // value (rather than through attribute access) calls the
                // wrapped function unbound.
                self.dispatch_call((*inner).clone(), args, kwargs)
            }
            Value::StaticMethod(inner) => self.dispatch_call((*inner).clone(), args, kwargs),
            Value::Class(cls) => {
                let class_value = Value::Class(cls.clone());
                let new_fn = self.resolve_mro_attr(&class_value, crate::intern::dunder::NEW);
                let instance = if let Some(new_fn) = new_fn {
                    let mut new_args = args.clone();
                    new_args.insert(0, class_value.clone());
                    let result = self.call_value(new_fn, new_args, kwargs.clone())?;
                    // §4.4 step 1: `__new__` returning something that isn't
                    // an instance of the class being constructed (or a
                    // subclass) short-circuits construction — `__init__`
                    // is never called, and its result is the call's result.
                    if !super::compare::instance_is_a(&result, &cls) {
                        return Ok(CallOutcome::Immediate(result));
                    }
                    result
                } else {
                    let has_dict = cls.borrow().has_instance_dict();
                    self.heap.charge(std::mem::size_of::<Instance>())?;
                    Value::Instance(shared(Instance::new(class_value, has_dict)))
                };
                let init = self.resolve_mro_attr(&Value::Class(cls), crate::intern::dunder::INIT);
                if let Some(init) = init {
                    args.insert(0, instance.clone());
                    let _ = self.call_value(init, args, kwargs)?;
                }
                Ok(CallOutcome::Immediate(instance))
            }
            Value::Function(func) => self.call_function(func, args, kwargs),
            other => simple_raise(ExcType::TypeError, format!("'{}' object is not callable", other.type_name())),
        }
    }

    fn call_function(&mut self, func: Rc<Function>, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<CallOutcome> {
        self.heap.check_recursion_depth(self.frames.len())?;
        let locals = bind_arguments(&func, args, kwargs)?;
        if func.code.flags.is_generator || func.code.flags.is_coroutine {
            let kind = if func.code.flags.is_coroutine { GeneratorKind::Coroutine } else { GeneratorKind::Generator };
            let gen = Self::make_generator(kind, Value::Function(func), locals);
            return Ok(CallOutcome::Immediate(gen));
        }
        let cells = (0..func.code.cell_vars.len()).map(|_| shared(None)).chain(func.closure.iter().cloned()).collect();
        let frame = crate::frame::Frame::new(Rc::clone(&func.code), locals, cells, func.globals.clone(), Rc::clone(&self.builtins));
        self.tracer.on_frame_push(&frame.code.name.clone(), self.frames.len());
        self.frames.push(frame);
        Ok(CallOutcome::Pushed)
    }

    /// `CALL argc`: pops `argc` positional arguments then the callable.
    pub(crate) fn op_call(&mut self, argc: u16) -> RunResult<StepResult> {
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop());
        }
        args.reverse();
        let callable = self.pop();
        self.finish_call_opcode(callable, args, Vec::new())
    }

    /// `CALL_KW argc`: like `CALL`, but the top of stack before the
    /// callable is a tuple of the trailing `argc` arguments' keyword
    /// names (positional args precede them, unnamed).
    pub(crate) fn op_call_kw(&mut self, argc: u16) -> RunResult<StepResult> {
        let names_value = self.pop();
        let Value::Tuple(names) = names_value else {
            return Err(crate::exception::RunError::Internal("CALL_KW without a trailing keyword-name tuple".into()));
        };
        let mut all_args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            all_args.push(self.pop());
        }
        all_args.reverse();
        let split = all_args.len() - names.len();
        let kwargs = all_args
            .split_off(split)
            .into_iter()
            .zip(names.iter())
            .map(|(value, name)| match name {
                Value::Str(s) => (Rc::clone(s), value),
                _ => (Rc::from(""), value),
            })
            .collect();
        let callable = self.pop();
        self.finish_call_opcode(callable, all_args, kwargs)
    }

    /// `CALL_EX flags`: `flags & 1` means a keyword-argument dict sits on
    /// top of the positional-arguments iterable (itself a tuple/list),
    /// which sits on top of the callable — `f(*args, **kwargs)`.
    pub(crate) fn op_call_ex(&mut self, flags: u16) -> RunResult<StepResult> {
        let kwargs = if flags & 1 != 0 {
            let dict_value = self.pop();
            let Value::Dict(dict) = dict_value else {
                return simple_raise(ExcType::TypeError, "argument after ** must be a mapping");
            };
            dict.borrow()
                .iter()
                .map(|(k, v)| match k {
                    Value::Str(s) => (Rc::clone(s), v.clone()),
                    _ => (Rc::from(""), v.clone()),
                })
                .collect()
        } else {
            Vec::new()
        };
        let args_value = self.pop();
        let args = match args_value {
            Value::Tuple(items) => items.to_vec(),
            Value::List(list) => list.borrow().clone(),
            other => return simple_raise(ExcType::TypeError, format!("argument after * must be an iterable, not '{}'", other.type_name())),
        };
        let callable = self.pop();
        self.finish_call_opcode(callable, args, kwargs)
    }

    fn finish_call_opcode(&mut self, callable: Value, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<StepResult> {
        match self.dispatch_call(callable, args, kwargs)? {
            CallOutcome::Immediate(value) => {
                self.push(value);
                Ok(StepResult::Continue)
            }
            CallOutcome::Pushed => match self.drive_to_return() {
                Ok(value) => {
                    self.push(value);
                    Ok(StepResult::Continue)
                }
                Err(err) => Err(err),
            },
        }
    }

    /// `LOAD_METHOD idx` / `CALL_METHOD argc`'s call half: `LOAD_METHOD`
    /// already pushed `(bound_or_unbound_callable, receiver_marker)`
    /// beneath the arguments (mirroring CPython's own optimization), so
    /// this pops `argc` args, the marker, and the callable in that order.
    pub(crate) fn op_call_method(&mut self, argc: u16) -> RunResult<StepResult> {
        let mut args = Vec::with_capacity(argc as usize);
        for _ in 0..argc {
            args.push(self.pop());
        }
        args.reverse();
        let receiver_marker = self.pop();
        let callable = self.pop();
        if !matches!(receiver_marker, Value::Undefined) {
            args.insert(0, receiver_marker);
        }
        self.finish_call_opcode(callable, args, Vec::new())
    }

    /// `MAKE_FUNCTION flags`: pops, in this order, `code` (always), then
    /// a `defaults` tuple if `flags & 1`, a `kwdefaults` dict if
    /// `flags & 2`, and a `closure` tuple of cells if `flags & 4`.
    pub(crate) fn op_make_function(&mut self, flags: u16) -> RunResult<()> {
        let code_value = self.pop();
        let Value::Code(code) = code_value else {
            return Err(crate::exception::RunError::Internal("MAKE_FUNCTION without a code object on the stack".into()));
        };
        let defaults = if flags & 1 != 0 {
            match self.pop() {
                Value::Tuple(items) => items.to_vec(),
                _ => return Err(crate::exception::RunError::Internal("MAKE_FUNCTION defaults flag set without a tuple".into())),
            }
        } else {
            Vec::new()
        };
        let kwdefaults = if flags & 2 != 0 {
            match self.pop() {
                Value::Dict(dict) => dict
                    .borrow()
                    .iter()
                    .map(|(k, v)| match k {
                        Value::Str(s) => (Rc::clone(s), v.clone()),
                        _ => (Rc::from(""), v.clone()),
                    })
                    .collect(),
                _ => return Err(crate::exception::RunError::Internal("MAKE_FUNCTION kwdefaults flag set without a dict".into())),
            }
        } else {
            Vec::new()
        };
        let closure = if flags & 4 != 0 {
            match self.pop() {
                Value::Tuple(cells) => cells
                    .iter()
                    .map(|v| match v {
                        Value::Cell(cell) => cell.clone(),
                        _ => shared(None),
                    })
                    .collect(),
                _ => return Err(crate::exception::RunError::Internal("MAKE_FUNCTION closure flag set without a tuple".into())),
            }
        } else {
            Vec::new()
        };
        let globals = self.frames.last().expect("frame").globals.clone();
        let mut func = Function::new(code.name.clone(), code, globals);
        func.defaults = defaults;
        func.kwdefaults = kwdefaults;
        func.closure = closure;
        self.heap.charge(std::mem::size_of::<Function>())?;
        self.push(Value::Function(Rc::new(func)));
        Ok(())
    }

    /// `YIELD_FROM`: delegates to a sub-generator (or exhausts a plain
    /// iterable in one step, a documented simplification — see
    /// `DESIGN.md`) by rewinding `ip` back onto this instruction so the
    /// next resume re-executes it, until the delegate is exhausted.
    pub(crate) fn op_yield_from(&mut self) -> RunResult<StepResult> {
        let delegate = self.pop();
        match &delegate {
            Value::Generator(gen) => match self.generator_send(gen, Value::None)? {
                Some(value) => {
                    let frame = self.frames.last_mut().expect("frame");
                    frame.ip -= 1;
                    frame.push(delegate);
                    Ok(StepResult::Yielded(value))
                }
                None => {
                    self.push(Value::None);
                    Ok(StepResult::Continue)
                }
            },
            _ => match self.iterator_next(&delegate)? {
                Some(value) => {
                    let frame = self.frames.last_mut().expect("frame");
                    frame.ip -= 1;
                    frame.push(delegate);
                    Ok(StepResult::Yielded(value))
                }
                None => {
                    self.push(Value::None);
                    Ok(StepResult::Continue)
                }
            },
        }
    }
}

/// Binds positional/keyword arguments against a function's declared
/// parameters (§4.4): fixed positional slots, `*args`, keyword-only
/// slots, `**kwargs`, then defaults for anything left unfilled.
fn bind_arguments(func: &Function, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Vec<Value>> {
    let code = &func.code;
    let flags = &code.flags;
    let positional_count = flags.positional_count as usize;
    let keyword_only_count = flags.keyword_only_count as usize;
    let mut locals = vec![Value::Undefined; code.local_count()];

    let positional_supplied = args.len().min(positional_count);
    for (slot, value) in args.iter().take(positional_supplied).enumerate() {
        locals[slot] = value.clone();
    }

    let mut varargs_tail = Vec::new();
    if args.len() > positional_count {
        if flags.has_varargs {
            varargs_tail = args[positional_count..].to_vec();
        } else {
            return simple_raise(
                ExcType::TypeError,
                format!("{}() takes {} positional argument(s) but {} were given", func.name, positional_count, args.len()),
            );
        }
    }

    let varargs_slot = if flags.has_varargs { Some(positional_count + keyword_only_count) } else { None };
    if let Some(slot) = varargs_slot {
        locals[slot] = Value::Tuple(Rc::from(varargs_tail));
    }

    let varkw_slot = if flags.has_varkeywords {
        Some(positional_count + keyword_only_count + usize::from(flags.has_varargs))
    } else {
        None
    };
    let mut varkw_dict = crate::heap::Dict::new();

    for (name, value) in kwargs {
        if let Some(slot) = code.var_names.iter().position(|n| n.as_ref() == name.as_ref()) {
            if slot < positional_count + keyword_only_count && matches!(locals[slot], Value::Undefined) {
                locals[slot] = value;
                continue;
            }
            if slot < positional_count && !matches!(locals[slot], Value::Undefined) {
                return simple_raise(ExcType::TypeError, format!("{}() got multiple values for argument '{name}'", func.name));
            }
        }
        if varkw_slot.is_some() {
            let key = Value::Str(Rc::clone(&name));
            let hash = super::value_hash(&key);
            varkw_dict.insert(hash, key, value, |_| false);
        } else {
            return simple_raise(ExcType::TypeError, format!("{}() got an unexpected keyword argument '{name}'", func.name));
        }
    }
    if let Some(slot) = varkw_slot {
        locals[slot] = Value::Dict(shared(varkw_dict));
    }

    for (offset, default) in func.defaults.iter().enumerate() {
        let slot = positional_count - func.defaults.len() + offset;
        if matches!(locals[slot], Value::Undefined) {
            locals[slot] = default.clone();
        }
    }
    for (name, default) in &func.kwdefaults {
        if let Some(slot) = code.var_names.iter().position(|n| n.as_ref() == name.as_ref())
            && matches!(locals[slot], Value::Undefined)
        {
            locals[slot] = default.clone();
        }
    }

    for slot in 0..positional_count + keyword_only_count {
        if matches!(locals[slot], Value::Undefined) {
            return simple_raise(ExcType::TypeError, format!("{}() missing required argument '{}'", func.name, code.var_names[slot]));
        }
    }

    Ok(locals)
}

/// Walks `class_value`'s MRO for `name`, returning the first match —
/// used for `__init__`/`__new__` resolution during instance construction.
/// Lives here (not `attr.rs`) because only the constructor call path
/// needs a name-only lookup with no instance-binding step.
impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    pub(crate) fn resolve_mro_attr(&self, class_value: &Value, name: &str) -> Option<Value> {
        let Value::Class(cls) = class_value else { return None };
        for ancestor in cls.borrow().mro.iter() {
            let Value::Class(ancestor_cls) = ancestor else { continue };
            if let Some(value) = ancestor_cls.borrow().own_attr(name) {
                return Some(value.clone());
            }
        }
        None
    }
}
