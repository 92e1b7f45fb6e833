//! The builtin dispatch table (§4.10): global functions (`print`, `len`,
//! `isinstance`, ...), per-type method tables for built-in containers and
//! scalars, and `__build_class__`, the hook `LOAD_BUILD_CLASS` pushes and
//! every `class` statement's compiled body calls through.
//!
//! A [`crate::value::BuiltinFunction`] carries a `name` and an `id`; `id`
//! picks the *category* (build-class, global function, or built-in method)
//! and `name` — already a `&'static str` pulled from one of the tables
//! below — drives the actual dispatch within that category. This keeps the
//! category switch dense (three arms) without needing a second numeric id
//! per method name, at the cost of a linear name compare within a type's
//! method table; tables are small enough (a dozen-odd entries) that this
//! never shows up next to the cost of the call itself.

mod methods;

use std::rc::Rc;

use crate::class::Class;
use crate::exception::{ExcType, RunResult, simple_raise};
use crate::frame::Frame;
use crate::function::Function;
use crate::heap::{Shared, shared};
use crate::object::Namespace;
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::{BuiltinFunction, Value};

pub(crate) use methods::lookup_method_name;

/// Categories a [`BuiltinFunction::id`] distinguishes. `call_builtin`
/// switches on these; everything finer-grained switches on `name`.
pub(crate) mod id {
    pub(crate) const BUILD_CLASS: u32 = 0;
    pub(crate) const GLOBAL: u32 = 1;
    pub(crate) const METHOD: u32 = 2;
}

/// Installs every global builtin (`print`, `len`, `isinstance`, ...) into
/// `namespace`, the way a host wires up [`Vm::builtins`] before running a
/// module. Exposed so embedding hosts don't have to hand-enumerate the
/// table themselves.
pub fn install_globals(namespace: &Shared<Namespace>) {
    let mut ns = namespace.borrow_mut();
    for &name in GLOBAL_NAMES {
        ns.set(Rc::from(name), Value::BuiltinFunc(Rc::new(BuiltinFunction { name, id: id::GLOBAL })));
    }
}

const GLOBAL_NAMES: &[&str] = &[
    "print", "len", "repr", "str", "int", "float", "bool", "isinstance", "issubclass", "type", "abs", "min", "max",
    "sum", "sorted", "list", "tuple", "dict", "set", "frozenset", "hash", "id", "callable", "getattr", "setattr",
    "hasattr", "iter", "next", "enumerate", "range", "reversed", "any", "all", "divmod", "pow", "round", "ord", "chr",
    "zip",
];

/// Dispatch entry point: the sole call site is `call.rs`'s
/// `dispatch_call`, reached whenever a `Value::BuiltinFunc` is called
/// directly. A bound built-in *method* call instead receives its receiver
/// as `args[0]`, inserted by `CALL_METHOD` the same way it binds a plain
/// unbound `Function`/`BuiltinFunc` pulled off an instance (see `attr.rs`).
pub(crate) fn call_builtin<T: ResourceTracker, R: VmTracer>(
    vm: &mut Vm<T, R>,
    builtin_id: u32,
    name: &'static str,
    args: Vec<Value>,
    kwargs: Vec<(Rc<str>, Value)>,
) -> RunResult<Value> {
    match builtin_id {
        id::BUILD_CLASS => build_class(vm, args, kwargs),
        id::GLOBAL => call_global(vm, name, args, kwargs),
        id::METHOD => call_method(vm, name, args, kwargs),
        _ => unreachable!("unknown builtin category"),
    }
}

/// `__build_class__(body, name, *bases, metaclass=None, **kwds)`: runs
/// `body` (the compiled class suite, a zero-argument function) in a fresh
/// namespace, computes the C3 MRO over `bases`, and assembles the result
/// into a `Class`. This is the one piece of class-construction machinery
/// `LOAD_BUILD_CLASS` assumes exists; nothing else in the engine builds a
/// `Class` value from scratch.
fn build_class<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, mut args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Value> {
    if args.len() < 2 {
        return simple_raise(ExcType::TypeError, "__build_class__: not enough arguments");
    }
    let body = args.remove(0);
    let name_value = args.remove(0);
    let Value::Str(name) = name_value else {
        return simple_raise(ExcType::TypeError, "__build_class__: name must be a str");
    };
    let Value::Function(func) = body else {
        return simple_raise(ExcType::TypeError, "__build_class__: expected a function for the class body");
    };
    for base in &args {
        if !matches!(base, Value::Class(_)) {
            return simple_raise(ExcType::TypeError, format!("__build_class__: bases must be classes, not '{}'", base.type_name()));
        }
    }
    let bases = args;
    let metaclass = kwargs.into_iter().find(|(k, _)| k.as_ref() == "metaclass").map(|(_, v)| v);

    let namespace = shared(Namespace::new());
    run_class_body(vm, &func, namespace.clone())?;

    vm.heap.charge(std::mem::size_of::<Class>())?;
    let class_shared = shared(Class::new(Rc::clone(&name), bases.clone()));
    let self_value = Value::Class(Rc::clone(&class_shared));

    let mro_of = |v: &Value| -> RunResult<Vec<Value>> {
        match v {
            Value::Class(c) => Ok(c.borrow().mro.clone()),
            other => simple_raise(ExcType::TypeError, format!("__build_class__: base must be a class, not '{}'", other.type_name())),
        }
    };
    let mro = crate::class::compute_c3_mro(&self_value, &bases, mro_of, &vm.object_class)?;

    {
        let mut cls = class_shared.borrow_mut();
        cls.mro = mro;
        for (attr_name, value) in namespace.borrow().iter() {
            cls.attrs.insert(Rc::clone(attr_name), value.clone());
        }
        cls.metaclass = metaclass;
    }
    Ok(self_value)
}

/// Runs a class body function in its own namespace: a fresh frame whose
/// `globals` *is* the class namespace (so `STORE_NAME` inside the suite
/// populates it directly) and whose `enclosing_globals` is the defining
/// module's globals, so names the suite merely reads (helper functions,
/// other module-level classes) still resolve.
fn run_class_body<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, func: &Rc<Function>, namespace: Shared<Namespace>) -> RunResult<()> {
    vm.heap.check_recursion_depth(vm.frames.len())?;
    let locals = vec![Value::Undefined; func.code.local_count()];
    let cells = (0..func.code.cell_vars.len()).map(|_| shared(None)).chain(func.closure.iter().cloned()).collect();
    let mut frame = Frame::new(Rc::clone(&func.code), locals, cells, namespace, Rc::clone(&vm.builtins));
    frame.enclosing_globals = Some(func.globals.clone());
    vm.tracer.on_frame_push(&frame.code.name.clone(), vm.frames.len());
    vm.frames.push(frame);
    vm.drive_to_return()?;
    Ok(())
}

/// Dispatches a named global builtin (`print`, `len`, ...). Split out from
/// [`call_builtin`] because the `GLOBAL` category needs the function's
/// `name`, not just its `id` — the `CALL`/`CALL_KW`/`CALL_EX` opcodes call
/// this directly for a `Value::BuiltinFunc` with `id == id::GLOBAL` rather
/// than going through `call_builtin`'s id-only switch.
pub(crate) fn call_global<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, name: &str, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Value> {
    match name {
        "print" => builtin_print(vm, &args, &kwargs),
        "len" => Ok(Value::Int(vm.generic_len(one_arg(&args, "len")?)? as i64)),
        "repr" => Ok(Value::Str(Rc::from(value_repr(vm, one_arg(&args, "repr")?)?))),
        "str" => Ok(Value::Str(Rc::from(builtin_str(vm, &args)?))),
        "int" => builtin_int(&args),
        "float" => builtin_float(&args),
        "bool" => Ok(Value::Bool(args.first().is_some_and(Value::is_truthy))),
        "isinstance" => builtin_isinstance(vm, &args),
        "issubclass" => builtin_issubclass(&args),
        "type" => builtin_type(vm, &args),
        "abs" => builtin_abs(&args),
        "min" => builtin_minmax(vm, args, kwargs, true),
        "max" => builtin_minmax(vm, args, kwargs, false),
        "sum" => builtin_sum(vm, args),
        "sorted" => builtin_sorted(vm, args, kwargs),
        "list" => Ok(Value::List(shared(builtin_iterable_items(vm, &args)?))),
        "tuple" => Ok(Value::Tuple(Rc::from(builtin_iterable_items(vm, &args)?))),
        "dict" => builtin_dict(vm, args),
        "set" => builtin_set(vm, &args),
        "frozenset" => builtin_frozenset(vm, &args),
        "hash" => builtin_hash(&args),
        "id" => Ok(Value::Int(one_arg(&args, "id")?.basic_hash().unwrap_or(0) as i64)),
        "callable" => Ok(Value::Bool(one_arg(&args, "callable")?.is_callable())),
        "getattr" => builtin_getattr(vm, args),
        "setattr" => builtin_setattr(vm, args),
        "hasattr" => builtin_hasattr(vm, args),
        "iter" => {
            let value = one_arg(&args, "iter")?.clone();
            vm.push(value);
            vm.op_get_iter()?;
            Ok(vm.pop())
        }
        "next" => builtin_next(vm, args),
        "enumerate" => builtin_enumerate(vm, args),
        "range" => builtin_range(&args),
        "reversed" => builtin_reversed(vm, &args),
        "any" => builtin_any_all(vm, args, true),
        "all" => builtin_any_all(vm, args, false),
        "divmod" => builtin_divmod(&args),
        "pow" => builtin_pow(&args),
        "round" => builtin_round(&args),
        "ord" => builtin_ord(&args),
        "chr" => builtin_chr(&args),
        "zip" => builtin_zip(vm, args),
        other => simple_raise(ExcType::NameError, format!("name '{other}' is not defined")),
    }
}

fn one_arg<'a>(args: &'a [Value], func: &str) -> RunResult<&'a Value> {
    args.first().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("{func}() takes exactly one argument (0 given)")))
}

fn builtin_print<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value], kwargs: &[(Rc<str>, Value)]) -> RunResult<Value> {
    let sep = kwarg_str(kwargs, "sep").unwrap_or_else(|| " ".to_string());
    let end = kwarg_str(kwargs, "end").unwrap_or_else(|| "\n".to_string());
    let mut out = String::new();
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            out.push_str(&sep);
        }
        out.push_str(&value_str(vm, arg)?);
    }
    out.push_str(&end);
    print!("{out}");
    Ok(Value::None)
}

fn kwarg_str(kwargs: &[(Rc<str>, Value)], name: &str) -> Option<String> {
    kwargs.iter().find(|(k, _)| k.as_ref() == name).map(|(_, v)| v.to_string())
}

/// `str(x)`: the guest-visible conversion. Resolves `__str__` on an
/// `Instance` (falling back to `__repr__`, matching `object.__str__`'s
/// default); for everything else, a proper recursive rendering rather than
/// `Value`'s own placeholder `Display` impl (`"[list]"`/`"{dict}"`), which
/// exists only for tracebacks and panics.
pub(crate) fn value_str<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, value: &Value) -> RunResult<String> {
    if let Value::Instance(inst) = value {
        let class = inst.borrow().class.clone();
        if let Some(method) = vm.resolve_mro_attr(&class, crate::intern::dunder::STR).or_else(|| vm.resolve_mro_attr(&class, crate::intern::dunder::REPR)) {
            let result = vm.call_value(method, vec![value.clone()], Vec::new())?;
            return Ok(result.to_string());
        }
    }
    if let Value::Str(s) = value {
        return Ok(s.to_string());
    }
    value_repr(vm, value)
}

fn builtin_str<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value]) -> RunResult<String> {
    match args.first() {
        Some(value) => value_str(vm, value),
        None => Ok(String::new()),
    }
}

/// `repr(x)`: quotes strings, recurses into containers element-wise,
/// resolves `__repr__` on an `Instance`, and falls back to `Value`'s
/// `Display` for everything scalar.
pub(crate) fn value_repr<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, value: &Value) -> RunResult<String> {
    match value {
        Value::Str(s) => Ok(format!("{:?}", s.as_ref())),
        Value::Instance(inst) => {
            let class = inst.borrow().class.clone();
            if let Some(method) = vm.resolve_mro_attr(&class, crate::intern::dunder::REPR) {
                let result = vm.call_value(method, vec![value.clone()], Vec::new())?;
                return Ok(result.to_string());
            }
            Ok(value.to_string())
        }
        Value::List(list) => {
            let items = list.borrow().clone();
            repr_sequence(vm, "[", "]", items.iter())
        }
        Value::Tuple(items) => {
            let body = repr_sequence(vm, "(", ")", items.iter())?;
            if items.len() == 1 { Ok(format!("({},)", &body[1..body.len() - 1])) } else { Ok(body) }
        }
        Value::Dict(dict) => {
            let entries: Vec<(Value, Value)> = dict.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let mut parts = Vec::with_capacity(entries.len());
            for (k, v) in &entries {
                parts.push(format!("{}: {}", value_repr(vm, k)?, value_repr(vm, v)?));
            }
            Ok(format!("{{{}}}", parts.join(", ")))
        }
        Value::Set(set) => {
            let items: Vec<Value> = set.borrow().iter().cloned().collect();
            if items.is_empty() {
                return Ok("set()".to_string());
            }
            repr_sequence(vm, "{", "}", items.iter())
        }
        Value::FrozenSet(set) => {
            let items: Vec<Value> = set.iter().cloned().collect();
            Ok(format!("frozenset({})", repr_sequence(vm, "{", "}", items.iter())?))
        }
        other => Ok(other.to_string()),
    }
}

fn repr_sequence<'a, T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, open: &str, close: &str, items: impl Iterator<Item = &'a Value>) -> RunResult<String> {
    let mut parts = Vec::new();
    for item in items {
        parts.push(value_repr(vm, item)?);
    }
    Ok(format!("{open}{}{close}", parts.join(", ")))
}

fn builtin_int(args: &[Value]) -> RunResult<Value> {
    match args.first() {
        None => Ok(Value::Int(0)),
        Some(Value::Int(i)) => Ok(Value::Int(*i)),
        Some(Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        Some(Value::Float(f)) => Ok(Value::Int(*f as i64)),
        Some(Value::Str(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Ok(Value::Int(i)),
            Err(_) => simple_raise(ExcType::ValueError, format!("invalid literal for int() with base 10: '{s}'")),
        },
        Some(other) => simple_raise(ExcType::TypeError, format!("int() argument must be a string or a number, not '{}'", other.type_name())),
    }
}

fn builtin_float(args: &[Value]) -> RunResult<Value> {
    match args.first() {
        None => Ok(Value::Float(0.0)),
        Some(Value::Float(f)) => Ok(Value::Float(*f)),
        Some(Value::Int(i)) => Ok(Value::Float(*i as f64)),
        Some(Value::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        Some(Value::Str(s)) => match s.trim().parse::<f64>() {
            Ok(f) => Ok(Value::Float(f)),
            Err(_) => simple_raise(ExcType::ValueError, format!("could not convert string to float: '{s}'")),
        },
        Some(other) => simple_raise(ExcType::TypeError, format!("float() argument must be a string or a number, not '{}'", other.type_name())),
    }
}

fn builtin_isinstance<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value]) -> RunResult<Value> {
    let (value, classes) = two_args(args, "isinstance")?;
    Ok(Value::Bool(matches_any_class(vm, value, classes)))
}

fn matches_any_class<T: ResourceTracker, R: VmTracer>(vm: &Vm<T, R>, value: &Value, classes: &Value) -> bool {
    match classes {
        Value::Tuple(items) => items.iter().any(|c| matches_any_class(vm, value, c)),
        Value::Class(target) => {
            if let Value::Instance(inst) = value {
                let class = inst.borrow().class.clone();
                if let Value::Class(cls) = &class {
                    return cls.borrow().mro.iter().any(|a| matches!(a, Value::Class(c) if Rc::ptr_eq(c, target)));
                }
            }
            value.type_name() == target.borrow().name.as_ref()
        }
        _ => false,
    }
}

fn builtin_issubclass(args: &[Value]) -> RunResult<Value> {
    let (value, classes) = two_args(args, "issubclass")?;
    let Value::Class(cls) = value else {
        return simple_raise(ExcType::TypeError, "issubclass() arg 1 must be a class");
    };
    let matches = |target: &Value| match target {
        Value::Class(target) => cls.borrow().mro.iter().any(|a| matches!(a, Value::Class(c) if Rc::ptr_eq(c, target))),
        _ => false,
    };
    let result = match classes {
        Value::Tuple(items) => items.iter().any(matches),
        other => matches(other),
    };
    Ok(Value::Bool(result))
}

fn two_args<'a>(args: &'a [Value], func: &str) -> RunResult<(&'a Value, &'a Value)> {
    if args.len() < 2 {
        return simple_raise(ExcType::TypeError, format!("{func}() takes exactly two arguments ({} given)", args.len()));
    }
    Ok((&args[0], &args[1]))
}

fn builtin_type<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value]) -> RunResult<Value> {
    let value = one_arg(args, "type")?;
    if let Value::Instance(inst) = value {
        return Ok(inst.borrow().class.clone());
    }
    if matches!(value, Value::Class(_)) {
        return Ok(vm.object_class.clone());
    }
    Ok(Value::Str(Rc::from(value.type_name())))
}

fn builtin_abs(args: &[Value]) -> RunResult<Value> {
    match one_arg(args, "abs")? {
        Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::BigInt(b) => Ok(Value::BigInt(Rc::new(num_traits::Signed::abs(b.as_ref())))),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        other => simple_raise(ExcType::TypeError, format!("bad operand type for abs(): '{}'", other.type_name())),
    }
}

fn builtin_minmax<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>, want_min: bool) -> RunResult<Value> {
    let key = kwargs.into_iter().find(|(k, _)| k.as_ref() == "key").map(|(_, v)| v);
    let items = if args.len() == 1 { vm.drain_iterable(args.into_iter().next().unwrap())? } else { args };
    if items.is_empty() {
        return simple_raise(ExcType::ValueError, if want_min { "min() arg is an empty sequence" } else { "max() arg is an empty sequence" });
    }
    let mut best = items[0].clone();
    let mut best_key = key_of(vm, &key, &best)?;
    for item in items.into_iter().skip(1) {
        let item_key = key_of(vm, &key, &item)?;
        let ord = vm.compare_ordered(&item_key, &best_key)?;
        if (want_min && ord.is_lt()) || (!want_min && ord.is_gt()) {
            best_key = item_key;
            best = item;
        }
    }
    Ok(best)
}

fn key_of<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, key: &Option<Value>, item: &Value) -> RunResult<Value> {
    match key {
        Some(f) => vm.call_value(f.clone(), vec![item.clone()], Vec::new()),
        None => Ok(item.clone()),
    }
}

fn builtin_sum<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, mut args: Vec<Value>) -> RunResult<Value> {
    if args.is_empty() {
        return simple_raise(ExcType::TypeError, "sum() takes at least one argument");
    }
    let start = if args.len() > 1 { args.remove(1) } else { Value::Int(0) };
    let items = vm.drain_iterable(args.remove(0))?;
    let mut acc = start;
    for item in items {
        vm.push(acc);
        vm.push(item);
        vm.exec_binary(crate::bytecode::Opcode::BinaryAdd, false)?;
        acc = vm.pop();
    }
    Ok(acc)
}

fn builtin_sorted<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Value> {
    let value = args.into_iter().next().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, "sorted() takes at least one argument"))?;
    let mut items = vm.drain_iterable(value)?;
    let key = kwargs.iter().find(|(k, _)| k.as_ref() == "key").map(|(_, v)| v.clone());
    let reverse = kwargs.iter().any(|(k, v)| k.as_ref() == "reverse" && v.is_truthy());
    sort_values(vm, &mut items, &key, reverse)?;
    Ok(Value::List(shared(items)))
}

/// Stable insertion sort driven by [`Vm::compare_ordered`], which can
/// raise (incomparable types, NaN ordering) — `Vec::sort_by`'s comparator
/// can't propagate a `Result`, so this threads one through by hand. Lists
/// are bounded by the configured collection-size ceiling, so the `O(n^2)`
/// cost never compounds into something a resource limit wouldn't already
/// have rejected.
pub(crate) fn sort_values<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, items: &mut Vec<Value>, key: &Option<Value>, reverse: bool) -> RunResult<()> {
    let mut keys = Vec::with_capacity(items.len());
    for item in items.iter() {
        keys.push(key_of(vm, key, item)?);
    }
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let ord = vm.compare_ordered(&keys[j - 1], &keys[j])?;
            let out_of_order = if reverse { ord.is_lt() } else { ord.is_gt() };
            if out_of_order {
                items.swap(j - 1, j);
                keys.swap(j - 1, j);
                j -= 1;
            } else {
                break;
            }
        }
    }
    Ok(())
}

fn builtin_iterable_items<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value]) -> RunResult<Vec<Value>> {
    match args.first() {
        Some(value) => vm.drain_iterable(value.clone()),
        None => Ok(Vec::new()),
    }
}

fn builtin_dict<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: Vec<Value>) -> RunResult<Value> {
    let mut dict = crate::heap::Dict::new();
    if let Some(value) = args.into_iter().next() {
        for pair in vm.drain_iterable(value)? {
            let Value::Tuple(kv) = &pair else {
                return simple_raise(ExcType::TypeError, "dict() update sequence element must be a 2-tuple");
            };
            if kv.len() != 2 {
                return simple_raise(ExcType::ValueError, "dict() update sequence element has wrong length");
            }
            let (k, v) = (kv[0].clone(), kv[1].clone());
            let hash = k.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", k.type_name())))?;
            let probe = k.clone();
            dict.insert(hash, k, v, |existing| crate::heap::key_eq(existing, &probe));
        }
    }
    Ok(Value::Dict(shared(dict)))
}

fn builtin_set<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value]) -> RunResult<Value> {
    let mut set = crate::heap::PySet::new();
    if let Some(value) = args.first() {
        for item in vm.drain_iterable(value.clone())? {
            let hash = item.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", item.type_name())))?;
            let probe = item.clone();
            set.insert(hash, item, |k| crate::heap::key_eq(k, &probe));
        }
    }
    Ok(Value::Set(shared(set)))
}

fn builtin_frozenset<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value]) -> RunResult<Value> {
    let Value::Set(set) = builtin_set(vm, args)? else { unreachable!() };
    let items: Vec<Value> = set.borrow().iter().cloned().collect();
    let mut frozen = crate::heap::PySet::new();
    for item in items {
        let hash = item.basic_hash().expect("already validated hashable by builtin_set");
        let probe = item.clone();
        frozen.insert(hash, item, |k| crate::heap::key_eq(k, &probe));
    }
    Ok(Value::FrozenSet(Rc::new(frozen)))
}

fn builtin_hash(args: &[Value]) -> RunResult<Value> {
    let value = one_arg(args, "hash")?;
    value.basic_hash().map(|h| Value::Int(h as i64)).ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", value.type_name())))
}

fn builtin_getattr<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, mut args: Vec<Value>) -> RunResult<Value> {
    if args.len() < 2 {
        return simple_raise(ExcType::TypeError, "getattr expected at least 2 arguments");
    }
    let default = (args.len() > 2).then(|| args.remove(2));
    let Value::Str(name) = args.remove(1) else {
        return simple_raise(ExcType::TypeError, "getattr(): attribute name must be string");
    };
    let receiver = args.remove(0);
    match vm.get_attr(&receiver, &name) {
        Ok(value) => Ok(value),
        Err(err) if default.is_some() => {
            let _ = err;
            Ok(default.unwrap())
        }
        Err(err) => Err(err),
    }
}

fn builtin_setattr<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, mut args: Vec<Value>) -> RunResult<Value> {
    if args.len() != 3 {
        return simple_raise(ExcType::TypeError, "setattr expected exactly 3 arguments");
    }
    let value = args.remove(2);
    let Value::Str(name) = args.remove(1) else {
        return simple_raise(ExcType::TypeError, "setattr(): attribute name must be string");
    };
    let receiver = args.remove(0);
    vm.set_attr(&receiver, &name, value)?;
    Ok(Value::None)
}

fn builtin_hasattr<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, mut args: Vec<Value>) -> RunResult<Value> {
    if args.len() != 2 {
        return simple_raise(ExcType::TypeError, "hasattr expected exactly 2 arguments");
    }
    let Value::Str(name) = args.remove(1) else {
        return simple_raise(ExcType::TypeError, "hasattr(): attribute name must be string");
    };
    let receiver = args.remove(0);
    Ok(Value::Bool(vm.get_attr(&receiver, &name).is_ok()))
}

fn builtin_next<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, mut args: Vec<Value>) -> RunResult<Value> {
    if args.is_empty() {
        return simple_raise(ExcType::TypeError, "next expected at least 1 argument");
    }
    let default = (args.len() > 1).then(|| args.remove(1));
    let it = args.remove(0);
    match vm.iterator_next(&it)? {
        Some(value) => Ok(value),
        None => match default {
            Some(value) => Ok(value),
            None => simple_raise(ExcType::StopIteration, "stop iteration"),
        },
    }
}

fn builtin_enumerate<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, mut args: Vec<Value>) -> RunResult<Value> {
    if args.is_empty() {
        return simple_raise(ExcType::TypeError, "enumerate expected at least 1 argument");
    }
    let start = if args.len() > 1 {
        match args.remove(1) {
            Value::Int(i) => i,
            _ => return simple_raise(ExcType::TypeError, "enumerate() start must be an int"),
        }
    } else {
        0
    };
    let items = vm.drain_iterable(args.remove(0))?;
    let pairs = items.into_iter().enumerate().map(|(i, v)| Value::Tuple(Rc::from(vec![Value::Int(start + i as i64), v]))).collect();
    Ok(Value::List(shared(pairs)))
}

fn builtin_range(args: &[Value]) -> RunResult<Value> {
    let as_int = |v: &Value, what: &str| match v {
        Value::Int(i) => Ok(*i),
        other => simple_raise(ExcType::TypeError, format!("'{}' object cannot be interpreted as an integer ({what})", other.type_name())),
    };
    let (start, stop, step) = match args.len() {
        1 => (0, as_int(&args[0], "stop")?, 1),
        2 => (as_int(&args[0], "start")?, as_int(&args[1], "stop")?, 1),
        3 => (as_int(&args[0], "start")?, as_int(&args[1], "stop")?, as_int(&args[2], "step")?),
        _ => return simple_raise(ExcType::TypeError, "range expected 1 to 3 arguments"),
    };
    if step == 0 {
        return simple_raise(ExcType::ValueError, "range() arg 3 must not be zero");
    }
    Ok(Value::Range(Rc::new(crate::heap::RangeValue { start, stop, step })))
}

fn builtin_reversed<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: &[Value]) -> RunResult<Value> {
    let mut items = builtin_iterable_items(vm, args)?;
    items.reverse();
    Ok(Value::List(shared(items)))
}

fn builtin_any_all<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: Vec<Value>, is_any: bool) -> RunResult<Value> {
    let value = one_arg(&args, if is_any { "any" } else { "all" })?.clone();
    let items = vm.drain_iterable(value)?;
    if is_any {
        Ok(Value::Bool(items.iter().any(Value::is_truthy)))
    } else {
        Ok(Value::Bool(items.iter().all(Value::is_truthy)))
    }
}

fn builtin_divmod(args: &[Value]) -> RunResult<Value> {
    let (a, b) = two_args(args, "divmod")?;
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            if *y == 0 {
                return simple_raise(ExcType::ZeroDivisionError, "integer division or modulo by zero");
            }
            Ok(Value::Tuple(Rc::from(vec![Value::Int(x.div_euclid(*y)), Value::Int(x.rem_euclid(*y))])))
        }
        _ => {
            let (x, y) = (as_f64(a)?, as_f64(b)?);
            if y == 0.0 {
                return simple_raise(ExcType::ZeroDivisionError, "float divmod()");
            }
            Ok(Value::Tuple(Rc::from(vec![Value::Float((x / y).floor()), Value::Float(x.rem_euclid(y))])))
        }
    }
}

fn as_f64(value: &Value) -> RunResult<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(f) => Ok(*f),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        other => simple_raise(ExcType::TypeError, format!("expected a number, got '{}'", other.type_name())),
    }
}

fn builtin_pow(args: &[Value]) -> RunResult<Value> {
    let (base, exp) = two_args(args, "pow")?;
    if let (Value::Int(b), Value::Int(e)) = (base, exp) && *e >= 0 {
        return Ok(Value::Int(b.wrapping_pow(*e as u32)));
    }
    Ok(Value::Float(as_f64(base)?.powf(as_f64(exp)?)))
}

fn builtin_round(args: &[Value]) -> RunResult<Value> {
    let value = one_arg(args, "round")?;
    let ndigits = args.get(1);
    let x = as_f64(value)?;
    match ndigits {
        None | Some(Value::None) => Ok(Value::Int(x.round_ties_even() as i64)),
        Some(Value::Int(n)) => {
            let factor = 10f64.powi(*n as i32);
            Ok(Value::Float((x * factor).round_ties_even() / factor))
        }
        Some(other) => simple_raise(ExcType::TypeError, format!("'{}' object cannot be interpreted as an integer", other.type_name())),
    }
}

fn builtin_ord(args: &[Value]) -> RunResult<Value> {
    let Value::Str(s) = one_arg(args, "ord")? else {
        return simple_raise(ExcType::TypeError, "ord() expected string of length 1");
    };
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Value::Int(c as i64)),
        _ => simple_raise(ExcType::TypeError, "ord() expected a character, but string of length != 1 found"),
    }
}

fn builtin_chr(args: &[Value]) -> RunResult<Value> {
    let Value::Int(i) = one_arg(args, "chr")? else {
        return simple_raise(ExcType::TypeError, "an integer is required");
    };
    let c = u32::try_from(*i).ok().and_then(char::from_u32).ok_or(()).or_else(|()| simple_raise(ExcType::ValueError, "chr() arg not in range"))?;
    Ok(Value::Str(Rc::from(c.to_string())))
}

fn builtin_zip<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, args: Vec<Value>) -> RunResult<Value> {
    let mut columns = Vec::with_capacity(args.len());
    for value in args {
        columns.push(vm.drain_iterable(value)?);
    }
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut rows = Vec::with_capacity(len);
    for i in 0..len {
        let row = columns.iter().map(|col| col[i].clone()).collect();
        rows.push(Value::Tuple(Rc::from(row)));
    }
    Ok(Value::List(shared(rows)))
}

/// Looks up a bound-method call on a built-in receiver: `args[0]` is the
/// receiver `CALL_METHOD` inserted, `name` is the method name `LOAD_METHOD`
/// already resolved against one of [`methods`]'s per-type tables.
pub(crate) fn call_method<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, name: &str, mut args: Vec<Value>, kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Value> {
    if args.is_empty() {
        return simple_raise(ExcType::TypeError, format!("missing receiver for method '{name}'"));
    }
    let receiver = args.remove(0);
    methods::dispatch(vm, &receiver, name, args, kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NoLimitTracker;
    use crate::tracer::NoopTracer;

    fn vm() -> Vm<NoLimitTracker, NoopTracer> {
        let mut vm = Vm::new(NoLimitTracker::default());
        install_globals(vm.builtins());
        vm
    }

    #[test]
    fn global_table_has_no_duplicate_names() {
        let mut seen = std::collections::HashSet::new();
        for name in GLOBAL_NAMES {
            assert!(seen.insert(*name), "duplicate global name {name}");
        }
    }

    #[test]
    fn abs_handles_int_and_float() {
        assert!(matches!(builtin_abs(&[Value::Int(-3)]).unwrap(), Value::Int(3)));
        assert!(matches!(builtin_abs(&[Value::Float(-2.5)]).unwrap(), Value::Float(f) if f == 2.5));
    }

    #[test]
    fn range_rejects_zero_step() {
        assert!(builtin_range(&[Value::Int(0), Value::Int(10), Value::Int(0)]).is_err());
    }

    #[test]
    fn install_globals_populates_namespace() {
        let v = vm();
        assert!(v.builtins().borrow().contains("print"));
        assert!(v.builtins().borrow().contains("isinstance"));
    }

    #[test]
    fn repr_of_string_is_quoted() {
        let mut v = vm();
        let rendered = value_repr(&mut v, &Value::Str(Rc::from("hi"))).unwrap();
        assert_eq!(rendered, "\"hi\"");
    }
}
