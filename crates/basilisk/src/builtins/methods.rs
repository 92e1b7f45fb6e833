//! Per-type built-in method tables (§4.10): `"abc".upper()`,
//! `[1, 2].append(3)`, `{}.setdefault(...)`. Each table is just the set of
//! names `LOAD_METHOD` is allowed to resolve against a given receiver type
//! ([`lookup_method_name`]) plus the matching dispatch arm in
//! [`dispatch`], which `builtins::call_method` calls once `CALL_METHOD`
//! supplies the receiver and arguments.

use std::rc::Rc;

use crate::exception::{ExcType, RunResult, simple_raise};
use crate::heap::{PySet, key_eq, shared};
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::Value;

use super::{sort_values, value_repr, value_str};

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith", "endswith", "find",
    "index", "isdigit", "isalpha", "isspace", "isupper", "islower", "capitalize", "title", "count", "rjust", "ljust",
    "zfill", "encode", "format",
];
const LIST_METHODS: &[&str] = &["append", "extend", "insert", "pop", "remove", "clear", "index", "count", "sort", "reverse", "copy"];
const DICT_METHODS: &[&str] = &["get", "keys", "values", "items", "pop", "update", "setdefault", "clear", "copy"];
const SET_METHODS: &[&str] = &["add", "remove", "discard", "union", "intersection", "difference", "update", "clear", "copy", "issubset", "issuperset"];
const BYTES_METHODS: &[&str] = &["decode", "upper", "lower", "split", "join", "startswith", "endswith"];
const TUPLE_METHODS: &[&str] = &["count", "index"];

/// Looks up `name` in `receiver_type`'s method table and, if present,
/// returns the table's own `&'static str` for it — `LOAD_METHOD`'s
/// fallback needs a `'static` name to build a [`crate::value::BuiltinFunction`]
/// from, and the `Rc<str>` it has in hand (pulled from a `CodeObject`'s
/// name pool) isn't one.
pub(crate) fn lookup_method_name(receiver_type: &str, name: &str) -> Option<&'static str> {
    let table: &[&str] = match receiver_type {
        "str" => STR_METHODS,
        "list" => LIST_METHODS,
        "dict" => DICT_METHODS,
        "set" | "frozenset" => SET_METHODS,
        "bytes" => BYTES_METHODS,
        "tuple" => TUPLE_METHODS,
        _ => return None,
    };
    table.iter().copied().find(|candidate| *candidate == name)
}

pub(crate) fn dispatch<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, receiver: &Value, name: &str, args: Vec<Value>, _kwargs: Vec<(Rc<str>, Value)>) -> RunResult<Value> {
    match receiver {
        Value::Str(s) => str_method(vm, s, name, args),
        Value::List(list) => list_method(vm, list, name, args),
        Value::Dict(dict) => dict_method(vm, dict, name, args),
        Value::Set(set) => set_method(vm, set, name, args),
        Value::FrozenSet(set) => frozenset_method(set, name, args),
        Value::Bytes(b) => bytes_method(vm, b, name, args),
        Value::Tuple(items) => tuple_method(vm, items, name, args),
        other => simple_raise(ExcType::AttributeError, format!("'{}' object has no attribute '{name}'", other.type_name())),
    }
}

fn arg_str<'a>(args: &'a [Value], pos: usize, method: &str) -> RunResult<&'a Rc<str>> {
    match args.get(pos) {
        Some(Value::Str(s)) => Ok(s),
        Some(other) => simple_raise(ExcType::TypeError, format!("{method}() argument must be str, not '{}'", other.type_name())),
        None => simple_raise(ExcType::TypeError, format!("{method}() missing argument")),
    }
}

fn str_method<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, s: &Rc<str>, name: &str, args: Vec<Value>) -> RunResult<Value> {
    let text = s.as_ref();
    match name {
        "upper" => Ok(Value::Str(Rc::from(text.to_uppercase()))),
        "lower" => Ok(Value::Str(Rc::from(text.to_lowercase()))),
        "strip" => Ok(Value::Str(Rc::from(text.trim()))),
        "lstrip" => Ok(Value::Str(Rc::from(text.trim_start()))),
        "rstrip" => Ok(Value::Str(Rc::from(text.trim_end()))),
        "capitalize" => {
            let mut chars = text.chars();
            let rendered = match chars.next() {
                Some(c) => c.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            };
            Ok(Value::Str(Rc::from(rendered)))
        }
        "title" => {
            let mut out = String::with_capacity(text.len());
            let mut start_of_word = true;
            for c in text.chars() {
                if c.is_alphabetic() {
                    out.extend(if start_of_word { c.to_uppercase().collect::<Vec<_>>() } else { c.to_lowercase().collect::<Vec<_>>() });
                    start_of_word = false;
                } else {
                    out.push(c);
                    start_of_word = true;
                }
            }
            Ok(Value::Str(Rc::from(out)))
        }
        "isdigit" => Ok(Value::Bool(!text.is_empty() && text.chars().all(|c| c.is_ascii_digit()))),
        "isalpha" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_alphabetic))),
        "isspace" => Ok(Value::Bool(!text.is_empty() && text.chars().all(char::is_whitespace))),
        "isupper" => Ok(Value::Bool(text.chars().any(char::is_alphabetic) && text.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase()))),
        "islower" => Ok(Value::Bool(text.chars().any(char::is_alphabetic) && text.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_lowercase()))),
        "count" => {
            let needle = arg_str(&args, 0, "count")?;
            Ok(Value::Int(text.matches(needle.as_ref()).count() as i64))
        }
        "find" => {
            let needle = arg_str(&args, 0, "find")?;
            Ok(Value::Int(text.find(needle.as_ref()).map_or(-1, |i| text[..i].chars().count() as i64)))
        }
        "index" => {
            let needle = arg_str(&args, 0, "index")?;
            match text.find(needle.as_ref()) {
                Some(i) => Ok(Value::Int(text[..i].chars().count() as i64)),
                None => simple_raise(ExcType::ValueError, "substring not found"),
            }
        }
        "startswith" => {
            let needle = arg_str(&args, 0, "startswith")?;
            Ok(Value::Bool(text.starts_with(needle.as_ref())))
        }
        "endswith" => {
            let needle = arg_str(&args, 0, "endswith")?;
            Ok(Value::Bool(text.ends_with(needle.as_ref())))
        }
        "replace" => {
            let from = arg_str(&args, 0, "replace")?;
            let to = arg_str(&args, 1, "replace")?;
            Ok(Value::Str(Rc::from(text.replace(from.as_ref(), to.as_ref()))))
        }
        "split" => {
            let parts: Vec<Value> = match args.first() {
                None => text.split_whitespace().map(|p| Value::Str(Rc::from(p))).collect(),
                Some(Value::Str(sep)) if !sep.is_empty() => text.split(sep.as_ref()).map(|p| Value::Str(Rc::from(p))).collect(),
                Some(Value::Str(_)) => return simple_raise(ExcType::ValueError, "empty separator"),
                Some(other) => return simple_raise(ExcType::TypeError, format!("split() argument must be str, not '{}'", other.type_name())),
            };
            Ok(Value::List(shared(parts)))
        }
        "join" => {
            let items = vm.drain_iterable(args.into_iter().next().unwrap_or(Value::Tuple(Rc::from(Vec::new()))))?;
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                let Value::Str(piece) = item else {
                    return simple_raise(ExcType::TypeError, "sequence item: expected str instance");
                };
                parts.push(piece.to_string());
            }
            Ok(Value::Str(Rc::from(parts.join(text))))
        }
        "rjust" => pad(&args, text, true),
        "ljust" => pad(&args, text, false),
        "zfill" => {
            let Some(Value::Int(width)) = args.first() else {
                return simple_raise(ExcType::TypeError, "zfill() argument must be an int");
            };
            let width = (*width).max(0) as usize;
            if text.len() >= width {
                return Ok(Value::Str(Rc::from(text)));
            }
            let (sign, rest) = match text.chars().next() {
                Some('+' | '-') => (&text[..1], &text[1..]),
                _ => ("", text),
            };
            let padding = "0".repeat(width - text.len());
            Ok(Value::Str(Rc::from(format!("{sign}{padding}{rest}"))))
        }
        "encode" => Ok(Value::Bytes(Rc::from(text.as_bytes()))),
        "format" => {
            let mut out = String::new();
            let mut arg_iter = args.into_iter();
            let mut chars = text.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '{' && chars.peek() == Some(&'}') {
                    chars.next();
                    let value = arg_iter.next().unwrap_or(Value::None);
                    out.push_str(&value_str(vm, &value)?);
                } else {
                    out.push(c);
                }
            }
            Ok(Value::Str(Rc::from(out)))
        }
        other => simple_raise(ExcType::AttributeError, format!("'str' object has no attribute '{other}'")),
    }
}

fn pad(args: &[Value], text: &str, right_align: bool) -> RunResult<Value> {
    let Some(Value::Int(width)) = args.first() else {
        return simple_raise(ExcType::TypeError, "pad width must be an int");
    };
    let width = (*width).max(0) as usize;
    let fill = match args.get(1) {
        Some(Value::Str(s)) if s.chars().count() == 1 => s.chars().next().unwrap(),
        Some(_) => return simple_raise(ExcType::TypeError, "the fill character must be exactly one character long"),
        None => ' ',
    };
    let len = text.chars().count();
    if len >= width {
        return Ok(Value::Str(Rc::from(text)));
    }
    let padding: String = std::iter::repeat(fill).take(width - len).collect();
    let result = if right_align { format!("{padding}{text}") } else { format!("{text}{padding}") };
    Ok(Value::Str(Rc::from(result)))
}

fn list_method<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, list: &crate::heap::Shared<Vec<Value>>, name: &str, mut args: Vec<Value>) -> RunResult<Value> {
    match name {
        "append" => {
            list.borrow_mut().push(args.into_iter().next().unwrap_or(Value::None));
            Ok(Value::None)
        }
        "extend" => {
            let items = vm.drain_iterable(args.into_iter().next().unwrap_or(Value::Tuple(Rc::from(Vec::new()))))?;
            list.borrow_mut().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            let Some(Value::Int(idx)) = args.first() else {
                return simple_raise(ExcType::TypeError, "insert() first argument must be an int");
            };
            let idx = *idx;
            let value = args.into_iter().nth(1).unwrap_or(Value::None);
            let mut list = list.borrow_mut();
            let len = list.len() as i64;
            let idx = idx.clamp(0, len) as usize;
            list.insert(idx, value);
            Ok(Value::None)
        }
        "pop" => {
            let mut list = list.borrow_mut();
            if list.is_empty() {
                return simple_raise(ExcType::IndexError, "pop from empty list");
            }
            let len = list.len() as i64;
            let idx = match args.first() {
                Some(Value::Int(i)) => if *i < 0 { i + len } else { *i },
                _ => len - 1,
            };
            if idx < 0 || idx >= len {
                return simple_raise(ExcType::IndexError, "pop index out of range");
            }
            Ok(list.remove(idx as usize))
        }
        "remove" => {
            let target = args.into_iter().next().unwrap_or(Value::None);
            let items = list.borrow().clone();
            for (i, item) in items.iter().enumerate() {
                if vm.values_equal(item, &target)? {
                    list.borrow_mut().remove(i);
                    return Ok(Value::None);
                }
            }
            simple_raise(ExcType::ValueError, "list.remove(x): x not in list")
        }
        "clear" => {
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        "index" => {
            let target = args.into_iter().next().unwrap_or(Value::None);
            let items = list.borrow().clone();
            for (i, item) in items.iter().enumerate() {
                if vm.values_equal(item, &target)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            simple_raise(ExcType::ValueError, "x not in list")
        }
        "count" => {
            let target = args.into_iter().next().unwrap_or(Value::None);
            let items = list.borrow().clone();
            let mut total = 0i64;
            for item in &items {
                if vm.values_equal(item, &target)? {
                    total += 1;
                }
            }
            Ok(Value::Int(total))
        }
        "sort" => {
            let mut items = list.borrow().clone();
            sort_values(vm, &mut items, &None, false)?;
            *list.borrow_mut() = items;
            Ok(Value::None)
        }
        "reverse" => {
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "copy" => Ok(Value::List(shared(list.borrow().clone()))),
        other => simple_raise(ExcType::AttributeError, format!("'list' object has no attribute '{other}'")),
    }
}

fn dict_method<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, dict: &crate::heap::Shared<crate::heap::Dict>, name: &str, mut args: Vec<Value>) -> RunResult<Value> {
    match name {
        "get" => {
            let key = args.first().cloned().unwrap_or(Value::None);
            let default = args.into_iter().nth(1).unwrap_or(Value::None);
            let hash = key.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", key.type_name())))?;
            Ok(dict.borrow().get(hash, |k| key_eq(k, &key)).cloned().unwrap_or(default))
        }
        "pop" => {
            let key = args.first().cloned().unwrap_or(Value::None);
            let default = (args.len() > 1).then(|| args.remove(1));
            let hash = key.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", key.type_name())))?;
            match dict.borrow_mut().remove(hash, |k| key_eq(k, &key)) {
                Some((_, value)) => Ok(value),
                None => match default {
                    Some(value) => Ok(value),
                    None => simple_raise(ExcType::KeyError, format!("{}", value_repr(vm, &key)?)),
                },
            }
        }
        "setdefault" => {
            let key = args.first().cloned().unwrap_or(Value::None);
            let default = args.into_iter().nth(1).unwrap_or(Value::None);
            let hash = key.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", key.type_name())))?;
            if let Some(existing) = dict.borrow().get(hash, |k| key_eq(k, &key)) {
                return Ok(existing.clone());
            }
            dict.borrow_mut().insert(hash, key, default.clone(), |_| false);
            Ok(default)
        }
        "update" => {
            let pairs = vm.drain_iterable(args.into_iter().next().unwrap_or(Value::Tuple(Rc::from(Vec::new()))))?;
            for pair in pairs {
                let Value::Tuple(kv) = pair else {
                    return simple_raise(ExcType::TypeError, "dict.update() argument must be an iterable of pairs");
                };
                if kv.len() != 2 {
                    continue;
                }
                let (k, v) = (kv[0].clone(), kv[1].clone());
                let hash = k.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", k.type_name())))?;
                let probe = k.clone();
                dict.borrow_mut().insert(hash, k, v, |existing| key_eq(existing, &probe));
            }
            Ok(Value::None)
        }
        "keys" => Ok(Value::List(shared(dict.borrow().iter().map(|(k, _)| k.clone()).collect()))),
        "values" => Ok(Value::List(shared(dict.borrow().iter().map(|(_, v)| v.clone()).collect()))),
        "items" => Ok(Value::List(shared(dict.borrow().iter().map(|(k, v)| Value::Tuple(Rc::from(vec![k.clone(), v.clone()]))).collect()))),
        "clear" => {
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            let mut copy = crate::heap::Dict::new();
            for (k, v) in dict.borrow().iter() {
                let hash = k.basic_hash().expect("dict keys are always hashable");
                let probe = k.clone();
                copy.insert(hash, k.clone(), v.clone(), |existing| key_eq(existing, &probe));
            }
            Ok(Value::Dict(shared(copy)))
        }
        other => simple_raise(ExcType::AttributeError, format!("'dict' object has no attribute '{other}'")),
    }
}

fn set_method<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, set: &crate::heap::Shared<PySet>, name: &str, args: Vec<Value>) -> RunResult<Value> {
    match name {
        "add" => {
            let value = args.into_iter().next().unwrap_or(Value::None);
            let hash = value.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", value.type_name())))?;
            let probe = value.clone();
            set.borrow_mut().insert(hash, value, |k| key_eq(k, &probe));
            Ok(Value::None)
        }
        "remove" => {
            let value = args.into_iter().next().unwrap_or(Value::None);
            let hash = value.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", value.type_name())))?;
            let probe = value.clone();
            if set.borrow_mut().remove(hash, |k| key_eq(k, &probe)) { Ok(Value::None) } else { simple_raise(ExcType::KeyError, format!("{}", value_repr(vm, &value)?)) }
        }
        "discard" => {
            let value = args.into_iter().next().unwrap_or(Value::None);
            if let Some(hash) = value.basic_hash() {
                let probe = value.clone();
                set.borrow_mut().remove(hash, |k| key_eq(k, &probe));
            }
            Ok(Value::None)
        }
        "clear" => {
            *set.borrow_mut() = PySet::new();
            Ok(Value::None)
        }
        "copy" => {
            let mut copy = PySet::new();
            for item in set.borrow().iter() {
                let hash = item.basic_hash().expect("set members are always hashable");
                let probe = item.clone();
                copy.insert(hash, item.clone(), |k| key_eq(k, &probe));
            }
            Ok(Value::Set(shared(copy)))
        }
        "union" => {
            let mut result = clone_set(set);
            for other in args {
                for item in vm.drain_iterable(other)? {
                    insert_into(&mut result, item);
                }
            }
            Ok(Value::Set(shared(result)))
        }
        "intersection" => {
            let own: Vec<Value> = set.borrow().iter().cloned().collect();
            let mut others = Vec::new();
            for other in args {
                others.push(vm.drain_iterable(other)?);
            }
            let mut result = PySet::new();
            for item in own {
                let hash = item.basic_hash().expect("set members are always hashable");
                let in_all = others.iter().all(|o| o.iter().any(|v| key_eq(v, &item)));
                if in_all {
                    let probe = item.clone();
                    result.insert(hash, item, |k| key_eq(k, &probe));
                }
            }
            Ok(Value::Set(shared(result)))
        }
        "difference" => {
            let own: Vec<Value> = set.borrow().iter().cloned().collect();
            let mut others = Vec::new();
            for other in args {
                others.push(vm.drain_iterable(other)?);
            }
            let mut result = PySet::new();
            for item in own {
                let hash = item.basic_hash().expect("set members are always hashable");
                let in_any = others.iter().any(|o| o.iter().any(|v| key_eq(v, &item)));
                if !in_any {
                    let probe = item.clone();
                    result.insert(hash, item, |k| key_eq(k, &probe));
                }
            }
            Ok(Value::Set(shared(result)))
        }
        "update" => {
            for other in args {
                for item in vm.drain_iterable(other)? {
                    let hash = item.basic_hash().ok_or(()).or_else(|()| simple_raise(ExcType::TypeError, format!("unhashable type: '{}'", item.type_name())))?;
                    let probe = item.clone();
                    set.borrow_mut().insert(hash, item, |k| key_eq(k, &probe));
                }
            }
            Ok(Value::None)
        }
        "issubset" => {
            let other = vm.drain_iterable(args.into_iter().next().unwrap_or(Value::Tuple(Rc::from(Vec::new()))))?;
            let own: Vec<Value> = set.borrow().iter().cloned().collect();
            Ok(Value::Bool(own.iter().all(|item| other.iter().any(|v| key_eq(v, item)))))
        }
        "issuperset" => {
            let other = vm.drain_iterable(args.into_iter().next().unwrap_or(Value::Tuple(Rc::from(Vec::new()))))?;
            let own: Vec<Value> = set.borrow().iter().cloned().collect();
            Ok(Value::Bool(other.iter().all(|item| own.iter().any(|v| key_eq(v, item)))))
        }
        other => simple_raise(ExcType::AttributeError, format!("'set' object has no attribute '{other}'")),
    }
}

fn clone_set(set: &crate::heap::Shared<PySet>) -> PySet {
    let mut result = PySet::new();
    for item in set.borrow().iter() {
        insert_into(&mut result, item.clone());
    }
    result
}

fn insert_into(set: &mut PySet, item: Value) {
    if let Some(hash) = item.basic_hash() {
        let probe = item.clone();
        set.insert(hash, item, |k| key_eq(k, &probe));
    }
}

fn frozenset_method(set: &Rc<PySet>, name: &str, args: Vec<Value>) -> RunResult<Value> {
    match name {
        "copy" => Ok(Value::FrozenSet(Rc::clone(set))),
        "union" | "intersection" | "difference" | "issubset" | "issuperset" => {
            let _ = args;
            simple_raise(ExcType::NotImplementedError, format!("frozenset.{name} is not yet supported"))
        }
        other => simple_raise(ExcType::AttributeError, format!("'frozenset' object has no attribute '{other}'")),
    }
}

fn bytes_method<T: ResourceTracker, R: VmTracer>(_vm: &mut Vm<T, R>, b: &Rc<[u8]>, name: &str, args: Vec<Value>) -> RunResult<Value> {
    match name {
        "decode" => match std::str::from_utf8(b) {
            Ok(text) => Ok(Value::Str(Rc::from(text))),
            Err(_) => simple_raise(ExcType::ValueError, "invalid utf-8 in decode()"),
        },
        "upper" => Ok(Value::Bytes(Rc::from(b.iter().map(u8::to_ascii_uppercase).collect::<Vec<_>>()))),
        "lower" => Ok(Value::Bytes(Rc::from(b.iter().map(u8::to_ascii_lowercase).collect::<Vec<_>>()))),
        "startswith" => match args.first() {
            Some(Value::Bytes(prefix)) => Ok(Value::Bool(b.starts_with(prefix.as_ref()))),
            _ => simple_raise(ExcType::TypeError, "startswith() argument must be bytes"),
        },
        "endswith" => match args.first() {
            Some(Value::Bytes(suffix)) => Ok(Value::Bool(b.ends_with(suffix.as_ref()))),
            _ => simple_raise(ExcType::TypeError, "endswith() argument must be bytes"),
        },
        "split" => {
            let sep = match args.first() {
                Some(Value::Bytes(sep)) => sep.clone(),
                _ => return simple_raise(ExcType::TypeError, "split() argument must be bytes"),
            };
            if sep.is_empty() {
                return simple_raise(ExcType::ValueError, "empty separator");
            }
            let pieces: Vec<Value> = split_bytes(b, sep.as_ref()).into_iter().map(|chunk| Value::Bytes(Rc::from(chunk))).collect();
            Ok(Value::List(shared(pieces)))
        }
        "join" => {
            let pieces = match args.first() {
                Some(Value::List(items)) => items.borrow().clone(),
                Some(Value::Tuple(items)) => items.to_vec(),
                _ => return simple_raise(ExcType::TypeError, "join() argument must be an iterable"),
            };
            let mut out = Vec::new();
            for (i, piece) in pieces.into_iter().enumerate() {
                if i > 0 {
                    out.extend_from_slice(b);
                }
                let Value::Bytes(chunk) = piece else {
                    return simple_raise(ExcType::TypeError, "sequence item: expected bytes instance");
                };
                out.extend_from_slice(&chunk);
            }
            Ok(Value::Bytes(Rc::from(out)))
        }
        other => simple_raise(ExcType::AttributeError, format!("'bytes' object has no attribute '{other}'")),
    }
}

fn split_bytes(haystack: &[u8], needle: &[u8]) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = haystack;
    loop {
        match rest.windows(needle.len()).position(|w| w == needle) {
            Some(idx) => {
                out.push(rest[..idx].to_vec());
                rest = &rest[idx + needle.len()..];
            }
            None => {
                out.push(rest.to_vec());
                break;
            }
        }
    }
    out
}

fn tuple_method<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, items: &Rc<[Value]>, name: &str, args: Vec<Value>) -> RunResult<Value> {
    match name {
        "count" => {
            let target = args.into_iter().next().unwrap_or(Value::None);
            let mut total = 0i64;
            for item in items.iter() {
                if vm.values_equal(item, &target)? {
                    total += 1;
                }
            }
            Ok(Value::Int(total))
        }
        "index" => {
            let target = args.into_iter().next().unwrap_or(Value::None);
            for (i, item) in items.iter().enumerate() {
                if vm.values_equal(item, &target)? {
                    return Ok(Value::Int(i as i64));
                }
            }
            simple_raise(ExcType::ValueError, "tuple.index(x): x not in tuple")
        }
        other => simple_raise(ExcType::AttributeError, format!("'tuple' object has no attribute '{other}'")),
    }
}
