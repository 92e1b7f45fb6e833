//! `BINARY_*`/`INPLACE_*`/`UNARY_*` (§4.3) and the typed/fused
//! superinstructions a peephole pass could later rewrite these into
//! (§4.9) — the dispatch loop honors them today even though
//! [`crate::bytecode::builder::CodeBuilder`] never emits them.

use std::rc::Rc;

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::bytecode::Opcode;
use crate::exception::{ExcType, RunResult, simple_raise};
use crate::heap::shared;
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::Value;

/// The numeric tower a binary arithmetic opcode promotes through: plain
/// `i64` until it would overflow, then `BigInt`, then `f64` once either
/// operand is a float. Mirrors the promotion order described in §3.
enum Num {
    Int(i64),
    Big(BigInt),
    Float(f64),
}

impl Num {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Int(i) => Some(Num::Int(*i)),
            Value::BigInt(b) => Some(Num::Big((**b).clone())),
            Value::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Big(b) => normalize_bigint(b),
            Num::Float(f) => Value::Float(f),
        }
    }

    fn as_f64(&self) -> f64 {
        match self {
            Num::Int(i) => *i as f64,
            Num::Big(b) => b.to_f64().unwrap_or(f64::NAN),
            Num::Float(f) => *f,
        }
    }

    fn as_bigint(&self) -> BigInt {
        match self {
            Num::Int(i) => BigInt::from(*i),
            Num::Big(b) => b.clone(),
            Num::Float(f) => BigInt::from(*f as i64),
        }
    }
}

/// Collapses a `BigInt` result back down to `Int` when it fits, keeping
/// the common case cheap.
fn normalize_bigint(b: BigInt) -> Value {
    match b.to_i64() {
        Some(i) => Value::Int(i),
        None => Value::BigInt(Rc::new(b)),
    }
}

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    pub(crate) fn exec_binary(&mut self, opcode: Opcode, inplace: bool) -> RunResult<()> {
        let b = self.pop();
        let a = self.pop();
        let result = self.binary_op(opcode, &a, &b, inplace)?;
        self.push(result);
        Ok(())
    }

    fn binary_op(&mut self, opcode: Opcode, a: &Value, b: &Value, inplace: bool) -> RunResult<Value> {
        use Opcode::{
            BinaryAdd, BinaryAnd, BinaryDiv, BinaryFloordiv, BinaryLshift, BinaryMatmul, BinaryMod, BinaryMul, BinaryOr, BinaryPow, BinaryRshift, BinaryXor, InplaceAdd,
            InplaceAnd, InplaceDiv, InplaceFloordiv, InplaceLshift, InplaceMatmul, InplaceMod, InplaceMul, InplaceOr, InplacePow, InplaceRshift, InplaceXor,
        };
        let kind = match opcode {
            BinaryAdd | InplaceAdd => BinOp::Add,
            BinaryDiv | InplaceDiv => BinOp::TrueDiv,
            _ if matches!(opcode, Opcode::BinarySub | Opcode::InplaceSub) => BinOp::Sub,
            _ if matches!(opcode, BinaryMul | InplaceMul) => BinOp::Mul,
            _ if matches!(opcode, BinaryFloordiv | InplaceFloordiv) => BinOp::FloorDiv,
            _ if matches!(opcode, BinaryMod | InplaceMod) => BinOp::Mod,
            _ if matches!(opcode, BinaryPow | InplacePow) => BinOp::Pow,
            _ if matches!(opcode, BinaryMatmul | InplaceMatmul) => BinOp::MatMul,
            _ if matches!(opcode, BinaryLshift | InplaceLshift) => BinOp::LShift,
            _ if matches!(opcode, BinaryRshift | InplaceRshift) => BinOp::RShift,
            _ if matches!(opcode, BinaryAnd | InplaceAnd) => BinOp::And,
            _ if matches!(opcode, BinaryOr | InplaceOr) => BinOp::Or,
            _ if matches!(opcode, BinaryXor | InplaceXor) => BinOp::Xor,
            _ => unreachable!("binary_op called with a non-binary opcode"),
        };
        let _ = inplace;
        self.apply_binop(kind, a, b)
    }

    /// Performs one arithmetic/bitwise/sequence operator: built-in
    /// string/tuple/list/numeric cases first, then (§4.9) a guest
    /// `Instance` operand's `__op__`/`__rop__` pair, raising `TypeError` if
    /// nothing claims it.
    fn apply_binop(&mut self, kind: BinOp, a: &Value, b: &Value) -> RunResult<Value> {
        if matches!(kind, BinOp::Add) {
            if let (Value::Str(x), Value::Str(y)) = (a, b) {
                self.heap.charge(x.len() + y.len())?;
                return Ok(Value::Str(Rc::from(format!("{x}{y}"))));
            }
            if let (Value::Tuple(x), Value::Tuple(y)) = (a, b) {
                let mut combined = Vec::with_capacity(x.len() + y.len());
                combined.extend_from_slice(x);
                combined.extend_from_slice(y);
                return Ok(Value::Tuple(Rc::from(combined)));
            }
            if let (Value::List(x), Value::List(y)) = (a, b) {
                let mut combined = x.borrow().clone();
                combined.extend_from_slice(&y.borrow());
                self.heap.charge(combined.len() * std::mem::size_of::<Value>())?;
                return Ok(Value::List(shared(combined)));
            }
        }
        if matches!(kind, BinOp::Mul) {
            if let Some((seq, count)) = sequence_repeat_operands(a, b) {
                return self.repeat_sequence(seq, count);
            }
        }
        if matches!(a, Value::Instance(_)) || matches!(b, Value::Instance(_)) {
            if let Some(result) = self.try_dunder_binop(kind, a, b)? {
                return Ok(result);
            }
        }

        let (Some(na), Some(nb)) = (Num::from_value(a), Num::from_value(b)) else {
            return simple_raise(
                ExcType::TypeError,
                format!("unsupported operand type(s) for {}: '{}' and '{}'", kind.symbol(), a.type_name(), b.type_name()),
            );
        };
        kind.eval(na, nb)
    }

    /// Tries `a.__op__(b)` then `b.__rop__(a)`, the way the attribute
    /// dispatch loop resolves an operator on a guest class before this
    /// file's built-in numeric/sequence cases ever see it (§4.9). Either
    /// side returning `NotImplemented` (not raising) falls through to the
    /// next candidate, matching the reference language's protocol.
    fn try_dunder_binop(&mut self, kind: BinOp, a: &Value, b: &Value) -> RunResult<Option<Value>> {
        let (forward, reflected) = kind.dunder_names();
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

    fn repeat_sequence(&mut self, seq: &Value, count: i64) -> RunResult<Value> {
        let count = count.max(0) as usize;
        match seq {
            Value::Str(s) => {
                self.heap.charge(s.len() * count)?;
                Ok(Value::Str(Rc::from(s.repeat(count))))
            }
            Value::Tuple(items) => {
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend_from_slice(items);
                }
                Ok(Value::Tuple(Rc::from(out)))
            }
            Value::List(list) => {
                let items = list.borrow();
                let mut out = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    out.extend_from_slice(&items);
                }
                drop(items);
                self.heap.charge(out.len() * std::mem::size_of::<Value>())?;
                Ok(Value::List(shared(out)))
            }
            _ => unreachable!("sequence_repeat_operands only matches Str/Tuple/List"),
        }
    }

    pub(crate) fn exec_unary(&mut self, opcode: Opcode) -> RunResult<()> {
        let operand = self.pop();
        let result = match opcode {
            Opcode::UnaryNot => Value::Bool(!operand.is_truthy()),
            Opcode::UnaryPositive => match Num::from_value(&operand) {
                Some(n) => n.into_value(),
                None => return simple_raise(ExcType::TypeError, format!("bad operand type for unary +: '{}'", operand.type_name())),
            },
            Opcode::UnaryNegative => match &operand {
                Value::Int(i) => i.checked_neg().map_or_else(|| Value::BigInt(Rc::new(-BigInt::from(*i))), Value::Int),
                Value::BigInt(b) => normalize_bigint(-(**b).clone()),
                Value::Float(f) => Value::Float(-f),
                Value::Bool(b) => Value::Int(-i64::from(*b)),
                other => return simple_raise(ExcType::TypeError, format!("bad operand type for unary -: '{}'", other.type_name())),
            },
            Opcode::UnaryInvert => match &operand {
                Value::Int(i) => Value::Int(!i),
                Value::BigInt(b) => normalize_bigint(!(**b).clone()),
                Value::Bool(b) => Value::Int(!i64::from(*b)),
                other => return simple_raise(ExcType::TypeError, format!("bad operand type for unary ~: '{}'", other.type_name())),
            },
            _ => unreachable!("exec_unary called with a non-unary opcode"),
        };
        self.push(result);
        Ok(())
    }

    /// `BINARY_ADD_INT`/`BINARY_SUB_INT`/`BINARY_MUL_INT`/`BINARY_DIV_FLOAT`/
    /// `BINARY_ADD_FLOAT`: fast paths for the common same-type case, falling
    /// back to the generic operator otherwise.
    pub(crate) fn exec_typed_binary(&mut self, opcode: Opcode) -> RunResult<()> {
        let b = self.pop();
        let a = self.pop();
        let result = match (opcode, &a, &b) {
            (Opcode::BinaryAddInt, Value::Int(x), Value::Int(y)) => x.checked_add(*y).map(Value::Int),
            (Opcode::BinarySubInt, Value::Int(x), Value::Int(y)) => x.checked_sub(*y).map(Value::Int),
            (Opcode::BinaryMulInt, Value::Int(x), Value::Int(y)) => x.checked_mul(*y).map(Value::Int),
            (Opcode::BinaryDivFloat, Value::Float(x), Value::Float(y)) => Some(Value::Float(x / y)),
            (Opcode::BinaryAddFloat, Value::Float(x), Value::Float(y)) => Some(Value::Float(x + y)),
            _ => None,
        };
        let result = match result {
            Some(value) => value,
            None => {
                let generic = match opcode {
                    Opcode::BinaryAddInt | Opcode::BinaryAddFloat => Opcode::BinaryAdd,
                    Opcode::BinarySubInt => Opcode::BinarySub,
                    Opcode::BinaryMulInt => Opcode::BinaryMul,
                    Opcode::BinaryDivFloat => Opcode::BinaryDiv,
                    _ => unreachable!(),
                };
                self.binary_op(generic, &a, &b, false)?
            }
        };
        self.push(result);
        Ok(())
    }

    /// `INCREMENT_FAST`/`DECREMENT_FAST`/`NEGATE_FAST`/`ADD_CONST_FAST`/
    /// `ACCUMULATE_FAST`: in-place local-slot micro-ops. The operand packs
    /// the local slot in its low byte and (for `AddConstFast`/
    /// `AccumulateFast`) a small signed delta in its high byte.
    pub(crate) fn exec_fast_micro_op(&mut self, opcode: Opcode, operand: u16) -> RunResult<()> {
        let slot = (operand & 0x00ff) as usize;
        let delta = i64::from((operand >> 8) as u8 as i8);
        let current = self.frames.last().expect("frame").locals[slot].clone();
        // Same-type overflow must promote to `BigInt` exactly like the
        // generic `BINARY_ADD`/`BINARY_SUB` path (`eval_arith` above) —
        // a fast path is only a shortcut for the common case, never a
        // different result.
        let updated = match (opcode, &current) {
            (Opcode::IncrementFast, Value::Int(i)) => match i.checked_add(1) {
                Some(value) => Value::Int(value),
                None => self.binary_op(Opcode::BinaryAdd, &Value::Int(*i), &Value::Int(1), false)?,
            },
            (Opcode::DecrementFast, Value::Int(i)) => match i.checked_sub(1) {
                Some(value) => Value::Int(value),
                None => self.binary_op(Opcode::BinarySub, &Value::Int(*i), &Value::Int(1), false)?,
            },
            (Opcode::NegateFast, Value::Int(i)) => Value::Int(-i),
            (Opcode::NegateFast, Value::Float(f)) => Value::Float(-f),
            (Opcode::AddConstFast, Value::Int(i)) => match i.checked_add(delta) {
                Some(value) => Value::Int(value),
                None => self.binary_op(Opcode::BinaryAdd, &Value::Int(*i), &Value::Int(delta), false)?,
            },
            (Opcode::AccumulateFast, Value::Int(i)) => match i.checked_add(delta) {
                Some(value) => Value::Int(value),
                None => self.binary_op(Opcode::BinaryAdd, &Value::Int(*i), &Value::Int(delta), false)?,
            },
            (_, other) => {
                return simple_raise(ExcType::TypeError, format!("unsupported operand type for fast numeric op: '{}'", other.type_name()));
            }
        };
        self.frames.last_mut().expect("frame").locals[slot] = updated;
        Ok(())
    }

    /// `LEN_LIST`/`LEN_STRING`/`LEN_TUPLE`/`LEN_DICT`/`LEN_GENERIC`: typed
    /// fast paths for `len()`, falling back to a generic length computation
    /// that raises `TypeError` for a non-sized operand.
    pub(crate) fn exec_typed_len(&mut self, opcode: Opcode) -> RunResult<()> {
        let value = self.pop();
        let len = match (opcode, &value) {
            (Opcode::LenList, Value::List(l)) => l.borrow().len(),
            (Opcode::LenString, Value::Str(s)) => s.chars().count(),
            (Opcode::LenTuple, Value::Tuple(t)) => t.len(),
            (Opcode::LenDict, Value::Dict(d)) => d.borrow().len(),
            _ => self.generic_len(&value)?,
        };
        self.push(Value::Int(len as i64));
        Ok(())
    }

    pub(crate) fn generic_len(&self, value: &Value) -> RunResult<usize> {
        match value {
            Value::Str(s) => Ok(s.chars().count()),
            Value::Bytes(b) => Ok(b.len()),
            Value::Tuple(t) => Ok(t.len()),
            Value::List(l) => Ok(l.borrow().len()),
            Value::Dict(d) => Ok(d.borrow().len()),
            Value::Set(s) => Ok(s.borrow().len()),
            Value::FrozenSet(s) => Ok(s.len()),
            Value::Range(r) => Ok(r.len().max(0) as usize),
            other => simple_raise(ExcType::TypeError, format!("object of type '{}' has no len()", other.type_name())),
        }
    }

    /// The fused load/store superinstructions: two packed local-slot or
    /// constant indices in the low/high bytes of `operand`.
    pub(crate) fn exec_fused_load_store(&mut self, opcode: Opcode, operand: u16) -> RunResult<()> {
        let lo = (operand & 0x00ff) as u16;
        let hi = (operand >> 8) as u16;
        match opcode {
            Opcode::LoadFastLoadFast => {
                let frame = self.frames.last().expect("frame");
                let a = frame.locals[lo as usize].clone();
                let b = frame.locals[hi as usize].clone();
                self.push(a);
                self.push(b);
            }
            Opcode::LoadFastLoadConst => {
                let frame = self.frames.last().expect("frame");
                let a = frame.locals[lo as usize].clone();
                let b = frame.code.constants[hi as usize].clone();
                self.push(a);
                self.push(b);
            }
            Opcode::StoreFastLoadFast => {
                let value = self.pop();
                let frame = self.frames.last_mut().expect("frame");
                frame.locals[lo as usize] = value;
                let reloaded = frame.locals[hi as usize].clone();
                self.push(reloaded);
            }
            Opcode::LoadConstLoadFast => {
                let frame = self.frames.last().expect("frame");
                let a = frame.code.constants[lo as usize].clone();
                let b = frame.locals[hi as usize].clone();
                self.push(a);
                self.push(b);
            }
            Opcode::LoadGlobalLoadFast => {
                self.op_load_global(lo)?;
                let frame = self.frames.last().expect("frame");
                let b = frame.locals[hi as usize].clone();
                self.push(b);
            }
            _ => unreachable!("exec_fused_load_store called with an unrelated opcode"),
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    MatMul,
    LShift,
    RShift,
    And,
    Or,
    Xor,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::TrueDiv => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::MatMul => "@",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }

    /// The `(forward, reflected)` dunder method names tried, in order, when
    /// an operand is a guest `Instance` (§4.9's attribute-dispatch boundary).
    fn dunder_names(self) -> (&'static str, &'static str) {
        use crate::intern::dunder;
        match self {
            BinOp::Add => (dunder::ADD, dunder::RADD),
            BinOp::Sub => (dunder::SUB, dunder::RSUB),
            BinOp::Mul => (dunder::MUL, dunder::RMUL),
            BinOp::TrueDiv => (dunder::TRUEDIV, dunder::RTRUEDIV),
            BinOp::FloorDiv => (dunder::FLOORDIV, dunder::RFLOORDIV),
            BinOp::Mod => (dunder::MOD, dunder::RMOD),
            BinOp::Pow => (dunder::POW, dunder::RPOW),
            BinOp::MatMul => (dunder::MATMUL, dunder::RMATMUL),
            BinOp::LShift => (dunder::LSHIFT, dunder::RLSHIFT),
            BinOp::RShift => (dunder::RSHIFT, dunder::RRSHIFT),
            BinOp::And => (dunder::AND, dunder::RAND),
            BinOp::Or => (dunder::OR, dunder::ROR),
            BinOp::Xor => (dunder::XOR, dunder::RXOR),
        }
    }

    fn eval(self, a: Num, b: Num) -> RunResult<Value> {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul => Ok(self.eval_arith(a, b)),
            BinOp::TrueDiv => {
                if b.as_f64() == 0.0 {
                    return simple_raise(ExcType::ZeroDivisionError, "division by zero");
                }
                Ok(Value::Float(a.as_f64() / b.as_f64()))
            }
            BinOp::FloorDiv => self.eval_floor_mod(a, b, true),
            BinOp::Mod => self.eval_floor_mod(a, b, false),
            BinOp::Pow => self.eval_pow(a, b),
            BinOp::MatMul => simple_raise(ExcType::TypeError, "@ is not supported between these operands"),
            BinOp::LShift | BinOp::RShift | BinOp::And | BinOp::Or | BinOp::Xor => self.eval_bitwise(a, b),
        }
    }

    fn eval_arith(self, a: Num, b: Num) -> Value {
        if let (Num::Int(x), Num::Int(y)) = (&a, &b) {
            let result = match self {
                BinOp::Add => x.checked_add(*y),
                BinOp::Sub => x.checked_sub(*y),
                BinOp::Mul => x.checked_mul(*y),
                _ => unreachable!(),
            };
            if let Some(value) = result {
                return Value::Int(value);
            }
        }
        if matches!(a, Num::Float(_)) || matches!(b, Num::Float(_)) {
            let (x, y) = (a.as_f64(), b.as_f64());
            return Value::Float(match self {
                BinOp::Add => x + y,
                BinOp::Sub => x - y,
                BinOp::Mul => x * y,
                _ => unreachable!(),
            });
        }
        let (x, y) = (a.as_bigint(), b.as_bigint());
        normalize_bigint(match self {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            _ => unreachable!(),
        })
    }

    fn eval_floor_mod(self, a: Num, b: Num, floor: bool) -> RunResult<Value> {
        if matches!(a, Num::Float(_)) || matches!(b, Num::Float(_)) {
            let (x, y) = (a.as_f64(), b.as_f64());
            if y == 0.0 {
                return simple_raise(ExcType::ZeroDivisionError, "float floor division by zero");
            }
            return Ok(Value::Float(if floor { (x / y).floor() } else { x - y * (x / y).floor() }));
        }
        let (x, y) = (a.as_bigint(), b.as_bigint());
        if y.is_zero() {
            return simple_raise(ExcType::ZeroDivisionError, "integer division or modulo by zero");
        }
        let (q, r) = num_integer::Integer::div_mod_floor(&x, &y);
        Ok(normalize_bigint(if floor { q } else { r }))
    }

    fn eval_pow(self, a: Num, b: Num) -> RunResult<Value> {
        if matches!(a, Num::Float(_)) || matches!(b, Num::Float(_)) || b.as_bigint().is_negative() {
            return Ok(Value::Float(a.as_f64().powf(b.as_f64())));
        }
        let base = a.as_bigint();
        let exp = b.as_bigint().to_u32().ok_or(()).or_else(|()| simple_raise(ExcType::OverflowError, "exponent too large"))?;
        Ok(normalize_bigint(base.pow(exp)))
    }

    fn eval_bitwise(self, a: Num, b: Num) -> RunResult<Value> {
        let (Num::Int(_) | Num::Big(_), Num::Int(_) | Num::Big(_)) = (&a, &b) else {
            return simple_raise(ExcType::TypeError, "unsupported operand type(s) for bitwise operator");
        };
        if let (Num::Int(x), Num::Int(y)) = (&a, &b) {
            let result = match self {
                BinOp::LShift => {
                    if *y < 0 || *y >= 63 {
                        None
                    } else {
                        x.checked_shl(*y as u32)
                    }
                }
                BinOp::RShift => Some(x >> (*y).clamp(0, 63)),
                BinOp::And => Some(x & y),
                BinOp::Or => Some(x | y),
                BinOp::Xor => Some(x ^ y),
                _ => unreachable!(),
            };
            if let Some(value) = result {
                return Ok(Value::Int(value));
            }
        }
        let (x, y) = (a.as_bigint(), b.as_bigint());
        Ok(normalize_bigint(match self {
            BinOp::LShift => {
                let shift = y.to_u32().ok_or(()).or_else(|()| simple_raise(ExcType::OverflowError, "shift count too large"))?;
                x << shift
            }
            BinOp::RShift => {
                let shift = y.to_u32().ok_or(()).or_else(|()| simple_raise(ExcType::OverflowError, "shift count too large"))?;
                x >> shift
            }
            BinOp::And => x & y,
            BinOp::Or => x | y,
            BinOp::Xor => x ^ y,
            _ => unreachable!(),
        }))
    }
}

fn sequence_repeat_operands<'a>(a: &'a Value, b: &'a Value) -> Option<(&'a Value, i64)> {
    match (a, b) {
        (Value::Str(_) | Value::Tuple(_) | Value::List(_), Value::Int(n)) => Some((a, *n)),
        (Value::Int(n), Value::Str(_) | Value::Tuple(_) | Value::List(_)) => Some((b, *n)),
        _ => None,
    }
}
