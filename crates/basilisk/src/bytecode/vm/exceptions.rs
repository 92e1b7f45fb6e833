//! Block-stack unwinding, `raise`/`except`/`except*`/`with` opcodes (§4.7).

use std::rc::Rc;

use crate::exception::{ExcType, Exception, RunError, RunResult, simple_raise};
use crate::frame::{Block, BlockKind};
use crate::resource::ResourceTracker;
use crate::run::Vm;
use crate::tracer::VmTracer;
use crate::value::Value;

/// One in-flight `except*` partition: the exceptions not yet claimed by an
/// earlier arm, and the message of the group they were unpacked from.
pub(crate) struct ExceptStarScope {
    remaining: Vec<Exception>,
    message: String,
}

/// `Loop` blocks mark `break`/`continue` targets only; they never intercept
/// an unwinding exception.
pub(crate) fn is_handler_block(kind: BlockKind) -> bool {
    !matches!(kind, BlockKind::Loop { .. })
}

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    /// Converts an `Exception` into the `Value` a guest `except ... as e`
    /// clause binds, per the two-universe split documented on
    /// [`crate::value::Value::Exc`].
    pub(crate) fn exception_to_value(exc: &Exception) -> Value {
        match &exc.class_instance {
            Some(value) => value.clone(),
            None => Value::Exc(Rc::new(exc.clone())),
        }
    }

    /// The inverse: recovers the `Exception` payload a `Value` on the
    /// operand stack (a caught/rebound exception, or `raise`'s operand)
    /// represents. `Class` operands (bare `raise SomeError`) synthesize a
    /// fresh, argument-less exception.
    pub(crate) fn value_to_exception(&self, value: Value) -> RunResult<Exception> {
        match value {
            Value::Exc(exc) => Ok((*exc).clone()),
            Value::Instance(inst) => {
                let class_name = match &inst.borrow().class {
                    Value::Class(cls) => cls.borrow().name.clone(),
                    _ => unreachable!("Instance::class always holds a Value::Class"),
                };
                let exc_type = class_name.parse::<ExcType>().unwrap_or(ExcType::Exception);
                let mut exc = Exception::new(exc_type, None);
                exc.class_instance = Some(Value::Instance(inst));
                Ok(exc)
            }
            Value::Class(cls) => {
                let name = cls.borrow().name.clone();
                let exc_type = name.parse::<ExcType>().unwrap_or(ExcType::Exception);
                Ok(Exception::new(exc_type, None))
            }
            other => simple_raise(ExcType::TypeError, format!("exceptions must derive from BaseException, not {}", other.type_name())),
        }
    }
}

/// Pushes a block recording where to resume if an exception unwinds into
/// this frame, and (for `Loop`-adjacent bookkeeping elsewhere) the operand
/// stack level to restore to.
pub(crate) fn setup_block<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, kind: BlockKind, handler_pc: u16) {
    let frame = vm.frames.last_mut().expect("frame");
    let exc_handler_depth = frame.handling_stack.len();
    let stack_level = frame.stack.len();
    frame.blocks.push(Block { kind, handler_pc: handler_pc as usize, stack_level, exc_handler_depth });
}

/// Called once `handle_error` has located a matching block and truncated
/// the frame to it: finishes wiring the exception into the frame/VM state
/// so the handler body (already at `ip`) sees it.
pub(crate) fn enter_handler<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, kind: BlockKind, exc: Exception) {
    match kind {
        BlockKind::Except => {
            let value = Vm::<T, R>::exception_to_value(&exc);
            vm.last_exception = Some(exc.clone());
            vm.frames.last_mut().expect("frame").handling_stack.push(exc);
            vm.push(value);
        }
        BlockKind::Finally | BlockKind::With => {
            vm.last_exception = Some(exc.clone());
            vm.frames.last_mut().expect("frame").handling_stack.push(exc);
        }
        BlockKind::ExceptStar => {
            let (remaining, message) = match exc.exc_type {
                ExcType::ExceptionGroup => (exc.group_children.clone(), exc.group_message.clone().unwrap_or_default()),
                _ => (vec![exc.clone()], String::new()),
            };
            vm.last_exception = Some(exc.clone());
            vm.frames.last_mut().expect("frame").handling_stack.push(exc);
            vm.except_star_stack.push(ExceptStarScope { remaining, message });
        }
        BlockKind::Loop { .. } => unreachable!("Loop blocks never intercept an unwind"),
    }
}

/// `POP_EXCEPT`/`POP_EXCEPT_HANDLER`: ends a handler region, restoring
/// `__context__` chaining to whatever was active before it.
pub(crate) fn pop_except<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>) {
    let frame = vm.frames.last_mut().expect("frame");
    frame.handling_stack.pop();
    vm.last_exception = frame.handling_stack.last().cloned();
}

/// `RAISE_VARARGS n`: `n` is encoded in the low two bits of the operand.
pub(crate) fn raise_varargs<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, n: u16) -> RunResult<()> {
    match n {
        0 => {
            let current = vm.frames.last().expect("frame").handling_stack.last().cloned().or_else(|| vm.last_exception.clone());
            match current {
                Some(exc) => Err(RunError::Raised(Box::new(exc))),
                None => simple_raise(ExcType::RuntimeError, "No active exception to re-raise"),
            }
        }
        1 => {
            let operand = vm.pop();
            let mut exc = vm.value_to_exception(operand)?;
            attach_context(vm, &mut exc);
            Err(RunError::Raised(Box::new(exc)))
        }
        2 => {
            let cause_value = vm.pop();
            let operand = vm.pop();
            let cause = vm.value_to_exception(cause_value)?;
            let mut exc = vm.value_to_exception(operand)?;
            exc = exc.with_cause(cause);
            attach_context(vm, &mut exc);
            Err(RunError::Raised(Box::new(exc)))
        }
        _ => Err(RunError::Internal(format!("RAISE_VARARGS with invalid argument count {n}"))),
    }
}

/// Implicit `__context__` chaining (§4.7): a newly raised exception that
/// differs from the one currently being handled in this frame records it
/// as context, unless an explicit `from` clause already set a cause.
fn attach_context<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>, exc: &mut Exception) {
    if exc.cause.is_none() && exc.context.is_none()
        && let Some(handled) = vm.frames.last().expect("frame").handling_stack.last()
    {
        exc.context = Some(Box::new(handled.clone()));
    }
}

/// `EXCEPT_STAR_MATCH`: the candidate type was pushed just before this
/// opcode, mirroring `EXCEPTION_MATCH`'s stack convention.
pub(crate) fn except_star_match<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>) -> RunResult<()> {
    let candidate = vm.pop();
    let scope = vm.except_star_stack.last_mut().expect("EXCEPT_STAR_MATCH outside an except* scope");
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for exc in scope.remaining.drain(..) {
        if super::compare::exception_matches_value(&exc, &candidate) {
            matched.push(exc);
        } else {
            unmatched.push(exc);
        }
    }
    scope.remaining = unmatched;
    if matched.is_empty() {
        vm.push(Value::None);
    } else {
        let group = Exception::group(scope.message.clone(), matched);
        vm.push(Vm::<T, R>::exception_to_value(&group));
    }
    Ok(())
}

/// `EXCEPT_STAR_RERAISE`: raises whatever wasn't claimed by any arm.
pub(crate) fn except_star_reraise<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>) -> RunResult<()> {
    let scope = vm.except_star_stack.pop().expect("EXCEPT_STAR_RERAISE outside an except* scope");
    if scope.remaining.is_empty() {
        return Ok(());
    }
    let group = Exception::group(scope.message, scope.remaining);
    Err(RunError::Raised(Box::new(group)))
}

/// `END_FINALLY`: re-raises whatever was propagating through this
/// `finally`/`with` block, if anything was. A `finally` entered by normal
/// fallthrough (no exception in flight) leaves `handling_stack` untouched
/// by `enter_handler`, so there is nothing to pop here in that case —
/// callers only reach `END_FINALLY` via the same code path either way, so
/// this checks the frame's currently active exception explicitly.
pub(crate) fn end_finally<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>) -> RunResult<()> {
    let frame = vm.frames.last_mut().expect("frame");
    match frame.handling_stack.pop() {
        Some(exc) => {
            vm.last_exception = vm.frames.last().expect("frame").handling_stack.last().cloned();
            Err(RunError::Raised(Box::new(exc)))
        }
        None => Ok(()),
    }
}

/// `WITH_CLEANUP`: calls the active context manager's `__exit__` with
/// `(type, value, traceback)`; a truthy return suppresses the in-flight
/// exception.
pub(crate) fn with_cleanup<T: ResourceTracker, R: VmTracer>(vm: &mut Vm<T, R>) -> RunResult<()> {
    let exit_method = vm.pop();
    let frame = vm.frames.last_mut().expect("frame");
    let exc = frame.handling_stack.pop();
    match exc {
        Some(exc) => {
            let exc_value = Vm::<T, R>::exception_to_value(&exc);
            let args = vec![Value::Str(Rc::from(exc.exc_type.to_string())), exc_value, Value::None];
            let suppressed = vm.call_value(exit_method, args, Vec::new())?;
            if !suppressed.is_truthy() {
                return Err(RunError::Raised(Box::new(exc)));
            }
            Ok(())
        }
        None => {
            vm.call_value(exit_method, vec![Value::None, Value::None, Value::None], Vec::new())?;
            Ok(())
        }
    }
}
