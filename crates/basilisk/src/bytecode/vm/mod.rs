//! The dispatch loop (§4.3, §4.9): decode one instruction, execute it,
//! advance `ip`. Exception unwinding, call binding, the attribute protocol,
//! binary/comparison operators, and container construction each get their
//! own submodule; this one owns the instruction fetch/decode/branch and the
//! driving loops that tie a pushed [`Frame`] to a returned [`Value`].

mod attr;
mod binary;
mod call;
mod collections;
mod compare;
mod exceptions;

use std::rc::Rc;

use super::op::Opcode;
use crate::exception::{Exception, ExcType, RunError, RunResult, simple_raise};
use crate::frame::BlockKind;
use crate::generator::{GeneratorObj, GeneratorKind, GeneratorState};
use crate::heap::{Shared, shared};
use crate::resource::ResourceTracker;
use crate::run::{ResumeKind, Vm};
use crate::tracer::VmTracer;
use crate::value::Value;

pub(crate) use call::CallOutcome;
pub(crate) use exceptions::ExceptStarScope;

/// What executing one instruction produced.
pub(crate) enum StepResult {
    Continue,
    /// `RETURN` popped the current frame; this is its value.
    Returned(Value),
    /// `YIELD_VALUE`/`YIELD_FROM` suspended the current frame; this is the
    /// produced value. Only legal while driving a generator frame.
    Yielded(Value),
}

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    /// Drives the topmost frame (and any it calls into) to a `RETURN`,
    /// erroring if it ever yields — used for plain function calls and the
    /// top-level module run, neither of which may suspend.
    pub(crate) fn drive_to_return(&mut self) -> RunResult<Value> {
        loop {
            match self.step()? {
                StepResult::Continue => {}
                StepResult::Returned(value) => return Ok(value),
                StepResult::Yielded(_) => {
                    return Err(RunError::Internal("yield outside a generator frame".into()));
                }
            }
        }
    }

    /// Drives the topmost frame to either a `RETURN` or a yield point, for
    /// generator/coroutine stepping.
    fn drive_to_suspend_or_return(&mut self) -> RunResult<StepResult> {
        loop {
            match self.step()? {
                StepResult::Continue => {}
                other => return Ok(other),
            }
        }
    }

    /// Executes exactly one instruction on the current top frame, catching
    /// any error to attempt an in-frame unwind before propagating (§4.7).
    fn step(&mut self) -> RunResult<StepResult> {
        match self.execute_one() {
            Ok(outcome) => Ok(outcome),
            Err(err) => self.handle_error(err),
        }
    }

    /// On an uncatchable error (`Fatal`/`Internal`), pops the current frame
    /// unconditionally and propagates. On a catchable `Raised` error, walks
    /// the current frame's block stack for a handler; if found, resumes
    /// there, otherwise pops the frame and propagates so the caller's own
    /// `step` retries the search in *its* current frame.
    fn handle_error(&mut self, err: RunError) -> RunResult<StepResult> {
        let RunError::Raised(exc) = &err else {
            self.frames.pop();
            return Err(err);
        };
        self.tracer.on_raise(exc);
        let frame = self.frames.last_mut().expect("a frame is always active while stepping");
        if let Some(block_index) = frame.blocks.iter().rposition(|b| exceptions::is_handler_block(b.kind)) {
            let block = frame.blocks[block_index].clone();
            frame.blocks.truncate(block_index + 1);
            frame.truncate_stack(block.stack_level);
            frame.ip = block.handler_pc;
            let exc = (**exc).clone();
            self.tracer.on_catch(&exc);
            exceptions::enter_handler(self, block.kind, exc);
            return Ok(StepResult::Continue);
        }
        self.frames.pop();
        Err(err)
    }

    /// Decodes and executes one instruction, returning the new `ip`
    /// implicitly via frame mutation. Jump-family opcodes set `ip` to the
    /// branch target themselves; everything else falls through to
    /// `next_ip`.
    fn execute_one(&mut self) -> RunResult<StepResult> {
        self.instructions_until_check -= 1;
        if self.instructions_until_check == 0 {
            self.instructions_until_check = self.check_interval;
            self.heap.check_time()?;
        }

        let frame = self.frames.last().expect("a frame is always active while stepping");
        let (opcode, operand, next_ip) = frame
            .code
            .decode_at(frame.ip)
            .ok_or_else(|| RunError::Internal(format!("invalid instruction at offset {}", frame.ip)))?;
        self.tracer.on_dispatch(opcode, frame.ip);
        self.frames.last_mut().expect("frame stack nonempty").ip = next_ip;

        match opcode {
            Opcode::LoadConst => self.op_load_const(operand),
            Opcode::LoadFast => self.op_load_fast(operand)?,
            Opcode::StoreFast => self.op_store_fast(operand),
            Opcode::DeleteFast => self.op_delete_fast(operand),
            Opcode::LoadName => self.op_load_name(operand)?,
            Opcode::StoreName => self.op_store_name(operand),
            Opcode::DeleteName => self.op_delete_name(operand)?,
            Opcode::LoadGlobal => self.op_load_global(operand)?,
            Opcode::StoreGlobal => self.op_store_global(operand),
            Opcode::DeleteGlobal => self.op_delete_global(operand)?,
            Opcode::LoadDeref => self.op_load_deref(operand)?,
            Opcode::StoreDeref => self.op_store_deref(operand),
            Opcode::DeleteDeref => self.op_delete_deref(operand),
            Opcode::LoadClosure => self.op_load_closure(operand),
            Opcode::LoadNone => self.push(Value::None),
            Opcode::LoadTrue => self.push(Value::Bool(true)),
            Opcode::LoadFalse => self.push(Value::Bool(false)),
            Opcode::LoadZero => self.push(Value::Int(0)),
            Opcode::LoadOne => self.push(Value::Int(1)),
            Opcode::LoadEmptyList => self.push(Value::List(shared(Vec::new()))),
            Opcode::LoadEmptyTuple => self.push(Value::Tuple(Rc::from(Vec::new()))),
            Opcode::LoadEmptyDict => self.push(Value::Dict(shared(crate::heap::Dict::new()))),
            Opcode::LoadBuildClass => self.push(Value::BuiltinFunc(Rc::new(crate::value::BuiltinFunction { name: "__build_class__", id: 0 }))),
            Opcode::LoadLocals => self.op_load_locals(),
            Opcode::SetupAnnotations => {}

            Opcode::Pop => {
                self.pop();
            }
            Opcode::Dup => {
                let v = self.top().clone();
                self.push(v);
            }
            Opcode::Dup2 => {
                let frame = self.frames.last_mut().expect("frame");
                let len = frame.stack.len();
                let (a, b) = (frame.stack[len - 2].clone(), frame.stack[len - 1].clone());
                frame.push(a);
                frame.push(b);
            }
            Opcode::Rot2 => {
                let frame = self.frames.last_mut().expect("frame");
                let len = frame.stack.len();
                frame.stack.swap(len - 1, len - 2);
            }
            Opcode::Rot3 => {
                let frame = self.frames.last_mut().expect("frame");
                let len = frame.stack.len();
                frame.stack.swap(len - 1, len - 2);
                frame.stack.swap(len - 2, len - 3);
            }
            Opcode::Nop => {}

            Opcode::BinaryAdd
            | Opcode::BinarySub
            | Opcode::BinaryMul
            | Opcode::BinaryDiv
            | Opcode::BinaryFloordiv
            | Opcode::BinaryMod
            | Opcode::BinaryPow
            | Opcode::BinaryMatmul
            | Opcode::BinaryLshift
            | Opcode::BinaryRshift
            | Opcode::BinaryAnd
            | Opcode::BinaryOr
            | Opcode::BinaryXor => self.exec_binary(opcode, false)?,
            Opcode::InplaceAdd
            | Opcode::InplaceSub
            | Opcode::InplaceMul
            | Opcode::InplaceDiv
            | Opcode::InplaceFloordiv
            | Opcode::InplaceMod
            | Opcode::InplacePow
            | Opcode::InplaceMatmul
            | Opcode::InplaceLshift
            | Opcode::InplaceRshift
            | Opcode::InplaceAnd
            | Opcode::InplaceOr
            | Opcode::InplaceXor => self.exec_binary(opcode, true)?,
            Opcode::UnaryPositive | Opcode::UnaryNegative | Opcode::UnaryNot | Opcode::UnaryInvert => self.exec_unary(opcode)?,
            Opcode::CompareLt
            | Opcode::CompareLe
            | Opcode::CompareGt
            | Opcode::CompareGe
            | Opcode::CompareEq
            | Opcode::CompareNe
            | Opcode::CompareIs
            | Opcode::CompareIsNot
            | Opcode::CompareIn
            | Opcode::CompareNotIn => self.exec_compare(opcode)?,

            Opcode::BinaryAddInt | Opcode::BinarySubInt | Opcode::BinaryMulInt | Opcode::BinaryDivFloat | Opcode::BinaryAddFloat => {
                self.exec_typed_binary(opcode)?;
            }
            Opcode::CompareLtInt | Opcode::CompareLeInt | Opcode::CompareGtInt | Opcode::CompareGeInt | Opcode::CompareEqInt | Opcode::CompareNeInt => {
                self.exec_typed_compare(opcode)?;
            }
            Opcode::CompareAndJump | Opcode::CompareLtLocalJump => self.exec_compare_and_jump(opcode, operand)?,
            Opcode::IncrementFast | Opcode::DecrementFast | Opcode::NegateFast | Opcode::AddConstFast | Opcode::AccumulateFast => {
                self.exec_fast_micro_op(opcode, operand)?;
            }
            Opcode::LenList | Opcode::LenString | Opcode::LenTuple | Opcode::LenDict | Opcode::LenGeneric => self.exec_typed_len(opcode)?,
            Opcode::LoadFastLoadFast | Opcode::LoadFastLoadConst | Opcode::StoreFastLoadFast | Opcode::LoadConstLoadFast | Opcode::LoadGlobalLoadFast => {
                self.exec_fused_load_store(opcode, operand)?;
            }

            Opcode::LoadAttr => self.op_load_attr(operand)?,
            Opcode::StoreAttr => self.op_store_attr(operand)?,
            Opcode::DeleteAttr => self.op_delete_attr(operand)?,
            Opcode::BinarySubscr => self.op_binary_subscr()?,
            Opcode::StoreSubscr => self.op_store_subscr()?,
            Opcode::DeleteSubscr => self.op_delete_subscr()?,
            Opcode::LoadMethod => self.op_load_method(operand)?,
            Opcode::CallMethod => return self.op_call_method(operand),

            Opcode::Jump => {
                self.frames.last_mut().expect("frame").ip = operand as usize;
            }
            Opcode::PopJumpIfTrue => {
                if self.pop().is_truthy() {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                }
            }
            Opcode::PopJumpIfFalse => {
                if !self.pop().is_truthy() {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                }
            }
            Opcode::JumpIfTrue => {
                if self.pop().is_truthy() {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                }
            }
            Opcode::JumpIfFalse => {
                if !self.pop().is_truthy() {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                }
            }
            Opcode::JumpIfTrueOrPop => {
                if self.top().is_truthy() {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                } else {
                    self.pop();
                }
            }
            Opcode::JumpIfFalseOrPop => {
                if self.top().is_truthy() {
                    self.pop();
                } else {
                    self.frames.last_mut().expect("frame").ip = operand as usize;
                }
            }
            Opcode::ContinueLoop => {
                self.frames.last_mut().expect("frame").ip = operand as usize;
            }

            Opcode::GetIter => self.op_get_iter()?,
            Opcode::ForIter => self.op_for_iter(operand)?,
            Opcode::GetAiter => self.op_get_iter()?,
            Opcode::GetAnext => self.op_for_iter(operand)?,
            Opcode::GetAwaitable => {}

            Opcode::BuildTuple => self.op_build_tuple(operand)?,
            Opcode::BuildList => self.op_build_list(operand)?,
            Opcode::BuildSet => self.op_build_set(operand)?,
            Opcode::BuildMap => self.op_build_map(operand)?,
            Opcode::ListAppend => self.op_list_append()?,
            Opcode::SetAdd => self.op_set_add()?,
            Opcode::MapAdd => self.op_map_add()?,
            Opcode::UnpackSequence => self.op_unpack_sequence(operand)?,
            Opcode::UnpackEx => self.op_unpack_ex(operand)?,

            Opcode::Call => return self.op_call(operand),
            Opcode::CallKw => return self.op_call_kw(operand),
            Opcode::CallEx => return self.op_call_ex(operand),
            Opcode::MakeFunction => self.op_make_function(operand)?,

            Opcode::Return => {
                let value = self.pop();
                let frame = self.frames.pop().expect("frame");
                self.tracer.on_frame_pop(&frame.code.name.clone(), self.frames.len());
                return Ok(StepResult::Returned(value));
            }
            Opcode::YieldValue => {
                let value = self.pop();
                return Ok(StepResult::Yielded(value));
            }
            Opcode::YieldFrom => return self.op_yield_from(),
            Opcode::GenStart => {}

            Opcode::SetupExcept => exceptions::setup_block(self, BlockKind::Except, operand),
            Opcode::SetupFinally => exceptions::setup_block(self, BlockKind::Finally, operand),
            Opcode::SetupWith => exceptions::setup_block(self, BlockKind::With, operand),
            Opcode::SetupExceptStar => exceptions::setup_block(self, BlockKind::ExceptStar, operand),
            Opcode::PopExcept => exceptions::pop_except(self),
            Opcode::PopBlock => {
                self.frames.last_mut().expect("frame").blocks.pop();
            }
            Opcode::PopExceptHandler => exceptions::pop_except(self),
            Opcode::ClearException => self.last_exception = None,
            Opcode::ExceptionMatch => self.exec_exception_match()?,
            Opcode::ExceptStarMatch => exceptions::except_star_match(self)?,
            Opcode::ExceptStarReraise => exceptions::except_star_reraise(self)?,
            Opcode::EndFinally => exceptions::end_finally(self)?,
            Opcode::WithCleanup => exceptions::with_cleanup(self)?,
            Opcode::RaiseVarargs => exceptions::raise_varargs(self, operand)?,

            Opcode::MatchSequence => self.exec_match_sequence(operand),
            Opcode::MatchStar => self.exec_match_star(operand),
            Opcode::ExtractStar => self.exec_extract_star(operand),
            Opcode::MatchMapping => self.exec_match_mapping(),
            Opcode::MatchKeys => self.exec_match_keys(operand)?,
            Opcode::CopyDict => self.exec_copy_dict()?,
            Opcode::MatchClass => self.exec_match_class(operand)?,
            Opcode::GetLen => self.exec_get_len()?,

            Opcode::ImportName => self.op_import_name(operand)?,
            Opcode::ImportFrom => self.op_import_from(operand)?,
            Opcode::ImportStar => self.op_import_star()?,
        }
        Ok(StepResult::Continue)
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.frames.last_mut().expect("frame").push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        self.frames.last_mut().expect("frame").pop()
    }

    pub(crate) fn top(&self) -> &Value {
        self.frames.last().expect("frame").top()
    }

    fn op_load_const(&mut self, idx: u16) {
        let value = self.frames.last().expect("frame").code.constants[idx as usize].clone();
        self.push(value);
    }

    fn op_load_fast(&mut self, idx: u16) -> RunResult<()> {
        let value = self.frames.last().expect("frame").locals[idx as usize].clone();
        if matches!(value, Value::Undefined) {
            let name = self.frames.last().expect("frame").code.var_names[idx as usize].clone();
            return simple_raise(ExcType::UnboundLocalError, format!("local variable '{name}' referenced before assignment"));
        }
        self.push(value);
        Ok(())
    }

    fn op_store_fast(&mut self, idx: u16) {
        let value = self.pop();
        self.frames.last_mut().expect("frame").locals[idx as usize] = value;
    }

    fn op_delete_fast(&mut self, idx: u16) {
        self.frames.last_mut().expect("frame").locals[idx as usize] = Value::Undefined;
    }

    fn op_load_name(&mut self, idx: u16) -> RunResult<()> {
        let frame = self.frames.last().expect("frame");
        let name = frame.code.names[idx as usize].clone();
        if let Some(value) = frame.globals.borrow().get(&name) {
            let value = value.clone();
            self.push(value);
            return Ok(());
        }
        // A class body's own namespace (`frame.globals`) doesn't see the
        // defining module's globals through the normal chain, since it's a
        // fresh `Namespace`, not the module's — `enclosing_globals` is that
        // second hop, set only while a class body frame is active.
        if let Some(enclosing) = &frame.enclosing_globals
            && let Some(value) = enclosing.borrow().get(&name)
        {
            let value = value.clone();
            self.push(value);
            return Ok(());
        }
        let value = frame.builtins.borrow().get(&name).cloned();
        match value {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => simple_raise(ExcType::NameError, format!("name '{name}' is not defined")),
        }
    }

    fn op_store_name(&mut self, idx: u16) {
        let value = self.pop();
        let frame = self.frames.last().expect("frame");
        let name = frame.code.names[idx as usize].clone();
        frame.globals.borrow_mut().set(name, value);
    }

    fn op_delete_name(&mut self, idx: u16) -> RunResult<()> {
        let frame = self.frames.last().expect("frame");
        let name = frame.code.names[idx as usize].clone();
        if frame.globals.borrow_mut().remove(&name).is_none() {
            return simple_raise(ExcType::NameError, format!("name '{name}' is not defined"));
        }
        Ok(())
    }

    fn op_load_global(&mut self, idx: u16) -> RunResult<()> {
        self.op_load_name(idx)
    }

    fn op_store_global(&mut self, idx: u16) {
        self.op_store_name(idx);
    }

    fn op_delete_global(&mut self, idx: u16) -> RunResult<()> {
        self.op_delete_name(idx)
    }

    fn op_load_deref(&mut self, idx: u16) -> RunResult<()> {
        let cell = self.frames.last().expect("frame").cells[idx as usize].clone();
        let value = cell.borrow().clone();
        match value {
            Some(value) => {
                self.push(value);
                Ok(())
            }
            None => simple_raise(ExcType::NameError, "free variable referenced before assignment in enclosing scope"),
        }
    }

    fn op_store_deref(&mut self, idx: u16) {
        let value = self.pop();
        let cell = self.frames.last().expect("frame").cells[idx as usize].clone();
        *cell.borrow_mut() = Some(value);
    }

    fn op_delete_deref(&mut self, idx: u16) {
        let cell = self.frames.last().expect("frame").cells[idx as usize].clone();
        *cell.borrow_mut() = None;
    }

    fn op_load_closure(&mut self, idx: u16) {
        let cell = self.frames.last().expect("frame").cells[idx as usize].clone();
        self.push(Value::Cell(cell));
    }

    fn op_load_locals(&mut self) {
        // Built from the current frame's locals on demand; used by class
        // bodies and `locals()`.
        let frame = self.frames.last().expect("frame");
        let mut dict = crate::heap::Dict::new();
        for (name, value) in frame.code.var_names.iter().zip(frame.locals.iter()) {
            if matches!(value, Value::Undefined) {
                continue;
            }
            let key = Value::Str(Rc::clone(name));
            let hash = value_hash(&key);
            dict.insert(hash, key, value.clone(), |_| false);
        }
        self.push(Value::Dict(shared(dict)));
    }

    /// Resumes a suspended generator/coroutine frame: reconstructs a
    /// [`crate::frame::Frame`] from its saved state, injects the
    /// `send`/`throw` payload, drives it, and saves the new suspension
    /// state (or marks it `Closed`) before returning.
    pub(crate) fn resume_generator(&mut self, gen: &Shared<GeneratorObj>, resume: ResumeKind) -> RunResult<Option<Value>> {
        let (function, mut frame, was_created) = {
            let mut g = gen.borrow_mut();
            let was_created = matches!(g.state, GeneratorState::Created);
            g.state = GeneratorState::Running;
            let frame = self.reconstruct_generator_frame(&g);
            (g.function.clone(), frame, was_created)
        };

        match resume {
            ResumeKind::Send(value) => {
                // A just-created generator has no pending `YIELD_VALUE` to
                // receive a result: `generator_send` already rejects a
                // non-`None` value in that case, so the only correct thing
                // to do here is start the frame with nothing pushed. Every
                // other resumption is at a suspension point that popped the
                // yielded value and is waiting for this one back, even when
                // it's `None` and the saved stack happens to be empty (a
                // bare `x = yield` leaves both true).
                if !was_created {
                    frame.push(value);
                }
            }
            ResumeKind::Throw(exc) => {
                frame.handling_stack.push(exc.clone());
                self.frames.push(frame);
                let result = self.handle_error(RunError::Raised(Box::new(exc)));
                match result {
                    Ok(StepResult::Continue) => {}
                    Ok(_) => unreachable!("handle_error only returns Continue or propagates"),
                    Err(err) => {
                        gen.borrow_mut().state = GeneratorState::Closed;
                        return Err(err);
                    }
                }
                return self.finish_generator_drive(gen, function);
            }
        }
        self.frames.push(frame);
        self.finish_generator_drive(gen, function)
    }

    fn finish_generator_drive(&mut self, gen: &Shared<GeneratorObj>, function: Value) -> RunResult<Option<Value>> {
        let _ = &function;
        match self.drive_to_suspend_or_return() {
            Ok(StepResult::Yielded(value)) => {
                let frame = self.frames.pop().expect("generator frame active");
                let mut g = gen.borrow_mut();
                g.state = GeneratorState::Suspended;
                g.saved_ip = frame.ip;
                g.saved_stack = frame.stack;
                g.saved_blocks = frame.blocks;
                g.locals = frame.locals;
                g.saved_handling_exc = frame.handling_stack.last().cloned();
                Ok(Some(value))
            }
            Ok(StepResult::Returned(_)) => {
                gen.borrow_mut().state = GeneratorState::Closed;
                Ok(None)
            }
            Ok(StepResult::Continue) => unreachable!("drive_to_suspend_or_return loops past Continue"),
            Err(err) => {
                gen.borrow_mut().state = GeneratorState::Closed;
                Err(err)
            }
        }
    }

    fn reconstruct_generator_frame(&self, gen: &GeneratorObj) -> crate::frame::Frame {
        let (code, globals, cells) = match &gen.function {
            Value::Function(f) => (Rc::clone(&f.code), f.globals.clone(), f.closure.clone()),
            _ => unreachable!("GeneratorObj::function is always a Value::Function"),
        };
        let mut frame = crate::frame::Frame::new(code, gen.locals.clone(), cells, globals, Rc::clone(&self.builtins));
        frame.ip = gen.saved_ip;
        frame.stack = gen.saved_stack.clone();
        frame.blocks = gen.saved_blocks.clone();
        if let Some(exc) = &gen.saved_handling_exc {
            frame.handling_stack.push(exc.clone());
        }
        frame
    }

    /// Constructs a `Generator`/`Coroutine` value wrapping a not-yet-entered
    /// frame, per §4.4 step 3.
    pub(crate) fn make_generator(kind: GeneratorKind, function: Value, locals: Vec<Value>) -> Value {
        Value::Generator(shared(GeneratorObj::new(kind, function, locals)))
    }
}

/// Hashes a value for internal dict construction (`locals()`, keyword-arg
/// dicts) where the key is always a built-in hashable type, never a
/// user-defined `__hash__`.
pub(crate) fn value_hash(value: &Value) -> u64 {
    value.basic_hash().unwrap_or(0)
}
