//! [`CodeBuilder`]: assembles a [`CodeObject`] instruction by instruction.
//! Stands in for the out-of-scope source-to-bytecode compiler (§4.1, §6) —
//! tests and embedding hosts call this directly.

use std::rc::Rc;

use super::op::Opcode;
use crate::code::{CodeFlags, CodeObject, LineTable};
use crate::value::Value;

/// A not-yet-resolved jump target. Opaque; created by [`CodeBuilder::new_label`]
/// and bound to a concrete offset by [`CodeBuilder::bind_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

struct PendingJump {
    /// Offset of the operand byte pair to patch (the opcode byte plus one).
    operand_offset: usize,
    label: Label,
}

pub struct CodeBuilder {
    name: Rc<str>,
    filename: Rc<str>,
    code: Vec<u8>,
    constants: Vec<Value>,
    names: Vec<Rc<str>>,
    var_names: Vec<Rc<str>>,
    cell_vars: Vec<Rc<str>>,
    free_vars: Vec<Rc<str>>,
    flags: CodeFlags,
    lines: Vec<(usize, u32)>,
    current_line: u32,
    stack_depth: isize,
    max_stack: usize,
    labels: Vec<Option<usize>>,
    pending_jumps: Vec<PendingJump>,
}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: impl Into<Rc<str>>, filename: impl Into<Rc<str>>) -> Self {
        Self {
            name: name.into(),
            filename: filename.into(),
            code: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            var_names: Vec::new(),
            cell_vars: Vec::new(),
            free_vars: Vec::new(),
            flags: CodeFlags::default(),
            lines: Vec::new(),
            current_line: 0,
            stack_depth: 0,
            max_stack: 0,
            labels: Vec::new(),
            pending_jumps: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: CodeFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Marks every subsequent emitted instruction, until the next call, as
    /// belonging to `line`.
    pub fn set_line(&mut self, line: u32) {
        self.current_line = line;
    }

    pub fn add_const(&mut self, value: Value) -> u16 {
        let idx = self.constants.len();
        self.constants.push(value);
        u16::try_from(idx).expect("constant pool overflow")
    }

    pub fn add_name(&mut self, text: &str) -> u16 {
        if let Some(idx) = self.names.iter().position(|n| n.as_ref() == text) {
            return u16::try_from(idx).expect("name pool overflow");
        }
        let idx = self.names.len();
        self.names.push(Rc::from(text));
        u16::try_from(idx).expect("name pool overflow")
    }

    pub fn add_var_name(&mut self, text: &str) -> u16 {
        let idx = self.var_names.len();
        self.var_names.push(Rc::from(text));
        u16::try_from(idx).expect("local variable pool overflow")
    }

    pub fn add_cell_var(&mut self, text: &str) -> u16 {
        let idx = self.cell_vars.len();
        self.cell_vars.push(Rc::from(text));
        u16::try_from(idx).expect("cell variable pool overflow")
    }

    pub fn add_free_var(&mut self, text: &str) -> u16 {
        let idx = self.free_vars.len();
        self.free_vars.push(Rc::from(text));
        u16::try_from(idx).expect("free variable pool overflow")
    }

    #[must_use]
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current end-of-code offset (i.e. "the next
    /// instruction emitted lands here").
    pub fn bind_label(&mut self, label: Label) {
        self.labels[label.0] = Some(self.code.len());
    }

    fn track_line(&mut self, offset: usize) {
        if self.lines.last().is_none_or(|&(_, line)| line != self.current_line) {
            self.lines.push((offset, self.current_line));
        }
    }

    fn adjust_stack(&mut self, delta: isize) {
        self.stack_depth += delta;
        debug_assert!(self.stack_depth >= 0, "operand stack underflow at build time");
        #[expect(clippy::cast_sign_loss, reason = "checked non-negative above")]
        let depth = self.stack_depth as usize;
        self.max_stack = self.max_stack.max(depth);
    }

    /// Emits an opcode with no operand and `stack_effect` net change to the
    /// operand stack (positive pushes, negative pops).
    pub fn op(&mut self, opcode: Opcode, stack_effect: isize) -> usize {
        let offset = self.code.len();
        self.track_line(offset);
        self.code.push(opcode as u8);
        self.adjust_stack(stack_effect);
        offset
    }

    /// Emits an opcode with a 16-bit operand and `stack_effect` net change.
    pub fn op_u16(&mut self, opcode: Opcode, operand: u16, stack_effect: isize) -> usize {
        let offset = self.code.len();
        self.track_line(offset);
        self.code.push(opcode as u8);
        let [lo, hi] = operand.to_le_bytes();
        self.code.push(lo);
        self.code.push(hi);
        self.adjust_stack(stack_effect);
        offset
    }

    /// Emits a jump-family opcode targeting `label`, patched to the label's
    /// final offset once it is bound (it may be bound before or after this
    /// call — both forward and backward jumps are supported).
    pub fn jump(&mut self, opcode: Opcode, label: Label, stack_effect: isize) -> usize {
        let offset = self.op_u16(opcode, 0, stack_effect);
        self.pending_jumps.push(PendingJump { operand_offset: offset + 1, label });
        offset
    }

    // --- Named convenience wrappers covering every opcode family in §4.3 ---

    pub fn load_const(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadConst, idx, 1);
    }
    pub fn load_fast(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadFast, idx, 1);
    }
    pub fn store_fast(&mut self, idx: u16) {
        self.op_u16(Opcode::StoreFast, idx, -1);
    }
    pub fn delete_fast(&mut self, idx: u16) {
        self.op_u16(Opcode::DeleteFast, idx, 0);
    }
    pub fn load_name(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadName, idx, 1);
    }
    pub fn store_name(&mut self, idx: u16) {
        self.op_u16(Opcode::StoreName, idx, -1);
    }
    pub fn delete_name(&mut self, idx: u16) {
        self.op_u16(Opcode::DeleteName, idx, 0);
    }
    pub fn load_global(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadGlobal, idx, 1);
    }
    pub fn store_global(&mut self, idx: u16) {
        self.op_u16(Opcode::StoreGlobal, idx, -1);
    }
    pub fn delete_global(&mut self, idx: u16) {
        self.op_u16(Opcode::DeleteGlobal, idx, 0);
    }
    pub fn load_deref(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadDeref, idx, 1);
    }
    pub fn store_deref(&mut self, idx: u16) {
        self.op_u16(Opcode::StoreDeref, idx, -1);
    }
    pub fn delete_deref(&mut self, idx: u16) {
        self.op_u16(Opcode::DeleteDeref, idx, 0);
    }
    pub fn load_closure(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadClosure, idx, 1);
    }
    pub fn load_none(&mut self) {
        self.op(Opcode::LoadNone, 1);
    }
    pub fn load_true(&mut self) {
        self.op(Opcode::LoadTrue, 1);
    }
    pub fn load_false(&mut self) {
        self.op(Opcode::LoadFalse, 1);
    }
    pub fn load_zero(&mut self) {
        self.op(Opcode::LoadZero, 1);
    }
    pub fn load_one(&mut self) {
        self.op(Opcode::LoadOne, 1);
    }
    pub fn load_empty_list(&mut self) {
        self.op(Opcode::LoadEmptyList, 1);
    }
    pub fn load_empty_tuple(&mut self) {
        self.op(Opcode::LoadEmptyTuple, 1);
    }
    pub fn load_empty_dict(&mut self) {
        self.op(Opcode::LoadEmptyDict, 1);
    }
    pub fn load_build_class(&mut self) {
        self.op(Opcode::LoadBuildClass, 1);
    }
    pub fn load_locals(&mut self) {
        self.op(Opcode::LoadLocals, 1);
    }
    pub fn setup_annotations(&mut self) {
        self.op(Opcode::SetupAnnotations, 0);
    }

    pub fn pop(&mut self) {
        self.op(Opcode::Pop, -1);
    }
    pub fn dup(&mut self) {
        self.op(Opcode::Dup, 1);
    }
    pub fn dup2(&mut self) {
        self.op(Opcode::Dup2, 2);
    }
    pub fn rot2(&mut self) {
        self.op(Opcode::Rot2, 0);
    }
    pub fn rot3(&mut self) {
        self.op(Opcode::Rot3, 0);
    }
    pub fn nop(&mut self) {
        self.op(Opcode::Nop, 0);
    }

    pub fn binary_op(&mut self, opcode: Opcode) {
        self.op(opcode, -1);
    }
    pub fn unary_op(&mut self, opcode: Opcode) {
        self.op(opcode, 0);
    }
    pub fn compare_op(&mut self, opcode: Opcode) {
        self.op(opcode, -1);
    }

    pub fn load_attr(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadAttr, idx, 0);
    }
    pub fn store_attr(&mut self, idx: u16) {
        self.op_u16(Opcode::StoreAttr, idx, -2);
    }
    pub fn delete_attr(&mut self, idx: u16) {
        self.op_u16(Opcode::DeleteAttr, idx, -1);
    }
    pub fn binary_subscr(&mut self) {
        self.op(Opcode::BinarySubscr, -1);
    }
    pub fn store_subscr(&mut self) {
        self.op(Opcode::StoreSubscr, -3);
    }
    pub fn delete_subscr(&mut self) {
        self.op(Opcode::DeleteSubscr, -2);
    }
    pub fn load_method(&mut self, idx: u16) {
        self.op_u16(Opcode::LoadMethod, idx, 1);
    }
    pub fn call_method(&mut self, argc: u16) {
        self.op_u16(Opcode::CallMethod, argc, -isize::from(argc) - 1);
    }

    pub fn jump_always(&mut self, label: Label) {
        self.jump(Opcode::Jump, label, 0);
    }
    pub fn pop_jump_if_true(&mut self, label: Label) {
        self.jump(Opcode::PopJumpIfTrue, label, -1);
    }
    pub fn pop_jump_if_false(&mut self, label: Label) {
        self.jump(Opcode::PopJumpIfFalse, label, -1);
    }
    pub fn jump_if_true(&mut self, label: Label) {
        self.jump(Opcode::JumpIfTrue, label, -1);
    }
    pub fn jump_if_false(&mut self, label: Label) {
        self.jump(Opcode::JumpIfFalse, label, -1);
    }
    pub fn jump_if_true_or_pop(&mut self, label: Label) {
        self.jump(Opcode::JumpIfTrueOrPop, label, 0);
    }
    pub fn jump_if_false_or_pop(&mut self, label: Label) {
        self.jump(Opcode::JumpIfFalseOrPop, label, 0);
    }
    pub fn continue_loop(&mut self, label: Label) {
        self.jump(Opcode::ContinueLoop, label, 0);
    }

    pub fn get_iter(&mut self) {
        self.op(Opcode::GetIter, 0);
    }
    pub fn for_iter(&mut self, end_label: Label) {
        self.jump(Opcode::ForIter, end_label, 1);
    }
    pub fn get_aiter(&mut self) {
        self.op(Opcode::GetAiter, 0);
    }
    pub fn get_anext(&mut self) {
        self.op(Opcode::GetAnext, 1);
    }
    pub fn get_awaitable(&mut self) {
        self.op(Opcode::GetAwaitable, 0);
    }

    pub fn build_tuple(&mut self, count: u16) {
        self.op_u16(Opcode::BuildTuple, count, 1 - isize::from(count));
    }
    pub fn build_list(&mut self, count: u16) {
        self.op_u16(Opcode::BuildList, count, 1 - isize::from(count));
    }
    pub fn build_set(&mut self, count: u16) {
        self.op_u16(Opcode::BuildSet, count, 1 - isize::from(count));
    }
    pub fn build_map(&mut self, pair_count: u16) {
        self.op_u16(Opcode::BuildMap, pair_count, 1 - 2 * isize::from(pair_count));
    }
    pub fn list_append(&mut self) {
        self.op(Opcode::ListAppend, -1);
    }
    pub fn set_add(&mut self) {
        self.op(Opcode::SetAdd, -1);
    }
    pub fn map_add(&mut self) {
        self.op(Opcode::MapAdd, -2);
    }
    pub fn unpack_sequence(&mut self, count: u16) {
        self.op_u16(Opcode::UnpackSequence, count, isize::from(count) - 1);
    }
    pub fn unpack_ex(&mut self, before_after: u16) {
        let total = isize::from(before_after & 0xff) + isize::from(before_after >> 8) + 1;
        self.op_u16(Opcode::UnpackEx, before_after, total - 1);
    }

    pub fn call(&mut self, argc: u16) {
        self.op_u16(Opcode::Call, argc, -isize::from(argc));
    }
    pub fn call_kw(&mut self, argc: u16) {
        self.op_u16(Opcode::CallKw, argc, -isize::from(argc) - 1);
    }
    pub fn call_ex(&mut self, flags: u16) {
        self.op_u16(Opcode::CallEx, flags, -1);
    }
    pub fn make_function(&mut self, flags: u16) {
        self.op_u16(Opcode::MakeFunction, flags, 0);
    }

    pub fn return_value(&mut self) {
        self.op(Opcode::Return, -1);
    }
    pub fn yield_value(&mut self) {
        self.op(Opcode::YieldValue, 0);
    }
    pub fn yield_from(&mut self) {
        self.op(Opcode::YieldFrom, -1);
    }
    pub fn gen_start(&mut self) {
        self.op(Opcode::GenStart, 0);
    }

    pub fn setup_except(&mut self, handler: Label) {
        self.jump(Opcode::SetupExcept, handler, 0);
    }
    pub fn setup_finally(&mut self, handler: Label) {
        self.jump(Opcode::SetupFinally, handler, 0);
    }
    pub fn setup_with(&mut self, handler: Label) {
        self.jump(Opcode::SetupWith, handler, 0);
    }
    pub fn setup_except_star(&mut self, handler: Label) {
        self.jump(Opcode::SetupExceptStar, handler, 0);
    }
    pub fn pop_except(&mut self) {
        self.op(Opcode::PopExcept, 0);
    }
    pub fn pop_block(&mut self) {
        self.op(Opcode::PopBlock, 0);
    }
    pub fn pop_except_handler(&mut self) {
        self.op(Opcode::PopExceptHandler, 0);
    }
    pub fn clear_exception(&mut self) {
        self.op(Opcode::ClearException, 0);
    }
    pub fn exception_match(&mut self) {
        self.op(Opcode::ExceptionMatch, 0);
    }
    pub fn except_star_match(&mut self) {
        self.op(Opcode::ExceptStarMatch, 1);
    }
    pub fn except_star_reraise(&mut self) {
        self.op(Opcode::ExceptStarReraise, 0);
    }
    pub fn end_finally(&mut self) {
        self.op(Opcode::EndFinally, 0);
    }
    pub fn with_cleanup(&mut self) {
        self.op(Opcode::WithCleanup, 0);
    }
    pub fn raise_varargs(&mut self, argc: u16) {
        self.op_u16(Opcode::RaiseVarargs, argc, -isize::from(argc));
    }

    pub fn match_sequence(&mut self, len: u16) {
        self.op_u16(Opcode::MatchSequence, len, 1);
    }
    pub fn match_star(&mut self, min: u16) {
        self.op_u16(Opcode::MatchStar, min, 1);
    }
    pub fn extract_star(&mut self, before_after: u16) {
        self.op_u16(Opcode::ExtractStar, before_after, 0);
    }
    pub fn match_mapping(&mut self) {
        self.op(Opcode::MatchMapping, 1);
    }
    pub fn match_keys(&mut self, count: u16) {
        self.op_u16(Opcode::MatchKeys, count, 1);
    }
    pub fn copy_dict(&mut self) {
        self.op(Opcode::CopyDict, 1);
    }
    pub fn match_class(&mut self, count: u16) {
        self.op_u16(Opcode::MatchClass, count, 1 - isize::from(count));
    }
    pub fn get_len(&mut self) {
        self.op(Opcode::GetLen, 1);
    }

    pub fn import_name(&mut self, idx: u16) {
        self.op_u16(Opcode::ImportName, idx, -1);
    }
    pub fn import_from(&mut self, idx: u16) {
        self.op_u16(Opcode::ImportFrom, idx, 1);
    }
    pub fn import_star(&mut self) {
        self.op(Opcode::ImportStar, -1);
    }

    /// Resolves every pending jump's operand to its bound label's offset and
    /// produces the finished, immutable `CodeObject`.
    #[must_use]
    pub fn finish(mut self) -> Rc<CodeObject> {
        for pending in &self.pending_jumps {
            let target = self.labels[pending.label.0].expect("jump target label was never bound");
            let target = u16::try_from(target).expect("jump target exceeds u16 range");
            let [lo, hi] = target.to_le_bytes();
            self.code[pending.operand_offset] = lo;
            self.code[pending.operand_offset + 1] = hi;
        }
        Rc::new(CodeObject {
            name: self.name,
            filename: self.filename,
            code: self.code,
            constants: self.constants,
            names: self.names,
            var_names: self.var_names,
            cell_vars: self.cell_vars,
            free_vars: self.free_vars,
            stack_size: self.max_stack,
            lines: LineTable::new(self.lines),
            flags: self.flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backward_jump_resolves_to_loop_top() {
        let mut builder = CodeBuilder::new("loop", "<test>");
        let top = builder.new_label();
        builder.bind_label(top);
        builder.load_zero();
        builder.pop();
        builder.jump_always(top);
        let code = builder.finish();
        assert_eq!(code.code[0], Opcode::LoadZero as u8);
        // The Jump operand must point back at offset 0.
        let jump_operand_offset = code.code.len() - 2;
        let target = u16::from_le_bytes([code.code[jump_operand_offset], code.code[jump_operand_offset + 1]]);
        assert_eq!(target, 0);
    }

    #[test]
    fn stack_high_water_mark_tracks_peak_depth() {
        let mut builder = CodeBuilder::new("f", "<test>");
        builder.load_zero();
        builder.load_one();
        builder.binary_op(Opcode::BinaryAdd);
        let code = builder.finish();
        assert_eq!(code.stack_size, 2);
    }
}
