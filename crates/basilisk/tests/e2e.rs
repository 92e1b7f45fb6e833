//! End-to-end scenarios assembled directly with [`CodeBuilder`], since this
//! crate has no lexer/parser/compiler of its own: each test plays the role a
//! compiler's backend would, emitting a small module body and checking what
//! the engine does with it.

use std::rc::Rc;

use basilisk::{
    Class, CodeBuilder, CodeFlags, CodeObject, Function, Instance, NoLimitTracker, Namespace, Opcode, RunOutcome, Value, Vm, install_globals, shared,
};
use pretty_assertions::assert_eq;

fn run(code: Rc<CodeObject>) -> RunOutcome {
    let mut vm: Vm<NoLimitTracker> = Vm::new(NoLimitTracker);
    install_globals(vm.builtins());
    let globals = shared(Namespace::new());
    vm.run(code, globals).expect("run should not produce a host-level error")
}

fn completed(outcome: RunOutcome) -> Value {
    match outcome {
        RunOutcome::Completed(value) => value,
        RunOutcome::Raised(exc) => panic!("expected completion, got an uncaught exception: {exc}"),
    }
}

/// `Value` has no `PartialEq` impl (equality is a VM-mediated operation per
/// `__eq__`, not a structural derive — see `bytecode/vm/compare.rs`), so
/// these tests unwrap the concrete variant they expect instead.
fn expect_int(value: Value) -> i64 {
    match value {
        Value::Int(n) => n,
        other => panic!("expected Value::Int, got {other:?}"),
    }
}

#[test]
fn arithmetic_precedence_without_parens() {
    // 1 + 2 * 3
    let mut builder = CodeBuilder::new("<mod>", "<test>");
    let one = builder.add_const(Value::Int(1));
    let two = builder.add_const(Value::Int(2));
    let three = builder.add_const(Value::Int(3));
    builder.load_const(one);
    builder.load_const(two);
    builder.load_const(three);
    builder.binary_op(Opcode::BinaryMul);
    builder.binary_op(Opcode::BinaryAdd);
    builder.return_value();

    let value = completed(run(builder.finish()));
    assert_eq!(expect_int(value), 7);
}

#[test]
fn loop_accumulates_a_running_total() {
    // total = 0; i = 0
    // while i <= 5: total += i; i += 1
    // return total
    let mut builder = CodeBuilder::new("<mod>", "<test>");
    let total = builder.add_var_name("total");
    let i = builder.add_var_name("i");
    let limit = builder.add_const(Value::Int(5));

    builder.load_zero();
    builder.store_fast(total);
    builder.load_zero();
    builder.store_fast(i);

    let top = builder.new_label();
    let end = builder.new_label();
    builder.bind_label(top);
    builder.load_fast(i);
    builder.load_const(limit);
    builder.compare_op(Opcode::CompareLe);
    builder.pop_jump_if_false(end);

    builder.load_fast(total);
    builder.load_fast(i);
    builder.binary_op(Opcode::BinaryAdd);
    builder.store_fast(total);

    builder.load_fast(i);
    builder.load_one();
    builder.binary_op(Opcode::BinaryAdd);
    builder.store_fast(i);

    builder.jump_always(top);
    builder.bind_label(end);
    builder.load_fast(total);
    builder.return_value();

    let value = completed(run(builder.finish()));
    assert_eq!(expect_int(value), 15);
}

#[test]
fn user_function_call_round_trips_an_argument() {
    // def add_one(x): return x + 1
    // return add_one(41)
    let mut inner = CodeBuilder::new("add_one", "<test>");
    let x = inner.add_var_name("x");
    let one = inner.add_const(Value::Int(1));
    inner.load_fast(x);
    inner.load_const(one);
    inner.binary_op(Opcode::BinaryAdd);
    inner.return_value();
    let inner_code = inner.with_flags(CodeFlags { positional_count: 1, ..Default::default() }).finish();

    let mut builder = CodeBuilder::new("<mod>", "<test>");
    let code_const = builder.add_const(Value::Code(inner_code));
    let arg = builder.add_const(Value::Int(41));
    builder.load_const(code_const);
    builder.make_function(0);
    let fn_slot = builder.add_var_name("add_one");
    builder.store_fast(fn_slot);

    builder.load_fast(fn_slot);
    builder.load_const(arg);
    builder.call(1);
    builder.return_value();

    let value = completed(run(builder.finish()));
    assert_eq!(expect_int(value), 42);
}

#[test]
fn list_building_and_len_builtin() {
    // return len([1, 2, 3])
    let mut builder = CodeBuilder::new("<mod>", "<test>");
    let len_name = builder.add_name("len");
    let one = builder.add_const(Value::Int(1));
    let two = builder.add_const(Value::Int(2));
    let three = builder.add_const(Value::Int(3));
    builder.load_name(len_name);
    builder.load_const(one);
    builder.load_const(two);
    builder.load_const(three);
    builder.build_list(3);
    builder.call(1);
    builder.return_value();

    let value = completed(run(builder.finish()));
    assert_eq!(expect_int(value), 3);
}

#[test]
fn uncaught_raise_surfaces_as_raised_outcome() {
    // raise ValueError("boom")
    let mut builder = CodeBuilder::new("<mod>", "<test>");
    let exc_name = builder.add_name("ValueError");
    let msg = builder.add_const(Value::Str(Rc::from("boom")));
    builder.load_name(exc_name);
    builder.load_const(msg);
    builder.call(1);
    builder.raise_varargs(1);
    // RAISE_VARARGS never falls through, but the builder still needs a
    // balanced trailing instruction for its stack-depth bookkeeping.
    builder.load_none();
    builder.return_value();

    match run(builder.finish()) {
        RunOutcome::Raised(exc) => assert!(exc.matches(basilisk::ExcType::ValueError)),
        RunOutcome::Completed(value) => panic!("expected an uncaught exception, completed with {value}"),
    }
}

#[test]
fn try_except_catches_a_matching_exception() {
    // try:
    //     raise ValueError("boom")
    // except ValueError:
    //     return 99
    let mut builder = CodeBuilder::new("<mod>", "<test>");
    let exc_name = builder.add_name("ValueError");
    let msg = builder.add_const(Value::Str(Rc::from("boom")));
    let ninety_nine = builder.add_const(Value::Int(99));

    let handler = builder.new_label();
    builder.setup_except(handler);
    builder.load_name(exc_name);
    builder.load_const(msg);
    builder.call(1);
    builder.raise_varargs(1);
    builder.pop_block();
    builder.load_none();
    builder.return_value();

    builder.bind_label(handler);
    builder.load_name(exc_name);
    builder.exception_match();
    let reraise = builder.new_label();
    builder.pop_jump_if_false(reraise);
    builder.pop_except();
    builder.load_const(ninety_nine);
    builder.return_value();

    builder.bind_label(reraise);
    builder.end_finally();

    let value = completed(run(builder.finish()));
    assert_eq!(expect_int(value), 99);
}

#[test]
fn guest_class_overloads_addition_via_dunder() {
    // class Box:
    //     def __add__(self, other): return self.value + other.value
    // a = Box(); a.value = 10
    // b = Box(); b.value = 32
    // return a + b
    let mut add_method = CodeBuilder::new("__add__", "<test>");
    let self_param = add_method.add_var_name("self");
    let other_param = add_method.add_var_name("other");
    let value_attr = add_method.add_name("value");
    add_method.load_fast(self_param);
    add_method.load_attr(value_attr);
    add_method.load_fast(other_param);
    add_method.load_attr(value_attr);
    add_method.binary_op(Opcode::BinaryAdd);
    add_method.return_value();
    let add_method_code = add_method.with_flags(CodeFlags { positional_count: 2, ..Default::default() }).finish();

    let mut vm: Vm<NoLimitTracker> = Vm::new(NoLimitTracker);
    install_globals(vm.builtins());
    let globals = shared(Namespace::new());

    let method_fn = Value::Function(Rc::new(Function::new("__add__", add_method_code, globals.clone())));
    let class_cell = shared(Class::new("Box", vec![vm.object_class().clone()]));
    class_cell.borrow_mut().attrs.insert(Rc::from("__add__"), method_fn);
    let class_value = Value::Class(class_cell.clone());
    class_cell.borrow_mut().mro = vec![class_value.clone(), vm.object_class().clone()];

    let mut a = Instance::new(class_value.clone(), true);
    a.attrs.as_mut().unwrap().insert(Rc::from("value"), Value::Int(10));
    let mut b = Instance::new(class_value, true);
    b.attrs.as_mut().unwrap().insert(Rc::from("value"), Value::Int(32));

    let mut builder = CodeBuilder::new("<mod>", "<test>");
    let a_const = builder.add_const(Value::Instance(shared(a)));
    let b_const = builder.add_const(Value::Instance(shared(b)));
    builder.load_const(a_const);
    builder.load_const(b_const);
    builder.binary_op(Opcode::BinaryAdd);
    builder.return_value();

    let outcome = vm.run(builder.finish(), globals).expect("run should not produce a host-level error");
    assert_eq!(expect_int(completed(outcome)), 42);
}
