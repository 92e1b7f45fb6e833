use std::{env, process::ExitCode, time::Instant};

use basilisk::{CodeBuilder, NoLimitTracker, Namespace, Opcode, RunOutcome, Value, Vm, install_globals, shared};

/// Builds the module body `total = sum(i*i for i in range(1, n + 1)); print(total); total`
/// directly with [`CodeBuilder`] — this crate has no lexer/parser/compiler of its own, so the
/// demo program is assembled instruction by instruction rather than read from a source file.
fn build_sum_of_squares(limit: i64) -> std::rc::Rc<basilisk::CodeObject> {
    let mut builder = CodeBuilder::new("<sum_of_squares>", "<embedded>");

    let i = builder.add_var_name("i");
    let total = builder.add_var_name("total");
    let print_name = builder.add_name("print");
    let limit_const = builder.add_const(Value::Int(limit));

    builder.load_zero();
    builder.store_fast(i);
    builder.load_zero();
    builder.store_fast(total);

    let top = builder.new_label();
    let end = builder.new_label();
    builder.bind_label(top);

    builder.load_fast(i);
    builder.load_const(limit_const);
    builder.compare_op(Opcode::CompareLe);
    builder.pop_jump_if_false(end);

    builder.load_fast(total);
    builder.load_fast(i);
    builder.load_fast(i);
    builder.binary_op(Opcode::BinaryMul);
    builder.binary_op(Opcode::BinaryAdd);
    builder.store_fast(total);

    builder.load_fast(i);
    builder.load_one();
    builder.binary_op(Opcode::BinaryAdd);
    builder.store_fast(i);

    builder.jump_always(top);
    builder.bind_label(end);

    builder.load_name(print_name);
    builder.load_fast(total);
    builder.call(1);
    builder.pop();

    builder.load_fast(total);
    builder.return_value();

    builder.finish()
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let limit: i64 = match args.get(1).map(|s| s.parse::<i64>()) {
        Some(Ok(n)) => n,
        Some(Err(err)) => {
            eprintln!("error: '{}' is not an integer: {err}", args[1]);
            return ExitCode::FAILURE;
        }
        None => 10,
    };

    let code = build_sum_of_squares(limit);

    let mut vm: Vm<NoLimitTracker> = Vm::new(NoLimitTracker);
    install_globals(vm.builtins());
    let globals = shared(Namespace::new());

    let start = Instant::now();
    let outcome = match vm.run(code, globals) {
        Ok(outcome) => outcome,
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let elapsed = start.elapsed();

    match outcome {
        RunOutcome::Completed(value) => {
            eprintln!("success after {elapsed:?}, returned {value}");
            ExitCode::SUCCESS
        }
        RunOutcome::Raised(exc) => {
            eprintln!("unhandled exception after {elapsed:?}:\n{exc}");
            ExitCode::FAILURE
        }
    }
}
