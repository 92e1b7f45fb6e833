#![expect(dead_code, reason = "scaffolding for opcode families not yet exercised by the demo CLI")]
#![expect(clippy::too_many_arguments, reason = "call-binding signatures mirror Python's wide calling convention")]

//! `basilisk` is the execution engine for a dynamically-typed, high-level
//! scripting language modelled on Python 3 semantics: object model,
//! exceptions, generators/coroutines, descriptor protocol, pattern matching.
//!
//! This crate is the **core**: bytecode dispatch loop, runtime value model,
//! frame/call machinery, exception unwinding, and generator suspension. The
//! lexer, parser, and source-to-bytecode compiler are explicitly out of
//! scope; [`bytecode::CodeBuilder`] lets callers (tests, an embedding host,
//! or a future compiler crate) assemble a [`code::CodeObject`] directly.

mod builtins;
mod bytecode;
mod class;
mod code;
mod exception;
mod frame;
mod function;
mod generator;
mod heap;
mod intern;
mod iterator;
mod loader;
mod object;
mod py_hash;
mod resource;
mod run;
mod tracer;
mod value;

pub use builtins::install_globals;
pub use bytecode::{CodeBuilder, Opcode};
pub use class::{Class, Instance, Property};
pub use code::{CodeFlags, CodeObject};
pub use exception::{ExcType, Exception, RunError, RunResult};
pub use function::Function;
pub use heap::{Shared, shared};
pub use loader::{ModuleLoader, NoModuleLoader};
pub use object::Namespace;
pub use resource::{DEFAULT_MAX_RECURSION_DEPTH, LimitedTracker, NoLimitTracker, ResourceLimits, ResourceTracker};
pub use run::{RunOutcome, Vm};
pub use tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer};
pub use value::Value;
