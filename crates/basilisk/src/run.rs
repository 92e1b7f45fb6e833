//! The embedding API (§6, §10.3): construct a [`Vm`], run a [`CodeObject`],
//! drive a generator's `send`/`throw`/`close`.

use std::rc::Rc;

use crate::class::Class;
use crate::code::CodeObject;
use crate::exception::{Exception, RunError, RunResult};
use crate::frame::Frame;
use crate::generator::{GeneratorObj, GeneratorState};
use crate::heap::{Heap, Shared, shared};
use crate::loader::{ModuleLoader, NoModuleLoader};
use crate::object::Namespace;
use crate::resource::{NoLimitTracker, ResourceTracker, DEFAULT_CHECK_INTERVAL};
use crate::tracer::{NoopTracer, VmTracer};
use crate::value::Value;

/// What a top-level run (or a generator step) produced, distinguishing a
/// normal result from an uncaught *guest* exception (§7): only
/// [`RunError::Raised`] is ever folded into this type. A host-imposed
/// [`RunError::Fatal`] or a bytecode-contract [`RunError::Internal`] is
/// still returned as `Err` from every entry point below.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Value),
    Raised(Exception),
}

/// The execution engine. Generic over the configured [`ResourceTracker`]
/// (§10.3) and [`VmTracer`] (§10.1) so both are monomorphised away on the
/// hot path rather than costing a vtable call per opcode.
pub struct Vm<T: ResourceTracker = NoLimitTracker, R: VmTracer = NoopTracer> {
    pub(crate) frames: Vec<Frame>,
    pub(crate) heap: Heap<T>,
    pub(crate) tracer: R,
    pub(crate) builtins: Shared<Namespace>,
    pub(crate) object_class: Value,
    pub(crate) check_interval: usize,
    pub(crate) instructions_until_check: usize,
    /// The exception a bare `raise` re-raises; set while a handler block is
    /// active and restored as handler blocks pop (§4.7).
    pub(crate) last_exception: Option<Exception>,
    /// Auxiliary stack for in-flight `except*` group partitioning (§4.7),
    /// pushed by `SETUP_EXCEPT_STAR`'s unwind and consumed by
    /// `EXCEPT_STAR_MATCH`/`EXCEPT_STAR_RERAISE`.
    pub(crate) except_star_stack: Vec<crate::bytecode::vm::ExceptStarScope>,
    /// Host hook for `IMPORT_NAME` (§6); defaults to one that rejects every
    /// name with `ModuleNotFoundError` until a host installs a real one via
    /// [`Vm::set_module_loader`].
    pub(crate) module_loader: Box<dyn ModuleLoader>,
}

impl<T: ResourceTracker> Vm<T, NoopTracer> {
    #[must_use]
    pub fn new(tracker: T) -> Self {
        Self::with_tracer(tracker, NoopTracer)
    }
}

impl<T: ResourceTracker, R: VmTracer> Vm<T, R> {
    #[must_use]
    pub fn with_tracer(tracker: T, tracer: R) -> Self {
        let object_class = Value::Class(shared(Class::new("object", Vec::new())));
        if let Value::Class(cls) = &object_class {
            cls.borrow_mut().mro.push(object_class.clone());
        }
        Self {
            frames: Vec::new(),
            heap: Heap::new(tracker),
            tracer,
            builtins: shared(Namespace::new()),
            object_class,
            check_interval: DEFAULT_CHECK_INTERVAL,
            instructions_until_check: DEFAULT_CHECK_INTERVAL,
            last_exception: None,
            except_star_stack: Vec::new(),
            module_loader: Box::new(NoModuleLoader),
        }
    }

    /// Overrides the amortised cancellation/deadline check interval (§5).
    /// Clamped to a minimum of 1.
    pub fn set_check_interval(&mut self, instructions: usize) {
        self.check_interval = instructions.max(1);
        self.instructions_until_check = self.check_interval;
    }

    /// Installs the host's `IMPORT_NAME` resolver, replacing the default
    /// that rejects every import.
    pub fn set_module_loader(&mut self, loader: impl ModuleLoader + 'static) {
        self.module_loader = Box::new(loader);
    }

    #[must_use]
    pub fn builtins(&self) -> &Shared<Namespace> {
        &self.builtins
    }

    #[must_use]
    pub fn object_class(&self) -> &Value {
        &self.object_class
    }

    /// Runs a top-level `CodeObject` (a module body) to completion.
    pub fn run(&mut self, code: Rc<CodeObject>, globals: Shared<Namespace>) -> RunResult<RunOutcome> {
        self.heap.check_recursion_depth(self.frames.len())?;
        let locals = vec![Value::Undefined; code.local_count()];
        let cells = (0..code.cell_vars.len() + code.free_vars.len()).map(|_| shared(None)).collect();
        let builtins = Rc::clone(&self.builtins);
        let frame = Frame::new(code, locals, cells, globals, builtins);
        self.tracer.on_frame_push(&frame.code.name.clone(), self.frames.len());
        self.frames.push(frame);
        match self.drive_to_return() {
            Ok(value) => Ok(RunOutcome::Completed(value)),
            Err(RunError::Raised(exc)) => Ok(RunOutcome::Raised(*exc)),
            Err(other) => Err(other),
        }
    }

    /// `generator.send(value)` (§4.8). Returns `Ok(Some(produced))` on a
    /// yield, `Ok(None)` when the generator has run to completion (the
    /// return value, if any, is discarded the way `StopIteration`'s payload
    /// would be surfaced separately by a caller that wants it).
    pub fn generator_send(&mut self, gen: &Shared<GeneratorObj>, sent: Value) -> RunResult<Option<Value>> {
        {
            let g = gen.borrow();
            if matches!(g.state, GeneratorState::Closed) {
                return crate::exception::simple_raise(crate::exception::ExcType::StopIteration, "generator already closed");
            }
            if matches!(g.state, GeneratorState::Running) {
                return crate::exception::simple_raise(crate::exception::ExcType::ValueError, "generator already executing");
            }
            if matches!(g.state, GeneratorState::Created) && !matches!(sent, Value::None) {
                return crate::exception::simple_raise(crate::exception::ExcType::TypeError, "can't send non-None value to a just-started generator");
            }
        }
        self.resume_generator(gen, ResumeKind::Send(sent))
    }

    /// `generator.throw(exc)` (§4.8): injects `exc` as if it had just been
    /// raised at the generator's current suspension point.
    pub fn generator_throw(&mut self, gen: &Shared<GeneratorObj>, exc: Exception) -> RunResult<Option<Value>> {
        if gen.borrow().is_closed() {
            return Err(RunError::Raised(Box::new(exc)));
        }
        self.resume_generator(gen, ResumeKind::Throw(exc))
    }

    /// `generator.close()` (§4.8): throws `GeneratorExit`; a generator that
    /// yields again in response has misbehaved (`RuntimeError`).
    pub fn generator_close(&mut self, gen: &Shared<GeneratorObj>) -> RunResult<()> {
        if gen.borrow().is_closed() {
            return Ok(());
        }
        let exit = Exception::new(crate::exception::ExcType::GeneratorExit, None);
        match self.resume_generator(gen, ResumeKind::Throw(exit)) {
            Ok(Some(_)) => crate::exception::simple_raise(crate::exception::ExcType::RuntimeError, "generator ignored GeneratorExit"),
            Ok(None) => Ok(()),
            Err(RunError::Raised(exc)) if exc.matches(crate::exception::ExcType::GeneratorExit) || exc.matches(crate::exception::ExcType::StopIteration) => {
                gen.borrow_mut().state = GeneratorState::Closed;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

pub(crate) enum ResumeKind {
    Send(Value),
    Throw(Exception),
}
