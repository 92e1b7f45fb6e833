//! Suspendable execution contexts: [`GeneratorObj`] backs both `Generator`
//! and `Coroutine` values (§4.8 of `SPEC_FULL.md`).

use crate::frame::Block;
use crate::value::Value;

/// Distinguishes a plain generator from an `async def` coroutine. The
/// state machine and suspend/resume mechanics are identical; only which
/// opcodes may legally suspend the frame differs (`YIELD_VALUE` vs.
/// `GET_AWAITABLE`/`GET_ANEXT`), which the dispatch loop enforces, not this
/// struct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GeneratorKind {
    Generator,
    Coroutine,
}

/// A generator/coroutine's execution state. Total: every `send`/`throw`/
/// `close` call moves it to exactly one well-defined next state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GeneratorState {
    /// Created but never stepped; the frame has not been entered yet.
    Created,
    /// Suspended at a `YIELD_VALUE`/`YIELD_FROM`; can be resumed.
    Suspended,
    /// Currently being driven by `send`/`throw`/`close`. Prevents
    /// reentrant resumption of a generator from within itself.
    Running,
    /// Finished (returned, raised, or closed). Every further `send` raises
    /// `StopIteration`; every further `throw` re-raises immediately.
    Closed,
}

/// A suspended generator or coroutine frame.
///
/// The function's locals are captured directly (`locals` below) rather
/// than via a live `Frame` sitting on the Rust call stack: a generator
/// survives across calls that have nothing to do with the call stack it
/// was created on, so its activation record must be heap-resident, not
/// stack-resident. `saved_stack`/`saved_blocks`/`saved_ip` are only
/// meaningful while `state == Suspended`.
#[derive(Debug)]
pub(crate) struct GeneratorObj {
    pub kind: GeneratorKind,
    pub function: Value,
    pub locals: Vec<Value>,
    pub state: GeneratorState,
    pub saved_ip: usize,
    pub saved_stack: Vec<Value>,
    pub saved_blocks: Vec<Block>,
    /// The currently-handled exception inside this generator's frame, if
    /// any, preserved across suspension so a later `throw` sees the right
    /// `__context__`.
    pub saved_handling_exc: Option<crate::exception::Exception>,
}

impl GeneratorObj {
    pub(crate) fn new(kind: GeneratorKind, function: Value, locals: Vec<Value>) -> Self {
        Self {
            kind,
            function,
            locals,
            state: GeneratorState::Created,
            saved_ip: 0,
            saved_stack: Vec::new(),
            saved_blocks: Vec::new(),
            saved_handling_exc: None,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(self.state, GeneratorState::Closed)
    }
}
