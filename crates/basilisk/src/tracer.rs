//! Observability hook for the dispatch loop (§10.1 of `SPEC_FULL.md`).
//!
//! Every VM invocation is sandboxed and may run many times per second
//! inside a host process, so unconditional `log`/`tracing` macro calls on
//! the opcode hot path are not acceptable. Observability is instead an
//! explicit, statically dispatched trait parameter: the default
//! [`NoopTracer`] compiles its hooks away entirely.

use crate::bytecode::Opcode;
use crate::exception::Exception;

/// A single observed event, as buffered by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    FramePush { function_name: String, depth: usize },
    FramePop { function_name: String, depth: usize },
    Dispatch { opcode: Opcode, ip: usize },
    Raise { exc_type: String },
    Catch { exc_type: String },
}

/// Hook invoked at frame push/pop, opcode dispatch, and exception
/// raise/catch boundaries. All methods have empty default bodies so a
/// tracer only needs to implement the events it cares about.
pub trait VmTracer {
    #[inline(always)]
    fn on_frame_push(&mut self, _function_name: &str, _depth: usize) {}
    #[inline(always)]
    fn on_frame_pop(&mut self, _function_name: &str, _depth: usize) {}
    #[inline(always)]
    fn on_dispatch(&mut self, _opcode: Opcode, _ip: usize) {}
    #[inline(always)]
    fn on_raise(&mut self, _exc: &Exception) {}
    #[inline(always)]
    fn on_catch(&mut self, _exc: &Exception) {}
}

/// Default tracer: every hook is a no-op, and the optimizer is expected to
/// remove the call sites entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Writes a one-line human-readable trace to stderr. Intended for manual
/// debugging sessions, not production embedding.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_frame_push(&mut self, function_name: &str, depth: usize) {
        eprintln!("{}-> {function_name}", "  ".repeat(depth));
    }

    fn on_frame_pop(&mut self, function_name: &str, depth: usize) {
        eprintln!("{}<- {function_name}", "  ".repeat(depth));
    }

    fn on_raise(&mut self, exc: &Exception) {
        eprintln!("raise {exc}");
    }

    fn on_catch(&mut self, exc: &Exception) {
        eprintln!("catch {exc}");
    }
}

/// Buffers every event it observes, for assertions in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl VmTracer for RecordingTracer {
    fn on_frame_push(&mut self, function_name: &str, depth: usize) {
        self.events.push(TraceEvent::FramePush { function_name: function_name.to_owned(), depth });
    }

    fn on_frame_pop(&mut self, function_name: &str, depth: usize) {
        self.events.push(TraceEvent::FramePop { function_name: function_name.to_owned(), depth });
    }

    fn on_dispatch(&mut self, opcode: Opcode, ip: usize) {
        self.events.push(TraceEvent::Dispatch { opcode, ip });
    }

    fn on_raise(&mut self, exc: &Exception) {
        self.events.push(TraceEvent::Raise { exc_type: exc.exc_type.to_string() });
    }

    fn on_catch(&mut self, exc: &Exception) {
        self.events.push(TraceEvent::Catch { exc_type: exc.exc_type.to_string() });
    }
}
