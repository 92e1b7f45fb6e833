//! Resource accounting: recursion depth, allocation count, memory ceiling,
//! and wall-clock / instruction-count deadlines.
//!
//! This is the engine's configuration layer (§10.3 of `SPEC_FULL.md`): one
//! [`ResourceLimits`] value groups every configurable ceiling, and one
//! [`ResourceTracker`] implementation enforces them uniformly from the
//! dispatch loop, the heap allocator, and the call-binding path.

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception::{ExcType, RunError, SimpleException};

/// Threshold above which an operation must call [`ResourceTracker::check_large_result`]
/// before performing the allocation, instead of relying solely on
/// [`ResourceTracker::on_allocate`] after the fact.
///
/// Operations whose result size depends on user-controlled exponents (`2 **
/// n`) can blow past the memory ceiling before the post-hoc allocation check
/// ever runs; pre-checking anything estimated above this threshold (100KB)
/// closes that gap.
pub const LARGE_RESULT_THRESHOLD: usize = 100_000;

/// Default recursion limit, matching the reference language's own default.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Maximum length of a computed MRO. Bounds C3 linearization against
/// pathological diamond inheritance graphs.
pub const MAX_MRO_LENGTH: usize = 2600;

/// Maximum depth of a single-path inheritance chain, checked before C3
/// linearization runs so a degenerate chain fails fast with a clear error
/// instead of spinning the merge loop.
pub const MAX_INHERITANCE_DEPTH: usize = 1000;

/// A resource ceiling was exceeded during execution.
#[derive(Debug, Clone)]
pub enum ResourceError {
    Allocation { limit: usize, count: usize },
    Operation { limit: usize, count: usize },
    Time { limit: Duration, elapsed: Duration },
    Memory { limit: usize, used: usize },
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => write!(f, "allocation limit exceeded: {count} > {limit}"),
            Self::Operation { limit, count } => write!(f, "operation limit exceeded: {count} > {limit}"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:?} > {limit:?}"),
            Self::Memory { limit, used } => write!(f, "memory limit exceeded: {used} bytes > {limit} bytes"),
            Self::Recursion { limit, .. } => write!(f, "maximum recursion depth exceeded (limit {limit})"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Converts a resource breach into the outer `RunError` the dispatch
    /// loop surfaces to its caller.
    ///
    /// `RecursionError` is deliberately catchable by guest `except:` clauses
    /// (CPython parity: `try: f() except RecursionError: ...` must work),
    /// while every other ceiling is a host-imposed sandbox limit a guest
    /// must not be able to swallow, so it surfaces as [`RunError::Fatal`].
    pub(crate) fn into_run_error(self) -> RunError {
        let (exc_type, message) = match &self {
            Self::Allocation { .. } | Self::Memory { .. } => (ExcType::MemoryError, self.to_string()),
            Self::Operation { .. } | Self::Time { .. } => (ExcType::TimeoutError, self.to_string()),
            Self::Recursion { .. } => (ExcType::RecursionError, self.to_string()),
        };
        let exc = SimpleException::new(exc_type, Some(message)).into_exception();
        if matches!(self, Self::Recursion { .. }) {
            RunError::Raised(Box::new(exc))
        } else {
            RunError::Fatal(Box::new(exc))
        }
    }
}

/// Tracks allocation count, memory usage, recursion depth, and elapsed
/// time/instructions against a configured [`ResourceLimits`], or does
/// nothing at all ([`NoLimitTracker`]).
pub trait ResourceTracker: fmt::Debug {
    /// Called before a heap allocation. `get_size` is lazy so trackers that
    /// ignore memory limits never compute the estimate.
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError>;

    /// Called before growing an existing container in place (`LIST_APPEND`,
    /// `SET_ADD`, a new dict key, ...). Counts against `max_allocations`
    /// without representing a fresh heap object.
    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        self.on_allocate(|| 0)
    }

    /// Called when a heap allocation is freed (refcount dropped to zero).
    fn on_free(&mut self, get_size: impl FnOnce() -> usize);

    /// Called on the engine's amortised check interval (see
    /// [`DEFAULT_CHECK_INTERVAL`]) to enforce wall-clock and instruction
    /// budgets.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a new call frame.
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Called before an operation whose result may exceed
    /// [`LARGE_RESULT_THRESHOLD`], ahead of actually allocating it.
    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError>;

    fn allocation_count(&self) -> Option<usize> {
        None
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        None
    }
}

/// Default interval (in dispatched instructions) between [`ResourceTracker::check_time`]
/// calls. Configurable down to 1 via [`crate::run::Vm::set_check_interval`].
pub const DEFAULT_CHECK_INTERVAL: usize = 1000;

/// A builder-style bundle of every configurable ceiling. `None` disables
/// that particular limit.
#[derive(Debug, Clone, Default)]
pub struct ResourceLimits {
    pub max_operations: Option<usize>,
    pub max_allocations: Option<usize>,
    pub max_duration: Option<Duration>,
    pub max_memory: Option<usize>,
    pub max_recursion_depth: Option<usize>,
    pub max_collection_size: Option<usize>,
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_operations(mut self, limit: usize) -> Self {
        self.max_operations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_memory(mut self, limit: usize) -> Self {
        self.max_memory = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = Some(limit);
        self
    }

    #[must_use]
    pub fn max_collection_size(mut self, limit: usize) -> Self {
        self.max_collection_size = Some(limit);
        self
    }
}

/// No limits are enforced other than the default recursion depth, which
/// protects the host's native call stack even when nothing else is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct NoLimitTracker {
    limits: ResourceLimits,
    operation_count: usize,
    allocation_count: usize,
    current_memory: usize,
}

impl NoLimitTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: ResourceLimits::new(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_limits(limits: ResourceLimits) -> Self {
        Self {
            limits,
            operation_count: 0,
            allocation_count: 0,
            current_memory: 0,
        }
    }
}

impl ResourceTracker for NoLimitTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if self.limits.max_allocations.is_none() && self.limits.max_memory.is_none() {
            return Ok(());
        }
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + get_size();
            if new_memory > max {
                return Err(ResourceError::Memory { limit: max, used: new_memory });
            }
            self.current_memory = new_memory;
        }
        self.allocation_count += 1;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        if self.limits.max_memory.is_some() {
            self.current_memory = self.current_memory.saturating_sub(get_size());
        }
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_operations {
            self.operation_count += 1;
            if self.operation_count > max {
                return Err(ResourceError::Operation { limit: max, count: self.operation_count });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        let max = self.limits.max_recursion_depth.unwrap_or(DEFAULT_MAX_RECURSION_DEPTH);
        if current_depth >= max {
            Err(ResourceError::Recursion { limit: max, depth: current_depth + 1 })
        } else {
            Ok(())
        }
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory.saturating_add(estimated_bytes);
            if new_memory > max {
                return Err(ResourceError::Memory { limit: max, used: new_memory });
            }
        }
        Ok(())
    }

    fn allocation_count(&self) -> Option<usize> {
        (self.limits.max_allocations.is_some()).then_some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        (self.limits.max_memory.is_some()).then_some(self.current_memory)
    }
}

/// Enforces every configured ceiling, including wall-clock deadlines
/// measured from construction time.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    allocation_count: usize,
    operation_count: usize,
    current_memory: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            allocation_count: 0,
            operation_count: 0,
            current_memory: 0,
        }
    }

    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    #[must_use]
    pub fn current_memory(&self) -> usize {
        self.current_memory
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self, get_size: impl FnOnce() -> usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }
        let size = get_size();
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory + size;
            if new_memory > max {
                return Err(ResourceError::Memory { limit: max, used: new_memory });
            }
        }
        self.allocation_count += 1;
        self.current_memory += size;
        Ok(())
    }

    fn on_container_insert(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }
        self.allocation_count += 1;
        Ok(())
    }

    fn on_free(&mut self, get_size: impl FnOnce() -> usize) {
        self.current_memory = self.current_memory.saturating_sub(get_size());
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_operations {
            self.operation_count += 1;
            if self.operation_count > max {
                return Err(ResourceError::Operation { limit: max, count: self.operation_count });
            }
        }
        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_recursion_depth
            && current_depth >= max
        {
            return Err(ResourceError::Recursion { limit: max, depth: current_depth + 1 });
        }
        Ok(())
    }

    fn check_large_result(&self, estimated_bytes: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_memory {
            let new_memory = self.current_memory.saturating_add(estimated_bytes);
            if new_memory > max {
                return Err(ResourceError::Memory { limit: max, used: new_memory });
            }
        }
        Ok(())
    }

    fn allocation_count(&self) -> Option<usize> {
        Some(self.allocation_count)
    }

    fn current_memory_bytes(&self) -> Option<usize> {
        Some(self.current_memory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_limit_tracker_never_fails_by_default() {
        let mut tracker = NoLimitTracker::new();
        for _ in 0..10_000 {
            tracker.on_allocate(|| 1).unwrap();
        }
        assert!(tracker.check_recursion_depth(999).is_ok());
        assert!(tracker.check_recursion_depth(1000).is_err());
    }

    #[test]
    fn limited_tracker_enforces_allocation_ceiling() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(2));
        tracker.on_allocate(|| 0).unwrap();
        tracker.on_allocate(|| 0).unwrap();
        assert!(tracker.on_allocate(|| 0).is_err());
    }

    #[test]
    fn limited_tracker_enforces_memory_ceiling() {
        let mut tracker = LimitedTracker::new(ResourceLimits::new().max_memory(100));
        tracker.on_allocate(|| 60).unwrap();
        assert!(tracker.on_allocate(|| 60).is_err());
    }
}
