//! Per-invocation resource limits.
//!
//! Heap and stack caps are handed to the QuickJS runtime. The wall-clock
//! budget is enforced by [`Deadline`], an interrupt handler that QuickJS
//! polls while executing script code: once the deadline passes, the
//! engine aborts whatever is running with an uncatchable error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;
pub const DEFAULT_STACK_LIMIT: usize = 1024 * 1024;
pub const DEFAULT_OUTPUT_LIMIT: usize = 16 * 1024 * 1024;

/// Heap, stack, and output caps for one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum engine heap in bytes.
    pub memory: usize,
    /// Maximum engine stack in bytes.
    pub stack: usize,
    /// Maximum bytes retained by the output sink.
    pub output: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY_LIMIT,
            stack: DEFAULT_STACK_LIMIT,
            output: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl ResourceLimits {
    /// Apply heap and stack caps to a freshly created engine runtime.
    pub fn apply(&self, rt: &rquickjs::Runtime) {
        rt.set_memory_limit(self.memory);
        rt.set_max_stack_size(self.stack);
    }
}

/// Wall-clock budget for one invocation.
///
/// Cloning shares the trip flag, so the scheduler can ask whether an
/// engine failure was caused by the interrupt rather than the script.
#[derive(Debug, Clone)]
pub struct Deadline {
    /// `None` when the budget is too large to represent as an instant.
    at: Option<Instant>,
    budget: Duration,
    tripped: Arc<AtomicBool>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(budget),
            budget,
            tripped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        match self.at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        }
    }

    /// Whether the deadline has passed. Records the trip when it has.
    pub fn expired(&self) -> bool {
        if self.at.is_some_and(|at| Instant::now() >= at) {
            self.tripped.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    /// Whether [`expired`](Self::expired) ever returned `true`.
    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Install this deadline as the engine's interrupt handler.
    pub fn install(&self, rt: &rquickjs::Runtime) {
        let deadline = self.clone();
        rt.set_interrupt_handler(Some(Box::new(move || deadline.expired())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.memory, 64 * 1024 * 1024);
        assert_eq!(limits.stack, 1024 * 1024);
        assert_eq!(limits.output, 16 * 1024 * 1024);
    }

    #[test]
    fn fresh_deadline_is_not_expired() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(!deadline.expired());
        assert!(!deadline.tripped());
        assert!(deadline.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn zero_budget_expires_and_trips() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert!(deadline.tripped());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[test]
    fn unrepresentable_budget_never_expires() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), Duration::MAX);
    }

    #[test]
    fn clones_share_trip_flag() {
        let deadline = Deadline::after(Duration::ZERO);
        let handler_side = deadline.clone();
        assert!(handler_side.expired());
        assert!(deadline.tripped());
    }

    #[test]
    fn interrupt_stops_runaway_loop() {
        let rt = rquickjs::Runtime::new().unwrap();
        let deadline = Deadline::after(Duration::from_millis(50));
        deadline.install(&rt);
        let ctx = rquickjs::Context::full(&rt).unwrap();

        let result = ctx.with(|ctx| ctx.eval::<(), _>("while (true) {}"));
        assert!(result.is_err());
        assert!(deadline.tripped());
    }

    #[test]
    fn memory_cap_rejects_large_allocation() {
        let rt = rquickjs::Runtime::new().unwrap();
        ResourceLimits {
            memory: 4 * 1024 * 1024,
            ..ResourceLimits::default()
        }
        .apply(&rt);
        let ctx = rquickjs::Context::full(&rt).unwrap();

        let result = ctx.with(|ctx| ctx.eval::<(), _>("new Uint8Array(32 * 1024 * 1024)"));
        assert!(result.is_err());
    }
}
