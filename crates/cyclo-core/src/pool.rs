//! The scheduler-pool contract, and the process-wide event flags.
//!
//! The pool itself -- holding proxies, dispatching ready ones, running
//! the worker pool -- is out of scope: this module is the *contract*
//! the core assumes, nothing more.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::cycle_point::CyclePoint;
use crate::identity::TaskId;

/// A shell-invocation context the core enqueues with the pool.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub task: TaskId,
    pub command: Vec<String>,
    pub host: Option<String>,
    pub user: Option<String>,
}

/// Fires once with the command's exit code and captured output. Callbacks
/// may fire from a worker thread; the core treats every entry point as
/// possibly-concurrent with scheduler ticks and serializes per-proxy.
pub type CommandCallback = Box<dyn FnOnce(i32, String) + Send>;

/// The contract the core assumes the scheduler pool provides.
#[async_trait]
pub trait SchedulerPool: Send + Sync {
    /// Identities of all active (non-runahead) proxies.
    fn active_task_ids(&self) -> Vec<TaskId>;
    /// Identities of all runahead proxies.
    fn runahead_task_ids(&self) -> Vec<TaskId>;
    /// Enqueue a shell invocation; `callback` fires once.
    async fn put_command(&self, ctx: CommandContext, callback: CommandCallback);
    fn min_point(&self) -> Option<CyclePoint>;
    fn max_point(&self) -> Option<CyclePoint>;
    fn max_point_runahead(&self) -> Option<CyclePoint>;
    fn hold_point(&self) -> Option<CyclePoint>;
    fn is_held(&self) -> bool;
    fn do_reload(&self) -> bool;
}

/// The two process-wide flags: `iflag` signals the state summary is
/// stale, `pflag` signals the pool should replan. Modeled as a
/// single-producer, level-triggered pair; components set, the control
/// loop takes-and-clears on each iteration.
#[derive(Debug, Default)]
pub struct EventFlags {
    iflag: AtomicBool,
    pflag: AtomicBool,
}

impl EventFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_summary_invalid(&self) {
        self.iflag.store(true, Ordering::SeqCst);
    }

    pub fn signal_replan(&self) {
        self.pflag.store(true, Ordering::SeqCst);
    }

    /// Read and clear the summary-invalidation flag.
    pub fn take_summary_invalid(&self) -> bool {
        self.iflag.swap(false, Ordering::SeqCst)
    }

    /// Read and clear the replan flag.
    pub fn take_replan(&self) -> bool {
        self.pflag.swap(false, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_level_triggered_and_clear_on_take() {
        let flags = EventFlags::new();
        assert!(!flags.take_summary_invalid());
        flags.signal_summary_invalid();
        flags.signal_summary_invalid();
        assert!(flags.take_summary_invalid());
        assert!(!flags.take_summary_invalid());
    }

    #[test]
    fn iflag_and_pflag_are_independent() {
        let flags = EventFlags::new();
        flags.signal_replan();
        assert!(!flags.take_summary_invalid());
        assert!(flags.take_replan());
    }
}
