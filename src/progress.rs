//! Progress reporting and cooperative cancellation.
//!
//! Both collaborators are purely observational from the optimizer's point of
//! view: a [`ProgressSink`] never influences the computation, and a
//! [`TerminationFlag`] is only polled at color and iteration boundaries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Receives progress events from the optimizer.
///
/// `log_progress` is called concurrently from worker threads.
pub trait ProgressSink: Sync {
    /// A named sub-task starts; sub-tasks nest.
    fn begin_sub_task(&self, name: &str);
    /// The innermost sub-task named `name` ends.
    fn end_sub_task(&self, name: &str);
    /// `units` relationships (or nodes) were processed.
    fn log_progress(&self, units: usize);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn begin_sub_task(&self, _name: &str) {}
    fn end_sub_task(&self, _name: &str) {}
    fn log_progress(&self, _units: usize) {}
}

#[derive(Debug)]
struct TaskFrame {
    name: String,
    started: Instant,
    units_at_start: usize,
}

/// Forwards the task tree to the `log` facade.
///
/// Sub-task boundaries are logged at `info` level for the outermost task and
/// `debug` level below it; each finished task reports the units processed
/// while it was open.
#[derive(Debug, Default)]
pub struct LogProgress {
    stack: Mutex<Vec<TaskFrame>>,
    units: AtomicUsize,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total units reported so far.
    pub fn units(&self) -> usize {
        self.units.load(Ordering::Relaxed)
    }

    fn path(stack: &[TaskFrame]) -> String {
        stack
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(" :: ")
    }
}

impl ProgressSink for LogProgress {
    fn begin_sub_task(&self, name: &str) {
        let mut stack = self.stack.lock();
        stack.push(TaskFrame {
            name: name.to_owned(),
            started: Instant::now(),
            units_at_start: self.units(),
        });
        if stack.len() == 1 {
            log::info!("{} :: start", Self::path(&stack));
        } else {
            log::debug!("{} :: start", Self::path(&stack));
        }
    }

    fn end_sub_task(&self, name: &str) {
        let mut stack = self.stack.lock();
        let path = Self::path(&stack);
        match stack.pop() {
            Some(frame) if frame.name == name => {
                let units = self.units().saturating_sub(frame.units_at_start);
                let elapsed = frame.started.elapsed();
                if stack.is_empty() {
                    log::info!("{path} :: finished ({units} units, {elapsed:?})");
                } else {
                    log::debug!("{path} :: finished ({units} units, {elapsed:?})");
                }
            }
            Some(frame) => {
                log::warn!(
                    "Progress task mismatch: ending `{name}` while `{}` is open",
                    frame.name
                );
                stack.push(frame);
            }
            None => log::warn!("Progress task mismatch: ending `{name}` with no open task"),
        }
    }

    fn log_progress(&self, units: usize) {
        self.units.fetch_add(units, Ordering::Relaxed);
    }
}

/// Cooperative cancellation flag shared between the caller and a run.
///
/// Cloning yields another handle to the same flag.
#[derive(Debug, Clone)]
pub struct TerminationFlag(Arc<AtomicBool>);

impl TerminationFlag {
    /// A flag that starts in the running state.
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// `false` once [`terminate`](Self::terminate) was called on any handle.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Requests the run to stop at its next check.
    pub fn terminate(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for TerminationFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn termination_is_shared_between_clones() {
        let flag = TerminationFlag::new();
        let other = flag.clone();
        assert!(flag.is_running());
        other.terminate();
        assert!(!flag.is_running());
    }

    #[test]
    fn log_progress_tracks_units_and_nesting() {
        let p = LogProgress::new();
        p.begin_sub_task("outer");
        p.begin_sub_task("inner");
        p.log_progress(5);
        p.log_progress(7);
        p.end_sub_task("inner");
        assert_eq!(p.stack.lock().len(), 1);
        p.end_sub_task("outer");
        assert_eq!(p.units(), 12);
        assert!(p.stack.lock().is_empty());
    }

    #[test]
    fn mismatched_end_keeps_open_task() {
        let p = LogProgress::new();
        p.begin_sub_task("outer");
        p.end_sub_task("other");
        assert_eq!(p.stack.lock().len(), 1);
    }
}
