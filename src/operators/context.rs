use log::{debug, trace};
use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use crate::errors::{RasterOpsError, Result};

/// Shared flag asking every computation holding a clone to stop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once [CancellationToken::cancel] was called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RasterOpsError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receives progress of long running computations.
pub trait ProgressMonitor: Send + Sync {
    fn begin_task(&self, name: &str, total_work: usize);
    fn worked(&self, work: usize);
    fn done(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {
    fn begin_task(&self, _name: &str, _total_work: usize) {}
    fn worked(&self, _work: usize) {}
    fn done(&self) {}
}

/// Reports progress through the `log` facade.
#[derive(Debug, Default)]
pub struct LogProgressMonitor {
    task: RwLock<String>,
    total: AtomicUsize,
    worked: AtomicUsize,
}

impl ProgressMonitor for LogProgressMonitor {
    fn begin_task(&self, name: &str, total_work: usize) {
        *self.task.write().unwrap_or_else(PoisonError::into_inner) = name.to_string();
        self.total.store(total_work, Ordering::Relaxed);
        self.worked.store(0, Ordering::Relaxed);
        debug!("{name}: started ({total_work} units)");
    }

    fn worked(&self, work: usize) {
        let worked = self.worked.fetch_add(work, Ordering::Relaxed) + work;
        trace!(
            "{}: {worked}/{}",
            self.task.read().unwrap_or_else(PoisonError::into_inner),
            self.total.load(Ordering::Relaxed)
        );
    }

    fn done(&self) {
        debug!(
            "{}: done",
            self.task.read().unwrap_or_else(PoisonError::into_inner)
        );
    }
}

/// Accumulates progress, to be polled by e.g. a UI thread.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    total: AtomicUsize,
    worked: AtomicUsize,
    begun: AtomicUsize,
    finished: AtomicUsize,
}

impl ProgressCounter {
    pub fn worked_units(&self) -> usize {
        self.worked.load(Ordering::Acquire)
    }

    pub fn total_units(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn tasks_begun(&self) -> usize {
        self.begun.load(Ordering::Acquire)
    }

    pub fn tasks_finished(&self) -> usize {
        self.finished.load(Ordering::Acquire)
    }

    /// Share of work done over all begun tasks, in [0, 1].
    pub fn fraction(&self) -> f64 {
        match self.total_units() {
            0 => 0.,
            total => (self.worked_units() as f64 / total as f64).min(1.),
        }
    }
}

impl ProgressMonitor for ProgressCounter {
    fn begin_task(&self, _name: &str, total_work: usize) {
        self.begun.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(total_work, Ordering::AcqRel);
    }

    fn worked(&self, work: usize) {
        self.worked.fetch_add(work, Ordering::AcqRel);
    }

    fn done(&self) {
        self.finished.fetch_add(1, Ordering::AcqRel);
    }
}

/// Progress reporting and cancellation passed down a computation call chain.
#[derive(Clone)]
pub struct ExecutionContext {
    token: CancellationToken,
    progress: Arc<dyn ProgressMonitor>,
}

impl Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new(CancellationToken::new(), Arc::new(NullProgressMonitor))
    }
}

impl ExecutionContext {
    pub fn new(token: CancellationToken, progress: Arc<dyn ProgressMonitor>) -> Self {
        Self { token, progress }
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self::new(token, Arc::new(NullProgressMonitor))
    }

    pub fn with_progress(progress: Arc<dyn ProgressMonitor>) -> Self {
        Self::new(CancellationToken::new(), progress)
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn progress(&self) -> &dyn ProgressMonitor {
        self.progress.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        self.token.check()
    }

    /// Same cancellation, silent progress. Used for nested source computations.
    pub fn for_sources(&self) -> Self {
        Self::with_token(self.token.clone())
    }

    /// Begins a task, finished when the returned guard is dropped.
    pub fn task(&self, name: &str, total_work: usize) -> ProgressTask<'_> {
        self.progress.begin_task(name, total_work);
        ProgressTask {
            progress: self.progress.as_ref(),
        }
    }
}

/// Running task of a [ProgressMonitor], see [ExecutionContext::task].
pub struct ProgressTask<'a> {
    progress: &'a dyn ProgressMonitor,
}

impl ProgressTask<'_> {
    pub fn worked(&self, work: usize) {
        self.progress.worked(work)
    }
}

impl Drop for ProgressTask<'_> {
    fn drop(&mut self) {
        self.progress.done()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let ctx = ExecutionContext::default();
        let sources = ctx.for_sources();
        assert!(sources.check_cancelled().is_ok());
        ctx.token().cancel();
        assert!(sources.is_cancelled());
        assert!(matches!(sources.check_cancelled(), Err(RasterOpsError::Cancelled)));
    }

    #[test]
    fn task_guard_reports_done() {
        let counter = Arc::new(ProgressCounter::default());
        let ctx = ExecutionContext::with_progress(counter.clone());
        {
            let task = ctx.task("work", 4);
            task.worked(1);
            task.worked(1);
        }
        assert_eq!(counter.tasks_begun(), 1);
        assert_eq!(counter.tasks_finished(), 1);
        assert_eq!(counter.fraction(), 0.5);
    }
}
