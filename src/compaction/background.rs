//! Background compaction - scheduling and execution threads.
//!
//! A scheduler thread wakes every check interval (or when notified after a
//! flush) and plans at most one compaction per cycle. Planned tasks are
//! handed to a single worker thread, so compactions never run concurrently.
//! A destination level with a task in flight is not targeted again until
//! that task completes.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::catalog::TableDirectory;
use crate::options::Options;
use crate::util::filename;
use crate::{Error, Result};

use super::compactor::{CompactionStats, Compactor};
use super::picker::{CompactionStrategy, CompactionTask, Pick};

/// Outcome of one compaction check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No level exceeds its budget.
    Idle,
    /// A compaction was queued.
    Scheduled,
    /// Another check is running.
    Busy,
    /// A level needs compaction but its files or destination are in use.
    Skipped,
}

/// Running totals across all compactions.
#[derive(Debug, Clone, Default)]
pub struct CompactionTotals {
    /// Completed compactions.
    pub compactions: u64,
    /// Completed compactions that needed no merge.
    pub trivial: u64,
    /// Failed compactions.
    pub failures: u64,
    /// Total bytes read.
    pub bytes_read: u64,
    /// Total bytes written.
    pub bytes_written: u64,
    /// Total tombstones dropped.
    pub tombstones_dropped: u64,
}

impl CompactionTotals {
    fn record(&mut self, stats: &CompactionStats) {
        self.compactions += 1;
        if stats.trivial {
            self.trivial += 1;
        }
        self.bytes_read += stats.bytes_read;
        self.bytes_written += stats.bytes_written;
        self.tombstones_dropped += stats.tombstones_dropped;
    }
}

#[derive(Default)]
struct WorkState {
    /// Tasks waiting for the worker.
    queue: VecDeque<CompactionTask>,
    /// Destination levels with a queued or running task.
    in_flight: HashSet<usize>,
    /// Whether the worker is executing a task.
    running: bool,
    /// Tell the worker to exit once the queue is empty.
    stop: bool,
}

#[derive(Default)]
struct WakeState {
    notified: bool,
    shutdown: bool,
}

/// Background compaction scheduler and executor.
pub struct CompactionManager {
    /// Table directory.
    directory: Arc<TableDirectory>,
    /// Engine options.
    options: Arc<Options>,
    /// Picks what to compact.
    strategy: CompactionStrategy,
    /// Held while a check runs; overlapping checks skip.
    scan_lock: Mutex<()>,
    /// Worker queue and in-flight markers.
    work: Mutex<WorkState>,
    /// Signals the worker.
    work_ready: Condvar,
    /// Signals that a task finished.
    work_done: Condvar,
    /// Scheduler wake-up state.
    wake: Mutex<WakeState>,
    /// Signals the scheduler.
    wake_cond: Condvar,
    /// Aborts running merges.
    cancel: Arc<AtomicBool>,
    /// Error from the last failed compaction.
    last_error: Mutex<Option<Error>>,
    /// Running totals.
    totals: Mutex<CompactionTotals>,
    /// Scheduler thread handle.
    scheduler: Mutex<Option<JoinHandle<()>>>,
    /// Worker thread handle.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CompactionManager {
    /// Create a new compaction manager.
    pub fn new(directory: Arc<TableDirectory>, options: Arc<Options>) -> Arc<Self> {
        Arc::new(Self {
            directory,
            strategy: CompactionStrategy::new(Arc::clone(&options)),
            options,
            scan_lock: Mutex::new(()),
            work: Mutex::new(WorkState::default()),
            work_ready: Condvar::new(),
            work_done: Condvar::new(),
            wake: Mutex::new(WakeState::default()),
            wake_cond: Condvar::new(),
            cancel: Arc::new(AtomicBool::new(false)),
            last_error: Mutex::new(None),
            totals: Mutex::new(CompactionTotals::default()),
            scheduler: Mutex::new(None),
            worker: Mutex::new(None),
        })
    }

    /// Start the worker, and the scheduler if background compaction is
    /// enabled.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let this = Arc::clone(self);
        let worker = thread::Builder::new()
            .name("lsmstore-compaction".to_string())
            .spawn(move || this.worker_loop())?;
        *self.worker.lock() = Some(worker);

        if self.options.background_compaction {
            let this = Arc::clone(self);
            let scheduler = thread::Builder::new()
                .name("lsmstore-compaction-scheduler".to_string())
                .spawn(move || this.scheduler_loop())?;
            *self.scheduler.lock() = Some(scheduler);
        }
        Ok(())
    }

    /// Wake the scheduler for an early check.
    pub fn notify(&self) {
        let mut wake = self.wake.lock();
        wake.notified = true;
        self.wake_cond.notify_all();
    }

    /// Run one compaction check, queueing a task if one is due.
    pub fn check_and_trigger(&self) -> CheckOutcome {
        let _scan = match self.scan_lock.try_lock() {
            Some(guard) => guard,
            None => return CheckOutcome::Busy,
        };

        let catalog = self.directory.current();
        let busy = {
            let work = self.work.lock();
            if work.stop {
                return CheckOutcome::Skipped;
            }
            work.in_flight.clone()
        };

        match self.strategy.pick(&catalog, &busy) {
            Pick::Nothing => CheckOutcome::Idle,
            Pick::Blocked { level } => {
                debug!(level, "compaction needed but inputs are busy");
                CheckOutcome::Skipped
            }
            Pick::Task(task) => {
                self.directory.set_being_compacted(&task.inputs(), true);
                debug!(
                    level = task.level,
                    candidate = task.candidate.file_number(),
                    overlapping = task.overlapping.len(),
                    "scheduled compaction"
                );
                let mut work = self.work.lock();
                work.in_flight.insert(task.output_level());
                work.queue.push_back(task);
                self.work_ready.notify_one();
                CheckOutcome::Scheduled
            }
        }
    }

    /// Wait until no task is queued or running.
    ///
    /// Returns false on timeout.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut work = self.work.lock();
        while work.running || !work.queue.is_empty() {
            if self.work_done.wait_until(&mut work, deadline).timed_out() {
                return !work.running && work.queue.is_empty();
            }
        }
        true
    }

    /// Run compactions until no level exceeds its budget.
    pub fn compact_until_settled(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.take_last_error();

        loop {
            let outcome = self.check_and_trigger();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.wait_for_idle(remaining) {
                return Err(Error::CompactionError(
                    "timed out waiting for compaction".into(),
                ));
            }
            if let Some(err) = self.take_last_error() {
                return Err(err);
            }
            if outcome == CheckOutcome::Idle {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::CompactionError(
                    "timed out waiting for compaction".into(),
                ));
            }
            if outcome != CheckOutcome::Scheduled {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Get the last compaction error (if any).
    pub fn last_error(&self) -> Option<Error> {
        self.last_error.lock().clone()
    }

    /// Take the last compaction error, clearing it.
    pub fn take_last_error(&self) -> Option<Error> {
        self.last_error.lock().take()
    }

    /// Get running totals.
    pub fn totals(&self) -> CompactionTotals {
        self.totals.lock().clone()
    }

    /// Check if a compaction is queued or running.
    pub fn is_busy(&self) -> bool {
        let work = self.work.lock();
        work.running || !work.queue.is_empty()
    }

    /// Stop both threads.
    ///
    /// The scheduler stops at once. The worker gets the shutdown timeout
    /// to drain its queue; after that running merges are cancelled.
    pub fn shutdown(&self) {
        {
            let mut wake = self.wake.lock();
            wake.shutdown = true;
            self.wake_cond.notify_all();
        }
        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.join();
        }

        {
            let mut work = self.work.lock();
            work.stop = true;
            self.work_ready.notify_all();
        }
        if !self.wait_for_idle(self.options.compaction_shutdown_timeout) {
            warn!("compaction did not finish in time, cancelling");
            self.cancel.store(true, Ordering::SeqCst);
            let dropped: Vec<CompactionTask> = self.work.lock().queue.drain(..).collect();
            for task in dropped {
                self.directory.set_being_compacted(&task.inputs(), false);
            }
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn scheduler_loop(self: Arc<Self>) {
        let interval = self.options.compaction_check_interval;
        loop {
            {
                let mut wake = self.wake.lock();
                if !wake.notified && !wake.shutdown {
                    self.wake_cond.wait_for(&mut wake, interval);
                }
                if wake.shutdown {
                    break;
                }
                wake.notified = false;
            }

            let outcome = self.check_and_trigger();
            debug!(?outcome, "compaction check");
        }
        debug!("compaction scheduler stopped");
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let task = {
                let mut work = self.work.lock();
                while work.queue.is_empty() && !work.stop {
                    self.work_ready.wait(&mut work);
                }
                match work.queue.pop_front() {
                    Some(task) => {
                        work.running = true;
                        task
                    }
                    None => break,
                }
            };

            self.run_task(&task);

            {
                let mut work = self.work.lock();
                work.running = false;
                work.in_flight.remove(&task.output_level());
                self.work_done.notify_all();
            }
            // Look for follow-up work right away.
            self.notify();
        }
        debug!("compaction worker stopped");
    }

    fn run_task(&self, task: &CompactionTask) {
        info!(
            level = task.level,
            output_level = task.output_level(),
            inputs = task.num_inputs(),
            trivial = task.is_trivial(),
            "starting compaction"
        );

        match self.execute(task) {
            Ok(stats) => {
                info!(
                    level = stats.level,
                    output_level = stats.output_level,
                    inputs = stats.num_input_files,
                    outputs = stats.num_output_files,
                    bytes_read = stats.bytes_read,
                    bytes_written = stats.bytes_written,
                    entries_written = stats.entries_written,
                    entries_dropped = stats.entries_dropped,
                    tombstones_dropped = stats.tombstones_dropped,
                    write_amplification = stats.write_amplification(),
                    elapsed_ms = stats.elapsed_ms,
                    "compaction finished"
                );
                self.totals.lock().record(&stats);
            }
            Err(Error::CompactionCancelled) => {
                warn!(level = task.level, "compaction cancelled");
            }
            Err(e) => {
                error!(level = task.level, error = %e, "compaction failed");
                self.totals.lock().failures += 1;
                *self.last_error.lock() = Some(e);
            }
        }

        // Inputs that were replaced are gone from the catalog already.
        self.directory.set_being_compacted(&task.inputs(), false);
    }

    fn execute(&self, task: &CompactionTask) -> Result<CompactionStats> {
        let drop_tombstones = self
            .strategy
            .can_drop_tombstones(&self.directory.current(), task);

        let compactor = Compactor::new(Arc::clone(&self.directory), Arc::clone(&self.cancel));
        let output = compactor.run(task, drop_tombstones)?;

        if let Err(e) = self.directory.apply(output.edit(task)) {
            for file in &output.files {
                let _ = filename::delete_file(&self.directory.absolute_path(file));
            }
            return Err(e);
        }
        // Inputs stay on disk until the manifest no longer names them.
        self.directory.sync()?;

        let _files = self.directory.write_files();
        for file in task.inputs() {
            self.directory.tables().evict(file.file_number());
            let path = self.directory.absolute_path(&file);
            if let Err(e) = filename::delete_file(&path) {
                warn!(path = %path.display(), error = %e, "failed to delete compacted file");
            }
        }

        Ok(output.stats)
    }
}
