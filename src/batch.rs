use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::error::Error;
use crate::progress::{Progress, estimate_remaining};

/// How long the coordinator waits between progress refreshes while tasks are
/// in flight.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("worker task failed: {0}")]
    TaskFailed(#[source] Error),

    #[error("interrupted")]
    Interrupted,
}

/// Installs a SIGINT handler that flips the shared abort flag checked by the
/// batch runner. Install once per process, before the first batch starts.
pub fn install_interrupt_handler() -> Result<Arc<AtomicBool>, Error> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })?;
    Ok(flag)
}

/// Completion bookkeeping shared between workers and the coordinator.
struct Tracker {
    done: Mutex<usize>,
    wake: Condvar,
    started: AtomicUsize,
    failed: AtomicBool,
}

impl Tracker {
    fn new() -> Self {
        Self {
            done: Mutex::new(0),
            wake: Condvar::new(),
            started: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
        }
    }

    fn mark_done(&self) {
        let mut done = self.done.lock();
        *done += 1;
        self.wake.notify_one();
    }
}

/// Executes a task over a list of work items on a fixed-size worker pool.
///
/// The two batch phases of a run (fingerprinting, then duplicate search)
/// share one runner and therefore one pool; they never run concurrently.
pub struct BatchRunner {
    pool: rayon::ThreadPool,
    interrupt: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(workers: usize, interrupt: Arc<AtomicBool>) -> Result<Self, Error> {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build()?;
        Ok(Self { pool, interrupt })
    }

    /// Runs `task` over `items`, collecting results in submission order.
    ///
    /// `ctx` is a read-only snapshot handed to every task invocation; it is
    /// cloned into each worker closure once, not re-sent per item. The first
    /// task error aborts the whole batch with no checkpoint. On interrupt the
    /// results of every already-finished task are passed to `checkpoint` (in
    /// submission order) before `BatchError::Interrupted` is returned; tasks
    /// not yet started are abandoned and recomputed on the next run.
    pub fn run<C, I, T, F>(
        &self,
        label: &str,
        ctx: Arc<C>,
        items: Vec<I>,
        task: F,
        checkpoint: impl FnOnce(Vec<T>),
    ) -> Result<Vec<T>, BatchError>
    where
        C: Send + Sync + 'static,
        I: Send + 'static,
        T: Send + 'static,
        F: Fn(&C, I) -> Result<T, Error> + Send + Sync + 'static,
    {
        let total = items.len();
        let slots: Arc<Vec<Mutex<Option<Result<T, Error>>>>> =
            Arc::new((0..total).map(|_| Mutex::new(None)).collect());
        let tracker = Arc::new(Tracker::new());
        let task = Arc::new(task);

        for (idx, item) in items.into_iter().enumerate() {
            let slots = Arc::clone(&slots);
            let tracker = Arc::clone(&tracker);
            let ctx = Arc::clone(&ctx);
            let task = Arc::clone(&task);
            let interrupt = Arc::clone(&self.interrupt);
            self.pool.spawn(move || {
                tracker.started.fetch_add(1, Ordering::SeqCst);
                // Queued tasks are abandoned once the batch is aborting.
                if tracker.failed.load(Ordering::SeqCst) || interrupt.load(Ordering::SeqCst) {
                    tracker.started.fetch_sub(1, Ordering::SeqCst);
                    tracker.wake.notify_one();
                    return;
                }
                let result = task(&ctx, item);
                let errored = result.is_err();
                *slots[idx].lock() = Some(result);
                // The flag is raised after the slot write so the coordinator
                // always finds the error it aborts on.
                if errored {
                    tracker.failed.store(true, Ordering::SeqCst);
                }
                tracker.mark_done();
            });
        }

        let progress = Progress::new(label, total as u64);
        let start = Instant::now();
        let mut done = tracker.done.lock();
        loop {
            progress.update(*done as u64);
            log::debug!(
                "{label}: {}/{total} done, ~{:?} remaining",
                *done,
                estimate_remaining(start.elapsed(), *done as u64, total as u64)
            );
            if tracker.failed.load(Ordering::SeqCst) {
                drop(done);
                progress.abandon();
                return Err(BatchError::TaskFailed(first_error(&slots)));
            }
            if self.interrupt.load(Ordering::SeqCst) {
                // Tasks already executing are allowed to finish so their
                // results reach the checkpoint; queued tasks bail out at the
                // pre-check above.
                while *done < tracker.started.load(Ordering::SeqCst) {
                    let _ = tracker.wake.wait_for(&mut done, POLL_INTERVAL);
                }
                drop(done);
                progress.abandon();
                eprintln!("\nAbort signal caught. Saving progress...");
                checkpoint(take_completed(&slots));
                return Err(BatchError::Interrupted);
            }
            if *done == total {
                break;
            }
            let _ = tracker.wake.wait_for(&mut done, POLL_INTERVAL);
        }
        drop(done);
        progress.finish();

        let mut results = Vec::with_capacity(total);
        for slot in slots.iter() {
            match slot.lock().take() {
                Some(Ok(value)) => results.push(value),
                Some(Err(err)) => return Err(BatchError::TaskFailed(err)),
                None => return Err(BatchError::Interrupted),
            }
        }
        Ok(results)
    }
}

fn first_error<T>(slots: &[Mutex<Option<Result<T, Error>>>]) -> Error {
    slots
        .iter()
        .filter_map(|slot| slot.lock().take())
        .find_map(Result::err)
        .unwrap_or_else(|| Error::Io(std::io::Error::other("worker failed without an error")))
}

fn take_completed<T>(slots: &[Mutex<Option<Result<T, Error>>>]) -> Vec<T> {
    slots
        .iter()
        .filter_map(|slot| slot.lock().take())
        .filter_map(Result::ok)
        .collect()
}
