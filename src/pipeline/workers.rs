//! # Pipeline Workers
//!
//! Fixed-size worker pool and the dedicated metadata writer thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, bounded};
use tracing::{debug, warn};

use crate::constants::{CHANNEL_CAPACITY_MULTIPLIER, MIN_CHANNEL_CAPACITY};
use crate::extract::panic_message;
use crate::metadata::MetadataSink;

use super::events::MetadataEvent;

/// How often the feeding thread wakes up to check for cancellation and
/// report progress while the pool is busy.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Cancellation flag plus optional deadline.
#[derive(Debug, Clone, Default)]
pub struct Stopper {
    cancel: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Stopper {
    pub fn new(cancel: Option<Arc<AtomicBool>>, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    pub fn should_stop(&self) -> bool {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Relaxed) {
                return true;
            }
        }
        matches!(self.deadline, Some(deadline) if Instant::now() >= deadline)
    }
}

/// Why a job produced no value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFault {
    Panicked(String),
    /// Stopped before the job started.
    Cancelled,
    /// The worker exited without filling the slot.
    Lost,
}

struct Job<T> {
    index: usize,
    item: T,
}

/// Run `work` over `items` on `workers` threads. The result vector is in
/// submission order and holds exactly one entry per item. `tick` runs on
/// the calling thread roughly every 100ms until the batch completes.
pub fn parallel_map<T, R, F>(
    items: Vec<T>,
    workers: usize,
    stopper: &Stopper,
    work: F,
    tick: &mut dyn FnMut(),
) -> Vec<Result<R, JobFault>>
where
    T: Send,
    R: Send + Sync,
    F: Fn(&T) -> R + Sync,
{
    let total = items.len();
    let worker_count = workers.max(1);
    let capacity = worker_count
        .saturating_mul(CHANNEL_CAPACITY_MULTIPLIER)
        .max(MIN_CHANNEL_CAPACITY);
    let slots: Vec<OnceLock<Result<R, JobFault>>> = (0..total).map(|_| OnceLock::new()).collect();
    let mut sent = 0usize;

    thread::scope(|scope| {
        let (tx, rx) = bounded::<Job<T>>(capacity);
        let mut handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let rx: Receiver<Job<T>> = rx.clone();
            let slots = &slots;
            let work = &work;
            handles.push(scope.spawn(move || {
                for job in rx {
                    let outcome = if stopper.should_stop() {
                        Err(JobFault::Cancelled)
                    } else {
                        catch_unwind(AssertUnwindSafe(|| work(&job.item)))
                            .map_err(|panic| JobFault::Panicked(panic_message(panic.as_ref())))
                    };
                    if let Err(JobFault::Panicked(msg)) = &outcome {
                        warn!("worker recovered from panic on job {}: {msg}", job.index);
                    }
                    if slots[job.index].set(outcome).is_err() {
                        debug!("job {} already has a result", job.index);
                    }
                }
            }));
        }
        drop(rx);

        'feed: for (index, item) in items.into_iter().enumerate() {
            if stopper.should_stop() {
                break;
            }
            let mut job = Job { index, item };
            loop {
                match tx.send_timeout(job, POLL_INTERVAL) {
                    Ok(()) => {
                        sent += 1;
                        break;
                    }
                    Err(SendTimeoutError::Timeout(back)) => {
                        tick();
                        if stopper.should_stop() {
                            break 'feed;
                        }
                        job = back;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        warn!("worker pool disconnected after {sent} jobs");
                        break 'feed;
                    }
                }
            }
        }
        drop(tx);

        while handles.iter().any(|h| !h.is_finished()) {
            thread::sleep(POLL_INTERVAL);
            tick();
        }
        for handle in handles {
            let _ = handle.join();
        }
    });

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| match slot.into_inner() {
            Some(outcome) => outcome,
            None if index >= sent => Err(JobFault::Cancelled),
            None => Err(JobFault::Lost),
        })
        .collect()
}

/// Spawn the metadata recording thread. It is the only writer of the
/// sink, so log blocks never interleave.
pub fn spawn_metadata_thread(
    sink: Arc<dyn MetadataSink>,
    rx: Receiver<MetadataEvent>,
    error_count: Arc<AtomicU64>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in rx {
            let result = match event {
                MetadataEvent::Analysis(record) => sink.record_analysis(&record),
                MetadataEvent::Emails(record) => sink.record_emails(&record),
                MetadataEvent::Social(record) => sink.record_social(&record),
                MetadataEvent::Flush => sink.flush(),
            };
            if let Err(err) = result {
                error_count.fetch_add(1, Ordering::Relaxed);
                warn!("metadata record error: {err}");
            }
        }
        if let Err(err) = sink.flush() {
            error_count.fetch_add(1, Ordering::Relaxed);
            warn!("metadata flush error: {err}");
        }
    })
}
