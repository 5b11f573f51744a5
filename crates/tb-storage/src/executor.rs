//! Serialized work queue.
//!
//! One worker thread drains a bounded FIFO. Every mutation of a storage root
//! (batch writes, consent migrations, full wipes) is a task on the same
//! queue, so a migration always completes before the writes submitted after
//! it run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;

use crate::logging::{event_names, MAINTAINER};

/// A unit of work for the queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Why a task was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("work queue is shut down")]
    Shutdown,
    #[error("work queue is saturated ({capacity} pending tasks)")]
    Saturated { capacity: usize },
}

impl From<SubmitError> for tb_common::Error {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Shutdown => tb_common::Error::QueueShutdown,
            SubmitError::Saturated { capacity } => tb_common::Error::QueueSaturated { capacity },
        }
    }
}

/// Something that runs tasks asynchronously, in submission order.
pub trait TaskExecutor: Send + Sync {
    /// Enqueue `task` without blocking. `name` identifies it in logs.
    fn submit(&self, name: &str, task: Task) -> Result<(), SubmitError>;
}

struct Job {
    name: String,
    task: Task,
}

/// Single-threaded FIFO executor with a bounded queue.
pub struct SerialExecutor {
    capacity: usize,
    sender: Mutex<Option<SyncSender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialExecutor {
    /// Spawn the worker thread.
    pub fn new(thread_name: &str, capacity: usize) -> std::io::Result<Self> {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(capacity);
        let worker = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run_worker(receiver))?;

        Ok(SerialExecutor {
            capacity,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait until every task submitted before this call has run.
    ///
    /// Returns false on timeout or when the queue is shut down.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let sender = match self.current_sender() {
            Some(sender) => sender,
            None => return false,
        };
        let (done_tx, done_rx) = mpsc::channel();
        let barrier = Job {
            name: "barrier".to_string(),
            task: Box::new(move || {
                let _ = done_tx.send(());
            }),
        };
        // The barrier may wait for room; regular submissions never do.
        if sender.send(barrier).is_err() {
            return false;
        }
        done_rx.recv_timeout(timeout).is_ok()
    }

    /// Stop accepting tasks, run the ones already queued, join the worker.
    pub fn shutdown(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            // A task shutting down its own queue cannot join itself.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    fn current_sender(&self) -> Option<SyncSender<Job>> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskExecutor for SerialExecutor {
    fn submit(&self, name: &str, task: Task) -> Result<(), SubmitError> {
        let sender = self.current_sender().ok_or(SubmitError::Shutdown)?;
        let job = Job {
            name: name.to_string(),
            task,
        };
        match sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SubmitError::Saturated {
                capacity: self.capacity,
            }),
            Err(TrySendError::Disconnected(_)) => Err(SubmitError::Shutdown),
        }
    }
}

impl Drop for SerialExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<Job>) {
    for job in receiver {
        let Job { name, task } = job;
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            internal_log!(
                ERROR,
                MAINTAINER,
                event_names::TASK_PANICKED,
                task = %name,
                "Storage task panicked"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_submission_order() {
        let executor = SerialExecutor::new("tb-test", 16).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..10 {
            let order = Arc::clone(&order);
            executor
                .submit("push", Box::new(move || order.lock().unwrap().push(i)))
                .unwrap();
        }

        assert!(executor.wait_idle(Duration::from_secs(5)));
        assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_saturated_queue_rejects_without_blocking() {
        let executor = SerialExecutor::new("tb-test", 1).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        executor
            .submit(
                "block",
                Box::new(move || {
                    let _ = started_tx.send(());
                    let _ = release_rx.recv();
                }),
            )
            .unwrap();
        started_rx.recv().unwrap();

        executor.submit("fill", Box::new(|| {})).unwrap();
        assert_eq!(
            executor.submit("overflow", Box::new(|| {})),
            Err(SubmitError::Saturated { capacity: 1 })
        );

        release_tx.send(()).unwrap();
        assert!(executor.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_drains_then_rejects() {
        let executor = SerialExecutor::new("tb-test", 16).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let ran = Arc::clone(&ran);
            executor
                .submit(
                    "count",
                    Box::new(move || {
                        thread::sleep(Duration::from_millis(2));
                        ran.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }

        executor.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 5);
        assert!(executor.is_shutdown());
        assert_eq!(
            executor.submit("late", Box::new(|| {})),
            Err(SubmitError::Shutdown)
        );
        assert!(!executor.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_panicking_task_does_not_stop_worker() {
        let executor = SerialExecutor::new("tb-test", 16).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        executor
            .submit("boom", Box::new(|| panic!("task failure")))
            .unwrap();
        let counter = Arc::clone(&ran);
        executor
            .submit(
                "after",
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(executor.wait_idle(Duration::from_secs(5)));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_submit_error_maps_to_queue_codes() {
        let err: tb_common::Error = SubmitError::Saturated { capacity: 4 }.into();
        assert_eq!(err.code(), 51);
        let err: tb_common::Error = SubmitError::Shutdown.into();
        assert_eq!(err.code(), 50);
    }
}
