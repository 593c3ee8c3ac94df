//! Serial render queue
//!
//! One worker thread owns the worker-local state `W` and runs submitted
//! tasks one at a time, strictly in submission order. Each submission gets
//! a `Ticket` that resolves with that task's own outcome. A task that fails
//! or panics resolves only its ticket; the worker moves on to the next task
//! with no memory of the failure.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, warn};

use super::error::ViewerError;

type Task<W> = Box<dyn FnOnce(&mut W) + Send>;

enum Job<W> {
    Run(Task<W>),
    Shutdown,
}

/// Single-slot serial task queue backed by a dedicated worker thread
pub struct RenderQueue<W> {
    jobs: Sender<Job<W>>,
    worker: Option<JoinHandle<()>>,
}

impl<W: 'static> RenderQueue<W> {
    /// Start the worker thread. `init` builds the worker state on that
    /// thread, so `W` itself does not have to be `Send`.
    pub fn spawn<F>(name: impl Into<String>, init: F) -> Result<Self, ViewerError>
    where
        F: FnOnce() -> W + Send + 'static,
    {
        let name = name.into();
        let (jobs, queued) = flume::unbounded::<Job<W>>();

        let worker = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut state = init();
                for job in queued {
                    match job {
                        Job::Run(task) => task(&mut state),
                        Job::Shutdown => break,
                    }
                }
                debug!("Render worker {name} stopped");
            })?;

        Ok(Self {
            jobs,
            worker: Some(worker),
        })
    }

    /// Append `task` after every previously submitted task
    pub fn submit<T, F>(&self, task: F) -> Ticket<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut W) -> Result<T, ViewerError> + Send + 'static,
    {
        let (reply, ticket) = Ticket::pair();

        let job = Job::Run(Box::new(move |state: &mut W| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(state)))
                .unwrap_or_else(|payload| {
                    Err(ViewerError::Panicked {
                        message: panic_message(payload.as_ref()),
                    })
                });
            if let Err(e) = &outcome {
                debug!("Queued task failed: {e}");
            }
            // The caller may have dropped its ticket
            let _ = reply.send(outcome);
        }));

        if self.jobs.send(job).is_err() {
            warn!("Render worker is gone; task dropped");
        }
        ticket
    }

    /// Barrier that resolves once every previously submitted task finished
    pub fn flush(&self) -> Ticket<()> {
        self.submit(|_| Ok(()))
    }

    /// Run the tasks already queued, then stop the worker and wait for it.
    /// Tickets for later submissions resolve to `ViewerError::QueueClosed`.
    pub fn shutdown(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Render worker panicked during shutdown");
            }
        }
    }
}

impl<W> Drop for RenderQueue<W> {
    // Does not join: a hung engine call must not hang the owner
    fn drop(&mut self) {
        let _ = self.jobs.send(Job::Shutdown);
    }
}

impl<W> std::fmt::Debug for RenderQueue<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("queued", &self.jobs.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Outcome of one queued task, delivered exactly once
#[derive(Debug)]
pub struct Ticket<T> {
    outcome: Receiver<Result<T, ViewerError>>,
}

impl<T> Ticket<T> {
    fn pair() -> (Sender<Result<T, ViewerError>>, Self) {
        let (tx, rx) = flume::bounded(1);
        (tx, Self { outcome: rx })
    }

    /// A ticket that is already resolved and never joined any queue
    #[must_use]
    pub fn ready(result: Result<T, ViewerError>) -> Self {
        let (tx, ticket) = Self::pair();
        let _ = tx.send(result);
        ticket
    }

    /// Block until the task completes
    pub fn wait(self) -> Result<T, ViewerError> {
        self.outcome
            .recv()
            .unwrap_or_else(|_| Err(ViewerError::QueueClosed))
    }

    /// Block for at most `timeout`; `None` if the task is still pending
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, ViewerError>> {
        match self.outcome.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(ViewerError::QueueClosed)),
        }
    }

    /// Take the outcome if the task already completed
    pub fn try_take(&self) -> Option<Result<T, ViewerError>> {
        match self.outcome.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ViewerError::QueueClosed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;

    fn spawn_log_queue() -> RenderQueue<Vec<u32>> {
        RenderQueue::spawn("test-queue", Vec::new).expect("spawn")
    }

    #[test]
    fn tasks_run_in_submission_order() {
        let queue = spawn_log_queue();

        let tickets: Vec<_> = (1..=6)
            .map(|n| {
                queue.submit(move |log: &mut Vec<u32>| {
                    if n == 1 {
                        thread::sleep(Duration::from_millis(30));
                    }
                    log.push(n);
                    Ok(log.clone())
                })
            })
            .collect();

        let last = tickets
            .into_iter()
            .map(|t| t.wait().expect("task"))
            .last()
            .expect("six tickets");
        assert_eq!(last, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn tasks_never_overlap() {
        let queue = spawn_log_queue();
        let busy = Arc::new(AtomicBool::new(false));
        let overlapped = Arc::new(AtomicBool::new(false));

        let tickets: Vec<_> = (0..20)
            .map(|_| {
                let busy = Arc::clone(&busy);
                let overlapped = Arc::clone(&overlapped);
                queue.submit(move |_| {
                    if busy.swap(true, Ordering::SeqCst) {
                        overlapped.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(1));
                    busy.store(false, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for ticket in tickets {
            ticket.wait().expect("task");
        }
        assert!(!overlapped.load(Ordering::SeqCst));
    }

    #[test]
    fn failure_is_isolated_to_its_ticket() {
        let queue = spawn_log_queue();

        let failing = queue.submit(|_| -> Result<(), _> { Err(ViewerError::NoDocument) });
        let next = queue.submit(|log: &mut Vec<u32>| {
            log.push(2);
            Ok(log.len())
        });

        assert!(matches!(failing.wait(), Err(ViewerError::NoDocument)));
        assert_eq!(next.wait().expect("queue recovered"), 1);
    }

    #[test]
    fn panic_is_reported_and_worker_survives() {
        let queue = spawn_log_queue();

        let panicking = queue.submit(|_| -> Result<(), ViewerError> { panic!("engine exploded") });
        let next = queue.submit(|log: &mut Vec<u32>| {
            log.push(7);
            Ok(log.clone())
        });

        match panicking.wait() {
            Err(ViewerError::Panicked { message }) => assert_eq!(message, "engine exploded"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(next.wait().expect("worker alive"), vec![7]);
    }

    #[test]
    fn ready_ticket_resolves_immediately() {
        let ticket = Ticket::ready(Ok(5));
        assert!(matches!(ticket.try_take(), Some(Ok(5))));
    }

    #[test]
    fn pending_ticket_times_out_then_resolves() {
        let queue = spawn_log_queue();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock().expect("gate");

        let blocker = Arc::clone(&gate);
        let ticket = queue.submit(move |_| {
            let _pass = blocker.lock().expect("gate");
            Ok(())
        });

        assert!(ticket.wait_timeout(Duration::from_millis(10)).is_none());
        drop(held);
        assert!(matches!(
            ticket.wait_timeout(Duration::from_secs(5)),
            Some(Ok(()))
        ));
    }

    #[test]
    fn tickets_after_shutdown_report_closed_queue() {
        let mut queue = spawn_log_queue();
        let before = queue.submit(|log: &mut Vec<u32>| {
            log.push(1);
            Ok(())
        });
        queue.shutdown();
        assert!(before.wait().is_ok());

        let ticket = queue.submit(|_| Ok(()));
        assert!(matches!(ticket.wait(), Err(ViewerError::QueueClosed)));
    }
}
