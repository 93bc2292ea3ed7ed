use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// Handed to the runtime timer.
    Deferred,
    /// No runtime was available; the task waits for `run_due` or the next `schedule`.
    Queued,
}

struct QueuedTask {
    due: Instant,
    task: Task,
}

/// A single cancellable delayed task. Scheduling replaces whatever is pending,
/// so at most one task is ever waiting.
pub struct ScheduledTask {
    label: &'static str,
    pending: Option<JoinHandle<()>>,
    queued: Option<QueuedTask>,
}

impl ScheduledTask {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            pending: None,
            queued: None,
        }
    }

    pub fn schedule<F>(&mut self, task: F, delay: Duration) -> Scheduled
    where
        F: FnOnce() + Send + 'static,
    {
        // a queued task whose quiet period already elapsed was due before this change
        self.run_due();
        self.cancel_pending();
        match Handle::try_current() {
            Ok(handle) => {
                trace!(target: "scheduler", label = self.label, ?delay, "task scheduled");
                self.pending = Some(handle.spawn(async move {
                    sleep(delay).await;
                    task();
                }));
                Scheduled::Deferred
            }
            Err(_) => {
                debug!(
                    target: "scheduler",
                    label = self.label,
                    ?delay,
                    "no async runtime available; task queued until due"
                );
                self.queued = Some(QueuedTask {
                    due: Instant::now() + delay,
                    task: Box::new(task),
                });
                Scheduled::Queued
            }
        }
    }

    /// Runs a queued task whose deadline has passed. Returns whether it ran.
    pub fn run_due(&mut self) -> bool {
        match self.queued.take() {
            Some(queued) if queued.due <= Instant::now() => {
                (queued.task)();
                true
            }
            Some(queued) => {
                self.queued = Some(queued);
                false
            }
            None => false,
        }
    }

    /// Runs a queued task now, ignoring its deadline.
    pub fn flush(&mut self) -> bool {
        match self.queued.take() {
            Some(queued) => {
                (queued.task)();
                true
            }
            None => false,
        }
    }

    /// Returns whether a task was still waiting when it was cancelled.
    pub fn cancel_pending(&mut self) -> bool {
        let queued = self.queued.take().is_some();
        let Some(handle) = self.pending.take() else {
            return queued;
        };
        let waiting = !handle.is_finished();
        handle.abort();
        if waiting {
            trace!(target: "scheduler", label = self.label, "pending task cancelled");
        }
        waiting || queued
    }

    pub fn is_pending(&self) -> bool {
        self.queued.is_some()
            || self
                .pending
                .as_ref()
                .map(|handle| !handle.is_finished())
                .unwrap_or(false)
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> Box<dyn FnOnce() + Send>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let shared = hits.clone();
        let make = move || {
            let hits = shared.clone();
            Box::new(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            }) as Box<dyn FnOnce() + Send>
        };
        (hits, make)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_after_delay() {
        let (hits, make) = counter();
        let mut task = ScheduledTask::new("test");
        assert_eq!(task.schedule(make(), Duration::from_millis(300)), Scheduled::Deferred);

        sleep(Duration::from_millis(299)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(task.is_pending());

        sleep(Duration::from_millis(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_task() {
        let (hits, make) = counter();
        let mut task = ScheduledTask::new("test");
        task.schedule(make(), Duration::from_millis(300));
        sleep(Duration::from_millis(200)).await;
        task.schedule(make(), Duration::from_millis(300));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_drop_stop_pending_work() {
        let (hits, make) = counter();
        let mut task = ScheduledTask::new("test");
        task.schedule(make(), Duration::from_millis(50));
        assert!(task.cancel_pending());
        assert!(!task.cancel_pending());

        {
            let mut dropped = ScheduledTask::new("dropped");
            dropped.schedule(make(), Duration::from_millis(50));
        }

        sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn queues_without_runtime_until_due() {
        let (hits, make) = counter();
        let mut task = ScheduledTask::new("test");
        let delay = Duration::from_millis(200);
        assert_eq!(task.schedule(make(), delay), Scheduled::Queued);
        task.schedule(make(), delay);
        task.schedule(make(), delay);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(task.is_pending());
        assert!(!task.run_due());

        std::thread::sleep(Duration::from_millis(250));
        assert!(task.run_due());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!task.is_pending());
    }

    #[test]
    fn overdue_queued_task_runs_before_the_next_one_is_queued() {
        let (hits, make) = counter();
        let mut task = ScheduledTask::new("test");
        task.schedule(make(), Duration::ZERO);
        task.schedule(make(), Duration::from_secs(60));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(task.flush());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(!task.flush());

        task.schedule(make(), Duration::ZERO);
        assert!(task.cancel_pending());
        assert!(!task.run_due());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
