use parking_lot::Mutex;
use std::time::Duration;
use timer::{Guard, Timer};

/// Spawn an async task on a new thread.
/// This avoids global thread pool contention that can occur in parallel test runs.
pub fn async_task<OP>(op: OP)
where
    OP: FnOnce() + Send + 'static,
{
    std::thread::spawn(op);
}

/// A periodic task scheduler backed by a single timer thread.
///
/// Callers receive a [ScheduledHandle]; dropping the handle cancels the task.
pub(crate) struct Scheduler {
    timer: Timer,
    guards: Mutex<Vec<Guard>>,
}

/// Cancellation handle for a scheduled repeating task. The task keeps firing
/// until the handle is dropped.
pub struct ScheduledHandle {
    _guard: Guard,
}

impl Scheduler {
    pub fn new() -> Scheduler {
        Scheduler {
            timer: Timer::new(),
            guards: Mutex::from(Vec::with_capacity(16)),
        }
    }

    /// Schedules a repeating task owned by the scheduler itself. The task
    /// runs until [Scheduler::stop] is called.
    #[inline]
    pub fn schedule<F>(&self, duration: Duration, f: F)
    where
        F: 'static + FnMut() + Send,
    {
        match chrono::Duration::from_std(duration) {
            Ok(chrono_duration) => {
                let guard = self.timer.schedule_repeating(chrono_duration, f);
                self.guards.lock().push(guard);
            }
            Err(e) => {
                log::error!(
                    "Failed to convert duration to chrono::Duration: {}, skipping task scheduling",
                    e
                );
            }
        }
    }

    /// Schedules a repeating task whose lifetime is controlled by the caller
    /// through the returned handle.
    #[inline]
    pub fn schedule_cancellable<F>(&self, duration: Duration, f: F) -> Option<ScheduledHandle>
    where
        F: 'static + FnMut() + Send,
    {
        match chrono::Duration::from_std(duration) {
            Ok(chrono_duration) => {
                let guard = self.timer.schedule_repeating(chrono_duration, f);
                Some(ScheduledHandle { _guard: guard })
            }
            Err(e) => {
                log::error!(
                    "Failed to convert duration to chrono::Duration: {}, skipping task scheduling",
                    e
                );
                None
            }
        }
    }

    #[inline]
    pub fn stop(&self) {
        self.guards.lock().clear();
    }
}

#[inline]
pub fn schedule_task<F>(duration: Duration, f: F)
where
    F: 'static + FnMut() + Send,
{
    crate::SCHEDULER.schedule(duration, f);
}

#[inline]
pub fn schedule_cancellable_task<F>(duration: Duration, f: F) -> Option<ScheduledHandle>
where
    F: 'static + FnMut() + Send,
{
    crate::SCHEDULER.schedule_cancellable(duration, f)
}

#[inline]
pub fn stop_scheduled_tasks() {
    crate::SCHEDULER.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_async_task() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);
        async_task(move || {
            flag_clone.store(true, Ordering::Relaxed);
        });

        awaitility::at_most(Duration::from_secs(2)).until(|| flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_schedule_cancellable_task_fires() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);

        let handle = schedule_cancellable_task(Duration::from_millis(50), move || {
            flag_clone.store(true, Ordering::Relaxed);
        });
        assert!(handle.is_some());

        awaitility::at_most(Duration::from_secs(2)).until(|| flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_dropping_handle_cancels_task() {
        let flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&flag);

        let handle = schedule_cancellable_task(Duration::from_millis(100), move || {
            flag_clone.store(true, Ordering::Relaxed);
        });
        drop(handle);

        thread::sleep(Duration::from_millis(250));
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn test_scheduler_new() {
        let scheduler = Scheduler::new();
        assert!(scheduler.guards.lock().is_empty());
    }
}
