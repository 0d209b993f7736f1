//! Recurring timers and detached background tasks.
//!
//! A timer loop holds only a [`Weak`] reference to its target and spawns every
//! firing as its own task. Stopping the [`Scheduler`] aborts the loops, so no
//! future firing happens, while jobs already running finish normally. A job is
//! therefore free to stop the scheduler that started it.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Wraps a future to catch panics and convert them to errors.
///
/// A panicking background job is logged instead of vanishing silently.
async fn catch_task_panic<F, T>(future: F) -> Result<T, String>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|panic| {
            if let Some(s) = panic.downcast_ref::<&'static str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                format!("Unknown panic: {:?}", (*panic).type_id())
            }
        })
}

/// Spawn `future` on the runtime without keeping a handle to cancel it.
pub fn spawn_detached<F>(task: &'static str, future: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic_msg) = catch_task_panic(future).await {
            tracing::error!(task = task, error = %panic_msg, "Background task panicked");
        }
    })
}

/// Set of recurring timers that can be stopped as a unit.
#[derive(Default)]
pub struct Scheduler {
    timers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `period`, first firing one period from now.
    ///
    /// The loop ends on its own once `target` has been dropped.
    pub fn every<T, F, Fut>(&mut self, task: &'static str, period: Duration, target: Weak<T>, job: F)
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(target) = target.upgrade() else {
                    tracing::debug!(task = task, "Timer target dropped, stopping");
                    break;
                };
                tracing::debug!(task = task, "Timer fired");
                spawn_detached(task, job(target));
            }
        });

        self.timers.push(handle);
    }

    /// Cancel every timer. Jobs already spawned keep running.
    pub fn stop(&mut self) {
        if !self.timers.is_empty() {
            tracing::debug!(timers = self.timers.len(), "Stopping schedule");
        }
        for handle in self.timers.drain(..) {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
