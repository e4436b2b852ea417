use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use rocket::tokio::{
    self,
    sync::Notify,
    task::{JoinError, JoinHandle},
    time::Duration,
};

/// A future that runs on its own once a deadline passes, unless it is
/// cancelled first or woken early.
pub struct ScheduledTask<T> {
    handle: JoinHandle<T>,
    wake: Arc<Notify>,
}

impl<T> ScheduledTask<T>
where
    T: Send + 'static,
{
    /// Run `task` at `run_at`, or straight away if that has already passed.
    pub fn new<Fut>(task: Fut, run_at: DateTime<Utc>) -> Self
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let wake = Arc::new(Notify::new());
        let delay = until(run_at);
        let woken = wake.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = woken.notified() => {}
            }
            task.await
        });
        Self { handle, wake }
    }

    /// Abort the task. Returns true iff it had already finished.
    pub async fn cancel(self) -> bool {
        self.handle.abort();
        self.handle.await.is_ok()
    }

    /// Stop waiting for the deadline and run now.
    pub fn trigger_now(&self) {
        // `notify_one` stores a permit, so this works even before the task
        // first polls `notified()`.
        self.wake.notify_one();
    }
}

impl<T> Future for ScheduledTask<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx)
    }
}

/// Time left until `deadline`, or zero if it has passed.
fn until(deadline: DateTime<Utc>) -> Duration {
    (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[rocket::async_test]
    async fn past_deadline_runs_immediately() {
        let task = ScheduledTask::new(async { 7 }, Utc::now() - ChronoDuration::hours(1));
        assert_eq!(task.await.unwrap(), 7);
    }

    #[rocket::async_test]
    async fn trigger_runs_before_deadline() {
        let task = ScheduledTask::new(async { "done" }, Utc::now() + ChronoDuration::days(1));
        task.trigger_now();
        let finished = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert_eq!(finished.unwrap().unwrap(), "done");
    }

    #[rocket::async_test]
    async fn cancelled_task_never_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let task = ScheduledTask::new(
            async move { flag.store(true, Ordering::SeqCst) },
            Utc::now() + ChronoDuration::milliseconds(50),
        );

        assert!(!task.cancel().await);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
