//! Cancellable handles for long-running periodic tasks.

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Handle to a spawned task that owns its shutdown signal.
///
/// The task receives a `watch::Receiver<bool>` that flips to `true` on
/// [`TaskHandle::cancel`]. Dropping the handle cancels the task as well.
pub struct TaskHandle<T> {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// Spawn `task` on the current tokio runtime.
    pub fn spawn<F, Fut>(name: &'static str, task: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(task(shutdown_rx));
        debug!(task = name, "Task spawned");

        Self {
            name,
            shutdown,
            join: Some(join),
        }
    }

    /// Signal the task to stop at its next tick boundary. Idempotent.
    pub fn cancel(&self) {
        if !self.shutdown.send_replace(true) {
            debug!(task = self.name, "Task cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Wait for the task to finish and return its output.
    ///
    /// Does not cancel; call [`TaskHandle::cancel`] first to stop a loop.
    /// Returns `None` if the task panicked.
    pub async fn join(mut self) -> Option<T> {
        let join = self.join.take()?;
        match join.await {
            Ok(output) => Some(output),
            Err(e) => {
                error!(task = self.name, "Task failed: {}", e);
                None
            }
        }
    }
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.shutdown.send_replace(true);
        }
    }
}

/// Resolves once `shutdown` is set or its sender is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|&stop| stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_stops_loop() {
        let handle = TaskHandle::spawn("counter", |mut shutdown| async move {
            let mut ticks = 0u32;
            let mut interval = tokio::time::interval(Duration::from_millis(5));
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => break,
                    _ = interval.tick() => ticks += 1,
                }
            }
            ticks
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        let ticks = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .unwrap()
            .unwrap();
        assert!(ticks >= 1);
    }

    #[tokio::test]
    async fn test_join_without_cancel() {
        let handle = TaskHandle::spawn("one-shot", |_shutdown| async { 42 });
        assert_eq!(handle.join().await, Some(42));
    }

    #[tokio::test]
    async fn test_drop_cancels() {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        let handle = TaskHandle::spawn("dropped", |mut shutdown| async move {
            cancelled(&mut shutdown).await;
            let _ = tx.send(());
        });
        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(1), &mut rx).await;
        assert!(result.is_ok());
    }
}
