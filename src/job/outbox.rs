use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::JobEvent;

/// Unbounded FIFO of job events with one async consumer.
///
/// Pushing never blocks, so a slow or vanished reader cannot stall a pipeline.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Mutex<VecDeque<JobEvent>>,
    notify: Notify,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: JobEvent) {
        self.queue.lock().push_back(event);
        self.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<JobEvent> {
        self.queue.lock().pop_front()
    }

    /// Wait for the next event.
    pub async fn recv(&self) -> JobEvent {
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.try_pop() {
                return event;
            }
            notified.await;
        }
    }

    /// Next event, or `JobEvent::Ping` once `idle` passes without one.
    pub async fn recv_or_keepalive(&self, idle: Duration) -> JobEvent {
        tokio::time::timeout(idle, self.recv())
            .await
            .unwrap_or(JobEvent::Ping)
    }

    /// Take every queued event.
    pub fn drain(&self) -> Vec<JobEvent> {
        self.queue.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use std::sync::Arc;

    fn progress(step: &str) -> JobEvent {
        JobEvent::Progress {
            status: JobStatus::Downloading,
            progress: 0.0,
            current_step: step.to_string(),
            message: String::new(),
        }
    }

    #[test]
    fn test_fifo_order() {
        let outbox = Outbox::new();
        outbox.push(progress("a"));
        outbox.push(progress("b"));

        assert_eq!(outbox.try_pop(), Some(progress("a")));
        assert_eq!(outbox.drain(), vec![progress("b")]);
        assert!(outbox.try_pop().is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let outbox = Arc::new(Outbox::new());
        let producer = outbox.clone();

        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.push(progress("late"));
        });

        assert_eq!(outbox.recv().await, progress("late"));
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_on_idle() {
        let outbox = Outbox::new();
        assert_eq!(
            outbox.recv_or_keepalive(Duration::from_secs(30)).await,
            JobEvent::Ping
        );

        outbox.push(progress("x"));
        assert_eq!(
            outbox.recv_or_keepalive(Duration::from_secs(30)).await,
            progress("x")
        );
    }
}
