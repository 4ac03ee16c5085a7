use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::debug;

/// Deferred retry unit for a failed pair fetch. Dropped after the attempt
/// ceiling; the failure is then terminal and surfaced only via logging.
#[derive(Debug, Clone)]
pub struct ReconcileTask {
    pub coin1: String,
    pub coin2: String,
    pub attempts: u32,
}

impl ReconcileTask {
    pub fn new(coin1: &str, coin2: &str) -> Self {
        Self {
            coin1: coin1.to_string(),
            coin2: coin2.to_string(),
            attempts: 0,
        }
    }
}

/// Unbounded best-effort FIFO of failed pair-fetch tasks. Growth is bounded
/// in practice by the number of distinct pairs ever requested plus the
/// prewarm set.
pub struct ReconcileQueue {
    tasks: Mutex<VecDeque<ReconcileTask>>,
}

impl ReconcileQueue {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn push(&self, task: ReconcileTask) {
        debug!(coin1 = %task.coin1, coin2 = %task.coin2, attempts = task.attempts, "queueing reconcile task");
        self.tasks.lock().await.push_back(task);
    }

    pub async fn pop(&self) -> Option<ReconcileTask> {
        self.tasks.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

impl Default for ReconcileQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_is_fifo() {
        let queue = ReconcileQueue::new();
        queue.push(ReconcileTask::new("bitcoin", "ethereum")).await;
        queue.push(ReconcileTask::new("solana", "cardano")).await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.pop().await.unwrap().coin1, "bitcoin");
        assert_eq!(queue.pop().await.unwrap().coin1, "solana");
        assert!(queue.pop().await.is_none());
    }
}
