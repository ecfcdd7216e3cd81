//! Bounded FIFO hand-off between the poller and the workers.
//!
//! A full queue suspends `enqueue`, which throttles the poller when every
//! worker is busy. An empty queue suspends `dequeue`.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::error::QueueError;
use crate::store::Task;

/// Default number of tasks the queue holds before producers wait.
pub const DEFAULT_CAPACITY: usize = 100;

/// Producer side. Cheap to clone; the queue closes once every clone is dropped.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<Task>,
}

/// Consumer side, shared by all workers.
#[derive(Debug, Clone)]
pub struct WorkReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
}

/// Create a queue holding at most `capacity` tasks.
pub fn work_queue(capacity: usize) -> (WorkQueue, WorkReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        WorkQueue { tx },
        WorkReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

impl WorkQueue {
    /// Append a task, waiting while the queue is full.
    pub async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        let task_id = task.id;
        self.tx
            .send(task)
            .await
            .map_err(|_| QueueError::Closed { task_id })
    }

    /// Free slots right now.
    pub fn remaining_capacity(&self) -> usize {
        self.tx.capacity()
    }
}

impl WorkReceiver {
    /// Take the oldest task, waiting while the queue is empty.
    ///
    /// Returns `None` once all producers are gone and the queue is drained.
    pub async fn dequeue(&self) -> Option<Task> {
        // Only one worker waits on the channel at a time; the rest wait on
        // the lock, which keeps hand-out order FIFO.
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TaskStatus;
    use chrono::Utc;
    use std::time::Duration;

    fn task(id: i64) -> Task {
        Task {
            id,
            external_id: format!("{id}"),
            external_key: format!("PROJ-{id}"),
            external_status: "To Do".into(),
            status: TaskStatus::WaitingToWork,
            snapshot: "{}".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fifo_order() {
        let (queue, rx) = work_queue(10);
        for id in 1..=3 {
            queue.enqueue(task(id)).await.unwrap();
        }
        for id in 1..=3 {
            assert_eq!(rx.dequeue().await.unwrap().id, id);
        }
    }

    #[tokio::test]
    async fn second_enqueue_waits_for_a_dequeue() {
        let (queue, rx) = work_queue(1);
        queue.enqueue(task(1)).await.unwrap();
        assert_eq!(queue.remaining_capacity(), 0);

        let producer = queue.clone();
        let pending = tokio::spawn(async move { producer.enqueue(task(2)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished(), "enqueue should block on a full queue");

        assert_eq!(rx.dequeue().await.unwrap().id, 1);
        tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("enqueue should resume after dequeue")
            .unwrap()
            .unwrap();
        assert_eq!(rx.dequeue().await.unwrap().id, 2);
    }

    #[tokio::test]
    async fn dequeue_waits_on_empty_queue() {
        let (queue, rx) = work_queue(4);
        let consumer = tokio::spawn(async move { rx.dequeue().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        queue.enqueue(task(9)).await.unwrap();
        assert_eq!(consumer.await.unwrap().unwrap().id, 9);
    }

    #[tokio::test]
    async fn closed_queue() {
        let (queue, rx) = work_queue(2);
        queue.enqueue(task(1)).await.unwrap();
        drop(queue);
        assert_eq!(rx.dequeue().await.unwrap().id, 1);
        assert!(rx.dequeue().await.is_none());

        let (queue, rx) = work_queue(2);
        drop(rx);
        let err = queue.enqueue(task(5)).await.unwrap_err();
        assert!(matches!(err, QueueError::Closed { task_id: 5 }));
    }
}
