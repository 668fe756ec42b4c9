// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::error::OfficeError;
use crate::task::QueuedTask;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Bounded FIFO of tasks waiting for one worker.
///
/// Each queued task holds a capacity permit until it is dequeued, so
/// producers block on a full queue for at most their enqueue timeout.
pub(crate) struct TaskQueue {
    items: Mutex<VecDeque<(QueuedTask, OwnedSemaphorePermit)>>,
    slots: Arc<Semaphore>,
    ready: Notify,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            slots: Arc::new(Semaphore::new(capacity)),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<(QueuedTask, OwnedSemaphorePermit)>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `task`, waiting up to `wait` for a free slot. The task is handed
    /// back on failure so the caller decides how to report it.
    pub async fn enqueue(
        &self,
        task: QueuedTask,
        wait: Duration,
    ) -> Result<(), (QueuedTask, OfficeError)> {
        if self.is_closed() {
            return Err((task, OfficeError::ManagerStopped));
        }
        let permit = match tokio::time::timeout(wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err((task, OfficeError::ManagerStopped)),
            Err(_) => return Err((task, OfficeError::QueueTimeout(wait))),
        };
        {
            let mut items = self.items();
            // Closing takes the same lock before draining.
            if self.is_closed() {
                return Err((task, OfficeError::ManagerStopped));
            }
            items.push_back((task, permit));
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Next task in submission order, or `None` once the queue is closed.
    pub async fn dequeue(&self) -> Option<QueuedTask> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return None;
            }
            if let Some((task, _permit)) = self.items().pop_front() {
                return Some(task);
            }
            notified.await;
        }
    }

    /// Stop accepting tasks and wake the consumer. Tasks still queued are
    /// left for [`TaskQueue::drain`].
    pub fn close(&self) {
        {
            let _items = self.items();
            self.closed.store(true, Ordering::SeqCst);
        }
        self.ready.notify_waiters();
        self.ready.notify_one();
    }

    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn drain(&self) -> Vec<QueuedTask> {
        self.items().drain(..).map(|(task, _permit)| task).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::task::{task_fn, TaskHandle};

    fn queued(id: u64) -> (QueuedTask, TaskHandle) {
        QueuedTask::new(id, Box::new(task_fn(|_ctx| async { Ok(()) })))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = TaskQueue::new(3);
        for id in 1..=3 {
            let (task, _handle) = queued(id);
            assert!(queue.enqueue(task, Duration::from_millis(10)).await.is_ok());
        }
        assert_eq!(queue.len(), 3);
        for id in 1..=3 {
            assert_eq!(queue.dequeue().await.map(|t| t.id), Some(id));
        }
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_times_out() {
        let queue = TaskQueue::new(1);
        let (first, _h1) = queued(1);
        assert!(queue.enqueue(first, Duration::from_millis(10)).await.is_ok());

        let (second, _h2) = queued(2);
        let Err((task, err)) = queue.enqueue(second, Duration::from_millis(50)).await else {
            panic!("enqueue on a full queue should fail");
        };
        assert_eq!(task.id, 2);
        assert!(matches!(err, OfficeError::QueueTimeout(_)));
    }

    #[tokio::test]
    async fn test_dequeue_frees_slot() {
        let queue = Arc::new(TaskQueue::new(1));
        let (first, _h1) = queued(1);
        assert!(queue.enqueue(first, Duration::from_millis(10)).await.is_ok());

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let (second, _h2) = queued(2);
                queue.enqueue(second, Duration::from_secs(5)).await.is_ok()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(queue.dequeue().await.map(|t| t.id), Some(1));
        assert!(producer.await.unwrap());
        assert_eq!(queue.dequeue().await.map(|t| t.id), Some(2));
    }

    #[tokio::test]
    async fn test_close_wakes_consumer() {
        let queue = Arc::new(TaskQueue::new(1));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await.is_none() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();
        assert!(consumer.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let queue = TaskQueue::new(2);
        let (first, h1) = queued(1);
        assert!(queue.enqueue(first, Duration::from_millis(10)).await.is_ok());
        queue.close();

        let (second, _h2) = queued(2);
        let Err((_, err)) = queue.enqueue(second, Duration::from_millis(10)).await else {
            panic!("closed queue accepted a task");
        };
        assert!(matches!(err, OfficeError::ManagerStopped));

        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        for task in drained {
            task.fail(OfficeError::ManagerStopped);
        }
        assert!(matches!(h1.wait().await, Err(OfficeError::ManagerStopped)));

        queue.reopen();
        let (third, _h3) = queued(3);
        assert!(queue.enqueue(third, Duration::from_millis(10)).await.is_ok());
    }
}
