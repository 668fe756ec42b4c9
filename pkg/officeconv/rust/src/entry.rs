// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! One worker of the pool: an engine process, its task queue and the loop
//! that feeds tasks to the engine one at a time.

use crate::config::OfficeConfig;
use crate::error::OfficeError;
use crate::pool::AvailableWorkers;
use crate::process::OfficeProcess;
use crate::queue::TaskQueue;
use crate::state::EntryState;
use crate::task::{OfficeTask, QueuedTask, TaskHandle, next_task_id};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

/// Counters exposed for monitoring a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryStats {
    /// Tasks executed since the engine was last (re)started.
    pub tasks_since_start: u32,
    pub total_tasks: u64,
    pub restarts: u32,
    pub pid: Option<u32>,
}

struct EntryInner {
    id: usize,
    name: String,
    config: Arc<OfficeConfig>,
    process: tokio::sync::Mutex<OfficeProcess>,
    queue: TaskQueue,
    state: watch::Sender<EntryState>,
    available: Arc<AvailableWorkers>,
    tasks_since_start: AtomicU32,
    total_tasks: AtomicU64,
    restarts: AtomicU32,
    /// 0 when no engine is running.
    pid: AtomicU32,
}

pub struct OfficeManagerPoolEntry {
    inner: Arc<EntryInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OfficeManagerPoolEntry {
    pub(crate) fn new(
        id: usize,
        process: OfficeProcess,
        config: Arc<OfficeConfig>,
        available: Arc<AvailableWorkers>,
    ) -> Self {
        let (state, _) = watch::channel(EntryState::Stopped);
        let inner = EntryInner {
            id,
            name: process.name().to_string(),
            queue: TaskQueue::new(config.task_queue_capacity),
            config,
            process: tokio::sync::Mutex::new(process),
            state,
            available,
            tasks_since_start: AtomicU32::new(0),
            total_tasks: AtomicU64::new(0),
            restarts: AtomicU32::new(0),
            pid: AtomicU32::new(0),
        };
        Self {
            inner: Arc::new(inner),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> EntryState {
        *self.inner.state.borrow()
    }

    pub fn stats(&self) -> EntryStats {
        let pid = self.inner.pid.load(Ordering::SeqCst);
        EntryStats {
            tasks_since_start: self.inner.tasks_since_start.load(Ordering::SeqCst),
            total_tasks: self.inner.total_tasks.load(Ordering::SeqCst),
            restarts: self.inner.restarts.load(Ordering::SeqCst),
            pid: (pid != 0).then_some(pid),
        }
    }

    /// Number of tasks waiting in this worker's queue.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Start the engine and the task loop. Tasks submitted while starting
    /// wait in the queue.
    pub async fn start(&self) -> Result<(), OfficeError> {
        let inner = &self.inner;
        if !inner.transition(EntryState::Starting) {
            return Err(OfficeError::IllegalState(format!(
                "[{}] cannot start while {}",
                inner.name,
                self.state()
            )));
        }
        inner.queue.reopen();

        let mut process = inner.process.lock().await;
        inner.launch(&mut process, false).await?;
        if !inner.transition(EntryState::Running) {
            // Stopped while starting; stop() takes care of the process.
            return Err(OfficeError::ManagerStopped);
        }
        drop(process);

        let handle = tokio::spawn(run_worker(inner.clone()));
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        for _ in 0..inner.config.task_queue_capacity {
            inner.available.release(inner.id);
        }
        info!("[{}] worker running", inner.name);
        Ok(())
    }

    /// Stop accepting tasks, fail the queued ones, let the current task
    /// finish up to a hard deadline, then stop the engine. Idempotent.
    pub async fn stop(&self) -> Result<(), OfficeError> {
        let inner = &self.inner;
        match self.state() {
            EntryState::Stopped => return Ok(()),
            EntryState::Stopping => {
                let mut rx = inner.state.subscribe();
                let _ = rx.wait_for(|s| *s == EntryState::Stopped).await;
                return Ok(());
            }
            _ => {}
        }
        if !inner.transition(EntryState::Stopping) {
            return Ok(());
        }
        info!("[{}] stopping", inner.name);

        inner.queue.close();
        let pending = inner.queue.drain();
        if !pending.is_empty() {
            info!("[{}] failing {} queued task(s)", inner.name, pending.len());
        }
        for task in pending {
            task.fail(OfficeError::ManagerStopped);
        }

        let mut result = Ok(());
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut handle) = handle {
            let deadline = inner.config.task_execution_timeout() + inner.config.process_timeout();
            match timeout(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    result = Err(OfficeError::execution_with(
                        format!("[{}] worker loop failed", inner.name),
                        e,
                    ));
                }
                Err(_) => {
                    warn!(
                        "[{}] current task still running after {}ms, abandoning it",
                        inner.name,
                        deadline.as_millis()
                    );
                    handle.abort();
                    let _ = handle.await;
                    result = Err(OfficeError::IllegalState(format!(
                        "[{}] worker did not finish its current task before the stop deadline",
                        inner.name
                    )));
                }
            }
        }

        let mut process = inner.process.lock().await;
        process.stop(inner.config.keep_alive_on_shutdown).await;
        inner.pid.store(0, Ordering::SeqCst);
        drop(process);

        inner.transition(EntryState::Stopped);
        info!("[{}] stopped", inner.name);
        result
    }

    /// Queue `task` for this worker, waiting up to the queue timeout for a
    /// free slot. Skips the pool's worker tokens, so only the worker's own
    /// tests use it; callers go through [`crate::OfficeManagerPool::submit`].
    #[cfg(test)]
    pub(crate) async fn submit(&self, task: impl OfficeTask) -> Result<TaskHandle, OfficeError> {
        self.submit_boxed(Box::new(task), self.inner.config.task_queue_timeout())
            .await
    }

    /// Submit `task` and wait for its outcome.
    #[cfg(test)]
    pub(crate) async fn execute(&self, task: impl OfficeTask) -> Result<(), OfficeError> {
        self.submit(task).await?.wait().await
    }

    pub(crate) async fn submit_boxed(
        &self,
        task: Box<dyn OfficeTask>,
        wait: Duration,
    ) -> Result<TaskHandle, OfficeError> {
        let inner = &self.inner;
        inner.check_accepting()?;
        let (queued, handle) = QueuedTask::new(next_task_id(), task);
        debug!("[{}] queueing task {}", inner.name, handle.id());
        match inner.queue.enqueue(queued, wait).await {
            Ok(()) => Ok(handle),
            Err((_, OfficeError::ManagerStopped)) => {
                inner.check_accepting()?;
                Err(OfficeError::ManagerStopped)
            }
            Err((_, e)) => Err(e),
        }
    }
}

impl Drop for OfficeManagerPoolEntry {
    fn drop(&mut self) {
        self.inner.queue.close();
        if let Some(handle) = self
            .worker
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for OfficeManagerPoolEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfficeManagerPoolEntry")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl EntryInner {
    fn state(&self) -> EntryState {
        *self.state.borrow()
    }

    fn transition(&self, next: EntryState) -> bool {
        let name = &self.name;
        self.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                debug!("[{name}] {state} -> {next}");
                *state = next;
                true
            } else {
                false
            }
        })
    }

    fn check_accepting(&self) -> Result<(), OfficeError> {
        match self.state() {
            s if s.accepts_tasks() => Ok(()),
            EntryState::Stopping => Err(OfficeError::ManagerStopped),
            s => Err(OfficeError::IllegalState(format!(
                "[{}] not accepting tasks while {s}",
                self.name
            ))),
        }
    }

    /// Start the engine, retrying up to `max_restart_attempts` times. On
    /// final failure the worker is marked failed and its queue emptied.
    async fn launch(&self, process: &mut OfficeProcess, restart: bool) -> Result<(), OfficeError> {
        let attempts = self.config.max_restart_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            if self.state() == EntryState::Stopping {
                return Err(OfficeError::ManagerStopped);
            }
            match process.start(restart || attempt > 1).await {
                Ok(()) => {
                    self.tasks_since_start.store(0, Ordering::SeqCst);
                    self.pid
                        .store(process.pid().unwrap_or(0), Ordering::SeqCst);
                    return Ok(());
                }
                // The existing-process policy refused to start.
                Err(e @ OfficeError::IllegalState(_)) => {
                    last_err = Some(e);
                    break;
                }
                Err(e) => {
                    warn!(
                        "[{}] start attempt {attempt}/{attempts} failed: {e}",
                        self.name
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        sleep(self.config.process_retry_interval()).await;
                    }
                }
            }
        }
        let err = last_err.unwrap_or_else(|| {
            OfficeError::IllegalState(format!("[{}] office process not started", self.name))
        });
        self.fail(&err);
        Err(err)
    }

    fn fail(&self, err: &OfficeError) {
        if !self.transition(EntryState::Failed) {
            return;
        }
        warn!("[{}] worker failed: {err}", self.name);
        self.pid.store(0, Ordering::SeqCst);
        self.available.mark_failed();
        self.queue.close();
        for task in self.queue.drain() {
            task.fail(OfficeError::IllegalState(format!(
                "worker {} is unusable: {err}",
                self.id
            )));
        }
    }

    async fn restart(&self, process: &mut OfficeProcess) -> Result<(), OfficeError> {
        if !self.transition(EntryState::Restarting) {
            return Err(OfficeError::ManagerStopped);
        }
        process.stop(false).await;
        self.pid.store(0, Ordering::SeqCst);
        self.launch(process, true).await?;
        self.restarts.fetch_add(1, Ordering::SeqCst);
        if !self.transition(EntryState::Running) {
            return Err(OfficeError::ManagerStopped);
        }
        info!("[{}] restarted (pid={:?})", self.name, process.pid());
        Ok(())
    }

    async fn execute_one(&self, queued: QueuedTask) {
        let mut process = self.process.lock().await;

        if !process.is_running() {
            warn!("[{}] office process is gone, restarting", self.name);
            if let Err(e) = self.restart(&mut process).await {
                queued.fail(match e {
                    OfficeError::ManagerStopped => e,
                    e => OfficeError::IllegalState(format!(
                        "worker {} is unusable: {e}",
                        self.id
                    )),
                });
                return;
            }
        }

        let QueuedTask { id, task, reply } = queued;
        let ctx = process.context(self.id);
        let limit = self.config.task_execution_timeout();
        debug!("[{}] executing task {id}", self.name);
        let watch_interval = self.config.process_retry_interval();
        let (result, failed) = tokio::select! {
            outcome = timeout(limit, task.execute(ctx)) => match outcome {
                Ok(Ok(())) => (Ok(()), false),
                Ok(Err(e)) => {
                    warn!("[{}] task {id} failed: {e}", self.name);
                    (Err(e), true)
                }
                Err(_) => {
                    warn!(
                        "[{}] task {id} timed out after {}ms",
                        self.name,
                        limit.as_millis()
                    );
                    (Err(OfficeError::TaskTimeout(limit)), true)
                }
            },
            lost = process.lost(watch_interval) => {
                warn!("[{}] task {id} interrupted: {lost}", self.name);
                (Err(lost), true)
            }
        };
        // The engine may have died after the last check.
        let (result, failed) = match (result, failed) {
            (Ok(()), false) => match process.check_alive() {
                Ok(()) => (Ok(()), false),
                Err(lost) => {
                    warn!("[{}] task {id} finished on a lost engine: {lost}", self.name);
                    (Err(lost), true)
                }
            },
            outcome => outcome,
        };
        let since_start = self.tasks_since_start.fetch_add(1, Ordering::SeqCst) + 1;
        self.total_tasks.fetch_add(1, Ordering::SeqCst);
        // The submitter hears back before any restart.
        let _ = reply.send(result);

        let recycle = !failed && since_start >= self.config.max_tasks_per_process;
        if recycle {
            info!(
                "[{}] recycling office process after {since_start} task(s)",
                self.name
            );
        }
        if (failed || recycle) && self.restart(&mut process).await.is_err() {
            return;
        }
        self.available.release(self.id);
    }
}

async fn run_worker(inner: Arc<EntryInner>) {
    while let Some(task) = inner.queue.dequeue().await {
        inner.execute_one(task).await;
    }
    debug!("[{}] task loop exited", inner.name);
}
