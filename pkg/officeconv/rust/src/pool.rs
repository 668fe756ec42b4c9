// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::OfficeConfig;
use crate::entry::OfficeManagerPoolEntry;
use crate::error::OfficeError;
use crate::process::OfficeProcess;
use crate::process_manager::{ProcessManager, process_manager_for};
use crate::state::PoolState;
use crate::task::{OfficeTask, TaskHandle};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, sleep_until};

/// Fixed-capacity queue of worker ids, one token per free queue slot.
///
/// A worker puts `task_queue_capacity` tokens in once it is running and one
/// back after each task, so taking a token guarantees room in that worker's
/// queue.
#[derive(Debug)]
pub(crate) struct AvailableWorkers {
    tx: mpsc::Sender<usize>,
    rx: tokio::sync::Mutex<mpsc::Receiver<usize>>,
    failed: watch::Sender<usize>,
    stopped: watch::Sender<bool>,
    workers: usize,
}

impl AvailableWorkers {
    pub fn new(workers: usize, capacity_per_worker: usize) -> Self {
        let (tx, rx) = mpsc::channel((workers * capacity_per_worker).max(1));
        let (failed, _) = watch::channel(0);
        let (stopped, _) = watch::channel(false);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            failed,
            stopped,
            workers,
        }
    }

    pub fn release(&self, worker: usize) {
        if let Err(e) = self.tx.try_send(worker) {
            warn!("cannot release token for worker {worker}: {e}");
        }
    }

    /// Record a worker that will never release tokens again.
    pub fn mark_failed(&self) {
        self.failed.send_modify(|n| *n += 1);
    }

    pub fn failed_count(&self) -> usize {
        *self.failed.borrow()
    }

    /// Wake every waiting and future `acquire` with `ManagerStopped`.
    pub fn shutdown(&self) {
        self.stopped.send_replace(true);
    }

    /// Take a token, waiting up to `wait`. Fails fast with `ManagerStopped`
    /// after [`shutdown`](Self::shutdown) and with `NoAvailableWorker` once
    /// every worker has failed.
    pub async fn acquire(&self, wait: Duration) -> Result<usize, OfficeError> {
        let deadline = Instant::now() + wait;
        let mut stopped = self.stopped.subscribe();
        let mut failed = self.failed.subscribe();
        let workers = self.workers;
        let take = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        tokio::select! {
            biased;
            _ = stopped.wait_for(|s| *s) => Err(OfficeError::ManagerStopped),
            _ = failed.wait_for(|n| *n >= workers) => Err(OfficeError::NoAvailableWorker),
            token = take => token.ok_or(OfficeError::ManagerStopped),
            _ = sleep_until(deadline) => Err(OfficeError::QueueTimeout(wait)),
        }
    }

    /// Drop all tokens and forget failures. Does not undo `shutdown`.
    pub async fn reset(&self) {
        let mut rx = self.rx.lock().await;
        while rx.try_recv().is_ok() {}
        self.failed.send_replace(0);
    }
}

/// A fixed set of workers, each supervising one engine instance, behind a
/// single submission API.
pub struct OfficeManagerPool {
    entries: Vec<Arc<OfficeManagerPoolEntry>>,
    available: Arc<AvailableWorkers>,
    config: Arc<OfficeConfig>,
    state: Mutex<PoolState>,
    /// Background starts, aborted if the pool stops first.
    starting: Mutex<Vec<JoinHandle<()>>>,
}

impl OfficeManagerPool {
    /// Validate `config` and build one worker per endpoint.
    pub fn new(config: OfficeConfig) -> Result<Self, OfficeError> {
        let process_manager = process_manager_for(config.process_manager);
        Self::with_process_manager(config, process_manager)
    }

    /// Like [`OfficeManagerPool::new`] with a custom process manager.
    pub fn with_process_manager(
        config: OfficeConfig,
        process_manager: Arc<dyn ProcessManager>,
    ) -> Result<Self, OfficeError> {
        config.validate()?;
        let office_home = config.resolve_office_home()?;
        let config = Arc::new(config);
        let endpoints = config.endpoints();
        let available = Arc::new(AvailableWorkers::new(
            endpoints.len(),
            config.task_queue_capacity,
        ));

        let entries = endpoints
            .into_iter()
            .enumerate()
            .map(|(id, endpoint)| {
                let process = OfficeProcess::new(
                    format!("office-{id}"),
                    endpoint,
                    office_home.clone(),
                    config.clone(),
                    process_manager.clone(),
                );
                Arc::new(OfficeManagerPoolEntry::new(
                    id,
                    process,
                    config.clone(),
                    available.clone(),
                ))
            })
            .collect();
        info!(
            "office pool configured (office_home={}, process_manager={process_manager:?})",
            office_home.display()
        );

        Ok(Self {
            entries,
            available,
            config,
            state: Mutex::new(PoolState::Created),
            starting: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &OfficeConfig {
        &self.config
    }

    pub fn entries(&self) -> &[Arc<OfficeManagerPoolEntry>] {
        &self.entries
    }

    pub fn state(&self) -> PoolState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: PoolState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    /// Start every worker. With `start_fail_fast` workers start one after
    /// the other and the first failure stops the pool; otherwise they start
    /// in the background and this returns immediately.
    pub async fn start(&self) -> Result<(), OfficeError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state != PoolState::Created {
                return Err(OfficeError::IllegalState(format!(
                    "office pool cannot start while {state}"
                )));
            }
            *state = PoolState::Running;
        }
        info!("starting office pool with {} worker(s)", self.entries.len());

        if self.config.start_fail_fast {
            for entry in &self.entries {
                if let Err(e) = entry.start().await {
                    warn!("[{}] failed to start, stopping pool: {e}", entry.name());
                    if let Err(stop_err) = self.stop().await {
                        warn!("errors while stopping office pool: {stop_err}");
                    }
                    return Err(e);
                }
            }
        } else {
            let mut starting = self.starting.lock().unwrap_or_else(|e| e.into_inner());
            for entry in &self.entries {
                let entry = entry.clone();
                starting.push(tokio::spawn(async move {
                    if let Err(e) = entry.start().await {
                        warn!("[{}] failed to start: {e}", entry.name());
                    }
                }));
            }
        }
        Ok(())
    }

    /// Stop every worker concurrently. All stops run to completion before
    /// their failures are reported together.
    pub async fn stop(&self) -> Result<(), OfficeError> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                PoolState::Stopping | PoolState::Stopped => return Ok(()),
                PoolState::Created => {
                    *state = PoolState::Stopped;
                    self.available.shutdown();
                    return Ok(());
                }
                PoolState::Running => *state = PoolState::Stopping,
            }
        }
        info!("stopping office pool");
        self.available.shutdown();

        let starting: Vec<_> = self
            .starting
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in starting {
            if !handle.is_finished() {
                handle.abort();
            }
            let _ = handle.await;
        }

        let mut stops = JoinSet::new();
        for entry in &self.entries {
            let entry = entry.clone();
            stops.spawn(async move { entry.stop().await });
        }
        let mut errors = Vec::new();
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(OfficeError::execution_with("worker stop panicked", e)),
            }
        }
        self.available.reset().await;
        self.set_state(PoolState::Stopped);
        info!("office pool stopped");

        if errors.is_empty() {
            Ok(())
        } else {
            Err(OfficeError::Aggregate(errors))
        }
    }

    fn check_running(&self) -> Result<(), OfficeError> {
        match self.state() {
            PoolState::Running => Ok(()),
            PoolState::Created => Err(OfficeError::IllegalState(
                "office pool is not started".to_string(),
            )),
            PoolState::Stopping | PoolState::Stopped => Err(OfficeError::ManagerStopped),
        }
    }

    /// Hand `task` to the next free worker. Waits up to the queue timeout for
    /// one to become free.
    pub async fn submit(&self, task: impl OfficeTask) -> Result<TaskHandle, OfficeError> {
        self.check_running()?;
        let wait = self.config.task_queue_timeout();
        let deadline = Instant::now() + wait;
        let task: Box<dyn OfficeTask> = Box::new(task);

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let worker = match self.available.acquire(remaining).await {
                Ok(worker) => worker,
                Err(OfficeError::QueueTimeout(_)) => return Err(OfficeError::QueueTimeout(wait)),
                Err(e) => return Err(e),
            };
            self.check_running()?;
            let Some(entry) = self.entries.get(worker) else {
                continue;
            };
            if !entry.state().accepts_tasks() {
                debug!("[{}] skipping token, worker is {}", entry.name(), entry.state());
                continue;
            }
            return match entry.submit_boxed(task, remaining).await {
                Ok(handle) => Ok(handle),
                Err(OfficeError::QueueTimeout(_)) => {
                    self.available.release(worker);
                    Err(OfficeError::QueueTimeout(wait))
                }
                Err(e) => Err(e),
            };
        }
    }

    /// Submit `task` and wait for its outcome.
    pub async fn execute(&self, task: impl OfficeTask) -> Result<(), OfficeError> {
        self.submit(task).await?.wait().await
    }
}

impl std::fmt::Debug for OfficeManagerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfficeManagerPool")
            .field("state", &self.state())
            .field("entries", &self.entries)
            .finish()
    }
}
