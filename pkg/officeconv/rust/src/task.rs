// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::connection::ConnectionHandle;
use crate::endpoint::Endpoint;
use crate::error::OfficeError;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), OfficeError>> + Send + 'static>>;

/// A unit of work run once against a live engine instance.
pub trait OfficeTask: Send + 'static {
    fn execute(self: Box<Self>, ctx: OfficeContext) -> TaskFuture;
}

/// Task built from an async closure, see [`task_fn`].
pub struct FnTask<F>(F);

/// Wrap an async closure as a task.
pub fn task_fn<F, Fut>(f: F) -> FnTask<F>
where
    F: FnOnce(OfficeContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), OfficeError>> + Send + 'static,
{
    FnTask(f)
}

impl<F, Fut> OfficeTask for FnTask<F>
where
    F: FnOnce(OfficeContext) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), OfficeError>> + Send + 'static,
{
    fn execute(self: Box<Self>, ctx: OfficeContext) -> TaskFuture {
        Box::pin((self.0)(ctx))
    }
}

/// What a task can see of the worker executing it.
#[derive(Debug, Clone)]
pub struct OfficeContext {
    pub(crate) worker: usize,
    pub(crate) endpoint: Endpoint,
    pub(crate) office_home: PathBuf,
    pub(crate) profile_dir: PathBuf,
    pub(crate) pid: Option<u32>,
    pub(crate) connection: ConnectionHandle,
}

impl OfficeContext {
    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn office_home(&self) -> &Path {
        &self.office_home
    }

    /// Instance profile directory, exclusively owned by this worker.
    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique task id, used in logs and handles.
pub(crate) fn next_task_id() -> u64 {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct QueuedTask {
    pub id: u64,
    pub task: Box<dyn OfficeTask>,
    pub reply: oneshot::Sender<Result<(), OfficeError>>,
}

impl QueuedTask {
    pub fn new(id: u64, task: Box<dyn OfficeTask>) -> (Self, TaskHandle) {
        let (reply, rx) = oneshot::channel();
        (Self { id, task, reply }, TaskHandle { id, rx })
    }

    /// Report `result` to the submitter. A submitter that stopped waiting is
    /// not an error.
    pub fn complete(self, result: Result<(), OfficeError>) {
        let _ = self.reply.send(result);
    }

    pub fn fail(self, err: OfficeError) {
        self.complete(Err(err));
    }
}

/// Completion handle for a submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    rx: oneshot::Receiver<Result<(), OfficeError>>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<(), OfficeError> {
        // The sender is only dropped without a reply if the worker task was
        // aborted at the stop deadline.
        self.rx.await.unwrap_or(Err(OfficeError::ManagerStopped))
    }
}
