// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum OfficeError {
    /// The engine instance did not accept a connection in time.
    #[error("office process on {endpoint} did not start within {}ms", .timeout.as_millis())]
    StartTimeout { endpoint: String, timeout: Duration },

    /// The engine exited on its own while it was being started.
    #[error("office process on {endpoint} exited during start (code={code:?})")]
    ProcessExited { endpoint: String, code: Option<i32> },

    /// No worker accepted the task before the queue timeout.
    #[error("task was not accepted within {}ms", .0.as_millis())]
    QueueTimeout(Duration),

    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The engine failed while processing a task.
    #[error("task execution failed: {message}")]
    ExecutionFailure {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("task did not complete within {}ms", .0.as_millis())]
    TaskTimeout(Duration),

    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("office manager stopped")]
    ManagerStopped,

    #[error("no office worker is available")]
    NoAvailableWorker,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failures collected while stopping several workers.
    #[error("{} error(s): {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<OfficeError>),
}

impl OfficeError {
    pub fn execution(message: impl Into<String>) -> Self {
        OfficeError::ExecutionFailure {
            message: message.into(),
            source: None,
        }
    }

    pub fn execution_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        OfficeError::ExecutionFailure {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

fn join_errors(errors: &[OfficeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
