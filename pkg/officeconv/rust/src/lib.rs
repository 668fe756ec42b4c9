// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

// Panicking code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// Debug code that shouldn't be in production
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]

pub mod config;
pub mod connection;
pub mod converter;
pub mod endpoint;
pub mod entry;
pub mod error;
pub mod filter;
pub mod format;
pub mod pool;
pub mod process;
pub mod process_manager;
mod queue;
pub mod state;
pub mod task;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export the public API
pub use config::{ExistingProcessAction, OfficeConfig, ProcessManagerKind};
pub use connection::ConnectionHandle;
pub use converter::{ConversionJob, ConversionTask, DocumentConverter, SourceJob};
pub use endpoint::Endpoint;
pub use entry::{EntryStats, OfficeManagerPoolEntry};
pub use error::OfficeError;
pub use filter::{Filter, FilterChain};
pub use format::{DocumentFamily, DocumentFormat, DocumentFormatRegistry, FormatOptions};
pub use pool::OfficeManagerPool;
pub use process::OfficeProcess;
pub use process_manager::{
    ArgumentMatch, ProcessManager, ProcessQuery, PureProcessManager, UnixProcessManager,
};
pub use state::{EntryState, PoolState};
pub use task::{OfficeContext, OfficeTask, TaskHandle, task_fn};
