// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Fake office installations and endpoints for unit tests.
#![allow(clippy::unwrap_used)]

use crate::config::{OfficeConfig, ProcessManagerKind};
use crate::endpoint::Endpoint;
use crate::error::OfficeError;
use crate::process::office_executable;
use crate::process_manager::{ProcessManager, ProcessQuery};
use std::fs;
use std::net::TcpListener;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;

/// Engine stand-in that stays up until signalled.
pub const SLEEPING_ENGINE: &str = "exec sleep 300";

/// Office home whose engine executable is a shell script running `body`.
pub fn fake_office_home(body: &str) -> TempDir {
    let home = TempDir::new().unwrap();
    let exe = office_executable(home.path());
    fs::create_dir_all(exe.parent().unwrap()).unwrap();
    // Written by a separate process so no writable descriptor leaks into
    // children forked concurrently by other tests (ETXTBSY on exec).
    let source = home.path().join("engine.sh");
    fs::write(&source, format!("#!/bin/sh\n{body}\n")).unwrap();
    let status = Command::new("cp").arg(&source).arg(&exe).status().unwrap();
    assert!(status.success());
    fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
    home
}

/// A listener on a free local port standing in for the engine's acceptor.
/// Connections complete in the kernel backlog without being accepted.
pub fn listening_endpoint() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::socket("127.0.0.1", port))
}

/// Short timeouts, pure process manager, everything under `working_dir`.
pub fn test_config(working_dir: &Path, ports: &[u16]) -> OfficeConfig {
    OfficeConfig {
        port_numbers: ports.to_vec(),
        working_dir: working_dir.to_path_buf(),
        process_timeout_ms: 5_000,
        process_retry_interval_ms: 50,
        task_queue_timeout_ms: 2_000,
        task_execution_timeout_ms: 5_000,
        process_manager: ProcessManagerKind::Pure,
        ..OfficeConfig::default()
    }
}

/// Reports a fixed pid as bound to every endpoint and records kills
/// instead of sending signals.
#[derive(Debug)]
pub struct RecordingProcessManager {
    pid: Option<u32>,
    killed: Mutex<Vec<u32>>,
}

impl RecordingProcessManager {
    pub fn with_pid(pid: u32) -> Self {
        Self {
            pid: Some(pid),
            killed: Mutex::new(Vec::new()),
        }
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }
}

impl ProcessManager for RecordingProcessManager {
    fn find_pid(&self, _query: &ProcessQuery) -> Result<Option<u32>, OfficeError> {
        Ok(self.pid)
    }

    fn kill(&self, pid: u32) -> Result<(), OfficeError> {
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }
}
