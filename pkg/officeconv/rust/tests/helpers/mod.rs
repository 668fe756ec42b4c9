// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use dd_officeconv::OfficeConfig;
use dd_officeconv::process::office_executable;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Office installation whose engine is the `fake-soffice` binary.
pub struct FakeOffice {
    home: TempDir,
    pub work: TempDir,
}

impl FakeOffice {
    /// `behaviour` is the JSON read by fake-soffice, e.g. `{"first_exit_code": 81}`.
    pub fn new(behaviour: Option<&str>) -> Self {
        let home = tempfile::tempdir().expect("failed to create office home");
        let exe = office_executable(home.path());
        let program = exe.parent().expect("executable has a parent");
        std::fs::create_dir_all(program).expect("failed to create program dir");
        std::os::unix::fs::symlink(env!("CARGO_BIN_EXE_fake-soffice"), &exe)
            .expect("failed to link fake-soffice");
        if let Some(json) = behaviour {
            std::fs::write(program.join("fake-soffice.json"), json)
                .expect("failed to write fake-soffice behaviour");
        }
        Self {
            home,
            work: tempfile::tempdir().expect("failed to create working dir"),
        }
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    /// Config with short timeouts and `workers` socket endpoints.
    pub fn config(&self, workers: usize) -> OfficeConfig {
        OfficeConfig {
            office_home: Some(self.home().to_path_buf()),
            port_numbers: free_ports(workers),
            working_dir: self.work.path().to_path_buf(),
            process_timeout_ms: 10_000,
            process_retry_interval_ms: 50,
            task_queue_timeout_ms: 10_000,
            task_execution_timeout_ms: 10_000,
            ..OfficeConfig::default()
        }
    }

    /// Write a document under the working directory.
    pub fn document(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.work.path().join("docs").join(name);
        std::fs::create_dir_all(path.parent().expect("document has a parent"))
            .expect("failed to create docs dir");
        std::fs::write(&path, contents).expect("failed to write document");
        path
    }

    /// Engine profile directories currently present under the working dir.
    pub fn profile_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.work.path())
            .expect("failed to list working dir")
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(".officeconv_"))
            })
            .collect()
    }
}

/// Ports that were free a moment ago.
pub fn free_ports(n: usize) -> Vec<u16> {
    let listeners: Vec<TcpListener> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("failed to bind"))
        .collect();
    listeners
        .iter()
        .map(|l| l.local_addr().expect("no local addr").port())
        .collect()
}

/// Run the `dd-officeconv` binary with `args`.
pub fn run_cli(args: &[&str], config: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dd-officeconv"))
        .env("DD_OFFICECONV_CONFIG", config)
        .args(args)
        .output()
        .expect("failed to run dd-officeconv")
}

/// Check if a PID is still alive.
pub fn pid_is_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub fn kill(pid: u32) {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).expect("failed to kill engine");
}

/// Wait until a PID is no longer alive, or timeout.
pub fn wait_for_pid_gone(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !pid_is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}
