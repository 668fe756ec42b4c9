// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Discovery and forced termination of engine processes.
//!
//! Spawning is done by [`crate::process::OfficeProcess`]; the process manager
//! only answers "which pid is bound to this endpoint" and kills by pid. This
//! is what lets a worker clean up an engine left behind by a crashed run.

use crate::config::ProcessManagerKind;
use crate::endpoint::Endpoint;
use crate::error::OfficeError;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};

static PROC_ROOT: OnceLock<PathBuf> = OnceLock::new();

fn proc_root() -> &'static Path {
    PROC_ROOT.get_or_init(|| {
        if let Ok(v) = env::var("HOST_PROC") {
            return v.into();
        }
        "/proc".into()
    })
}

/// How a [`ProcessQuery`] recognises its target among a process's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentMatch {
    /// An argument equal to this string.
    Exact(String),
    /// An `--accept=` argument bound to exactly this endpoint.
    Accept(Endpoint),
}

impl ArgumentMatch {
    fn matches(&self, arg: &str) -> bool {
        match self {
            ArgumentMatch::Exact(expected) => arg == expected,
            ArgumentMatch::Accept(endpoint) => arg
                .strip_prefix("--accept=")
                .or_else(|| arg.strip_prefix("-accept="))
                .and_then(Endpoint::from_accept_string)
                .is_some_and(|found| found == *endpoint),
        }
    }
}

/// Matches a process whose executable name contains `command` and that has an
/// argument matching `argument`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessQuery {
    pub command: String,
    pub argument: ArgumentMatch,
}

impl ProcessQuery {
    pub fn new(command: impl Into<String>, argument: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            argument: ArgumentMatch::Exact(argument.into()),
        }
    }

    /// An engine started with `--accept` on `endpoint`.
    pub fn accepting(command: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            command: command.into(),
            argument: ArgumentMatch::Accept(endpoint),
        }
    }

    pub fn matches<'a>(&self, mut args: impl Iterator<Item = &'a str>) -> bool {
        let Some(exe) = args.next() else {
            return false;
        };
        let exe_name = Path::new(exe)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(exe);
        if !exe_name.contains(&self.command) {
            return false;
        }
        args.any(|arg| self.argument.matches(arg))
    }
}

pub trait ProcessManager: Send + Sync + fmt::Debug {
    /// Pid of a running process matching `query`, if any.
    fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, OfficeError>;

    /// Forcibly terminate `pid`. A pid that is already gone is not an error.
    fn kill(&self, pid: u32) -> Result<(), OfficeError> {
        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(OfficeError::Io(std::io::Error::from(e))),
        }
    }

    /// Whether `find_pid` can actually discover processes.
    fn can_find_pid(&self) -> bool {
        true
    }
}

/// Kill by pid only. Used where process listings are unavailable.
#[derive(Debug, Default)]
pub struct PureProcessManager;

impl ProcessManager for PureProcessManager {
    fn find_pid(&self, _query: &ProcessQuery) -> Result<Option<u32>, OfficeError> {
        Ok(None)
    }

    fn can_find_pid(&self) -> bool {
        false
    }
}

/// Reads `/proc/<pid>/cmdline` on Linux and falls back to `ps` elsewhere.
#[derive(Debug, Default)]
pub struct UnixProcessManager;

impl UnixProcessManager {
    fn find_in_procfs(&self, root: &Path, query: &ProcessQuery) -> Option<u32> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("cannot list {}: {e}", root.display());
                return None;
            }
        };
        let own_pid = std::process::id();
        let mut pids: Vec<u32> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse().ok()))
            .filter(|&pid| pid != own_pid)
            .collect();
        pids.sort_unstable();

        pids.into_iter().find(|pid| {
            // Processes can vanish between listing and reading.
            fs::read(root.join(pid.to_string()).join("cmdline"))
                .ok()
                .is_some_and(|raw| {
                    let cmdline = String::from_utf8_lossy(&raw);
                    query.matches(cmdline.trim_end_matches('\0').split('\0'))
                })
        })
    }

    fn find_with_ps(&self, query: &ProcessQuery) -> Result<Option<u32>, OfficeError> {
        let output = Command::new("ps").args(["-e", "-o", "pid=,args="]).output()?;
        if !output.status.success() {
            return Err(OfficeError::execution(format!(
                "ps exited with {}",
                output.status
            )));
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ps_listing(&listing, query))
    }
}

impl ProcessManager for UnixProcessManager {
    fn find_pid(&self, query: &ProcessQuery) -> Result<Option<u32>, OfficeError> {
        let root = proc_root();
        if root.join("self").exists() {
            return Ok(self.find_in_procfs(root, query));
        }
        self.find_with_ps(query)
    }
}

fn parse_ps_listing(listing: &str, query: &ProcessQuery) -> Option<u32> {
    let own_pid = std::process::id();
    listing.lines().find_map(|line| {
        let (pid, args) = line.trim_start().split_once(char::is_whitespace)?;
        let pid: u32 = pid.parse().ok()?;
        (pid != own_pid && query.matches(args.split_whitespace())).then_some(pid)
    })
}

pub fn process_manager_for(kind: ProcessManagerKind) -> Arc<dyn ProcessManager> {
    match kind {
        ProcessManagerKind::Pure => Arc::new(PureProcessManager),
        ProcessManagerKind::Unix => Arc::new(UnixProcessManager),
        ProcessManagerKind::Auto => {
            if proc_root().join("self").exists() || Path::new("/bin/ps").exists() {
                Arc::new(UnixProcessManager)
            } else {
                warn!("no process listing available, stale office processes cannot be detected");
                Arc::new(PureProcessManager)
            }
        }
    }
}
