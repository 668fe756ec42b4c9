// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::endpoint::Endpoint;
use crate::error::OfficeError;
use crate::format::FormatOptions;
use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "DD_OFFICECONV_CONFIG";
const DEFAULT_PORT: u16 = 2002;

/// Install locations checked when `office_home` is not configured.
const OFFICE_HOME_CANDIDATES: &[&str] = &[
    "/usr/lib64/libreoffice",
    "/usr/lib/libreoffice",
    "/usr/local/lib64/libreoffice",
    "/usr/local/lib/libreoffice",
    "/opt/libreoffice",
    "/opt/openoffice4",
    "/usr/lib/openoffice",
    "/Applications/LibreOffice.app/Contents",
];

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_working_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_process_timeout_ms() -> u64 {
    120_000
}

fn default_process_retry_interval_ms() -> u64 {
    250
}

fn default_task_queue_timeout_ms() -> u64 {
    30_000
}

fn default_task_execution_timeout_ms() -> u64 {
    120_000
}

fn default_max_tasks_per_process() -> u32 {
    200
}

fn default_one() -> usize {
    1
}

fn default_max_restart_attempts() -> u32 {
    3
}

/// What to do when an engine is already bound to a worker's endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingProcessAction {
    Fail,
    #[default]
    Kill,
    Connect,
    ConnectOrKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessManagerKind {
    #[default]
    Auto,
    Unix,
    Pure,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfficeConfig {
    pub office_home: Option<PathBuf>,
    #[serde(default = "default_host")]
    pub host_name: String,
    #[serde(default)]
    pub port_numbers: Vec<u16>,
    #[serde(default)]
    pub pipe_names: Vec<String>,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    pub template_profile_dir: Option<PathBuf>,
    #[serde(default)]
    pub existing_process_action: ExistingProcessAction,
    #[serde(default = "default_process_timeout_ms")]
    pub process_timeout_ms: u64,
    #[serde(default = "default_process_retry_interval_ms")]
    pub process_retry_interval_ms: u64,
    #[serde(default)]
    pub after_start_process_delay_ms: u64,
    #[serde(default)]
    pub disable_opengl: bool,
    #[serde(default)]
    pub start_fail_fast: bool,
    #[serde(default)]
    pub keep_alive_on_shutdown: bool,
    #[serde(default = "default_task_queue_timeout_ms")]
    pub task_queue_timeout_ms: u64,
    #[serde(default = "default_task_execution_timeout_ms")]
    pub task_execution_timeout_ms: u64,
    #[serde(default = "default_max_tasks_per_process")]
    pub max_tasks_per_process: u32,
    #[serde(default = "default_one")]
    pub task_queue_capacity: usize,
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,
    #[serde(default)]
    pub process_manager: ProcessManagerKind,
    pub document_format_registry: Option<PathBuf>,
    #[serde(default)]
    pub format_options: HashMap<String, FormatOptions>,
}

impl Default for OfficeConfig {
    fn default() -> Self {
        Self {
            office_home: None,
            host_name: default_host(),
            port_numbers: Vec::new(),
            pipe_names: Vec::new(),
            working_dir: default_working_dir(),
            template_profile_dir: None,
            existing_process_action: ExistingProcessAction::default(),
            process_timeout_ms: default_process_timeout_ms(),
            process_retry_interval_ms: default_process_retry_interval_ms(),
            after_start_process_delay_ms: 0,
            disable_opengl: false,
            start_fail_fast: false,
            keep_alive_on_shutdown: false,
            task_queue_timeout_ms: default_task_queue_timeout_ms(),
            task_execution_timeout_ms: default_task_execution_timeout_ms(),
            max_tasks_per_process: default_max_tasks_per_process(),
            task_queue_capacity: default_one(),
            max_restart_attempts: default_max_restart_attempts(),
            process_manager: ProcessManagerKind::default(),
            document_format_registry: None,
            format_options: HashMap::new(),
        }
    }
}

impl OfficeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: OfficeConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        debug!("loaded office config from {}", path.display());
        Ok(config)
    }

    /// Config path from `DD_OFFICECONV_CONFIG`, if set.
    pub fn path_from_env() -> Option<PathBuf> {
        std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from)
    }

    /// One endpoint per worker: ports first, then pipes.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self
            .port_numbers
            .iter()
            .map(|&port| Endpoint::socket(self.host_name.clone(), port))
            .collect();
        endpoints.extend(self.pipe_names.iter().map(Endpoint::pipe));
        if endpoints.is_empty() {
            endpoints.push(Endpoint::socket(self.host_name.clone(), DEFAULT_PORT));
        }
        endpoints
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_millis(self.process_timeout_ms)
    }

    pub fn process_retry_interval(&self) -> Duration {
        Duration::from_millis(self.process_retry_interval_ms)
    }

    pub fn after_start_process_delay(&self) -> Duration {
        Duration::from_millis(self.after_start_process_delay_ms)
    }

    pub fn task_queue_timeout(&self) -> Duration {
        Duration::from_millis(self.task_queue_timeout_ms)
    }

    pub fn task_execution_timeout(&self) -> Duration {
        Duration::from_millis(self.task_execution_timeout_ms)
    }

    /// Configured office home, or the first well-known install that has an
    /// engine executable.
    pub fn resolve_office_home(&self) -> Result<PathBuf, OfficeError> {
        if let Some(ref home) = self.office_home {
            return Ok(home.clone());
        }
        if let Some(home) = std::env::var_os("OFFICE_HOME") {
            return Ok(PathBuf::from(home));
        }
        OFFICE_HOME_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|home| crate::process::office_executable(home).is_file())
            .ok_or_else(|| {
                OfficeError::Config(
                    "office_home is not set and no office installation was found".to_string(),
                )
            })
    }

    pub fn validate(&self) -> Result<(), OfficeError> {
        let endpoints = self.endpoints();
        let mut seen = HashSet::new();
        for ep in &endpoints {
            if !seen.insert(ep) {
                return Err(OfficeError::Config(format!("duplicate endpoint: {ep}")));
            }
        }
        if self.task_queue_capacity == 0 {
            return Err(OfficeError::Config(
                "task_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_tasks_per_process == 0 {
            return Err(OfficeError::Config(
                "max_tasks_per_process must be at least 1".to_string(),
            ));
        }
        if self.process_timeout_ms == 0
            || self.task_queue_timeout_ms == 0
            || self.task_execution_timeout_ms == 0
        {
            return Err(OfficeError::Config("timeouts must be positive".to_string()));
        }
        if self.process_retry_interval_ms == 0
            || self.process_retry_interval_ms >= self.process_timeout_ms
        {
            return Err(OfficeError::Config(format!(
                "process_retry_interval_ms ({}) must be positive and below process_timeout_ms ({})",
                self.process_retry_interval_ms, self.process_timeout_ms
            )));
        }
        if let Some(ref template) = self.template_profile_dir
            && !template.join("user").is_dir()
        {
            return Err(OfficeError::Config(format!(
                "template_profile_dir {} has no user/ directory",
                template.display()
            )));
        }
        Ok(())
    }
}
