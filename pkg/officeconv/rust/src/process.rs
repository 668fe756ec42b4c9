// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use crate::config::{ExistingProcessAction, OfficeConfig};
use crate::connection::ConnectionHandle;
use crate::endpoint::Endpoint;
use crate::error::OfficeError;
use crate::process_manager::{ProcessManager, ProcessQuery};
use crate::task::OfficeContext;
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::process::{Child, Command};
use tokio::time::{Duration, Instant, sleep, timeout};
use walkdir::WalkDir;

/// Exit code of an engine that initialised a fresh profile and wants to be
/// started again.
pub const EXIT_CODE_NEW_INSTALLATION: i32 = 81;

const SIGKILL_TIMEOUT: Duration = Duration::from_secs(10);

/// Name fragment used to recognise engine processes in a process listing.
const EXECUTABLE_HINT: &str = "soffice";

const ENGINE_OPTIONS: &[&str] = &[
    "--headless",
    "--nocrashreport",
    "--nodefault",
    "--nofirststartwizard",
    "--nolockcheck",
    "--nologo",
    "--norestore",
];

const LOCK_FILES: &[&str] = &[".lock", "user/.lock"];

const OPENGL_ITEM: &str = r#"<item oor:path="/org.openoffice.Office.Common/VCL"><prop oor:name="UseOpenGL" oor:op="fuse"><value>false</value></prop></item>"#;

/// Engine executable below an office installation directory.
pub fn office_executable(office_home: &Path) -> PathBuf {
    if cfg!(target_os = "macos") {
        office_home.join("MacOS").join("soffice")
    } else {
        office_home.join("program").join("soffice.bin")
    }
}

/// `file://` URL of a local directory, as expected by `-env:UserInstallation`.
pub fn file_url(path: &Path) -> String {
    let mut url = String::from("file://");
    for b in path.to_string_lossy().bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'/' | b'-' | b'_' | b'.' | b'~' => {
                url.push(b as char)
            }
            _ => url.push_str(&format!("%{b:02X}")),
        }
    }
    url
}

/// Supervises one engine instance bound to one endpoint.
pub struct OfficeProcess {
    name: String,
    endpoint: Endpoint,
    office_home: PathBuf,
    config: Arc<OfficeConfig>,
    process_manager: Arc<dyn ProcessManager>,
    connection: ConnectionHandle,
    profile_dir: PathBuf,
    child: Option<Child>,
    /// Engine found already running and connected to instead of spawned.
    adopted_pid: Option<u32>,
}

impl OfficeProcess {
    pub fn new(
        name: String,
        endpoint: Endpoint,
        office_home: PathBuf,
        config: Arc<OfficeConfig>,
        process_manager: Arc<dyn ProcessManager>,
    ) -> Self {
        let profile_dir = config.working_dir.join(endpoint.profile_dir_name());
        Self {
            name,
            endpoint,
            office_home,
            config,
            process_manager,
            connection: ConnectionHandle::new(),
            profile_dir,
            child: None,
            adopted_pid: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn pid(&self) -> Option<u32> {
        self.child
            .as_ref()
            .and_then(|c| c.id())
            .or(self.adopted_pid)
    }

    pub(crate) fn context(&self, worker: usize) -> OfficeContext {
        OfficeContext {
            worker,
            endpoint: self.endpoint.clone(),
            office_home: self.office_home.clone(),
            profile_dir: self.profile_dir.clone(),
            pid: self.pid(),
            connection: self.connection.clone(),
        }
    }

    /// Arguments passed to the engine executable.
    pub fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--accept={}", self.endpoint.accept_string()),
            format!("-env:UserInstallation={}", file_url(&self.profile_dir)),
        ];
        args.extend(ENGINE_OPTIONS.iter().map(|s| s.to_string()));
        args
    }

    /// Whether the engine process is still alive.
    pub fn is_running(&mut self) -> bool {
        if let Some(ref mut child) = self.child {
            return matches!(child.try_wait(), Ok(None));
        }
        match self.adopted_pid {
            Some(pid) => pid_alive(pid),
            None => false,
        }
    }

    /// `Err` once the engine has exited or its session has dropped.
    pub(crate) fn check_alive(&mut self) -> Result<(), OfficeError> {
        if !self.is_running() {
            return Err(OfficeError::execution(format!(
                "office process on {} exited",
                self.endpoint
            )));
        }
        if !self.connection.is_connected() {
            return Err(OfficeError::execution(format!(
                "lost connection to office process on {}",
                self.endpoint
            )));
        }
        Ok(())
    }

    /// Resolves with the reason once the engine is lost, checking every
    /// `interval`. Never resolves while the engine stays healthy.
    pub(crate) async fn lost(&mut self, interval: Duration) -> OfficeError {
        loop {
            sleep(interval).await;
            if let Err(e) = self.check_alive() {
                return e;
            }
        }
    }

    /// Launch the engine and connect to it. With `restart`, a stale engine
    /// on the endpoint is killed and the profile is reused; otherwise the
    /// existing-process policy applies and the profile starts fresh.
    pub async fn start(&mut self, restart: bool) -> Result<(), OfficeError> {
        if self.is_running() {
            return Err(OfficeError::IllegalState(format!(
                "[{}] office process is already running (pid={:?})",
                self.name,
                self.pid()
            )));
        }
        self.child = None;
        self.adopted_pid = None;

        let query = ProcessQuery::accepting(EXECUTABLE_HINT, self.endpoint.clone());
        let existing = self.process_manager.find_pid(&query)?;
        if restart {
            if let Some(pid) = existing {
                warn!("[{}] killing stale office process (pid={pid})", self.name);
                self.process_manager.kill(pid)?;
            }
        } else if let Some(pid) = existing
            && self.handle_existing(pid).await?
        {
            return Ok(());
        }

        if let Err(e) = self.prepare_profile(!restart) {
            self.release_profile();
            return Err(e.into());
        }

        if let Err(e) = self.launch().await {
            warn!("[{}] start failed: {e}", self.name);
            self.abort_start().await;
            return Err(e);
        }
        Ok(())
    }

    /// Apply `existing_process_action` to an engine already bound to the
    /// endpoint. Returns true if that engine was adopted.
    async fn handle_existing(&mut self, pid: u32) -> Result<bool, OfficeError> {
        let action = self.config.existing_process_action;
        info!(
            "[{}] found existing office process (pid={pid}) on {}, action={action:?}",
            self.name, self.endpoint
        );
        match action {
            ExistingProcessAction::Fail => Err(OfficeError::IllegalState(format!(
                "an office process (pid={pid}) is already running on {}",
                self.endpoint
            ))),
            ExistingProcessAction::Kill => {
                self.process_manager.kill(pid)?;
                Ok(false)
            }
            ExistingProcessAction::Connect | ExistingProcessAction::ConnectOrKill => {
                match self
                    .connection
                    .connect(&self.endpoint, self.config.process_timeout())
                    .await
                {
                    Ok(()) => {
                        info!("[{}] connected to existing office process (pid={pid})", self.name);
                        self.adopted_pid = Some(pid);
                        Ok(true)
                    }
                    Err(e) if action == ExistingProcessAction::Connect => {
                        Err(OfficeError::IllegalState(format!(
                            "cannot connect to existing office process (pid={pid}) on {}: {e}",
                            self.endpoint
                        )))
                    }
                    Err(e) => {
                        warn!("[{}] cannot connect to pid={pid} ({e}), killing it", self.name);
                        self.process_manager.kill(pid)?;
                        Ok(false)
                    }
                }
            }
        }
    }

    fn spawn(&mut self) -> Result<(), OfficeError> {
        let executable = office_executable(&self.office_home);
        let mut cmd = Command::new(&executable);
        cmd.args(self.command_args());
        if self.config.disable_opengl {
            cmd.env("SAL_DISABLE_OPENGL", "true");
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::inherit());

        let child = cmd.spawn().map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("[{}] failed to spawn {}: {e}", self.name, executable.display()),
            )
        })?;
        info!(
            "[{}] spawned (pid={}, accept={})",
            self.name,
            child.id().unwrap_or(0),
            self.endpoint.accept_string()
        );
        self.child = Some(child);
        Ok(())
    }

    /// Spawn, then poll the endpoint until it accepts or the process timeout
    /// elapses.
    async fn launch(&mut self) -> Result<(), OfficeError> {
        let process_timeout = self.config.process_timeout();
        let retry_interval = self.config.process_retry_interval();
        let deadline = Instant::now() + process_timeout;
        let mut respawned = false;

        self.spawn()?;
        loop {
            let exited = match self.child.as_mut() {
                Some(child) => child.try_wait()?,
                None => None,
            };
            if let Some(status) = exited {
                if status.code() == Some(EXIT_CODE_NEW_INSTALLATION) && !respawned {
                    info!("[{}] profile initialised, starting again", self.name);
                    respawned = true;
                    self.spawn()?;
                    continue;
                }
                return Err(OfficeError::ProcessExited {
                    endpoint: self.endpoint.to_string(),
                    code: status.code(),
                });
            }

            match self.connection.connect(&self.endpoint, retry_interval).await {
                Ok(()) => break,
                Err(e) => debug!("[{}] not accepting yet: {e}", self.name),
            }
            if Instant::now() >= deadline {
                return Err(OfficeError::StartTimeout {
                    endpoint: self.endpoint.to_string(),
                    timeout: process_timeout,
                });
            }
            sleep(retry_interval).await;
        }

        let delay = self.config.after_start_process_delay();
        if !delay.is_zero() {
            sleep(delay).await;
        }
        info!("[{}] started (pid={:?})", self.name, self.pid());
        Ok(())
    }

    async fn abort_start(&mut self) {
        self.connection.disconnect();
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            if timeout(SIGKILL_TIMEOUT, child.wait()).await.is_err() {
                warn!("[{}] still running after SIGKILL, giving up", self.name);
            }
        }
        self.release_profile();
    }

    /// Stop the engine: SIGTERM, wait up to the process timeout, then
    /// SIGKILL. With `keep_alive` the engine and its profile are left
    /// running. Never fails; problems are logged.
    pub async fn stop(&mut self, keep_alive: bool) {
        self.connection.disconnect();

        if keep_alive {
            if let Some(pid) = self.pid() {
                info!("[{}] leaving office process running (pid={pid})", self.name);
            }
            // Dropping a tokio child does not kill it.
            self.child = None;
            self.adopted_pid = None;
            return;
        }

        let stop_timeout = self.config.process_timeout();
        if let Some(mut child) = self.child.take() {
            terminate(&self.name, &mut child, stop_timeout).await;
        } else if let Some(pid) = self.adopted_pid.take() {
            self.terminate_adopted(pid, stop_timeout).await;
        }
        self.release_profile();
    }

    async fn terminate_adopted(&self, pid: u32, stop_timeout: Duration) {
        info!("[{}] sending SIGTERM (pid={pid})", self.name);
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            if e == Errno::ESRCH {
                return;
            }
            warn!("[{}] failed to send SIGTERM: {e}", self.name);
        }
        let deadline = Instant::now() + stop_timeout;
        while pid_alive(pid) && Instant::now() < deadline {
            sleep(Duration::from_millis(50)).await;
        }
        if pid_alive(pid) {
            warn!(
                "[{}] stop timeout ({}ms) reached, killing pid={pid}",
                self.name,
                stop_timeout.as_millis()
            );
            if let Err(e) = self.process_manager.kill(pid) {
                warn!("[{}] failed to kill pid={pid}: {e}", self.name);
            }
        }
    }

    fn prepare_profile(&self, fresh: bool) -> io::Result<()> {
        let dir = &self.profile_dir;
        if dir.exists() {
            if fresh {
                debug!("[{}] removing leftover profile {}", self.name, dir.display());
                fs::remove_dir_all(dir)?;
            } else {
                for lock in LOCK_FILES {
                    let path = dir.join(lock);
                    if path.exists() {
                        debug!("[{}] removing {}", self.name, path.display());
                        fs::remove_file(&path)?;
                    }
                }
            }
        }
        if !dir.exists() {
            match self.config.template_profile_dir {
                Some(ref template) => copy_dir(template, dir)?,
                None => fs::create_dir_all(dir)?,
            }
        }
        if self.config.disable_opengl {
            disable_opengl(dir)?;
        }
        Ok(())
    }

    /// Delete the profile directory, or move it aside if it cannot be deleted.
    fn release_profile(&self) {
        let dir = &self.profile_dir;
        if !dir.exists() {
            return;
        }
        match fs::remove_dir_all(dir) {
            Ok(()) => debug!("[{}] removed profile {}", self.name, dir.display()),
            Err(e) => {
                let secs = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                let mut aside = dir.as_os_str().to_owned();
                aside.push(format!(".old.{secs}"));
                match fs::rename(dir, &aside) {
                    Ok(()) => warn!(
                        "[{}] could not remove profile ({e}), moved to {}",
                        self.name,
                        Path::new(&aside).display()
                    ),
                    Err(e2) => warn!(
                        "[{}] could not remove or rename profile {}: {e}, {e2}",
                        self.name,
                        dir.display()
                    ),
                }
            }
        }
    }
}

impl Drop for OfficeProcess {
    fn drop(&mut self) {
        if let Some(ref mut child) = self.child {
            let _ = child.start_kill();
            self.release_profile();
        }
    }
}

impl std::fmt::Debug for OfficeProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfficeProcess")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("pid", &self.pid())
            .finish()
    }
}

/// SIGTERM, wait up to `stop_timeout`, then SIGKILL.
async fn terminate(name: &str, child: &mut Child, stop_timeout: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        debug!("[{name}] already exited with {status}");
        return Some(status);
    }
    if let Some(pid) = child.id() {
        info!("[{name}] sending SIGTERM (pid={pid})");
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("[{name}] failed to send SIGTERM: {e}");
        }
    }
    if let Ok(Ok(status)) = timeout(stop_timeout, child.wait()).await {
        info!("[{name}] exited with {status}");
        return Some(status);
    }
    warn!(
        "[{name}] stop timeout ({}ms) reached, sending SIGKILL",
        stop_timeout.as_millis()
    );
    let _ = child.start_kill();
    match timeout(SIGKILL_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        _ => {
            warn!("[{name}] still running after SIGKILL, giving up");
            None
        }
    }
}

fn pid_alive(pid: u32) -> bool {
    !matches!(
        signal::kill(Pid::from_raw(pid as i32), None),
        Err(Errno::ESRCH)
    )
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn disable_opengl(profile_dir: &Path) -> io::Result<()> {
    let user_dir = profile_dir.join("user");
    fs::create_dir_all(&user_dir)?;
    let path = user_dir.join("registrymodifications.xcu");
    let contents = match fs::read_to_string(&path) {
        Ok(existing) if existing.contains("UseOpenGL") => return Ok(()),
        Ok(existing) if existing.contains("</oor:items>") => {
            existing.replacen("</oor:items>", &format!("{OPENGL_ITEM}\n</oor:items>"), 1)
        }
        _ => format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <oor:items xmlns:oor=\"http://openoffice.org/2001/registry\" \
             xmlns:xs=\"http://www.w3.org/2001/XMLSchema\" \
             xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\n\
             {OPENGL_ITEM}\n</oor:items>\n"
        ),
    };
    fs::write(path, contents)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::process_manager::PureProcessManager;
    use crate::test_utils::{
        RecordingProcessManager, SLEEPING_ENGINE, fake_office_home, listening_endpoint,
        test_config,
    };

    fn make_process(home: &Path, config: OfficeConfig, endpoint: Endpoint) -> OfficeProcess {
        OfficeProcess::new(
            "office-0".into(),
            endpoint,
            home.to_path_buf(),
            Arc::new(config),
            Arc::new(PureProcessManager),
        )
    }

    #[test]
    fn test_office_executable() {
        let exe = office_executable(Path::new("/opt/libreoffice"));
        if cfg!(target_os = "macos") {
            assert_eq!(exe, PathBuf::from("/opt/libreoffice/MacOS/soffice"));
        } else {
            assert_eq!(exe, PathBuf::from("/opt/libreoffice/program/soffice.bin"));
        }
    }

    #[test]
    fn test_file_url_escapes() {
        assert_eq!(
            file_url(Path::new("/tmp/my profile/.office")),
            "file:///tmp/my%20profile/.office"
        );
    }

    #[test]
    fn test_command_args() {
        let work = tempfile::tempdir().unwrap();
        let config = test_config(work.path(), &[2002]);
        let proc = make_process(
            Path::new("/opt/office"),
            config,
            Endpoint::socket("127.0.0.1", 2002),
        );
        let args = proc.command_args();
        assert_eq!(
            args[0],
            "--accept=socket,host=127.0.0.1,port=2002,tcpNoDelay=1;urp;StarOffice.ServiceManager"
        );
        assert!(args[1].starts_with("-env:UserInstallation=file://"));
        assert!(args[1].ends_with("/.officeconv_socket_127.0.0.1_2002"));
        assert!(args.contains(&"--headless".to_string()));
        assert!(args.contains(&"--norestore".to_string()));
    }

    #[tokio::test]
    async fn test_start_and_stop_releases_profile() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut proc = make_process(home.path(), test_config(work.path(), &[]), endpoint);

        proc.start(false).await.unwrap();
        assert!(proc.is_running());
        assert!(proc.pid().is_some());
        assert!(proc.connection().is_connected());
        assert!(proc.profile_dir().is_dir());

        proc.stop(false).await;
        assert!(!proc.is_running());
        assert!(proc.pid().is_none());
        assert!(!proc.connection().is_connected());
        assert!(!proc.profile_dir().exists());
    }

    #[tokio::test]
    async fn test_start_while_running_is_illegal() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut proc = make_process(home.path(), test_config(work.path(), &[]), endpoint);

        proc.start(false).await.unwrap();
        let err = proc.start(false).await.unwrap_err();
        assert!(matches!(err, OfficeError::IllegalState(_)));
        proc.stop(false).await;
    }

    #[tokio::test]
    async fn test_start_timeout_kills_child() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (listener, endpoint) = listening_endpoint();
        drop(listener);
        let mut config = test_config(work.path(), &[]);
        config.process_timeout_ms = 300;
        config.process_retry_interval_ms = 50;
        let mut proc = make_process(home.path(), config, endpoint);

        let err = proc.start(false).await.unwrap_err();
        assert!(matches!(err, OfficeError::StartTimeout { .. }), "{err}");
        assert!(!proc.is_running());
        assert!(!proc.profile_dir().exists());
    }

    #[tokio::test]
    async fn test_exit_during_start() {
        let home = fake_office_home("exit 3");
        let work = tempfile::tempdir().unwrap();
        let (listener, endpoint) = listening_endpoint();
        drop(listener);
        let mut config = test_config(work.path(), &[]);
        config.process_timeout_ms = 5_000;
        config.process_retry_interval_ms = 50;
        let mut proc = make_process(home.path(), config, endpoint);

        let err = proc.start(false).await.unwrap_err();
        assert!(
            matches!(err, OfficeError::ProcessExited { code: Some(3), .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let home = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut proc = make_process(home.path(), test_config(work.path(), &[]), endpoint);

        let err = proc.start(false).await.unwrap_err();
        assert!(matches!(err, OfficeError::Io(_)), "{err}");
        assert!(!proc.profile_dir().exists());
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let home = fake_office_home("trap '' TERM\nwhile :; do sleep 1; done");
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut config = test_config(work.path(), &[]);
        config.process_timeout_ms = 500;
        config.process_retry_interval_ms = 50;
        let mut proc = make_process(home.path(), config, endpoint);

        proc.start(false).await.unwrap();
        let started = std::time::Instant::now();
        proc.stop(false).await;
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn test_keep_alive_leaves_process_running() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut proc = make_process(home.path(), test_config(work.path(), &[]), endpoint);

        proc.start(false).await.unwrap();
        let pid = proc.pid().unwrap();
        proc.stop(true).await;
        assert!(proc.pid().is_none());
        assert!(pid_alive(pid));
        assert!(proc.profile_dir().is_dir());

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    }

    #[tokio::test]
    async fn test_fresh_start_copies_template_and_disables_opengl() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let template = tempfile::tempdir().unwrap();
        fs::create_dir_all(template.path().join("user/config")).unwrap();
        fs::write(template.path().join("user/config/marker.txt"), "template").unwrap();

        let (_listener, endpoint) = listening_endpoint();
        let mut config = test_config(work.path(), &[]);
        config.template_profile_dir = Some(template.path().to_path_buf());
        config.disable_opengl = true;
        let mut proc = make_process(home.path(), config, endpoint);

        // Leftovers from an earlier run are discarded on a fresh start.
        fs::create_dir_all(proc.profile_dir()).unwrap();
        fs::write(proc.profile_dir().join("stale.txt"), "old").unwrap();

        proc.start(false).await.unwrap();
        let profile = proc.profile_dir().to_path_buf();
        assert!(!profile.join("stale.txt").exists());
        assert_eq!(
            fs::read_to_string(profile.join("user/config/marker.txt")).unwrap(),
            "template"
        );
        let xcu = fs::read_to_string(profile.join("user/registrymodifications.xcu")).unwrap();
        assert!(xcu.contains("UseOpenGL"));
        proc.stop(false).await;
    }

    #[tokio::test]
    async fn test_restart_keeps_profile_and_removes_locks() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut proc = make_process(home.path(), test_config(work.path(), &[]), endpoint);

        fs::create_dir_all(proc.profile_dir().join("user")).unwrap();
        fs::write(proc.profile_dir().join(".lock"), "").unwrap();
        fs::write(proc.profile_dir().join("user/.lock"), "").unwrap();
        fs::write(proc.profile_dir().join("user/settings.xcu"), "kept").unwrap();

        proc.start(true).await.unwrap();
        assert!(!proc.profile_dir().join(".lock").exists());
        assert!(!proc.profile_dir().join("user/.lock").exists());
        assert!(proc.profile_dir().join("user/settings.xcu").exists());
        proc.stop(false).await;
    }

    #[tokio::test]
    async fn test_existing_process_fail_action() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut config = test_config(work.path(), &[]);
        config.existing_process_action = ExistingProcessAction::Fail;
        let pm = Arc::new(RecordingProcessManager::with_pid(4_000_000));
        let mut proc = OfficeProcess::new(
            "office-0".into(),
            endpoint,
            home.path().to_path_buf(),
            Arc::new(config),
            pm.clone(),
        );

        let err = proc.start(false).await.unwrap_err();
        assert!(matches!(err, OfficeError::IllegalState(_)), "{err}");
        assert!(pm.killed().is_empty());
        assert!(!proc.is_running());
    }

    #[tokio::test]
    async fn test_existing_process_kill_action() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let pm = Arc::new(RecordingProcessManager::with_pid(4_000_000));
        let mut proc = OfficeProcess::new(
            "office-0".into(),
            endpoint,
            home.path().to_path_buf(),
            Arc::new(test_config(work.path(), &[])),
            pm.clone(),
        );

        proc.start(false).await.unwrap();
        assert_eq!(pm.killed(), vec![4_000_000]);
        assert_ne!(proc.pid(), Some(4_000_000));
        proc.stop(false).await;
    }

    #[tokio::test]
    async fn test_existing_process_connect_action() {
        let home = fake_office_home(SLEEPING_ENGINE);
        let work = tempfile::tempdir().unwrap();
        let (_listener, endpoint) = listening_endpoint();
        let mut existing = std::process::Command::new("/bin/sleep")
            .arg("300")
            .spawn()
            .unwrap();
        let mut config = test_config(work.path(), &[]);
        config.existing_process_action = ExistingProcessAction::Connect;
        config.process_timeout_ms = 1_000;
        let pm = Arc::new(RecordingProcessManager::with_pid(existing.id()));
        let mut proc = OfficeProcess::new(
            "office-0".into(),
            endpoint,
            home.path().to_path_buf(),
            Arc::new(config),
            pm.clone(),
        );

        proc.start(false).await.unwrap();
        assert_eq!(proc.pid(), Some(existing.id()));
        assert!(proc.is_running());

        proc.stop(false).await;
        let status = existing.wait().unwrap();
        assert!(!status.success());
    }
}
