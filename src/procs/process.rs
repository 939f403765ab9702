// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Color;
use log::{debug, warn};
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};

use crate::error::{Error, ErrorKind};
use crate::notify::{NotifyListener, ReadinessMessage};
use crate::paths::{self, ProcessPaths, RunContext};
use crate::procs::logger::LogPresenter;
use crate::procs::probe::ProcessProbe;
use crate::procs::tail;
use crate::procs::{Outcome, ProcessResult};

/// Deadline of a single read from the notify socket while waiting for readiness
pub const READ_DEADLINE: Duration = Duration::from_millis(500);

/// Linux truncates the executable name reported for a pid to this many bytes
const COMM_LEN: usize = 15;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Stopped,
    Error(String),
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::NotStarted => f.write_str("NOT STARTED"),
            ProcessState::Running => f.write_str("RUNNING"),
            ProcessState::Stopped => f.write_str("STOPPED"),
            ProcessState::Error(cause) => write!(f, "ERROR. {}", cause),
        }
    }
}

/// One supervised process, i.e. an instance or the stateboard
///
/// The paths are fixed on construction, only the state, the pid and the runtime handles change.
///  State is derived from the pid file and the process table, never remembered across runs.
#[derive(Debug)]
pub struct Process {
    id: String,
    paths: ProcessPaths,
    binary: PathBuf,
    binary_name: String,
    env: Vec<(String, String)>,
    color: Color,
    probe: Arc<dyn ProcessProbe>,

    state: ProcessState,
    pid: Option<Pid>,
    /// Set only while the pid is verified to be our live process
    os_process: Option<Pid>,
    child: Option<Child>,
    notify: Option<NotifyListener>,
}

impl Process {
    pub fn new(
        id: String,
        paths: ProcessPaths,
        binary: &Path,
        env: Vec<(String, String)>,
        probe: Arc<dyn ProcessProbe>,
    ) -> Self {
        let binary_name = binary
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| binary.to_string_lossy().into_owned());

        let mut process = Self {
            id,
            paths,
            binary: binary.to_path_buf(),
            binary_name,
            env,
            color: Color::White,
            probe,
            state: ProcessState::NotStarted,
            pid: None,
            os_process: None,
            child: None,
            notify: None,
        };

        process.refresh_state();
        process
    }

    /// The process for `instance` of the context's application
    pub fn instance(ctx: &RunContext, instance: &str, probe: Arc<dyn ProcessProbe>) -> Self {
        let id = ctx.instance_id(instance);
        let paths = ProcessPaths::new(ctx, &id, &ctx.entrypoint);

        let mut env = vec![(paths::ENV_APP_NAME.to_string(), ctx.app_name.clone())];
        env.push((paths::ENV_INSTANCE_NAME.to_string(), instance.to_string()));
        env.extend(common_env(ctx, &paths));

        Self::new(id, paths, &ctx.binary, env, probe)
    }

    pub fn stateboard(ctx: &RunContext, probe: Arc<dyn ProcessProbe>) -> Self {
        let id = ctx.stateboard_id();
        let paths = ProcessPaths::new(ctx, &id, &ctx.stateboard_entrypoint);

        let mut env = vec![(paths::ENV_APP_NAME.to_string(), id.clone())];
        env.extend(common_env(ctx, &paths));

        Self::new(id, paths, &ctx.binary, env, probe)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn paths(&self) -> &ProcessPaths {
        &self.paths
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn set_color(&mut self, color: Color) {
        self.color = color;
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    /// Recomputes the state from the pid file and the process table
    pub fn refresh_state(&mut self) -> &ProcessState {
        self.os_process = None;
        self.state = match self.read_pid() {
            Ok(None) => ProcessState::NotStarted,
            Ok(Some(pid)) => {
                self.pid = Some(pid);
                self.probe_state(pid)
            }
            Err(e) => ProcessState::Error(e.to_string()),
        };

        &self.state
    }

    fn read_pid(&self) -> Result<Option<Pid>, Error> {
        let path = &self.paths.pid_file;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(format!("failed to read pid file {}: {}", path.display(), e).into())
            }
        };

        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        match content.parse::<libc::pid_t>() {
            Ok(pid) if pid > 0 => Ok(Some(Pid::from_raw(pid))),
            _ => Err(ErrorKind::Config(format!(
                "pid file {} is malformed: {:?}",
                path.display(),
                content
            ))
            .into()),
        }
    }

    fn probe_state(&mut self, pid: Pid) -> ProcessState {
        let name = match self.probe.binary_name(pid) {
            Ok(Some(name)) => name,
            Ok(None) => return ProcessState::Stopped,
            Err(e) => {
                return ProcessState::Error(format!("failed to inspect process {}: {}", pid, e))
            }
        };

        if !comm_matches(&name, &self.binary_name) {
            return ProcessState::Error(format!(
                "process {} is {:?}, expected {:?}",
                pid, name, self.binary_name
            ));
        }

        if !self.probe.is_alive(pid) {
            return ProcessState::Stopped;
        }

        self.os_process = Some(pid);
        ProcessState::Running
    }

    /// Spawns the process, without waiting for it to become ready
    ///
    /// In the background the output goes to the log file and the notify socket is bound before the
    ///  spawn. In the foreground the output goes to stdout through a `LogPresenter`.
    pub async fn start(&mut self, daemonize: bool) -> Result<(), Error> {
        if !self.paths.entrypoint.exists() {
            return Err(ErrorKind::Config(format!(
                "entrypoint {} does not exist",
                self.paths.entrypoint.display()
            ))
            .into());
        }

        if let Some(run_dir) = self.paths.run_dir() {
            create_dir(run_dir)?;
        }
        create_dir(&self.paths.work_dir)?;

        let mut command = Command::new(&self.binary);
        command
            .arg(&self.paths.entrypoint)
            .current_dir(&self.paths.work_dir)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null());

        let mut notify = None;
        if daemonize {
            let listener = NotifyListener::bind(&self.paths.notify_sock)?;
            command.env(paths::ENV_NOTIFY_SOCKET, listener.path());
            notify = Some(listener);

            create_dir(&self.paths.log_dir)?;
            let log = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.paths.log_file)
                .map_err(|e| {
                    Error::from(format!(
                        "failed to open log file {}: {}",
                        self.paths.log_file.display(),
                        e
                    ))
                })?;

            command
                .stdout(Stdio::from(log.try_clone()?))
                .stderr(Stdio::from(log))
                .process_group(0);
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut pid_file = File::create(&self.paths.pid_file).map_err(|e| {
            Error::from(format!(
                "failed to create pid file {}: {}",
                self.paths.pid_file.display(),
                e
            ))
        })?;

        let mut child = command.spawn().map_err(|e| {
            Error::from(format!(
                "failed to spawn {} {}: {}",
                self.binary.display(),
                self.paths.entrypoint.display(),
                e
            ))
        })?;

        let pid = child
            .id()
            .map(|pid| Pid::from_raw(pid as libc::pid_t))
            .ok_or(ErrorKind::Internal("spawned child has no pid"))?;

        if let Err(e) = write!(pid_file, "{}", pid) {
            warn!(
                "{}: failed to write pid {} to {}: {}",
                self.id,
                pid,
                self.paths.pid_file.display(),
                e
            );
        }

        if !daemonize {
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(present(stdout, self.presenter()));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(present(stderr, self.presenter()));
            }
        }

        debug!("{}: started with pid {}", self.id, pid);
        self.pid = Some(pid);
        self.os_process = Some(pid);
        self.state = ProcessState::Running;
        self.child = Some(child);
        self.notify = notify;

        Ok(())
    }

    /// Waits for `READY=1` on the notify socket, zero `timeout` waits forever
    ///
    /// On timeout the process is killed. The notify socket is closed on every return.
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<(), Error> {
        let notify = self.notify.take().ok_or(ErrorKind::Internal(
            "waiting for readiness of a process not started in the background",
        ))?;

        let started = Instant::now();
        loop {
            if !timeout.is_zero() && started.elapsed() > timeout {
                if let Err(e) = self.stop(true) {
                    warn!("{}: failed to kill after timeout: {}", self.id, e);
                }
                return Err(ErrorKind::Timeout(timeout).into());
            }

            // a dead child stays in the process table until reaped
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.state = ProcessState::Stopped;
                    self.os_process = None;
                    return Err(ErrorKind::StartupFailed(format!(
                        "process exited during startup: {}",
                        status
                    ))
                    .into());
                }
            }

            match self.refresh_state() {
                ProcessState::Running => (),
                state => return Err(format!("process is not running: {}", state).into()),
            }

            let msg = match notify.recv_timeout(READ_DEADLINE).await? {
                Some(msg) => msg,
                None => continue,
            };

            if let Some(failure) = msg.failure() {
                return Err(ErrorKind::StartupFailed(failure.to_string()).into());
            }

            match msg {
                ReadinessMessage::Ready => return Ok(()),
                ReadinessMessage::Status(status) => debug!("{}: {}", self.id, status),
            }
        }
    }

    /// Waits for a child spawned by this process to exit
    pub async fn wait(&mut self) -> Result<ExitStatus, Error> {
        let child = self
            .child
            .as_mut()
            .ok_or(ErrorKind::Internal("waiting on a process that was not spawned"))?;

        let status = child.wait().await?;
        self.os_process = None;
        self.state = ProcessState::Stopped;

        Ok(status)
    }

    /// Sends SIGTERM, or SIGKILL with `force`
    pub fn stop(&mut self, force: bool) -> Result<(), Error> {
        let pid = self
            .os_process
            .ok_or(ErrorKind::Internal("signaling a process that is not running"))?;
        let signal = if force {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };

        self.probe.signal(pid, signal).map_err(|e| {
            Error::from(format!(
                "failed to send {} to {}: {}",
                signal.as_str(),
                pid,
                e
            ))
        })?;

        debug!("{}: sent {} to {}", self.id, signal.as_str(), pid);
        Ok(())
    }

    /// Writes the last `lines` lines of the log to stdout, with `follow` keeps writing new lines
    pub async fn tail_log(&self, follow: bool, lines: usize) -> Result<(), Error> {
        let log_file = &self.paths.log_file;
        if !log_file.exists() {
            return Err(format!("log file {} does not exist", log_file.display()).into());
        }

        let mut presenter = self.presenter();
        tail::tail(log_file, lines, follow, &mut presenter).await
    }

    /// Removes the log file, the working directory and both sockets
    ///
    /// The pid file is kept, a later start or stop needs it to recognize a process still running.
    pub fn clean(&self) -> ProcessResult {
        let artifacts = [
            (&self.paths.log_file, false),
            (&self.paths.work_dir, true),
            (&self.paths.console_sock, false),
            (&self.paths.notify_sock, false),
        ];

        let mut existed = false;
        let mut errors = Vec::new();

        for (path, is_dir) in artifacts.iter() {
            match fs::symlink_metadata(path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{}: {} does not exist", self.id, path.display());
                    continue;
                }
                Err(e) => {
                    errors.push(format!("failed to inspect {}: {}", path.display(), e));
                    continue;
                }
                Ok(_) => existed = true,
            }

            let removed = if *is_dir {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };

            if let Err(e) = removed {
                errors.push(format!("failed to remove {}: {}", path.display(), e));
            }
        }

        if !errors.is_empty() {
            return ProcessResult::failed(&self.id, errors.join(", "));
        }

        if !existed {
            return ProcessResult::new(&self.id, Outcome::Skipped, Some("nothing to clean".into()));
        }

        ProcessResult::ok(&self.id)
    }

    fn presenter(&self) -> LogPresenter<io::Stdout> {
        LogPresenter::new(&self.id, self.color, io::stdout())
    }
}

fn common_env(ctx: &RunContext, paths: &ProcessPaths) -> Vec<(String, String)> {
    let display = |path: &Path| path.to_string_lossy().into_owned();

    vec![
        (paths::ENV_CFG.to_string(), display(&ctx.cfg)),
        (paths::ENV_CONSOLE_SOCK.to_string(), display(&paths.console_sock)),
        (paths::ENV_PID_FILE.to_string(), display(&paths.pid_file)),
        (paths::ENV_WORKDIR.to_string(), display(&paths.work_dir)),
    ]
}

fn comm_matches(name: &str, expected: &str) -> bool {
    name == expected || (name.len() == COMM_LEN && expected.starts_with(name))
}

fn create_dir(path: &Path) -> Result<(), Error> {
    fs::create_dir_all(path)
        .map_err(|e| Error::from(format!("failed to create {}: {}", path.display(), e)))
}

/// Pumps `reader` through `presenter` until end of stream, handing the presenter back
async fn present<R, W>(mut reader: R, mut presenter: LogPresenter<W>) -> LogPresenter<W>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut buf = [0u8; 4096];
    loop {
        let read = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                warn!("failed to read process output: {}", e);
                break;
            }
        };

        if let Err(e) = presenter.write_all(&buf[..read]) {
            warn!("failed to write process output: {}", e);
            break;
        }
    }

    if let Err(e) = presenter.finish() {
        warn!("failed to write process output: {}", e);
    }

    presenter
}
