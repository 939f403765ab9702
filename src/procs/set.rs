// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{info, log, Level};

use crate::error::{Error, ErrorKind};
use crate::paths::RunContext;
use crate::procs::logger::Palette;
use crate::procs::probe::ProcessProbe;
use crate::procs::{Outcome, Process, ProcessResult, ProcessState};

/// Delay between consecutive foreground launches, keeps their first log lines apart
pub const STAGGER: Duration = Duration::from_millis(200);

/// The processes targeted by one orchestration call, in declaration order
#[derive(Debug, Default)]
pub struct ProcessSet {
    processes: Vec<Process>,
    palette: Palette,
}

impl ProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stateboard, if requested, followed by every instance of the context
    pub fn from_context(ctx: &RunContext, probe: Arc<dyn ProcessProbe>) -> Result<Self, Error> {
        let instances = ctx.collect_instances()?;
        let mut set = Self::new();

        if ctx.manages_stateboard() {
            set.push(Process::stateboard(ctx, Arc::clone(&probe)))?;
        }

        for instance in &instances {
            set.push(Process::instance(ctx, instance, Arc::clone(&probe)))?;
        }

        Ok(set)
    }

    /// Adds a process, assigning it the next log color
    pub fn push(&mut self, mut process: Process) -> Result<(), Error> {
        if self.processes.iter().any(|p| p.id() == process.id()) {
            return Err(
                ErrorKind::Config(format!("process {} specified more than once", process.id()))
                    .into(),
            );
        }

        process.set_color(self.palette.next_color());
        self.processes.push(process);
        Ok(())
    }

    pub fn processes(&self) -> &[Process] {
        &self.processes
    }

    pub fn get(&self, id: &str) -> Option<&Process> {
        self.processes.iter().find(|p| p.id() == id)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Starts every process concurrently, results are returned in the order they complete
    ///
    /// In the background each start is followed by a wait for readiness. In the foreground each
    ///  start is followed by a wait for the child to exit, and launches are spaced by `STAGGER`.
    pub async fn start(&mut self, daemonize: bool, timeout: Duration) -> Vec<ProcessResult> {
        let mut results = Vec::with_capacity(self.processes.len());
        let delays = launch_delays(self.processes.iter().map(Process::state), daemonize);

        let mut pending: FuturesUnordered<_> = self
            .processes
            .iter_mut()
            .zip(delays)
            .map(|(process, delay)| start_one(process, daemonize, timeout, delay))
            .collect();

        while let Some(result) = pending.next().await {
            log_result(&result);
            results.push(result);
        }

        results
    }

    /// Sends SIGTERM (SIGKILL with `force`) to every running process, in declaration order
    pub fn stop(&mut self, force: bool) -> Vec<ProcessResult> {
        let mut results = Vec::with_capacity(self.processes.len());

        for process in self.processes.iter_mut() {
            let result = match process.state().clone() {
                ProcessState::Error(cause) => ProcessResult::failed(process.id(), cause),
                ProcessState::Stopped | ProcessState::NotStarted => {
                    ProcessResult::skipped(process.id(), "not running")
                }
                ProcessState::Running => match process.stop(force) {
                    Ok(()) => ProcessResult::ok(process.id()),
                    Err(e) => ProcessResult::failed(process.id(), e),
                },
            };

            log_result(&result);
            results.push(result);
        }

        results
    }

    /// Logs a status line for every process
    ///
    /// Every process is reported, the call fails afterwards if any of them is in the error state.
    pub fn status(&mut self) -> Result<(), Error> {
        let mut errors = 0;

        for process in self.processes.iter_mut() {
            let state = process.refresh_state();
            if let ProcessState::Error(_) = state {
                errors += 1;
            }

            info!("{}: {}", process.id(), process.state());
        }

        if errors > 0 {
            return Err(format!("{} of {} processes are in error state", errors, self.len()).into());
        }

        Ok(())
    }

    /// Removes the ephemeral files of every process that is not running
    pub fn clean(&mut self) -> Vec<ProcessResult> {
        let mut results = Vec::with_capacity(self.processes.len());

        for process in self.processes.iter() {
            let result = if process.is_running() {
                ProcessResult::failed(process.id(), "process is running, stop it first")
            } else {
                process.clean()
            };

            log_result(&result);
            results.push(result);
        }

        results
    }

    /// Tails the log of every process concurrently
    pub async fn tail_logs(&self, follow: bool, lines: usize) -> Vec<ProcessResult> {
        let tails = self.processes.iter().map(|process| async move {
            match process.tail_log(follow, lines).await {
                Ok(()) => ProcessResult::ok(process.id()),
                Err(e) => ProcessResult::failed(process.id(), e),
            }
        });

        let results = join_all(tails).await;
        for result in results.iter().filter(|r| r.outcome == Outcome::Failed) {
            log_result(result);
        }

        results
    }
}

/// Delay before each launch, only processes that will actually be launched are spaced apart
fn launch_delays<'a>(
    states: impl Iterator<Item = &'a ProcessState>,
    daemonize: bool,
) -> Vec<Duration> {
    let mut launched = 0;
    states
        .map(|state| {
            if daemonize {
                return Duration::from_secs(0);
            }

            let delay = STAGGER * launched;
            if let ProcessState::NotStarted | ProcessState::Stopped = state {
                launched += 1;
            }
            delay
        })
        .collect()
}

async fn start_one(
    process: &mut Process,
    daemonize: bool,
    timeout: Duration,
    delay: Duration,
) -> ProcessResult {
    match process.state() {
        ProcessState::Error(cause) => return ProcessResult::failed(process.id(), cause.clone()),
        ProcessState::Running => return ProcessResult::skipped(process.id(), "already running"),
        ProcessState::NotStarted | ProcessState::Stopped => (),
    }

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    if let Err(e) = process.start(daemonize).await {
        return ProcessResult::failed(process.id(), e);
    }

    if daemonize {
        // wait_ready kills the process itself on timeout
        return match process.wait_ready(timeout).await {
            Ok(()) => ProcessResult::ok(process.id()),
            Err(e) => ProcessResult::failed(process.id(), e),
        };
    }

    match process.wait().await {
        Ok(status) if status.success() => ProcessResult::exited(process.id(), None),
        Ok(status) => ProcessResult::exited(
            process.id(),
            Some(format!("exited with {}", status).into()),
        ),
        Err(e) => ProcessResult::exited(process.id(), Some(e)),
    }
}

fn log_level(result: &ProcessResult) -> Level {
    match result.outcome {
        Outcome::Ok => Level::Info,
        Outcome::Exited if result.error.is_none() => Level::Info,
        Outcome::Skipped => Level::Warn,
        Outcome::Exited | Outcome::Failed => Level::Error,
    }
}

/// Logs a result as it arrives
fn log_result(result: &ProcessResult) {
    log!(log_level(result), "{}", result);
}

/// Fails if any result failed, naming the failed processes
pub fn aggregate(results: &[ProcessResult], action: &str) -> Result<(), Error> {
    let failed: Vec<&str> = results
        .iter()
        .filter(|r| r.outcome == Outcome::Failed)
        .map(|r| r.id.as_str())
        .collect();

    if !failed.is_empty() {
        return Err(format!("failed to {} {}", action, failed.join(", ")).into());
    }

    Ok(())
}
