// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use nix::unistd::Pid;

use cinnabar::paths::RunContext;
use cinnabar::procs::{OsProbe, ProcessProbe};

pub const APP: &str = "myapp";

/// Keeps running long enough for any test, under the name `sh`
pub const SLEEPER: &str = "sleep 5\n";

#[derive(Clone, Copy, Debug)]
pub enum Fake {
    Alive(&'static str),
    Gone,
}

/// Answers from a table for the listed pids and from the real process table for all others
#[derive(Debug, Default)]
pub struct FakeProbe {
    table: HashMap<libc::pid_t, Fake>,
    signals: Mutex<Vec<(libc::pid_t, Signal)>>,
}

impl FakeProbe {
    pub fn new(entries: &[(libc::pid_t, Fake)]) -> Self {
        Self {
            table: entries.iter().cloned().collect(),
            signals: Mutex::new(Vec::new()),
        }
    }

    pub fn signals(&self) -> Vec<(libc::pid_t, Signal)> {
        self.signals.lock().unwrap().clone()
    }
}

impl ProcessProbe for FakeProbe {
    fn binary_name(&self, pid: Pid) -> io::Result<Option<String>> {
        match self.table.get(&pid.as_raw()) {
            Some(Fake::Alive(name)) => Ok(Some(name.to_string())),
            Some(Fake::Gone) => Ok(None),
            None => OsProbe.binary_name(pid),
        }
    }

    fn is_alive(&self, pid: Pid) -> bool {
        match self.table.get(&pid.as_raw()) {
            Some(Fake::Alive(_)) => true,
            Some(Fake::Gone) => false,
            None => OsProbe.is_alive(pid),
        }
    }

    fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        if self.table.contains_key(&pid.as_raw()) {
            self.signals.lock().unwrap().push((pid.as_raw(), signal));
            return Ok(());
        }

        OsProbe.signal(pid, signal)
    }
}

/// A context for `myapp` inside `dir`, running `/bin/sh <entrypoint>`
pub fn context(dir: &Path) -> RunContext {
    let app_dir = dir.join(APP);
    std::fs::create_dir_all(&app_dir).unwrap();

    let mut ctx = RunContext::new(&app_dir);
    ctx.run_dir = dir.join("run");
    ctx.binary = PathBuf::from("/bin/sh");
    ctx.timeout = Duration::from_secs(10);
    ctx
}

pub fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
}

pub fn write_pid(ctx: &RunContext, id: &str, pid: libc::pid_t) {
    std::fs::create_dir_all(&ctx.run_dir).unwrap();
    std::fs::write(ctx.run_dir.join(format!("{}.pid", id)), pid.to_string()).unwrap();
}

/// Plays the supervised process's side of the readiness channel
///
/// Sends `msg` as soon as something is bound at `path`, gives up after a few seconds.
pub fn notify_when_bound(path: PathBuf, msg: &'static [u8]) -> tokio::task::JoinHandle<bool> {
    tokio::spawn(async move {
        let started = Instant::now();
        while started.elapsed() < Duration::from_secs(5) {
            if path.exists() {
                let sender = UnixDatagram::unbound().unwrap();
                if sender.send_to(msg, &path).is_ok() {
                    return true;
                }
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        false
    })
}
