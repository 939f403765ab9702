// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::fmt::Debug;
use std::io;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

/// Access to the host's process table
///
/// A PID read from a pid file is only trusted as "our" process after the process exists, carries
///  the expected executable name and accepts signal 0.
pub trait ProcessProbe: Debug + Send + Sync {
    /// The executable name of `pid`, `None` if there is no such process
    fn binary_name(&self, pid: Pid) -> io::Result<Option<String>>;

    /// Delivers signal 0, which has no effect on the target
    fn is_alive(&self, pid: Pid) -> bool;

    fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()>;
}

/// The real process table
#[derive(Clone, Copy, Debug, Default)]
pub struct OsProbe;

impl ProcessProbe for OsProbe {
    fn binary_name(&self, pid: Pid) -> io::Result<Option<String>> {
        os_binary_name(pid)
    }

    fn is_alive(&self, pid: Pid) -> bool {
        kill(pid, None).is_ok()
    }

    fn signal(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        kill(pid, signal)
    }
}

#[cfg(target_os = "linux")]
fn os_binary_name(pid: Pid) -> io::Result<Option<String>> {
    match std::fs::read_to_string(format!("/proc/{}/comm", pid)) {
        Ok(comm) => Ok(Some(comm.trim_end().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(not(target_os = "linux"))]
fn os_binary_name(pid: Pid) -> io::Result<Option<String>> {
    let output = std::process::Command::new("ps")
        .args(&["-o", "comm=", "-p"])
        .arg(pid.to_string())
        .output()?;

    // ps exits non-zero when the pid is unknown
    if !output.status.success() {
        return Ok(None);
    }

    let comm = String::from_utf8_lossy(&output.stdout);
    let comm = comm.trim();
    if comm.is_empty() {
        return Ok(None);
    }

    let name = std::path::Path::new(comm)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| comm.to_string());
    Ok(Some(name))
}
