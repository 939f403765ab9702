// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The readiness channel
//!
//! A supervised process announces the progress of its startup by sending short ASCII datagrams to a
//!  socket bound by the supervisor before the process is spawned. Two messages are understood:
//!
//! * `READY=1` - startup finished
//! * `STATUS=<text>` - informational, unless `<text>` begins with `Failed`, in which case startup failed

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use tokio::net::UnixDatagram;

use crate::error::{Error, ErrorKind};

/// Size of the receive buffer, a message is expected to fit in one datagram
pub const RECV_BUF_SIZE: usize = 300;

const READY: &str = "READY=1";
const STATUS_PREFIX: &str = "STATUS=";
const FAILED_PREFIX: &str = "Failed";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadinessMessage {
    Ready,
    Status(String),
}

impl ReadinessMessage {
    /// Parses one datagram, trailing NUL padding and whitespace are ignored
    pub fn parse(datagram: &[u8]) -> Result<Self, Error> {
        let text = String::from_utf8_lossy(datagram);
        let text = text.trim_end_matches('\0').trim();

        if text == READY {
            return Ok(ReadinessMessage::Ready);
        }

        if let Some(status) = text.strip_prefix(STATUS_PREFIX) {
            return Ok(ReadinessMessage::Status(status.to_string()));
        }

        Err(ErrorKind::Protocol(text.to_string()).into())
    }

    /// Returns the status text if this status reports a failed startup
    pub fn failure(&self) -> Option<&str> {
        match self {
            ReadinessMessage::Status(text) if text.starts_with(FAILED_PREFIX) => Some(text),
            _ => None,
        }
    }
}

/// The receiving end of the readiness channel
///
/// The socket file is bound on construction and left on disk when dropped, it belongs to the
///  instance's run directory and is removed by `clean`.
#[derive(Debug)]
pub struct NotifyListener {
    datagram: UnixDatagram,
    path: PathBuf,
}

impl NotifyListener {
    /// Binds to `path`, replacing a socket file left over from a previous run
    pub fn bind(path: &Path) -> Result<Self, Error> {
        match fs::remove_file(path) {
            Ok(()) => debug!("removed stale notify socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => (),
            Err(e) => {
                return Err(format!(
                    "failed to remove stale notify socket {}: {}",
                    path.display(),
                    e
                )
                .into())
            }
        }

        let datagram = UnixDatagram::bind(path).map_err(|e| {
            Error::from(format!(
                "failed to bind notify socket {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Self {
            datagram,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits at most `deadline` for one message
    ///
    /// `Ok(None)` means the deadline expired without a datagram, which is not an error.
    pub async fn recv_timeout(
        &self,
        deadline: Duration,
    ) -> Result<Option<ReadinessMessage>, Error> {
        let mut buf = [0u8; RECV_BUF_SIZE];

        let len = match tokio::time::timeout(deadline, self.datagram.recv(&mut buf)).await {
            Err(_elapsed) => return Ok(None),
            Ok(received) => received.map_err(|e| {
                Error::from(format!(
                    "failed to read from notify socket {}: {}",
                    self.path.display(),
                    e
                ))
            })?,
        };

        ReadinessMessage::parse(&buf[..len]).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ready() {
        assert_eq!(
            ReadinessMessage::parse(b"READY=1").unwrap(),
            ReadinessMessage::Ready
        );
        assert_eq!(
            ReadinessMessage::parse(b"READY=1\0\0\0").unwrap(),
            ReadinessMessage::Ready
        );
    }

    #[test]
    fn test_parse_status() {
        let msg = ReadinessMessage::parse(b"STATUS=Loading snapshot").unwrap();
        assert_eq!(msg, ReadinessMessage::Status("Loading snapshot".to_string()));
        assert!(msg.failure().is_none());

        let msg = ReadinessMessage::parse(b"STATUS=Failed: disk full").unwrap();
        assert_eq!(msg.failure(), Some("Failed: disk full"));
    }

    #[test]
    fn test_parse_garbage() {
        let err = ReadinessMessage::parse(b"READY=0").unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Protocol(text) if text == "READY=0"));

        assert!(ReadinessMessage::parse(b"").is_err());
    }

    #[tokio::test]
    async fn test_recv_deadline_and_message() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inst.notify");

        // a stale file must not prevent binding
        fs::write(&path, b"").unwrap();
        let listener = NotifyListener::bind(&path).unwrap();

        let received = listener
            .recv_timeout(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(received.is_none());

        let sender = std::os::unix::net::UnixDatagram::unbound().unwrap();
        sender.send_to(b"STATUS=Failed: disk full", &path).unwrap();

        let received = listener
            .recv_timeout(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(
            received,
            Some(ReadinessMessage::Status("Failed: disk full".to_string()))
        );
    }
}
