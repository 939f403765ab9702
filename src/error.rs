// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("nix error: {0}")]
    Nix(#[from] nix::Error),
    #[error("failed to parse yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("configuration error: {0}")]
    Config(String),
    /// The supervised process sent something that is not a readiness message
    #[error("unexpected readiness message: {0:?}")]
    Protocol(String),
    #[error("timed out after {0:?} waiting for the process to become ready")]
    Timeout(Duration),
    /// The supervised process reported a failed startup, the text is kept verbatim
    #[error("{0}")]
    StartupFailed(String),
    /// An ordering bug in the supervisor itself, never a user mistake
    #[error("internal error: {0}")]
    Internal(&'static str),
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Str(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.0, ErrorKind::Timeout(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self.0, ErrorKind::Internal(_))
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::Str(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::Msg(err))
    }
}
