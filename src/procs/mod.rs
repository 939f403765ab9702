// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

pub mod logger;
pub mod probe;
mod process;
mod set;
pub mod tail;

pub use logger::{LogPresenter, Palette};
pub use probe::{OsProbe, ProcessProbe};
pub use process::{Process, ProcessState, READ_DEADLINE};
pub use set::{aggregate, ProcessSet, STAGGER};

use std::fmt;

use crate::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Skipped,
    Failed,
    /// A foreground process terminated
    Exited,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Ok => "OK",
            Outcome::Skipped => "SKIPPED",
            Outcome::Failed => "FAILED",
            Outcome::Exited => "EXITED",
        };

        f.write_str(s)
    }
}

/// The outcome of one operation on one process of a set
#[derive(Debug)]
pub struct ProcessResult {
    pub id: String,
    pub outcome: Outcome,
    pub error: Option<Error>,
}

impl ProcessResult {
    pub fn new(id: &str, outcome: Outcome, error: Option<Error>) -> Self {
        Self {
            id: id.to_string(),
            outcome,
            error,
        }
    }

    pub fn ok(id: &str) -> Self {
        Self::new(id, Outcome::Ok, None)
    }

    pub fn skipped(id: &str, reason: impl Into<Error>) -> Self {
        Self::new(id, Outcome::Skipped, Some(reason.into()))
    }

    pub fn failed(id: &str, error: impl Into<Error>) -> Self {
        Self::new(id, Outcome::Failed, Some(error.into()))
    }

    pub fn exited(id: &str, error: Option<Error>) -> Self {
        Self::new(id, Outcome::Exited, error)
    }
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{}: {}. {}", self.id, self.outcome, error),
            None => write!(f, "{}: {}", self.id, self.outcome),
        }
    }
}
