// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Supervision of the local processes of a clustered database application
//!
//! Every instance of an application, and its optional stateboard, runs as one OS process. The
//!  processes are tracked through pid files, a background start waits for the process to report
//!  readiness over a datagram socket (see `notify`), and their output is shown with a colored
//!  per-process prefix.

pub mod commands;
pub mod config;
mod error;
pub mod notify;
pub mod paths;
pub mod procs;

pub use error::{Error, ErrorKind};
