// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The `start`, `stop`, `status`, `clean` and `log` operations over the processes of one application

use std::sync::Arc;

use log::info;

use crate::paths::RunContext;
use crate::procs::{aggregate, OsProbe, ProcessSet};
use crate::Error;

fn process_set(ctx: &RunContext) -> Result<ProcessSet, Error> {
    ProcessSet::from_context(ctx, Arc::new(OsProbe))
}

/// Starts the selected processes
///
/// In the foreground this only returns once every process has exited, and that is always reported
///  as an error: foreground mode is not expected to terminate normally.
pub async fn start(ctx: &RunContext) -> Result<(), Error> {
    let mut set = process_set(ctx)?;

    if ctx.daemonize {
        info!("Starting {} processes in background", set.len());
    } else {
        info!("Starting {} processes", set.len());
    }

    let results = set.start(ctx.daemonize, ctx.timeout).await;

    if !ctx.daemonize {
        return Err("all instances exited".into());
    }

    aggregate(&results, "start")
}

pub fn stop(ctx: &RunContext) -> Result<(), Error> {
    let mut set = process_set(ctx)?;
    let results = set.stop(ctx.force);
    aggregate(&results, "stop")
}

pub fn status(ctx: &RunContext) -> Result<(), Error> {
    process_set(ctx)?.status()
}

pub fn clean(ctx: &RunContext) -> Result<(), Error> {
    let mut set = process_set(ctx)?;
    let results = set.clean();
    aggregate(&results, "clean")
}

/// Tails the logs, with `follow` until interrupted
pub async fn log(ctx: &RunContext) -> Result<(), Error> {
    let set = process_set(ctx)?;

    let results = tokio::select! {
        results = set.tail_logs(ctx.follow, ctx.lines) => results,
        interrupted = tokio::signal::ctrl_c() => {
            interrupted?;
            return Ok(());
        }
    };

    aggregate(&results, "show logs of")
}
