// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Deterministic filesystem layout of the supervised processes

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use crate::error::{Error, ErrorKind};

pub const DEFAULT_BINARY: &str = "tarantool";
pub const DEFAULT_ENTRYPOINT: &str = "init.lua";
pub const DEFAULT_STATEBOARD_ENTRYPOINT: &str = "stateboard.init.lua";
pub const DEFAULT_CFG: &str = "instances.yml";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_LOG_LINES: usize = 15;

pub const ENV_APP_NAME: &str = "TARANTOOL_APP_NAME";
pub const ENV_INSTANCE_NAME: &str = "TARANTOOL_INSTANCE_NAME";
pub const ENV_CFG: &str = "TARANTOOL_CFG";
pub const ENV_CONSOLE_SOCK: &str = "TARANTOOL_CONSOLE_SOCK";
pub const ENV_PID_FILE: &str = "TARANTOOL_PID_FILE";
pub const ENV_WORKDIR: &str = "TARANTOOL_WORKDIR";
pub const ENV_NOTIFY_SOCKET: &str = "NOTIFY_SOCKET";

/// Everything one orchestration call needs to know
#[derive(Clone, Debug)]
pub struct RunContext {
    pub app_name: String,
    pub app_dir: PathBuf,
    /// Instance names, an empty list means "all instances from the cfg file"
    pub instances: Vec<String>,
    pub with_stateboard: bool,
    pub stateboard_only: bool,

    pub run_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub cfg: PathBuf,

    /// Interpreter the entrypoints are run with
    pub binary: PathBuf,
    pub entrypoint: PathBuf,
    pub stateboard_entrypoint: PathBuf,

    pub daemonize: bool,
    /// Readiness timeout, zero waits forever
    pub timeout: Duration,
    pub force: bool,
    pub follow: bool,
    pub lines: usize,
}

impl RunContext {
    /// A context with every path defaulted relative to `app_dir`
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        let app_dir = app_dir.into();
        let app_name = app_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = app_dir.join("tmp");

        Self {
            app_name,
            instances: Vec::new(),
            with_stateboard: false,
            stateboard_only: false,
            run_dir: tmp.join("run"),
            data_dir: tmp.join("data"),
            log_dir: tmp.join("log"),
            cfg: app_dir.join(DEFAULT_CFG),
            binary: PathBuf::from(DEFAULT_BINARY),
            entrypoint: app_dir.join(DEFAULT_ENTRYPOINT),
            stateboard_entrypoint: app_dir.join(DEFAULT_STATEBOARD_ENTRYPOINT),
            daemonize: false,
            timeout: DEFAULT_TIMEOUT,
            force: false,
            follow: false,
            lines: DEFAULT_LOG_LINES,
            app_dir,
        }
    }

    pub fn instance_id(&self, instance: &str) -> String {
        format!("{}.{}", self.app_name, instance)
    }

    pub fn stateboard_id(&self) -> String {
        format!("{}-stateboard", self.app_name)
    }

    /// Resolves the instance names to operate on
    ///
    /// Explicit names are validated, otherwise the names are read from the cfg file. The result
    ///  is empty when only the stateboard was requested.
    pub fn collect_instances(&self) -> Result<Vec<String>, Error> {
        if self.stateboard_only {
            return Ok(Vec::new());
        }

        let instances = if self.instances.is_empty() {
            instances_from_cfg(&self.cfg, &self.app_name)?
        } else {
            for name in &self.instances {
                validate_instance_name(name)?;
            }
            self.instances.clone()
        };

        if instances.is_empty() && !self.with_stateboard {
            return Err(ErrorKind::Config(format!(
                "no instances specified, and none found for {} in {}",
                self.app_name,
                self.cfg.display()
            ))
            .into());
        }

        Ok(instances)
    }

    pub fn manages_stateboard(&self) -> bool {
        self.with_stateboard || self.stateboard_only
    }
}

/// Precomputed addressing of one supervised process
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessPaths {
    pub entrypoint: PathBuf,
    pub work_dir: PathBuf,
    pub pid_file: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: PathBuf,
    pub console_sock: PathBuf,
    pub notify_sock: PathBuf,
}

impl ProcessPaths {
    /// Layout for a process identified by `id`, i.e. `<app>.<instance>` or `<app>-stateboard`
    pub fn new(ctx: &RunContext, id: &str, entrypoint: &Path) -> Self {
        Self {
            entrypoint: entrypoint.to_path_buf(),
            work_dir: ctx.data_dir.join(id),
            pid_file: ctx.run_dir.join(format!("{}.pid", id)),
            log_dir: ctx.log_dir.clone(),
            log_file: ctx.log_dir.join(format!("{}.log", id)),
            console_sock: ctx.run_dir.join(format!("{}.control", id)),
            notify_sock: ctx.run_dir.join(format!("{}.notify", id)),
        }
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.pid_file.parent()
    }
}

fn validate_instance_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.contains('.') || name.contains('/') {
        return Err(ErrorKind::Config(format!("invalid instance name: {:?}", name)).into());
    }

    Ok(())
}

/// Reads instance names for `app_name` from the top level keys of the cfg file, in file order
///
/// Keys look like `<app>.<instance>`, anything else, including `<app>-stateboard`, is skipped.
pub fn instances_from_cfg(cfg: &Path, app_name: &str) -> Result<Vec<String>, Error> {
    let content = match fs::read_to_string(cfg) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("cfg file {} does not exist", cfg.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(format!("failed to read {}: {}", cfg.display(), e).into()),
    };

    let doc: serde_yaml::Value = serde_yaml::from_str(&content)?;
    let mapping = match doc {
        serde_yaml::Value::Mapping(mapping) => mapping,
        serde_yaml::Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(ErrorKind::Config(format!(
                "{} must contain a mapping of instance ids",
                cfg.display()
            ))
            .into())
        }
    };

    let prefix = format!("{}.", app_name);
    let instances = mapping
        .keys()
        .filter_map(serde_yaml::Value::as_str)
        .filter_map(|key| key.strip_prefix(&prefix))
        .filter(|instance| !instance.is_empty())
        .map(ToString::to_string)
        .collect();

    Ok(instances)
}
