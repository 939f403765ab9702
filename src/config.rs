// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Optional per-application settings file

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::Deserialize;

use crate::paths::RunContext;
use crate::Error;

pub const SETTINGS_FILE: &str = ".cinnabar.yml";

/// Settings read from `.cinnabar.yml`, relative paths are resolved against the app directory
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Settings {
    pub name: Option<String>,
    pub run_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub cfg: Option<PathBuf>,
    pub binary: Option<PathBuf>,
    pub entrypoint: Option<PathBuf>,
    pub stateboard_entrypoint: Option<PathBuf>,
    pub stateboard: Option<bool>,
    /// Readiness timeout in seconds
    pub timeout: Option<u64>,
}

impl Settings {
    /// Loads `path`, a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no settings file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e).into()),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_yaml::from_str(&content)?)
    }

    /// Overrides the context fields these settings name
    ///
    /// Applied onto a fresh `RunContext`, before command line values, so an explicit command line
    ///  value always wins.
    pub fn apply(&self, ctx: &mut RunContext) {
        let app_dir = ctx.app_dir.clone();
        let resolve = |path: &PathBuf| app_dir.join(path);

        if let Some(name) = &self.name {
            ctx.app_name = name.clone();
        }

        set(&mut ctx.run_dir, self.run_dir.as_ref().map(resolve));
        set(&mut ctx.data_dir, self.data_dir.as_ref().map(resolve));
        set(&mut ctx.log_dir, self.log_dir.as_ref().map(resolve));
        set(&mut ctx.cfg, self.cfg.as_ref().map(resolve));
        set(&mut ctx.binary, self.binary.clone());
        set(&mut ctx.entrypoint, self.entrypoint.as_ref().map(resolve));
        set(
            &mut ctx.stateboard_entrypoint,
            self.stateboard_entrypoint.as_ref().map(resolve),
        );

        if let Some(stateboard) = self.stateboard {
            ctx.with_stateboard = stateboard;
        }

        if let Some(timeout) = self.timeout {
            ctx.timeout = Duration::from_secs(timeout);
        }
    }
}

fn set<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}
