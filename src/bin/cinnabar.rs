// Copyright 2019 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;
use std::time::Duration;

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::error;
use tokio::runtime;

use cinnabar::commands;
use cinnabar::config::{Settings, SETTINGS_FILE};
use cinnabar::paths::RunContext;
use cinnabar::Error;

const START: &str = "start";
const STOP: &str = "stop";
const STATUS: &str = "status";
const CLEAN: &str = "clean";
const LOG: &str = "log";

trait SetupClapApp {
    fn setup_clap_app(self) -> Self;
    fn default_subcommand_opts(self) -> Self;
}

impl SetupClapApp for Command {
    fn setup_clap_app(self) -> Self {
        self.version(env!("CARGO_PKG_VERSION"))
            .author(env!("CARGO_PKG_AUTHORS"))
    }

    fn default_subcommand_opts(self) -> Self {
        self.arg(
            Arg::new("instances")
                .value_name("INSTANCE")
                .num_args(0..)
                .help("instances to operate on, all instances from the cfg file by default"),
        )
        .arg(
            Arg::new("app-dir")
                .long("app-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .default_value(".")
                .help("application directory"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .value_name("NAME")
                .help("application name, the application directory name by default"),
        )
        .arg(path_arg("run-dir", "directory for pid files and sockets"))
        .arg(path_arg("data-dir", "directory for the instances' working directories"))
        .arg(path_arg("log-dir", "directory for the instances' logs"))
        .arg(path_arg("cfg", "instances configuration file"))
        .arg(path_arg("settings", "settings file, .cinnabar.yml in the app dir by default"))
        .arg(
            Arg::new("binary")
                .long("binary")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("interpreter the entrypoints are run with"),
        )
        .arg(
            Arg::new("stateboard")
                .long("stateboard")
                .action(ArgAction::SetTrue)
                .help("also operate on the stateboard"),
        )
        .arg(
            Arg::new("stateboard-only")
                .long("stateboard-only")
                .action(ArgAction::SetTrue)
                .help("only operate on the stateboard"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("debug output"),
        )
    }
}

fn path_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("PATH")
        .value_parser(value_parser!(PathBuf))
        .help(help)
}

fn start_sub_command() -> Command {
    Command::new(START)
        .about("start instances")
        .arg(
            Arg::new("daemonize")
                .short('d')
                .long("daemonize")
                .action(ArgAction::SetTrue)
                .help("start in background and wait until the instances are ready"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(value_parser!(u64))
                .help("time to wait for readiness in background mode, 0 waits forever"),
        )
}

fn stop_sub_command() -> Command {
    Command::new(STOP).about("stop instances").arg(
        Arg::new("force")
            .short('f')
            .long("force")
            .action(ArgAction::SetTrue)
            .help("kill instead of terminating gracefully"),
    )
}

fn log_sub_command() -> Command {
    Command::new(LOG)
        .about("show instance logs")
        .arg(
            Arg::new("follow")
                .short('f')
                .long("follow")
                .action(ArgAction::SetTrue)
                .help("keep printing new lines"),
        )
        .arg(
            Arg::new("lines")
                .short('n')
                .long("lines")
                .value_name("NUMBER")
                .value_parser(value_parser!(usize))
                .help("number of last lines to show"),
        )
}

fn app() -> Command {
    Command::new(env!("CARGO_PKG_NAME"))
        .setup_clap_app()
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .subcommand_required(true)
        .subcommand(start_sub_command().default_subcommand_opts())
        .subcommand(stop_sub_command().default_subcommand_opts())
        .subcommand(
            Command::new(STATUS)
                .about("show instance status")
                .default_subcommand_opts(),
        )
        .subcommand(
            Command::new(CLEAN)
                .about("remove instance logs, working directories and sockets")
                .default_subcommand_opts(),
        )
        .subcommand(log_sub_command().default_subcommand_opts())
}

fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn run_context(args: &ArgMatches) -> Result<RunContext, Error> {
    let app_dir = args
        .get_one::<PathBuf>("app-dir")
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));
    let app_dir = app_dir.canonicalize().map_err(|e| {
        Error::from(format!(
            "failed to resolve app dir {}: {}",
            app_dir.display(),
            e
        ))
    })?;

    let mut ctx = RunContext::new(&app_dir);
    let path = |name: &str| args.get_one::<PathBuf>(name).map(|p| app_dir.join(p));

    // the settings file first, anything given on the command line overrides it
    let settings = path("settings").unwrap_or_else(|| app_dir.join(SETTINGS_FILE));
    Settings::load(&settings)?.apply(&mut ctx);

    if let Some(name) = args.get_one::<String>("name") {
        ctx.app_name = name.clone();
    }
    if let Some(run_dir) = path("run-dir") {
        ctx.run_dir = run_dir;
    }
    if let Some(data_dir) = path("data-dir") {
        ctx.data_dir = data_dir;
    }
    if let Some(log_dir) = path("log-dir") {
        ctx.log_dir = log_dir;
    }
    if let Some(cfg) = path("cfg") {
        ctx.cfg = cfg;
    }
    if let Some(binary) = args.get_one::<PathBuf>("binary") {
        ctx.binary = binary.clone();
    }

    ctx.instances = args
        .get_many::<String>("instances")
        .map(|names| names.cloned().collect())
        .unwrap_or_default();
    if args.get_flag("stateboard") {
        ctx.with_stateboard = true;
    }
    ctx.stateboard_only = args.get_flag("stateboard-only");

    // subcommand specific flags
    let flag = |name: &str| matches!(args.try_get_one::<bool>(name), Ok(Some(true)));
    ctx.daemonize = flag("daemonize");
    ctx.force = flag("force");
    ctx.follow = flag("follow");
    if let Ok(Some(timeout)) = args.try_get_one::<u64>("timeout") {
        ctx.timeout = Duration::from_secs(*timeout);
    }
    if let Ok(Some(lines)) = args.try_get_one::<usize>("lines") {
        ctx.lines = *lines;
    }

    Ok(ctx)
}

fn main() {
    let args = app().get_matches();

    let (command, sub_args) = match args.subcommand() {
        Some(subcommand) => subcommand,
        None => {
            eprintln!("command required");
            std::process::exit(2);
        }
    };

    init_logger(sub_args.get_flag("verbose"));

    let ctx = match run_context(sub_args) {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let runtime = match runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to initialize Tokio Runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(async move {
        match command {
            START => commands::start(&ctx).await,
            STOP => commands::stop(&ctx),
            STATUS => commands::status(&ctx),
            CLEAN => commands::clean(&ctx),
            LOG => commands::log(&ctx).await,
            arg => Err(Error::from(format!("unexpected command: {}", arg))),
        }
    });

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_for(app_dir: &std::path::Path, args: &[&str]) -> RunContext {
        let app_dir = app_dir.to_str().unwrap();
        let mut argv = vec!["cinnabar", args[0], "--app-dir", app_dir];
        argv.extend_from_slice(&args[1..]);

        let matches = app().try_get_matches_from(argv).unwrap();
        let (_, sub_args) = matches.subcommand().unwrap();
        run_context(sub_args).unwrap()
    }

    #[test]
    fn test_command_line_overrides_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "name: shop\ntimeout: 5\nstateboard: true\n",
        )
        .unwrap();

        // equal to the built-in default, still explicit
        let ctx = context_for(dir.path(), &["start", "--timeout", "60", "--name", "myapp"]);
        assert_eq!(ctx.timeout, Duration::from_secs(60));
        assert_eq!(ctx.app_name, "myapp");
        assert!(ctx.with_stateboard);

        let ctx = context_for(dir.path(), &["start", "-d"]);
        assert_eq!(ctx.timeout, Duration::from_secs(5));
        assert_eq!(ctx.app_name, "shop");
        assert!(ctx.daemonize);
    }
}
