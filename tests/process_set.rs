// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use nix::sys::signal::Signal;

use cinnabar::commands;
use cinnabar::paths::ProcessPaths;
use cinnabar::procs::{aggregate, Outcome, Process, ProcessProbe, ProcessResult, ProcessSet};

use common::{context, notify_when_bound, write_pid, write_script, Fake, FakeProbe, APP, SLEEPER};

fn outcomes(results: &[ProcessResult]) -> HashMap<String, Outcome> {
    results
        .iter()
        .map(|r| (r.id.clone(), r.outcome))
        .collect()
}

#[tokio::test]
async fn test_start_skips_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    write_script(&ctx.entrypoint, SLEEPER);
    ctx.instances = vec!["s1".to_string(), "s2".to_string(), "s3".to_string()];

    // s2 is already running as a process we don't own
    write_pid(&ctx, "myapp.s2", 999_999);
    let probe = Arc::new(FakeProbe::new(&[(999_999, Fake::Alive("sh"))]));

    let mut set = ProcessSet::from_context(&ctx, probe.clone()).unwrap();
    assert_eq!(set.len(), 3);

    let ready: Vec<_> = ["s1", "s3"]
        .iter()
        .map(|instance| {
            let id = format!("{}.{}", APP, instance);
            notify_when_bound(ctx.run_dir.join(format!("{}.notify", id)), b"READY=1")
        })
        .collect();

    let results = set.start(true, ctx.timeout).await;
    for sent in ready {
        assert!(sent.await.unwrap());
    }

    assert_eq!(results.len(), 3);
    let outcomes = outcomes(&results);
    assert_eq!(outcomes["myapp.s1"], Outcome::Ok);
    assert_eq!(outcomes["myapp.s2"], Outcome::Skipped);
    assert_eq!(outcomes["myapp.s3"], Outcome::Ok);
    assert!(aggregate(&results, "start").is_ok());

    // the running process was never touched
    assert!(probe.signals().is_empty());

    let results = set.stop(true);
    assert!(results.iter().all(|r| r.outcome == Outcome::Ok));
    assert_eq!(probe.signals(), vec![(999_999, Signal::SIGKILL)]);
}

#[tokio::test]
async fn test_start_partial_failure() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    write_script(&ctx.entrypoint, SLEEPER);
    write_script(&ctx.stateboard_entrypoint, SLEEPER);

    let probe: Arc<dyn ProcessProbe> = Arc::new(FakeProbe::default());
    let mut set = ProcessSet::new();
    set.push(Process::stateboard(&ctx, probe.clone())).unwrap();
    set.push(Process::instance(&ctx, "s1", probe.clone())).unwrap();

    let id = ctx.instance_id("s2");
    let missing = ctx.app_dir.join("missing.lua");
    let paths = ProcessPaths::new(&ctx, &id, &missing);
    set.push(Process::new(id, paths, &ctx.binary, Vec::new(), probe))
        .unwrap();

    let ready = vec![
        notify_when_bound(ctx.run_dir.join("myapp-stateboard.notify"), b"READY=1"),
        notify_when_bound(ctx.run_dir.join("myapp.s1.notify"), b"READY=1"),
    ];

    let results = set.start(true, ctx.timeout).await;
    for sent in ready {
        assert!(sent.await.unwrap());
    }

    assert_eq!(results.len(), 3);
    let started = outcomes(&results);
    assert_eq!(started["myapp-stateboard"], Outcome::Ok);
    assert_eq!(started["myapp.s1"], Outcome::Ok);
    assert_eq!(started["myapp.s2"], Outcome::Failed);

    let err = aggregate(&results, "start").unwrap_err();
    assert!(err.to_string().contains("myapp.s2"));
    assert!(!err.to_string().contains("myapp.s1"));

    let results = set.stop(true);
    let outcomes = outcomes(&results);
    assert_eq!(outcomes["myapp-stateboard"], Outcome::Ok);
    assert_eq!(outcomes["myapp.s1"], Outcome::Ok);
    assert_eq!(outcomes["myapp.s2"], Outcome::Skipped);
}

#[test]
fn test_stop_in_declaration_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    ctx.instances = vec![
        "running".to_string(),
        "never-started".to_string(),
        "gone".to_string(),
        "impostor".to_string(),
    ];

    write_pid(&ctx, "myapp.running", 900_001);
    write_pid(&ctx, "myapp.gone", 900_003);
    write_pid(&ctx, "myapp.impostor", 900_004);
    let probe = Arc::new(FakeProbe::new(&[
        (900_001, Fake::Alive("sh")),
        (900_003, Fake::Gone),
        (900_004, Fake::Alive("python3")),
    ]));

    let mut set = ProcessSet::from_context(&ctx, probe.clone()).unwrap();
    let results = set.stop(false);

    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(
        ids,
        vec!["myapp.running", "myapp.never-started", "myapp.gone", "myapp.impostor"]
    );

    let outcomes: Vec<Outcome> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Ok,
            Outcome::Skipped,
            Outcome::Skipped,
            Outcome::Failed
        ]
    );
    assert_eq!(probe.signals(), vec![(900_001, Signal::SIGTERM)]);
    assert!(aggregate(&results, "stop").is_err());
}

#[test]
fn test_status_reports_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    ctx.instances = vec!["bad".to_string(), "good".to_string()];
    ctx.with_stateboard = true;

    write_pid(&ctx, "myapp.bad", 900_010);
    write_pid(&ctx, "myapp.good", 900_011);
    let probe = Arc::new(FakeProbe::new(&[
        (900_010, Fake::Alive("bash")),
        (900_011, Fake::Alive("sh")),
    ]));

    let mut set = ProcessSet::from_context(&ctx, probe).unwrap();
    assert!(set.status().is_err());

    let states: Vec<String> = set
        .processes()
        .iter()
        .map(|p| format!("{}: {}", p.id(), p.state()))
        .collect();
    assert_eq!(states[0], "myapp-stateboard: NOT STARTED");
    assert!(states[1].starts_with("myapp.bad: ERROR."));
    assert_eq!(states[2], "myapp.good: RUNNING");
}

#[test]
fn test_clean_refuses_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    ctx.instances = vec!["busy".to_string(), "idle".to_string(), "dirty".to_string()];

    write_pid(&ctx, "myapp.busy", 900_020);
    let probe = Arc::new(FakeProbe::new(&[(900_020, Fake::Alive("sh"))]));

    let mut set = ProcessSet::from_context(&ctx, probe).unwrap();
    let busy_work_dir = set.get("myapp.busy").unwrap().paths().work_dir.clone();
    let dirty_work_dir = set.get("myapp.dirty").unwrap().paths().work_dir.clone();
    std::fs::create_dir_all(&busy_work_dir).unwrap();
    std::fs::create_dir_all(&dirty_work_dir).unwrap();

    let results = set.clean();
    let outcomes: Vec<Outcome> = results.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![Outcome::Failed, Outcome::Skipped, Outcome::Ok]
    );
    assert!(busy_work_dir.exists());
    assert!(!dirty_work_dir.exists());
}

#[test]
fn test_duplicate_instances() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    ctx.instances = vec!["s1".to_string(), "s1".to_string()];

    assert!(ProcessSet::from_context(&ctx, Arc::new(FakeProbe::default())).is_err());
}

#[tokio::test]
async fn test_foreground_start() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    write_script(
        &ctx.entrypoint,
        "echo \"$TARANTOOL_INSTANCE_NAME\" > instance.txt\necho hello\n",
    );
    ctx.instances = vec!["s1".to_string(), "s2".to_string()];

    let probe: Arc<dyn ProcessProbe> = Arc::new(FakeProbe::default());
    let mut set = ProcessSet::from_context(&ctx, probe).unwrap();
    let results = set.start(false, ctx.timeout).await;

    assert_eq!(results.len(), 2);
    assert!(results
        .iter()
        .all(|r| r.outcome == Outcome::Exited && r.error.is_none()));

    for (instance, process) in ["s1", "s2"].iter().zip(set.processes()) {
        let written = std::fs::read_to_string(process.paths().work_dir.join("instance.txt")).unwrap();
        assert_eq!(written.trim(), *instance);
    }

    // foreground mode never ends normally
    let err = commands::start(&ctx).await.unwrap_err();
    assert_eq!(err.to_string(), "all instances exited");
}

#[tokio::test]
async fn test_foreground_failed_exit() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    write_script(&ctx.entrypoint, "printf bye\nexit 3\n");
    ctx.instances = vec!["running".to_string(), "s1".to_string()];

    write_pid(&ctx, "myapp.running", 900_030);
    let probe = Arc::new(FakeProbe::new(&[(900_030, Fake::Alive("sh"))]));

    let mut set = ProcessSet::from_context(&ctx, probe.clone()).unwrap();
    let results = set.start(false, ctx.timeout).await;

    let outcomes = outcomes(&results);
    assert_eq!(outcomes["myapp.running"], Outcome::Skipped);
    assert_eq!(outcomes["myapp.s1"], Outcome::Exited);

    let exited = results.iter().find(|r| r.id == "myapp.s1").unwrap();
    let err = exited.error.as_ref().unwrap();
    assert!(err.to_string().contains("exited with"));
    assert!(probe.signals().is_empty());
}

#[tokio::test]
async fn test_tail_logs() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    ctx.instances = vec!["s1".to_string(), "s2".to_string()];

    let set = ProcessSet::from_context(&ctx, Arc::new(FakeProbe::default())).unwrap();
    let s1 = set.get("myapp.s1").unwrap();
    std::fs::create_dir_all(&ctx.log_dir).unwrap();
    std::fs::write(&s1.paths().log_file, "one\ntwo\nthree").unwrap();

    s1.tail_log(false, 2).await.unwrap();

    let s2 = set.get("myapp.s2").unwrap();
    let err = s2.tail_log(false, 2).await.unwrap_err();
    assert!(err.to_string().contains("does not exist"));

    let results = set.tail_logs(false, 2).await;
    let outcomes = outcomes(&results);
    assert_eq!(outcomes["myapp.s1"], Outcome::Ok);
    assert_eq!(outcomes["myapp.s2"], Outcome::Failed);

    let err = aggregate(&results, "show logs of").unwrap_err();
    assert_eq!(err.to_string(), "failed to show logs of myapp.s2");

    let err = commands::log(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("myapp.s2"));

    ctx.instances = vec!["s1".to_string()];
    commands::log(&ctx).await.unwrap();
}

#[tokio::test]
async fn test_cfg_instances_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = context(dir.path());
    write_script(&ctx.entrypoint, SLEEPER);
    std::fs::write(
        &ctx.cfg,
        "myapp.router: {}\nmyapp.storage: {}\nmyapp-stateboard: {}\n",
    )
    .unwrap();
    ctx.daemonize = true;

    let ready = vec![
        notify_when_bound(ctx.run_dir.join("myapp.router.notify"), b"READY=1"),
        notify_when_bound(ctx.run_dir.join("myapp.storage.notify"), b"READY=1"),
    ];
    commands::start(&ctx).await.unwrap();
    for sent in ready {
        assert!(sent.await.unwrap());
    }

    commands::status(&ctx).unwrap();

    // a second start leaves the running processes alone
    commands::start(&ctx).await.unwrap();

    ctx.force = true;
    commands::stop(&ctx).unwrap();
}
