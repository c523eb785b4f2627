//! Unit tests for the dispatch kernel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use crate::{
    COMMANDS_COMMAND, Engine, EngineError, HandlerError, Job, JobError, SHUTDOWN_COMMAND,
    STATUS_FAILED,
};

#[fixture]
fn engine() -> Engine {
    Engine::with_drain_timeout(Duration::from_millis(200))
}

#[rstest]
fn builtin_commands_are_listed(engine: Engine) {
    engine
        .register("version", |job: &mut Job| -> Result<(), HandlerError> {
            job.write_stdout("1.0");
            Ok(())
        })
        .expect("version registers");

    let mut job = engine.job(COMMANDS_COMMAND, Vec::<String>::new());
    job.run().expect("commands runs");
    assert_eq!(job.stdout_text(), "commands\nshutdown\nversion\n");
}

#[rstest]
fn builtin_names_cannot_be_rebound(engine: Engine) {
    let result = engine.register(SHUTDOWN_COMMAND, |_: &mut Job| -> Result<(), HandlerError> {
        Ok(())
    });
    assert!(matches!(result, Err(EngineError::AlreadyRegistered { .. })));
}

#[rstest]
fn handler_failure_carries_status(engine: Engine) {
    engine
        .register("fail", |job: &mut Job| -> Result<(), HandlerError> {
            job.write_stderr("partial output");
            Err(HandlerError::new("disk full").status_code(28))
        })
        .expect("fail registers");

    let mut job = engine.job("fail", ["x"]);
    let error = job.run().expect_err("handler fails");
    assert_eq!(error.status(), 28);
    assert_eq!(job.status(), Some(28));
    assert_eq!(job.stderr_text(), "partial output\n");
    assert!(error.to_string().contains("disk full"));
}

#[rstest]
fn zero_status_on_failure_is_coerced() {
    let error = HandlerError::new("oops").status_code(0);
    assert_eq!(error.status(), STATUS_FAILED);
}

#[rstest]
fn job_cannot_run_twice(engine: Engine) {
    let mut job = engine.job(COMMANDS_COMMAND, Vec::<String>::new());
    job.run().expect("first run");
    assert!(matches!(job.run(), Err(JobError::AlreadyRun { .. })));
}

#[rstest]
fn jobs_inherit_engine_environment(engine: Engine) {
    engine.setenv("Root", "/var/lib/dockyard").expect("setenv");
    engine
        .register("root", |job: &mut Job| -> Result<(), HandlerError> {
            let root = job.env().get_or_empty("Root").to_owned();
            job.write_stdout(&root);
            Ok(())
        })
        .expect("root registers");

    let mut job = engine.job("root", Vec::<String>::new());
    job.run().expect("root runs");
    assert_eq!(job.stdout_text(), "/var/lib/dockyard\n");

    let mut overridden = engine.job("root", Vec::<String>::new());
    overridden.setenv("Root", "/tmp/other");
    overridden.run().expect("root runs");
    assert_eq!(overridden.stdout_text(), "/tmp/other\n");
    assert_eq!(engine.getenv("Root").as_deref(), Some("/var/lib/dockyard"));
}

#[rstest]
fn handlers_can_dispatch_sub_jobs(engine: Engine) {
    engine
        .register("inner", |job: &mut Job| -> Result<(), HandlerError> {
            job.write_stdout("inner ran");
            Ok(())
        })
        .expect("inner registers");
    engine
        .register("outer", |job: &mut Job| -> Result<(), HandlerError> {
            let mut inner = job.engine().job("inner", Vec::<String>::new());
            inner.run()?;
            let text = inner.stdout_text().into_owned();
            job.write_stdout(&text);
            Ok(())
        })
        .expect("outer registers");

    let mut job = engine.job("outer", Vec::<String>::new());
    job.run().expect("outer runs");
    assert_eq!(job.stdout_text(), "inner ran\n");
}

#[rstest]
fn shutdown_without_hooks_is_clean(engine: Engine) {
    let report = engine.shutdown();
    assert!(report.is_clean());
    assert!(report.attempted().is_empty());
    assert!(!report.already_shut_down());
}

#[rstest]
fn panicking_hook_is_reported(engine: Engine) {
    let later_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&later_ran);
    engine
        .on_shutdown("first", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .expect("hook registers");
    engine
        .on_shutdown("second", || panic!("boom"))
        .expect("hook registers");

    let report = engine.shutdown();
    assert!(later_ran.load(Ordering::SeqCst));
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].hook, "second");
    assert!(report.failures()[0].error.message().contains("boom"));
}

#[rstest]
fn registration_is_refused_after_shutdown(engine: Engine) {
    engine.shutdown();
    assert!(matches!(
        engine.on_shutdown("late", || Ok(())),
        Err(EngineError::ShuttingDown { .. })
    ));
    assert!(matches!(
        engine.register("late", |_: &mut Job| -> Result<(), HandlerError> { Ok(()) }),
        Err(EngineError::ShuttingDown { .. })
    ));
}

#[rstest]
fn shutdown_command_runs_teardown(engine: Engine) {
    engine
        .on_shutdown("storage", || Ok(()))
        .expect("hook registers");

    let mut job = engine.job(SHUTDOWN_COMMAND, Vec::<String>::new());
    job.run().expect("shutdown runs");
    assert_eq!(job.stdout_text(), "teardown storage\n");
    assert!(engine.is_shutting_down());
}

#[rstest]
fn shutdown_waits_for_in_flight_jobs() {
    let engine = Engine::with_drain_timeout(Duration::from_secs(5));
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);
    engine
        .register("slow", move |_: &mut Job| -> Result<(), HandlerError> {
            started_tx.send(()).map_err(|e| HandlerError::with_source("signal", e))?;
            let receiver = release_rx.lock().map_err(|_| HandlerError::new("lock"))?;
            receiver
                .recv_timeout(Duration::from_secs(5))
                .map_err(|e| HandlerError::with_source("release", e))?;
            Ok(())
        })
        .expect("slow registers");

    let worker_engine = engine.clone();
    let worker = thread::spawn(move || {
        let mut job = worker_engine.job("slow", Vec::<String>::new());
        job.run()
    });
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("job started");

    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        release_tx.send(()).expect("release job");
    });
    let start = Instant::now();
    let report = engine.shutdown();
    assert!(report.drained());
    assert!(start.elapsed() >= Duration::from_millis(50));
    worker.join().expect("worker joins").expect("slow job completes");
    releaser.join().expect("releaser joins");
}

#[rstest]
fn drain_gives_up_after_timeout(engine: Engine) {
    let (started_tx, started_rx) = mpsc::channel();
    engine
        .register("stuck", move |_: &mut Job| -> Result<(), HandlerError> {
            started_tx.send(()).map_err(|e| HandlerError::with_source("signal", e))?;
            thread::sleep(Duration::from_millis(800));
            Ok(())
        })
        .expect("stuck registers");

    let worker_engine = engine.clone();
    let worker = thread::spawn(move || worker_engine.job("stuck", Vec::<String>::new()).run());
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("job started");

    let report = engine.shutdown();
    assert!(!report.drained());
    assert!(!report.is_clean());
    worker.join().expect("worker joins").expect("stuck job completes");
}
