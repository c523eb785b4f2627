use std::sync::Arc;

use dockyard_engine::{Engine, STATUS_FAILED};
use rstest::{fixture, rstest};
use serde_json::Value;

use super::graph::MockGraphDriver;
use super::*;
use crate::api::Readiness;
use crate::execdriver::{
    ContainerHandle, ContainerSpec, DriverContext, NativeDriver,
    register_builtin_drivers,
};
use crate::health::StructuredHealthReporter;
use crate::tests::support::{Sandbox, TEST_MTU};

#[fixture]
fn sandbox() -> Sandbox {
    Sandbox::new()
}

fn registry() -> DriverRegistry {
    let mut registry = DriverRegistry::new();
    register_builtin_drivers(&mut registry).expect("builtin drivers register");
    registry
}

fn native(sandbox: &Sandbox) -> SharedDriver {
    Arc::new(NativeDriver::new(DriverContext {
        root: sandbox.base.join("execdriver"),
        mandatory_isolation: false,
    }))
}

fn installed(sandbox: &Sandbox) -> (Engine, Arc<Daemon>) {
    let engine = Engine::new();
    let daemon = Daemon::new(
        sandbox.daemon_config(),
        &engine,
        &registry(),
        &StructuredHealthReporter::new(),
    )
    .expect("daemon initialises");
    daemon
        .install(&engine, &Readiness::new())
        .expect("daemon installs");
    (engine, daemon)
}

fn run(engine: &Engine, command: &str, args: &[&str]) -> String {
    let mut job = engine.job(command, args.iter().copied());
    job.run().unwrap_or_else(|error| panic!("{command} failed: {error}"));
    job.stdout_text().trim().to_owned()
}

#[rstest]
fn new_claims_pidfile_and_selects_backend(sandbox: Sandbox) {
    let (engine, daemon) = installed(&sandbox);
    assert!(sandbox.pidfile().exists());
    assert_eq!(daemon.driver().name(), "native");
    assert_eq!(daemon.graph().name(), "vfs");
    for command in ["create", "start", "stop", "wait", "info"] {
        assert!(engine.is_registered(command), "{command} should be bound");
    }
    drop(engine.shutdown());
}

#[rstest]
fn install_marks_readiness(sandbox: Sandbox) {
    let engine = Engine::new();
    let daemon = Daemon::new(
        sandbox.daemon_config(),
        &engine,
        &registry(),
        &StructuredHealthReporter::new(),
    )
    .expect("daemon initialises");
    let readiness = Readiness::new();
    assert!(!readiness.is_ready());
    daemon.install(&engine, &readiness).expect("daemon installs");
    assert!(readiness.is_ready());
    drop(engine.shutdown());
}

#[rstest]
fn unsupported_backend_releases_pidfile(mut sandbox: Sandbox) {
    sandbox.config.exec_driver = "jail".to_owned();
    let error = Daemon::new(
        sandbox.daemon_config(),
        &Engine::new(),
        &registry(),
        &StructuredHealthReporter::new(),
    )
    .expect_err("unknown backend");
    assert!(matches!(error, InitError::Driver(ref source) if source.is_unsupported()));
    assert!(!sandbox.pidfile().exists());
}

#[rstest]
fn live_pidfile_refuses_second_daemon(sandbox: Sandbox) {
    let (engine, _daemon) = installed(&sandbox);
    let error = Daemon::new(
        sandbox.daemon_config(),
        &Engine::new(),
        &registry(),
        &StructuredHealthReporter::new(),
    )
    .expect_err("pidfile is held");
    assert!(matches!(error, InitError::PidFile(PidFileError::AlreadyRunning { .. })));
    drop(engine.shutdown());
}

#[rstest]
fn networking_runs_through_the_kernel(mut sandbox: Sandbox) {
    sandbox.config.bridge_iface = None;
    let engine = Engine::new();
    crate::network::register(&engine).expect("network registers");
    Daemon::new(
        sandbox.daemon_config(),
        &engine,
        &registry(),
        &StructuredHealthReporter::new(),
    )
    .expect("daemon initialises");
    let lease = run(&engine, crate::network::ALLOCATE_INTERFACE_COMMAND, &["web"]);
    let lease: Value = serde_json::from_str(&lease).expect("lease json");
    assert_eq!(lease["Mtu"], TEST_MTU);
}

#[rstest]
fn network_failure_is_fatal(mut sandbox: Sandbox) {
    sandbox.config.bridge_iface = None;
    let error = Daemon::new(
        sandbox.daemon_config(),
        &Engine::new(),
        &registry(),
        &StructuredHealthReporter::new(),
    )
    .expect_err("network command is missing");
    assert!(matches!(error, InitError::Network(ref source) if source.is_unknown_command()));
    assert!(!sandbox.pidfile().exists());
}

#[rstest]
fn containers_run_through_the_kernel(sandbox: Sandbox) {
    let (engine, _daemon) = installed(&sandbox);
    assert_eq!(run(&engine, "create", &["job", "/bin/sh", "-c", "exit 3"]), "job");
    let pid: u32 = run(&engine, "start", &["job"]).parse().expect("pid");
    assert!(pid > 0);
    assert_eq!(run(&engine, "wait", &["job"]), "3");
    drop(engine.shutdown());
}

#[rstest]
fn stop_honours_timeout_variable(sandbox: Sandbox) {
    let (engine, _daemon) = installed(&sandbox);
    run(&engine, "create", &["sleeper", "/bin/sleep", "30"]);
    run(&engine, "start", &["sleeper"]);

    let mut job = engine.job("stop", ["sleeper"]);
    job.env_mut().set_int("Timeout", 5);
    job.run().expect("stop runs");
    assert_eq!(job.stdout_text().trim(), "143");
    drop(engine.shutdown());
}

#[rstest]
fn info_reports_configuration(sandbox: Sandbox) {
    let (engine, _daemon) = installed(&sandbox);
    let info: Value = serde_json::from_str(&run(&engine, "info", &[])).expect("info json");
    assert_eq!(info["ExecDriver"], "native");
    assert_eq!(info["GraphDriver"], "vfs");
    assert_eq!(info["ContainersRunning"], 0);
    assert_eq!(info["NetworkDisabled"], true);
    assert_eq!(info["Mtu"], TEST_MTU);
    assert_eq!(info["Root"], sandbox.config.root.as_str());
    drop(engine.shutdown());
}

#[rstest]
#[case::missing_entrypoint(&["only-id"][..])]
#[case::missing_everything(&[][..])]
fn create_requires_id_and_entrypoint(sandbox: Sandbox, #[case] args: &[&str]) {
    let (engine, _daemon) = installed(&sandbox);
    let mut job = engine.job("create", args.iter().copied());
    assert!(job.run().is_err());
    assert_eq!(job.status(), Some(STATUS_FAILED));
    drop(engine.shutdown());
}

#[rstest]
#[case("NOEQUALS")]
#[case("=value")]
#[case("MODE=x\nlxc.mount.entry = / host none bind")]
#[case("MODE=x\ry")]
#[case("MO\0DE=x")]
fn malformed_container_variables_are_rejected(sandbox: Sandbox, #[case] entry: &str) {
    let (engine, daemon) = installed(&sandbox);
    let mut job = engine.job("create", ["web", "/bin/true"]);
    job.setenv_list("Env", [entry]);
    assert!(job.run().is_err());
    assert_eq!(job.status(), Some(STATUS_FAILED));
    assert!(daemon.driver().running().is_empty());
    assert!(matches!(
        daemon.driver().start(&ContainerHandle::new("web")),
        Err(DriverError::NotFound { .. })
    ));
    drop(engine.shutdown());
}

#[rstest]
fn graph_failure_skips_backend(sandbox: Sandbox) {
    let mut graph = MockGraphDriver::new();
    graph.expect_name().return_const("mock");
    graph
        .expect_create()
        .returning(|id| Err(GraphError::Exists { id: id.to_owned() }));
    graph.expect_remove().never();
    graph.expect_cleanup().returning(|| Ok(()));
    let driver = native(&sandbox);
    let daemon = Daemon::from_parts(sandbox.daemon_config(), Box::new(graph), Arc::clone(&driver), None);
    let engine = Engine::new();
    daemon.install(&engine, &Readiness::new()).expect("daemon installs");

    let mut job = engine.job("create", ["web", "/bin/true"]);
    assert!(job.run().is_err());
    let error = driver
        .start(&ContainerHandle::new("web"))
        .expect_err("backend never saw the container");
    assert!(matches!(error, DriverError::NotFound { .. }));
    drop(engine.shutdown());
}

#[rstest]
fn backend_failure_releases_rootfs(sandbox: Sandbox) {
    let rootfs = sandbox.base.join("rootfs");
    let mut graph = MockGraphDriver::new();
    graph.expect_name().return_const("mock");
    let created = rootfs.clone();
    graph.expect_create().returning(move |_| Ok(created.clone()));
    graph.expect_remove().times(1).returning(|_| Ok(()));
    graph.expect_cleanup().returning(|| Ok(()));
    let driver = native(&sandbox);
    driver
        .create(ContainerSpec::new("web", rootfs.clone(), "/bin/true"))
        .expect("first create");
    let daemon = Daemon::from_parts(sandbox.daemon_config(), Box::new(graph), driver, None);
    let engine = Engine::new();
    daemon.install(&engine, &Readiness::new()).expect("daemon installs");

    let mut job = engine.job("create", ["web", "/bin/true"]);
    assert!(job.run().is_err(), "duplicate id must fail");
    drop(engine.shutdown());
}

#[rstest]
fn teardown_stops_containers_and_removes_pidfile(sandbox: Sandbox) {
    let (engine, daemon) = installed(&sandbox);
    run(&engine, "create", &["sleeper", "/bin/sleep", "30"]);
    run(&engine, "start", &["sleeper"]);
    assert_eq!(daemon.driver().running().len(), 1);

    let report = engine.shutdown();
    assert!(report.is_clean(), "{:?}", report.failures());
    assert!(report.attempted().iter().any(|hook| hook == DAEMON_HOOK));
    assert!(daemon.driver().running().is_empty());
    assert!(!sandbox.pidfile().exists());
}

#[rstest]
fn install_after_shutdown_fails(sandbox: Sandbox) {
    let engine = Engine::new();
    let daemon = Daemon::new(
        sandbox.daemon_config(),
        &engine,
        &registry(),
        &StructuredHealthReporter::new(),
    )
    .expect("daemon initialises");
    drop(engine.shutdown());
    let readiness = Readiness::new();
    let error = daemon.install(&engine, &readiness).expect_err("kernel is shutting down");
    assert!(matches!(error, InitError::Install(_)));
    assert!(!readiness.is_ready());
}
