//! Unit tests for boot orchestration.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use dockyard_config::FixedMtuSource;
use rstest::{fixture, rstest};
use serde_json::Value;

use super::support::{
    ChannelSignal, Recorded, RecordingReporter, Sandbox, TEST_MTU, channel_signal,
};
use crate::boot::{BootError, BootOptions, BootState, RunningDaemon, StaticConfigLoader, boot_with};
use crate::daemon::InitError;
use crate::execdriver::{DriverRegistry, NativeDriver, SharedDriver};
use crate::process::SignalKind;

#[fixture]
fn sandbox() -> Sandbox {
    Sandbox::new()
}

fn options() -> BootOptions {
    BootOptions {
        drivers: DriverRegistry::new(),
        mtu_source: Box::new(FixedMtuSource(TEST_MTU)),
        tls: None,
        telemetry: false,
    }
}

struct Booted {
    _trigger: Sender<SignalKind>,
    reporter: Arc<RecordingReporter>,
    result: Result<RunningDaemon, BootError>,
}

fn boot(sandbox: &Sandbox) -> Booted {
    let (trigger, signal) = channel_signal();
    boot_using(sandbox, trigger, signal, options())
}

fn boot_using(
    sandbox: &Sandbox,
    trigger: Sender<SignalKind>,
    signal: ChannelSignal,
    options: BootOptions,
) -> Booted {
    let reporter = Arc::new(RecordingReporter::default());
    let loader = StaticConfigLoader::new(sandbox.config.clone());
    let result = boot_with(&loader, reporter.clone(), signal, options);
    Booted {
        _trigger: trigger,
        reporter,
        result,
    }
}

/// Registry holding one backend that runs `before` ahead of building a
/// native driver.
fn registry_with<F>(name: &str, before: F) -> DriverRegistry
where
    F: Fn() + Send + Sync + 'static,
{
    let mut drivers = DriverRegistry::new();
    drivers
        .register(name, move |context| {
            before();
            Ok(Arc::new(NativeDriver::new(context)) as SharedDriver)
        })
        .expect("register test backend");
    drivers
}

fn eventually_removed(path: &Utf8Path) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if !path.exists() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    !path.exists()
}

fn tcp_addr(daemon: &RunningDaemon) -> SocketAddr {
    daemon
        .api()
        .endpoints()
        .into_iter()
        .find_map(|bound| bound.local_addr)
        .expect("tcp endpoint bound")
}

fn request(addr: SocketAddr, line: &str) -> Vec<Value> {
    let mut client = TcpStream::connect(addr).expect("connect");
    client.write_all(line.as_bytes()).expect("send request");
    client.write_all(b"\n").expect("send newline");
    BufReader::new(client)
        .lines()
        .map(|line| serde_json::from_str(&line.expect("read line")).expect("json record"))
        .collect()
}

#[rstest]
fn boot_walks_every_state_in_order(sandbox: Sandbox) {
    let booted = boot(&sandbox);
    let daemon = booted.result.expect("boot succeeds");
    assert_eq!(
        booted.reporter.states(),
        vec![
            BootState::Validating,
            BootState::KernelReady,
            BootState::SubsystemsRegistered,
            BootState::DaemonInitializing,
            BootState::ApiGated,
            BootState::Serving,
        ]
    );
    assert!(booted.reporter.events().contains(&Recorded::Driver("native".to_owned())));
    assert_eq!(daemon.api().activation_count(), 1);
    assert!(daemon.api().is_accepting());
    assert_eq!(daemon.config().network().mtu(), TEST_MTU);
    drop(daemon.shutdown());
}

#[rstest]
fn serveapi_receives_named_configuration(mut sandbox: Sandbox) {
    sandbox.config.enable_cors = true;
    let booted = boot(&sandbox);
    let daemon = booted.result.expect("boot succeeds");
    let options = daemon.api().options().expect("serveapi ran");
    assert!(options.logging);
    assert!(options.enable_cors);
    assert!(options.buffer_requests);
    assert_eq!(options.version, crate::VERSION);
    assert_eq!(options.socket_group, "dockyard");
    assert!(options.tls.is_none());
    drop(daemon.shutdown());
}

#[rstest]
fn served_requests_reach_daemon_commands(sandbox: Sandbox) {
    let booted = boot(&sandbox);
    let daemon = booted.result.expect("boot succeeds");
    let records = request(tcp_addr(&daemon), r#"{"command":"info"}"#);

    let (exit, output) = records.split_last().expect("exit record");
    assert_eq!(exit["kind"], "exit");
    assert_eq!(exit["status"], 0);
    let info: Value =
        serde_json::from_str(output[0]["data"].as_str().expect("stdout data")).expect("info json");
    assert_eq!(info["ExecDriver"], "native");
    assert_eq!(info["NetworkDisabled"], true);
    drop(daemon.shutdown());
}

#[rstest]
fn validation_failure_stops_before_the_kernel(mut sandbox: Sandbox) {
    sandbox.config.inter_container_communication = false;
    sandbox.config.enable_iptables = false;
    let booted = boot(&sandbox);
    let error = booted.result.expect_err("icc without firewall");
    assert!(matches!(error, BootError::Validation { .. }));
    assert_eq!(error.state(), BootState::Validating);
    assert_eq!(booted.reporter.states(), vec![BootState::Validating]);
    assert_eq!(booted.reporter.failures(), vec![BootState::Validating]);
    assert_eq!(booted.reporter.teardowns(), 0);
}

#[rstest]
fn initialisation_failure_tears_down(mut sandbox: Sandbox) {
    sandbox.config.graph_driver = Some("zfs".to_owned());
    let booted = boot(&sandbox);
    let error = booted.result.expect_err("unknown graph driver");
    assert!(matches!(error, BootError::Init { .. }));
    assert_eq!(booted.reporter.failures(), vec![BootState::DaemonInitializing]);
    assert_eq!(booted.reporter.teardowns(), 1);
    assert!(!booted.reporter.states().contains(&BootState::ApiGated));
    assert!(!sandbox.pidfile().exists());
}

#[rstest]
fn serveapi_failure_is_fatal(mut sandbox: Sandbox) {
    sandbox.config.tls = true;
    let booted = boot(&sandbox);
    let error = booted.result.expect_err("tls without an acceptor");
    assert!(matches!(
        error,
        BootError::Dispatch { command: "serveapi", state: BootState::DaemonInitializing, .. }
    ));
    assert_eq!(booted.reporter.teardowns(), 1);
}

#[rstest]
fn initialisation_past_its_bound_is_fatal(mut sandbox: Sandbox) {
    sandbox.config.init_timeout_secs = 1;
    sandbox.config.exec_driver = "stalled".to_owned();
    let (release, stalled) = mpsc::channel::<()>();
    let stalled = Mutex::new(stalled);
    let drivers = registry_with("stalled", move || {
        if let Ok(stalled) = stalled.lock() {
            let _ = stalled.recv();
        }
    });
    let (trigger, signal) = channel_signal();

    let booted = boot_using(&sandbox, trigger, signal, BootOptions { drivers, ..options() });
    let error = booted.result.expect_err("initialisation stalls");
    assert!(matches!(
        error,
        BootError::Init { source: InitError::Timeout(bound) } if bound == Duration::from_secs(1)
    ));
    assert_eq!(booted.reporter.failures(), vec![BootState::DaemonInitializing]);
    assert_eq!(booted.reporter.teardowns(), 1);
    assert!(!booted.reporter.states().contains(&BootState::ApiGated));

    release.send(()).expect("release stalled backend");
    assert!(eventually_removed(&sandbox.pidfile()));
}

#[rstest]
fn signal_during_initialisation_interrupts_boot(mut sandbox: Sandbox) {
    sandbox.config.exec_driver = "signalling".to_owned();
    let (trigger, signal) = channel_signal();
    let raise = trigger.clone();
    let drivers = registry_with("signalling", move || {
        raise.send(SignalKind::Terminate).expect("raise terminate");
        thread::sleep(Duration::from_millis(50));
    });

    let booted = boot_using(&sandbox, trigger, signal, BootOptions { drivers, ..options() });
    let error = booted.result.expect_err("signal ends boot");
    assert!(error.is_interrupted(), "unexpected boot error: {error}");
    assert!(matches!(
        error,
        BootError::Interrupted {
            signal: SignalKind::Terminate,
            state: BootState::DaemonInitializing,
        }
    ));
    assert_eq!(booted.reporter.failures(), vec![BootState::DaemonInitializing]);
    assert_eq!(booted.reporter.teardowns(), 1);
    assert!(!booted.reporter.states().contains(&BootState::ApiGated));
    assert!(eventually_removed(&sandbox.pidfile()));
}

#[rstest]
fn errors_name_their_state() {
    let interrupted = BootError::Interrupted {
        signal: SignalKind::Terminate,
        state: BootState::DaemonInitializing,
    };
    assert!(interrupted.is_interrupted());
    assert_eq!(interrupted.state(), BootState::DaemonInitializing);
    assert_eq!(interrupted.to_string(), "boot interrupted by SIGTERM");
    assert_eq!(BootState::SubsystemsRegistered.to_string(), "subsystems_registered");
}
