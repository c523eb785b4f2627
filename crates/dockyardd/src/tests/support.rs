//! Shared fixtures for daemon tests.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use dockyard_config::{Config, DaemonConfig, FixedMtuSource, LogFormat, validate_with};
use dockyard_engine::ShutdownReport;
use tempfile::TempDir;

use crate::boot::{BootError, BootState};
use crate::health::HealthReporter;
use crate::process::{ShutdownError, ShutdownSignal, SignalKind};

pub(crate) const TEST_MTU: u32 = 1400;

/// Temporary daemon root with a configuration pointing into it.
pub(crate) struct Sandbox {
    _dir: TempDir,
    pub(crate) base: Utf8PathBuf,
    pub(crate) config: Config,
}

impl Sandbox {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let base = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 temp dir");
        let config = Config {
            pidfile: base.join("dockyard.pid").into_string(),
            root: base.join("state").into_string(),
            bridge_iface: Some("none".to_owned()),
            exec_driver: "native".to_owned(),
            hosts: vec!["tcp://127.0.0.1:0".to_owned()],
            log_format: LogFormat::Compact,
            init_timeout_secs: 10,
            shutdown_grace_secs: 5,
            ..Config::default()
        };
        Self {
            _dir: dir,
            base,
            config,
        }
    }

    pub(crate) fn pidfile(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.config.pidfile)
    }

    pub(crate) fn daemon_config(&self) -> Arc<DaemonConfig> {
        Arc::new(validate_with(&self.config, &FixedMtuSource(TEST_MTU)).expect("valid config"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Recorded {
    State(BootState),
    Failed(BootState),
    Driver(String),
    Teardown { failures: usize },
}

/// Reporter that remembers every lifecycle event.
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<Recorded> {
        self.events.lock().expect("reporter lock").clone()
    }

    pub(crate) fn states(&self) -> Vec<BootState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn failures(&self) -> Vec<BootState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Recorded::Failed(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn teardowns(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, Recorded::Teardown { .. }))
            .count()
    }

    fn push(&self, event: Recorded) {
        self.events.lock().expect("reporter lock").push(event);
    }
}

impl HealthReporter for RecordingReporter {
    fn boot_state_changed(&self, state: BootState) {
        self.push(Recorded::State(state));
    }

    fn boot_failed(&self, error: &BootError) {
        self.push(Recorded::Failed(error.state()));
    }

    fn exec_driver_selected(&self, name: &str) {
        self.push(Recorded::Driver(name.to_owned()));
    }

    fn teardown_completed(&self, report: &ShutdownReport) {
        self.push(Recorded::Teardown {
            failures: report.failures().len(),
        });
    }
}

/// Signal source fed from a channel.
pub(crate) struct ChannelSignal(Receiver<SignalKind>);

impl ShutdownSignal for ChannelSignal {
    fn wait(&mut self) -> Result<Option<SignalKind>, ShutdownError> {
        Ok(self.0.recv().ok())
    }
}

pub(crate) fn channel_signal() -> (Sender<SignalKind>, ChannelSignal) {
    let (trigger, source) = mpsc::channel();
    (trigger, ChannelSignal(source))
}
