//! Boot orchestration.
//!
//! [`boot_with`] walks the daemon through its start-up states:
//!
//! 1. `Validating`: load and validate configuration, install telemetry.
//! 2. `KernelReady`: build the kernel and start the shutdown coordinator.
//! 3. `SubsystemsRegistered`: bind the built-in commands and execution
//!    backends.
//! 4. `DaemonInitializing`: construct the daemon on a background thread
//!    while `serveapi` binds the listeners with requests buffered.
//! 5. `ApiGated`: initialisation succeeded; `acceptconnections` opens the
//!    gate.
//! 6. `Serving`.
//!
//! Any failure is fatal and reported once through the [`HealthReporter`].
//! Failures after the kernel exists also run its teardown so nothing the
//! daemon started is left behind. A termination signal during boot ends it
//! with [`BootError::Interrupted`] instead, whichever step notices first.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use dockyard_config::{Config, ConfigError, DaemonConfig, MtuSource, SystemMtuSource, validate_with};
use dockyard_engine::{Engine, EngineError, Job, JobError, ShutdownReport};
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{
    ACCEPT_CONNECTIONS_COMMAND, ApiHandle, Readiness, SERVE_API_COMMAND, TlsAcceptor,
};
use crate::builtins::{self, VERSION};
use crate::daemon::{Daemon, InitError};
use crate::execdriver::{DriverError, DriverRegistry, register_builtin_drivers};
use crate::health::HealthReporter;
use crate::process::{ShutdownError, ShutdownOutcome, ShutdownSignal, SignalKind, spawn_coordinator};
use crate::telemetry::{self, TelemetryError};

const BOOT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::boot");

// The coordinator reports only after its grace-bounded teardown returns.
const SHUTDOWN_EVENT_SLACK: Duration = Duration::from_secs(1);

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the raw daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration built in memory.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Start-up states, in the order boot enters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootState {
    /// Loading and validating configuration.
    Validating,
    /// The kernel exists and signals are trapped.
    KernelReady,
    /// Built-in commands and backends are registered.
    SubsystemsRegistered,
    /// The daemon is being constructed in the background.
    DaemonInitializing,
    /// The daemon is installed; the API gate is about to open.
    ApiGated,
    /// Requests are being served.
    Serving,
}

impl fmt::Display for BootState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Validating => "validating",
            Self::KernelReady => "kernel_ready",
            Self::SubsystemsRegistered => "subsystems_registered",
            Self::DaemonInitializing => "daemon_initializing",
            Self::ApiGated => "api_gated",
            Self::Serving => "serving",
        })
    }
}

/// Fatal errors surfaced during boot.
#[derive(Debug, Error)]
pub enum BootError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Configuration failed validation.
    #[error("invalid configuration: {source}")]
    Validation {
        /// First violation found.
        #[source]
        source: ConfigError,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// The shutdown coordinator could not be started or lost its signals.
    #[error("shutdown signal handling failed: {source}")]
    Signal {
        /// Underlying signal error.
        #[source]
        source: ShutdownError,
    },
    /// A built-in command could not be registered.
    #[error("failed to register built-in commands: {source}")]
    Register {
        /// Underlying kernel error.
        #[source]
        source: EngineError,
    },
    /// The execution backends could not be registered.
    #[error("failed to register execution backends: {source}")]
    Drivers {
        /// Underlying registry error.
        #[source]
        source: DriverError,
    },
    /// The daemon could not be initialised.
    #[error("daemon initialisation failed: {source}")]
    Init {
        /// Underlying initialisation error.
        #[source]
        source: InitError,
    },
    /// A boot-critical command failed.
    #[error("'{command}' failed: {source}")]
    Dispatch {
        /// Command name.
        command: &'static str,
        /// State boot was in.
        state: BootState,
        /// Underlying job error.
        #[source]
        source: JobError,
    },
    /// A termination signal arrived before boot finished.
    #[error("boot interrupted by {signal}")]
    Interrupted {
        /// Signal received.
        signal: SignalKind,
        /// State boot was in.
        state: BootState,
    },
}

impl BootError {
    /// State boot was in when the error occurred.
    #[must_use]
    pub const fn state(&self) -> BootState {
        match self {
            Self::Configuration { .. } | Self::Validation { .. } | Self::Telemetry { .. } => {
                BootState::Validating
            }
            Self::Signal { .. } => BootState::KernelReady,
            Self::Register { .. } | Self::Drivers { .. } => BootState::SubsystemsRegistered,
            Self::Init { .. } => BootState::DaemonInitializing,
            Self::Dispatch { state, .. } | Self::Interrupted { state, .. } => *state,
        }
    }

    /// Returns `true` when boot stopped because of a termination signal.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Messages delivered to the boot sequence by its helper threads.
pub(crate) enum BootEvent {
    InitFinished(Result<(), InitError>),
    Shutdown(ShutdownOutcome),
    SignalLost(ShutdownError),
}

/// Collaborators boot may be given instead of the production defaults.
pub struct BootOptions {
    /// Registry the built-in backends are added to.
    pub drivers: DriverRegistry,
    /// MTU lookup used when none is configured.
    pub mtu_source: Box<dyn MtuSource + Send + Sync>,
    /// TLS terminator for `serveapi`.
    pub tls: Option<Arc<dyn TlsAcceptor>>,
    /// Whether to install the global tracing subscriber.
    pub telemetry: bool,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            drivers: DriverRegistry::new(),
            mtu_source: Box::new(SystemMtuSource::new()),
            tls: None,
            telemetry: true,
        }
    }
}

impl fmt::Debug for BootOptions {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BootOptions")
            .field("drivers", &self.drivers)
            .field("tls", &self.tls.is_some())
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

/// A daemon that reached [`BootState::Serving`].
pub struct RunningDaemon {
    engine: Engine,
    config: Arc<DaemonConfig>,
    api: ApiHandle,
    events: Receiver<BootEvent>,
}

impl RunningDaemon {
    /// The dispatch kernel.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Validated configuration.
    #[must_use]
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Handle on the API server.
    #[must_use]
    pub fn api(&self) -> &ApiHandle {
        &self.api
    }

    /// Blocks until the shutdown coordinator has handled a termination
    /// signal.
    ///
    /// # Errors
    ///
    /// Returns a [`ShutdownError`] when the signal source is lost; the
    /// kernel is still running in that case.
    pub fn wait(self) -> Result<ShutdownOutcome, ShutdownError> {
        loop {
            match self.events.recv() {
                Ok(BootEvent::Shutdown(outcome)) => return Ok(outcome),
                Ok(BootEvent::SignalLost(error)) => return Err(error),
                Ok(BootEvent::InitFinished(_)) => continue,
                Err(_) => return Err(ShutdownError::SourceClosed),
            }
        }
    }

    /// Tears the daemon down without waiting for a signal.
    pub fn shutdown(self) -> ShutdownReport {
        self.engine.shutdown()
    }
}

impl fmt::Debug for RunningDaemon {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RunningDaemon")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Boots the daemon using the supplied collaborators.
///
/// # Errors
///
/// Returns the first fatal [`BootError`]; it has already been passed to
/// `reporter`.
pub fn boot_with<S>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    signal: S,
    options: BootOptions,
) -> Result<RunningDaemon, BootError>
where
    S: ShutdownSignal + 'static,
{
    let BootOptions {
        mut drivers,
        mtu_source,
        tls,
        telemetry: install_telemetry,
    } = options;

    reporter.boot_state_changed(BootState::Validating);
    let raw = match loader.load() {
        Ok(raw) => raw,
        Err(source) => return Err(fail(reporter.as_ref(), BootError::Configuration { source })),
    };
    let config = match validate_with(&raw, &*mtu_source) {
        Ok(config) => Arc::new(config),
        Err(source) => return Err(fail(reporter.as_ref(), BootError::Validation { source })),
    };
    if install_telemetry {
        match telemetry::initialise(&config) {
            Ok(handle) => debug!(
                target: BOOT_TARGET,
                filter = handle.filter(),
                format = %handle.format(),
                "telemetry installed"
            ),
            Err(source) => return Err(fail(reporter.as_ref(), BootError::Telemetry { source })),
        }
    }
    info!(
        target: BOOT_TARGET,
        version = VERSION,
        exec_driver = config.exec_driver(),
        graph_driver = config.storage().graph_driver(),
        "dockyard daemon starting"
    );

    reporter.boot_state_changed(BootState::KernelReady);
    let engine = Engine::new();
    let (events, received) = mpsc::channel();
    if let Err(source) = spawn_coordinator(
        signal,
        engine.clone(),
        config.shutdown_grace(),
        events.clone(),
        Arc::clone(&reporter),
    ) {
        return Err(abort(&engine, reporter.as_ref(), BootError::Signal { source }));
    }

    let grace = config.shutdown_grace();
    let report_fatal = |error: BootError| fatal(&engine, reporter.as_ref(), &received, grace, error);

    reporter.boot_state_changed(BootState::SubsystemsRegistered);
    let readiness = Readiness::new();
    let api = match builtins::register(&engine, readiness.clone(), tls) {
        Ok(api) => api,
        Err(source) => return Err(report_fatal(BootError::Register { source })),
    };
    if let Err(source) = register_builtin_drivers(&mut drivers) {
        return Err(report_fatal(BootError::Drivers { source }));
    }

    reporter.boot_state_changed(BootState::DaemonInitializing);
    let init = InitTask {
        config: Arc::clone(&config),
        engine: engine.clone(),
        drivers,
        readiness,
        reporter: Arc::clone(&reporter),
        events,
    };
    if let Err(source) = init.spawn() {
        return Err(report_fatal(BootError::Init {
            source: InitError::Spawn(source),
        }));
    }

    let mut serve = serve_job(&engine, &config);
    if let Err(source) = serve.run() {
        return Err(report_fatal(BootError::Dispatch {
            command: SERVE_API_COMMAND,
            state: BootState::DaemonInitializing,
            source,
        }));
    }

    if let Err(error) = await_init(&received, config.init_timeout()) {
        return Err(report_fatal(error));
    }

    reporter.boot_state_changed(BootState::ApiGated);
    let mut accept = engine.job(ACCEPT_CONNECTIONS_COMMAND, Vec::<String>::new());
    if let Err(source) = accept.run() {
        return Err(report_fatal(BootError::Dispatch {
            command: ACCEPT_CONNECTIONS_COMMAND,
            state: BootState::ApiGated,
            source,
        }));
    }

    reporter.boot_state_changed(BootState::Serving);
    Ok(RunningDaemon {
        engine,
        config,
        api,
        events: received,
    })
}

struct InitTask {
    config: Arc<DaemonConfig>,
    engine: Engine,
    drivers: DriverRegistry,
    readiness: Readiness,
    reporter: Arc<dyn HealthReporter>,
    events: Sender<BootEvent>,
}

impl InitTask {
    fn spawn(self) -> io::Result<()> {
        thread::Builder::new()
            .name("dockyard-init".to_owned())
            .spawn(move || self.run())
            .map(drop)
    }

    fn run(self) {
        let outcome = Daemon::new(
            Arc::clone(&self.config),
            &self.engine,
            &self.drivers,
            self.reporter.as_ref(),
        )
        .and_then(|daemon| daemon.install(&self.engine, &self.readiness));
        if self.events.send(BootEvent::InitFinished(outcome)).is_err() {
            debug!(target: BOOT_TARGET, "boot stopped waiting for initialisation");
        }
    }
}

fn serve_job(engine: &Engine, config: &DaemonConfig) -> Job {
    let api = config.api();
    let tls = api.tls();
    let mut job = engine.job(
        SERVE_API_COMMAND,
        api.hosts().iter().map(ToString::to_string),
    );
    job.setenv_bool("Logging", true);
    job.setenv_bool("EnableCors", api.enable_cors());
    job.setenv("Version", VERSION);
    job.setenv("SocketGroup", api.socket_group());
    job.setenv_bool("Tls", tls.enabled());
    job.setenv_bool("TlsVerify", tls.verify());
    job.setenv("TlsCa", tls.ca().as_str());
    job.setenv("TlsCert", tls.cert().as_str());
    job.setenv("TlsKey", tls.key().as_str());
    job.setenv_bool("BufferRequests", true);
    job
}

fn await_init(events: &Receiver<BootEvent>, timeout: Duration) -> Result<(), BootError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(BootEvent::InitFinished(Ok(()))) => return Ok(()),
            Ok(BootEvent::InitFinished(Err(source))) => return Err(BootError::Init { source }),
            Ok(BootEvent::Shutdown(outcome)) => {
                return Err(BootError::Interrupted {
                    signal: outcome.signal,
                    state: BootState::DaemonInitializing,
                });
            }
            Ok(BootEvent::SignalLost(error)) => {
                warn!(
                    target: BOOT_TARGET,
                    error = %error,
                    "signal handling lost during initialisation"
                );
            }
            Err(RecvTimeoutError::Timeout) => {
                return Err(BootError::Init {
                    source: InitError::Timeout(timeout),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(BootError::Init {
                    source: InitError::Abandoned,
                });
            }
        }
    }
}

fn fail(reporter: &dyn HealthReporter, error: BootError) -> BootError {
    reporter.boot_failed(&error);
    error
}

// Fatal errors once the kernel exists also tear down what was brought up.
fn abort(engine: &Engine, reporter: &dyn HealthReporter, error: BootError) -> BootError {
    reporter.boot_failed(&error);
    let report = engine.shutdown();
    reporter.teardown_completed(&report);
    error
}

/// Reports a failure once the shutdown coordinator exists.
///
/// A step that failed because a signal already started teardown is reported
/// as [`BootError::Interrupted`]; the coordinator owns that teardown.
fn fatal(
    engine: &Engine,
    reporter: &dyn HealthReporter,
    events: &Receiver<BootEvent>,
    grace: Duration,
    error: BootError,
) -> BootError {
    if error.is_interrupted() {
        return fail(reporter, error);
    }
    if !engine.is_shutting_down() {
        return abort(engine, reporter, error);
    }
    debug!(
        target: BOOT_TARGET,
        state = %error.state(),
        error = %error,
        "boot step failed while shutting down"
    );
    match await_shutdown(events, grace + SHUTDOWN_EVENT_SLACK) {
        Some(signal) => fail(
            reporter,
            BootError::Interrupted {
                signal,
                state: error.state(),
            },
        ),
        None => fail(reporter, error),
    }
}

/// Waits for the coordinator to finish handling a signal.
fn await_shutdown(events: &Receiver<BootEvent>, timeout: Duration) -> Option<SignalKind> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(BootEvent::Shutdown(outcome)) => return Some(outcome.signal),
            Ok(BootEvent::InitFinished(_) | BootEvent::SignalLost(_)) => {}
            Err(_) => return None,
        }
    }
}
