//! The daemon aggregate and its initializer.
//!
//! [`Daemon::new`] builds the runtime state from the validated configuration:
//! it claims the pidfile, prepares the root directory, opens the storage
//! graph, brings up networking through the kernel and selects the execution
//! backend. It runs on the background initialisation thread, so every step
//! reports failure as an [`InitError`] instead of touching the process.
//! [`Daemon::install`] then binds the container commands and the `daemon`
//! teardown hook and marks the daemon ready for the API gate.

mod commands;
pub mod graph;
mod pidfile;

use std::fmt;
use std::fs;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::Utf8PathBuf;
use dockyard_config::DaemonConfig;
use dockyard_engine::{Engine, EngineError, HandlerError, JobError};
use thiserror::Error;
use tracing::{info, warn};

use crate::api::Readiness;
use crate::execdriver::{DriverContext, DriverError, DriverRegistry, SharedDriver};
use crate::health::HealthReporter;
use crate::network::INIT_NETWORK_COMMAND;

pub use self::graph::{GraphDriver, GraphError, VfsDriver};
pub use self::pidfile::{PidFile, PidFileError};

pub(crate) const DAEMON_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::daemon");

/// Name of the teardown hook the daemon registers.
pub const DAEMON_HOOK: &str = "daemon";

const CONTAINER_STOP_GRACE: Duration = Duration::from_secs(10);

/// Fatal errors raised while constructing or installing the daemon.
#[derive(Debug, Error)]
pub enum InitError {
    /// The pidfile could not be claimed.
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    /// The root directory could not be created.
    #[error("failed to create root directory {path}: {source}")]
    Root {
        /// Root path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The storage graph could not be opened.
    #[error("failed to open graph driver: {0}")]
    Graph(#[from] GraphError),
    /// Network initialisation failed.
    #[error("network initialisation failed: {0}")]
    Network(#[source] JobError),
    /// The execution backend could not be selected.
    #[error("failed to select execution backend: {0}")]
    Driver(#[from] DriverError),
    /// Daemon commands could not be bound in the kernel.
    #[error("failed to install daemon commands: {0}")]
    Install(#[from] EngineError),
    /// Initialisation did not finish in time.
    #[error("daemon initialisation timed out after {0:?}")]
    Timeout(Duration),
    /// The initialisation thread ended without reporting.
    #[error("daemon initialisation thread exited without reporting")]
    Abandoned,
    /// The initialisation thread could not be started.
    #[error("failed to spawn initialisation thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Runtime state owning storage and the selected execution backend.
pub struct Daemon {
    config: Arc<DaemonConfig>,
    graph: Box<dyn GraphDriver>,
    driver: SharedDriver,
    pidfile: Mutex<Option<PidFile>>,
}

impl Daemon {
    /// Builds the daemon from validated configuration.
    ///
    /// Steps already taken are undone when a later one fails: the pidfile
    /// guard is dropped, which removes the file.
    ///
    /// # Errors
    ///
    /// Returns the first [`InitError`] encountered.
    pub fn new(
        config: Arc<DaemonConfig>,
        engine: &Engine,
        drivers: &DriverRegistry,
        reporter: &dyn HealthReporter,
    ) -> Result<Arc<Self>, InitError> {
        let pidfile = PidFile::acquire(config.pidfile())?;

        let root = config.root();
        fs::create_dir_all(root).map_err(|source| InitError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let storage = config.storage();
        let graph = graph::open(storage.graph_driver(), root, storage.graph_options())?;

        if config.network().disable_network() {
            info!(target: DAEMON_TARGET, "networking disabled");
        } else {
            init_network(&config, engine)?;
        }

        let name = config.exec_driver();
        let driver = drivers.select(
            name,
            DriverContext {
                root: root.join("execdriver").join(name),
                mandatory_isolation: config.mandatory_isolation(),
            },
        )?;
        reporter.exec_driver_selected(driver.name());

        if config.auto_restart() {
            info!(
                target: DAEMON_TARGET,
                "auto-restart enabled; no containers survived the previous run"
            );
        }

        Ok(Self::from_parts(config, graph, driver, Some(pidfile)))
    }

    pub(crate) fn from_parts(
        config: Arc<DaemonConfig>,
        graph: Box<dyn GraphDriver>,
        driver: SharedDriver,
        pidfile: Option<PidFile>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            graph,
            driver,
            pidfile: Mutex::new(pidfile),
        })
    }

    /// Binds the container commands and the teardown hook, then signals
    /// readiness.
    ///
    /// The hook is registered before any command so a failed installation
    /// still stops whatever the daemon owns.
    ///
    /// # Errors
    ///
    /// Fails when the kernel is shutting down or a command name is taken.
    pub fn install(self: &Arc<Self>, engine: &Engine, readiness: &Readiness) -> Result<(), InitError> {
        let daemon = Arc::clone(self);
        engine.on_shutdown(DAEMON_HOOK, move || daemon.teardown())?;
        commands::register(self, engine)?;
        readiness.mark_ready();
        info!(
            target: DAEMON_TARGET,
            exec_driver = self.driver.name(),
            graph_driver = self.graph.name(),
            "daemon installed"
        );
        Ok(())
    }

    /// Validated configuration.
    #[must_use]
    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    /// Selected execution backend.
    #[must_use]
    pub fn driver(&self) -> &SharedDriver {
        &self.driver
    }

    /// Storage graph driver.
    #[must_use]
    pub fn graph(&self) -> &dyn GraphDriver {
        self.graph.as_ref()
    }

    /// Stops every running container, then releases storage and the pidfile.
    fn teardown(&self) -> Result<(), HandlerError> {
        let mut failures = Vec::new();
        for handle in self.driver.running() {
            match self.driver.stop(&handle, CONTAINER_STOP_GRACE) {
                Ok(status) => info!(
                    target: DAEMON_TARGET,
                    container = %handle,
                    status = %status,
                    "container stopped"
                ),
                Err(error) => {
                    warn!(
                        target: DAEMON_TARGET,
                        container = %handle,
                        error = %error,
                        "failed to stop container"
                    );
                    failures.push(format!("{handle}: {error}"));
                }
            }
        }
        if let Err(error) = self.graph.cleanup() {
            warn!(target: DAEMON_TARGET, error = %error, "graph driver cleanup failed");
            failures.push(format!("graph: {error}"));
        }
        match self.pidfile.lock() {
            Ok(mut pidfile) => drop(pidfile.take()),
            Err(_) => failures.push("pidfile lock poisoned".to_owned()),
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(HandlerError::new(format!(
                "daemon teardown incomplete: {}",
                failures.join("; ")
            )))
        }
    }
}

impl fmt::Debug for Daemon {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Daemon")
            .field("root", &self.config.root())
            .field("exec_driver", &self.driver.name())
            .field("graph_driver", &self.graph.name())
            .finish_non_exhaustive()
    }
}

fn init_network(config: &DaemonConfig, engine: &Engine) -> Result<(), InitError> {
    let network = config.network();
    let mut job = engine.job(INIT_NETWORK_COMMAND, std::iter::empty::<String>());
    job.setenv_bool("EnableIptables", network.enable_iptables());
    job.setenv_bool("EnableIpForward", network.enable_ip_forward());
    job.setenv("BridgeIface", network.bridge_iface().unwrap_or_default());
    job.setenv("BridgeIP", network.bridge_ip().unwrap_or_default());
    job.setenv("DefaultBindingIP", network.default_ip().to_string());
    job.setenv_bool(
        "InterContainerCommunication",
        network.inter_container_communication(),
    );
    job.env_mut().set_int("Mtu", i64::from(network.mtu()));
    job.run().map_err(InitError::Network)
}

#[cfg(test)]
mod tests;
