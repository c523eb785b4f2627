//! Execution backends: the pluggable mechanisms that run container
//! processes.
//!
//! Every backend implements [`ExecDriver`] and is registered in a
//! [`DriverRegistry`] under a unique name. The daemon selects exactly one at
//! boot and talks to it only through the trait, so the daemon never sees a
//! concrete backend type.

mod errors;
mod lxc;
mod native;
mod process_table;
mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;

pub use self::errors::DriverError;
pub use self::lxc::{LXC_DRIVER, LxcDriver};
pub use self::native::{NATIVE_DRIVER, NativeDriver};
pub use self::registry::{DriverFactory, DriverRegistry, register_builtin_drivers};

pub(crate) const EXECDRIVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::execdriver");

/// Launch description for a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container identifier, unique per daemon.
    pub id: String,
    /// Root filesystem the entrypoint runs in.
    pub rootfs: Utf8PathBuf,
    /// Program to execute.
    pub entrypoint: String,
    /// Arguments passed to the entrypoint.
    pub args: Vec<String>,
    /// Environment visible to the container process; nothing is inherited
    /// from the daemon.
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    /// Builds a spec with no arguments and an empty environment.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        rootfs: impl Into<Utf8PathBuf>,
        entrypoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rootfs: rootfs.into(),
            entrypoint: entrypoint.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// Appends entrypoint arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Opaque reference to a container created by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    id: String,
}

impl ContainerHandle {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Identifier of the container.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.id)
    }
}

/// How a container process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ExitStatus {
    /// The process exited with a code.
    Code(i32),
    /// The process was terminated by a signal.
    Signal(i32),
}

impl ExitStatus {
    /// Shell-style exit code: signals map to `128 + signal`.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Code(code) => code,
            Self::Signal(signal) => 128 + signal,
        }
    }

    /// `true` for a zero exit code.
    #[must_use]
    pub const fn success(self) -> bool {
        matches!(self, Self::Code(0))
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match (status.code(), status.signal()) {
            (Some(code), _) => Self::Code(code),
            (None, Some(signal)) => Self::Signal(signal),
            (None, None) => Self::Code(dockyard_engine::STATUS_FAILED),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(formatter, "exit code {code}"),
            Self::Signal(signal) => write!(formatter, "signal {signal}"),
        }
    }
}

/// Settings handed to a backend factory when the backend is selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverContext {
    /// Private state directory, `<root>/execdriver/<name>`.
    pub root: Utf8PathBuf,
    /// Whether mandatory-access-control labelling is required.
    pub mandatory_isolation: bool,
}

/// Uniform capability set every execution backend provides.
pub trait ExecDriver: Send + Sync {
    /// Registry name of the backend.
    fn name(&self) -> &str;

    /// Records a container without starting it.
    fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, DriverError>;

    /// Starts a created container and returns its process id.
    fn start(&self, handle: &ContainerHandle) -> Result<u32, DriverError>;

    /// Asks the container to stop, forcing it after `grace`.
    fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<ExitStatus, DriverError>;

    /// Blocks until the container exits.
    fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, DriverError>;

    /// Handles of containers whose process is still running.
    fn running(&self) -> Vec<ContainerHandle>;
}

/// Shared handle to the selected backend.
pub type SharedDriver = Arc<dyn ExecDriver>;
