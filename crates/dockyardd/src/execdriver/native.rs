//! Backend that runs the entrypoint as a plain child process.

use std::process::{Command, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use super::process_table::ProcessTable;
use super::{ContainerHandle, ContainerSpec, DriverContext, DriverError, ExecDriver, ExitStatus};

/// Registry name of the native backend.
pub const NATIVE_DRIVER: &str = "native";

/// Spawns container entrypoints directly, rooted at the container rootfs.
pub struct NativeDriver {
    context: DriverContext,
    table: ProcessTable,
}

impl NativeDriver {
    /// Builds the backend for the given context.
    #[must_use]
    pub fn new(context: DriverContext) -> Self {
        Self {
            context,
            table: ProcessTable::new(),
        }
    }

    /// Context the backend was created with.
    #[must_use]
    pub fn context(&self) -> &DriverContext {
        &self.context
    }
}

impl ExecDriver for NativeDriver {
    fn name(&self) -> &str {
        NATIVE_DRIVER
    }

    fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, DriverError> {
        self.table.insert(spec)
    }

    fn start(&self, handle: &ContainerHandle) -> Result<u32, DriverError> {
        self.table.launch(handle, native_command)
    }

    fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<ExitStatus, DriverError> {
        self.table
            .stop(handle, grace, |spec, pid| terminate(&spec.id, pid))
    }

    fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, DriverError> {
        self.table.wait(handle)
    }

    fn running(&self) -> Vec<ContainerHandle> {
        self.table.running()
    }
}

fn native_command(spec: &ContainerSpec) -> Command {
    let mut command = Command::new(&spec.entrypoint);
    command
        .args(&spec.args)
        .current_dir(spec.rootfs.as_std_path())
        .env_clear()
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

/// Sends `SIGTERM` to a container process.
pub(super) fn terminate(id: &str, pid: u32) -> Result<(), DriverError> {
    let raw = i32::try_from(pid).map_err(|_| DriverError::Internal {
        message: format!("pid {pid} out of range"),
    })?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|source| DriverError::Signal {
        id: id.to_owned(),
        source,
    })
}
