//! Backend driving the legacy `lxc-start`/`lxc-stop` tools.

use std::fmt::Write as _;
use std::fs;
use std::process::{Command, Stdio};
use std::time::Duration;

use camino::Utf8PathBuf;
use tracing::debug;

use super::native::terminate;
use super::process_table::ProcessTable;
use super::{
    ContainerHandle, ContainerSpec, DriverContext, DriverError, EXECDRIVER_TARGET, ExecDriver,
    ExitStatus,
};

/// Registry name of the LXC backend.
pub const LXC_DRIVER: &str = "lxc";

/// Runs containers through the LXC userspace tools.
pub struct LxcDriver {
    root: Utf8PathBuf,
    table: ProcessTable,
}

impl LxcDriver {
    /// Builds the backend, refusing contexts that need mandatory isolation.
    pub fn new(context: DriverContext) -> Result<Self, DriverError> {
        if context.mandatory_isolation {
            return Err(DriverError::MandatoryIsolationUnsupported {
                name: LXC_DRIVER.to_owned(),
            });
        }
        Ok(Self {
            root: context.root,
            table: ProcessTable::new(),
        })
    }

    /// Path of the generated LXC configuration for a container.
    #[must_use]
    pub fn config_path(&self, id: &str) -> Utf8PathBuf {
        self.root.join("containers").join(id).join("config.lxc")
    }

    fn write_config(&self, spec: &ContainerSpec) -> Result<Utf8PathBuf, DriverError> {
        let path = self.config_path(&spec.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| DriverError::io(format!("creating {parent}"), source))?;
        }
        fs::write(&path, render_config(spec)?)
            .map_err(|source| DriverError::io(format!("writing {path}"), source))?;
        Ok(path)
    }
}

impl ExecDriver for LxcDriver {
    fn name(&self) -> &str {
        LXC_DRIVER
    }

    fn create(&self, spec: ContainerSpec) -> Result<ContainerHandle, DriverError> {
        self.write_config(&spec)?;
        self.table.insert(spec)
    }

    fn start(&self, handle: &ContainerHandle) -> Result<u32, DriverError> {
        let config = self.config_path(handle.id());
        self.table.launch(handle, |spec| {
            let mut command = Command::new("lxc-start");
            command
                .arg("-n")
                .arg(&spec.id)
                .arg("-f")
                .arg(config.as_std_path())
                .arg("--")
                .arg(&spec.entrypoint)
                .args(&spec.args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            command
        })
    }

    fn stop(&self, handle: &ContainerHandle, grace: Duration) -> Result<ExitStatus, DriverError> {
        self.table.stop(handle, grace, |spec, pid| {
            let stopped = Command::new("lxc-stop")
                .arg("-n")
                .arg(&spec.id)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            match stopped {
                Ok(status) if status.success() => Ok(()),
                outcome => {
                    debug!(
                        target: EXECDRIVER_TARGET,
                        container = %spec.id,
                        outcome = ?outcome,
                        "lxc-stop unavailable; signalling lxc-start"
                    );
                    terminate(&spec.id, pid)
                }
            }
        })
    }

    fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, DriverError> {
        self.table.wait(handle)
    }

    fn running(&self) -> Vec<ContainerHandle> {
        self.table.running()
    }
}

fn render_config(spec: &ContainerSpec) -> Result<String, DriverError> {
    let mut config = String::new();
    let rootfs = spec.rootfs.as_str();
    write_entry(&mut config, spec, "lxc.utsname", &spec.id)?;
    write_entry(&mut config, spec, "lxc.rootfs", rootfs)?;
    for (key, value) in &spec.env {
        write_entry(&mut config, spec, "lxc.environment", &format!("{key}={value}"))?;
    }
    Ok(config)
}

/// Appends one `key = value` line; values may not break out of their line.
fn write_entry(
    config: &mut String,
    spec: &ContainerSpec,
    key: &'static str,
    value: &str,
) -> Result<(), DriverError> {
    if value.contains(['\n', '\r', '\0']) {
        return Err(DriverError::InvalidConfigValue {
            id: spec.id.clone(),
            key,
        });
    }
    writeln!(config, "{key} = {value}").map_err(|_| DriverError::Internal {
        message: format!("cannot render {key} for container '{}'", spec.id),
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn spec_with_env(key: &str, value: &str) -> ContainerSpec {
        let mut spec = ContainerSpec::new("web", "/var/lib/dockyard/web", "/bin/sh");
        spec.env.insert(key.to_owned(), value.to_owned());
        spec
    }

    #[test]
    fn renders_one_line_per_entry() {
        let config = render_config(&spec_with_env("PATH", "/bin")).expect("config renders");
        assert_eq!(
            config,
            "lxc.utsname = web\nlxc.rootfs = /var/lib/dockyard/web\nlxc.environment = PATH=/bin\n"
        );
    }

    #[rstest]
    #[case("MODE", "x\nlxc.mount.entry = / host none bind")]
    #[case("MODE", "x\rlxc.cap.drop =")]
    #[case("MODE\nlxc.mount.entry", "/ host none bind")]
    #[case("MODE", "x\0y")]
    fn refuses_values_that_add_directives(#[case] key: &str, #[case] value: &str) {
        let error = render_config(&spec_with_env(key, value)).expect_err("entry rejected");
        assert!(matches!(
            error,
            DriverError::InvalidConfigValue { key: "lxc.environment", .. }
        ));
    }
}
