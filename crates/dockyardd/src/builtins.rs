//! Registration of the built-in kernel commands.

use std::env::consts::{ARCH, OS};
use std::sync::Arc;

use dockyard_engine::{Engine, EngineError, HandlerError, Job};
use serde::Serialize;

use crate::api::{self, ApiHandle, Readiness, TlsAcceptor};
use crate::network;

/// Name of the command reporting the daemon version.
pub const VERSION_COMMAND: &str = "version";

/// Version string compiled into the daemon.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct VersionInfo<'a> {
    version: &'a str,
    os: &'a str,
    arch: &'a str,
}

/// Binds the API, network and version commands in `engine`.
///
/// # Errors
///
/// Fails when any command name is already taken, leaving the commands bound
/// before the failure in place.
pub fn register(
    engine: &Engine,
    readiness: Readiness,
    tls: Option<Arc<dyn TlsAcceptor>>,
) -> Result<ApiHandle, EngineError> {
    let api = api::register(engine, readiness, tls)?;
    network::register(engine)?;
    engine.register(VERSION_COMMAND, |job: &mut Job| -> Result<(), HandlerError> {
        let info = VersionInfo {
            version: VERSION,
            os: OS,
            arch: ARCH,
        };
        let encoded = serde_json::to_string(&info)
            .map_err(|error| HandlerError::with_source("failed to encode version", error))?;
        job.write_stdout(&encoded);
        Ok(())
    })?;
    Ok(api)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::Value;

    use super::*;
    use crate::api::{ACCEPT_CONNECTIONS_COMMAND, SERVE_API_COMMAND};
    use crate::network::{ALLOCATE_INTERFACE_COMMAND, INIT_NETWORK_COMMAND, RELEASE_INTERFACE_COMMAND};

    #[rstest]
    fn registers_every_builtin() {
        let engine = Engine::new();
        register(&engine, Readiness::new(), None).expect("register builtins");
        for name in [
            SERVE_API_COMMAND,
            ACCEPT_CONNECTIONS_COMMAND,
            INIT_NETWORK_COMMAND,
            VERSION_COMMAND,
        ] {
            assert!(engine.is_registered(name), "{name} should be registered");
        }
        for name in [ALLOCATE_INTERFACE_COMMAND, RELEASE_INTERFACE_COMMAND] {
            assert!(!engine.is_registered(name), "{name} waits for the bridge");
        }
    }

    #[rstest]
    fn second_registration_is_refused() {
        let engine = Engine::new();
        register(&engine, Readiness::new(), None).expect("register builtins");
        assert!(register(&engine, Readiness::new(), None).is_err());
    }

    #[rstest]
    fn version_reports_build_metadata() {
        let engine = Engine::new();
        register(&engine, Readiness::new(), None).expect("register builtins");
        let mut job = engine.job(VERSION_COMMAND, Vec::<String>::new());
        job.run().expect("version runs");

        let info: Value = serde_json::from_str(&job.stdout_text()).expect("json output");
        assert_eq!(info["Version"], VERSION);
        assert_eq!(info["Os"], OS);
        assert_eq!(info["Arch"], ARCH);
    }
}
