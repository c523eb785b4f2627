//! Behavioural tests for configuration layering and validation.

use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use tempfile::TempDir;

use dockyard_config::{
    Config, ConfigError, FixedMtuSource, default_exec_driver, default_log_filter,
    default_log_format, default_pidfile, default_root, validate_with,
};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct Harness {
    temp_dir: TempDir,
    cli_args: RefCell<Vec<OsString>>,
    config_lines: RefCell<Vec<String>>,
    env_overrides: RefCell<Vec<(String, Option<OsString>)>>,
    _env_guard: MutexGuard<'static, ()>,
    loaded: RefCell<Option<Config>>,
    error: RefCell<Option<String>>,
}

impl Harness {
    fn new() -> Self {
        let temp_dir = match TempDir::new() {
            Ok(dir) => dir,
            Err(error) => panic!("failed to create temporary directory: {error}"),
        };
        // Scenarios read and write process-wide environment variables, so
        // they run one at a time.
        let env_guard = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Self {
            temp_dir,
            cli_args: RefCell::new(vec![OsString::from("dockyardd")]),
            config_lines: RefCell::new(Vec::new()),
            env_overrides: RefCell::new(Vec::new()),
            _env_guard: env_guard,
            loaded: RefCell::new(None),
            error: RefCell::new(None),
        }
    }

    fn write_config_line(&self, line: String) {
        let first = self.config_lines.borrow().is_empty();
        self.config_lines.borrow_mut().push(line);
        let path = self.temp_dir.path().join("dockyard.toml");
        let body = self.config_lines.borrow().join("\n");
        if let Err(error) = fs::write(&path, body) {
            panic!("failed to write configuration: {error}");
        }
        if first {
            let mut args = self.cli_args.borrow_mut();
            args.push(OsString::from("--config-path"));
            args.push(path.into_os_string());
        }
    }

    fn set_env(&self, key: &str, value: &str) {
        let previous = std::env::var_os(key);
        // Environment mutation is `unsafe` on edition 2024; the harness
        // restores overrides in `Drop`.
        unsafe { std::env::set_var(key, value) };
        self.env_overrides
            .borrow_mut()
            .push((key.to_owned(), previous));
    }

    fn push_cli_arg(&self, arg: impl Into<OsString>) {
        self.cli_args.borrow_mut().push(arg.into());
    }

    fn load(&self) {
        if self.loaded.borrow().is_some() || self.error.borrow().is_some() {
            return;
        }
        let args = self.cli_args.borrow().clone();
        match Config::load_from_iter(args) {
            Ok(config) => *self.loaded.borrow_mut() = Some(config),
            Err(error) => *self.error.borrow_mut() = Some(error.to_string()),
        }
    }

    fn config(&self) -> Config {
        self.load();
        if let Some(error) = self.error.borrow().as_ref() {
            panic!("configuration failed to load: {error}");
        }
        match self.loaded.borrow().as_ref() {
            Some(config) => config.clone(),
            None => panic!("configuration was not loaded"),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let mut overrides = self.env_overrides.borrow_mut();
        while let Some((key, value)) = overrides.pop() {
            match value {
                Some(previous) => unsafe { std::env::set_var(&key, previous) },
                None => unsafe { std::env::remove_var(&key) },
            }
        }
    }
}

#[fixture]
fn harness() -> Harness {
    Harness::new()
}

#[given("a configuration file setting the execution backend to \"{driver}\"")]
fn given_file_backend(harness: &Harness, driver: String) {
    harness.write_config_line(format!("exec_driver = \"{driver}\""));
}

#[given("a configuration file setting the bridge to \"{iface}\" with address \"{ip}\"")]
fn given_file_bridge(harness: &Harness, iface: String, ip: String) {
    harness.write_config_line(format!("bridge_iface = \"{iface}\""));
    harness.write_config_line(format!("bridge_ip = \"{ip}\""));
}

#[given("the environment overrides the execution backend to \"{driver}\"")]
fn given_env_backend(harness: &Harness, driver: String) {
    harness.set_env("DOCKYARD_EXEC_DRIVER", &driver);
}

#[when("the command line sets the execution backend to \"{driver}\"")]
fn when_cli_backend(harness: &Harness, driver: String) {
    harness.push_cli_arg("--exec-driver");
    harness.push_cli_arg(driver);
}

#[when("the configuration loads without overrides")]
fn when_load_without_overrides(harness: &Harness) {
    harness.load();
}

#[then("loading the configuration resolves the execution backend to \"{driver}\"")]
fn then_backend(harness: &Harness, driver: String) {
    assert_eq!(harness.config().exec_driver, driver);
}

#[then("loading the configuration applies the built-in defaults")]
fn then_defaults(harness: &Harness) {
    let config = harness.config();
    assert_eq!(config.exec_driver, default_exec_driver());
    assert_eq!(config.pidfile, default_pidfile());
    assert_eq!(config.root, default_root());
    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), default_log_format());
    assert!(config.enable_iptables);
    assert!(config.inter_container_communication);
    assert!(config.hosts.is_empty());
}

#[then("validating the configuration fails with a bridge conflict")]
fn then_bridge_conflict(harness: &Harness) {
    let config = harness.config();
    let error = validate_with(&config, &FixedMtuSource(1500))
        .expect_err("conflicting bridge settings must fail");
    assert!(
        matches!(error, ConfigError::BridgeConflict { .. }),
        "unexpected error: {error}"
    );
}

#[scenario(path = "tests/features/config_layers.feature")]
fn config_layers(#[from(harness)] harness: Harness) {
    let _ = harness;
}
