//! Container commands bound into the kernel by [`Daemon::install`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dockyard_engine::{Engine, EngineError, HandlerError, Job};
use serde::Serialize;
use tracing::warn;

use super::{DAEMON_TARGET, Daemon};
use crate::execdriver::{ContainerHandle, ContainerSpec};

const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

pub(super) fn register(daemon: &Arc<Daemon>, engine: &Engine) -> Result<(), EngineError> {
    let bound = Arc::clone(daemon);
    engine.register("create", move |job: &mut Job| -> Result<(), HandlerError> {
        bound.create(job)
    })?;
    let bound = Arc::clone(daemon);
    engine.register("start", move |job: &mut Job| -> Result<(), HandlerError> {
        bound.start(job)
    })?;
    let bound = Arc::clone(daemon);
    engine.register("stop", move |job: &mut Job| -> Result<(), HandlerError> {
        bound.stop(job)
    })?;
    let bound = Arc::clone(daemon);
    engine.register("wait", move |job: &mut Job| -> Result<(), HandlerError> {
        bound.wait(job)
    })?;
    let bound = Arc::clone(daemon);
    engine.register("info", move |job: &mut Job| -> Result<(), HandlerError> {
        bound.info(job)
    })
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Info<'a> {
    root: &'a str,
    exec_driver: &'a str,
    graph_driver: &'a str,
    containers_running: usize,
    network_disabled: bool,
    mtu: u32,
}

impl Daemon {
    /// `create <id> <entrypoint> [args...]`; container variables come from the
    /// `Env` list of `KEY=VALUE` entries.
    fn create(&self, job: &mut Job) -> Result<(), HandlerError> {
        let (Some(id), Some(entrypoint)) = (job.arg(0), job.arg(1)) else {
            return Err(usage(job, "<id> <entrypoint> [args...]"));
        };
        let id = id.to_owned();
        let entrypoint = entrypoint.to_owned();
        let args: Vec<String> = job.args().iter().skip(2).cloned().collect();
        let env = container_env(job)?;

        let rootfs = self
            .graph
            .create(&id)
            .map_err(|error| HandlerError::with_source(format!("cannot create rootfs for {id}"), error))?;
        let mut spec = ContainerSpec::new(&id, rootfs, entrypoint).with_args(args);
        spec.env = env;
        if let Err(error) = self.driver.create(spec) {
            if let Err(cleanup) = self.graph.remove(&id) {
                warn!(
                    target: DAEMON_TARGET,
                    container = %id,
                    error = %cleanup,
                    "failed to remove rootfs after create failure"
                );
            }
            return Err(HandlerError::with_source(format!("cannot create {id}"), error));
        }
        job.write_stdout(&id);
        Ok(())
    }

    fn start(&self, job: &mut Job) -> Result<(), HandlerError> {
        let handle = handle_arg(job)?;
        let pid = self
            .driver
            .start(&handle)
            .map_err(|error| HandlerError::with_source(format!("cannot start {handle}"), error))?;
        job.write_stdout(&pid.to_string());
        Ok(())
    }

    /// `stop <id>`; the `Timeout` variable overrides the grace period in
    /// seconds.
    fn stop(&self, job: &mut Job) -> Result<(), HandlerError> {
        let handle = handle_arg(job)?;
        let secs = job.env().get_int("Timeout")?.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS);
        let grace = Duration::from_secs(u64::try_from(secs).unwrap_or(0));
        let status = self
            .driver
            .stop(&handle, grace)
            .map_err(|error| HandlerError::with_source(format!("cannot stop {handle}"), error))?;
        job.write_stdout(&status.code().to_string());
        Ok(())
    }

    fn wait(&self, job: &mut Job) -> Result<(), HandlerError> {
        let handle = handle_arg(job)?;
        let status = self
            .driver
            .wait(&handle)
            .map_err(|error| HandlerError::with_source(format!("cannot wait for {handle}"), error))?;
        job.write_stdout(&status.code().to_string());
        Ok(())
    }

    fn info(&self, job: &mut Job) -> Result<(), HandlerError> {
        let info = Info {
            root: self.config.root().as_str(),
            exec_driver: self.driver.name(),
            graph_driver: self.graph.name(),
            containers_running: self.driver.running().len(),
            network_disabled: self.config.network().disable_network(),
            mtu: self.config.network().mtu(),
        };
        let rendered = serde_json::to_string(&info)
            .map_err(|error| HandlerError::with_source("cannot encode info", error))?;
        job.write_stdout(&rendered);
        Ok(())
    }
}

fn handle_arg(job: &Job) -> Result<ContainerHandle, HandlerError> {
    job.arg(0)
        .map(ContainerHandle::new)
        .ok_or_else(|| usage(job, "<id>"))
}

fn usage(job: &Job, synopsis: &str) -> HandlerError {
    HandlerError::new(format!("usage: {} {synopsis}", job.name()))
}

fn container_env(job: &Job) -> Result<BTreeMap<String, String>, HandlerError> {
    job.env()
        .get_list("Env")?
        .into_iter()
        .map(|entry| match entry.split_once('=') {
            _ if entry.contains(['\n', '\r', '\0']) => Err(HandlerError::new(format!(
                "invalid container variable {entry:?}; line breaks and NUL bytes are not allowed"
            ))),
            Some((key, value)) if !key.is_empty() => Ok((key.to_owned(), value.to_owned())),
            _ => Err(HandlerError::new(format!(
                "invalid container variable '{entry}'; expected KEY=VALUE"
            ))),
        })
        .collect()
}
