//! Bookkeeping shared by backends that run containers as child processes.

use std::collections::HashMap;
use std::process::{Child, Command};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{ContainerHandle, ContainerSpec, DriverError, EXECDRIVER_TARGET, ExitStatus};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

enum State {
    Created,
    Running(Child),
    Exited(ExitStatus),
}

struct Entry {
    spec: ContainerSpec,
    state: State,
}

/// Containers known to one backend, keyed by id.
#[derive(Default)]
pub(super) struct ProcessTable {
    entries: Mutex<HashMap<String, Entry>>,
}

impl ProcessTable {
    pub(super) fn new() -> Self {
        Self::default()
    }

    pub(super) fn insert(&self, spec: ContainerSpec) -> Result<ContainerHandle, DriverError> {
        let mut entries = self.lock()?;
        if entries.contains_key(&spec.id) {
            return Err(DriverError::AlreadyExists { id: spec.id });
        }
        let handle = ContainerHandle::new(spec.id.clone());
        entries.insert(
            spec.id.clone(),
            Entry {
                spec,
                state: State::Created,
            },
        );
        Ok(handle)
    }

    pub(super) fn spec(&self, handle: &ContainerHandle) -> Result<ContainerSpec, DriverError> {
        let entries = self.lock()?;
        entries
            .get(handle.id())
            .map(|entry| entry.spec.clone())
            .ok_or_else(|| not_found(handle))
    }

    /// Spawns the command built for a created container.
    pub(super) fn launch<F>(&self, handle: &ContainerHandle, build: F) -> Result<u32, DriverError>
    where
        F: FnOnce(&ContainerSpec) -> Command,
    {
        let mut entries = self.lock()?;
        let entry = entries.get_mut(handle.id()).ok_or_else(|| not_found(handle))?;
        if !matches!(entry.state, State::Created) {
            return Err(DriverError::AlreadyStarted {
                id: handle.id().to_owned(),
            });
        }
        let mut command = build(&entry.spec);
        let child = command.spawn().map_err(|source| DriverError::Spawn {
            id: handle.id().to_owned(),
            source,
        })?;
        let pid = child.id();
        entry.state = State::Running(child);
        info!(
            target: EXECDRIVER_TARGET,
            container = %handle,
            pid,
            "container started"
        );
        Ok(pid)
    }

    /// Polls the container once, recording its exit if it has ended.
    fn poll(&self, handle: &ContainerHandle) -> Result<Poll, DriverError> {
        let mut entries = self.lock()?;
        let entry = entries.get_mut(handle.id()).ok_or_else(|| not_found(handle))?;
        match &mut entry.state {
            State::Created => Err(DriverError::NotStarted {
                id: handle.id().to_owned(),
            }),
            State::Exited(status) => Ok(Poll::Exited(*status)),
            State::Running(child) => {
                let waited = child
                    .try_wait()
                    .map_err(|source| DriverError::io(format!("waiting for {handle}"), source))?;
                match waited {
                    Some(status) => {
                        let status = ExitStatus::from(status);
                        entry.state = State::Exited(status);
                        debug!(
                            target: EXECDRIVER_TARGET,
                            container = %handle,
                            status = %status,
                            "container exited"
                        );
                        Ok(Poll::Exited(status))
                    }
                    None => Ok(Poll::Running(child.id())),
                }
            }
        }
    }

    pub(super) fn wait(&self, handle: &ContainerHandle) -> Result<ExitStatus, DriverError> {
        loop {
            if let Poll::Exited(status) = self.poll(handle)? {
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Asks a running container to stop, then kills it once `grace` has
    /// elapsed.
    pub(super) fn stop<F>(
        &self,
        handle: &ContainerHandle,
        grace: Duration,
        request_stop: F,
    ) -> Result<ExitStatus, DriverError>
    where
        F: FnOnce(&ContainerSpec, u32) -> Result<(), DriverError>,
    {
        let pid = match self.poll(handle)? {
            Poll::Exited(status) => return Ok(status),
            Poll::Running(pid) => pid,
        };
        let spec = self.spec(handle)?;
        if let Err(error) = request_stop(&spec, pid) {
            warn!(
                target: EXECDRIVER_TARGET,
                container = %handle,
                error = %error,
                "graceful stop request failed; killing container"
            );
            return self.kill(handle);
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if let Poll::Exited(status) = self.poll(handle)? {
                return Ok(status);
            }
            thread::sleep(POLL_INTERVAL);
        }
        warn!(
            target: EXECDRIVER_TARGET,
            container = %handle,
            grace_ms = grace.as_millis(),
            "container ignored stop request; killing"
        );
        self.kill(handle)
    }

    fn kill(&self, handle: &ContainerHandle) -> Result<ExitStatus, DriverError> {
        let mut entries = self.lock()?;
        let entry = entries.get_mut(handle.id()).ok_or_else(|| not_found(handle))?;
        let status = match &mut entry.state {
            State::Created => {
                return Err(DriverError::NotStarted {
                    id: handle.id().to_owned(),
                });
            }
            State::Exited(status) => return Ok(*status),
            State::Running(child) => {
                // The child may have exited between polls; kill then reports
                // InvalidInput and wait still reaps it.
                if let Err(error) = child.kill() {
                    debug!(
                        target: EXECDRIVER_TARGET,
                        container = %handle,
                        error = %error,
                        "kill failed"
                    );
                }
                let status = child
                    .wait()
                    .map_err(|source| DriverError::io(format!("reaping {handle}"), source))?;
                ExitStatus::from(status)
            }
        };
        entry.state = State::Exited(status);
        Ok(status)
    }

    pub(super) fn running(&self) -> Vec<ContainerHandle> {
        let Ok(entries) = self.lock() else {
            return Vec::new();
        };
        let mut handles: Vec<ContainerHandle> = entries
            .iter()
            .filter(|(_, entry)| matches!(entry.state, State::Running(_)))
            .map(|(id, _)| ContainerHandle::new(id.clone()))
            .collect();
        handles.sort_by(|left, right| left.id().cmp(right.id()));
        handles
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, DriverError> {
        self.entries
            .lock()
            .map_err(|_| DriverError::poisoned("process table"))
    }
}

enum Poll {
    Running(u32),
    Exited(ExitStatus),
}

fn not_found(handle: &ContainerHandle) -> DriverError {
    DriverError::NotFound {
        id: handle.id().to_owned(),
    }
}
