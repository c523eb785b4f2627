//! The command registry and dispatch entry point.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::env::Env;
use crate::errors::{EngineError, HandlerError, JobError};
use crate::handler::Handler;
use crate::job::Job;
use crate::shutdown::{self, ShutdownHook, ShutdownReport};
use crate::{COMMANDS_COMMAND, SHUTDOWN_COMMAND};

pub(crate) const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Default bound on how long shutdown waits for in-flight jobs.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide command registry.
///
/// `Engine` is a cheap handle over shared state: clone it to give each
/// subsystem access to the same registry.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    handlers: RwLock<HashMap<String, Registration>>,
    env: RwLock<Env>,
    hooks: Mutex<Vec<ShutdownHook>>,
    shutting_down: AtomicBool,
    in_flight: Mutex<usize>,
    drained: Condvar,
    drain_timeout: Duration,
}

#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) tracked: bool,
}

impl Engine {
    /// Creates an engine with the built-in `commands` and `shutdown` commands.
    #[must_use]
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    /// Creates an engine whose shutdown waits at most `drain_timeout` for
    /// in-flight jobs before running teardown hooks.
    #[must_use]
    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        let mut handlers: HashMap<String, Registration> = HashMap::new();
        handlers.insert(
            COMMANDS_COMMAND.to_owned(),
            Registration {
                handler: Arc::new(list_commands),
                tracked: true,
            },
        );
        // The shutdown command waits for in-flight jobs, so it must not count
        // itself among them.
        handlers.insert(
            SHUTDOWN_COMMAND.to_owned(),
            Registration {
                handler: Arc::new(run_shutdown),
                tracked: false,
            },
        );
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(handlers),
                env: RwLock::new(Env::new()),
                hooks: Mutex::new(Vec::new()),
                shutting_down: AtomicBool::new(false),
                in_flight: Mutex::new(0),
                drained: Condvar::new(),
                drain_timeout,
            }),
        }
    }

    /// Binds `handler` to the command `name`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::AlreadyRegistered`] when the name is taken (the
    /// existing binding is left untouched) and
    /// [`EngineError::ShuttingDown`] once shutdown has begun.
    pub fn register<H>(&self, name: impl Into<String>, handler: H) -> Result<(), EngineError>
    where
        H: Handler + 'static,
    {
        let name = name.into();
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown { name });
        }
        let mut handlers = self
            .inner
            .handlers
            .write()
            .map_err(|_| EngineError::poisoned("handler table"))?;
        if handlers.contains_key(&name) {
            warn!(target: ENGINE_TARGET, command = %name, "duplicate registration rejected");
            return Err(EngineError::AlreadyRegistered { name });
        }
        debug!(target: ENGINE_TARGET, command = %name, "command registered");
        handlers.insert(
            name,
            Registration {
                handler: Arc::new(handler),
                tracked: true,
            },
        );
        Ok(())
    }

    /// Returns `true` when a handler is bound to `name`.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.inner
            .handlers
            .read()
            .map(|handlers| handlers.contains_key(name))
            .unwrap_or(false)
    }

    /// Registered command names in lexical order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .handlers
            .read()
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Creates a job bound to `name`.
    ///
    /// The handler is not resolved until the job runs. The job's environment
    /// starts as a copy of the engine-wide environment.
    pub fn job<I, S>(&self, name: impl Into<String>, args: I) -> Job
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let env = self
            .inner
            .env
            .read()
            .map(|env| env.clone())
            .unwrap_or_default();
        Job::new(
            self.clone(),
            name.into(),
            args.into_iter().map(Into::into).collect(),
            env,
        )
    }

    /// Stores a cross-cutting setting inherited by every job created afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] when the environment lock is poisoned.
    pub fn setenv(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), EngineError> {
        let mut env = self
            .inner
            .env
            .write()
            .map_err(|_| EngineError::poisoned("environment"))?;
        env.set(key, value);
        Ok(())
    }

    /// Reads a cross-cutting setting.
    #[must_use]
    pub fn getenv(&self, key: &str) -> Option<String> {
        self.inner
            .env
            .read()
            .ok()
            .and_then(|env| env.get(key).map(str::to_owned))
    }

    /// Registers a teardown hook run by [`Engine::shutdown`].
    ///
    /// Hooks run in reverse registration order so that subsystems are torn
    /// down in the opposite order to the one in which they came up.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShuttingDown`] once shutdown has begun; the
    /// caller still owns the resource and must release it itself.
    pub fn on_shutdown<F>(&self, name: impl Into<String>, hook: F) -> Result<(), EngineError>
    where
        F: FnOnce() -> Result<(), HandlerError> + Send + 'static,
    {
        let name = name.into();
        let mut hooks = self
            .inner
            .hooks
            .lock()
            .map_err(|_| EngineError::poisoned("shutdown hooks"))?;
        // Checked under the hook lock so a hook cannot slip in after shutdown
        // has taken the list.
        if self.is_shutting_down() {
            return Err(EngineError::ShuttingDown { name });
        }
        debug!(target: ENGINE_TARGET, hook = %name, "shutdown hook registered");
        hooks.push(ShutdownHook::new(name, hook));
        Ok(())
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Tears down every subsystem that registered a hook.
    ///
    /// Only the first call performs teardown; later calls return an empty
    /// report flagged with [`ShutdownReport::already_shut_down`]. Safe to
    /// call before boot finishes: only hooks registered so far are run.
    pub fn shutdown(&self) -> ShutdownReport {
        let hooks = {
            let mut hooks = match self.inner.hooks.lock() {
                Ok(hooks) => hooks,
                Err(poisoned) => poisoned.into_inner(),
            };
            if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
                return ShutdownReport::already_shut_down_report();
            }
            std::mem::take(&mut *hooks)
        };

        info!(
            target: ENGINE_TARGET,
            hooks = hooks.len(),
            "engine shutdown started"
        );
        let drained = self.wait_for_in_flight();
        let report = shutdown::run_hooks(hooks, drained);
        info!(
            target: ENGINE_TARGET,
            attempted = report.attempted().len(),
            failed = report.failures().len(),
            drained,
            "engine shutdown completed"
        );
        report
    }

    pub(crate) fn resolve(&self, name: &str) -> Result<Registration, JobError> {
        if self.is_shutting_down() {
            return Err(JobError::ShuttingDown {
                name: name.to_owned(),
            });
        }
        let handlers = self.inner.handlers.read().map_err(|_| JobError::Internal {
            message: "handler table lock poisoned".to_owned(),
        })?;
        handlers
            .get(name)
            .cloned()
            .ok_or_else(|| JobError::UnknownCommand {
                name: name.to_owned(),
            })
    }

    pub(crate) fn begin_job(&self, name: &str) -> Result<InFlightGuard, JobError> {
        let mut count = self.inner.in_flight.lock().map_err(|_| JobError::Internal {
            message: "in-flight counter lock poisoned".to_owned(),
        })?;
        // Re-check under the counter lock: shutdown flips the flag before it
        // starts waiting, so a job admitted here is always waited for.
        if self.is_shutting_down() {
            return Err(JobError::ShuttingDown {
                name: name.to_owned(),
            });
        }
        *count += 1;
        Ok(InFlightGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    fn wait_for_in_flight(&self) -> bool {
        let deadline = Instant::now() + self.inner.drain_timeout;
        let mut count = match self.inner.in_flight.lock() {
            Ok(count) => count,
            Err(poisoned) => poisoned.into_inner(),
        };
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    target: ENGINE_TARGET,
                    in_flight = *count,
                    "in-flight jobs still running after drain timeout"
                );
                return false;
            }
            count = match self.inner.drained.wait_timeout(count, deadline - now) {
                Ok((count, _)) => count,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("commands", &self.commands())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Decrements the in-flight counter when a tracked job finishes.
pub(crate) struct InFlightGuard {
    inner: Arc<Inner>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = match self.inner.in_flight.lock() {
            Ok(count) => count,
            Err(poisoned) => poisoned.into_inner(),
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.inner.drained.notify_all();
        }
    }
}

fn list_commands(job: &mut Job) -> Result<(), HandlerError> {
    for name in job.engine().commands() {
        job.write_stdout(&name);
    }
    Ok(())
}

fn run_shutdown(job: &mut Job) -> Result<(), HandlerError> {
    let report = job.engine().shutdown();
    if report.already_shut_down() {
        job.write_stdout("engine already shut down");
        return Ok(());
    }
    for name in report.attempted() {
        job.write_stdout(&format!("teardown {name}"));
    }
    for failure in report.failures() {
        job.write_stderr(&format!("teardown {} failed: {}", failure.hook, failure.error));
    }
    Ok(())
}
