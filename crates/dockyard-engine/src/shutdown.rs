//! Teardown hook bookkeeping.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::engine::ENGINE_TARGET;
use crate::errors::HandlerError;

type HookFn = Box<dyn FnOnce() -> Result<(), HandlerError> + Send>;

pub(crate) struct ShutdownHook {
    name: String,
    hook: HookFn,
}

impl ShutdownHook {
    pub(crate) fn new<F>(name: String, hook: F) -> Self
    where
        F: FnOnce() -> Result<(), HandlerError> + Send + 'static,
    {
        Self {
            name,
            hook: Box::new(hook),
        }
    }
}

/// A teardown hook that failed or panicked.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Name under which the hook was registered.
    pub hook: String,
    /// Failure reported by the hook.
    pub error: HandlerError,
}

/// Outcome of [`Engine::shutdown`](crate::Engine::shutdown).
#[derive(Debug, Default)]
pub struct ShutdownReport {
    attempted: Vec<String>,
    failures: Vec<TeardownFailure>,
    drained: bool,
    already_shut_down: bool,
}

impl ShutdownReport {
    pub(crate) fn already_shut_down_report() -> Self {
        Self {
            drained: true,
            already_shut_down: true,
            ..Self::default()
        }
    }

    /// Hooks that were run, in execution order.
    #[must_use]
    pub fn attempted(&self) -> &[String] {
        self.attempted.as_slice()
    }

    /// Hooks that failed.
    #[must_use]
    pub fn failures(&self) -> &[TeardownFailure] {
        self.failures.as_slice()
    }

    /// `false` when in-flight jobs were still running at the drain deadline.
    #[must_use]
    pub fn drained(&self) -> bool {
        self.drained
    }

    /// `true` when an earlier call already performed teardown.
    #[must_use]
    pub fn already_shut_down(&self) -> bool {
        self.already_shut_down
    }

    /// `true` when every hook succeeded and in-flight jobs drained in time.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.drained
    }
}

/// Runs `hooks` newest first, continuing past failures.
pub(crate) fn run_hooks(hooks: Vec<ShutdownHook>, drained: bool) -> ShutdownReport {
    let mut report = ShutdownReport {
        drained,
        ..ShutdownReport::default()
    };
    for ShutdownHook { name, hook } in hooks.into_iter().rev() {
        debug!(target: ENGINE_TARGET, hook = %name, "running teardown hook");
        let outcome = panic::catch_unwind(AssertUnwindSafe(hook)).unwrap_or_else(|payload| {
            Err(HandlerError::new(format!(
                "teardown hook panicked: {}",
                panic_message(payload.as_ref())
            )))
        });
        if let Err(error) = outcome {
            warn!(
                target: ENGINE_TARGET,
                hook = %name,
                error = %error,
                "teardown hook failed"
            );
            report.failures.push(TeardownFailure {
                hook: name.clone(),
                error,
            });
        }
        report.attempted.push(name);
    }
    report
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
