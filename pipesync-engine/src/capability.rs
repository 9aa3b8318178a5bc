//! External capabilities: resolving missing tasks and refreshing bundle pins.
//!
//! The engine never talks to a registry or a patcher tool directly. Callers
//! hand in implementations of [`PatchCapability`] and [`BundleRefresher`];
//! every call goes through a [`RetryPolicy`].

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use pipesync_core::{config::RetryConfig, task::TaskRef};

use crate::error::CapabilityError;

/// Resolves a task name to a pinned reference.
pub trait PatchCapability: Send + Sync {
    /// `Ok(None)` means the task is unknown to this capability.
    fn resolve(&self, task: &str, timeout: Duration) -> Result<Option<TaskRef>, CapabilityError>;
}

/// Looks up a newer pin for an existing reference.
pub trait BundleRefresher: Send + Sync {
    /// `Ok(None)` means `existing` is already current.
    fn refresh(&self, existing: &TaskRef, timeout: Duration)
        -> Result<Option<TaskRef>, CapabilityError>;
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

/// Bounded retry with a per-call timeout and fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// One attempt, no backoff.
    pub fn once(timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            timeout,
            backoff: Duration::ZERO,
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// A success that arrives after the timeout is discarded and counted as a
    /// timeout.
    pub fn call<T>(
        &self,
        label: &str,
        mut call: impl FnMut(Duration) -> Result<T, CapabilityError>,
    ) -> Result<T, CapabilityError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let started = Instant::now();
            let result = match call(self.timeout) {
                Ok(_) if started.elapsed() > self.timeout => Err(CapabilityError::Timeout {
                    after: self.timeout,
                }),
                other => other,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::warn!("{label}: attempt {attempt}/{attempts} failed: {err}; retrying");
                    if !self.backoff.is_zero() {
                        thread::sleep(self.backoff);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!("{label}: giving up after {attempt} attempt(s): {err}");
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.attempts,
            timeout: Duration::from_secs(config.timeout_secs),
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory capability
// ---------------------------------------------------------------------------

/// Serves both capabilities from a fixed table keyed by pipeline task name.
///
/// Used for catalog files and in tests. `failing` makes the next `times`
/// lookups of a task fail with the given error.
#[derive(Debug, Default)]
pub struct CannedCapability {
    entries: BTreeMap<String, TaskRef>,
    failures: Mutex<BTreeMap<String, (u32, CapabilityError)>>,
}

impl CannedCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map pipeline task `task` to `task_ref`.
    pub fn with(mut self, task: impl Into<String>, task_ref: TaskRef) -> Self {
        self.entries.insert(task.into(), task_ref);
        self
    }

    pub fn failing(self, task: impl Into<String>, times: u32, err: CapabilityError) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(task.into(), (times, err));
        }
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn injected_failure(&self, key: &str) -> Option<CapabilityError> {
        let mut failures = self.failures.lock().ok()?;
        let (remaining, err) = failures.get_mut(key)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(err.clone())
    }
}

impl PatchCapability for CannedCapability {
    fn resolve(&self, task: &str, _timeout: Duration) -> Result<Option<TaskRef>, CapabilityError> {
        if let Some(err) = self.injected_failure(task) {
            return Err(err);
        }
        Ok(self.entries.get(task).cloned())
    }
}

impl BundleRefresher for CannedCapability {
    fn refresh(
        &self,
        existing: &TaskRef,
        _timeout: Duration,
    ) -> Result<Option<TaskRef>, CapabilityError> {
        if let Some(err) = self.injected_failure(&existing.name) {
            return Err(err);
        }
        let latest = self
            .entries
            .values()
            .find(|r| r.name == existing.name && r.bundle != existing.bundle);
        Ok(latest.cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            timeout: Duration::from_secs(5),
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn transport_faults_are_retried() {
        let calls = Cell::new(0);
        let result = quick(3).call("t", |_| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(CapabilityError::Transport("reset".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn rejections_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick(3).call("t", |_| {
            calls.set(calls.get() + 1);
            Err(CapabilityError::Rejected("no".into()))
        });
        assert!(matches!(result, Err(CapabilityError::Rejected(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn attempts_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = quick(2).call("t", |after| {
            calls.set(calls.get() + 1);
            Err(CapabilityError::Timeout { after })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn late_success_counts_as_timeout() {
        let policy = RetryPolicy::once(Duration::from_millis(1));
        let result = policy.call("t", |_| {
            thread::sleep(Duration::from_millis(20));
            Ok(())
        });
        assert!(matches!(result, Err(CapabilityError::Timeout { .. })));
    }

    #[test]
    fn canned_capability_serves_both_roles() {
        let canned = CannedCapability::new()
            .with("clone", TaskRef::new("git-clone", "quay.io/t/git-clone:0.1@sha256:new"))
            .failing("scan", 1, CapabilityError::Transport("flaky".into()));
        let t = Duration::from_secs(1);

        assert_eq!(canned.resolve("clone", t).unwrap().unwrap().name, "git-clone");
        assert_eq!(canned.resolve("nope", t), Ok(None));
        assert!(canned.resolve("scan", t).is_err());
        assert_eq!(canned.resolve("scan", t), Ok(None));

        let old = TaskRef::new("git-clone", "quay.io/t/git-clone:0.1@sha256:old");
        let fresh = canned.refresh(&old, t).unwrap().unwrap();
        assert_eq!(fresh.digest(), Some("sha256:new"));
        assert_eq!(canned.refresh(&fresh, t), Ok(None));
    }
}
