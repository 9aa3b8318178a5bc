//! Patch and refresh capabilities backed by an external patcher tool.
//!
//! The tool is invoked once per task with `{task}` / `{bundle}` substituted
//! into the configured argument templates. It prints the reference on the
//! first stdout line, either `<bundle>` or `<name> <bundle>`. Exit code 3 or
//! empty output means "unknown task" / "already current".

use std::io::{self, ErrorKind, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pipesync_core::{config::PatcherConfig, task::TaskRef};
use pipesync_engine::{BundleRefresher, CapabilityError, PatchCapability};

const NOT_FOUND_EXIT: i32 = 3;
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone)]
pub struct CommandCapability {
    config: PatcherConfig,
}

impl CommandCapability {
    pub fn new(config: PatcherConfig) -> Self {
        Self { config }
    }

    fn run(
        &self,
        template: &[String],
        task: &str,
        bundle: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CapabilityError> {
        let args: Vec<String> = template
            .iter()
            .map(|a| a.replace("{task}", task).replace("{bundle}", bundle))
            .collect();
        tracing::debug!("running {} {}", self.config.command, args.join(" "));

        let child = Command::new(&self.config.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    CapabilityError::Rejected(format!("'{}' not found", self.config.command))
                }
                _ => CapabilityError::Transport(format!(
                    "failed to start '{}': {e}",
                    self.config.command
                )),
            })?;

        let output = wait_with_timeout(child, timeout)?;
        match output.status.code() {
            Some(0) => {}
            Some(NOT_FOUND_EXIT) => return Ok(None),
            code => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(CapabilityError::Rejected(format!(
                    "exit {}: {}",
                    code.map_or("signal".to_string(), |c| c.to_string()),
                    stderr.trim()
                )));
            }
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string))
    }
}

/// Poll the child until it exits; kill it once `timeout` passes.
///
/// stdout and stderr are drained on reader threads while polling so a chatty
/// tool cannot block on a full pipe.
fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
) -> Result<std::process::Output, CapabilityError> {
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                // Readers finish on their own once the pipes close.
                return Err(CapabilityError::Timeout { after: timeout });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(CapabilityError::Transport(format!("wait failed: {e}"))),
        }
    };

    Ok(std::process::Output {
        status,
        stdout: collect(stdout)?,
        stderr: collect(stderr)?,
    })
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf)?;
        Ok(buf)
    })
}

fn collect(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>, CapabilityError> {
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    reader
        .join()
        .map_err(|_| CapabilityError::Transport("output reader panicked".to_string()))?
        .map_err(|e| CapabilityError::Transport(format!("failed to read output: {e}")))
}

fn parse_reference(line: &str, default_name: &str) -> TaskRef {
    match line.split_once(char::is_whitespace) {
        Some((name, bundle)) => TaskRef::new(name, bundle.trim()),
        None => TaskRef::new(default_name, line),
    }
}

impl PatchCapability for CommandCapability {
    fn resolve(&self, task: &str, timeout: Duration) -> Result<Option<TaskRef>, CapabilityError> {
        let line = self.run(&self.config.resolve_args, task, "", timeout)?;
        Ok(line.map(|l| parse_reference(&l, task)))
    }
}

impl BundleRefresher for CommandCapability {
    fn refresh(
        &self,
        existing: &TaskRef,
        timeout: Duration,
    ) -> Result<Option<TaskRef>, CapabilityError> {
        let line = self.run(
            &self.config.refresh_args,
            &existing.name,
            &existing.bundle,
            timeout,
        )?;
        Ok(line
            .map(|l| parse_reference(&l, &existing.name))
            .filter(|latest| latest != existing))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandCapability {
        CommandCapability::new(PatcherConfig {
            command: "sh".to_string(),
            resolve_args: vec!["-c".to_string(), script.to_string(), "sh".to_string(), "{task}".to_string()],
            refresh_args: vec!["-c".to_string(), script.to_string(), "sh".to_string(), "{bundle}".to_string()],
        })
    }

    const T: Duration = Duration::from_secs(5);

    #[test]
    fn first_line_is_the_bundle() {
        let cap = shell("echo \"q/$1@sha256:abc\"; echo ignored");
        let r = cap.resolve("scan", T).unwrap().unwrap();
        assert_eq!(r, TaskRef::new("scan", "q/scan@sha256:abc"));
    }

    #[test]
    fn name_and_bundle_form() {
        let cap = shell("echo \"sast-snyk-check q/sast@sha256:1\"");
        let r = cap.resolve("scan", T).unwrap().unwrap();
        assert_eq!(r.name, "sast-snyk-check");
        assert_eq!(r.bundle, "q/sast@sha256:1");
    }

    #[test]
    fn exit_three_means_unknown() {
        assert_eq!(shell("exit 3").resolve("scan", T), Ok(None));
    }

    #[test]
    fn other_failures_are_rejections() {
        let err = shell("echo boom >&2; exit 1").resolve("scan", T).unwrap_err();
        assert!(matches!(err, CapabilityError::Rejected(ref m) if m.contains("boom")));
    }

    #[test]
    fn slow_tool_is_killed() {
        let err = shell("sleep 5").resolve("scan", Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, CapabilityError::Timeout { .. }));
    }

    #[test]
    fn large_stderr_does_not_stall_the_tool() {
        let cap = shell("head -c 200000 /dev/zero >&2; echo \"q/$1@sha256:1\"");
        let r = cap.resolve("scan", Duration::from_secs(3)).unwrap().unwrap();
        assert_eq!(r, TaskRef::new("scan", "q/scan@sha256:1"));
    }

    #[test]
    fn refresh_with_same_bundle_is_no_update() {
        let cap = shell("echo \"$1\"");
        let existing = TaskRef::new("git-clone", "q/clone@sha256:1");
        assert_eq!(cap.refresh(&existing, T), Ok(None));
    }

    #[test]
    fn missing_binary_is_rejected() {
        let cap = CommandCapability::new(PatcherConfig {
            command: "/nonexistent/pipeline-patcher".to_string(),
            resolve_args: vec!["{task}".to_string()],
            refresh_args: vec![],
        });
        assert!(matches!(cap.resolve("x", T), Err(CapabilityError::Rejected(_))));
    }
}
