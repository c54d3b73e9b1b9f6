//! One-shot background build of the bundle.
//!
//! The build has three terminal outcomes: success (bundle becomes servable),
//! failure (placeholder forever), or never completing. There is no retry and
//! no timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::BuildCommand;
use crate::error::ServerError;
use crate::readiness::Readiness;

/// Bytes of stderr kept for the failure log.
const STDERR_TAIL_BYTES: usize = 2_000;

/// Result of a build run that actually started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Exit status zero.
    Succeeded {
        /// Wall-clock duration.
        duration: Duration,
    },
    /// Non-zero exit (or killed by a signal).
    Failed {
        /// Exit code, `None` if terminated by a signal.
        exit_code: Option<i32>,
        /// Tail of stderr.
        stderr_tail: String,
    },
}

/// Runs a build command to completion.
#[async_trait]
pub trait BuildRunner: Send + Sync + 'static {
    /// Run `build` and report how it ended.
    async fn run(&self, build: &BuildCommand) -> Result<BuildOutcome, ServerError>;
}

/// Real subprocess execution backed by `tokio::process::Command`.
pub struct ShellBuildRunner;

#[async_trait]
impl BuildRunner for ShellBuildRunner {
    async fn run(&self, build: &BuildCommand) -> Result<BuildOutcome, ServerError> {
        let start = Instant::now();

        let mut cmd = tokio::process::Command::new("sh");
        let _ = cmd
            .arg("-c")
            .arg(&build.command)
            .current_dir(&build.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(command = %build.command, working_dir = %build.working_dir.display(), "spawning build");

        let child = cmd.spawn().map_err(|source| ServerError::BuildSpawn {
            command: build.command.clone(),
            source,
        })?;
        let output = child.wait_with_output().await?;
        let duration = start.elapsed();

        debug!(
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "build process exited"
        );

        if output.status.success() {
            Ok(BuildOutcome::Succeeded { duration })
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Ok(BuildOutcome::Failed {
                exit_code: output.status.code(),
                stderr_tail: tail(&stderr, STDERR_TAIL_BYTES).to_string(),
            })
        }
    }
}

/// Launch the build in the background and wire its outcome into `readiness`.
///
/// `entry_path` is only checked for a warning; success alone flips the flag.
pub fn spawn_build(
    runner: Arc<dyn BuildRunner>,
    build: BuildCommand,
    readiness: Readiness,
    entry_path: PathBuf,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(command = %build.command, "starting bundle build");
        match runner.run(&build).await {
            Ok(BuildOutcome::Succeeded { duration }) => {
                let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                if !tokio::fs::try_exists(&entry_path).await.unwrap_or(false) {
                    warn!(
                        entry = %entry_path.display(),
                        "build succeeded but entry document is missing"
                    );
                }
                let _ = readiness.mark_ready();
                info!(duration_ms, "bundle build complete, serving app");
            }
            Ok(BuildOutcome::Failed {
                exit_code,
                stderr_tail,
            }) => {
                let _ = readiness.mark_failed();
                error!(?exit_code, stderr = %stderr_tail, "bundle build failed, serving placeholder");
            }
            Err(e) => {
                let _ = readiness.mark_failed();
                error!(error = %e, "bundle build could not run, serving placeholder");
            }
        }
    })
}

/// Last `max` bytes of `s`, moved forward to a char boundary.
fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
