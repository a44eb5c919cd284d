//! External tool invocation.
//!
//! The encoder, PDF assembler, and OCR binary are driven as black boxes.
//! Every invocation runs under a wall-clock timeout; a timeout is treated
//! exactly like a non-zero exit. Callers write tool output to temp paths and
//! rename into place only after [`ToolRunner::run_expecting_output`] confirms
//! the tool produced something.

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;
use crate::storage::LocalStore;

const STDERR_LIMIT: usize = 2000;

pub struct ToolRunner {
    timeout: Duration,
}

impl ToolRunner {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Runs `program` with `args`, waiting for exit or timeout.
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<(), ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {}", program);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::Spawn {
                    program: program.to_string(),
                    source: e,
                })
            }
            Err(_) => {
                return Err(ToolError::TimedOut {
                    program: program.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.len() > STDERR_LIMIT {
                stderr.truncate(STDERR_LIMIT);
            }
            return Err(ToolError::NonZeroExit {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(())
    }

    /// Runs the tool and then verifies it left a non-empty file at `expected`.
    /// Some encoders exit zero while writing nothing; that still counts as
    /// failure.
    pub async fn run_expecting_output<I, S>(
        &self,
        program: &str,
        args: I,
        expected: &Path,
    ) -> Result<(), ToolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run(program, args).await?;

        if !LocalStore::is_nonempty_file(expected) {
            return Err(ToolError::MissingOutput {
                program: program.to_string(),
                path: expected.to_path_buf(),
            });
        }

        Ok(())
    }
}
