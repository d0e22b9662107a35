//! Subprocess plumbing shared by CLI-driven runtimes.

use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::RuntimeError;

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// Run a command to completion, feeding `stdin` if given.
///
/// The child is killed if `cancel` fires first; the call then returns
/// [`RuntimeError::Cancelled`]. A non-zero exit is not an error here, callers
/// inspect [`CommandOutput::status`] and decide how to report it.
pub async fn run_command(
    mut cmd: Command,
    stdin: Option<Vec<u8>>,
    cancel: &CancellationToken,
) -> Result<CommandOutput, RuntimeError> {
    if cancel.is_cancelled() {
        return Err(RuntimeError::Cancelled);
    }
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| RuntimeError::Command {
        program: program.clone(),
        message: e.to_string(),
    })?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        // Written from a separate task so a chatty child cannot deadlock us.
        tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                tracing::debug!(error = %e, "child closed stdin early");
            }
        });
    }

    tracing::debug!(program = %program, pid = ?child.id(), "subprocess started");

    tokio::select! {
        output = child.wait_with_output() => {
            let output = output?;
            tracing::debug!(program = %program, status = %output.status, "subprocess exited");
            Ok(CommandOutput {
                status: output.status,
                stdout: output.stdout,
                stderr: output.stderr,
            })
        }
        () = cancel.cancelled() => {
            tracing::warn!(program = %program, "subprocess killed on cancellation");
            Err(RuntimeError::Cancelled)
        }
    }
}
