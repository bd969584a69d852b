//! Subprocess execution for the external login helper.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{FleetError, Result};

/// Output from a helper command.
#[derive(Debug)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CliOutput {
    /// Check if command succeeded (exit code 0).
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run a command with a timeout, capturing stdout and stderr.
///
/// Every failure is reported as [`FleetError::Acquisition`]; the helper is
/// only ever used to obtain credentials.
///
/// # Errors
///
/// Returns error if the command cannot be spawned, its output cannot be
/// read, or it runs past `timeout_duration` (the child is killed).
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout_duration: Duration,
) -> Result<CliOutput> {
    run_command_with_env(program, args, &[], timeout_duration).await
}

/// [`run_command`] with extra environment variables for the child.
///
/// # Errors
/// Same as [`run_command`].
pub async fn run_command_with_env(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    timeout_duration: Duration,
) -> Result<CliOutput> {
    let mut child = Command::new(program)
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FleetError::Acquisition(format!("login helper not found: {program}"))
            } else {
                FleetError::Acquisition(format!("failed to start {program}: {e}"))
            }
        })?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let result = timeout(timeout_duration, async {
        // Drain both pipes concurrently so a chatty child cannot fill one
        // pipe buffer while we block on the other.
        let stdout_handle = async {
            let mut stdout = String::new();
            if let Some(mut out) = stdout_pipe {
                out.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(stdout)
        };

        let stderr_handle = async {
            let mut stderr = String::new();
            if let Some(mut err) = stderr_pipe {
                err.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(stderr)
        };

        let (stdout_result, stderr_result) = tokio::join!(stdout_handle, stderr_handle);
        let stdout = stdout_result?;
        let stderr = stderr_result?;

        let status = child.wait().await?;

        Ok::<_, std::io::Error>(CliOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    })
    .await;

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(FleetError::Acquisition(format!("{program}: {e}"))),
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            Err(FleetError::Acquisition(format!(
                "{program} timed out after {}s",
                timeout_duration.as_secs()
            )))
        }
    }
}
