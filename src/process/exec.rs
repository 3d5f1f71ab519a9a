//! Bounded execution of short-lived tool commands.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::{Duration, Instant};

use tokio::process::Command;

use super::ProcessError;

/// Maximum stderr bytes embedded in error messages.
pub(crate) const MAX_STDERR_BYTES: usize = 512;

/// Printable form of a command line, for logs and errors.
pub(crate) fn display_command(binary: &Path, args: &[String]) -> String {
    let mut line = binary.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Run `binary args` in `cwd` to completion and return its output.
///
/// Non-zero exits become [`ProcessError::ToolInvocation`] carrying the
/// truncated stderr. Exceeding `timeout` kills the child and is reported as a
/// tool failure; callers that need a distinct timeout error map it themselves
/// via [`run_with_deadline`].
pub(crate) async fn run_tool(
    binary: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<Output, ProcessError> {
    let command = display_command(binary, args);
    match run_with_deadline(binary, args, cwd, timeout).await? {
        Some(output) => Ok(output),
        None => Err(ProcessError::tool(
            command,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}

/// Like [`run_tool`] but returns `Ok(None)` when the deadline elapses.
pub(crate) async fn run_with_deadline(
    binary: &Path,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<Option<Output>, ProcessError> {
    let command = display_command(binary, args);

    let mut cmd = Command::new(binary);
    cmd.args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let start = Instant::now();
    let child = cmd
        .spawn()
        .map_err(|e| ProcessError::io(command.clone(), e))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| ProcessError::io(command.clone(), e))?,
        Err(_) => {
            tracing::warn!("{} timed out after {}s", command, timeout.as_secs());
            return Ok(None);
        }
    };

    tracing::debug!(
        "{} finished in {}ms (ok={})",
        command,
        start.elapsed().as_millis(),
        output.status.success()
    );

    if !output.status.success() {
        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".into());
        return Err(ProcessError::tool(
            command,
            format!("exited with code {}: {}", code, truncated_stderr(&output.stderr)),
        ));
    }

    Ok(Some(output))
}

fn truncated_stderr(stderr: &[u8]) -> String {
    let bytes = &stderr[..stderr.len().min(MAX_STDERR_BYTES)];
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn display_command_joins_args() {
        let line = display_command(
            &PathBuf::from("odo"),
            &["describe".to_string(), "component".to_string()],
        );
        assert_eq!(line, "odo describe component");
    }

    #[test]
    fn stderr_is_truncated() {
        let long = vec![b'x'; 2000];
        assert_eq!(truncated_stderr(&long).len(), MAX_STDERR_BYTES);
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let result = run_tool(
            &PathBuf::from("/nonexistent/odo-binary-12345"),
            &[],
            &std::env::temp_dir(),
            Duration::from_secs(5),
        )
        .await;
        assert!(matches!(result, Err(ProcessError::Io { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_tool_failure() {
        let result = run_tool(
            &PathBuf::from("sh"),
            &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            &std::env::temp_dir(),
            Duration::from_secs(5),
        )
        .await;
        match result {
            Err(ProcessError::ToolInvocation { reason, .. }) => {
                assert!(reason.contains("code 3"));
                assert!(reason.contains("boom"));
            }
            other => panic!("expected tool failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deadline_returns_none() {
        let result = run_with_deadline(
            &PathBuf::from("sh"),
            &["-c".to_string(), "sleep 5".to_string()],
            &std::env::temp_dir(),
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }
}
