//! Remote command execution
//!
//! Runs one-shot commands on the shared session and turns their exit status
//! into a `Result`. Used by the telemetry sampler and the archive builder.

use futures::future::join_all;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::RemoteSession;

/// Run `command` and return its trimmed stdout.
///
/// Succeeds only on exit code 0; anything else becomes
/// [`Error::CommandFailed`] carrying the captured stderr.
pub async fn execute(session: &dyn RemoteSession, command: &str) -> Result<String> {
    debug!(command, "Executing remote command");
    let output = session.exec(command).await?;

    match output.exit_status {
        Some(0) => Ok(String::from_utf8_lossy(&output.stdout).trim().to_string()),
        status => {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(Error::CommandFailed {
                exit_code: status.map_or(-1, i64::from),
                stderr: if stderr.is_empty() {
                    "no output".to_string()
                } else {
                    stderr
                },
            })
        }
    }
}

/// Run a batch of commands concurrently.
///
/// Each command fails independently: a failure is logged and replaced by an
/// empty string, so the batch itself never fails. Results keep the input
/// order.
pub async fn execute_batch(session: &dyn RemoteSession, commands: &[&str]) -> Vec<String> {
    let runs = commands.iter().map(|command| async move {
        match execute(session, command).await {
            Ok(out) => out,
            Err(e) => {
                debug!(command, error = %e, "Batch command failed, substituting empty output");
                String::new()
            }
        }
    });
    join_all(runs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSession;

    #[tokio::test]
    async fn test_execute_success_trims_stdout() {
        let session = FakeSession::new();
        session.respond("echo hi", "  hi\n", "", Some(0));

        let out = execute(&session, "echo hi").await.unwrap();
        assert_eq!(out, "hi");
    }

    #[tokio::test]
    async fn test_execute_nonzero_carries_stderr() {
        let session = FakeSession::new();
        session.respond("false", "", "boom\n", Some(3));

        match execute(&session, "false").await {
            Err(Error::CommandFailed { exit_code, stderr }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_empty_stderr_reported_as_no_output() {
        let session = FakeSession::new();
        session.respond("exit 1", "", "", Some(1));

        let err = execute(&session, "exit 1").await.unwrap_err();
        assert!(err.to_string().contains("no output"));
    }

    #[tokio::test]
    async fn test_execute_missing_exit_status_fails() {
        let session = FakeSession::new();
        session.respond("hang", "partial", "", None);

        match execute(&session, "hang").await {
            Err(Error::CommandFailed { exit_code, .. }) => assert_eq!(exit_code, -1),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_substitutes_failures() {
        let session = FakeSession::new();
        session.respond("nproc", "4", "", Some(0));
        session.respond("lscpu", "", "not found", Some(127));

        let results = execute_batch(&session, &["nproc", "lscpu", "unknown"]).await;
        assert_eq!(results, vec!["4".to_string(), String::new(), String::new()]);
    }
}
