//! Subprocess execution with multiplexed output capture.
//!
//! Every spawned command gets dedicated reader tasks that drain its pipes
//! line-by-line and forward the decoded lines to a single writer, which fans
//! them out to every registered sink: the in-memory capture buffer always,
//! plus optionally an append-mode log file and the console. Draining is
//! decoupled from process lifetime so a full pipe never blocks the child,
//! and the runner waits for the readers to finish flushing before returning,
//! so fast-exiting processes lose no output.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{OrchestratorError, Result};

/// Options controlling a single command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Merge stderr into the captured output stream.
    pub capture_stderr: bool,

    /// Replacement environment for the child; inherits when `None`.
    pub environment: Option<HashMap<String, String>>,

    /// Append every output line to this file.
    pub log_path: Option<PathBuf>,

    /// Echo every output line to the console.
    pub echo: bool,
}

fn format_command(cmd: &[String]) -> String {
    cmd.join(" ")
}

/// Lines are decoded lossily: invalid bytes become replacement characters
/// instead of stopping the drain, which would truncate the capture and let a
/// still-writing child fill its pipe.
fn spawn_line_reader<R>(stream: R, tx: mpsc::Sender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::new();

        loop {
            raw.clear();
            match reader.read_until(b'\n', &mut raw).await {
                Ok(0) => break,
                Ok(_) => {
                    if raw.last() == Some(&b'\n') {
                        raw.pop();
                        if raw.last() == Some(&b'\r') {
                            raw.pop();
                        }
                    }
                    let line = String::from_utf8_lossy(&raw).into_owned();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                // A genuine pipe error; nothing left to drain.
                Err(_) => break,
            }
        }
    })
}

/// Run a command and return its captured output.
///
/// Fails with `CommandFailed` (carrying the command line, cwd, exit code and
/// captured output) when the process exits non-zero.
pub async fn run(cmd: &[String], cwd: &Path, opts: ExecOptions) -> Result<String> {
    if cmd.is_empty() {
        return Err(OrchestratorError::Internal(
            "cannot run an empty command".to_string(),
        ));
    }

    // The log sink is opened before the child exists so an unwritable log
    // location never leaves a spawned process behind.
    let mut log_file = match &opts.log_path {
        Some(path) => Some(
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?,
        ),
        None => None,
    };

    let mut command = Command::new(&cmd[0]);
    command
        .args(&cmd[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(if opts.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });

    if let Some(env) = &opts.environment {
        command.env_clear().envs(env);
    }

    let mut child = command.spawn()?;

    let stdout = child.stdout.take().ok_or_else(|| {
        OrchestratorError::Internal("child stdout pipe missing".to_string())
    })?;

    let (tx, mut rx) = mpsc::channel::<String>(256);
    let mut readers = vec![spawn_line_reader(stdout, tx.clone())];

    if opts.capture_stderr {
        let stderr = child.stderr.take().ok_or_else(|| {
            OrchestratorError::Internal("child stderr pipe missing".to_string())
        })?;
        readers.push(spawn_line_reader(stderr, tx.clone()));
    }

    // The writer below terminates when all senders are dropped.
    drop(tx);

    // Single writer fanning each line out to every sink. A failing log sink
    // stops the log, not the drain: the child is always drained and reaped
    // before any sink error is surfaced.
    let mut buffer = String::new();
    let mut sink_error: Option<std::io::Error> = None;

    while let Some(line) = rx.recv().await {
        buffer.push_str(&line);
        buffer.push('\n');

        if sink_error.is_none() {
            if let Some(file) = log_file.as_mut() {
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    sink_error = Some(e);
                } else if let Err(e) = file.write_all(b"\n").await {
                    sink_error = Some(e);
                }
            }
        }

        if opts.echo {
            println!("{line}");
        }
    }

    if sink_error.is_none() {
        if let Some(file) = log_file.as_mut() {
            if let Err(e) = file.flush().await {
                sink_error = Some(e);
            }
        }
    }

    for reader in readers {
        let _ = reader.await;
    }

    let status = child.wait().await?;

    if !status.success() {
        return Err(OrchestratorError::CommandFailed {
            command: format_command(cmd),
            cwd: cwd.to_path_buf(),
            exit_code: status.code().unwrap_or(-1),
            output: buffer,
        });
    }

    if let Some(e) = sink_error {
        return Err(e.into());
    }

    Ok(buffer)
}

/// Run a command, discarding all output, and return its exit code.
///
/// Never fails: spawn errors map to a non-zero code. Intended for cheap
/// existence probes.
pub async fn run_simple(
    cmd: &[String],
    cwd: &Path,
    environment: Option<&HashMap<String, String>>,
) -> i32 {
    if cmd.is_empty() {
        return -1;
    }

    let mut command = Command::new(&cmd[0]);
    command
        .args(&cmd[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    if let Some(env) = environment {
        command.env_clear().envs(env);
    }

    match command.status().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(_) => -1,
    }
}

/// Run a command with its output appended to `log_path`.
///
/// The log file handle is opened and closed within this call, so it is
/// released even when the command fails.
pub async fn run_logged(
    cmd: &[String],
    cwd: &Path,
    environment: Option<HashMap<String, String>>,
    log_path: &Path,
    echo: bool,
) -> Result<String> {
    run(
        cmd,
        cwd,
        ExecOptions {
            capture_stderr: false,
            environment,
            log_path: Some(log_path.to_path_buf()),
            echo,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn captures_stdout_in_emission_order() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(
            &sh("echo one; echo two; echo three"),
            dir.path(),
            ExecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(output, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn merges_stderr_when_requested() {
        let dir = tempfile::tempdir().unwrap();

        let opts = ExecOptions {
            capture_stderr: true,
            ..Default::default()
        };
        let output = run(&sh("echo err >&2"), dir.path(), opts).await.unwrap();
        assert_eq!(output, "err\n");

        // Without the flag, stderr is discarded.
        let output = run(&sh("echo err >&2"), dir.path(), ExecOptions::default())
            .await
            .unwrap();
        assert_eq!(output, "");
    }

    #[tokio::test]
    async fn nonzero_exit_carries_code_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(&sh("echo boom; exit 7"), dir.path(), ExecOptions::default())
            .await
            .unwrap_err();

        match err {
            OrchestratorError::CommandFailed {
                exit_code, output, cwd, ..
            } => {
                assert_eq!(exit_code, 7);
                assert_eq!(output, "boom\n");
                assert_eq!(cwd, dir.path());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fast_exit_loses_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(
            &sh("for i in $(seq 1 200); do echo line-$i; done"),
            dir.path(),
            ExecOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(output.lines().count(), 200);
        assert!(output.ends_with("line-200\n"));
    }

    #[tokio::test]
    async fn invalid_utf8_never_stops_the_drain() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(
            &sh("printf 'before\\n'; printf '\\377\\376\\n'; printf 'after\\n'"),
            dir.path(),
            ExecOptions::default(),
        )
        .await
        .unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "before");
        assert_eq!(lines[2], "after");
        assert!(lines[1].contains('\u{FFFD}'));
    }

    #[tokio::test]
    async fn unwritable_log_location_fails_without_running_the_command() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("missing").join("cmd.log");
        let marker = dir.path().join("ran");

        let err = run_logged(
            &sh(&format!("touch {}", marker.display())),
            dir.path(),
            None,
            &log,
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OrchestratorError::Io(_)));
        assert!(!marker.exists(), "command ran despite unopenable log sink");
    }

    #[tokio::test]
    async fn run_simple_reports_exit_code_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(run_simple(&sh("exit 0"), dir.path(), None).await, 0);
        assert_eq!(run_simple(&sh("exit 3"), dir.path(), None).await, 3);
        assert_ne!(
            run_simple(&["no-such-binary-anywhere".to_string()], dir.path(), None).await,
            0
        );
    }

    #[tokio::test]
    async fn run_logged_appends_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("cmd.log");

        run_logged(&sh("echo first"), dir.path(), None, &log, false)
            .await
            .unwrap();
        run_logged(&sh("echo second"), dir.path(), None, &log, false)
            .await
            .unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "first\nsecond\n");
    }

    #[tokio::test]
    async fn run_logged_keeps_partial_log_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("cmd.log");

        let err = run_logged(&sh("echo partial; exit 1"), dir.path(), None, &log, false)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CommandFailed { .. }));

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(contents, "partial\n");
    }

    #[tokio::test]
    async fn custom_environment_replaces_inherited() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("MARKER".to_string(), "custom-value".to_string());
        env.insert("PATH".to_string(), std::env::var("PATH").unwrap_or_default());

        let opts = ExecOptions {
            environment: Some(env),
            ..Default::default()
        };
        let output = run(&sh("echo $MARKER"), dir.path(), opts).await.unwrap();
        assert_eq!(output, "custom-value\n");
    }
}
