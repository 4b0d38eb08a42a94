//! Safe execution layer: run whitelisted commands only.
//! No shell is used; arguments are passed as a list to avoid injection, and the child
//! sees exactly the environment of its invocation (nothing inherited from the gateway).

use async_trait::async_trait;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;

/// Command names the gateway may run. Matching is exact and case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Whitelist {
    commands: IndexSet<String>,
}

impl Whitelist {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
        }
    }

    /// Allow a command name. Duplicates are ignored.
    pub fn allow(&mut self, command: impl Into<String>) {
        self.commands.insert(command.into());
    }

    /// True only for an exact match; `"ls "` is not `"ls"`.
    pub fn is_allowed(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    /// Allowed names in configuration order.
    pub fn commands(&self) -> Vec<&str> {
        self.commands.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// How stdout and stderr are collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// Separate stdout and stderr buffers.
    Split,
    /// Both streams merged into one buffer in arrival order (2>&1).
    Combined,
}

/// Output of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturedOutput {
    Split { stdout: String, stderr: String },
    Combined(String),
}

/// Result of one execution. Spawn errors, non-zero exits, timeouts and cancellation are all `Failure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    Success(CapturedOutput),
    Failure { reason: String },
}

impl ExecOutcome {
    fn failure(reason: impl Into<String>) -> Self {
        ExecOutcome::Failure {
            reason: reason.into(),
        }
    }
}

/// A whitelisted command ready to spawn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreparedCommand {
    pub program: String,
    /// Sanitized argument vector.
    pub args: Vec<String>,
    /// Complete child environment as `KEY=VALUE`; may be empty.
    pub env: Vec<String>,
}

/// Fires when in-flight executions must be abandoned (gateway shutdown, request teardown).
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

/// Sending half of a [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CancelSignal {
    pub fn channel() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx: Some(rx) })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Completes once cancelled. A dropped handle that never cancelled means "never".
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|c| *c).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

/// Runs a prepared command. Implemented by [`ProcessExecutor`]; tests substitute fakes.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        cmd: PreparedCommand,
        mode: CaptureMode,
        cancel: CancelSignal,
    ) -> ExecOutcome;
}

/// Spawns one child process per call with tokio.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    timeout: Option<Duration>,
    verbose: bool,
}

impl ProcessExecutor {
    /// `timeout` of `None` lets the child run until it exits or is cancelled.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            verbose: false,
        }
    }

    /// Log argv and captured output of every run.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        cmd: PreparedCommand,
        mode: CaptureMode,
        mut cancel: CancelSignal,
    ) -> ExecOutcome {
        // Looked up in the gateway's PATH; the child's own environment may not have one.
        let program = match which::which(&cmd.program) {
            Ok(p) => p,
            Err(e) => return ExecOutcome::failure(format!("exec {:?}: {}", cmd.program, e)),
        };

        let mut command = Command::new(&program);
        command
            .args(&cmd.args)
            .env_clear()
            .envs(env_pairs(&cmd.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => return ExecOutcome::failure(format!("exec {:?}: {}", cmd.program, e)),
        };

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping `wait` drops the child, which kills it.
        let wait = collect(child, mode);
        let result = tokio::select! {
            r = wait => r,
            _ = cancel.cancelled() => return ExecOutcome::failure("cancelled"),
            _ = deadline => {
                let limit = self.timeout.unwrap_or_default();
                return ExecOutcome::failure(format!("timed out after {:?}", limit));
            }
        };

        match result {
            Err(e) => ExecOutcome::failure(format!("{}: {}", cmd.program, e)),
            Ok((status, output)) if status.success() => {
                if self.verbose {
                    log::info!(
                        "run {} success: args={:?}, output={:?}",
                        cmd.program,
                        cmd.args,
                        output
                    );
                }
                ExecOutcome::Success(output)
            }
            Ok((status, output)) => {
                if self.verbose {
                    log::info!(
                        "run {} exited with {}: args={:?}, output={:?}",
                        cmd.program,
                        status,
                        cmd.args,
                        output
                    );
                }
                ExecOutcome::failure(status.to_string())
            }
        }
    }
}

/// Split `KEY=VALUE` at the first `=`. Entries without a key are skipped.
fn env_pairs(env: &[String]) -> Vec<(&str, &str)> {
    env.iter()
        .filter_map(|e| {
            let (k, v) = e.split_once('=').unwrap_or((e.as_str(), ""));
            if k.is_empty() {
                None
            } else {
                Some((k, v))
            }
        })
        .collect()
}

async fn collect(child: Child, mode: CaptureMode) -> io::Result<(ExitStatus, CapturedOutput)> {
    match mode {
        CaptureMode::Split => {
            let out = child.wait_with_output().await?;
            Ok((
                out.status,
                CapturedOutput::Split {
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                },
            ))
        }
        CaptureMode::Combined => collect_combined(child).await,
    }
}

/// Read stdout and stderr concurrently into one buffer, then wait for exit.
async fn collect_combined(mut child: Child) -> io::Result<(ExitStatus, CapturedOutput)> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut merged = Vec::new();
    let mut out_buf = [0u8; 8192];
    let mut err_buf = [0u8; 8192];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            n = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                match n? {
                    0 => stdout = None,
                    n => merged.extend_from_slice(&out_buf[..n]),
                }
            }
            n = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                match n? {
                    0 => stderr = None,
                    n => merged.extend_from_slice(&err_buf[..n]),
                }
            }
        }
    }

    let status = child.wait().await?;
    Ok((
        status,
        CapturedOutput::Combined(String::from_utf8_lossy(&merged).into_owned()),
    ))
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize> {
    match reader {
        Some(r) => r.read(buf).await,
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn prepared(program: &str, args: &[&str], env: &[&str]) -> PreparedCommand {
        PreparedCommand {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: env.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn whitelist_is_exact_match() {
        let w = Whitelist::new(["ls", "pwd"]);
        assert!(w.is_allowed("ls"));
        assert!(w.is_allowed("pwd"));
        assert!(!w.is_allowed("ls "));
        assert!(!w.is_allowed("LS"));
        assert!(!w.is_allowed("l"));
        assert!(!Whitelist::new(["ls"]).is_allowed("ls "));
    }

    #[test]
    fn whitelist_ignores_duplicates() {
        let w = Whitelist::new(["echo", "echo", "pwd"]);
        assert_eq!(w.commands(), vec!["echo", "pwd"]);
    }

    #[test]
    fn verbose_is_off_unless_requested() {
        let exec = ProcessExecutor::new(Some(Duration::from_secs(1)));
        assert!(!exec.verbose);
        let exec = exec.with_verbose(true);
        assert!(exec.verbose);
        assert_eq!(exec.timeout, Some(Duration::from_secs(1)));
    }

    #[test]
    fn env_pairs_splits_at_first_equals() {
        let env = vec!["A=b=c".to_string(), "=x".to_string(), "EMPTY".to_string()];
        assert_eq!(env_pairs(&env), vec![("A", "b=c"), ("EMPTY", "")]);
    }

    #[tokio::test]
    async fn split_mode_captures_stdout() {
        let exec = ProcessExecutor::default();
        let outcome = exec
            .execute(prepared("echo", &["hi", "there"], &[]), CaptureMode::Split, CancelSignal::never())
            .await;
        assert_eq!(
            outcome,
            ExecOutcome::Success(CapturedOutput::Split {
                stdout: "hi there\n".to_string(),
                stderr: String::new(),
            })
        );
    }

    #[tokio::test]
    async fn combined_mode_merges_streams() {
        let exec = ProcessExecutor::default();
        let outcome = exec
            .execute(
                prepared("sh", &["-c", "echo out; echo err 1>&2"], &[]),
                CaptureMode::Combined,
                CancelSignal::never(),
            )
            .await;
        let ExecOutcome::Success(CapturedOutput::Combined(text)) = outcome else {
            panic!("expected combined success, got {:?}", outcome);
        };
        assert!(text.contains("out\n"));
        assert!(text.contains("err\n"));
    }

    #[tokio::test]
    async fn child_gets_only_invocation_env() {
        let exec = ProcessExecutor::default();
        let outcome = exec
            .execute(prepared("env", &[], &["FOO=bar"]), CaptureMode::Split, CancelSignal::never())
            .await;
        let ExecOutcome::Success(CapturedOutput::Split { stdout, .. }) = outcome else {
            panic!("expected success, got {:?}", outcome);
        };
        assert_eq!(stdout, "FOO=bar\n");
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let exec = ProcessExecutor::default();
        let outcome = exec
            .execute(prepared("false", &[], &[]), CaptureMode::Split, CancelSignal::never())
            .await;
        assert!(matches!(outcome, ExecOutcome::Failure { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_failure() {
        let exec = ProcessExecutor::default();
        let outcome = exec
            .execute(
                prepared("cligateway-no-such-binary", &[], &[]),
                CaptureMode::Combined,
                CancelSignal::never(),
            )
            .await;
        let ExecOutcome::Failure { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("cligateway-no-such-binary"));
    }

    #[tokio::test]
    async fn timeout_kills_child() {
        let exec = ProcessExecutor::new(Some(Duration::from_millis(200)));
        let started = Instant::now();
        let outcome = exec
            .execute(prepared("sleep", &["5"], &[]), CaptureMode::Split, CancelSignal::never())
            .await;
        assert!(started.elapsed() < Duration::from_secs(3));
        let ExecOutcome::Failure { reason } = outcome else {
            panic!("expected failure");
        };
        assert!(reason.contains("timed out"));
    }

    #[tokio::test]
    async fn cancel_signal_stops_child() {
        let exec = ProcessExecutor::default();
        let (handle, signal) = CancelSignal::channel();
        let started = Instant::now();
        let run = exec.execute(prepared("sleep", &["5"], &[]), CaptureMode::Split, signal);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        };
        let (outcome, _) = tokio::join!(run, cancel);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(outcome, ExecOutcome::failure("cancelled"));
    }

    #[tokio::test]
    async fn dropped_handle_never_cancels() {
        let (handle, signal) = CancelSignal::channel();
        drop(handle);
        assert!(!signal.is_cancelled());
        let mut signal = signal;
        let fired = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(fired.is_err());
    }
}
