//! Sandboxed subprocess execution with stream capture, timeouts and an
//! optional interactive question/answer loop.
//!
//! Mirrors the contract of Cargo's internal process runner (spawn, capture,
//! return a result object the caller inspects) but adds what EasyBuild's
//! build steps need on top: a wall-clock timeout, an inactivity timeout, and
//! pattern-driven answers fed to a child's stdin (for `./configure`-style
//! prompts).

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use regex::Regex;
use thiserror::Error;

/// A question/answer rule for the interactive mode: when `question` matches
/// a freshly-read line of combined output, `answer` is written to the
/// child's stdin. `suppresses_timeout` patterns reset the inactivity clock
/// without requiring an answer (progress markers).
#[derive(Debug, Clone)]
pub struct QaPattern {
    pub question: Regex,
    pub answer: String,
    pub suppresses_timeout: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// `None` value means "unset this variable for the child", mirroring
    /// the environment manager's delta representation.
    pub env: HashMap<String, Option<OsString>>,
    pub timeout: Option<Duration>,
    pub inactivity_timeout: Option<Duration>,
    pub qa: Vec<QaPattern>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        CommandSpec { program: program.into(), ..Default::default() }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env.insert(key.into(), None);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn qa(mut self, pattern: QaPattern) -> Self {
        self.qa.push(pattern);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Raised only when the caller opts into `log_all`-style strictness; `run`
/// itself never raises on a non-zero exit code.
#[derive(Debug, Error)]
#[error("command `{command}` failed with {result:?}")]
pub struct CommandFailed {
    pub command: String,
    pub result: CommandResult,
}

enum ChildEvent {
    Chunk { from_stdout: bool, text: String },
    Eof { from_stdout: bool },
}

/// Run `spec`, always returning a `CommandResult` regardless of exit status.
/// Use [`run_checked`] when a non-zero exit should itself be an error.
pub fn run(spec: &CommandSpec) -> Result<CommandResult> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    if let Some(cwd) = &spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        match value {
            Some(v) => {
                cmd.env(key, v);
            }
            None => {
                cmd.env_remove(key);
            }
        }
    }
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn `{}`", spec.program.to_string_lossy()))?;

    let mut stdin = child.stdin.take();
    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let (tx, rx) = mpsc::channel();
    spawn_reader(stdout, true, tx.clone());
    spawn_reader(stderr, false, tx);

    let mut out_buf = String::new();
    let mut err_buf = String::new();
    let mut pending_line = String::new();
    let mut open_streams = 2;
    let start = Instant::now();
    let mut last_activity = Instant::now();
    let mut timed_out = false;

    loop {
        if open_streams == 0 {
            break;
        }
        if let Some(total) = spec.timeout {
            if start.elapsed() >= total {
                timed_out = true;
                break;
            }
        }
        if let Some(idle) = spec.inactivity_timeout {
            if last_activity.elapsed() >= idle {
                timed_out = true;
                break;
            }
        }

        let wait = Duration::from_millis(200);
        match rx.recv_timeout(wait) {
            Ok(ChildEvent::Chunk { from_stdout, text }) => {
                last_activity = Instant::now();
                if from_stdout {
                    out_buf.push_str(&text);
                } else {
                    err_buf.push_str(&text);
                }
                pending_line.push_str(&text);
                while let Some(idx) = pending_line.find('\n') {
                    let line: String = pending_line.drain(..=idx).collect();
                    handle_line(&line, &spec.qa, &mut stdin, &mut last_activity);
                }
            }
            Ok(ChildEvent::Eof { .. }) => {
                open_streams -= 1;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    if timed_out {
        let _ = child.kill();
        let _ = child.wait();
        return Ok(CommandResult { exit_code: None, stdout: out_buf, stderr: err_buf, timed_out: true });
    }

    let status = child.wait().context("failed to wait on child process")?;
    // Drain anything buffered after the loop's last poll.
    while let Ok(event) = rx.try_recv() {
        if let ChildEvent::Chunk { from_stdout, text } = event {
            if from_stdout {
                out_buf.push_str(&text);
            } else {
                err_buf.push_str(&text);
            }
        }
    }

    Ok(CommandResult {
        exit_code: status.code(),
        stdout: out_buf,
        stderr: err_buf,
        timed_out: false,
    })
}

/// Like [`run`], but turns a non-zero (or missing, e.g. signal-killed) exit
/// code into a [`CommandFailed`] error — the `log_all` policy from the
/// filesystem & command runner contract.
pub fn run_checked(spec: &CommandSpec) -> Result<CommandResult> {
    let result = run(spec)?;
    if result.success() {
        Ok(result)
    } else {
        Err(CommandFailed { command: spec.program.to_string_lossy().into_owned(), result }.into())
    }
}

fn handle_line(
    line: &str,
    patterns: &[QaPattern],
    stdin: &mut Option<impl Write>,
    last_activity: &mut Instant,
) {
    for pattern in patterns {
        if pattern.question.is_match(line) {
            if pattern.suppresses_timeout {
                *last_activity = Instant::now();
            }
            if !pattern.answer.is_empty() {
                if let Some(stdin) = stdin.as_mut() {
                    let _ = writeln!(stdin, "{}", pattern.answer);
                    let _ = stdin.flush();
                }
            }
            return;
        }
    }
}

fn spawn_reader(mut stream: impl Read + Send + 'static, from_stdout: bool, tx: mpsc::Sender<ChildEvent>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(ChildEvent::Eof { from_stdout });
                    break;
                }
                Ok(n) => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx.send(ChildEvent::Chunk { from_stdout, text }).is_err() {
                        break;
                    }
                }
                Err(_) => {
                    let _ = tx.send(ChildEvent::Eof { from_stdout });
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo hello; exit 3");
        let result = run(&spec).unwrap();
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout.trim(), "hello");
        assert!(!result.success());
    }

    #[test]
    fn run_checked_errors_on_nonzero_exit() {
        let spec = CommandSpec::new("sh").arg("-c").arg("exit 1");
        assert!(run_checked(&spec).is_err());
    }

    #[test]
    fn env_overrides_are_applied() {
        let spec = CommandSpec::new("sh").arg("-c").arg("echo $FOO").env("FOO", "bar");
        let result = run(&spec).unwrap();
        assert_eq!(result.stdout.trim(), "bar");
    }

    #[test]
    fn answers_interactive_prompt() {
        let spec = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo 'Continue? [y/n]'; read ans; echo \"got: $ans\"")
            .qa(QaPattern {
                question: Regex::new(r"Continue\?").unwrap(),
                answer: "y".to_string(),
                suppresses_timeout: false,
            });
        let result = run(&spec).unwrap();
        assert!(result.stdout.contains("got: y"));
    }

    #[test]
    fn wall_clock_timeout_kills_child() {
        let spec = CommandSpec::new("sleep").arg("5").timeout(Duration::from_millis(100));
        let result = run(&spec).unwrap();
        assert!(result.timed_out);
        assert!(result.exit_code.is_none());
    }
}
