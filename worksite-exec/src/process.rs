//! Shell command execution.
//!
//! Every infra, agent and `run` command is an opaque string handed to the
//! platform shell with the workspace as its working directory. A non-zero
//! exit is a normal result, not an error; only a failed spawn or an expired
//! timeout is.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::ExecError;
use crate::shell::shell_invocation;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to keep reading after the shell exits. A process the command
/// backgrounded inherits the pipes and can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Where the child's stdout/stderr go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Collect into [`CommandOutput`].
    #[default]
    Capture,
    /// Share the caller's terminal (stdin included).
    Inherit,
}

/// A command string plus everything needed to run it.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    pub command: String,
    pub working_dir: PathBuf,
    /// Layered over the inherited environment.
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    pub output: OutputMode,
}

impl ShellCommand {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            timeout: None,
            output: OutputMode::Capture,
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn output(mut self, mode: OutputMode) -> Self {
        self.output = mode;
        self
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `128 + signal` for a child killed by a signal.
    pub exit_code: i32,
    /// Empty in [`OutputMode::Inherit`].
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The most useful single line of stderr for an error message.
    pub fn error_line(&self) -> String {
        best_error_line(&self.stderr)
    }
}

/// Spawns shell commands. Cheap to clone; holds only the shell choice.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    shell: Option<String>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `shell` instead of the platform default.
    pub fn with_shell(shell: Option<String>) -> Self {
        Self { shell }
    }

    pub fn run(&self, cmd: &ShellCommand) -> Result<CommandOutput, ExecError> {
        let (program, flag) = shell_invocation(self.shell.as_deref());
        tracing::debug!(
            "running `{}` in {} via {program}",
            cmd.command,
            cmd.working_dir.display()
        );

        let mut command = Command::new(&program);
        command
            .arg(flag)
            .arg(&cmd.command)
            .current_dir(&cmd.working_dir)
            .envs(&cmd.env);
        match cmd.output {
            OutputMode::Capture => {
                command
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            OutputMode::Inherit => {
                command
                    .stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
        }

        let mut child = command.spawn().map_err(|source| ExecError::SpawnFailed {
            program: program.clone(),
            cwd: cmd.working_dir.clone(),
            source,
        })?;

        // Drain pipes on their own threads so a chatty child never blocks on
        // a full pipe while we wait for it.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match cmd.timeout {
            None => child
                .wait()
                .map_err(|e| wait_err(&program, &cmd.working_dir, e))?,
            Some(timeout) => match wait_with_deadline(&mut child, timeout)
                .map_err(|e| wait_err(&program, &cmd.working_dir, e))?
            {
                Some(status) => status,
                None => {
                    // Reader threads are left detached: a grandchild may
                    // still hold the pipes open.
                    tracing::warn!("`{}` timed out after {timeout:?}; killed", cmd.command);
                    return Err(ExecError::CommandTimedOut {
                        command: cmd.command.clone(),
                        timeout,
                    });
                }
            },
        };

        let drain_deadline = Instant::now() + DRAIN_GRACE;
        let output = CommandOutput {
            exit_code: exit_code(status),
            stdout: stdout.map(|d| d.collect(drain_deadline)).unwrap_or_default(),
            stderr: stderr.map(|d| d.collect(drain_deadline)).unwrap_or_default(),
        };
        tracing::debug!("`{}` exited with {}", cmd.command, output.exit_code);
        Ok(output)
    }
}

/// Poll `child` until it exits or `timeout` elapses. On expiry the child is
/// killed and reaped and `None` is returned.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Bytes read so far from one of the child's pipes, plus an end-of-file signal.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    eof: mpsc::Receiver<()>,
}

impl Drain {
    /// Wait for end of file until `deadline`, then take whatever was read.
    fn collect(self, deadline: Instant) -> String {
        let wait = deadline.saturating_duration_since(Instant::now());
        if self.eof.recv_timeout(wait).is_err() {
            tracing::debug!("output pipe still held open by a background process; not waiting");
        }
        let bytes = match self.buf.lock() {
            Ok(buf) => buf.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (tx, eof) = mpsc::channel();
    let sink = Arc::clone(&buf);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => match sink.lock() {
                    Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                    Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                },
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(());
    });
    Drain { buf, eof }
}

fn wait_err(program: &str, cwd: &Path, source: std::io::Error) -> ExecError {
    ExecError::SpawnFailed {
        program: program.to_string(),
        cwd: cwd.to_path_buf(),
        source,
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

/// Whether `bin --version` can be spawned.
pub fn binary_available(bin: &str) -> bool {
    Command::new(bin)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Prefer a line starting with `error:`/`fatal:`, else the last non-empty line.
pub fn best_error_line(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if let Some(line) = lines.iter().find(|line| {
        let lower = line.to_ascii_lowercase();
        lower.starts_with("error:") || lower.starts_with("fatal:")
    }) {
        return (*line).to_string();
    }

    lines
        .last()
        .map(|line| (*line).to_string())
        .unwrap_or_else(|| "unknown error".to_string())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
