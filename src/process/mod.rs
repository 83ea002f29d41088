//! Process Automation Engine
//!
//! Runs external programs to completion, streaming their output as an
//! ordered event sequence and optionally answering interactive prompts by
//! matching substrings in each stdout chunk as it arrives.

use anyhow::{anyhow, Result};
use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Events emitted by a running process session
#[derive(Debug)]
pub enum ProcessEvent {
    /// A chunk of standard output
    Stdout(String),
    /// A chunk of standard error
    Stderr(String),
    /// The process exited
    Exited(ExitStatus),
}

/// A (required-substring-set, response-line) pair used to automate an
/// interactive program.
///
/// A rule fires when every needle appears somewhere in the chunk just
/// received. Matching carries no memory across chunks: a prompt split over
/// two reads is missed, a repeated chunk answers again.
#[derive(Debug, Clone, Copy)]
pub struct PromptRule {
    pub needles: &'static [&'static str],
    pub response: &'static str,
}

impl PromptRule {
    /// Check whether every required substring appears in the chunk
    pub fn matches(&self, chunk: &str) -> bool {
        self.needles.iter().all(|needle| chunk.contains(needle))
    }
}

/// One external-program invocation with streamed output and writable stdin
pub struct ProcessSession {
    event_rx: mpsc::Receiver<ProcessEvent>,
    stdin: Option<ChildStdin>,
}

impl ProcessSession {
    /// Launch the program with piped stdio and start streaming its output
    pub fn spawn(program: impl AsRef<OsStr>, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (event_tx, event_rx) = mpsc::channel::<ProcessEvent>(64);

        tokio::spawn(async move {
            pump_child(child, stdout, stderr, event_tx).await;
        });

        Ok(Self { event_rx, stdin })
    }

    /// Receive the next event, in arrival order
    pub async fn recv(&mut self) -> Option<ProcessEvent> {
        self.event_rx.recv().await
    }

    /// Write a response line (plus newline) to the process's standard input
    pub async fn respond(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("process stdin is closed"))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

/// Forward both output streams, then the exit status, in that order
async fn pump_child(
    mut child: Child,
    stdout: Option<impl AsyncRead + Unpin + Send + 'static>,
    stderr: Option<impl AsyncRead + Unpin + Send + 'static>,
    event_tx: mpsc::Sender<ProcessEvent>,
) {
    let out_task = stdout.map(|stream| {
        let tx = event_tx.clone();
        tokio::spawn(pump_stream(stream, tx, ProcessEvent::Stdout))
    });
    let err_task = stderr.map(|stream| {
        let tx = event_tx.clone();
        tokio::spawn(pump_stream(stream, tx, ProcessEvent::Stderr))
    });

    if let Some(task) = out_task {
        let _ = task.await;
    }
    if let Some(task) = err_task {
        let _ = task.await;
    }

    match child.wait().await {
        Ok(status) => {
            let _ = event_tx.send(ProcessEvent::Exited(status)).await;
        }
        Err(e) => {
            error!("failed to reap child process: {}", e);
        }
    }
}

async fn pump_stream<R: AsyncRead + Unpin>(
    mut stream: R,
    tx: mpsc::Sender<ProcessEvent>,
    wrap: fn(String) -> ProcessEvent,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(wrap(chunk)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Run an interactive program to completion, answering prompts per the rules.
///
/// Exit 0 yields the accumulated stdout; nonzero yields an error composed
/// from the exit code and accumulated stderr. A launch failure yields the
/// launch error's message. There is no timeout: a hung program hangs the
/// operation.
pub async fn run_interactive(
    operation: &str,
    program: impl AsRef<OsStr>,
    args: &[String],
    rules: &[PromptRule],
) -> Result<String> {
    let mut session = ProcessSession::spawn(program, args)
        .map_err(|e| anyhow!("{} failed to start: {}", operation, e))?;

    let mut stdout_acc = String::new();
    let mut stderr_acc = String::new();

    while let Some(event) = session.recv().await {
        match event {
            ProcessEvent::Stdout(chunk) => {
                // First matching rule answers; scanning is per-chunk only
                if let Some(rule) = rules.iter().find(|rule| rule.matches(&chunk)) {
                    debug!("answering prompt with {:?}", rule.response);
                    if let Err(e) = session.respond(rule.response).await {
                        // The program may have exited between the prompt and
                        // the answer; classification still comes from the exit
                        warn!("failed to answer prompt: {}", e);
                    }
                }
                stdout_acc.push_str(&chunk);
            }
            ProcessEvent::Stderr(chunk) => stderr_acc.push_str(&chunk),
            ProcessEvent::Exited(status) => {
                return classify(operation, status, stdout_acc, stderr_acc);
            }
        }
    }

    Err(anyhow!("{} terminated without an exit status", operation))
}

/// Run a non-interactive program to completion and capture its stdout
pub async fn run_capture(
    operation: &str,
    program: impl AsRef<OsStr>,
    args: &[String],
) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| anyhow!("{} failed to start: {}", operation, e))?;

    classify(
        operation,
        output.status,
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

fn classify(
    operation: &str,
    status: ExitStatus,
    stdout: String,
    stderr: String,
) -> Result<String> {
    if status.success() {
        Ok(stdout)
    } else {
        let code = status.code().unwrap_or(-1);
        Err(anyhow!(
            "{} failed with code {}: {}",
            operation,
            code,
            stderr
        ))
    }
}
