//! Builder for executing external tool commands.
//!
//! [`ToolCommand::execute`] captures output for short-lived calls such as
//! `ffprobe`. [`ToolCommand::execute_with_stderr_callback`] streams stderr
//! line by line for long encodes and kills the child when the cancellation
//! token fires.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use ef_core::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Limit for quick calls (probes, muxer help). Encodes set their own.
const QUICK_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of trailing stderr lines kept for error messages.
const STDERR_TAIL: usize = 20;

/// What a finished ffmpeg/ffprobe process left behind.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    /// Full stderr for [`ToolCommand::execute`]; only the last
    /// `STDERR_TAIL` lines when stderr was streamed.
    pub stderr: String,
}

/// How a streamed execution ended.
#[derive(Debug)]
pub enum Completion {
    Finished(ToolOutput),
    Cancelled,
}

/// One invocation of an external tool.
///
/// ```no_run
/// # async fn example(ffmpeg: std::path::PathBuf) -> ef_core::Result<()> {
/// let mut cmd = ef_av::ToolCommand::new(ffmpeg);
/// cmd.args(["-hide_banner", "-h", "muxer=matroska"]);
/// let help = cmd.execute().await?;
/// assert!(help.stdout.contains("Common extensions"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: QUICK_CALL_TIMEOUT,
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    /// Kill the process if it is still running after `limit`.
    pub fn timeout(&mut self, limit: Duration) -> &mut Self {
        self.timeout = limit;
        self
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] if spawning fails, the process times out,
    /// or it exits with a non-zero status (message includes stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let tool = self.tool_name();
        tracing::debug!(tool = %tool, args = ?self.args, "executing");

        let child = self
            .command()
            .spawn()
            .map_err(|e| Error::execution(&tool, format!("failed to spawn: {e}")))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::execution(
                    &tool,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            // The child is dropped with the future and killed.
            Err(_) => {
                return Err(Error::execution(
                    &tool,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        let output = ToolOutput {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        check_status(&tool, output)
    }

    /// Execute the command, handing every stderr line to `on_line` as it
    /// arrives.
    ///
    /// Returns [`Completion::Cancelled`] (after killing the child) if `cancel`
    /// fires before the process exits.
    pub async fn execute_with_stderr_callback<F>(
        &self,
        mut on_line: F,
        cancel: &CancellationToken,
    ) -> Result<Completion>
    where
        F: FnMut(&str),
    {
        let tool = self.tool_name();
        tracing::debug!(tool = %tool, args = ?self.args, "executing with stderr streaming");

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::execution(&tool, format!("failed to spawn: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::execution(&tool, "stderr was not captured"))?;
        let stdout_task = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stdout.read_to_end(&mut buf).await;
                buf
            })
        });

        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(tool = %tool, "cancelled; killing process");
                    let _ = child.kill().await;
                    return Ok(Completion::Cancelled);
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(Error::execution(&tool, format!("timed out after {:?}", self.timeout)));
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        if tail.len() == STDERR_TAIL {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(Error::execution(&tool, format!("failed to read stderr: {e}")));
                    }
                }
            }
        }

        let waited = tokio::select! {
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let Some(status) = waited else {
            let _ = child.kill().await;
            return Ok(Completion::Cancelled);
        };
        let status = status
            .map_err(|e| Error::execution(&tool, format!("I/O error waiting for process: {e}")))?;

        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        let output = ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: tail.into_iter().collect::<Vec<_>>().join("\n"),
        };
        check_status(&tool, output).map(Completion::Finished)
    }
}

fn check_status(tool: &str, output: ToolOutput) -> Result<ToolOutput> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(Error::execution(
            tool,
            format!(
                "exited with status {}: {}",
                output.status,
                output.stderr.trim()
            ),
        ))
    }
}

/// Split a command-line string into arguments.
///
/// Whitespace separates arguments; single or double quotes group text
/// (including whitespace) into one argument and are removed. A backslash
/// inside double quotes escapes a following `"` or `\`.
pub fn split_command_line(line: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some('"') if c == '\\' && matches!(chars.peek(), Some('"') | Some('\\')) => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if let Some(q) = quote {
        return Err(Error::Configuration(format!(
            "unterminated {q} quote in arguments: {line}"
        )));
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}
