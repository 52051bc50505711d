//! Handler that delegates an operation to an external program.
//!
//! The program receives the user id in `OPERATION_USER_ID` and the job
//! configuration as JSON on stdin. Stdout lines starting with `PROGRESS ` are
//! forwarded as progress; the last other non-empty line is the result.

use super::{Handler, HandlerError, ProgressReporter};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

const PROGRESS_PREFIX: &str = "PROGRESS ";
const STDERR_TAIL_BYTES: usize = 2000;

#[derive(Debug, Clone)]
pub struct CommandHandlerSettings {
    pub program: String,
    pub args: Vec<String>,
    /// Kill the program and fail the attempt after this long.
    pub timeout: Option<Duration>,
}

pub struct CommandHandler {
    settings: CommandHandlerSettings,
}

impl CommandHandler {
    pub fn new(settings: CommandHandlerSettings) -> Self {
        Self { settings }
    }

    async fn run(
        &self,
        user_id: &str,
        config: &JsonValue,
        progress: &ProgressReporter,
    ) -> Result<JsonValue, HandlerError> {
        let input = serde_json::to_vec(config)
            .map_err(|e| HandlerError::failed(format!("invalid handler config: {}", e)))?;

        let mut child = Command::new(&self.settings.program)
            .args(&self.settings.args)
            .env("OPERATION_USER_ID", user_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        debug!(
            "Spawned {} for user {} with PID {:?}",
            self.settings.program,
            user_id,
            child.id()
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HandlerError::failed("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HandlerError::failed("stderr was not captured"))?;

        let stdin = child.stdin.take();
        // Written concurrently with the readers so a chatty program cannot
        // fill its stdout pipe while we are blocked on its stdin.
        let write_stdin = async {
            if let Some(mut stdin) = stdin {
                // Programs that ignore their input may close stdin early
                if let Err(e) = stdin.write_all(&input).await {
                    debug!("Could not write config to {}: {}", self.settings.program, e);
                }
            }
            Ok::<_, std::io::Error>(())
        };
        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_line = None;
            while let Some(line) = lines.next_line().await? {
                if let Some(message) = line.strip_prefix(PROGRESS_PREFIX) {
                    progress.report(message.trim());
                } else if !line.trim().is_empty() {
                    last_line = Some(line);
                }
            }
            Ok::<_, std::io::Error>(last_line)
        };
        let read_stderr = async {
            let mut output = String::new();
            BufReader::new(stderr).read_to_string(&mut output).await?;
            Ok::<_, std::io::Error>(output)
        };
        let ((), last_line, stderr_output) =
            tokio::try_join!(write_stdin, read_stdout, read_stderr)?;

        let status = child.wait().await?;
        if !status.success() {
            return Err(HandlerError::ProcessExit {
                code: status.code(),
                stderr: tail(&stderr_output),
            });
        }

        Ok(match last_line {
            Some(line) => serde_json::from_str(&line).unwrap_or(JsonValue::String(line)),
            None => JsonValue::Null,
        })
    }
}

fn tail(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

#[async_trait]
impl Handler for CommandHandler {
    async fn execute(
        &self,
        user_id: &str,
        config: &JsonValue,
        progress: ProgressReporter,
    ) -> Result<JsonValue, HandlerError> {
        match self.settings.timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.run(user_id, config, &progress))
                .await
                .map_err(|_| HandlerError::Timeout(timeout))?,
            None => self.run(user_id, config, &progress).await,
        }
    }
}
