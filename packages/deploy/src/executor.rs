// ABOUTME: Remote executor for bounded command execution inside containers
// ABOUTME: Turns non-zero exits and overruns into typed errors and uploads files byte-exact

use crate::channel::{shell_quote, CommandChannel, CommandOutput};
use crate::error::{DeployError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs commands in containers through a [`CommandChannel`]
#[derive(Clone)]
pub struct RemoteExecutor {
    channel: Arc<dyn CommandChannel>,
    default_timeout: Duration,
}

impl RemoteExecutor {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self {
            channel,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run a command; a non-zero exit is an error
    pub async fn exec(&self, vmid: u32, command: &str) -> Result<CommandOutput> {
        self.exec_with_timeout(vmid, command, self.default_timeout)
            .await
    }

    pub async fn exec_with_timeout(
        &self,
        vmid: u32,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let output = self.run(vmid, command, timeout).await?;
        if !output.success() {
            return Err(DeployError::CommandFailed {
                vmid,
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// Run a command whose exit status the caller inspects itself
    pub async fn exec_tolerant(&self, vmid: u32, command: &str) -> Result<CommandOutput> {
        let output = self.run(vmid, command, self.default_timeout).await?;
        if !output.success() {
            warn!(
                "Command exited with {} in container {} (tolerated): {}",
                output.exit_code, vmid, command
            );
        }
        Ok(output)
    }

    /// Run a long-lived command, delivering stdout lines as they arrive.
    ///
    /// Returns `Ok(false)` when `limit` elapses first. That is not an error: every line
    /// read so far has already been handed to `on_line`.
    pub async fn stream(
        &self,
        vmid: u32,
        command: &str,
        limit: Duration,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<bool> {
        match tokio::time::timeout(limit, self.channel.stream(vmid, command, on_line)).await {
            Ok(result) => {
                let exit_code = result?;
                if exit_code != 0 {
                    return Err(DeployError::CommandFailed {
                        vmid,
                        command: command.to_string(),
                        exit_code,
                        stderr: String::new(),
                    });
                }
                Ok(true)
            }
            Err(_) => {
                debug!(
                    "Stopped streaming from container {} after {}s",
                    vmid,
                    limit.as_secs()
                );
                Ok(false)
            }
        }
    }

    /// Write `content` to `path` inside the container.
    ///
    /// The payload travels base64-encoded inside a single-quoted argument, is decoded
    /// to a sibling temp file and renamed into place.
    pub async fn upload_file(&self, vmid: u32, path: &str, content: &str) -> Result<()> {
        let command = upload_command(path, content.as_bytes());
        debug!(
            "Uploading {} bytes to {} in container {}",
            content.len(),
            path,
            vmid
        );
        self.exec(vmid, &command).await.map(|_| ())
    }

    async fn run(&self, vmid: u32, command: &str, timeout: Duration) -> Result<CommandOutput> {
        match tokio::time::timeout(timeout, self.channel.exec(vmid, command)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DeployError::CommandTimeout {
                vmid,
                command: command.to_string(),
                timeout,
            }),
        }
    }
}

pub(crate) fn upload_command(path: &str, bytes: &[u8]) -> String {
    let dir = Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());
    let tmp = format!("{}.tmp", path);

    format!(
        "mkdir -p {dir} && printf '%s' {payload} | base64 -d > {tmp} && mv -f {tmp} {path}",
        dir = shell_quote(&dir),
        payload = shell_quote(&STANDARD.encode(bytes)),
        tmp = shell_quote(&tmp),
        path = shell_quote(path),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedChannel {
        exit_code: i32,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandChannel for ScriptedChannel {
        async fn exec(&self, _vmid: u32, command: &str) -> std::result::Result<CommandOutput, ChannelError> {
            self.seen.lock().unwrap().push(command.to_string());
            tokio::time::sleep(self.delay).await;
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: "nope".to_string(),
                exit_code: self.exit_code,
            })
        }
    }

    fn scripted(exit_code: i32, delay: Duration) -> (RemoteExecutor, Arc<ScriptedChannel>) {
        let channel = Arc::new(ScriptedChannel {
            exit_code,
            delay,
            seen: Mutex::new(Vec::new()),
        });
        (RemoteExecutor::new(channel.clone()), channel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_zero_exit_is_command_failed() {
        let (executor, _) = scripted(2, Duration::ZERO);
        let err = executor.exec(105, "false").await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::CommandFailed { exit_code: 2, vmid: 105, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerant_returns_output() {
        let (executor, _) = scripted(1, Duration::ZERO);
        let output = executor.exec_tolerant(105, "grep x y").await.unwrap();
        assert_eq!(output.exit_code, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_from_failure() {
        let (executor, _) = scripted(0, Duration::from_secs(301));
        let err = executor.exec(105, "apt-get update").await.unwrap_err();
        match err {
            DeployError::CommandTimeout { timeout, .. } => {
                assert_eq!(timeout, DEFAULT_COMMAND_TIMEOUT)
            }
            other => panic!("expected timeout, got {:?}", other),
        }

        let (executor, _) = scripted(0, Duration::from_secs(5));
        let err = executor
            .exec_with_timeout(105, "sleep 5", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::CommandTimeout { .. }));
    }

    /// Emits two lines, then never exits
    struct EndlessChannel;

    #[async_trait]
    impl CommandChannel for EndlessChannel {
        async fn exec(&self, _vmid: u32, _command: &str) -> std::result::Result<CommandOutput, ChannelError> {
            std::future::pending().await
        }

        async fn stream(
            &self,
            _vmid: u32,
            _command: &str,
            on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> std::result::Result<i32, ChannelError> {
            on_line("web-1  | listening on :80");
            on_line("web-1  | GET / 200");
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_keeps_lines_when_limit_is_reached() {
        let executor = RemoteExecutor::new(Arc::new(EndlessChannel));
        let mut lines = Vec::new();

        let finished = executor
            .stream(105, "docker compose logs --follow", Duration::from_secs(5), &mut |line: &str| {
                lines.push(line.to_string())
            })
            .await
            .unwrap();

        assert!(!finished);
        assert_eq!(lines, vec!["web-1  | listening on :80", "web-1  | GET / 200"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_over_buffered_channel() {
        struct Buffered;

        #[async_trait]
        impl CommandChannel for Buffered {
            async fn exec(&self, _vmid: u32, _command: &str) -> std::result::Result<CommandOutput, ChannelError> {
                Ok(CommandOutput {
                    stdout: "one\ntwo\n".to_string(),
                    ..Default::default()
                })
            }
        }

        let executor = RemoteExecutor::new(Arc::new(Buffered));
        let mut lines = Vec::new();
        let finished = executor
            .stream(105, "docker compose logs", DEFAULT_COMMAND_TIMEOUT, &mut |line: &str| {
                lines.push(line.to_string())
            })
            .await
            .unwrap();

        assert!(finished);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_non_zero_exit_is_command_failed() {
        let (executor, _) = scripted(1, Duration::ZERO);
        let err = executor
            .stream(105, "docker compose logs", DEFAULT_COMMAND_TIMEOUT, &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::CommandFailed { exit_code: 1, .. }));
    }

    #[test]
    fn test_upload_command_is_byte_exact() {
        let content = "services:\n  app:\n    command: echo \"$HOME\" 'x' `id`\n";
        let command = upload_command("/opt/app/docker-compose.yml", content.as_bytes());

        assert!(command.starts_with("mkdir -p '/opt/app' && printf '%s' '"));
        assert!(command.ends_with(
            "| base64 -d > '/opt/app/docker-compose.yml.tmp' && mv -f '/opt/app/docker-compose.yml.tmp' '/opt/app/docker-compose.yml'"
        ));

        let payload = command
            .split("printf '%s' '")
            .nth(1)
            .and_then(|rest| rest.split('\'').next())
            .unwrap();
        assert_eq!(STANDARD.decode(payload).unwrap(), content.as_bytes());
    }

    #[tokio::test]
    async fn test_upload_sends_single_command() {
        let (executor, channel) = scripted(0, Duration::ZERO);
        executor
            .upload_file(110, "/opt/pihole/docker-compose.yml", "a: 1\n")
            .await
            .unwrap();
        let seen = channel.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("base64 -d"));
    }
}
