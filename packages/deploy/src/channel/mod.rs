// ABOUTME: Sandbox command channel trait for running shell commands inside containers
// ABOUTME: Also provides POSIX shell quoting shared by the channel and executor

use async_trait::async_trait;
use thiserror::Error;

pub mod ssh;

pub use ssh::PctSshChannel;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel itself failed (host unreachable, container not accepting exec)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to spawn command channel: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run `command` through `sh -c` inside container `vmid`
    async fn exec(&self, vmid: u32, command: &str) -> Result<CommandOutput, ChannelError>;

    /// Run `command` and hand each stdout line to `on_line` as it arrives; returns the exit code.
    ///
    /// The default buffers through [`exec`](Self::exec), so lines only arrive once the
    /// command has exited. Channels that can read output incrementally override it.
    async fn stream(
        &self,
        vmid: u32,
        command: &str,
        on_line: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<i32, ChannelError> {
        let output = self.exec(vmid, command).await?;
        for line in output.stdout.lines() {
            on_line(line);
        }
        Ok(output.exit_code)
    }
}

/// Quote `s` for a POSIX shell using single quotes
pub fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}
