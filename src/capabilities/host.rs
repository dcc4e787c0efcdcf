// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! [`SystemCapabilities`] backed by the local host.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::Command;

use super::{ServiceAction, SystemCapabilities, ToolCommand, ToolOutput};
use crate::error::{InstallError, Result};

/// Interval between connection attempts while waiting for a port.
const PORT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs real processes and touches the real filesystem.
#[derive(Debug, Clone)]
pub struct HostCapabilities {
    systemctl: String,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCapabilities {
    /// Create host capabilities using `systemctl` for service control.
    pub fn new() -> Self {
        Self {
            systemctl: "/bin/systemctl".to_string(),
        }
    }

    async fn systemctl(&self, verb: &str, name: &str) -> Result<ToolOutput> {
        self.run(ToolCommand::new(&self.systemctl).args([verb, name]).unchecked())
            .await
    }
}

#[async_trait]
impl SystemCapabilities for HostCapabilities {
    async fn run(&self, command: ToolCommand) -> Result<ToolOutput> {
        tracing::debug!("args={}", command);

        let mut child = Command::new(command.program());
        child
            .args(command.arguments())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if command.input().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        for (key, value) in command.envs() {
            child.env(key, value);
        }

        let mut child = child.spawn().map_err(|e| {
            InstallError::external_tool(command.program(), format!("failed to start: {}", e))
        })?;

        if let Some(input) = command.input() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).await?;
            }
        }

        let output = child.wait_with_output().await?;
        let result = ToolOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        tracing::debug!("stdout={}", command.mask(&result.stdout));
        tracing::debug!("stderr={}", command.mask(&result.stderr));

        if command.is_checked() && !result.success() {
            return Err(InstallError::external_tool(
                command.program(),
                format!(
                    "exit status {}: {}",
                    result.status,
                    command.mask(result.stderr.trim())
                ),
            ));
        }

        Ok(result)
    }

    async fn read_to_string(&self, path: &Path) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<()> {
        Ok(tokio::fs::write(path, contents).await?)
    }

    async fn path_exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn copy_file(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::copy(from, to).await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        Ok(tokio::fs::rename(from, to).await?)
    }

    async fn create_dir(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        Ok(tokio::fs::remove_file(path).await?)
    }

    #[cfg(unix)]
    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(mode);
        Ok(tokio::fs::set_permissions(path, permissions).await?)
    }

    #[cfg(not(unix))]
    async fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
        tracing::debug!("Ignoring mode {:o} for {} on this platform", mode, path.display());
        Ok(())
    }

    async fn set_owner(&self, path: &Path, user: Option<&str>, group: Option<&str>) -> Result<()> {
        let owner = match (user, group) {
            (Some(u), Some(g)) => format!("{}:{}", u, g),
            (Some(u), None) => u.to_string(),
            (None, Some(g)) => format!(":{}", g),
            (None, None) => return Ok(()),
        };
        self.run(
            ToolCommand::new("/bin/chown")
                .arg(owner)
                .arg(path.to_string_lossy()),
        )
        .await?;
        Ok(())
    }

    async fn user_exists(&self, user: &str) -> Result<bool> {
        let out = self
            .run(
                ToolCommand::new("/usr/bin/getent")
                    .args(["passwd", user])
                    .unchecked(),
            )
            .await?;
        Ok(out.success())
    }

    async fn restore_context(&self, path: &Path) -> Result<()> {
        let restorecon = Path::new("/sbin/restorecon");
        if !self.path_exists(restorecon).await {
            return Ok(());
        }
        let out = self
            .run(
                ToolCommand::new(restorecon.to_string_lossy())
                    .arg(path.to_string_lossy())
                    .unchecked(),
            )
            .await?;
        if !out.success() {
            tracing::warn!(
                "restorecon {} failed: {}",
                path.display(),
                out.stderr.trim()
            );
        }
        Ok(())
    }

    async fn service(&self, name: &str, action: ServiceAction) -> Result<()> {
        let out = self.systemctl(action.verb(), name).await?;
        if !out.success() {
            return Err(InstallError::external_tool(
                "systemctl",
                format!("{} {}: {}", action.verb(), name, out.stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.systemctl("is-enabled", name).await?.success())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.systemctl("is-active", name).await?.success())
    }

    async fn wait_for_port(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        tracing::debug!("Waiting up to {:?} for {}:{}", timeout, host, port);

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match TcpStream::connect((host, port)).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    if tokio::time::Instant::now() + PORT_POLL_INTERVAL > deadline {
                        return Err(InstallError::external_tool(
                            "wait_for_port",
                            format!(
                                "{}:{} not open after {} seconds: {}",
                                host,
                                port,
                                timeout.as_secs(),
                                e
                            ),
                        ));
                    }
                }
            }
            tokio::time::sleep(PORT_POLL_INTERVAL).await;
        }
    }
}
