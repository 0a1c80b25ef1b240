//! 远程会话抽象
//!
//! 编排器只依赖这里的 trait；russh 实现见 `client.rs`。

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::ServerDescriptor;
use crate::error::{DeployError, RemoteError};

/// 单条远程命令的输出
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// 用于日志与错误信息的简短描述
    pub fn summary(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!("exit code {}: {}", self.exit_code, stderr)
        }
    }
}

/// 已认证的远程会话
///
/// 一次只执行一条命令，请求 / 响应式。
#[async_trait]
pub trait RemoteSession: Send {
    /// 执行一条 shell 命令并等待退出
    async fn execute(&mut self, command: &str) -> Result<ExecOutput, RemoteError>;

    /// 上传本地文件到远程路径
    async fn transfer(&mut self, local: &Path, remote: &str) -> Result<(), RemoteError>;

    /// 关闭会话
    async fn close(&mut self) -> Result<(), RemoteError>;
}

/// 会话工厂
#[async_trait]
pub trait Connector: Send + Sync {
    /// 建立并认证会话；失败时返回 `DeployError::Connection`
    async fn connect(&self, server: &ServerDescriptor) -> Result<Box<dyn RemoteSession>, DeployError>;
}

/// 已释放的占位会话
struct ReleasedSession;

#[async_trait]
impl RemoteSession for ReleasedSession {
    async fn execute(&mut self, _command: &str) -> Result<ExecOutput, RemoteError> {
        Err(RemoteError::Closed)
    }

    async fn transfer(&mut self, _local: &Path, _remote: &str) -> Result<(), RemoteError> {
        Err(RemoteError::Closed)
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        Ok(())
    }
}

/// 会话守卫
///
/// `release` 是唯一的正常释放点；如果守卫在未释放时被丢弃，
/// 会在后台任务中补做关闭。
pub struct SessionGuard {
    session: Box<dyn RemoteSession>,
    label: String,
    released: bool,
}

impl SessionGuard {
    pub fn new(session: Box<dyn RemoteSession>, label: impl Into<String>) -> Self {
        Self {
            session,
            label: label.into(),
            released: false,
        }
    }

    pub fn session(&mut self) -> &mut dyn RemoteSession {
        self.session.as_mut()
    }

    /// 关闭会话；关闭失败只记录日志
    pub async fn release(mut self) {
        self.released = true;
        match self.session.close().await {
            Ok(()) => debug!(session = %self.label, "SSH session released"),
            Err(e) => warn!(session = %self.label, error = %e, "Failed to close SSH session cleanly"),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(session = %self.label, "SSH session dropped without release, closing in background");

        let mut session = std::mem::replace(&mut self.session, Box::new(ReleasedSession));
        let label = std::mem::take(&mut self.label);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = session.close().await {
                    warn!(session = %label, error = %e, "Background session close failed");
                }
            });
        }
    }
}
