//! 远程命令执行器
//!
//! 在会话之上提供统一的调用边界：
//! - 调用前检查取消
//! - 单条命令超时
//! - 执行中途取消

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::error::RemoteError;
use crate::services::ssh::{ExecOutput, RemoteSession};

/// 命令执行器
pub struct CommandRunner;

impl CommandRunner {
    /// 执行一条远程命令
    pub async fn run(
        session: &mut dyn RemoteSession,
        command: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<ExecOutput, RemoteError> {
        Self::bounded(session.execute(command), cancel, timeout).await
    }

    /// 上传一个本地文件
    pub async fn upload(
        session: &mut dyn RemoteSession,
        local: &Path,
        remote: &str,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<(), RemoteError> {
        Self::bounded(session.transfer(local, remote), cancel, timeout).await
    }

    async fn bounded<T>(
        call: impl Future<Output = Result<T, RemoteError>>,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<T, RemoteError> {
        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!("Remote call cancelled");
                Err(RemoteError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                error!("Remote call timed out after {:?}", timeout);
                Err(RemoteError::Timeout(timeout))
            }
            result = call => result,
        }
    }
}
