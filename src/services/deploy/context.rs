//! 部署上下文
//!
//! 统一的部署执行上下文，包含任务信息、日志通道、取消令牌

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::deploy::LogLine;
use crate::error::{DeployError, RemoteError};
use crate::infra::CommandRunner;
use crate::services::ssh::{ExecOutput, RemoteSession};

/// 部署执行上下文
///
/// 封装部署过程中需要的所有状态和工具
#[derive(Clone)]
pub struct DeployContext {
    /// 运行 ID
    pub run_id: String,
    /// 项目名称
    pub project: String,
    /// 日志发送通道
    pub log_tx: Option<broadcast::Sender<LogLine>>,
    /// 取消令牌
    pub cancel_token: CancellationToken,
    /// 单条命令超时
    pub command_timeout: Duration,
    /// 整次部署超时
    pub run_timeout: Duration,
    timed_out: Arc<AtomicBool>,
}

impl DeployContext {
    pub fn new(
        run_id: String,
        project: String,
        log_tx: Option<broadcast::Sender<LogLine>>,
        cancel_token: CancellationToken,
        command_timeout: Duration,
        run_timeout: Duration,
    ) -> Self {
        Self {
            run_id,
            project,
            log_tx,
            cancel_token,
            command_timeout,
            run_timeout,
            timed_out: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 发送日志
    pub fn log(&self, stream: &str, content: &str) {
        if stream == "stderr" {
            warn!(run_id = %self.run_id, project = %self.project, "{}", content);
        } else {
            info!(run_id = %self.run_id, project = %self.project, "{}", content);
        }

        if let Some(ref tx) = self.log_tx {
            let _ = tx.send(LogLine::new(stream, content));
        }
    }

    /// 发送 stdout 日志
    pub fn log_stdout(&self, content: &str) {
        self.log("stdout", content);
    }

    /// 发送 stderr 日志
    pub fn log_stderr(&self, content: &str) {
        self.log("stderr", content);
    }

    /// 执行远程命令，记录命令、输出与退出码
    pub async fn exec(
        &self,
        session: &mut dyn RemoteSession,
        command: &str,
    ) -> Result<ExecOutput, RemoteError> {
        self.log_stdout(&format!(">>> {}", command));
        let result =
            CommandRunner::run(session, command, &self.cancel_token, self.command_timeout).await;
        self.record(command, &result);
        result
    }

    /// 清理命令：忽略取消，仍受单条命令超时约束
    pub async fn exec_cleanup(
        &self,
        session: &mut dyn RemoteSession,
        command: &str,
    ) -> Result<ExecOutput, RemoteError> {
        self.log_stdout(&format!(">>> {}", command));
        let result =
            CommandRunner::run(session, command, &CancellationToken::new(), self.command_timeout)
                .await;
        self.record(command, &result);
        result
    }

    /// 探测型命令（`test -d` 等）：退出码 0 即为真，不输出到部署日志
    pub async fn probe(
        &self,
        session: &mut dyn RemoteSession,
        command: &str,
    ) -> Result<bool, RemoteError> {
        match CommandRunner::run(session, command, &self.cancel_token, self.command_timeout).await {
            Ok(output) => {
                debug!(run_id = %self.run_id, command = %command, exit_code = output.exit_code, "Probe");
                Ok(output.success())
            }
            Err(e) => {
                warn!(run_id = %self.run_id, command = %command, error = %e, "Probe failed");
                Err(e)
            }
        }
    }

    /// 上传本地文件
    pub async fn upload(
        &self,
        session: &mut dyn RemoteSession,
        local: &Path,
        remote: &str,
    ) -> Result<(), RemoteError> {
        self.log_stdout(&format!(">>> upload {} -> {}", local.display(), remote));
        CommandRunner::upload(session, local, remote, &self.cancel_token, self.command_timeout)
            .await
    }

    fn record(&self, command: &str, result: &Result<ExecOutput, RemoteError>) {
        match result {
            Ok(output) => {
                for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
                    self.log_stdout(line);
                }
                for line in output.stderr.lines().filter(|l| !l.trim().is_empty()) {
                    self.log_stderr(line);
                }
                if output.success() {
                    debug!(run_id = %self.run_id, command = %command, exit_code = 0, "Remote command finished");
                } else {
                    warn!(
                        run_id = %self.run_id,
                        command = %command,
                        exit_code = output.exit_code,
                        stderr = %output.stderr.trim(),
                        "Remote command failed"
                    );
                }
            }
            Err(e) => {
                warn!(run_id = %self.run_id, command = %command, error = %e, "Remote call error");
            }
        }
    }

    /// 部署超时任务触发
    pub fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
        self.cancel_token.cancel();
    }

    /// 检查是否被取消
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// 取消后对外报告的错误
    pub fn cancellation_error(&self) -> DeployError {
        if self.timed_out.load(Ordering::SeqCst) {
            DeployError::TimedOut(self.run_timeout)
        } else {
            DeployError::Cancelled
        }
    }

    /// 中断类远程错误（取消 / 超时）总是致命的
    pub fn interruption(&self, err: &RemoteError) -> Option<DeployError> {
        match err {
            RemoteError::Cancelled => Some(self.cancellation_error()),
            RemoteError::Timeout(limit) => Some(DeployError::TimedOut(*limit)),
            _ => None,
        }
    }
}
