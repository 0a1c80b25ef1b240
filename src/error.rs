//! 统一错误处理
//!
//! `DeployError` 是引擎边界上唯一会被抛出的错误类型；
//! `RemoteError` 描述单条远程调用（执行命令、上传文件、关闭会话）的失败。

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::domain::deploy::DeployStep;

/// 部署错误
///
/// 只有 `Connection` 与 `Source` 是原始契约中的致命错误；
/// `StepFailed` 仅在严格模式下出现，`Cancelled` / `TimedOut` 来自运行期限。
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeployError {
    /// 描述符不满足前置条件（在任何网络调用之前发现）
    #[error("Invalid deployment descriptor: {0}")]
    Validation(String),

    /// 无法建立或认证 SSH 会话
    #[error("Connection to {host}:{port} failed: {message}")]
    Connection {
        host: String,
        port: u16,
        message: String,
    },

    /// 拉取 / 克隆 / 上传源码失败
    #[error("Source acquisition failed: {0}")]
    Source(String),

    /// 严格模式下被提升为致命的建议性失败
    #[error("Step {step} failed: {message}")]
    StepFailed { step: DeployStep, message: String },

    /// 部署被取消
    #[error("Deployment was cancelled")]
    Cancelled,

    /// 部署超过了整体期限
    #[error("Deployment timed out after {0:?}")]
    TimedOut(Duration),
}

impl DeployError {
    /// 创建校验错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// 创建源码错误
    pub fn source_failed(message: impl Into<String>) -> Self {
        Self::Source(message.into())
    }

    /// 错误类别（用于日志与 JSON 输出）
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Validation(_) => "validation",
            DeployError::Connection { .. } => "connection",
            DeployError::Source(_) => "source",
            DeployError::StepFailed { .. } => "step_failed",
            DeployError::Cancelled => "cancelled",
            DeployError::TimedOut(_) => "timed_out",
        }
    }
}

/// 序列化后的错误（`DeployOutcome` 的 JSON 表示）
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&DeployError> for ErrorResponse {
    fn from(err: &DeployError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// 远程调用错误
#[derive(Debug, Error)]
pub enum RemoteError {
    /// SSH 通道层错误
    #[error("SSH channel error: {0}")]
    Channel(String),

    /// 本地文件读取失败
    #[error("Failed to read {}: {source}", local.display())]
    Transfer {
        local: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 远端辅助命令（如上传时的写入）以非零退出
    #[error("Remote side exited with {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    /// 远端在返回退出码之前关闭了通道
    #[error("Remote closed the channel without an exit status")]
    Closed,

    /// 单条命令超时
    #[error("Remote command timed out after {0:?}")]
    Timeout(Duration),

    /// 运行被取消
    #[error("Remote command was cancelled")]
    Cancelled,
}

impl From<russh::Error> for RemoteError {
    fn from(err: russh::Error) -> Self {
        Self::Channel(err.to_string())
    }
}

/// 便捷类型别名
pub type DeployResult<T> = Result<T, DeployError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(DeployError::validation("x").kind(), "validation");
        assert_eq!(DeployError::source_failed("x").kind(), "source");
        assert_eq!(DeployError::Cancelled.kind(), "cancelled");
    }

    #[test]
    fn test_connection_error_display() {
        let err = DeployError::Connection {
            host: "10.0.0.5".to_string(),
            port: 22,
            message: "authentication rejected".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Connection to 10.0.0.5:22 failed: authentication rejected"
        );
    }

    #[test]
    fn test_error_response_from_deploy_error() {
        let resp = ErrorResponse::from(&DeployError::source_failed("clone exited with 128"));
        assert_eq!(resp.error, "source");
        assert_eq!(resp.message, "Source acquisition failed: clone exited with 128");
    }
}
