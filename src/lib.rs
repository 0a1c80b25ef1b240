//! Deploy Orchestrator - 远程部署编排引擎
//!
//! 给定项目描述与服务器凭据，通过 SSH 完成一次部署：
//! 备份现有目录、拉取或上传源码、按项目类型构建、执行自定义命令。

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;

pub use config::{DeployRequest, EngineConfig, StrictSteps};
pub use domain::{
    DeployOutcome, DeployPhase, DeployStatus, DeployStep, ProjectDescriptor, ProjectStatus,
    ProjectType, ServerDescriptor, SourceMode,
};
pub use error::{DeployError, RemoteError};
pub use services::deploy::{DeployEngine, RunOptions};

/// 初始化日志（`RUST_LOG` 控制级别，默认 info）
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
