//! 部署服务模块
//!
//! 编排一次部署：连接 → 备份 → 获取源码 → 构建 → 自定义命令 → 释放会话。
//! 只有这里区分致命与建议性失败。

pub mod backup;
pub mod build;
pub mod context;
pub mod custom;
pub mod source;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{EngineConfig, StrictSteps};
use crate::domain::deploy::{
    Advisory, DeployOutcome, DeployPhase, DeployStage, DeployStatus, DeployStep, LogLine,
    StageStatus, StepOutcome,
};
use crate::domain::{ProjectDescriptor, ServerDescriptor};
use crate::error::DeployError;
use crate::services::ssh::{Connector, RemoteSession, SessionGuard, SshConnector};

pub use backup::BackupSettings;
pub use context::DeployContext;
pub use source::{ExtractStrategy, SourceSettings};

/// 单次运行的可选参数
#[derive(Clone, Default)]
pub struct RunOptions {
    /// 外部取消令牌（引擎使用其子令牌，超时不会取消调用方的令牌）
    pub cancel_token: Option<CancellationToken>,
    /// 实时日志订阅
    pub log_tx: Option<broadcast::Sender<LogLine>>,
}

/// 部署引擎
///
/// 无状态服务对象：克隆开销很小，可以在多个任务中并发使用。
#[derive(Clone)]
pub struct DeployEngine {
    config: Arc<EngineConfig>,
    connector: Arc<dyn Connector>,
}

impl DeployEngine {
    /// 使用 SSH 连接器创建
    pub fn new(config: EngineConfig) -> Self {
        let connector = Arc::new(SshConnector::new(&config));
        Self::with_connector(config, connector)
    }

    pub fn with_connector(config: EngineConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
        }
    }

    /// 部署入口：成功返回结果，失败返回致命错误
    pub async fn deploy(
        &self,
        project: &ProjectDescriptor,
        server: &ServerDescriptor,
    ) -> Result<DeployOutcome, DeployError> {
        self.run(project, server, RunOptions::default())
            .await
            .into_result()
    }

    /// 执行一次部署，总是返回完整结果（包括失败时的阶段信息）
    pub async fn run(
        &self,
        project: &ProjectDescriptor,
        server: &ServerDescriptor,
        options: RunOptions,
    ) -> DeployOutcome {
        let run_id = Uuid::new_v4().to_string();
        let cancel_token = options
            .cancel_token
            .map(|token| token.child_token())
            .unwrap_or_default();
        let ctx = DeployContext::new(
            run_id,
            project.name.clone(),
            options.log_tx,
            cancel_token,
            self.config.command_timeout,
            self.config.run_timeout,
        );
        let started_at = Utc::now();
        let mut tracker = RunTracker::new();

        ctx.log_stdout(&format!("=== Starting deployment for {} ===", project.name));
        ctx.log_stdout(&format!("Server: {}@{}", server.username, server.address()));
        ctx.log_stdout(&format!(
            "Type: {}, source: {}, target: {}",
            project.project_type.as_str(),
            project.source_type.as_str(),
            project.target_dir()
        ));

        let timeout_task = spawn_timeout(ctx.clone());
        let result = self.execute(&ctx, project, server, &mut tracker).await;
        timeout_task.abort();

        tracker.finish(&ctx, result, started_at)
    }

    async fn execute(
        &self,
        ctx: &DeployContext,
        project: &ProjectDescriptor,
        server: &ServerDescriptor,
        tracker: &mut RunTracker,
    ) -> Result<(), DeployError> {
        tracker.advance(ctx, DeployPhase::Connecting);
        tracker.stage(DeployStep::Connect).start();

        let session = match self.connect(ctx, project, server).await {
            Ok(session) => session,
            Err(e) => {
                tracker.stage(DeployStep::Connect).finish(false, Some(e.to_string()));
                ctx.log_stderr(&format!("Connection failed: {}", e));
                // 没有会话需要释放
                tracker.advance(ctx, DeployPhase::Disposing);
                return Err(e);
            }
        };
        tracker.stage(DeployStep::Connect).finish(true, None);

        let mut guard = SessionGuard::new(
            session,
            format!("{}@{}", server.username, server.address()),
        );
        let result = self.pipeline(ctx, guard.session(), project, tracker).await;

        tracker.advance(ctx, DeployPhase::Disposing);
        guard.release().await;
        result
    }

    async fn connect(
        &self,
        ctx: &DeployContext,
        project: &ProjectDescriptor,
        server: &ServerDescriptor,
    ) -> Result<Box<dyn RemoteSession>, DeployError> {
        project.validate()?;
        server.validate()?;
        checkpoint(ctx)?;

        tokio::select! {
            _ = ctx.cancel_token.cancelled() => Err(ctx.cancellation_error()),
            result = self.connector.connect(server) => result,
        }
    }

    async fn pipeline(
        &self,
        ctx: &DeployContext,
        session: &mut dyn RemoteSession,
        project: &ProjectDescriptor,
        tracker: &mut RunTracker,
    ) -> Result<(), DeployError> {
        let strict = &self.config.strict;

        tracker.advance(ctx, DeployPhase::BackingUp);
        checkpoint(ctx)?;
        tracker.stage(DeployStep::Backup).start();
        let outcome = backup::run(ctx, session, project, &self.backup_settings()).await;
        tracker.settle(ctx, strict, DeployStep::Backup, outcome)?;

        tracker.advance(ctx, DeployPhase::AcquiringSource);
        checkpoint(ctx)?;
        tracker.stage(DeployStep::Source).start();
        let outcome = source::acquire(ctx, session, project, &self.source_settings()).await;
        tracker.settle(ctx, strict, DeployStep::Source, outcome)?;

        tracker.advance(ctx, DeployPhase::Building);
        checkpoint(ctx)?;
        tracker.stage(DeployStep::Build).start();
        let outcome = build::run(ctx, session, project).await;
        tracker.settle(ctx, strict, DeployStep::Build, outcome)?;

        tracker.advance(ctx, DeployPhase::RunningCustomCommands);
        checkpoint(ctx)?;
        tracker.stage(DeployStep::Custom).start();
        let outcome = custom::run(ctx, session, project).await;
        tracker.settle(ctx, strict, DeployStep::Custom, outcome)?;

        Ok(())
    }

    fn backup_settings(&self) -> BackupSettings {
        BackupSettings {
            backup_dir: self.config.backup_dir.clone(),
            retention: self.config.backup_retention,
        }
    }

    fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            primary_branch: self.config.primary_branch.clone(),
            fallback_branch: self.config.fallback_branch.clone(),
            staging_dir: self.config.staging_dir.clone(),
        }
    }
}

/// 每个远程步骤开始前检查取消
fn checkpoint(ctx: &DeployContext) -> Result<(), DeployError> {
    if ctx.is_cancelled() {
        ctx.log_stderr("=== Deployment CANCELLED ===");
        return Err(ctx.cancellation_error());
    }
    Ok(())
}

/// 启动超时保护任务
fn spawn_timeout(ctx: DeployContext) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = ctx.cancel_token.cancelled() => {}
            _ = tokio::time::sleep(ctx.run_timeout) => {
                tracing::error!(run_id = %ctx.run_id, project = %ctx.project, "Deployment timed out after {:?}", ctx.run_timeout);
                ctx.mark_timed_out();
            }
        }
    })
}

/// 单次运行的状态机与阶段记录
struct RunTracker {
    phase: DeployPhase,
    stages: Vec<DeployStage>,
    advisories: Vec<Advisory>,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            phase: DeployPhase::Idle,
            stages: [
                DeployStep::Connect,
                DeployStep::Backup,
                DeployStep::Source,
                DeployStep::Build,
                DeployStep::Custom,
            ]
            .into_iter()
            .map(DeployStage::for_step)
            .collect(),
            advisories: Vec::new(),
        }
    }

    fn stage(&mut self, step: DeployStep) -> &mut DeployStage {
        let index = match step {
            DeployStep::Connect => 0,
            DeployStep::Backup => 1,
            DeployStep::Source | DeployStep::Extract => 2,
            DeployStep::Build => 3,
            DeployStep::Custom => 4,
        };
        &mut self.stages[index]
    }

    fn advance(&mut self, ctx: &DeployContext, next: DeployPhase) {
        if !self.phase.can_transition_to(next) {
            tracing::error!(run_id = %ctx.run_id, from = ?self.phase, to = ?next, "Invalid deployment phase transition");
        }
        tracing::debug!(run_id = %ctx.run_id, from = ?self.phase, to = ?next, "Phase transition");
        self.phase = next;
    }

    /// 把步骤结果转换为继续 / 中止
    fn settle(
        &mut self,
        ctx: &DeployContext,
        strict: &StrictSteps,
        step: DeployStep,
        outcome: StepOutcome,
    ) -> Result<(), DeployError> {
        self.stage(step).finish_with(&outcome);

        match outcome {
            StepOutcome::Ok => Ok(()),
            StepOutcome::Advisory(message) => {
                // 源码步骤的建议性失败只可能来自解压
                let advisory_step = if step == DeployStep::Source {
                    DeployStep::Extract
                } else {
                    step
                };
                if strict.contains(advisory_step) {
                    ctx.log_stderr(&format!("{} failed in strict mode: {}", advisory_step, message));
                    return Err(DeployError::StepFailed {
                        step: advisory_step,
                        message,
                    });
                }
                ctx.log_stderr(&format!("{} finished with warnings: {}", advisory_step, message));
                self.advisories.push(Advisory {
                    step: advisory_step,
                    message,
                });
                Ok(())
            }
            StepOutcome::Fatal(err) => {
                ctx.log_stderr(&format!("{} failed: {}", step, err));
                Err(err)
            }
        }
    }

    fn finish(
        mut self,
        ctx: &DeployContext,
        result: Result<(), DeployError>,
        started_at: chrono::DateTime<Utc>,
    ) -> DeployOutcome {
        let (status, phase, error) = match result {
            Ok(()) => (DeployStatus::Success, DeployPhase::Completed, None),
            Err(e) => (DeployStatus::Failed, DeployPhase::Failed, Some(e)),
        };
        self.advance(ctx, phase);

        for stage in self.stages.iter_mut() {
            if stage.status == StageStatus::Pending {
                stage.skip(Some("not reached".to_string()));
            }
        }

        match &error {
            None if self.advisories.is_empty() => {
                ctx.log_stdout("=== Deployment completed successfully ===")
            }
            None => ctx.log_stdout(&format!(
                "=== Deployment completed with {} warning(s) ===",
                self.advisories.len()
            )),
            Some(e) => ctx.log_stderr(&format!("=== Deployment failed: {} ===", e)),
        }

        tracing::info!(
            run_id = %ctx.run_id,
            project = %ctx.project,
            status = status.as_str(),
            advisories = self.advisories.len(),
            "Deployment finished"
        );

        DeployOutcome {
            run_id: ctx.run_id.clone(),
            project: ctx.project.clone(),
            status,
            phase,
            stages: self.stages,
            advisories: self.advisories,
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
