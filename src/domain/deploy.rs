//! 部署相关领域模型

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{DeployError, ErrorResponse};

/// 部署结果状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Success,
    Failed,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }
}

/// 项目的持久化状态（由调用方写入，引擎本身不持久化）
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Deploying,
    Active,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Deploying => "deploying",
            ProjectStatus::Active => "active",
            ProjectStatus::Error => "error",
        }
    }
}

/// 部署步骤
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeployStep {
    Connect,
    Backup,
    Source,
    /// 上传模式下的解压（源码获取的建议性子步骤）
    Extract,
    Build,
    Custom,
}

impl DeployStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStep::Connect => "connect",
            DeployStep::Backup => "backup",
            DeployStep::Source => "source",
            DeployStep::Extract => "extract",
            DeployStep::Build => "build",
            DeployStep::Custom => "custom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DeployStep::Connect => "Connect",
            DeployStep::Backup => "Backup",
            DeployStep::Source => "Acquire Source",
            DeployStep::Extract => "Extract Upload",
            DeployStep::Build => "Build",
            DeployStep::Custom => "Custom Commands",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "connect" => Some(DeployStep::Connect),
            "backup" => Some(DeployStep::Backup),
            "source" => Some(DeployStep::Source),
            "extract" => Some(DeployStep::Extract),
            "build" => Some(DeployStep::Build),
            "custom" | "custom_commands" => Some(DeployStep::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for DeployStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 编排器状态机
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployPhase {
    Idle,
    Connecting,
    BackingUp,
    AcquiringSource,
    Building,
    RunningCustomCommands,
    Disposing,
    Completed,
    Failed,
}

impl DeployPhase {
    /// 状态转移是否合法
    ///
    /// 任何非终态的工作阶段都可以直接进入 `Disposing`（致命错误、取消或超时）。
    pub fn can_transition_to(&self, next: DeployPhase) -> bool {
        use DeployPhase::*;
        match (*self, next) {
            (Idle, Connecting) => true,
            (Connecting, BackingUp) => true,
            (BackingUp, AcquiringSource) => true,
            (AcquiringSource, Building) => true,
            (Building, RunningCustomCommands) => true,
            (Connecting | BackingUp | AcquiringSource | Building | RunningCustomCommands, Disposing) => {
                true
            }
            (Disposing, Completed | Failed) => true,
            _ => false,
        }
    }
}

/// 单个步骤的结果
///
/// 致命 / 建议性的区分只在这里表达，由编排器统一消费。
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Ok,
    Advisory(String),
    Fatal(DeployError),
}

impl StepOutcome {
    /// 把一组失败描述合并为结果：没有失败即 `Ok`
    pub fn from_failures(failures: Vec<String>) -> Self {
        if failures.is_empty() {
            StepOutcome::Ok
        } else {
            StepOutcome::Advisory(failures.join("; "))
        }
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 部署阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 阶段标识 (e.g., "backup", "source", "build")
    pub name: String,
    /// 显示名称 (e.g., "Backup", "Acquire Source")
    pub display_name: String,
    /// 开始时间
    pub started_at: Option<DateTime<Utc>>,
    /// 结束时间
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    /// 阶段状态
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    pub fn for_step(step: DeployStep) -> Self {
        Self::new(step.as_str(), step.display_name())
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 根据步骤结果完成阶段
    pub fn finish_with(&mut self, outcome: &StepOutcome) {
        match outcome {
            StepOutcome::Ok => self.finish(true, None),
            StepOutcome::Advisory(msg) => self.finish(false, Some(msg.clone())),
            StepOutcome::Fatal(err) => self.finish(false, Some(err.to_string())),
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 被吞掉的建议性失败
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Advisory {
    pub step: DeployStep,
    pub message: String,
}

/// 一次部署的最终结果
///
/// 引擎不持久化任何东西；调用方据此写入项目状态与最近部署时间。
#[derive(Clone, Debug, Serialize)]
pub struct DeployOutcome {
    pub run_id: String,
    pub project: String,
    pub status: DeployStatus,
    /// 终态（`Completed` 或 `Failed`）
    pub phase: DeployPhase,
    pub stages: Vec<DeployStage>,
    pub advisories: Vec<Advisory>,
    #[serde(serialize_with = "serialize_error", skip_serializing_if = "Option::is_none")]
    pub error: Option<DeployError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DeployOutcome {
    pub fn is_success(&self) -> bool {
        self.status == DeployStatus::Success
    }

    /// 调用方应写入的项目状态
    pub fn project_status(&self) -> ProjectStatus {
        if self.is_success() {
            ProjectStatus::Active
        } else {
            ProjectStatus::Error
        }
    }

    /// 成功时的最近部署时间
    pub fn last_deployed_at(&self) -> Option<DateTime<Utc>> {
        self.is_success().then_some(self.finished_at)
    }

    /// 转换为 `Result`：失败时取出原始错误
    pub fn into_result(mut self) -> Result<DeployOutcome, DeployError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

fn serialize_error<S: Serializer>(error: &Option<DeployError>, serializer: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(err) => ErrorResponse::from(err).serialize(serializer),
        None => serializer.serialize_none(),
    }
}

/// 日志行
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    /// 创建 stdout 日志行
    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new("stdout", content)
    }

    /// 创建 stderr 日志行
    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new("stderr", content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_status_as_str() {
        assert_eq!(DeployStatus::Success.as_str(), "success");
        assert_eq!(DeployStatus::Failed.as_str(), "failed");
    }

    #[test]
    fn test_phase_happy_path_transitions() {
        use DeployPhase::*;
        let path = [
            Idle,
            Connecting,
            BackingUp,
            AcquiringSource,
            Building,
            RunningCustomCommands,
            Disposing,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_phase_rejects_skips_and_restarts() {
        use DeployPhase::*;
        assert!(!Idle.can_transition_to(BackingUp));
        assert!(!Connecting.can_transition_to(Building));
        assert!(!Idle.can_transition_to(Disposing));
        assert!(!Completed.can_transition_to(Connecting));
        assert!(!Failed.can_transition_to(Disposing));
        assert!(Connecting.can_transition_to(Disposing));
        assert!(Disposing.can_transition_to(Failed));
    }

    #[test]
    fn test_step_from_str() {
        assert_eq!(DeployStep::from_str("Build"), Some(DeployStep::Build));
        assert_eq!(DeployStep::from_str(" custom "), Some(DeployStep::Custom));
        assert_eq!(DeployStep::from_str("deploy"), None);
    }

    #[test]
    fn test_step_outcome_from_failures() {
        assert_eq!(StepOutcome::from_failures(vec![]), StepOutcome::Ok);
        assert_eq!(
            StepOutcome::from_failures(vec!["a".into(), "b".into()]),
            StepOutcome::Advisory("a; b".to_string())
        );
    }

    #[test]
    fn test_deploy_stage_lifecycle() {
        let mut stage = DeployStage::for_step(DeployStep::Backup);
        assert_eq!(stage.status, StageStatus::Pending);
        assert_eq!(stage.name, "backup");

        stage.start();
        assert_eq!(stage.status, StageStatus::Running);
        assert!(stage.started_at.is_some());

        stage.finish_with(&StepOutcome::Advisory("tar exited with 2".to_string()));
        assert_eq!(stage.status, StageStatus::Failed);
        assert_eq!(stage.message.as_deref(), Some("tar exited with 2"));
        assert!(stage.duration_ms.is_some());
    }

    #[test]
    fn test_outcome_project_status_and_result() {
        let now = Utc::now();
        let outcome = DeployOutcome {
            run_id: "r1".to_string(),
            project: "app1".to_string(),
            status: DeployStatus::Failed,
            phase: DeployPhase::Failed,
            stages: vec![],
            advisories: vec![],
            error: Some(DeployError::source_failed("boom")),
            started_at: now,
            finished_at: now,
        };
        assert_eq!(outcome.project_status(), ProjectStatus::Error);
        assert!(outcome.last_deployed_at().is_none());

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"]["error"], "source");
        assert_eq!(json["phase"], "failed");

        assert_eq!(outcome.into_result().unwrap_err(), DeployError::source_failed("boom"));
    }

    #[test]
    fn test_log_line_creation() {
        let line = LogLine::stdout("Hello");
        assert_eq!(line.stream, "stdout");
        assert_eq!(line.content, "Hello");

        let line = LogLine::stderr("Error");
        assert_eq!(line.stream, "stderr");
        assert_eq!(line.content, "Error");
    }
}
