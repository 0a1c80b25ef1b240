//! 环境变量配置加载

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use tracing::warn;

use crate::domain::deploy::DeployStep;

/// 引擎配置
///
/// 每次部署共享的只读设置；引擎自身不保存任何运行期状态。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// 连接 + 认证超时
    pub connect_timeout: Duration,
    /// 单条远程命令超时
    pub command_timeout: Duration,
    /// 整次部署超时
    pub run_timeout: Duration,
    /// 远程备份目录
    pub backup_dir: String,
    /// 每个项目保留的备份数
    pub backup_retention: usize,
    /// 首选拉取分支
    pub primary_branch: String,
    /// 首选分支不存在时的回退分支
    pub fallback_branch: String,
    /// 上传文件的远程暂存目录
    pub staging_dir: String,
    /// 被提升为致命错误的建议性步骤
    pub strict: StrictSteps,
    /// 固定的服务器公钥指纹 (SHA256)；未设置则接受任何主机密钥
    pub host_key_fingerprint: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(constants::CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(constants::COMMAND_TIMEOUT_SECS),
            run_timeout: Duration::from_secs(constants::DEPLOY_TIMEOUT_SECS),
            backup_dir: constants::BACKUP_DIR.to_string(),
            backup_retention: constants::BACKUP_RETENTION,
            primary_branch: "main".to_string(),
            fallback_branch: "master".to_string(),
            staging_dir: "/tmp".to_string(),
            strict: StrictSteps::default(),
            host_key_fingerprint: None,
        }
    }
}

impl EngineConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let connect_timeout = env_secs("DEPLOY_CONNECT_TIMEOUT_SECS").unwrap_or(defaults.connect_timeout);
        let command_timeout = env_secs("DEPLOY_COMMAND_TIMEOUT_SECS").unwrap_or(defaults.command_timeout);
        let run_timeout = env_secs("DEPLOY_RUN_TIMEOUT_SECS").unwrap_or(defaults.run_timeout);

        let backup_dir = env_non_empty("DEPLOY_BACKUP_DIR").unwrap_or(defaults.backup_dir);

        let backup_retention = env::var("DEPLOY_BACKUP_RETENTION")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n >= 1)
            .unwrap_or(defaults.backup_retention);

        let primary_branch = env_non_empty("DEPLOY_PRIMARY_BRANCH").unwrap_or(defaults.primary_branch);
        let fallback_branch = env_non_empty("DEPLOY_FALLBACK_BRANCH").unwrap_or(defaults.fallback_branch);
        let staging_dir = env_non_empty("DEPLOY_STAGING_DIR").unwrap_or(defaults.staging_dir);

        let strict = env::var("DEPLOY_STRICT_STEPS")
            .map(|v| StrictSteps::parse(&v))
            .unwrap_or_default();

        let host_key_fingerprint = env_non_empty("DEPLOY_HOST_KEY_FINGERPRINT");

        Self {
            connect_timeout,
            command_timeout,
            run_timeout,
            backup_dir,
            backup_retention,
            primary_branch,
            fallback_branch,
            staging_dir,
            strict,
            host_key_fingerprint,
        }
    }
}

/// 严格模式：哪些建议性步骤的失败要中止部署
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrictSteps(HashSet<DeployStep>);

impl StrictSteps {
    /// 逗号分隔的步骤列表，如 `build,custom`
    pub fn parse(list: &str) -> Self {
        let mut steps = HashSet::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match DeployStep::from_str(item) {
                Some(DeployStep::Backup) => {
                    steps.insert(DeployStep::Backup);
                }
                Some(DeployStep::Extract) => {
                    steps.insert(DeployStep::Extract);
                }
                Some(DeployStep::Build) => {
                    steps.insert(DeployStep::Build);
                }
                Some(DeployStep::Custom) => {
                    steps.insert(DeployStep::Custom);
                }
                Some(other) => warn!(step = %other, "Step is always fatal, ignoring strict flag"),
                None => warn!(step = %item, "Unknown step in strict list"),
            }
        }
        Self(steps)
    }

    pub fn of(steps: &[DeployStep]) -> Self {
        Self(steps.iter().copied().collect())
    }

    pub fn contains(&self, step: DeployStep) -> bool {
        self.0.contains(&step)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.trim().is_empty())
}

/// 常量
pub mod constants {
    /// 连接超时（秒）
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;

    /// 单条命令超时（秒）
    pub const COMMAND_TIMEOUT_SECS: u64 = 600;

    /// 部署超时（秒）
    pub const DEPLOY_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 默认备份目录
    pub const BACKUP_DIR: &str = "/var/backups/deployments";

    /// 每个项目保留的备份数量
    pub const BACKUP_RETENTION: usize = 5;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
