//! 项目描述

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{DeployError, DeployResult};
use crate::infra::shell;

/// 默认部署根目录
pub const DEFAULT_DEPLOY_PATH: &str = "/var/www/html";

fn default_deploy_path() -> String {
    DEFAULT_DEPLOY_PATH.to_string()
}

/// 项目类型
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Static,
    Php,
    Nodejs,
    Python,
    Custom,
    /// 无法识别的类型：构建阶段不做任何事
    #[serde(other)]
    Unknown,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Static => "static",
            ProjectType::Php => "php",
            ProjectType::Nodejs => "nodejs",
            ProjectType::Python => "python",
            ProjectType::Custom => "custom",
            ProjectType::Unknown => "unknown",
        }
    }
}

/// 源码获取方式
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[serde(alias = "git")]
    Github,
    Upload,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Github => "github",
            SourceMode::Upload => "upload",
        }
    }
}

/// 项目描述（由调用方在部署前构造）
#[derive(Clone, Debug, Deserialize)]
pub struct ProjectDescriptor {
    /// 远程目录名与备份文件名前缀
    pub name: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub source_type: SourceMode,
    /// github 模式：仓库地址
    #[serde(default)]
    pub source_url: Option<String>,
    /// upload 模式：本地已上传文件
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    #[serde(default = "default_deploy_path")]
    pub deploy_path: String,
    /// 换行分隔的自定义命令
    #[serde(default)]
    pub custom_commands: Option<String>,
}

impl ProjectDescriptor {
    pub fn github(name: &str, project_type: ProjectType, url: &str) -> Self {
        Self {
            name: name.to_string(),
            project_type,
            source_type: SourceMode::Github,
            source_url: Some(url.to_string()),
            source_path: None,
            deploy_path: default_deploy_path(),
            custom_commands: None,
        }
    }

    pub fn upload(name: &str, project_type: ProjectType, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            project_type,
            source_type: SourceMode::Upload,
            source_url: None,
            source_path: Some(path.into()),
            deploy_path: default_deploy_path(),
            custom_commands: None,
        }
    }

    /// 部署根目录（去掉末尾 `/`）
    pub fn deploy_root(&self) -> &str {
        let trimmed = self.deploy_path.trim_end_matches('/');
        if trimmed.is_empty() {
            "/"
        } else {
            trimmed
        }
    }

    /// 目标目录 `{deploy_root}/{name}`
    pub fn target_dir(&self) -> String {
        shell::join(self.deploy_root(), &self.name)
    }

    /// 上传文件名（本地路径的最后一段）
    pub fn upload_file_name(&self) -> Option<String> {
        self.source_path
            .as_ref()?
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
    }

    /// 非空白的自定义命令，按原顺序
    pub fn custom_command_list(&self) -> Vec<&str> {
        self.custom_commands
            .as_deref()
            .map(|s| {
                s.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 在任何网络调用之前校验
    pub fn validate(&self) -> DeployResult<()> {
        shell::validate_name(&self.name)?;
        shell::validate_remote_dir(&self.deploy_path)?;

        match self.source_type {
            SourceMode::Github => {
                let url = self.source_url.as_deref().map(str::trim).unwrap_or("");
                if url.is_empty() {
                    return Err(DeployError::validation(
                        "source_url is required when source_type is github",
                    ));
                }
                if url.starts_with('-') || url.contains(char::is_whitespace) {
                    return Err(DeployError::validation(format!(
                        "source_url {:?} is not a valid repository locator",
                        url
                    )));
                }
            }
            SourceMode::Upload => {
                let file_name = self.upload_file_name().ok_or_else(|| {
                    DeployError::validation("source_path is required when source_type is upload")
                })?;
                shell::validate_file_name(&file_name)?;
            }
        }
        Ok(())
    }
}
