//! 部署请求文件
//!
//! 调用方在部署前解析好的 `{ "server": ..., "project": ... }` 描述。

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::domain::{ProjectDescriptor, ServerDescriptor};

/// 一次部署的输入
#[derive(Clone, Debug, Deserialize)]
pub struct DeployRequest {
    pub server: ServerDescriptor,
    pub project: ProjectDescriptor,
}

impl DeployRequest {
    /// 从 JSON 文件加载
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read deploy request {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid deploy request {}", path.display()))
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProjectType, SourceMode};

    const REQUEST: &str = r#"{
        "server": { "host": "203.0.113.7", "port": 2222, "username": "deploy", "private_key": "KEY" },
        "project": {
            "name": "site2",
            "type": "static",
            "source_type": "upload",
            "source_path": "/srv/uploads/bundle.zip",
            "deploy_path": "/var/www",
            "custom_commands": "echo done"
        }
    }"#;

    #[test]
    fn test_from_json() {
        let request = DeployRequest::from_json(REQUEST).unwrap();
        assert_eq!(request.server.port, 2222);
        assert_eq!(request.project.project_type, ProjectType::Static);
        assert_eq!(request.project.source_type, SourceMode::Upload);
        assert_eq!(request.project.upload_file_name().as_deref(), Some("bundle.zip"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request.json");
        tokio::fs::write(&path, REQUEST).await.unwrap();

        let request = DeployRequest::load(&path).await.unwrap();
        assert_eq!(request.project.name, "site2");
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = DeployRequest::load(Path::new("/nonexistent/request.json"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read deploy request"));
    }
}
