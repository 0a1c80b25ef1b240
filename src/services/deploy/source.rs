//! 源码获取
//!
//! github 模式：已有 checkout 则 pull，否则 clone。
//! upload 模式：上传文件后解压到目标目录。
//! pull / clone / 上传失败为致命错误，解压失败只是建议性结果。

use std::fmt;
use std::path::Path;

use crate::domain::deploy::StepOutcome;
use crate::domain::{ProjectDescriptor, SourceMode};
use crate::error::{DeployError, RemoteError};
use crate::infra::shell::{self, quote};
use crate::services::ssh::RemoteSession;

use super::context::DeployContext;

/// 分支与暂存目录
#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub primary_branch: String,
    pub fallback_branch: String,
    pub staging_dir: String,
}

/// 上传文件的解包方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractStrategy {
    Unzip,
    Untar,
    CopyFile,
}

impl ExtractStrategy {
    /// 按扩展名选择（不区分大小写）
    pub fn for_file(file_name: &str) -> Self {
        let extension = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        match extension.as_deref() {
            Some("zip") => ExtractStrategy::Unzip,
            Some("tar") | Some("gz") | Some("tgz") => ExtractStrategy::Untar,
            _ => ExtractStrategy::CopyFile,
        }
    }

    /// 把 `staged` 放到 `target` 的远程命令
    pub fn command(&self, staged: &str, target: &str, file_name: &str) -> String {
        match self {
            ExtractStrategy::Unzip => format!("unzip -o {} -d {}", quote(staged), quote(target)),
            ExtractStrategy::Untar => format!("tar -xf {} -C {}", quote(staged), quote(target)),
            ExtractStrategy::CopyFile => format!(
                "cp {} {}",
                quote(staged),
                quote(&shell::join(target, file_name))
            ),
        }
    }
}

impl fmt::Display for ExtractStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractStrategy::Unzip => f.write_str("unzip"),
            ExtractStrategy::Untar => f.write_str("tar"),
            ExtractStrategy::CopyFile => f.write_str("copy"),
        }
    }
}

/// 在 `{deploy_root}/{name}` 准备好新的源码
pub async fn acquire(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
    settings: &SourceSettings,
) -> StepOutcome {
    match project.source_type {
        SourceMode::Github => from_repository(ctx, session, project, settings).await,
        SourceMode::Upload => from_upload(ctx, session, project, settings).await,
    }
}

fn fatal(ctx: &DeployContext, err: RemoteError, what: &str) -> StepOutcome {
    StepOutcome::Fatal(
        ctx.interruption(&err)
            .unwrap_or_else(|| DeployError::source_failed(format!("{}: {}", what, err))),
    )
}

async fn from_repository(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
    settings: &SourceSettings,
) -> StepOutcome {
    let url = project.source_url.as_deref().map(str::trim).unwrap_or_default();
    let target = project.target_dir();

    // 目录存在即视为已有 checkout，不再校验是否为 git 工作区
    let exists = match ctx.probe(session, &format!("test -d {}", quote(&target))).await {
        Ok(exists) => exists,
        Err(e) => return fatal(ctx, e, "existence probe failed"),
    };

    if exists {
        ctx.log_stdout(&format!("Updating existing checkout at {}", target));
        let primary = pull_command(&target, &settings.primary_branch);
        let first = match ctx.exec(session, &primary).await {
            Ok(output) if output.success() => return StepOutcome::Ok,
            Ok(output) => output,
            Err(e) => return fatal(ctx, e, "git pull failed"),
        };

        ctx.log_stderr(&format!(
            "git pull origin {} failed, retrying with {}",
            settings.primary_branch, settings.fallback_branch
        ));
        let fallback = pull_command(&target, &settings.fallback_branch);
        return match ctx.exec(session, &fallback).await {
            Ok(output) if output.success() => StepOutcome::Ok,
            Ok(output) => StepOutcome::Fatal(DeployError::source_failed(format!(
                "git pull failed on {} ({}) and {} ({})",
                settings.primary_branch,
                first.summary(),
                settings.fallback_branch,
                output.summary()
            ))),
            Err(e) => fatal(ctx, e, "git pull failed"),
        };
    }

    ctx.log_stdout(&format!("Cloning {} into {}", url, target));
    match ctx
        .exec(session, &format!("mkdir -p {}", quote(project.deploy_root())))
        .await
    {
        Ok(_) => {}
        Err(e) => return fatal(ctx, e, "mkdir failed"),
    }

    match ctx
        .exec(session, &format!("git clone -- {} {}", quote(url), quote(&target)))
        .await
    {
        Ok(output) if output.success() => StepOutcome::Ok,
        Ok(output) => StepOutcome::Fatal(DeployError::source_failed(format!(
            "git clone failed: {}",
            output.summary()
        ))),
        Err(e) => fatal(ctx, e, "git clone failed"),
    }
}

fn pull_command(target: &str, branch: &str) -> String {
    format!("cd {} && git pull origin {}", quote(target), quote(branch))
}

async fn from_upload(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
    settings: &SourceSettings,
) -> StepOutcome {
    let (Some(local), Some(file_name)) = (project.source_path.as_deref(), project.upload_file_name())
    else {
        return StepOutcome::Fatal(DeployError::validation(
            "source_path is required when source_type is upload",
        ));
    };
    let target = project.target_dir();

    if let Err(e) = ctx.exec(session, &format!("mkdir -p {}", quote(&target))).await {
        return fatal(ctx, e, "mkdir failed");
    }

    let staged = shell::join(&settings.staging_dir, &format!("{}-{}", ctx.run_id, file_name));
    if let Err(e) = ctx.upload(session, local, &staged).await {
        // 上传中断时远端可能留下半个文件
        let _ = ctx
            .exec_cleanup(session, &format!("rm -f {}", quote(&staged)))
            .await;
        return fatal(ctx, e, "upload failed");
    }

    let strategy = ExtractStrategy::for_file(&file_name);
    ctx.log_stdout(&format!("Extracting {} with {}", file_name, strategy));
    let extracted = ctx
        .exec(session, &strategy.command(&staged, &target, &file_name))
        .await;

    if let Err(e) = ctx
        .exec_cleanup(session, &format!("rm -f {}", quote(&staged)))
        .await
    {
        ctx.log_stderr(&format!("Failed to remove staging file {}: {}", staged, e));
    }

    match extracted {
        Ok(output) if output.success() => StepOutcome::Ok,
        Ok(output) => StepOutcome::Advisory(format!(
            "{} of {} failed: {}",
            strategy,
            file_name,
            output.summary()
        )),
        Err(e) => match ctx.interruption(&e) {
            Some(err) => StepOutcome::Fatal(err),
            None => StepOutcome::Advisory(format!("{} of {} failed: {}", strategy, file_name, e)),
        },
    }
}
