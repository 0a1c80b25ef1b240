//! 部署前备份
//!
//! 尽力而为：所有失败都只作为建议性结果上报，除非对 `backup` 开启了严格模式。

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::domain::deploy::StepOutcome;
use crate::domain::ProjectDescriptor;
use crate::infra::shell::{self, quote};
use crate::services::ssh::RemoteSession;

use super::context::DeployContext;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";
const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// 备份目录与保留数量
#[derive(Clone, Debug)]
pub struct BackupSettings {
    pub backup_dir: String,
    pub retention: usize,
}

/// `{name}_{timestamp}.tar.gz`，ISO 时间戳中的 `:` 和 `.` 替换为 `-`
pub fn archive_name(project: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}{}", project, at.format(TIMESTAMP_FORMAT), ARCHIVE_SUFFIX)
}

/// 从属于 `project` 的备份文件名中解析时间戳
fn archive_timestamp(entry: &str, project: &str) -> Option<NaiveDateTime> {
    let stamp = entry
        .strip_prefix(project)?
        .strip_prefix('_')?
        .strip_suffix(ARCHIVE_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// 超出最新 `keep` 份之外的 `project` 备份
///
/// 只统计能解析为本项目备份的文件名，`app` 不会轮转 `app_v2` 的备份。
/// 至少保留一份，刚创建的备份不会被删除。
pub fn select_expired(listing: &str, project: &str, keep: usize) -> Vec<String> {
    let keep = keep.max(1);
    let mut archives: Vec<(NaiveDateTime, &str)> = listing
        .lines()
        .map(str::trim)
        .filter_map(|entry| archive_timestamp(entry, project).map(|ts| (ts, entry)))
        .collect();
    archives.sort_by(|a, b| b.0.cmp(&a.0));
    archives
        .into_iter()
        .skip(keep)
        .map(|(_, entry)| entry.to_string())
        .collect()
}

/// 在修改前为 `{deploy_root}/{name}` 打包快照
pub async fn run(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
    settings: &BackupSettings,
) -> StepOutcome {
    let target = project.target_dir();

    let exists = match ctx.probe(session, &format!("test -d {}", quote(&target))).await {
        Ok(exists) => exists,
        Err(e) => return remote_failure(ctx, e, "existence probe"),
    };
    if !exists {
        ctx.log_stdout(&format!("No existing deployment at {}, skipping backup", target));
        return StepOutcome::Ok;
    }

    let backup_dir = settings.backup_dir.trim_end_matches('/');
    match ctx
        .exec(session, &format!("mkdir -p {}", quote(backup_dir)))
        .await
    {
        Ok(output) if output.success() => {}
        Ok(output) => {
            return StepOutcome::Advisory(format!(
                "could not create backup directory {}: {}",
                backup_dir,
                output.summary()
            ))
        }
        Err(e) => return remote_failure(ctx, e, "mkdir"),
    }

    let archive = shell::join(backup_dir, &archive_name(&project.name, Utc::now()));
    let tar = format!(
        "tar -czf {} -C {} {}",
        quote(&archive),
        quote(project.deploy_root()),
        quote(&project.name)
    );
    match ctx.exec(session, &tar).await {
        Ok(output) if output.success() => {
            ctx.log_stdout(&format!("Backup created: {}", archive));
        }
        Ok(output) => {
            return StepOutcome::Advisory(format!("backup archive failed: {}", output.summary()))
        }
        Err(e) => return remote_failure(ctx, e, "tar"),
    }

    rotate(ctx, session, &project.name, backup_dir, settings.retention).await
}

/// 只保留单个项目最新的 `keep` 份备份
async fn rotate(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &str,
    backup_dir: &str,
    keep: usize,
) -> StepOutcome {
    let listing = match ctx
        .exec(session, &format!("ls -1t {}", quote(backup_dir)))
        .await
    {
        Ok(output) if output.success() => output.stdout,
        Ok(output) => {
            return StepOutcome::Advisory(format!("could not list backups: {}", output.summary()))
        }
        Err(e) => return remote_failure(ctx, e, "ls"),
    };

    let expired = select_expired(&listing, project, keep);
    if expired.is_empty() {
        return StepOutcome::Ok;
    }

    let paths: Vec<String> = expired
        .iter()
        .map(|entry| quote(&shell::join(backup_dir, entry)))
        .collect();
    match ctx
        .exec(session, &format!("rm -f -- {}", paths.join(" ")))
        .await
    {
        Ok(output) if output.success() => {
            ctx.log_stdout(&format!("Removed {} old backup(s)", expired.len()));
            StepOutcome::Ok
        }
        Ok(output) => StepOutcome::Advisory(format!(
            "could not remove old backups: {}",
            output.summary()
        )),
        Err(e) => remote_failure(ctx, e, "rm"),
    }
}

fn remote_failure(ctx: &DeployContext, err: crate::error::RemoteError, what: &str) -> StepOutcome {
    match ctx.interruption(&err) {
        Some(fatal) => StepOutcome::Fatal(fatal),
        None => StepOutcome::Advisory(format!("backup {} failed: {}", what, err)),
    }
}
