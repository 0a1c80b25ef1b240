//! 按项目类型执行构建 / 重启
//!
//! 失败的命令只收集上报，不中止部署；最后总会执行权限修正。

use crate::domain::deploy::StepOutcome;
use crate::domain::{ProjectDescriptor, ProjectType};
use crate::error::{DeployError, RemoteError};
use crate::infra::shell::{self, quote};
use crate::services::ssh::RemoteSession;

use super::context::DeployContext;

/// node 项目使用的进程管理器
const PROCESS_MANAGER: &str = "pm2";

/// 执行 `project.project_type` 对应的构建步骤，然后 `chmod -R 755`
pub async fn run(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
) -> StepOutcome {
    let mut failures = Vec::new();

    let typed = match project.project_type {
        ProjectType::Nodejs => nodejs(ctx, session, project, &mut failures).await,
        ProjectType::Php => php(ctx, session, project, &mut failures).await,
        ProjectType::Python => python(ctx, session, project, &mut failures).await,
        ProjectType::Static => {
            ctx.log_stdout("Static project, no build step");
            Ok(())
        }
        ProjectType::Custom => {
            ctx.log_stdout("Custom project, build is left to custom commands");
            Ok(())
        }
        ProjectType::Unknown => {
            tracing::warn!(run_id = %ctx.run_id, project = %project.name, "Unrecognized project type, skipping build");
            ctx.log_stderr("Unrecognized project type, skipping build");
            Ok(())
        }
    };
    if let Err(fatal) = typed {
        return StepOutcome::Fatal(fatal);
    }

    let target = project.target_dir();
    if let Err(fatal) = advisory(
        ctx,
        session,
        &format!("chmod -R 755 {}", quote(&target)),
        &mut failures,
    )
    .await
    {
        return StepOutcome::Fatal(fatal);
    }

    StepOutcome::from_failures(failures)
}

/// 执行单条命令，非零退出码记为失败
///
/// 返回是否成功；只有取消和超时才返回 `Err`。
async fn advisory(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    command: &str,
    failures: &mut Vec<String>,
) -> Result<bool, DeployError> {
    match ctx.exec(session, command).await {
        Ok(output) if output.success() => Ok(true),
        Ok(output) => {
            failures.push(format!("`{}` {}", command, output.summary()));
            Ok(false)
        }
        Err(e) => interrupted(ctx, e, command, failures).map(|_| false),
    }
}

/// 条件探测；探测本身出错时同样记为失败，后续步骤按"不存在"跳过
async fn check(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    command: &str,
    failures: &mut Vec<String>,
) -> Result<bool, DeployError> {
    match ctx.probe(session, command).await {
        Ok(found) => Ok(found),
        Err(e) => {
            ctx.log_stderr(&format!("Check failed ({}): {}", e, command));
            interrupted(ctx, e, command, failures).map(|_| false)
        }
    }
}

fn interrupted(
    ctx: &DeployContext,
    err: RemoteError,
    command: &str,
    failures: &mut Vec<String>,
) -> Result<(), DeployError> {
    match ctx.interruption(&err) {
        Some(fatal) => Err(fatal),
        None => {
            failures.push(format!("`{}` {}", command, err));
            Ok(())
        }
    }
}

async fn nodejs(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
    failures: &mut Vec<String>,
) -> Result<(), DeployError> {
    let target = quote(&project.target_dir());
    let name = quote(&project.name);

    advisory(ctx, session, &format!("cd {} && npm install", target), failures).await?;

    let has_pm = check(
        ctx,
        session,
        &format!("command -v {} >/dev/null 2>&1", PROCESS_MANAGER),
        failures,
    )
    .await?;
    if !has_pm {
        ctx.log_stdout(&format!("{} not found, skipping process restart", PROCESS_MANAGER));
        return Ok(());
    }

    let managed = check(
        ctx,
        session,
        &format!("{} describe {} >/dev/null 2>&1", PROCESS_MANAGER, name),
        failures,
    )
    .await?;
    let restart = if managed {
        format!("{} restart {}", PROCESS_MANAGER, name)
    } else {
        format!("cd {} && {} start npm --name {} -- start", target, PROCESS_MANAGER, name)
    };
    advisory(ctx, session, &restart, failures).await?;
    Ok(())
}

async fn php(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
    failures: &mut Vec<String>,
) -> Result<(), DeployError> {
    let target = project.target_dir();
    let manifest = shell::join(&target, "composer.json");
    if !check(ctx, session, &format!("test -f {}", quote(&manifest)), failures).await? {
        ctx.log_stdout("No composer.json, skipping dependency install");
        return Ok(());
    }
    advisory(
        ctx,
        session,
        &format!(
            "cd {} && composer install --no-dev --optimize-autoloader",
            quote(&target)
        ),
        failures,
    )
    .await?;
    Ok(())
}

async fn python(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
    failures: &mut Vec<String>,
) -> Result<(), DeployError> {
    let target = project.target_dir();
    let manifest = shell::join(&target, "requirements.txt");
    if !check(ctx, session, &format!("test -f {}", quote(&manifest)), failures).await? {
        ctx.log_stdout("No requirements.txt, skipping dependency install");
        return Ok(());
    }
    advisory(
        ctx,
        session,
        &format!("cd {} && pip3 install -r requirements.txt", quote(&target)),
        failures,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::deploy::context::tests::test_context;
    use crate::services::ssh::mock::MockSession;

    fn project(project_type: ProjectType) -> ProjectDescriptor {
        ProjectDescriptor::github("app1", project_type, "git@host:org/app1.git")
    }

    #[tokio::test]
    async fn test_nodejs_without_process_manager() {
        let session = MockSession::new().on("command -v pm2", 1);
        let probe = session.probe();
        let mut session = session;

        let outcome = run(&test_context(), &mut session, &project(ProjectType::Nodejs)).await;

        assert_eq!(outcome, StepOutcome::Ok);
        assert!(probe.ran("cd /var/www/html/app1 && npm install"));
        assert!(!probe.ran("pm2 restart"));
        assert!(!probe.ran("pm2 start"));
        assert_eq!(
            probe.commands().last().map(String::as_str),
            Some("chmod -R 755 /var/www/html/app1")
        );
    }

    #[tokio::test]
    async fn test_nodejs_restarts_managed_process() {
        let session = MockSession::new();
        let probe = session.probe();
        let mut session = session;

        run(&test_context(), &mut session, &project(ProjectType::Nodejs)).await;

        assert!(probe.ran("pm2 restart app1"));
        assert!(!probe.ran("pm2 start"));
    }

    #[tokio::test]
    async fn test_nodejs_starts_new_process() {
        let session = MockSession::new().on("pm2 describe", 1);
        let probe = session.probe();
        let mut session = session;

        run(&test_context(), &mut session, &project(ProjectType::Nodejs)).await;

        assert!(probe.ran("cd /var/www/html/app1 && pm2 start npm --name app1 -- start"));
    }

    #[tokio::test]
    async fn test_failing_install_still_normalizes_permissions() {
        let session = MockSession::new().on("npm install", 1).on("command -v pm2", 1);
        let probe = session.probe();
        let mut session = session;

        let outcome = run(&test_context(), &mut session, &project(ProjectType::Nodejs)).await;

        assert!(matches!(outcome, StepOutcome::Advisory(ref msg) if msg.contains("npm install")));
        assert!(probe.ran("chmod -R 755"));
    }

    #[tokio::test]
    async fn test_php_without_manifest() {
        let session = MockSession::new().on("test -f", 1);
        let probe = session.probe();
        let mut session = session;

        let outcome = run(&test_context(), &mut session, &project(ProjectType::Php)).await;

        assert_eq!(outcome, StepOutcome::Ok);
        assert!(!probe.ran("composer install"));
    }

    #[tokio::test]
    async fn test_check_channel_error_is_reported() {
        let session = MockSession::new().fail_on("test -f", "channel open failed");
        let probe = session.probe();
        let mut session = session;

        let outcome = run(&test_context(), &mut session, &project(ProjectType::Php)).await;

        assert!(matches!(
            outcome,
            StepOutcome::Advisory(ref msg) if msg.contains("composer.json") && msg.contains("channel open failed")
        ));
        assert!(!probe.ran("composer install"));
        assert!(probe.ran("chmod -R 755"));
    }

    #[tokio::test]
    async fn test_process_manager_check_error_is_reported() {
        let session = MockSession::new().fail_on("command -v pm2", "connection reset");
        let probe = session.probe();
        let mut session = session;

        let outcome = run(&test_context(), &mut session, &project(ProjectType::Nodejs)).await;

        assert!(matches!(outcome, StepOutcome::Advisory(ref msg) if msg.contains("connection reset")));
        assert!(!probe.ran("pm2 describe"));
    }

    #[tokio::test]
    async fn test_php_and_python_install_when_manifest_present() {
        let session = MockSession::new();
        let probe = session.probe();
        let mut session = session;

        run(&test_context(), &mut session, &project(ProjectType::Php)).await;
        run(&test_context(), &mut session, &project(ProjectType::Python)).await;

        assert!(probe.ran("test -f /var/www/html/app1/composer.json"));
        assert!(probe.ran("composer install --no-dev --optimize-autoloader"));
        assert!(probe.ran("test -f /var/www/html/app1/requirements.txt"));
        assert!(probe.ran("pip3 install -r requirements.txt"));
    }

    #[tokio::test]
    async fn test_static_and_unknown_only_chmod() {
        for project_type in [ProjectType::Static, ProjectType::Unknown, ProjectType::Custom] {
            let session = MockSession::new();
            let probe = session.probe();
            let mut session = session;

            let outcome = run(&test_context(), &mut session, &project(project_type)).await;

            assert_eq!(outcome, StepOutcome::Ok);
            assert_eq!(probe.commands(), vec!["chmod -R 755 /var/www/html/app1".to_string()]);
        }
    }
}
