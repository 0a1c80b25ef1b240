//! 用户自定义的部署后命令
//!
//! 每个非空行按顺序在部署目录中执行；某条失败只记录，后续命令照常执行。

use crate::domain::deploy::StepOutcome;
use crate::domain::ProjectDescriptor;
use crate::infra::shell::quote;
use crate::services::ssh::RemoteSession;

use super::context::DeployContext;

/// 整行放进 `{ }`，只有 `cd` 成功才会执行
fn in_directory(target: &str, command: &str) -> String {
    format!("cd {} && {{\n{}\n}}", target, command)
}

pub async fn run(
    ctx: &DeployContext,
    session: &mut dyn RemoteSession,
    project: &ProjectDescriptor,
) -> StepOutcome {
    let commands = project.custom_command_list();
    if commands.is_empty() {
        return StepOutcome::Ok;
    }

    let target = quote(&project.target_dir());
    let total = commands.len();
    let mut failures = Vec::new();

    for (index, command) in commands.into_iter().enumerate() {
        ctx.log_stdout(&format!("[{}/{}] {}", index + 1, total, command));

        // 自定义命令本身就是用户的 shell，只对目录做转义
        match ctx.exec(session, &in_directory(&target, &command)).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                ctx.log_stderr(&format!("Custom command failed ({}): {}", output.summary(), command));
                failures.push(format!("`{}` {}", command, output.summary()));
            }
            Err(e) => {
                if let Some(fatal) = ctx.interruption(&e) {
                    return StepOutcome::Fatal(fatal);
                }
                failures.push(format!("`{}` {}", command, e));
            }
        }
    }

    StepOutcome::from_failures(failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProjectType;
    use crate::services::deploy::context::tests::test_context;
    use crate::services::ssh::mock::MockSession;

    #[tokio::test]
    async fn test_failure_does_not_stop_later_commands() {
        let session = MockSession::new().on("exit 1", 1);
        let probe = session.probe();
        let mut session = session;
        let mut project = ProjectDescriptor::github("app1", ProjectType::Custom, "u");
        project.custom_commands = Some("echo one\n\nexit 1\necho two".to_string());

        let outcome = run(&test_context(), &mut session, &project).await;

        assert_eq!(
            probe.commands(),
            vec![
                "cd /var/www/html/app1 && {\necho one\n}".to_string(),
                "cd /var/www/html/app1 && {\nexit 1\n}".to_string(),
                "cd /var/www/html/app1 && {\necho two\n}".to_string(),
            ]
        );
        assert!(matches!(outcome, StepOutcome::Advisory(ref msg) if msg.contains("exit 1")));
    }

    #[tokio::test]
    async fn test_compound_line_stays_in_target() {
        let session = MockSession::new();
        let probe = session.probe();
        let mut session = session;
        let mut project = ProjectDescriptor::github("app1", ProjectType::Custom, "u");
        project.custom_commands = Some("true & pwd\nfalse || touch marker; ls".to_string());

        run(&test_context(), &mut session, &project).await;

        // 整行放进 `{ }`，而不是只有第一段被 `&&` 约束
        assert_eq!(
            probe.commands(),
            vec![
                "cd /var/www/html/app1 && {\ntrue & pwd\n}".to_string(),
                "cd /var/www/html/app1 && {\nfalse || touch marker; ls\n}".to_string(),
            ]
        );
    }

    #[test]
    fn test_in_directory_quotes_only_the_target() {
        let command = in_directory(&quote("/srv/my app"), "echo $HOME");
        assert_eq!(command, "cd '/srv/my app' && {\necho $HOME\n}");
    }

    #[tokio::test]
    async fn test_no_commands() {
        let session = MockSession::new();
        let probe = session.probe();
        let mut session = session;
        let mut project = ProjectDescriptor::github("app1", ProjectType::Custom, "u");
        project.custom_commands = Some("  \n\n".to_string());

        assert_eq!(run(&test_context(), &mut session, &project).await, StepOutcome::Ok);
        assert!(probe.commands().is_empty());
    }
}
