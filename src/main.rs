//! Deploy Orchestrator - 远程部署编排
//!
//! Usage:
//! - Deploy: `deploy-orchestrator request.json`
//! - Strict steps: `deploy-orchestrator request.json --strict build,custom`
//! - Custom deadline: `deploy-orchestrator request.json --timeout 600`

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use deploy_orchestrator::config::env::constants;
use deploy_orchestrator::{DeployEngine, DeployRequest, EngineConfig, RunOptions, StrictSteps};

/// 命令行参数
#[derive(Debug, Default)]
struct CliArgs {
    request: Option<PathBuf>,
    strict: Option<String>,
    timeout_secs: Option<u64>,
}

/// 解析命令行参数
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--strict" if i + 1 < args.len() => {
                cli.strict = Some(args[i + 1].clone());
                i += 2;
            }
            "--timeout" if i + 1 < args.len() => {
                cli.timeout_secs = args[i + 1].parse().ok();
                i += 2;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other if cli.request.is_none() && !other.starts_with('-') => {
                cli.request = Some(PathBuf::from(other));
                i += 1;
            }
            other => {
                eprintln!("Ignoring unknown argument: {}", other);
                i += 1;
            }
        }
    }

    cli
}

fn print_help() {
    println!("Deploy Orchestrator v{} - 远程部署编排", constants::VERSION);
    println!();
    println!("USAGE:");
    println!("    deploy-orchestrator <REQUEST.json> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --strict <STEPS>   Treat failures of these steps as fatal (backup,extract,build,custom)");
    println!("    --timeout <SECS>   Abort the whole deployment after this many seconds");
    println!("    -h, --help         Print help information");
    println!();
    println!("ENVIRONMENT:");
    println!("    DEPLOY_CONNECT_TIMEOUT_SECS, DEPLOY_COMMAND_TIMEOUT_SECS, DEPLOY_RUN_TIMEOUT_SECS,");
    println!("    DEPLOY_BACKUP_DIR, DEPLOY_BACKUP_RETENTION, DEPLOY_PRIMARY_BRANCH,");
    println!("    DEPLOY_FALLBACK_BRANCH, DEPLOY_STAGING_DIR, DEPLOY_STRICT_STEPS,");
    println!("    DEPLOY_HOST_KEY_FINGERPRINT, RUST_LOG");
}

async fn run(cli: CliArgs) -> anyhow::Result<bool> {
    let path = cli
        .request
        .context("missing deploy request file (see --help)")?;
    let request = DeployRequest::load(&path).await?;

    let mut config = EngineConfig::from_env();
    if let Some(list) = cli.strict.as_deref() {
        config.strict = StrictSteps::parse(list);
    }
    if let Some(secs) = cli.timeout_secs.filter(|s| *s > 0) {
        config.run_timeout = Duration::from_secs(secs);
    }

    let engine = DeployEngine::new(config);
    let outcome = engine
        .run(&request.project, &request.server, RunOptions::default())
        .await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.is_success())
}

fn main() {
    deploy_orchestrator::init_tracing();
    let cli = parse_args();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    match rt.block_on(run(cli)) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
