//! 集群 DNS 修复命令行入口

use anyhow::Context;
use clap::{Parser, Subcommand};
use cluster_remediation::{
    config::{AppConfig, NodeBackend},
    dns_remediation_plan, node, telemetry, AppError, RemediationExecutor, TerminalStatus,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "cluster-remediation",
    version,
    about = "Post-provision DNS remediation for cluster nodes"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 在控制面节点上执行 DNS 修复计划
    Run {
        /// 节点执行后端
        #[arg(long, value_enum)]
        backend: Option<NodeBackend>,
        /// 节点名称（容器名或主机地址）
        #[arg(long)]
        node: Option<String>,
        /// 集群名称
        #[arg(long)]
        cluster: Option<String>,
        /// DNS 步骤失败时重试后继续
        #[arg(long)]
        tolerate_dns_failure: bool,
        /// 以 JSON 输出执行报告
        #[arg(long)]
        json: bool,
    },
    /// 打印修复计划
    Plan {
        #[arg(long)]
        tolerate_dns_failure: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 按优先级加载：.env.local > .env
    if let Ok(name) = std::env::var("REMEDIATION_ENV") {
        dotenv::from_filename(format!(".env.{}", name)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    let mut config = AppConfig::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Plan {
            tolerate_dns_failure,
        } => {
            config.plan.tolerate_dns_failure |= tolerate_dns_failure;
            let plan = dns_remediation_plan(&config.plan)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
            Ok(())
        }
        Command::Run {
            backend,
            node,
            cluster,
            tolerate_dns_failure,
            json,
        } => {
            if let Some(backend) = backend {
                config.node.backend = backend;
            }
            if node.is_some() {
                config.node.name = node;
            }
            if let Some(cluster) = cluster {
                config.node.cluster = cluster;
            }
            config.plan.tolerate_dns_failure |= tolerate_dns_failure;
            config.validate().context("Invalid configuration")?;

            telemetry::init_telemetry(&config);
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "cluster-remediation starting");

            if let Err(e) = run(&config, json).await {
                tracing::error!(error = %e, "Remediation did not complete");
                eprintln!("Error: {}", e);
                std::process::exit(e.exit_code());
            }
            Ok(())
        }
    }
}

async fn run(config: &AppConfig, json: bool) -> Result<(), AppError> {
    let plan = dns_remediation_plan(&config.plan)?;
    let node = node::connect(config).await?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing current command");
            signal_token.cancel();
        }
    });

    let executor =
        RemediationExecutor::new(config.plan.command_timeout()).with_cancellation(cancel);
    let sink = TerminalStatus::stderr();

    let report = executor.run_with_report(node.as_ref(), &plan, &sink).await?;

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(text) => println!("{}", text),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize run report"),
        }
    }

    for step in report.ignored_failures() {
        tracing::warn!(
            step = step.index + 1,
            description = %step.description,
            attempts = step.attempts,
            "Step failed and was ignored"
        );
    }

    Ok(())
}
