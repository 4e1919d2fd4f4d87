//! Bee Code 命令行入口
//!
//! 处理一条指令，把 OrchestrationState 以 JSON 输出到 stdout；状态为 Error 时退出码为 1。

use std::path::PathBuf;

use anyhow::Context;
use bee_code::config::{load_config, AppConfig};
use bee_code::core::{create_llm_from_config, Orchestrator, SessionStatus};
use bee_code::observability;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bee-code", version, about = "Multi-repository coding assistant orchestrator")]
struct Cli {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 工作区根目录（其下每个子目录是一个仓库）
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// 会话 id，缺省时自动生成
    #[arg(long)]
    session: Option<String>,

    /// 指令
    #[arg(required = true, trailing_var_arg = true)]
    instruction: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let cfg = match load_config(cli.config.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "config load failed, using defaults");
            AppConfig::default()
        }
    };

    let workspace = cli
        .workspace
        .or_else(|| cfg.app.workspace_root.clone())
        .unwrap_or_else(|| PathBuf::from("workspace"));
    if !workspace.is_dir() {
        anyhow::bail!("workspace directory not found: {}", workspace.display());
    }

    let llm = create_llm_from_config(&cfg);
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(&cfg, llm, &workspace).with_event_tx(event_tx);
    let events = tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            if let Ok(json) = serde_json::to_string(&ev) {
                tracing::debug!(event = %json, "agent loop");
            }
        }
    });

    let instruction = cli.instruction.join(" ");
    let state = match cli.session.as_deref() {
        Some(id) => orchestrator.process_in_session(id, &instruction).await,
        None => orchestrator.process(&instruction).await,
    };
    drop(orchestrator);
    let _ = events.await;

    let json = serde_json::to_string_pretty(&state).context("Failed to serialize state")?;
    println!("{}", json);

    if state.status == SessionStatus::Error {
        std::process::exit(1);
    }
    Ok(())
}
