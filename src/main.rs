//! Scenegen CLI
//!
//! 用法: scenegen [--config path] [--conversation id] "<utterance>"
//! 跑一轮流水线并把响应 JSON 打印到 stdout（不在本地执行生成任务）。

use std::path::PathBuf;

use anyhow::{bail, Context};
use scenegen::config::load_config;
use scenegen::core::{ChatRequest, OrchestratorBuilder};

struct CliArgs {
    config: Option<PathBuf>,
    conversation_id: String,
    utterance: String,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut config = None;
    let mut conversation_id = "cli".to_string();
    let mut words = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next().context("--config needs a path")?)),
            "--conversation" => conversation_id = args.next().context("--conversation needs an id")?,
            _ => words.push(arg),
        }
    }
    let utterance = words.join(" ");
    if utterance.trim().is_empty() {
        bail!("usage: scenegen [--config path] [--conversation id] \"<utterance>\"");
    }
    Ok(CliArgs {
        config,
        conversation_id,
        utterance,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    scenegen::observability::init();
    let args = parse_args()?;

    let mut cfg = load_config(args.config).context("Failed to load config")?;
    cfg.app.execute_actions = false;

    let orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to build orchestrator")?;

    let response = orchestrator
        .handle_chat(ChatRequest {
            input: args.utterance,
            conversation_id: args.conversation_id,
            history: None,
        })
        .await
        .context("Pipeline failed")?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
