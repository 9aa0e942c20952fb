//! Forge 命令行入口
//!
//! 用法：`forge [--config <file>] [--mode reactive|plan] <message...>`
//! 对一条消息运行一次 Agent，按 SSE 帧格式把过程事件打印到 stdout，最后总是打印 done 帧。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use forge::agent::{create_agent_components, AgentRequest, AgentRunner, ExecutionMode, MemoryRunRecorder};
use forge::config::load_config;
use forge::llm::create_client_from_config;
use forge::react::AgentEvent;
use forge::transport::{sse_frame, DONE_FRAME};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "forge", author, version, about, long_about = None)]
struct Cli {
    /// 配置文件路径（默认 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 执行模式，覆盖配置文件中的 agent.mode
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// 用户消息
    #[arg(required = true, num_args = 1..)]
    message: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    #[value(aliases = ["react", "direct"])]
    Reactive,
    Plan,
}

impl From<Mode> for ExecutionMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Reactive => ExecutionMode::Reactive,
            Mode::Plan => ExecutionMode::Plan,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    forge::observability::init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config).context("Failed to load config")?;

    let mut agent_config = cfg.agent.agent_config();
    if let Some(mode) = cli.mode {
        agent_config.mode = mode.into();
    }

    let llm = create_client_from_config(&cfg);
    let components = create_agent_components(&cfg, llm, Vec::new());
    let runner = AgentRunner::new(components, agent_config, Arc::new(MemoryRunRecorder::new()));

    let (tx, mut rx) = mpsc::unbounded_channel::<AgentEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print!("{}", sse_frame(&event));
        }
    });

    let message_id = uuid::Uuid::new_v4().to_string();
    let result = runner
        .run(AgentRequest::new(message_id, cli.message.join(" ")), &tx)
        .await;
    drop(tx);
    printer.await.context("event printer failed")?;
    print!("{}", DONE_FRAME);

    if let Err(e) = result {
        tracing::error!(error = %e, "run failed");
        std::process::exit(1);
    }
    Ok(())
}
