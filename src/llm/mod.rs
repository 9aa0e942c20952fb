//! LLM 层：推理客户端抽象、请求 / 响应类型、流式分片拼装、实现（OpenAI 兼容 / Mock）

pub mod mock;
pub mod openai;
pub mod sse;
pub mod traits;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

pub use mock::{MockLlmClient, RecordedCall};
pub use openai::{OpenAiClient, UsageCounter};
pub use sse::{collect_stream, ToolCallAccumulator};
pub use traits::{ChunkStream, ReasoningClient};
pub use types::{
    CallOptions, FunctionCall, FunctionDefinition, LlmResponse, Message, ModelInfo, ResponseFormat, Role,
    StreamChunk, ToolCall, ToolChoice, ToolDefinition,
};

/// 按配置创建推理客户端：provider 为 mock 或没有 API Key 时使用 Mock
pub fn create_client_from_config(cfg: &AppConfig) -> Arc<dyn ReasoningClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = cfg
        .llm
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    match (provider.as_str(), api_key) {
        ("mock", _) => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
        (_, Some(key)) => {
            tracing::info!("Using OpenAI-compatible LLM ({})", cfg.agent.model);
            Arc::new(OpenAiClient::new(
                Some(&cfg.llm.base_url),
                &cfg.agent.model,
                Some(&key),
                Duration::from_secs(cfg.llm.request_timeout_secs),
            ))
        }
        (_, None) => {
            tracing::warn!("No API key set, using Mock LLM");
            Arc::new(MockLlmClient::new())
        }
    }
}
