//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 ReasoningClient：call（非流式）、stream（流式分片）、model_info。
//! 错误统一为 String，由执行器转为 AgentError::LlmError。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::llm::types::{CallOptions, LlmResponse, Message, ModelInfo, StreamChunk};

/// 流式分片流
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, String>> + Send>>;

/// 推理客户端 trait
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// 非流式调用；cancel 触发时尽快返回错误
    async fn call(
        &self,
        messages: &[Message],
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, String>;

    /// 流式调用：中间分片带内容增量，最后一个分片带完整工具调用与结束原因
    async fn stream(
        &self,
        messages: &[Message],
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, String>;

    fn model_info(&self) -> ModelInfo;
}
