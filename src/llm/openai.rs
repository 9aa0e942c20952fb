//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url，兼容 DeepSeek、自建代理等）；
//! tools / tool_choice / response_format / stop / top_p 按需带上。
//! 流式模式在后台任务里消费 async_openai 的分片流，按 index 拼装工具调用，通过 mpsc 通道输出分片。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionStreamResponse,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::TokenUsage;
use crate::llm::sse::ToolCallAccumulator;
use crate::llm::traits::{ChunkStream, ReasoningClient};
use crate::llm::types::{CallOptions, LlmResponse, Message, ModelInfo, ResponseFormat, StreamChunk, ToolCall};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Token 使用统计（累计值，跨多次调用）
#[derive(Debug, Clone, Default)]
pub struct UsageCounter {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl UsageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, usage: &TokenUsage) {
        self.prompt_tokens.fetch_add(usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(usage.completion_tokens, Ordering::Relaxed);
        self.total_tokens.fetch_add(usage.total_tokens, Ordering::Relaxed);
    }

    pub fn get(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
        }
    }
}

/// 本地类型与 async_openai 类型之间按 chat completions 的 JSON 形状互转
fn convert<T: Serialize, U: DeserializeOwned>(value: &T) -> Result<U, String> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|e| e.to_string())
}

/// 取枚举（如 finish_reason）序列化后的字符串形式
fn wire_str<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_value(value).ok()?.as_str().map(String::from)
}

fn token_usage(prompt: u64, completion: u64, total: u64) -> TokenUsage {
    TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: if total > 0 { total } else { prompt + completion },
    }
}

/// 流式解析状态：内容增量直接输出，工具调用 / 结束原因 / 用量累积到最后一个分片
#[derive(Default)]
struct StreamState {
    calls: ToolCallAccumulator,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl StreamState {
    /// 处理一个分片，返回其中的内容增量
    fn apply(&mut self, chunk: &CreateChatCompletionStreamResponse) -> Option<String> {
        if let Some(u) = &chunk.usage {
            self.usage = Some(token_usage(
                u.prompt_tokens as u64,
                u.completion_tokens as u64,
                u.total_tokens as u64,
            ));
        }
        let mut delta = String::new();
        for choice in &chunk.choices {
            if let Some(c) = &choice.delta.content {
                delta.push_str(c);
            }
            for tc in choice.delta.tool_calls.iter().flatten() {
                let (name, args) = match &tc.function {
                    Some(f) => (f.name.as_deref(), f.arguments.as_deref()),
                    None => (None, None),
                };
                self.calls.push(tc.index as usize, tc.id.as_deref(), name, args);
            }
            if let Some(r) = choice.finish_reason.as_ref().and_then(wire_str) {
                self.finish_reason = Some(r);
            }
        }
        if delta.is_empty() {
            None
        } else {
            Some(delta)
        }
    }

    fn into_final_chunk(self) -> StreamChunk {
        StreamChunk {
            delta: String::new(),
            tool_calls: self.calls.finish(),
            finish_reason: Some(self.finish_reason.unwrap_or_else(|| "stop".to_string())),
            usage: self.usage,
        }
    }
}

/// 按模型名推断上下文长度
pub fn context_window(model: &str) -> u32 {
    let m = model.to_lowercase();
    if m.contains("gpt-4o") || m.contains("gpt-4-turbo") {
        128_000
    } else if m.starts_with("gpt-4") {
        8_192
    } else {
        4_096
    }
}

/// OpenAI 兼容客户端：持有 async_openai Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
    /// 累计 token 使用统计
    pub usage: UsageCounter,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = OpenAIConfig::new()
            .with_api_base(base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/'))
            .with_api_key(api_key);

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout,
            usage: UsageCounter::new(),
        }
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.usage.get()
    }

    /// 构造 chat completions 请求
    pub fn build_request(&self, messages: &[Message], options: &CallOptions) -> Result<CreateChatCompletionRequest, String> {
        let messages = messages
            .iter()
            .map(convert::<_, ChatCompletionRequestMessage>)
            .collect::<Result<Vec<_>, _>>()?;

        let mut request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()
            .map_err(|e| e.to_string())?;

        request.temperature = options.temperature;
        request.top_p = options.top_p;
        if let Some(n) = options.max_tokens {
            request.max_completion_tokens = Some(n);
        }
        if !options.stop.is_empty() {
            request.stop = Some(convert(&options.stop)?);
        }
        if !options.tools.is_empty() {
            request.tools = Some(options.tools.iter().map(convert).collect::<Result<Vec<_>, _>>()?);
            if let Some(choice) = &options.tool_choice {
                request.tool_choice = Some(convert(&choice.to_json())?);
            }
        }
        if let Some(ResponseFormat::JsonObject) = options.response_format {
            request.response_format = Some(convert(&json!({ "type": ResponseFormat::JsonObject.as_str() }))?);
        }
        Ok(request)
    }
}

#[async_trait]
impl ReasoningClient for OpenAiClient {
    async fn call(
        &self,
        messages: &[Message],
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, String> {
        let request = self.build_request(messages, options)?;
        tracing::debug!(model = %self.model, messages = messages.len(), "llm call");

        let chat = self.client.chat();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err("LLM call cancelled".to_string()),
            r = tokio::time::timeout(self.timeout, chat.create(request)) => r
                .map_err(|_| format!("LLM call timed out after {}s", self.timeout.as_secs()))?
                .map_err(|e| e.to_string())?,
        };

        let usage = response
            .usage
            .as_ref()
            .map(|u| token_usage(u.prompt_tokens as u64, u.completion_tokens as u64, u.total_tokens as u64))
            .unwrap_or_default();
        self.usage.add(&usage);

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "LLM response has no choices".to_string())?;

        let tool_calls: Vec<ToolCall> = match &choice.message.tool_calls {
            Some(calls) => convert(calls)?,
            None => Vec::new(),
        };

        Ok(LlmResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: choice
                .finish_reason
                .as_ref()
                .and_then(wire_str)
                .unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, String> {
        let mut request = self.build_request(messages, options)?;
        request.stream_options = Some(convert(&json!({ "include_usage": true }))?);

        let chat = self.client.chat();
        let mut upstream = tokio::select! {
            _ = cancel.cancelled() => return Err("LLM stream cancelled".to_string()),
            r = tokio::time::timeout(self.timeout, chat.create_stream(request)) => r
                .map_err(|_| format!("LLM stream timed out after {}s", self.timeout.as_secs()))?
                .map_err(|e| e.to_string())?,
        };

        let (tx, rx) = mpsc::channel::<Result<StreamChunk, String>>(64);
        let cancel = cancel.clone();
        let counter = self.usage.clone();

        tokio::spawn(async move {
            let mut state = StreamState::default();
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tx.send(Err("LLM stream cancelled".to_string())).await;
                        return;
                    }
                    n = upstream.next() => n,
                };
                match next {
                    Some(Ok(chunk)) => {
                        if let Some(delta) = state.apply(&chunk) {
                            if tx.send(Ok(StreamChunk::delta(delta))).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(e.to_string())).await;
                        return;
                    }
                    None => break,
                }
            }

            let last = state.into_final_chunk();
            if let Some(u) = &last.usage {
                counter.add(u);
            }
            let _ = tx.send(Ok(last)).await;
        });

        Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_string(),
            model: self.model.clone(),
            max_context_tokens: context_window(&self.model),
            supports_tool_calls: true,
        }
    }
}
