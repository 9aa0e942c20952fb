//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 按队列顺序返回预设响应，并记录每次调用的消息与选项；
//! 队列为空时回显最后一条 User 消息作为最终回答。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;
use tokio_util::sync::CancellationToken;

use crate::llm::traits::{ChunkStream, ReasoningClient};
use crate::llm::types::{CallOptions, LlmResponse, Message, ModelInfo, Role, StreamChunk};

/// 一次被记录的调用
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub options: CallOptions,
}

/// Mock 客户端：脚本化响应
#[derive(Debug, Default)]
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<LlmResponse, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: impl IntoIterator<Item = LlmResponse>) -> Self {
        let client = Self::new();
        for r in responses {
            client.push_response(r);
        }
        client
    }

    pub fn push_response(&self, response: LlmResponse) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Ok(response));
        }
    }

    pub fn push_error(&self, error: impl Into<String>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(Err(error.into()));
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn next_response(&self, messages: &[Message]) -> Result<LlmResponse, String> {
        let scripted = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(r) => r,
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(LlmResponse::text(format!("Echo from Mock: {}", last_user)))
            }
        }
    }
}

#[async_trait]
impl ReasoningClient for MockLlmClient {
    async fn call(
        &self,
        messages: &[Message],
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, String> {
        if cancel.is_cancelled() {
            return Err("LLM call cancelled".to_string());
        }
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                options: options.clone(),
            });
        }
        self.next_response(messages)
    }

    async fn stream(
        &self,
        messages: &[Message],
        options: &CallOptions,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, String> {
        let resp = self.call(messages, options, cancel).await?;
        let mut chunks: Vec<Result<StreamChunk, String>> = resp
            .content
            .chars()
            .collect::<Vec<_>>()
            .chunks(6)
            .map(|c| Ok(StreamChunk::delta(c.iter().collect::<String>())))
            .collect();
        chunks.push(Ok(StreamChunk {
            delta: String::new(),
            tool_calls: resp.tool_calls,
            finish_reason: Some(resp.finish_reason),
            usage: Some(resp.usage),
        }));
        Ok(Box::pin(stream::iter(chunks)))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "mock".to_string(),
            model: "mock".to_string(),
            max_context_tokens: 4_096,
            supports_tool_calls: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::sse::collect_stream;
    use crate::llm::types::ToolCall;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let mock = MockLlmClient::with_responses([LlmResponse::text("first")]);
        let cancel = CancellationToken::new();
        let msgs = [Message::user("hello")];
        let opts = CallOptions::new();

        assert_eq!(mock.call(&msgs, &opts, &cancel).await.unwrap().content, "first");
        assert_eq!(
            mock.call(&msgs, &opts, &cancel).await.unwrap().content,
            "Echo from Mock: hello"
        );
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_error_and_cancel() {
        let mock = MockLlmClient::new();
        mock.push_error("boom");
        let cancel = CancellationToken::new();
        assert_eq!(mock.call(&[], &CallOptions::new(), &cancel).await.unwrap_err(), "boom");

        cancel.cancel();
        assert!(mock.call(&[], &CallOptions::new(), &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_matches_call() {
        let mock = MockLlmClient::with_responses([LlmResponse {
            content: "streamed content here".into(),
            tool_calls: vec![ToolCall::new("c1", "echo", "{}")],
            finish_reason: "tool_calls".into(),
            ..LlmResponse::default()
        }]);
        let s = mock
            .stream(&[Message::user("x")], &CallOptions::new(), &CancellationToken::new())
            .await
            .unwrap();
        let resp = collect_stream(s).await.unwrap();
        assert_eq!(resp.content, "streamed content here");
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.finish_reason, "tool_calls");
    }
}
