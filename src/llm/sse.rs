//! 流式响应处理
//!
//! ToolCallAccumulator：按分片声明的 index 归并工具调用，arguments 文本按到达顺序拼接。
//! collect_stream：把分片流折叠成一次完整响应。

use std::collections::BTreeMap;

use futures_util::{Stream, StreamExt};

use crate::core::TokenUsage;
use crate::llm::types::{LlmResponse, StreamChunk, ToolCall};

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    call_type: String,
    name: String,
    arguments: String,
}

/// 按 index 拼装流式工具调用
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个分片；id / name 首次出现时记录，arguments 追加
    pub fn push(&mut self, index: usize, id: Option<&str>, name: Option<&str>, arguments: Option<&str>) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|s| !s.is_empty()) {
            call.id = id.to_string();
        }
        if let Some(name) = name.filter(|s| !s.is_empty()) {
            call.name.push_str(name);
        }
        if let Some(args) = arguments {
            call.arguments.push_str(args);
        }
        if call.call_type.is_empty() {
            call.call_type = "function".to_string();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// 按 index 顺序输出完整的工具调用
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_values()
            .map(|c| {
                let mut call = ToolCall::new(c.id, c.name, c.arguments);
                call.call_type = c.call_type;
                call
            })
            .collect()
    }
}

/// 将分片流折叠为一次完整响应
pub async fn collect_stream<S>(mut stream: S) -> Result<LlmResponse, String>
where
    S: Stream<Item = Result<StreamChunk, String>> + Unpin,
{
    let mut response = LlmResponse::default();
    let mut usage: Option<TokenUsage> = None;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        response.content.push_str(&chunk.delta);
        if !chunk.tool_calls.is_empty() {
            response.tool_calls = chunk.tool_calls;
        }
        if let Some(reason) = chunk.finish_reason {
            response.finish_reason = reason;
        }
        if chunk.usage.is_some() {
            usage = chunk.usage;
        }
    }
    response.usage = usage.unwrap_or_default();
    Ok(response)
}
