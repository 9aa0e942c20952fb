//! 执行轨迹：每次运行一份 Trace，按步追加 ExecutionStep
//!
//! 步号从 1 开始严格递增；只有真正调用过工具的步骤计入 used_tools。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 步骤动作：调用了哪个工具、使用什么参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: String,
    pub tool: String,
    pub args: Value,
}

impl Action {
    pub fn tool_call(tool: impl Into<String>, args: Value) -> Self {
        Self {
            kind: "tool_call".to_string(),
            tool: tool.into(),
            args,
        }
    }
}

/// 轨迹中的一步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step: usize,
    /// 计划中无工具的步骤没有 action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub observation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Map<String, Value>>,
    pub elapsed_ms: u64,
    /// RFC 3339
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionStep {
    pub fn new(step: usize, action: Option<Action>) -> Self {
        Self {
            step,
            action,
            observation: String::new(),
            tool_output: None,
            elapsed_ms: 0,
            timestamp: chrono::Utc::now().to_rfc3339(),
            error: None,
        }
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.action.as_ref().map(|a| a.tool.as_str())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// 单个工具的使用统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub count: u32,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Final,
    MaxSteps,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Final => write!(f, "final"),
            FinishReason::MaxSteps => write!(f, "max_steps"),
        }
    }
}

/// Token 用量（一次运行内所有 LLM 调用的累加）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// 一次运行的完整轨迹
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub steps: Vec<ExecutionStep>,
    pub used_tools: BTreeMap<String, ToolUsage>,
    pub final_answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    pub token_usage: TokenUsage,
    pub total_ms: u64,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一步应使用的步号（上一步 + 1）
    pub fn next_index(&self) -> usize {
        self.steps.last().map(|s| s.step + 1).unwrap_or(1)
    }

    /// 追加一步；步号必须大于已有最后一步
    pub fn push_step(&mut self, step: ExecutionStep) {
        debug_assert!(
            step.step >= self.next_index(),
            "trace step index must increase"
        );
        self.steps.push(step);
    }

    /// 记录一次真实的工具调用
    pub fn record_tool_use(&mut self, tool: &str, elapsed_ms: u64) {
        let usage = self.used_tools.entry(tool.to_string()).or_default();
        usage.count += 1;
        usage.total_ms += elapsed_ms;
    }

    pub fn add_usage(&mut self, usage: &TokenUsage) {
        self.token_usage.add(usage);
    }

    pub fn finish(&mut self, answer: impl Into<String>, reason: FinishReason, total_ms: u64) {
        self.final_answer = answer.into();
        self.finish_reason = Some(reason);
        self.total_ms = total_ms;
    }
}
