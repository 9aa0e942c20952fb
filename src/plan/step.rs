//! 计划步骤的参数生成
//!
//! 每个带工具的步骤单独调用一次 LLM（低温度、json_object 模式），
//! 提供工具参数 Schema 与前序步骤的结构化输出，返回 JSON 参数对象。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, ExecutionStep, TokenUsage};
use crate::llm::{CallOptions, Message, ReasoningClient};
use crate::plan::PlanStep;
use crate::prompt::{extract_json_block, format_previous_steps, render, ARGS_PROMPT};
use crate::tools::{RegisteredTool, ToolArgs};

const ARGS_TEMPERATURE: f32 = 0.1;

pub struct ArgumentSynthesizer {
    llm: Arc<dyn ReasoningClient>,
}

impl ArgumentSynthesizer {
    pub fn new(llm: Arc<dyn ReasoningClient>) -> Self {
        Self { llm }
    }

    /// 为 `step` 生成 `tool` 的参数；LLM 返回后（无论能否解析）其 token 用量计入 `usage`
    pub async fn synthesize(
        &self,
        tool: &RegisteredTool,
        step: &PlanStep,
        user_message: &str,
        previous: &[ExecutionStep],
        usage: &mut TokenUsage,
        cancel: &CancellationToken,
    ) -> Result<ToolArgs, AgentError> {
        let schema = serde_json::to_string_pretty(&tool.definition.function.parameters)
            .unwrap_or_else(|_| "{}".to_string());
        let previous_steps = format_previous_steps(previous);
        let prompt = render(
            ARGS_PROMPT,
            &[
                ("tool_name", tool.name()),
                ("tool_description", tool.metadata.description.as_str()),
                ("step_description", step.description.as_str()),
                ("user_message", user_message),
                ("previous_steps", previous_steps.as_str()),
                ("parameter_schema", schema.as_str()),
            ],
        );
        tracing::debug!(tool = %tool.name(), step = step.index, prompt_len = prompt.len(), "synthesizing arguments");

        let options = CallOptions::new()
            .with_temperature(ARGS_TEMPERATURE)
            .json_object();
        let resp = self
            .llm
            .call(&[Message::user(prompt)], &options, cancel)
            .await
            .map_err(|e| AgentError::ArgumentSynthesis(format!("{}: {}", tool.name(), e)))?;
        usage.add(&resp.usage);

        ToolArgs::parse(extract_json_block(&resp.content))
            .map_err(|e| AgentError::ArgumentSynthesis(format!("{}: {}", tool.name(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::core::Action;
    use crate::llm::{LlmResponse, MockLlmClient, ResponseFormat};
    use crate::tools::{EchoTool, ToolRegistry};

    fn echo_entry() -> RegisteredTool {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        reg.get("echo").cloned().unwrap()
    }

    #[tokio::test]
    async fn test_synthesize_parses_fenced_json() {
        let mock = Arc::new(MockLlmClient::with_responses([LlmResponse::text(
            "```json\n{\"text\": \"from step 1\"}\n```",
        )]));
        let synth = ArgumentSynthesizer::new(mock.clone());

        let mut prev = ExecutionStep::new(1, Some(Action::tool_call("search", json!({}))));
        prev.tool_output = json!({"title": "Rust"}).as_object().cloned();
        let step = PlanStep::new(2, "echo the title", Some("echo".into()));

        let mut usage = TokenUsage::default();
        let args = synth
            .synthesize(&echo_entry(), &step, "find rust", &[prev], &mut usage, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(args.get_str("text"), Some("from step 1"));

        let call = &mock.calls()[0];
        assert_eq!(call.options.temperature, Some(0.1));
        assert_eq!(call.options.response_format, Some(ResponseFormat::JsonObject));
        let prompt = &call.messages[0].content;
        assert!(prompt.contains("Tool: echo"));
        assert!(prompt.contains("Task: echo the title"));
        assert!(prompt.contains("\"title\": \"Rust\""));
        assert!(prompt.contains("\"required\""));
    }

    #[tokio::test]
    async fn test_synthesize_errors() {
        let mock = Arc::new(MockLlmClient::with_responses([
            LlmResponse::text("no json here").with_usage(TokenUsage::new(40, 6)),
        ]));
        mock.push_error("HTTP 429");
        let synth = ArgumentSynthesizer::new(mock);
        let step = PlanStep::new(1, "echo", Some("echo".into()));
        let cancel = CancellationToken::new();
        let mut usage = TokenUsage::default();

        let err = synth
            .synthesize(&echo_entry(), &step, "x", &[], &mut usage, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ArgumentSynthesis(_)));
        // 解析失败时本次调用的用量仍然计入
        assert_eq!(usage.total_tokens, 46);

        let err = synth
            .synthesize(&echo_entry(), &step, "x", &[], &mut usage, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::ArgumentSynthesis("echo: HTTP 429".into()));
        assert_eq!(usage.total_tokens, 46);
    }
}
