//! ReAct 主循环
//!
//! Reasoning → 无工具调用则 Final；有工具调用则按顺序逐个经 ToolExecutor 执行，
//! 每个结果作为 tool 消息追加，再回到 Reasoning。最多 max_steps 轮，
//! 用尽时返回固定的兜底回答并标记 max_steps。
//! 未注册 / 不在允许列表内的工具、无法解析的参数都记为错误步骤，错误文本回传给 LLM。

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::agent::AgentConfig;
use crate::core::{Action, AgentError, ExecutionStep, FinishReason, RunInput, RunOutcome, Trace};
use crate::llm::{collect_stream, CallOptions, LlmResponse, Message, ReasoningClient, ToolCall, ToolChoice};
use crate::prompt::SYSTEM_PROMPT;
use crate::react::events::{AgentEvent, EventSink};
use crate::tools::{ExecutionContext, InvocationResult, ToolArgs, ToolExecutor};

/// 步数用尽时的兜底回答
pub const MAX_STEPS_ANSWER: &str = "已达到最大步骤数限制，任务可能未完全完成。";

/// ReAct 执行器：持有 LLM、工具执行器与本次运行配置
pub struct ReactExecutor {
    llm: Arc<dyn ReasoningClient>,
    tools: Arc<ToolExecutor>,
    config: AgentConfig,
    system_prompt: String,
}

impl ReactExecutor {
    pub fn new(llm: Arc<dyn ReasoningClient>, tools: Arc<ToolExecutor>, config: AgentConfig) -> Self {
        Self {
            llm,
            tools,
            config,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    /// 覆盖系统提示词
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    fn initial_messages(&self, input: &RunInput) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt.clone())];
        if !input.conversation_context.is_empty() {
            messages.push(Message::user(format!(
                "Previous conversation context:\n{}",
                input.conversation_context
            )));
        }
        messages.push(Message::user(input.user_message.clone()));
        messages
    }

    async fn reason(&self, messages: &[Message], options: &CallOptions, input: &RunInput) -> Result<LlmResponse, AgentError> {
        let result = if self.config.stream_reasoning {
            match self.llm.stream(messages, options, &input.cancel).await {
                Ok(s) => collect_stream(s).await,
                Err(e) => Err(e),
            }
        } else {
            self.llm.call(messages, options, &input.cancel).await
        };
        result.map_err(|e| {
            if input.cancel.is_cancelled() {
                AgentError::Cancelled(input.run_id.clone())
            } else {
                AgentError::LlmError(e)
            }
        })
    }

    pub async fn run(&self, input: &RunInput, sink: &dyn EventSink) -> Result<RunOutcome, AgentError> {
        let start = Instant::now();
        let mut trace = Trace::new();
        let mut messages = self.initial_messages(input);

        let defs = self
            .tools
            .registry()
            .list_definitions(&self.config.allowed_tools);
        let mut options = CallOptions::new().with_temperature(self.config.temperature);
        if !defs.is_empty() {
            options = options.with_tools(defs, ToolChoice::Auto);
        }

        tracing::info!(run_id = %input.run_id, max_steps = self.config.max_steps, "react run started");

        for round in 1..=self.config.max_steps {
            if input.cancel.is_cancelled() {
                return Err(AgentError::Cancelled(input.run_id.clone()));
            }

            let resp = self.reason(&messages, &options, input).await?;
            trace.add_usage(&resp.usage);

            if resp.tool_calls.is_empty() {
                tracing::info!(run_id = %input.run_id, round, "react run finished");
                let answer = resp.content;
                trace.finish(answer.clone(), FinishReason::Final, start.elapsed().as_millis() as u64);
                sink.emit(AgentEvent::Final {
                    answer: answer.clone(),
                    finish_reason: FinishReason::Final,
                    trace: trace.clone(),
                    token_usage: trace.token_usage,
                });
                return Ok(RunOutcome {
                    answer,
                    finish_reason: FinishReason::Final,
                    trace,
                    plan: None,
                    success: true,
                });
            }

            tracing::debug!(round, calls = resp.tool_calls.len(), "tool calls requested");
            messages.push(Message::assistant_with_calls(resp.content, resp.tool_calls.clone()));

            for call in &resp.tool_calls {
                let index = trace.next_index();
                let step = self.execute_call(index, call, input, sink, &mut trace).await;
                messages.push(Message::tool(
                    call.id.clone(),
                    call.function.name.clone(),
                    step.observation.clone(),
                ));
                trace.push_step(step);
            }
        }

        tracing::warn!(run_id = %input.run_id, "react run hit max steps");
        trace.finish(MAX_STEPS_ANSWER, FinishReason::MaxSteps, start.elapsed().as_millis() as u64);
        sink.emit(AgentEvent::Final {
            answer: MAX_STEPS_ANSWER.to_string(),
            finish_reason: FinishReason::MaxSteps,
            trace: trace.clone(),
            token_usage: trace.token_usage,
        });
        Ok(RunOutcome {
            answer: MAX_STEPS_ANSWER.to_string(),
            finish_reason: FinishReason::MaxSteps,
            trace,
            plan: None,
            success: false,
        })
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.config.allowed_tools.is_empty() || self.config.allowed_tools.iter().any(|t| t == name)
    }

    async fn execute_call(
        &self,
        index: usize,
        call: &ToolCall,
        input: &RunInput,
        sink: &dyn EventSink,
        trace: &mut Trace,
    ) -> ExecutionStep {
        let name = call.function.name.as_str();
        sink.emit(AgentEvent::StepStart {
            step: index,
            tool: name.to_string(),
        });

        let parsed = ToolArgs::parse(&call.function.arguments);
        let raw_args = match &parsed {
            Ok(a) => a.to_value(),
            Err(_) => Value::String(call.function.arguments.clone()),
        };

        let rejected = if !self.is_allowed(name) || !self.tools.registry().contains(name) {
            Some(AgentError::ToolNotFound(name.to_string()))
        } else {
            parsed.as_ref().err().map(|e| AgentError::InvalidArguments(e.clone()))
        };

        if let Some(err) = rejected {
            return rejected_step(index, name, raw_args, &err, sink);
        }

        let args = parsed.unwrap_or_default();
        let (step, result) = run_tool_step(&self.tools, input, index, name, &args, raw_args, sink).await;
        if result.executed() {
            trace.record_tool_use(name, result.duration_ms());
        }
        step
    }
}

/// 未调用工具即失败的步骤（工具不可用、参数无效）：记为错误步骤，attempts 为 0
pub(crate) fn rejected_step(
    index: usize,
    tool: &str,
    raw_args: Value,
    err: &AgentError,
    sink: &dyn EventSink,
) -> ExecutionStep {
    tracing::error!(tool = %tool, step = index, error = %err, "tool call rejected");
    let mut step = ExecutionStep::new(index, Some(Action::tool_call(tool, raw_args)));
    step.observation = format!("Error: {}", err);
    step.error = Some(err.to_string());
    sink.emit(AgentEvent::StepEnd {
        step: index,
        tool: tool.to_string(),
        observation: step.observation.clone(),
        elapsed_ms: 0,
        attempts: 0,
    });
    step
}

/// 执行一个工具步骤：带进度事件调用 ToolExecutor，生成 trace 步骤并发出 step_end
pub(crate) async fn run_tool_step(
    tools: &ToolExecutor,
    input: &RunInput,
    index: usize,
    tool: &str,
    args: &ToolArgs,
    raw_args: Value,
    sink: &dyn EventSink,
) -> (ExecutionStep, InvocationResult) {
    let ctx = ExecutionContext::new(input.run_id.clone(), index, input.cancel.clone());
    let on_progress = |attempt: u32, message: &str| {
        sink.emit(AgentEvent::ToolProgress {
            step: index,
            tool: tool.to_string(),
            attempt,
            message: message.to_string(),
        });
    };
    let result = tools.execute_with_progress(&ctx, tool, args, &on_progress).await;

    let mut step = ExecutionStep::new(index, Some(Action::tool_call(tool, raw_args)));
    step.observation = result.observation();
    step.tool_output = result
        .output
        .as_ref()
        .filter(|o| o.has_output())
        .map(|o| o.output.clone());
    step.error = result.error.as_ref().map(|e| e.to_string());
    step.elapsed_ms = result.duration_ms();

    if let Some(e) = &result.error {
        tracing::error!(tool = %tool, step = index, error = %e, "tool step failed");
    }

    sink.emit(AgentEvent::StepEnd {
        step: index,
        tool: tool.to_string(),
        observation: step.observation.clone(),
        elapsed_ms: step.elapsed_ms,
        attempts: result.attempts,
    });
    (step, result)
}
