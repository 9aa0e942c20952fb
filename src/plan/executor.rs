//! 计划执行器（Plan-and-Execute）
//!
//! 1. 一次 LLM 调用生成 JSON 计划；解析失败即运行失败
//! 2. 依赖校验，结果随 plan_start 事件发出（默认仅提示，严格模式下不通过即失败）
//! 3. 逐步执行：无工具步骤直接跳过；有工具步骤先生成参数再经 ToolExecutor 执行。
//!    失败且没有结构化输出时，其余步骤全部跳过
//! 4. 总结调用生成最终回答；总结失败时使用固定文案

use std::sync::Arc;
use std::time::Instant;

use crate::agent::AgentConfig;
use crate::core::{AgentError, ExecutionStep, FinishReason, RunInput, RunOutcome, Trace};
use crate::llm::{CallOptions, Message, ReasoningClient};
use crate::plan::step::ArgumentSynthesizer;
use crate::plan::{Plan, PlanValidator, StepStatus};
use crate::prompt::{
    format_execution_trace, format_tool_definitions, plan_response_schema_json, render, PLAN_PROMPT,
    PLAN_SYSTEM_PROMPT, SUMMARY_PROMPT,
};
use crate::react::events::{AgentEvent, EventSink};
use crate::react::loop_::{rejected_step, run_tool_step};
use crate::tools::{ToolArgs, ToolExecutor};

/// 总结失败时的兜底回答
pub const SUMMARY_FALLBACK: &str = "任务已执行完成，但生成总结失败。";

pub struct PlanExecutor {
    llm: Arc<dyn ReasoningClient>,
    tools: Arc<ToolExecutor>,
    config: AgentConfig,
    validator: PlanValidator,
    synthesizer: ArgumentSynthesizer,
}

impl PlanExecutor {
    pub fn new(llm: Arc<dyn ReasoningClient>, tools: Arc<ToolExecutor>, config: AgentConfig) -> Self {
        let validator = PlanValidator::new(tools.registry().clone());
        let synthesizer = ArgumentSynthesizer::new(llm.clone());
        Self {
            llm,
            tools,
            config,
            validator,
            synthesizer,
        }
    }

    fn is_allowed(&self, tool: &str) -> bool {
        self.config.allowed_tools.is_empty() || self.config.allowed_tools.iter().any(|t| t == tool)
    }

    fn check_cancel(input: &RunInput) -> Result<(), AgentError> {
        if input.cancel.is_cancelled() {
            Err(AgentError::Cancelled(input.run_id.clone()))
        } else {
            Ok(())
        }
    }

    /// 生成计划
    pub async fn generate_plan(&self, input: &RunInput, trace: &mut Trace) -> Result<Plan, AgentError> {
        Self::check_cancel(input)?;
        let defs = self
            .tools
            .registry()
            .list_definitions(&self.config.allowed_tools);
        let history = if input.conversation_context.is_empty() {
            String::new()
        } else {
            format!("\nConversation history:\n{}\n", input.conversation_context)
        };
        let tool_definitions = format_tool_definitions(&defs);
        let plan_schema = plan_response_schema_json();
        let prompt = render(
            PLAN_PROMPT,
            &[
                ("tool_definitions", tool_definitions.as_str()),
                ("user_message", input.user_message.as_str()),
                ("conversation_history", history.as_str()),
                ("plan_schema", plan_schema.as_str()),
            ],
        );
        tracing::debug!(prompt_len = prompt.len(), tools = defs.len(), "generating plan");

        let messages = [Message::system(PLAN_SYSTEM_PROMPT), Message::user(prompt)];
        let options = CallOptions::new()
            .with_temperature(self.config.temperature)
            .json_object();
        let resp = self
            .llm
            .call(&messages, &options, &input.cancel)
            .await
            .map_err(|e| {
                if input.cancel.is_cancelled() {
                    AgentError::Cancelled(input.run_id.clone())
                } else {
                    AgentError::LlmError(e)
                }
            })?;
        trace.add_usage(&resp.usage);

        let plan = Plan::parse(&resp.content, &self.config.model).map_err(AgentError::PlanGeneration)?;
        tracing::info!(run_id = %input.run_id, steps = plan.steps.len(), "plan generated");
        Ok(plan)
    }

    pub async fn run(&self, input: &RunInput, sink: &dyn EventSink) -> Result<RunOutcome, AgentError> {
        let start = Instant::now();
        let mut trace = Trace::new();

        let mut plan = self.generate_plan(input, &mut trace).await?;
        let validation = self.validator.validate(&plan);
        for w in &validation.warnings {
            tracing::warn!(warning = %w, "plan validation warning");
        }
        sink.emit(AgentEvent::PlanStart {
            plan: plan.clone(),
            validation: validation.clone(),
        });
        if self.config.strict_plan_validation && !validation.valid {
            return Err(AgentError::PlanGeneration(validation.errors.join("; ")));
        }

        let mut abort_reason: Option<String> = None;
        for i in 0..plan.steps.len() {
            if let Some(reason) = &abort_reason {
                skip_step(&mut plan, i, reason, sink);
                continue;
            }
            if i >= self.config.max_steps {
                tracing::warn!(step = i + 1, max_steps = self.config.max_steps, "plan exceeds step budget");
                skip_step(&mut plan, i, "超出最大步骤数限制", sink);
                continue;
            }
            Self::check_cancel(input)?;

            let failed_without_output = self.execute_step(&mut plan, i, input, &mut trace, sink).await;
            if failed_without_output {
                abort_reason = Some(format!("跳过：步骤 {} 失败", plan.steps[i].index));
            }
        }

        Self::check_cancel(input)?;
        let answer = self.summarize(input, &mut trace).await;
        trace.finish(answer.clone(), FinishReason::Final, start.elapsed().as_millis() as u64);
        tracing::info!(run_id = %input.run_id, steps = trace.steps.len(), "plan run finished");

        sink.emit(AgentEvent::Final {
            answer: answer.clone(),
            finish_reason: FinishReason::Final,
            trace: trace.clone(),
            token_usage: trace.token_usage,
        });
        Ok(RunOutcome {
            answer,
            finish_reason: FinishReason::Final,
            trace,
            plan: Some(plan),
            success: true,
        })
    }

    /// 执行第 i 个计划步骤；返回是否「失败且无结构化输出」
    async fn execute_step(
        &self,
        plan: &mut Plan,
        i: usize,
        input: &RunInput,
        trace: &mut Trace,
        sink: &dyn EventSink,
    ) -> bool {
        set_status(plan, i, StepStatus::Running, None, sink);
        let plan_step = plan.steps[i].clone();
        let index = trace.next_index();

        let Some(tool) = plan_step.tool.clone() else {
            let mut step = ExecutionStep::new(index, None);
            step.observation = plan_step.description.clone();
            sink.emit(AgentEvent::StepEnd {
                step: index,
                tool: String::new(),
                observation: step.observation.clone(),
                elapsed_ms: 0,
                attempts: 0,
            });
            trace.push_step(step);
            set_status(plan, i, StepStatus::Skipped, None, sink);
            return false;
        };

        sink.emit(AgentEvent::StepStart {
            step: index,
            tool: tool.clone(),
        });

        let registered = self
            .tools
            .registry()
            .get(&tool)
            .filter(|_| self.is_allowed(&tool))
            .cloned();
        let synthesized = match registered {
            None => Err(AgentError::ToolNotFound(tool.clone())),
            Some(entry) => {
                self.synthesizer
                    .synthesize(
                        &entry,
                        &plan_step,
                        &input.user_message,
                        &trace.steps,
                        &mut trace.token_usage,
                        &input.cancel,
                    )
                    .await
            }
        };

        let args: ToolArgs = match synthesized {
            Ok(args) => args,
            Err(err) => {
                let step = rejected_step(index, &tool, serde_json::Value::Null, &err, sink);
                trace.push_step(step);
                set_status(plan, i, StepStatus::Failed, Some(err.to_string()), sink);
                return true;
            }
        };

        let (step, result) = run_tool_step(&self.tools, input, index, &tool, &args, args.to_value(), sink).await;
        if result.executed() {
            trace.record_tool_use(&tool, result.duration_ms());
        }
        trace.push_step(step);

        match &result.error {
            None => {
                set_status(plan, i, StepStatus::Completed, None, sink);
                false
            }
            Some(err) => {
                set_status(plan, i, StepStatus::Failed, Some(err.to_string()), sink);
                !result.output.as_ref().is_some_and(|o| o.has_output())
            }
        }
    }

    async fn summarize(&self, input: &RunInput, trace: &mut Trace) -> String {
        let execution_trace = format_execution_trace(&trace.steps);
        let prompt = render(
            SUMMARY_PROMPT,
            &[
                ("user_message", input.user_message.as_str()),
                ("execution_trace", execution_trace.as_str()),
            ],
        );
        let options = CallOptions::new().with_temperature(self.config.temperature);
        match self.llm.call(&[Message::user(prompt)], &options, &input.cancel).await {
            Ok(resp) => {
                trace.add_usage(&resp.usage);
                resp.content
            }
            Err(e) => {
                tracing::warn!(error = %e, "summary generation failed");
                SUMMARY_FALLBACK.to_string()
            }
        }
    }
}

fn set_status(plan: &mut Plan, i: usize, status: StepStatus, error: Option<String>, sink: &dyn EventSink) {
    let step = &mut plan.steps[i];
    if let Err(e) = step.transition(status) {
        tracing::warn!(error = %e, "ignored plan step transition");
        return;
    }
    sink.emit(AgentEvent::PlanStep {
        step_index: step.index,
        status,
        error,
    });
}

fn skip_step(plan: &mut Plan, i: usize, reason: &str, sink: &dyn EventSink) {
    set_status(plan, i, StepStatus::Skipped, Some(reason.to_string()), sink);
}
