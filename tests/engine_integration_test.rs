//! 执行引擎集成测试：通过 AgentRunner 驱动两种执行模式

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use forge::agent::{
        create_agent_components, AgentConfig, AgentRequest, AgentRunner, ExecutionMode, MemoryRunRecorder, RunStatus,
    };
    use forge::config::AppConfig;
    use forge::core::{AgentError, FinishReason};
    use forge::llm::{LlmResponse, MockLlmClient, ToolCall};
    use forge::plan::StepStatus;
    use forge::react::{AgentEvent, CollectSink};
    use forge::tools::{
        ExecutionConfig, ExecutionContext, ResultCache, Tool, ToolArgs, ToolMetadata, ToolOutput,
    };
    use forge::transport::{sse_frame, DONE_FRAME};
    use serde_json::json;

    /// 前 `fail_times` 次返回可重试错误
    struct FlakyTool {
        calls: AtomicU32,
        fail_times: u32,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn describe(&self) -> ToolMetadata {
            ToolMetadata::new("flaky", "Fails transiently")
        }

        async fn execute(&self, _ctx: &ExecutionContext, _args: &ToolArgs) -> Result<ToolOutput, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                Err("connection reset by peer".to_string())
            } else {
                Ok(ToolOutput::ok("ok").with_field("attempt", n))
            }
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn describe(&self) -> ToolMetadata {
            ToolMetadata::new("broken", "Always fails")
        }

        async fn execute(&self, _ctx: &ExecutionContext, _args: &ToolArgs) -> Result<ToolOutput, String> {
            Err("disk full".to_string())
        }
    }

    /// 开启结果缓存的天气查询
    struct WeatherTool {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for WeatherTool {
        fn describe(&self) -> ToolMetadata {
            ToolMetadata::new("weather", "Current weather for a city")
        }

        fn execution_config(&self) -> Option<ExecutionConfig> {
            Some(ExecutionConfig::default().with_cache(true, Duration::from_secs(60)))
        }

        async fn execute(&self, _ctx: &ExecutionContext, args: &ToolArgs) -> Result<ToolOutput, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let city = args.get_str("city").unwrap_or("?");
            Ok(ToolOutput::ok("sunny").with_field("city", city).with_field("sky", "sunny"))
        }
    }

    fn fast_retry_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.tools.retry.initial_backoff_ms = 5;
        cfg.tools.retry.max_backoff_ms = 20;
        cfg
    }

    fn call(id: &str, tool: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(id, tool, args.to_string())
    }

    fn plan_response(steps: serde_json::Value) -> LlmResponse {
        LlmResponse::text(json!({ "steps": steps }).to_string())
    }

    #[tokio::test]
    async fn test_reactive_direct_answer() {
        let mock = Arc::new(MockLlmClient::with_responses([LlmResponse::text("Paris.")]));
        let components = create_agent_components(&AppConfig::default(), mock, Vec::new());
        let runner = AgentRunner::new(components, AgentConfig::default(), Arc::new(MemoryRunRecorder::new()));
        let sink = CollectSink::new();

        let out = runner
            .run(AgentRequest::new("it-1", "Capital of France?"), &sink)
            .await
            .unwrap();
        assert_eq!(out.answer, "Paris.");
        assert!(out.trace.steps.is_empty());
        assert_eq!(sink.kinds(), vec!["final"]);
    }

    #[tokio::test]
    async fn test_reactive_retry_until_success() {
        let mock = Arc::new(MockLlmClient::with_responses([
            LlmResponse::with_tool_calls(vec![call("c1", "flaky", json!({}))]),
            LlmResponse::text("worked on third try"),
        ]));
        let flaky = Arc::new(FlakyTool {
            calls: AtomicU32::new(0),
            fail_times: 2,
        });
        let components = create_agent_components(&fast_retry_config(), mock, vec![flaky.clone() as Arc<dyn Tool>]);
        let runner = AgentRunner::new(components, AgentConfig::default(), Arc::new(MemoryRunRecorder::new()));
        let sink = CollectSink::new();

        let out = runner.run(AgentRequest::new("it-2", "try it"), &sink).await.unwrap();
        assert_eq!(out.answer, "worked on third try");
        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
        assert!(out.trace.steps[0].error.is_none());

        let attempts = sink.events().into_iter().find_map(|e| match e {
            AgentEvent::StepEnd { attempts, .. } => Some(attempts),
            _ => None,
        });
        assert_eq!(attempts, Some(3));

        let progress: Vec<String> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                AgentEvent::ToolProgress { message, .. } => Some(message),
                _ => None,
            })
            .collect();
        assert!(progress.iter().any(|m| m.contains("重试")));
        assert_eq!(progress.last().map(String::as_str), Some("执行成功"));
    }

    #[tokio::test]
    async fn test_plan_step_failure_skips_remaining() {
        let mock = Arc::new(MockLlmClient::with_responses([
            plan_response(json!([
                {"step": 1, "description": "Echo greeting", "tool": "echo"},
                {"step": 2, "description": "Write report", "tool": "broken"},
                {"step": 3, "description": "Echo done", "tool": "echo"}
            ])),
            LlmResponse::text(r#"{"text": "hello"}"#),
            LlmResponse::text("{}"),
            LlmResponse::text("Could not write the report."),
        ]));
        let components = create_agent_components(&fast_retry_config(), mock, vec![Arc::new(BrokenTool) as Arc<dyn Tool>]);
        let config = AgentConfig {
            mode: ExecutionMode::Plan,
            ..AgentConfig::default()
        };
        let recorder = Arc::new(MemoryRunRecorder::new());
        let runner = AgentRunner::new(components, config, recorder.clone());
        let sink = CollectSink::new();

        let out = runner.run(AgentRequest::new("it-3", "report"), &sink).await.unwrap();
        assert_eq!(out.finish_reason, FinishReason::Final);
        assert_eq!(out.answer, "Could not write the report.");
        assert_eq!(out.trace.steps.len(), 2);
        assert!(out.trace.steps[1].error.as_deref().unwrap_or("").contains("disk full"));

        let plan = out.plan.clone().unwrap();
        assert_eq!(plan.steps[2].status, StepStatus::Skipped);

        let kinds = sink.kinds();
        assert_eq!(kinds.first(), Some(&"plan_start"));
        assert_eq!(kinds.last(), Some(&"final"));
        assert_eq!(kinds.iter().filter(|k| **k == "final").count(), 1);
        assert!(!kinds.contains(&"error"));

        let record = recorder.get("it-3").await.unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.plan.unwrap().steps.len(), 3);
    }

    #[tokio::test]
    async fn test_cached_result_across_runs() {
        let mock = Arc::new(MockLlmClient::new());
        for i in 0..2 {
            // 参数键顺序不同，缓存键相同
            let args = if i == 0 {
                r#"{"city":"Oslo","unit":"c"}"#
            } else {
                r#"{"unit":"c","city":"Oslo"}"#
            };
            mock.push_response(LlmResponse::with_tool_calls(vec![ToolCall::new("c1", "weather", args)]));
            mock.push_response(LlmResponse::text("sunny in Oslo"));
        }
        let weather = Arc::new(WeatherTool {
            calls: AtomicU32::new(0),
        });
        let components = create_agent_components(&AppConfig::default(), mock, vec![weather.clone() as Arc<dyn Tool>]);
        let cache = components.cache.clone();
        let runner = AgentRunner::new(components, AgentConfig::default(), Arc::new(MemoryRunRecorder::new()));

        let first = CollectSink::new();
        runner.run(AgentRequest::new("it-4a", "weather?"), &first).await.unwrap();
        let second = CollectSink::new();
        let out = runner.run(AgentRequest::new("it-4b", "weather?"), &second).await.unwrap();

        assert_eq!(weather.calls.load(Ordering::SeqCst), 1);
        assert_eq!(out.trace.steps[0].observation, r#"{"city":"Oslo","sky":"sunny"}"#);
        let attempts = second.events().into_iter().find_map(|e| match e {
            AgentEvent::StepEnd { attempts, .. } => Some(attempts),
            _ => None,
        });
        assert_eq!(attempts, Some(0));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_sse_stream_for_failed_run() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error("HTTP 401: invalid api key");
        let components = create_agent_components(&AppConfig::default(), mock, Vec::new());
        let runner = AgentRunner::new(components, AgentConfig::default(), Arc::new(MemoryRunRecorder::new()));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let result = runner.run(AgentRequest::new("it-5", "hi"), &tx).await;
        drop(tx);
        assert!(matches!(result, Err(AgentError::LlmError(_))));

        let mut body = String::new();
        while let Some(event) = rx.recv().await {
            body.push_str(&sse_frame(&event));
        }
        body.push_str(DONE_FRAME);

        assert!(body.starts_with("data: {\"type\":\"error\""));
        assert!(body.contains("\"partial\":true"));
        assert!(body.ends_with(DONE_FRAME));
        assert_eq!(body.matches("data: ").count(), 2);
    }
}
