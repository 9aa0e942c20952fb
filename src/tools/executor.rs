//! 工具执行器（弹性包装）
//!
//! 持有 ToolRegistry、全局默认 ExecutionConfig 与结果缓存。一次调用：
//! 1. 校验 / 规范化参数（失败直接返回，attempts = 1，不重试）
//! 2. 启用缓存且命中则直接返回（attempts = 0，不计超时与重试）
//! 3. 在同一个截止时间内按 RetryMachine 的调度尝试 max_retries + 1 次；
//!    不可重试的错误、取消、截止时间到达都立即终止
//! 4. 成功结果写入缓存
//!
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::AgentError;
use crate::tools::cache::ResultCache;
use crate::tools::metadata::ExecutionConfig;
use crate::tools::retry::{RetryMachine, RetryState};
use crate::tools::schema::ToolArgs;
use crate::tools::{ExecutionContext, ToolOutput, ToolRegistry};

/// 一次调用的结果
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub output: Option<ToolOutput>,
    pub error: Option<AgentError>,
    /// 实际尝试次数；命中缓存时为 0
    pub attempts: u32,
    pub duration: Duration,
    pub from_cache: bool,
}

impl InvocationResult {
    fn failed(error: AgentError, attempts: u32, duration: Duration) -> Self {
        Self {
            output: None,
            error: Some(error),
            attempts,
            duration,
            from_cache: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// 工具是否真正执行过（含命中缓存）；参数校验被拒、工具不存在时为 false
    pub fn executed(&self) -> bool {
        if self.from_cache {
            return true;
        }
        !matches!(
            self.error,
            Some(AgentError::InvalidArguments(_)) | Some(AgentError::ToolNotFound(_))
        ) && self.attempts > 0
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// 供 LLM / trace 使用的观察文本
    pub fn observation(&self) -> String {
        match (&self.output, &self.error) {
            (Some(out), None) => out.render(),
            (Some(out), Some(e)) if out.has_output() => format!("{}\n{}", e, out.render()),
            (_, Some(e)) => format!("Error: {}", e),
            (None, None) => String::new(),
        }
    }
}

/// 工具执行器
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    default_config: ExecutionConfig,
    cache: Arc<dyn ResultCache>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        default_config: ExecutionConfig,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            registry,
            default_config,
            cache,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    pub fn default_config(&self) -> &ExecutionConfig {
        &self.default_config
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        tool_name: &str,
        args: &ToolArgs,
    ) -> InvocationResult {
        self.execute_with_progress(ctx, tool_name, args, &|_: u32, _: &str| {})
            .await
    }

    /// 与 execute 调度完全一致，额外在每次尝试前、每次退避前、每次结果后回调 (attempt, message)
    pub async fn execute_with_progress(
        &self,
        ctx: &ExecutionContext,
        tool_name: &str,
        args: &ToolArgs,
        on_progress: &(dyn Fn(u32, &str) + Send + Sync),
    ) -> InvocationResult {
        let start = Instant::now();
        let result = self.run(ctx, tool_name, args, on_progress, start).await;
        audit(tool_name, args, &result);
        result
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        tool_name: &str,
        args: &ToolArgs,
        on_progress: &(dyn Fn(u32, &str) + Send + Sync),
        start: Instant,
    ) -> InvocationResult {
        let Some(entry) = self.registry.get(tool_name) else {
            return InvocationResult::failed(
                AgentError::ToolNotFound(tool_name.to_string()),
                1,
                start.elapsed(),
            );
        };
        let config = self.registry.execution_config(tool_name, &self.default_config);

        let args = match entry.tool.validate(args) {
            Ok(a) => a,
            Err(e) => {
                on_progress(1, &format!("执行失败: {}", e));
                return InvocationResult::failed(AgentError::InvalidArguments(e), 1, start.elapsed());
            }
        };

        if config.cache.enabled {
            if let Some(hit) = self.cache.get(tool_name, &args).await {
                tracing::debug!(tool = %tool_name, "tool cache hit");
                on_progress(0, "命中缓存");
                return InvocationResult {
                    output: Some(hit),
                    error: None,
                    attempts: 0,
                    duration: start.elapsed(),
                    from_cache: true,
                };
            }
        }

        let deadline = config.timeout.map(|t| start + t);
        let mut machine = RetryMachine::new(config.retry.clone());
        let mut last_output: Option<ToolOutput> = None;
        let mut last_error: Option<AgentError>;

        loop {
            let attempt = machine.begin_attempt();
            if attempt == 1 {
                on_progress(attempt, "开始执行");
            } else {
                on_progress(attempt, &format!("重试中（第 {} 次）", attempt - 1));
            }

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => Err(AgentError::Cancelled(tool_name.to_string())),
                _ = until_deadline(deadline) => Err(AgentError::ToolTimeout(tool_name.to_string())),
                r = entry.tool.execute(ctx, &args) => r.map_err(AgentError::ToolExecutionFailed),
            };

            match outcome {
                Ok(out) if out.success => {
                    machine.on_success();
                    on_progress(attempt, "执行成功");
                    last_output = Some(out);
                    last_error = None;
                    break;
                }
                Ok(out) => {
                    // 工具自己报告失败：不重试，保留结构化输出
                    on_progress(attempt, &format!("执行失败: {}", out.message));
                    machine.abort();
                    last_error = Some(AgentError::ToolExecutionFailed(out.message.clone()));
                    last_output = Some(out);
                    break;
                }
                Err(e) if e.is_cancellation() => {
                    on_progress(attempt, &format!("执行失败: {}", e));
                    machine.abort();
                    last_error = Some(e);
                    break;
                }
                Err(e) => {
                    let msg = e.to_string();
                    on_progress(attempt, &format!("执行失败: {}", msg));
                    last_error = Some(e);
                    match machine.on_failure(&msg).clone() {
                        RetryState::BackingOff { next_attempt, delay } => {
                            tracing::warn!(
                                tool = %tool_name,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "retryable tool failure, backing off"
                            );
                            on_progress(next_attempt, &format!("等待 {:?} 后重试", delay));
                            let interrupted = tokio::select! {
                                biased;
                                _ = ctx.cancel.cancelled() => Some(AgentError::Cancelled(tool_name.to_string())),
                                _ = until_deadline(deadline) => Some(AgentError::ToolTimeout(tool_name.to_string())),
                                _ = tokio::time::sleep(delay) => None,
                            };
                            if let Some(err) = interrupted {
                                machine.abort();
                                last_error = Some(err);
                                break;
                            }
                        }
                        _ => break,
                    }
                }
            }
        }

        let attempts = machine.attempts();
        let duration = start.elapsed();

        if let Some(err) = last_error {
            let err = match err {
                AgentError::ToolExecutionFailed(msg) => AgentError::ToolExecutionFailed(format!(
                    "工具执行失败（尝试 {} 次）: {}",
                    attempts, msg
                )),
                other => other,
            };
            return InvocationResult {
                output: last_output,
                error: Some(err),
                attempts,
                duration,
                from_cache: false,
            };
        }

        if let Some(out) = &last_output {
            if config.cache.enabled {
                self.cache.set(tool_name, &args, out, config.cache.ttl).await;
            }
        }

        InvocationResult {
            output: last_output,
            error: None,
            attempts,
            duration,
            from_cache: false,
        }
    }
}

async fn until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn audit(tool_name: &str, args: &ToolArgs, result: &InvocationResult) {
    let outcome = match &result.error {
        None if result.from_cache => "cache_hit",
        None => "ok",
        Some(AgentError::ToolTimeout(_)) => "timeout",
        Some(AgentError::Cancelled(_)) => "cancelled",
        Some(AgentError::InvalidArguments(_)) => "invalid_args",
        Some(_) => "error",
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool_name,
        "ok": result.is_success(),
        "outcome": outcome,
        "attempts": result.attempts,
        "from_cache": result.from_cache,
        "duration_ms": result.duration_ms(),
        "args_preview": args_preview(args),
    });
    tracing::info!(audit = %audit.to_string(), "tool");
}

fn args_preview(args: &ToolArgs) -> String {
    let s = args.to_value().to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::tools::cache::InMemoryResultCache;
    use crate::tools::metadata::ToolMetadata;
    use crate::tools::retry::RetryPolicy;
    use crate::tools::schema::{PropertySchema, ToolSchema};
    use crate::tools::Tool;

    /// 前 fail_times 次返回 error，之后成功
    struct FlakyTool {
        calls: AtomicU32,
        fail_times: u32,
        error: &'static str,
        config: ExecutionConfig,
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn describe(&self) -> ToolMetadata {
            ToolMetadata::new("flaky", "flaky tool")
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema::new().property("q", PropertySchema::string("query"))
        }

        fn execution_config(&self) -> Option<ExecutionConfig> {
            Some(self.config.clone())
        }

        async fn execute(&self, _ctx: &ExecutionContext, _args: &ToolArgs) -> Result<ToolOutput, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_times {
                Err(self.error.to_string())
            } else {
                Ok(ToolOutput::ok(format!("ok after {}", n)))
            }
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(40),
            ..RetryPolicy::default()
        }
    }

    fn executor_with(tool: FlakyTool) -> (ToolExecutor, Arc<ToolRegistry>) {
        let mut reg = ToolRegistry::new();
        reg.register(tool).unwrap();
        let reg = Arc::new(reg);
        let exec = ToolExecutor::new(
            reg.clone(),
            ExecutionConfig::default(),
            Arc::new(InMemoryResultCache::new()),
        );
        (exec, reg)
    }

    fn flaky(fail_times: u32, error: &'static str, config: ExecutionConfig) -> FlakyTool {
        FlakyTool {
            calls: AtomicU32::new(0),
            fail_times,
            error,
            config,
        }
    }

    #[tokio::test]
    async fn test_transient_failure_succeeds_on_third_attempt() {
        let (exec, _) = executor_with(flaky(2, "connection reset", ExecutionConfig::default().with_retry(fast_retry())));
        let r = exec.execute(&ExecutionContext::detached(), "flaky", &ToolArgs::new()).await;
        assert!(r.is_success());
        assert_eq!(r.attempts, 3);
        assert_eq!(r.output.unwrap().message, "ok after 3");
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (exec, _) = executor_with(flaky(10, "HTTP 503", ExecutionConfig::default().with_retry(fast_retry())));
        let r = exec.execute(&ExecutionContext::detached(), "flaky", &ToolArgs::new()).await;
        assert_eq!(r.attempts, 3);
        let err = r.error.unwrap().to_string();
        assert!(err.contains("尝试 3 次"), "{}", err);
        assert!(err.contains("HTTP 503"));
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let (exec, _) = executor_with(flaky(10, "invalid input", ExecutionConfig::default().with_retry(fast_retry())));
        let r = exec.execute(&ExecutionContext::detached(), "flaky", &ToolArgs::new()).await;
        assert_eq!(r.attempts, 1);
        assert!(!r.is_success());
        assert!(r.executed());
    }

    #[tokio::test]
    async fn test_invalid_arguments_not_retried() {
        let (exec, _) = executor_with(flaky(0, "", ExecutionConfig::default()));
        let args = ToolArgs::new().with("unexpected", 1);
        let r = exec.execute(&ExecutionContext::detached(), "flaky", &args).await;
        assert_eq!(r.attempts, 1);
        assert!(matches!(r.error, Some(AgentError::InvalidArguments(_))));
        assert!(!r.executed());
    }

    #[tokio::test]
    async fn test_cache_hit_on_second_call() {
        let cfg = ExecutionConfig::default().with_cache(true, Duration::from_secs(60));
        let (exec, _) = executor_with(flaky(0, "", cfg));
        let ctx = ExecutionContext::detached();
        let args = ToolArgs::new().with("q", "same");

        let first = exec.execute(&ctx, "flaky", &args).await;
        assert!(!first.from_cache);
        assert_eq!(first.attempts, 1);

        let second = exec.execute(&ctx, "flaky", &args).await;
        assert!(second.from_cache);
        assert_eq!(second.attempts, 0);
        assert!(second.executed());
        assert_eq!(second.output.unwrap().message, "ok after 1");
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let (exec, _) = executor_with(flaky(10, "timeout talking to upstream", ExecutionConfig::default().with_retry(policy)));
        let cancel = CancellationToken::new();
        let ctx = ExecutionContext::new("run", 1, cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let r = exec.execute(&ctx, "flaky", &ToolArgs::new()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(matches!(r.error, Some(AgentError::Cancelled(_))));
        assert_eq!(r.attempts, 2);
    }

    #[tokio::test]
    async fn test_deadline_covers_whole_call() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let cfg = ExecutionConfig::default()
            .with_retry(policy)
            .with_timeout(Some(Duration::from_millis(80)));
        let (exec, _) = executor_with(flaky(10, "network unreachable", cfg));
        let r = exec.execute(&ExecutionContext::detached(), "flaky", &ToolArgs::new()).await;
        assert!(matches!(r.error, Some(AgentError::ToolTimeout(_))));
        assert!(r.duration < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_progress_messages() {
        let (exec, _) = executor_with(flaky(1, "rate limit", ExecutionConfig::default().with_retry(fast_retry())));
        let seen: Mutex<Vec<(u32, String)>> = Mutex::new(Vec::new());
        let r = exec
            .execute_with_progress(&ExecutionContext::detached(), "flaky", &ToolArgs::new(), &|a: u32, m: &str| {
                seen.lock().unwrap().push((a, m.to_string()));
            })
            .await;
        assert_eq!(r.attempts, 2);

        let seen = seen.into_inner().unwrap();
        let messages: Vec<&str> = seen.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages[0], "开始执行");
        assert!(messages[1].starts_with("执行失败"));
        assert!(messages[2].starts_with("等待"));
        assert_eq!(messages[3], "重试中（第 1 次）");
        assert_eq!(messages[4], "执行成功");
        assert_eq!(seen[3].0, 2);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (exec, _) = executor_with(flaky(0, "", ExecutionConfig::default()));
        let r = exec.execute(&ExecutionContext::detached(), "ghost", &ToolArgs::new()).await;
        assert_eq!(r.error, Some(AgentError::ToolNotFound("ghost".into())));
    }
}
