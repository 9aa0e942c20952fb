//! Agent 运行时门面
//!
//! create_agent_components 按配置构建工具注册表、结果缓存与 ToolExecutor；
//! AgentRunner 对单条用户消息按执行模式（reactive / plan）运行，
//! 负责历史上下文拼接、运行状态记录、取消表与致命错误时的 error 事件。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, RunInput, RunOutcome, Trace, TtlStore};
use crate::llm::ReasoningClient;
use crate::plan::{Plan, PlanExecutor};
use crate::react::{AgentEvent, EventSink, ReactExecutor};
use crate::tools::{EchoTool, InMemoryResultCache, Tool, ToolExecutor, ToolRegistry};

/// 执行模式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Reactive,
    Plan,
}

impl ExecutionMode {
    /// 解析配置中的模式名；`direct` 视为 reactive
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "reactive" | "direct" | "react" => Some(ExecutionMode::Reactive),
            "plan" => Some(ExecutionMode::Plan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Reactive => "reactive",
            ExecutionMode::Plan => "plan",
        }
    }
}

/// 单次运行配置
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub model: String,
    pub mode: ExecutionMode,
    /// ReAct 轮数上限 / 计划可执行步骤上限
    pub max_steps: usize,
    pub temperature: f32,
    /// 为空表示全部已注册工具
    pub allowed_tools: Vec<String>,
    pub history_messages: usize,
    pub strict_plan_validation: bool,
    pub stream_reasoning: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            mode: ExecutionMode::Reactive,
            max_steps: 10,
            temperature: 0.7,
            allowed_tools: Vec::new(),
            history_messages: 10,
            strict_plan_validation: false,
            stream_reasoning: false,
        }
    }
}

/// 预构建的 Agent 组件，可被多个并发运行共享
#[derive(Clone)]
pub struct AgentComponents {
    pub llm: Arc<dyn ReasoningClient>,
    pub registry: Arc<ToolRegistry>,
    pub cache: Arc<InMemoryResultCache>,
    pub executor: Arc<ToolExecutor>,
}

/// 创建 Agent 组件：注册内置工具与 `extra_tools`，按配置构建执行器
pub fn create_agent_components(
    cfg: &AppConfig,
    llm: Arc<dyn ReasoningClient>,
    extra_tools: Vec<Arc<dyn Tool>>,
) -> AgentComponents {
    let mut registry = ToolRegistry::new();
    if let Err(e) = registry.register(EchoTool) {
        tracing::warn!(error = %e, "failed to register echo tool");
    }
    let added = registry.register_all(extra_tools);
    tracing::info!(tools = registry.len(), extra = added, "tool registry built");

    let registry = Arc::new(registry);
    let cache = Arc::new(InMemoryResultCache::new());
    let executor = Arc::new(ToolExecutor::new(
        registry.clone(),
        cfg.execution_config(),
        cache.clone(),
    ));
    AgentComponents {
        llm,
        registry,
        cache,
        executor,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Agent,
}

/// 会话中的一条历史消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: HistoryRole,
    pub content: String,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::User,
            content: content.into(),
        }
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: HistoryRole::Agent,
            content: content.into(),
        }
    }
}

/// 一次 Agent 请求
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// 对应的 Agent 消息 ID，用于状态记录与取消
    pub message_id: String,
    pub user_message: String,
    /// 按时间顺序，不含本条用户消息
    pub history: Vec<HistoryMessage>,
}

impl AgentRequest {
    pub fn new(message_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            user_message: user_message.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.history = history;
        self
    }
}

/// 取最近 `max` 条历史，渲染为 "User: …" / "Assistant: …"
pub fn build_conversation_context(history: &[HistoryMessage], max: usize) -> String {
    let skip = history.len().saturating_sub(max);
    history[skip..]
        .iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| match m.role {
            HistoryRole::User => format!("User: {}", m.content),
            HistoryRole::Agent => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// 运行结果持久化协作方
#[async_trait]
pub trait RunRecorder: Send + Sync {
    async fn update_status(&self, message_id: &str, status: RunStatus, error: Option<&str>) -> Result<(), AgentError>;

    async fn save_plan(&self, message_id: &str, plan: &Plan) -> Result<(), AgentError>;

    /// 保存最终回答、轨迹与 token 用量（均在 trace 中）
    async fn save_trace(&self, message_id: &str, trace: &Trace) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub status: RunStatus,
    pub error: Option<String>,
    pub plan: Option<Plan>,
    pub trace: Option<Trace>,
}

impl Default for RunRecord {
    fn default() -> Self {
        Self {
            status: RunStatus::Pending,
            error: None,
            plan: None,
            trace: None,
        }
    }
}

/// 进程内记录器
#[derive(Default)]
pub struct MemoryRunRecorder {
    records: RwLock<HashMap<String, RunRecord>>,
}

impl MemoryRunRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, message_id: &str) -> Option<RunRecord> {
        self.records.read().await.get(message_id).cloned()
    }
}

#[async_trait]
impl RunRecorder for MemoryRunRecorder {
    async fn update_status(&self, message_id: &str, status: RunStatus, error: Option<&str>) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        let record = records.entry(message_id.to_string()).or_default();
        record.status = status;
        record.error = error.map(String::from);
        Ok(())
    }

    async fn save_plan(&self, message_id: &str, plan: &Plan) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        records.entry(message_id.to_string()).or_default().plan = Some(plan.clone());
        Ok(())
    }

    async fn save_trace(&self, message_id: &str, trace: &Trace) -> Result<(), AgentError> {
        let mut records = self.records.write().await;
        records.entry(message_id.to_string()).or_default().trace = Some(trace.clone());
        Ok(())
    }
}

/// 运行入口：两种执行模式共用；流式与聚合调用方只在 EventSink 上不同
pub struct AgentRunner {
    components: AgentComponents,
    config: AgentConfig,
    recorder: Arc<dyn RunRecorder>,
    active: TtlStore<CancellationToken>,
}

impl AgentRunner {
    pub fn new(components: AgentComponents, config: AgentConfig, recorder: Arc<dyn RunRecorder>) -> Self {
        Self {
            components,
            config,
            recorder,
            active: TtlStore::new(),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn components(&self) -> &AgentComponents {
        &self.components
    }

    /// 取消正在运行的消息；不存在时返回 false
    pub async fn cancel(&self, message_id: &str) -> bool {
        match self.active.get(message_id).await {
            Some(token) => {
                tracing::info!(message_id = %message_id, "cancelling run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn active_runs(&self) -> usize {
        self.active.len().await
    }

    async fn record<F>(&self, what: &str, fut: F)
    where
        F: std::future::Future<Output = Result<(), AgentError>>,
    {
        if let Err(e) = fut.await {
            tracing::warn!(error = %e, what, "run recorder failed");
        }
    }

    pub async fn run(&self, request: AgentRequest, sink: &dyn EventSink) -> Result<RunOutcome, AgentError> {
        let id = request.message_id.clone();
        let token = CancellationToken::new();
        self.active.put(id.clone(), token.clone(), None).await;
        self.record("status", self.recorder.update_status(&id, RunStatus::Running, None))
            .await;

        let context = build_conversation_context(&request.history, self.config.history_messages);
        let input = RunInput::new(id.clone(), request.user_message)
            .with_context(context)
            .with_cancel(token);

        tracing::info!(message_id = %id, mode = self.config.mode.as_str(), "agent run started");
        let result = match self.config.mode {
            ExecutionMode::Reactive => {
                ReactExecutor::new(
                    self.components.llm.clone(),
                    self.components.executor.clone(),
                    self.config.clone(),
                )
                .run(&input, sink)
                .await
            }
            ExecutionMode::Plan => {
                PlanExecutor::new(
                    self.components.llm.clone(),
                    self.components.executor.clone(),
                    self.config.clone(),
                )
                .run(&input, sink)
                .await
            }
        };
        self.active.delete(&id).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(&id, e, None, sink).await),
        };

        if let Some(plan) = &outcome.plan {
            self.record("plan", self.recorder.save_plan(&id, plan)).await;
        }
        self.record("trace", self.recorder.save_trace(&id, &outcome.trace))
            .await;

        if !outcome.success {
            let last_step = outcome.trace.steps.last().map(|s| s.step);
            return Err(self.fail(&id, AgentError::MaxStepsExceeded, last_step, sink).await);
        }

        self.record("status", self.recorder.update_status(&id, RunStatus::Completed, None))
            .await;
        tracing::info!(
            message_id = %id,
            steps = outcome.trace.steps.len(),
            total_tokens = outcome.trace.token_usage.total_tokens,
            "agent run completed"
        );
        Ok(outcome)
    }

    async fn fail(&self, id: &str, err: AgentError, step: Option<usize>, sink: &dyn EventSink) -> AgentError {
        tracing::error!(message_id = %id, error = %err, "agent run failed");
        sink.emit(AgentEvent::Error {
            error: err.to_string(),
            step,
            partial: true,
        });
        let text = err.to_string();
        self.record("status", self.recorder.update_status(id, RunStatus::Failed, Some(&text)))
            .await;
        err
    }
}
