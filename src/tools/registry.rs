//! 工具注册表
//!
//! 所有工具实现 Tool trait（describe / schema / validate / execute，可选 execution_config），
//! 由 ToolRegistry 按编码注册与查找。注册时过滤控制流节点与不可被 Agent 调用的工具，
//! 并一次性生成 function calling 定义；构建完成后以 Arc 共享，只读。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::AgentError;
use crate::llm::ToolDefinition;
use crate::tools::metadata::{DependencyDescriptor, ExecutionConfig, ToolMetadata};
use crate::tools::schema::{ToolArgs, ToolSchema};

/// 工具调用上下文
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// 所属运行（消息）ID
    pub run_id: String,
    /// 当前步号（从 1 开始）
    pub step: usize,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(run_id: impl Into<String>, step: usize, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.into(),
            step,
            cancel,
        }
    }

    /// 测试与单次调用用的独立上下文
    pub fn detached() -> Self {
        Self::new("detached", 0, CancellationToken::new())
    }
}

/// 工具执行结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub success: bool,
    pub message: String,
    /// 结构化输出，可供后续步骤引用
    pub output: Map<String, Value>,
}

impl ToolOutput {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            output: Map::new(),
        }
    }

    /// 业务失败但带有结构化输出（如 HTTP 4xx 响应体）
    pub fn failed(message: impl Into<String>, output: Map<String, Value>) -> Self {
        Self {
            success: false,
            message: message.into(),
            output,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.output.insert(key.into(), value.into());
        self
    }

    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// 作为 observation / 工具消息的文本：有结构化输出时为其 JSON，否则为 message
    pub fn render(&self) -> String {
        if self.output.is_empty() {
            self.message.clone()
        } else {
            serde_json::to_string(&self.output).unwrap_or_else(|_| self.message.clone())
        }
    }
}

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具描述（编码即 Agent 使用的工具名）
    fn describe(&self) -> ToolMetadata;

    /// 参数 Schema；默认不限制参数
    fn schema(&self) -> ToolSchema {
        ToolSchema::open()
    }

    /// 校验并规范化参数（填默认值）
    fn validate(&self, args: &ToolArgs) -> Result<ToolArgs, String> {
        self.schema().normalize(args)
    }

    /// 工具自带的执行配置；None 时使用全局默认
    fn execution_config(&self) -> Option<ExecutionConfig> {
        None
    }

    /// 执行工具；Err 中的文本用于判断是否可重试
    async fn execute(&self, ctx: &ExecutionContext, args: &ToolArgs) -> Result<ToolOutput, String>;
}

/// 已注册的工具：实现 + 注册时生成的元数据与定义
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
    pub metadata: ToolMetadata,
    pub definition: ToolDefinition,
}

impl RegisteredTool {
    pub fn name(&self) -> &str {
        &self.metadata.code
    }
}

/// 工具注册表
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AgentError> {
        let metadata = tool.describe();
        if metadata.is_control_flow() {
            return Err(AgentError::ToolRejected(format!(
                "{} is a control-flow node",
                metadata.code
            )));
        }
        if !metadata.agent_callable {
            return Err(AgentError::ToolRejected(format!(
                "{} is not agent-callable",
                metadata.code
            )));
        }

        let mut definition = ToolDefinition::function(
            metadata.code.clone(),
            metadata.description.clone(),
            tool.schema().to_function_parameters(),
        );
        definition.function.output_fields_schema = metadata.output_fields_schema();

        let name = metadata.code.clone();
        if self.tools.contains_key(&name) {
            tracing::warn!(tool = %name, "tool registered twice, replacing previous");
        }
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                metadata,
                definition,
            },
        );
        Ok(())
    }

    /// 批量注册，跳过被拒绝的工具；返回注册成功的数量
    pub fn register_all(&mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> usize {
        let mut count = 0;
        for tool in tools {
            match self.register_arc(tool) {
                Ok(()) => count += 1,
                Err(e) => tracing::info!(error = %e, "skipping tool"),
            }
        }
        count
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 工具定义：allow_list 为空时返回全部（按名称排序），否则按 allow_list 顺序返回存在的工具
    pub fn list_definitions(&self, allow_list: &[String]) -> Vec<ToolDefinition> {
        if allow_list.is_empty() {
            return self.tools.values().map(|t| t.definition.clone()).collect();
        }
        allow_list
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition.clone())
            .collect()
    }

    /// 工具的执行配置：工具自带优先，否则使用 default
    pub fn execution_config(&self, name: &str, default: &ExecutionConfig) -> ExecutionConfig {
        self.tools
            .get(name)
            .and_then(|t| t.tool.execution_config())
            .unwrap_or_else(|| default.clone())
    }

    pub fn dependencies(&self, name: &str) -> Option<DependencyDescriptor> {
        self.tools
            .get(name)
            .map(|t| t.tool.execution_config().unwrap_or_default().dependencies)
    }

    /// 直接执行（不经重试 / 缓存）：查找、校验参数、调用
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        name: &str,
        args: &ToolArgs,
    ) -> Result<ToolOutput, AgentError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        let args = entry
            .tool
            .validate(args)
            .map_err(AgentError::InvalidArguments)?;
        entry
            .tool
            .execute(ctx, &args)
            .await
            .map_err(AgentError::ToolExecutionFailed)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
