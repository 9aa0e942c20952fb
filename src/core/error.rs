//! Agent 错误类型
//!
//! 工具级失败（未注册、参数非法、执行失败、超时、取消）记录在 trace 中，不终止运行；
//! LLM 调用失败、计划生成失败、ReAct 步数耗尽则终止本次运行，由门面统一上报。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误
///
/// 载荷统一为 String，便于 Clone 后放进 InvocationResult 与事件里。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// 注册时被拒绝（控制流节点或不可被 Agent 调用）
    #[error("tool rejected: {0}")]
    ToolRejected(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    ToolExecutionFailed(String),

    #[error("tool timeout: {0}")]
    ToolTimeout(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    /// 计划模式下为某一步生成参数失败
    #[error("argument synthesis failed: {0}")]
    ArgumentSynthesis(String),

    #[error("plan generation failed: {0}")]
    PlanGeneration(String),

    #[error("达到最大步骤数限制")]
    MaxStepsExceeded,

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 持久化协作方（RunRecorder）写入失败
    #[error("recorder error: {0}")]
    Recorder(String),
}

impl AgentError {
    /// 是否为取消或截止时间到达（此类错误不再重试）
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AgentError::Cancelled(_) | AgentError::ToolTimeout(_))
    }

    /// 工具级错误：只进 trace，不终止运行
    pub fn is_tool_level(&self) -> bool {
        matches!(
            self,
            AgentError::ToolNotFound(_)
                | AgentError::InvalidArguments(_)
                | AgentError::ToolExecutionFailed(_)
                | AgentError::ToolTimeout(_)
                | AgentError::Cancelled(_)
                | AgentError::ArgumentSynthesis(_)
        )
    }
}
