//! 单次运行的输入与结果（两种执行模式共用）

use tokio_util::sync::CancellationToken;

use crate::core::{FinishReason, Trace};
use crate::plan::Plan;

/// 执行器输入
#[derive(Debug, Clone)]
pub struct RunInput {
    /// 运行（消息）ID，用于日志、工具上下文与取消
    pub run_id: String,
    pub user_message: String,
    /// 渲染好的历史对话；为空表示没有
    pub conversation_context: String,
    pub cancel: CancellationToken,
}

impl RunInput {
    pub fn new(run_id: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            user_message: user_message.into(),
            conversation_context: String::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.conversation_context = context.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// 执行器结果
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: String,
    pub finish_reason: FinishReason,
    pub trace: Trace,
    /// 计划模式下的最终计划（含各步状态）
    pub plan: Option<Plan>,
    pub success: bool,
}
