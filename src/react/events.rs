//! 执行过程事件：两种执行模式共用的事件协议
//!
//! 序列化为 `{"type": "...", "data": {...}}`，供 SSE 推送或批量收集。
//! 事件按执行顺序同步送入 EventSink；成功运行的最后一个事件是 final。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::core::{FinishReason, TokenUsage, Trace};
use crate::plan::{Plan, StepStatus, ValidationResult};

/// 单个过程事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 计划生成完成（附带校验结果）
    PlanStart {
        plan: Plan,
        validation: ValidationResult,
    },
    /// 计划步骤状态变化
    PlanStep {
        step_index: usize,
        status: StepStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    StepStart {
        step: usize,
        tool: String,
    },
    /// 工具执行进度（开始 / 重试 / 等待 / 成功 / 失败）
    ToolProgress {
        step: usize,
        tool: String,
        attempt: u32,
        message: String,
    },
    StepEnd {
        step: usize,
        tool: String,
        observation: String,
        elapsed_ms: u64,
        attempts: u32,
    },
    Final {
        answer: String,
        finish_reason: FinishReason,
        trace: Trace,
        token_usage: TokenUsage,
    },
    Error {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        step: Option<usize>,
        partial: bool,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::PlanStart { .. } => "plan_start",
            AgentEvent::PlanStep { .. } => "plan_step",
            AgentEvent::StepStart { .. } => "step_start",
            AgentEvent::ToolProgress { .. } => "tool_progress",
            AgentEvent::StepEnd { .. } => "step_end",
            AgentEvent::Final { .. } => "final",
            AgentEvent::Error { .. } => "error",
        }
    }
}

/// 事件接收端：流式与非流式调用方都通过它接收事件
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AgentEvent);
}

/// 非流式（聚合返回）调用方使用：丢弃所有事件
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: AgentEvent) {}
}

impl EventSink for UnboundedSender<AgentEvent> {
    fn emit(&self, event: AgentEvent) {
        let _ = self.send(event);
    }
}

/// 闭包适配
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(AgentEvent) + Send + Sync,
{
    fn emit(&self, event: AgentEvent) {
        (self.0)(event)
    }
}

/// 收集所有事件（测试与批量模式）
#[derive(Default)]
pub struct CollectSink {
    events: std::sync::Mutex<Vec<AgentEvent>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|e| e.iter().map(AgentEvent::kind).collect())
            .unwrap_or_default()
    }
}

impl EventSink for CollectSink {
    fn emit(&self, event: AgentEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serialization() {
        let ev = AgentEvent::ToolProgress {
            step: 2,
            tool: "echo".into(),
            attempt: 1,
            message: "开始执行".into(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(
            v,
            json!({"type": "tool_progress", "data": {"step": 2, "tool": "echo", "attempt": 1, "message": "开始执行"}})
        );

        let err = AgentEvent::Error {
            error: "boom".into(),
            step: None,
            partial: true,
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v, json!({"type": "error", "data": {"error": "boom", "partial": true}}));
    }

    #[test]
    fn test_sinks() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        tx.emit(AgentEvent::StepStart { step: 1, tool: "echo".into() });
        assert_eq!(rx.try_recv().map(|e| e.kind()).ok(), Some("step_start"));

        let count = std::sync::atomic::AtomicUsize::new(0);
        let sink = FnSink(|_ev: AgentEvent| {
            count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        sink.emit(AgentEvent::StepStart { step: 1, tool: "echo".into() });
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

        let collect = CollectSink::new();
        collect.emit(AgentEvent::StepStart { step: 1, tool: "echo".into() });
        NoopSink.emit(AgentEvent::StepStart { step: 2, tool: "echo".into() });
        assert_eq!(collect.kinds(), vec!["step_start"]);
    }
}
