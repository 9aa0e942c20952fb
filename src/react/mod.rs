//! ReAct 执行模式与过程事件协议

pub mod events;
pub mod loop_;

pub use events::{AgentEvent, CollectSink, EventSink, FnSink, NoopSink};
pub use loop_::{ReactExecutor, MAX_STEPS_ANSWER};
