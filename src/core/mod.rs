//! 核心层：错误类型、执行轨迹、运行输入 / 结果、TTL 键值存储

pub mod error;
pub mod run;
pub mod store;
pub mod trace;

pub use error::AgentError;
pub use run::{RunInput, RunOutcome};
pub use store::TtlStore;
pub use trace::{Action, ExecutionStep, FinishReason, TokenUsage, ToolUsage, Trace};
