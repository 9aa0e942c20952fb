//! 工具层：工具契约与注册表、参数 Schema、执行配置、重试状态机、结果缓存、弹性执行器

pub mod cache;
pub mod echo;
pub mod executor;
pub mod metadata;
pub mod registry;
pub mod retry;
pub mod schema;

pub use cache::{cache_key, CacheStats, InMemoryResultCache, ResultCache};
pub use echo::EchoTool;
pub use executor::{InvocationResult, ToolExecutor};
pub use metadata::{CachePolicy, DependencyDescriptor, ExecutionConfig, OutputField, ToolMetadata};
pub use registry::{ExecutionContext, RegisteredTool, Tool, ToolOutput, ToolRegistry};
pub use retry::{RetryMachine, RetryPolicy, RetryState};
pub use schema::{ParamType, PropertySchema, ToolArgs, ToolSchema};
