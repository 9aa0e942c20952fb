//! Forge - Agent 执行引擎
//!
//! 模块划分：
//! - **agent**: 运行时门面（组件构建、执行模式分派、运行状态记录、取消）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、执行轨迹、运行输入 / 结果、TTL 存储
//! - **llm**: 推理客户端抽象与实现（OpenAI 兼容 / Mock）、流式工具调用拼装
//! - **plan**: 计划生成、依赖校验、参数生成与逐步执行
//! - **prompt**: Prompt 模板与渲染
//! - **react**: ReAct 主循环与过程事件协议
//! - **tools**: 工具契约、注册表、重试 / 超时 / 缓存执行器
//! - **transport**: SSE 帧格式

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod plan;
pub mod prompt;
pub mod react;
pub mod tools;
pub mod transport;

pub use agent::{AgentConfig, AgentRequest, AgentRunner, ExecutionMode};
pub use crate::core::AgentError;
