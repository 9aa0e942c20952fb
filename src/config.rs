//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORGE__*` 覆盖（双下划线表示嵌套，如 `FORGE__AGENT__MODE=plan`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agent::{AgentConfig, ExecutionMode};
use crate::tools::{ExecutionConfig, RetryPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
}

/// [agent] 段：模型、执行模式、步数上限、温度、可用工具
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_model")]
    pub model: String,
    /// reactive（别名 direct）/ plan
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// 为空表示全部已注册工具
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// 拼入上下文的历史消息条数
    #[serde(default = "default_history_messages")]
    pub history_messages: usize,
    /// 计划校验不通过时是否直接失败（默认仅作提示）
    #[serde(default)]
    pub strict_plan_validation: bool,
    /// ReAct 模式下是否用流式接口调用 LLM
    #[serde(default)]
    pub stream_reasoning: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            mode: default_mode(),
            max_steps: default_max_steps(),
            temperature: default_temperature(),
            allowed_tools: Vec::new(),
            history_messages: default_history_messages(),
            strict_plan_validation: false,
            stream_reasoning: false,
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_mode() -> String {
    "reactive".to_string()
}

fn default_max_steps() -> usize {
    10
}

fn default_temperature() -> f32 {
    0.7
}

fn default_history_messages() -> usize {
    10
}

impl AgentSection {
    pub fn agent_config(&self) -> AgentConfig {
        let mode = ExecutionMode::parse(&self.mode).unwrap_or_else(|| {
            tracing::warn!(mode = %self.mode, "unknown agent mode, falling back to reactive");
            ExecutionMode::Reactive
        });
        AgentConfig {
            model: self.model.clone(),
            mode,
            max_steps: self.max_steps,
            temperature: self.temperature,
            allowed_tools: self.allowed_tools.clone(),
            history_messages: self.history_messages,
            strict_plan_validation: self.strict_plan_validation,
            stream_reasoning: self.stream_reasoning,
        }
    }
}

/// [llm] 段：后端、端点、密钥、超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 未设置时读取环境变量 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    crate::llm::openai::DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout() -> u64 {
    120
}

/// [tools] 段：单次调用截止时间、重试、缓存
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用（含重试与退避）的截止时间（秒），0 表示不限
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub cache: CacheSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout_secs(),
            retry: RetrySection::default(),
            cache: CacheSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    300
}

/// [tools.retry] 段
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "crate::tools::retry::default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable_errors: crate::tools::retry::default_retryable_errors(),
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// [tools.cache] 段
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl AppConfig {
    /// 全局默认工具执行配置
    pub fn execution_config(&self) -> ExecutionConfig {
        let t = &self.tools;
        let timeout = if t.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(t.timeout_secs))
        };
        ExecutionConfig::default()
            .with_timeout(timeout)
            .with_retry(RetryPolicy {
                max_retries: t.retry.max_retries,
                initial_backoff: Duration::from_millis(t.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(t.retry.max_backoff_ms),
                backoff_multiplier: t.retry.backoff_multiplier,
                retryable_errors: t.retry.retryable_errors.clone(),
            })
            .with_cache(t.cache.enabled, Duration::from_secs(t.cache.ttl_secs))
    }
}

/// 从 config 目录加载配置，环境变量 FORGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
