//! 工具元数据与执行配置
//!
//! ToolMetadata 描述工具本身（编码、名称、是否可被 Agent 调用、输出字段结构）；
//! ExecutionConfig 描述如何调用它（超时、重试、依赖关系、缓存）。
//! 工具可通过 `Tool::execution_config` 提供自己的配置，否则使用全局默认。

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::retry::RetryPolicy;

/// 控制流节点编码：这些节点属于编排层，不能作为 Agent 工具
pub const CONTROL_FLOW_CODES: &[&str] = &["condition", "switch", "delay", "loop", "external_trigger"];

/// 输出字段结构（可嵌套），用于向 LLM 说明工具返回了什么、如何引用
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputField {
    #[serde(rename = "type")]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<(String, OutputField)>,
}

impl OutputField {
    pub fn new(field_type: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, name: impl Into<String>, field: OutputField) -> Self {
        self.children.push((name.into(), field));
        self
    }

    /// `{type, label, children: {name: ...}}` 形式的 JSON
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("type".into(), Value::String(self.field_type.clone()));
        if !self.label.is_empty() {
            obj.insert("label".into(), Value::String(self.label.clone()));
        }
        if !self.children.is_empty() {
            obj.insert("children".into(), fields_to_json(&self.children));
        }
        Value::Object(obj)
    }
}

fn fields_to_json(fields: &[(String, OutputField)]) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(name, f)| (name.clone(), f.to_json()))
            .collect(),
    )
}

/// 工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// 唯一编码（即 Agent 使用的工具名）
    pub code: String,
    pub name: String,
    pub description: String,
    pub agent_callable: bool,
    /// 输出字段：字段名 → 结构（保持声明顺序）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output_fields: Vec<(String, OutputField)>,
}

impl ToolMetadata {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            name: code.clone(),
            code,
            description: description.into(),
            agent_callable: true,
            output_fields: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, field: OutputField) -> Self {
        self.output_fields.push((name.into(), field));
        self
    }

    pub fn not_callable(mut self) -> Self {
        self.agent_callable = false;
        self
    }

    pub fn is_control_flow(&self) -> bool {
        CONTROL_FLOW_CODES.contains(&self.code.as_str())
    }

    /// 输出字段结构的 JSON 形式；无输出字段时为 None
    pub fn output_fields_schema(&self) -> Option<Value> {
        if self.output_fields.is_empty() {
            None
        } else {
            Some(fields_to_json(&self.output_fields))
        }
    }
}

/// 工具间依赖关系（供计划校验）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyDescriptor {
    /// 执行后可提供的能力 / 数据
    pub provides: Vec<String>,
    /// 执行前必须已有的能力 / 数据
    pub requires: Vec<String>,
    /// 建议在其之前使用的工具（至少一个）
    pub suggested_predecessors: Vec<String>,
    /// 与之冲突的工具
    pub conflicts_with: Vec<String>,
}

/// 结果缓存策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(300),
        }
    }
}

/// 工具执行配置
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// 整次调用（含所有重试与退避等待）的截止时间；None 表示不限
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
    pub dependencies: DependencyDescriptor,
    pub cache: CachePolicy,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(300)),
            retry: RetryPolicy::default(),
            dependencies: DependencyDescriptor::default(),
            cache: CachePolicy::default(),
        }
    }
}

impl ExecutionConfig {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dependencies(mut self, dependencies: DependencyDescriptor) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_cache(mut self, enabled: bool, ttl: Duration) -> Self {
        self.cache = CachePolicy { enabled, ttl };
        self
    }
}
