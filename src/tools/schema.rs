//! 工具参数 Schema 与类型化参数
//!
//! 工具用 ToolSchema 声明参数（ParamType 为和类型）；调用前 `normalize` 负责：
//! 拒绝未声明 / 类型不符 / 缺少必填 / 不在枚举内的字段，并为缺省字段填入默认值。
//! `to_function_parameters` 将其转为 LLM function calling 使用的 JSON Schema 对象。

use serde_json::{json, Map, Value};

/// 参数类型
#[derive(Debug, Clone, PartialEq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    /// 数组，可声明元素类型
    Array(Option<Box<ParamType>>),
    Object,
}

impl ParamType {
    pub fn array_of(item: ParamType) -> Self {
        ParamType::Array(Some(Box::new(item)))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array(_) => "array",
            ParamType::Object => "object",
        }
    }

    /// 从 JSON Schema 的 type 字符串解析；未知类型按 string 处理
    pub fn parse(s: &str) -> Self {
        match s {
            "number" => ParamType::Number,
            "integer" => ParamType::Integer,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array(None),
            "object" => ParamType::Object,
            _ => ParamType::String,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array(item) => match (value.as_array(), item) {
                (Some(items), Some(t)) => items.iter().all(|v| t.matches(v)),
                (Some(_), None) => true,
                (None, _) => false,
            },
            ParamType::Object => value.is_object(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            ParamType::Array(Some(item)) => json!({ "type": "array", "items": item.to_json() }),
            other => json!({ "type": other.as_str() }),
        }
    }
}

/// 单个参数声明
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    pub param_type: ParamType,
    pub title: String,
    pub description: String,
    pub default: Option<Value>,
    pub enum_values: Vec<Value>,
}

impl PropertySchema {
    pub fn new(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            title: String::new(),
            description: description.into(),
            default: None,
            enum_values: Vec::new(),
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ParamType::Integer, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(ParamType::Boolean, description)
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// 描述文本：优先 description，其次 title
    pub fn display_description(&self) -> &str {
        if self.description.is_empty() {
            &self.title
        } else {
            &self.description
        }
    }

    fn to_json(&self) -> Value {
        let mut obj = match self.param_type.to_json() {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        let desc = self.display_description();
        if !desc.is_empty() {
            obj.insert("description".into(), Value::String(desc.to_string()));
        }
        if !self.enum_values.is_empty() {
            obj.insert("enum".into(), Value::Array(self.enum_values.clone()));
        }
        if let Some(d) = &self.default {
            obj.insert("default".into(), d.clone());
        }
        Value::Object(obj)
    }
}

/// 工具参数 Schema（对象类型）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    /// 参数名 → 声明（保持声明顺序）
    pub properties: Vec<(String, PropertySchema)>,
    pub required: Vec<String>,
    /// 是否接受未声明字段
    pub additional_properties: bool,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// 不限制参数的 Schema
    pub fn open() -> Self {
        Self {
            additional_properties: true,
            ..Self::default()
        }
    }

    pub fn property(mut self, name: impl Into<String>, prop: PropertySchema) -> Self {
        self.properties.push((name.into(), prop));
        self
    }

    pub fn required_property(mut self, name: impl Into<String>, prop: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.push((name, prop));
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// 转为 function calling 的 parameters 对象：`{type: object, properties, required}`
    pub fn to_function_parameters(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, p)| (name.clone(), p.to_json()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }

    /// 校验并规范化参数
    pub fn normalize(&self, args: &ToolArgs) -> Result<ToolArgs, String> {
        let mut out = Map::new();

        for (key, value) in args.as_map() {
            match self.get(key) {
                Some(prop) => {
                    if value.is_null() {
                        continue;
                    }
                    if !prop.param_type.matches(value) {
                        return Err(format!(
                            "field '{}' expects {}, got {}",
                            key,
                            prop.param_type.as_str(),
                            json_type_name(value)
                        ));
                    }
                    if !prop.enum_values.is_empty() && !prop.enum_values.contains(value) {
                        return Err(format!("field '{}' must be one of {}", key, Value::Array(prop.enum_values.clone())));
                    }
                    out.insert(key.clone(), value.clone());
                }
                None if self.additional_properties => {
                    out.insert(key.clone(), value.clone());
                }
                None => return Err(format!("unknown field '{}'", key)),
            }
        }

        for (name, prop) in &self.properties {
            if out.contains_key(name) {
                continue;
            }
            match &prop.default {
                Some(d) => {
                    out.insert(name.clone(), d.clone());
                }
                None if self.is_required(name) => {
                    return Err(format!("missing required field '{}'", name));
                }
                None => {}
            }
        }

        Ok(ToolArgs(out))
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 类型化的工具参数（JSON 对象）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// null 视为空参数；非对象报错
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(m) => Ok(Self(m)),
            Value::Null => Ok(Self::default()),
            other => Err(format!("arguments must be a JSON object, got {}", json_type_name(&other))),
        }
    }

    /// 解析 LLM 给出的参数字符串；空串视为空参数
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::default());
        }
        let value: Value = serde_json::from_str(raw).map_err(|e| format!("invalid JSON arguments: {}", e))?;
        Self::from_value(value)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ToolArgs {
    fn from(m: Map<String, Value>) -> Self {
        Self(m)
    }
}
