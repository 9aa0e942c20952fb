//! Prompt 模板与渲染
//!
//! 模板中的 `{key}` 由 render 替换；工具定义、前序步骤输出、执行轨迹各有专门的文本化函数。
//! 计划响应的 JSON Schema 由 schemars 生成后拼入计划 prompt，减少 LLM 输出格式错误。

use schemars::schema_for;
use serde_json::Value;

use crate::core::ExecutionStep;
use crate::llm::ToolDefinition;
use crate::plan::types::PlanResponse;

pub const SYSTEM_PROMPT: &str = "You are a helpful AI assistant with access to tools. \
Work through the user's task step by step, call tools when you need information or need to act, \
and answer clearly based on the tool results. You may call several tools in sequence. \
When the task is done, reply with the final answer and no tool calls.";

pub const PLAN_SYSTEM_PROMPT: &str = "You are a planning AI. You produce execution plans as strict JSON.";

pub const PLAN_PROMPT: &str = "Create an execution plan for the user's request.

Available tools (use these EXACT names):
{tool_definitions}

User request: {user_message}
{conversation_history}
Rules:
1. Only use tool names from the list above. Unknown names make the step fail.
2. If the request needs external data, fetch it with a tool first. Never invent data.
3. Order steps so that each step's inputs are produced by earlier steps.
4. A step that needs no tool (pure reasoning) leaves \"tool\" empty.
5. Return ONLY a JSON object with a \"steps\" array matching this schema:
{plan_schema}";

pub const ARGS_PROMPT: &str = "Generate arguments for the following tool call.

Tool: {tool_name}
Description: {tool_description}
Task: {step_description}
User's original request: {user_message}
{previous_steps}

Instructions:
1. Take concrete values from the Output of previous steps using the access paths shown.
2. Do not use placeholders such as \"https://example.com\" or empty strings.
3. Do not copy the schema itself into the answer.
4. Return ONLY a JSON object whose top-level keys are the parameter names.

Parameter schema (reference only):
{parameter_schema}";

pub const SUMMARY_PROMPT: &str = "Based on the tool execution results below, give the user a clear final answer.

User request: {user_message}

Execution steps and results:
{execution_trace}

Answer the question directly and highlight the key facts from the results. \
If any step failed or was skipped, say which one and why, state what information is missing, \
and suggest what the user can do instead.

Final answer:";

/// 渲染模板：将 `{key}` 替换为对应值
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{}}}", key), value);
    }
    out
}

/// 计划响应的 JSON Schema 字符串
pub fn plan_response_schema_json() -> String {
    let schema = schema_for!(PlanResponse);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// 提取 LLM 输出中的 JSON：```json 代码块、普通 ``` 代码块，或首个 `{` 到最后一个 `}`
pub fn extract_json_block(output: &str) -> &str {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            let inner = rest[..end].trim();
            if inner.starts_with('{') {
                return inner;
            }
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => &trimmed[start..=end],
        _ => trimmed,
    }
}

/// 工具定义文本化：名称、描述、参数（类型 / 必填 / 枚举 / 默认值）、输出字段及引用路径
pub fn format_tool_definitions(defs: &[ToolDefinition]) -> String {
    if defs.is_empty() {
        return "(no tools available)".to_string();
    }
    defs.iter()
        .enumerate()
        .map(|(i, d)| format_single_tool(d, i + 1))
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

fn format_single_tool(def: &ToolDefinition, index: usize) -> String {
    let f = &def.function;
    let mut out = format!("{}. Tool Name: {}\n   Description: {}\n", index, f.name, f.description);

    let required: Vec<&str> = f.parameters["required"]
        .as_array()
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if let Some(props) = f.parameters["properties"].as_object().filter(|p| !p.is_empty()) {
        out.push_str("   Parameters:\n");
        for (name, prop) in props {
            let ty = prop["type"].as_str().unwrap_or("any");
            let req = if required.contains(&name.as_str()) {
                "required"
            } else {
                "optional"
            };
            out.push_str(&format!("     - {} ({}, {})", name, ty, req));
            if let Some(desc) = prop["description"].as_str() {
                out.push_str(&format!(": {}", desc));
            }
            if let Some(values) = prop["enum"].as_array() {
                let values: Vec<String> = values.iter().map(display_value).collect();
                out.push_str(&format!(" [{}]", values.join(", ")));
            }
            if let Some(d) = prop.get("default") {
                out.push_str(&format!(" (default: {})", display_value(d)));
            }
            out.push('\n');
        }
    }

    if let Some(fields) = f.output_fields_schema.as_ref().and_then(Value::as_object) {
        if !fields.is_empty() {
            out.push_str("   Output Fields (how to extract from previous step):\n");
            for (name, field) in fields {
                out.push_str(&format!(
                    "     - {} ({}): {}\n       Access: output.{}\n",
                    name,
                    field["type"].as_str().unwrap_or(""),
                    field["label"].as_str().unwrap_or(""),
                    name
                ));
            }
        }
    }
    out
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 前序步骤的结构化输出，供参数生成引用
pub fn format_previous_steps(steps: &[ExecutionStep]) -> String {
    let mut out = String::new();
    let tool_steps: Vec<&ExecutionStep> = steps.iter().filter(|s| s.action.is_some()).collect();
    if tool_steps.is_empty() {
        return out;
    }
    out.push_str("\nPrevious Steps Results:\n");
    for step in tool_steps {
        out.push_str(&format!("\nStep {} ({}):\n", step.step, step.tool_name().unwrap_or("")));
        match &step.error {
            Some(e) => out.push_str(&format!("  Status: FAILED\n  Error: {}\n", e)),
            None => out.push_str("  Status: SUCCESS\n"),
        }
        // 失败步骤也可能带部分结构化输出
        if let Some(output) = &step.tool_output {
            let json = serde_json::to_string_pretty(output).unwrap_or_default();
            out.push_str(&format!("  Output: {}\n", json));
        }
    }
    out
}

/// 执行轨迹文本化，供总结使用
pub fn format_execution_trace(steps: &[ExecutionStep]) -> String {
    if steps.is_empty() {
        return "(no steps were executed)".to_string();
    }
    steps
        .iter()
        .map(|s| {
            let mut block = format!("Step {}:\n", s.step);
            if let Some(tool) = s.tool_name() {
                block.push_str(&format!("  Tool: {}\n", tool));
            }
            block.push_str(&format!("  Result: {}\n", s.observation));
            if let Some(e) = &s.error {
                block.push_str(&format!("  Error: {}\n", e));
            }
            block
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Action;
    use serde_json::json;

    #[test]
    fn test_render() {
        let s = render("Hi {name}, {name}! {missing}", &[("name", "Bob")]);
        assert_eq!(s, "Hi Bob, Bob! {missing}");
    }

    #[test]
    fn test_extract_json_block() {
        assert_eq!(extract_json_block("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json_block("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(extract_json_block("sure: {\"a\":{\"b\":2}} done"), "{\"a\":{\"b\":2}}");
        assert_eq!(extract_json_block("plain"), "plain");
    }

    #[test]
    fn test_format_tool_definitions() {
        let mut def = ToolDefinition::function(
            "http_get",
            "Fetch a URL",
            json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "Target"},
                    "method": {"type": "string", "enum": ["GET", "HEAD"], "default": "GET"}
                },
                "required": ["url"]
            }),
        );
        def.function.output_fields_schema = Some(json!({"body": {"type": "string", "label": "Body"}}));
        let text = format_tool_definitions(&[def]);
        assert!(text.contains("1. Tool Name: http_get"));
        assert!(text.contains("- url (string, required): Target"));
        assert!(text.contains("- method (string, optional) [GET, HEAD] (default: GET)"));
        assert!(text.contains("Access: output.body"));
    }

    #[test]
    fn test_format_previous_steps() {
        let mut ok = ExecutionStep::new(1, Some(Action::tool_call("search", json!({}))));
        ok.tool_output = json!({"url": "https://a.b"}).as_object().cloned();
        let mut failed = ExecutionStep::new(2, Some(Action::tool_call("fetch", json!({}))));
        failed.error = Some("boom".into());
        failed.tool_output = json!({"fetched": 2}).as_object().cloned();
        let noop = ExecutionStep::new(3, None);

        let text = format_previous_steps(&[ok, failed, noop]);
        assert!(text.contains("Step 1 (search):\n  Status: SUCCESS"));
        assert!(text.contains("\"url\": \"https://a.b\""));
        assert!(text.contains("Step 2 (fetch):\n  Status: FAILED\n  Error: boom\n  Output: {"));
        assert!(text.contains("\"fetched\": 2"));
        assert!(!text.contains("Step 3"));
        assert_eq!(format_previous_steps(&[]), "");
    }

    #[test]
    fn test_plan_schema_mentions_steps() {
        let schema = plan_response_schema_json();
        assert!(schema.contains("\"steps\""));
        assert!(schema.contains("description"));
    }
}
