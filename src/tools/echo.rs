//! Echo 工具（冒烟测试用）

use async_trait::async_trait;

use crate::tools::metadata::{OutputField, ToolMetadata};
use crate::tools::schema::{PropertySchema, ToolArgs, ToolSchema};
use crate::tools::{ExecutionContext, Tool, ToolOutput};

/// Echo 工具：回显文本
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn describe(&self) -> ToolMetadata {
        ToolMetadata::new("echo", "Echo text back (for testing).")
            .with_name("Echo")
            .with_output("text", OutputField::new("string", "Echoed text"))
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::new().required_property("text", PropertySchema::string("Text to echo"))
    }

    async fn execute(&self, _ctx: &ExecutionContext, args: &ToolArgs) -> Result<ToolOutput, String> {
        let text = args.get_str("text").unwrap_or("(empty)");
        Ok(ToolOutput::ok(text).with_field("text", text))
    }
}
