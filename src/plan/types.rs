//! 计划数据结构
//!
//! 步骤状态单调推进：pending → running → {completed | failed | skipped}，
//! 未开始的步骤可直接 pending → skipped；结束后不可再变。

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::prompt::extract_json_block;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }

    pub fn can_transition(self, to: StepStatus) -> bool {
        match (self, to) {
            (StepStatus::Pending, StepStatus::Running) => true,
            (StepStatus::Pending, StepStatus::Skipped) => true,
            (StepStatus::Running, t) => t.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 从 1 开始
    #[serde(rename = "step")]
    pub index: usize,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default)]
    pub rationale: String,
    pub status: StepStatus,
}

impl PlanStep {
    pub fn new(index: usize, description: impl Into<String>, tool: Option<String>) -> Self {
        Self {
            index,
            description: description.into(),
            tool,
            rationale: String::new(),
            status: StepStatus::Pending,
        }
    }

    pub fn transition(&mut self, to: StepStatus) -> Result<(), String> {
        if self.status.can_transition(to) {
            self.status = to;
            Ok(())
        } else {
            Err(format!(
                "step {} cannot move from {} to {}",
                self.index, self.status, to
            ))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub total_steps: usize,
    /// RFC 3339
    pub created_at: String,
    /// 生成计划的模型
    pub generated_by: String,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>, generated_by: impl Into<String>) -> Self {
        Self {
            total_steps: steps.len(),
            steps,
            created_at: chrono::Utc::now().to_rfc3339(),
            generated_by: generated_by.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 解析 LLM 返回的计划 JSON（容忍 markdown 代码块包裹）
    pub fn parse(text: &str, generated_by: &str) -> Result<Plan, String> {
        let json = extract_json_block(text);
        let resp: PlanResponse =
            serde_json::from_str(json).map_err(|e| format!("invalid plan JSON: {}", e))?;
        let steps = resp
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, s)| PlanStep {
                index: i + 1,
                description: s.description,
                tool: s.tool.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
                rationale: s.reasoning.unwrap_or_default(),
                status: StepStatus::Pending,
            })
            .collect();
        Ok(Plan::new(steps, generated_by))
    }
}

/// LLM 计划响应格式（也用于生成 prompt 中的 JSON Schema）
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanResponse {
    /// 按执行顺序排列的步骤
    pub steps: Vec<PlanResponseStep>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PlanResponseStep {
    /// 步骤序号，从 1 开始
    #[serde(default)]
    pub step: Option<usize>,
    /// 这一步要做什么
    #[serde(default)]
    pub description: String,
    /// 使用的工具名；不需要工具时留空
    #[serde(default)]
    pub tool: Option<String>,
    /// 为什么需要这一步
    #[serde(default, alias = "rationale")]
    pub reasoning: Option<String>,
}
