//! 计划依赖校验
//!
//! 按顺序遍历带工具的步骤，维护「已提供能力」与「已使用工具」两个集合：
//! 工具未注册、requires 未满足 → 错误；与已用工具冲突、建议前置工具一个都没用过 → 警告。
//! 每步检查完成后再把该工具的 provides 加入集合。

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::plan::Plan;
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct PlanValidator {
    registry: Arc<ToolRegistry>,
}

impl PlanValidator {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    pub fn validate(&self, plan: &Plan) -> ValidationResult {
        if plan.is_empty() {
            return ValidationResult {
                valid: false,
                errors: vec!["计划为空".to_string()],
                warnings: Vec::new(),
            };
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut provided: HashSet<String> = HashSet::new();
        let mut used: HashSet<String> = HashSet::new();

        for step in &plan.steps {
            let Some(tool) = step.tool.as_deref() else {
                continue;
            };
            let Some(deps) = self.registry.dependencies(tool) else {
                errors.push(format!("步骤 {}: 工具 {} 未注册", step.index, tool));
                continue;
            };

            for req in &deps.requires {
                if !provided.contains(req) {
                    errors.push(format!(
                        "步骤 {}: 工具 {} 需要 {}，但前序步骤未提供",
                        step.index, tool, req
                    ));
                }
            }

            for conflict in &deps.conflicts_with {
                if used.contains(conflict) {
                    warnings.push(format!(
                        "步骤 {}: 工具 {} 与已使用的工具 {} 冲突",
                        step.index, tool, conflict
                    ));
                }
            }

            if !deps.suggested_predecessors.is_empty()
                && !deps.suggested_predecessors.iter().any(|p| used.contains(p))
            {
                warnings.push(format!(
                    "步骤 {}: 建议先使用 {}",
                    step.index,
                    deps.suggested_predecessors.join(" 或 ")
                ));
            }

            provided.extend(deps.provides.iter().cloned());
            used.insert(tool.to_string());
        }

        if !errors.is_empty() {
            tracing::warn!(errors = errors.len(), "plan validation failed");
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::plan::PlanStep;
    use crate::tools::{
        DependencyDescriptor, ExecutionConfig, ExecutionContext, Tool, ToolArgs, ToolMetadata, ToolOutput,
    };

    struct DepTool {
        code: &'static str,
        deps: DependencyDescriptor,
    }

    #[async_trait]
    impl Tool for DepTool {
        fn describe(&self) -> ToolMetadata {
            ToolMetadata::new(self.code, "")
        }

        fn execution_config(&self) -> Option<ExecutionConfig> {
            Some(ExecutionConfig::default().with_dependencies(self.deps.clone()))
        }

        async fn execute(&self, _ctx: &ExecutionContext, _args: &ToolArgs) -> Result<ToolOutput, String> {
            Ok(ToolOutput::ok(""))
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn validator() -> PlanValidator {
        let mut reg = ToolRegistry::new();
        reg.register(DepTool {
            code: "login",
            deps: DependencyDescriptor {
                provides: strings(&["session"]),
                ..Default::default()
            },
        })
        .unwrap();
        reg.register(DepTool {
            code: "fetch",
            deps: DependencyDescriptor {
                requires: strings(&["session"]),
                suggested_predecessors: strings(&["login", "refresh"]),
                ..Default::default()
            },
        })
        .unwrap();
        reg.register(DepTool {
            code: "wipe",
            deps: DependencyDescriptor {
                conflicts_with: strings(&["fetch"]),
                ..Default::default()
            },
        })
        .unwrap();
        PlanValidator::new(Arc::new(reg))
    }

    fn plan(tools: &[Option<&str>]) -> Plan {
        let steps = tools
            .iter()
            .enumerate()
            .map(|(i, t)| PlanStep::new(i + 1, format!("step {}", i + 1), t.map(String::from)))
            .collect();
        Plan::new(steps, "test")
    }

    #[test]
    fn test_empty_plan_invalid() {
        let r = validator().validate(&plan(&[]));
        assert!(!r.valid);
        assert_eq!(r.errors, vec!["计划为空".to_string()]);
    }

    #[test]
    fn test_valid_ordering() {
        let r = validator().validate(&plan(&[Some("login"), None, Some("fetch")]));
        assert!(r.valid, "{:?}", r.errors);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_missing_requirement_and_suggestion() {
        let r = validator().validate(&plan(&[Some("fetch"), Some("login")]));
        assert!(!r.valid);
        assert_eq!(r.errors.len(), 1);
        assert!(r.errors[0].contains("需要 session"));
        assert_eq!(r.warnings, vec!["步骤 1: 建议先使用 login 或 refresh".to_string()]);
    }

    #[test]
    fn test_unknown_tool_and_conflict() {
        let r = validator().validate(&plan(&[Some("login"), Some("fetch"), Some("wipe"), Some("ghost")]));
        assert!(!r.valid);
        assert_eq!(r.errors, vec!["步骤 4: 工具 ghost 未注册".to_string()]);
        assert_eq!(r.warnings.len(), 1);
        assert!(r.warnings[0].contains("冲突"));
    }

    #[test]
    fn test_valid_iff_no_unknown_and_requires_met() {
        let v = validator();
        let choices = [None, Some("login"), Some("fetch"), Some("wipe"), Some("ghost")];
        for a in choices {
            for b in choices {
                for c in choices {
                    let tools = [a, b, c];
                    let mut provided = false;
                    let mut expect_valid = true;
                    for t in tools.iter().flatten() {
                        match *t {
                            "ghost" => expect_valid = false,
                            "fetch" if !provided => expect_valid = false,
                            "login" => provided = true,
                            _ => {}
                        }
                    }
                    let r = v.validate(&plan(&tools));
                    assert_eq!(r.valid, expect_valid, "{:?} -> {:?}", tools, r.errors);
                }
            }
        }
    }
}
