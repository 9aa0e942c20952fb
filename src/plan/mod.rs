//! 计划模式：计划结构、依赖校验、参数生成、计划执行器

pub mod executor;
pub mod step;
pub mod types;
pub mod validator;

pub use executor::{PlanExecutor, SUMMARY_FALLBACK};
pub use step::ArgumentSynthesizer;
pub use types::{Plan, PlanResponse, PlanResponseStep, PlanStep, StepStatus};
pub use validator::{PlanValidator, ValidationResult};
