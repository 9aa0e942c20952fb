//! 重试策略与重试状态机
//!
//! 失败分类：错误文本（忽略大小写）包含任一关键字即可重试；没有错误永远不可重试。
//! 退避：initial × multiplier^k（k 为第几次重试，从 0 开始），不超过 max_backoff。
//!
//! 状态机：Idle → Attempting → BackingOff → { Attempting | Succeeded | Exhausted }

use std::time::Duration;

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大重试次数（总尝试次数 = max_retries + 1）
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    /// 可重试错误关键字（子串匹配，忽略大小写）
    pub retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            retryable_errors: default_retryable_errors(),
        }
    }
}

pub fn default_retryable_errors() -> Vec<String> {
    ["timeout", "connection", "network", "rate limit", "503", "504"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl RetryPolicy {
    /// 不重试的策略（只尝试一次）
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    pub fn is_retryable(&self, error: Option<&str>) -> bool {
        let Some(error) = error else {
            return false;
        };
        let lower = error.to_lowercase();
        self.retryable_errors
            .iter()
            .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
    }

    /// 第 k 次重试前的等待时间（k 从 0 开始）；倍数小于 1 时按 1 计，保证不递减
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let initial_ms = self.initial_backoff.as_millis() as f64;
        let max_ms = self.max_backoff.as_millis() as f64;
        let exp = self.backoff_multiplier.max(1.0).powi(retry_index.min(i32::MAX as u32) as i32);
        let ms = (initial_ms * exp).min(max_ms);
        if !ms.is_finite() || ms < 0.0 {
            return self.max_backoff;
        }
        Duration::from_millis(ms as u64)
    }
}

/// 重试状态
#[derive(Debug, Clone, PartialEq)]
pub enum RetryState {
    Idle,
    /// 正在进行第 attempt 次尝试（从 1 开始）
    Attempting { attempt: u32 },
    /// 等待 delay 后开始第 next_attempt 次尝试
    BackingOff { next_attempt: u32, delay: Duration },
    Succeeded { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// 显式重试状态机：执行器只负责真正的调用与等待，调度决策全部在这里
#[derive(Debug, Clone)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: RetryState,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
        }
    }

    pub fn state(&self) -> &RetryState {
        &self.state
    }

    /// 已开始（或即将开始）的尝试次数
    pub fn attempts(&self) -> u32 {
        match self.state {
            RetryState::Idle => 0,
            RetryState::Attempting { attempt } => attempt,
            RetryState::BackingOff { next_attempt, .. } => next_attempt,
            RetryState::Succeeded { attempts } | RetryState::Exhausted { attempts } => attempts,
        }
    }

    /// Idle → Attempting(1)；BackingOff → Attempting(next)
    pub fn begin_attempt(&mut self) -> u32 {
        let attempt = match self.state {
            RetryState::Idle => 1,
            RetryState::BackingOff { next_attempt, .. } => next_attempt,
            RetryState::Attempting { attempt } => attempt,
            RetryState::Succeeded { attempts } | RetryState::Exhausted { attempts } => attempts,
        };
        if matches!(self.state, RetryState::Idle | RetryState::BackingOff { .. }) {
            self.state = RetryState::Attempting { attempt };
        }
        attempt
    }

    pub fn on_success(&mut self) {
        let attempts = self.attempts().max(1);
        self.state = RetryState::Succeeded { attempts };
    }

    /// 一次尝试失败：可重试且未超出次数则进入 BackingOff，否则 Exhausted
    pub fn on_failure(&mut self, error: &str) -> &RetryState {
        let attempt = self.attempts().max(1);
        if attempt < self.policy.max_attempts() && self.policy.is_retryable(Some(error)) {
            let delay = self.policy.backoff(attempt - 1);
            self.state = RetryState::BackingOff {
                next_attempt: attempt + 1,
                delay,
            };
        } else {
            self.state = RetryState::Exhausted { attempts: attempt };
        }
        &self.state
    }

    /// 外部终止（取消 / 截止时间）：保持当前计数直接进入 Exhausted
    pub fn abort(&mut self) {
        let attempts = self.attempts();
        self.state = RetryState::Exhausted { attempts };
    }
}
