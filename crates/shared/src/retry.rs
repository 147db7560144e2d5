//! 重试策略与失败预算
//!
//! 商品列表分页拉取时，网络抖动或服务端返回结构异常都会计入同一个失败计数，
//! 计数达到上限后整体放弃。`RetryPolicy` 描述上限与退避，`RetryBudget`
//! 则是跨多次请求共享的计数器。

use std::time::Duration;

use tracing::warn;

// ---------------------------------------------------------------------------
// RetryPolicy — 重试策略配置
// ---------------------------------------------------------------------------

/// 重试策略配置
///
/// `max_retries` 是允许累计的失败次数，达到即放弃；
/// 退避时间按 `initial_delay * multiplier^attempt` 计算并受 `max_delay` 限制。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 允许累计的最大失败次数
    pub max_retries: u32,
    /// 首次重试前的等待时间
    pub initial_delay: Duration,
    /// 退避时间上限
    pub max_delay: Duration,
    /// 每次重试的退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 默认策略：最多失败 3 次，初始等待 200 毫秒，最大等待 5 秒，倍数 2.0
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 固定间隔策略（抢兑场景下不希望退避时间越拉越长）
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// 计算第 N 次重试的等待时间（attempt 从 0 开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// 已失败 `failures` 次后是否还能继续
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_retries
    }

    /// 基于当前策略创建一个新的失败预算
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            policy: self.clone(),
            failures: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryBudget — 跨请求共享的失败计数
// ---------------------------------------------------------------------------

/// 失败预算
///
/// 每次失败调用 `record_failure`，返回值表示是否还有剩余预算。
/// 成功请求不会重置计数。
#[derive(Debug, Clone)]
pub struct RetryBudget {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryBudget {
    /// 记录一次失败，返回是否仍可重试
    pub fn record_failure(&mut self, operation: &str) -> bool {
        self.failures += 1;
        let remaining = self.policy.should_retry(self.failures);
        if !remaining {
            warn!(
                operation,
                failures = self.failures,
                max_retries = self.policy.max_retries,
                "已达最大失败次数，放弃重试"
            );
        }
        remaining
    }

    /// 下一次重试前应等待的时间
    pub fn next_delay(&self) -> Duration {
        self.policy
            .delay_for_attempt(self.failures.saturating_sub(1))
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_exhausted(&self) -> bool {
        !self.policy.should_retry(self.failures)
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
