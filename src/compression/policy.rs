use crate::config::MemoryConfig;
use crate::memory::types::{MemoryMessage, clamp_cost};

/// 压缩触发条件与前缀选择策略
///
/// - 触发：`total > window * threshold_ratio` 或 `消息数 > max_messages`
/// - 选择：从最早的消息开始贪心截取，直到剩余 token 不超过 `window * target_ratio`；
///   若消息数超限，同时保证剩余条数不超过 `max_messages * target_ratio`
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    threshold_tokens: f64,
    target_tokens: f64,
    max_messages: usize,
    target_messages: usize,
}

/// 一次压缩的选择结果
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionPlan {
    /// 需要压缩的前缀长度
    pub consume: usize,
    pub tokens_before: f64,
    pub tokens_removed: f64,
}

impl CompressionPolicy {
    pub fn new(
        window_tokens: usize,
        threshold_ratio: f64,
        target_ratio: f64,
        max_messages: usize,
    ) -> Self {
        let target_ratio = target_ratio.min(threshold_ratio);
        Self {
            threshold_tokens: window_tokens as f64 * threshold_ratio,
            target_tokens: window_tokens as f64 * target_ratio,
            max_messages,
            target_messages: (max_messages as f64 * target_ratio).floor() as usize,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(
            config.default_window_tokens,
            config.compress_threshold_ratio,
            config.compress_target_ratio,
            config.max_messages,
        )
    }

    pub fn threshold_tokens(&self) -> f64 {
        self.threshold_tokens
    }

    pub fn should_compress(&self, total_tokens: f64, message_count: usize) -> bool {
        total_tokens > self.threshold_tokens || message_count > self.max_messages
    }

    /// 计算需要压缩的最早前缀；前缀可能覆盖整个缓冲区
    pub fn plan(&self, messages: &[MemoryMessage]) -> CompressionPlan {
        let costs: Vec<f64> = messages.iter().map(|m| clamp_cost(m.token_cost())).collect();
        let tokens_before: f64 = costs.iter().sum();

        let mut by_tokens = 0;
        let mut remaining = tokens_before;
        while remaining > self.target_tokens && by_tokens < costs.len() {
            remaining -= costs[by_tokens];
            by_tokens += 1;
        }

        // token 开销退化（例如全为 0）时，条数上限兜底
        let by_count = if messages.len() > self.max_messages {
            messages.len() - self.target_messages
        } else {
            0
        };

        let consume = by_tokens.max(by_count);
        CompressionPlan {
            consume,
            tokens_before,
            tokens_removed: costs[..consume].iter().sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;

    fn messages(costs: &[f64]) -> Vec<MemoryMessage> {
        costs
            .iter()
            .map(|c| MemoryMessage::with_token_cost(Message::user("m".to_string()), *c))
            .collect()
    }

    #[test]
    fn test_trigger_is_strictly_above_threshold() {
        let policy = CompressionPolicy::new(100, 0.8, 0.5, 5);
        assert!(!policy.should_compress(80.0, 5));
        assert!(policy.should_compress(80.5, 1));
        assert!(policy.should_compress(0.0, 6));
        assert!(!policy.should_compress(0.0, 0));
    }

    #[test]
    fn test_plan_drops_oldest_until_under_target() {
        let policy = CompressionPolicy::new(100, 0.8, 0.5, 5);
        let plan = policy.plan(&messages(&[25.0, 25.0, 25.0, 25.0]));
        assert_eq!(plan.consume, 2);
        assert_eq!(plan.tokens_before, 100.0);
        assert_eq!(plan.tokens_removed, 50.0);
        assert!(plan.tokens_before - plan.tokens_removed <= policy.threshold_tokens());
    }

    #[test]
    fn test_plan_may_drain_entire_buffer() {
        let policy = CompressionPolicy::new(100, 0.8, 0.5, 5);
        let plan = policy.plan(&messages(&[500.0]));
        assert_eq!(plan.consume, 1);
        assert_eq!(plan.tokens_removed, 500.0);
    }

    #[test]
    fn test_count_fallback_with_zero_costs() {
        let policy = CompressionPolicy::new(100, 0.8, 0.5, 4);
        let plan = policy.plan(&messages(&[0.0; 5]));
        // 剩余条数降到 floor(4 * 0.5) = 2
        assert_eq!(plan.consume, 3);
        assert_eq!(plan.tokens_removed, 0.0);
    }

    #[test]
    fn test_plan_below_target_consumes_nothing() {
        let policy = CompressionPolicy::new(100, 0.8, 0.5, 5);
        let plan = policy.plan(&messages(&[10.0, 10.0]));
        assert_eq!(plan.consume, 0);
    }
}
