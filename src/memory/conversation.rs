//! 单个命名空间的滚动缓冲区

use crate::error::{InvariantViolation, Result};
use crate::memory::types::{MemoryMessage, NamespaceKey, clamp_cost};
use std::collections::VecDeque;

/// 命名空间内的短期记忆：按插入顺序保存消息，并维护 token 总数。
///
/// 不变量：`total_tokens() == 缓冲区内各消息 token_cost 之和`。
/// 缓冲区只能通过本类型的方法修改。
#[derive(Debug)]
pub struct ConversationMemory {
    key: NamespaceKey,
    messages: VecDeque<MemoryMessage>,
    total_tokens: f64,
}

impl ConversationMemory {
    pub fn new(key: NamespaceKey) -> Self {
        Self {
            key,
            messages: VecDeque::new(),
            total_tokens: 0.0,
        }
    }

    pub fn key(&self) -> &NamespaceKey {
        &self.key
    }

    /// 追加到缓冲区尾部
    pub fn append(&mut self, message: MemoryMessage) {
        self.total_tokens += clamp_cost(message.token_cost());
        self.messages.push_back(message);
    }

    /// 当前消息的只读拷贝
    pub fn snapshot(&self) -> Vec<MemoryMessage> {
        self.messages.iter().cloned().collect()
    }

    /// 移除最早的 `count` 条消息，返回被移除的消息
    ///
    /// 仅供压缩器在消息已写入摘要后调用。
    pub fn truncate_front(&mut self, count: usize) -> Result<Vec<MemoryMessage>> {
        if count > self.messages.len() {
            return Err(InvariantViolation::TruncateBeyondLength {
                requested: count,
                len: self.messages.len(),
            }
            .into());
        }
        let removed: Vec<MemoryMessage> = self.messages.drain(..count).collect();
        // 重新求和而不是逐条相减，避免浮点误差累积
        self.total_tokens = self.sum_costs();
        Ok(removed)
    }

    pub fn total_tokens(&self) -> f64 {
        self.total_tokens
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 校验 token 记账
    pub fn verify(&self) -> Result<()> {
        let actual = self.sum_costs();
        if (actual - self.total_tokens).abs() > 1e-6 {
            return Err(InvariantViolation::TokenAccountingDrift {
                recorded: self.total_tokens,
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn sum_costs(&self) -> f64 {
        self.messages
            .iter()
            .map(|m| clamp_cost(m.token_cost()))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;
    use crate::llm::types::Message;

    fn msg(cost: f64) -> MemoryMessage {
        MemoryMessage::with_token_cost(Message::user(format!("cost {cost}")), cost)
    }

    #[test]
    fn test_total_tracks_sum_for_any_sequence() {
        let mut memory = ConversationMemory::new(NamespaceKey::new("a", "s"));
        let costs = [3.5, 0.0, -2.0, 10.25, 7.0, f64::NAN, 1.0];
        let mut expected = 0.0;
        for cost in costs {
            memory.append(msg(cost));
            expected += clamp_cost(cost);
            assert_eq!(memory.total_tokens(), expected);
            assert!(memory.verify().is_ok());
        }
        memory.truncate_front(3).unwrap();
        assert_eq!(memory.len(), 4);
        assert_eq!(memory.total_tokens(), 10.25 + 7.0 + 0.0 + 1.0);
        assert!(memory.verify().is_ok());
    }

    #[test]
    fn test_snapshot_preserves_order_and_does_not_alias() {
        let mut memory = ConversationMemory::new(NamespaceKey::new("a", "s"));
        memory.append(msg(1.0));
        memory.append(msg(2.0));
        let snapshot = memory.snapshot();
        memory.append(msg(3.0));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].token_cost(), 1.0);
        assert_eq!(snapshot[1].token_cost(), 2.0);
        assert_eq!(memory.len(), 3);
    }

    #[test]
    fn test_truncate_beyond_length_is_invariant_violation() {
        let mut memory = ConversationMemory::new(NamespaceKey::new("a", "s"));
        memory.append(msg(1.0));
        match memory.truncate_front(2) {
            Err(MemoryError::Invariant(InvariantViolation::TruncateBeyondLength {
                requested,
                len,
            })) => {
                assert_eq!(requested, 2);
                assert_eq!(len, 1);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.total_tokens(), 1.0);
    }

    #[test]
    fn test_truncate_everything() {
        let mut memory = ConversationMemory::new(NamespaceKey::new("a", "s"));
        memory.append(msg(4.0));
        memory.append(msg(6.0));
        let removed = memory.truncate_front(2).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(memory.is_empty());
        assert_eq!(memory.total_tokens(), 0.0);
    }
}
