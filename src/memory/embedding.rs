//! 向量化能力
//!
//! [`EmbeddingProvider`] 是外部模型层的接口；[`HashEmbedding`] 是不依赖模型的
//! 确定性实现（特征哈希词袋），适合离线运行和测试。

use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashSet;

/// 将文本转换为向量
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 模型标识，长期存储按该标识索引向量
    fn model_id(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// 特征哈希词袋向量：共享的词越多，余弦相似度越高
pub struct HashEmbedding {
    model_id: String,
    dims: usize,
}

impl HashEmbedding {
    pub fn new(dims: usize) -> Self {
        let dims = dims.max(1);
        Self {
            model_id: format!("hash-{dims}"),
            dims,
        }
    }

    pub fn with_model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; self.dims];
        for token in tokenize(text) {
            let hash = fnv1a64(token.as_bytes());
            let idx = (hash % self.dims as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedding {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// 余弦相似度，维度不一致或零向量时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() || denom < f64::EPSILON {
        return 0.0;
    }
    let raw = dot / denom;
    if !raw.is_finite() {
        return 0.0;
    }
    raw.clamp(-1.0, 1.0) as f32
}

/// 按空白与常见中英文标点切词，去重并转小写
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| c.is_whitespace() || "，。！？、；：,.!?;:()[]{}\"'".contains(c))
        .filter(|s| !s.is_empty() && s.chars().count() > 1)
        .map(|s| s.to_lowercase())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_edge_cases() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_hash_embedding_prefers_shared_words() {
        let provider = HashEmbedding::new(128);
        assert_eq!(provider.model_id(), "hash-128");
        let vectors = provider
            .embed(&[
                "rust ownership borrowing",
                "ownership and borrowing in rust",
                "weather forecast tomorrow",
            ])
            .await
            .unwrap();
        assert_eq!(vectors[0].len(), 128);
        let close = cosine_similarity(&vectors[0], &vectors[1]);
        let far = cosine_similarity(&vectors[0], &vectors[2]);
        assert!(close > far, "close={close} far={far}");
    }

    #[test]
    fn test_tokenize_dedups_and_lowercases() {
        let tokens = tokenize("Rust, rust！所有权 a");
        assert_eq!(tokens, vec!["rust".to_string(), "所有权".to_string()]);
    }
}
