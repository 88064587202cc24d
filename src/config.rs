//! 记忆系统配置
//!
//! 先从 YAML 文件加载（缺省字段取默认值），再由环境变量覆盖，格式：
//! ```text
//! ECHO_MEMORY_MAX_NAMESPACES=1000
//! ECHO_MEMORY_WINDOW_TOKENS=8192
//! ECHO_MEMORY_EMBEDDING_MODEL=hash-256
//! ```
//! 所有数值在 [`MemoryConfig::validate`] 中统一校验，非法配置在启动期直接报错。

use crate::error::{ConfigError, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ENV_PREFIX: &str = "ECHO_MEMORY_";

/// 压缩执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    /// 在触发压缩的 append 调用内同步完成
    #[default]
    Inline,
    /// 交给后台任务执行，append 立即返回
    Background,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// 同时存活的命名空间上限
    pub max_namespaces: usize,
    /// 命名空间空闲多久后过期（分钟）
    pub ttl_minutes: u64,
    /// 每个命名空间的 token 窗口
    pub default_window_tokens: usize,
    /// 超过 `window * ratio` 时触发压缩
    pub compress_threshold_ratio: f64,
    /// 压缩后回落到的水位（窗口比例），不得高于触发阈值
    pub compress_target_ratio: f64,
    /// 消息条数硬上限
    pub max_messages: usize,
    /// 单次摘要输入的 token 上限
    pub chunk_size: usize,
    /// 相邻摘要窗口之间重叠的 token 数
    pub overlap: usize,
    pub default_top_k: usize,
    pub compression_mode: CompressionMode,
    /// TTL 清扫周期（秒）
    pub sweep_interval_secs: u64,
    /// 配置后压缩结果会连同向量一起持久化
    pub embedding_model_id: Option<String>,
    /// 有效分数低于该值的长期记忆会被遗忘
    pub forget_floor: f64,
    pub forget_half_life_hours: f64,
    /// 后台遗忘周期（秒），不设置则只能手动触发
    pub forget_interval_secs: Option<u64>,
    /// 摘要未给出重要度时的基准分
    pub default_importance: f64,
    /// 持久化失败后的额外重试次数
    pub persist_retries: u32,
    pub event_queue_capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_namespaces: 1000,
            ttl_minutes: 120,
            default_window_tokens: 8192,
            compress_threshold_ratio: 0.85,
            compress_target_ratio: 0.5,
            max_messages: 200,
            chunk_size: 1000,
            overlap: 100,
            default_top_k: 5,
            compression_mode: CompressionMode::Inline,
            sweep_interval_secs: 60,
            embedding_model_id: None,
            forget_floor: 0.1,
            forget_half_life_hours: 72.0,
            forget_interval_secs: None,
            default_importance: 0.5,
            persist_retries: 1,
            event_queue_capacity: 256,
        }
    }
}

impl MemoryConfig {
    /// 从 YAML 文件加载，叠加环境变量覆盖后校验
    pub fn load(path: &str) -> Result<Self> {
        let file =
            std::fs::File::open(path).map_err(|_| ConfigError::FileNotFound(path.to_string()))?;
        let mut config: MemoryConfig = serde_yaml::from_reader(file)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// 默认配置 + 环境变量覆盖
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        dotenv().ok();
        self.apply_overrides(std::env::vars())
    }

    /// 应用 `ECHO_MEMORY_*` 形式的覆盖项，忽略其他前缀
    pub fn apply_overrides(
        &mut self,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<()> {
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.trim();
            match suffix {
                "MAX_NAMESPACES" => self.max_namespaces = parse_env(&key, value)?,
                "TTL_MINUTES" => self.ttl_minutes = parse_env(&key, value)?,
                "WINDOW_TOKENS" => self.default_window_tokens = parse_env(&key, value)?,
                "COMPRESS_THRESHOLD_RATIO" => {
                    self.compress_threshold_ratio = parse_env(&key, value)?
                }
                "COMPRESS_TARGET_RATIO" => self.compress_target_ratio = parse_env(&key, value)?,
                "MAX_MESSAGES" => self.max_messages = parse_env(&key, value)?,
                "CHUNK_SIZE" => self.chunk_size = parse_env(&key, value)?,
                "OVERLAP" => self.overlap = parse_env(&key, value)?,
                "TOP_K" => self.default_top_k = parse_env(&key, value)?,
                "EMBEDDING_MODEL" => {
                    self.embedding_model_id = (!value.is_empty()).then(|| value.to_string())
                }
                "FORGET_FLOOR" => self.forget_floor = parse_env(&key, value)?,
                "FORGET_HALF_LIFE_HOURS" => self.forget_half_life_hours = parse_env(&key, value)?,
                "SWEEP_INTERVAL_SECS" => self.sweep_interval_secs = parse_env(&key, value)?,
                "FORGET_INTERVAL_SECS" => {
                    self.forget_interval_secs = Some(parse_env(&key, value)?)
                }
                "COMPRESSION_MODE" => {
                    self.compression_mode = match value.to_lowercase().as_str() {
                        "inline" => CompressionMode::Inline,
                        "background" => CompressionMode::Background,
                        _ => return Err(ConfigError::EnvFormatError(key.clone()).into()),
                    }
                }
                _ => return Err(ConfigError::EnvFormatError(key.clone()).into()),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_namespaces == 0 {
            return Err(invalid("max_namespaces", "must be at least 1"));
        }
        if !(1..=MAX_TTL_MINUTES).contains(&self.ttl_minutes) {
            return Err(invalid("ttl_minutes", "must be between 1 and 525600 (one year)"));
        }
        if self.default_window_tokens == 0 {
            return Err(invalid("default_window_tokens", "must be positive"));
        }
        if !in_unit_interval(self.compress_threshold_ratio) {
            return Err(invalid("compress_threshold_ratio", "must be in (0, 1]"));
        }
        if !in_unit_interval(self.compress_target_ratio) {
            return Err(invalid("compress_target_ratio", "must be in (0, 1]"));
        }
        if self.compress_target_ratio > self.compress_threshold_ratio {
            return Err(invalid(
                "compress_target_ratio",
                "must not exceed compress_threshold_ratio",
            ));
        }
        if self.max_messages == 0 {
            return Err(invalid("max_messages", "must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be positive"));
        }
        if self.overlap >= self.chunk_size {
            return Err(invalid("overlap", "must be smaller than chunk_size"));
        }
        if self.default_top_k == 0 {
            return Err(invalid("default_top_k", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.forget_floor) {
            return Err(invalid("forget_floor", "must be in [0, 1]"));
        }
        if !(self.forget_half_life_hours > 0.0
            && self.forget_half_life_hours <= MAX_HALF_LIFE_HOURS)
        {
            return Err(invalid(
                "forget_half_life_hours",
                "must be in (0, 876000] (one hundred years)",
            ));
        }
        if !(1..=MAX_INTERVAL_SECS).contains(&self.sweep_interval_secs) {
            return Err(invalid("sweep_interval_secs", "must be between 1 and 2592000 (30 days)"));
        }
        if let Some(secs) = self.forget_interval_secs
            && !(1..=MAX_INTERVAL_SECS).contains(&secs)
        {
            return Err(invalid("forget_interval_secs", "must be between 1 and 2592000 (30 days)"));
        }
        if !(0.0..=1.0).contains(&self.default_importance) {
            return Err(invalid("default_importance", "must be in [0, 1]"));
        }
        if self.event_queue_capacity == 0 {
            return Err(invalid("event_queue_capacity", "must be at least 1"));
        }
        Ok(())
    }

    /// 触发压缩的 token 阈值
    pub fn compress_threshold_tokens(&self) -> f64 {
        self.default_window_tokens as f64 * self.compress_threshold_ratio
    }

    /// 压缩后回落的 token 水位
    pub fn compress_target_tokens(&self) -> f64 {
        self.default_window_tokens as f64 * self.compress_target_ratio
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn forget_half_life(&self) -> Duration {
        Duration::from_secs_f64(self.forget_half_life_hours * 3600.0)
    }
}

const MAX_TTL_MINUTES: u64 = 365 * 24 * 60;
const MAX_HALF_LIFE_HOURS: f64 = 100.0 * 365.0 * 24.0;
const MAX_INTERVAL_SECS: u64 = 30 * 24 * 3600;

fn in_unit_interval(v: f64) -> bool {
    v.is_finite() && v > 0.0 && v <= 1.0
}

fn invalid(field: &str, message: &str) -> crate::error::MemoryError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| ConfigError::EnvFormatError(key.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = MemoryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_namespaces, 1000);
        assert_eq!(config.ttl_minutes, 120);
        assert_eq!(config.default_window_tokens, 8192);
        assert_eq!(config.max_messages, 200);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.overlap, 100);
        assert_eq!(config.default_top_k, 5);
        assert!((config.compress_threshold_tokens() - 8192.0 * 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_positive_window() {
        let config = MemoryConfig {
            default_window_tokens: 0,
            ..MemoryConfig::default()
        };
        match config.validate() {
            Err(MemoryError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "default_window_tokens")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_target_above_threshold() {
        let config = MemoryConfig {
            compress_threshold_ratio: 0.6,
            compress_target_ratio: 0.7,
            ..MemoryConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_ratio_out_of_range() {
        for ratio in [0.0, -0.5, 1.5, f64::NAN] {
            let config = MemoryConfig {
                compress_threshold_ratio: ratio,
                ..MemoryConfig::default()
            };
            assert!(config.validate().is_err(), "ratio {ratio} accepted");
        }
    }

    #[test]
    fn test_rejects_durations_out_of_range() {
        let cases = [
            (
                "ttl_minutes",
                MemoryConfig {
                    ttl_minutes: u64::MAX,
                    ..MemoryConfig::default()
                },
            ),
            (
                "forget_half_life_hours",
                MemoryConfig {
                    forget_half_life_hours: 1e300,
                    ..MemoryConfig::default()
                },
            ),
            (
                "forget_half_life_hours",
                MemoryConfig {
                    forget_half_life_hours: f64::INFINITY,
                    ..MemoryConfig::default()
                },
            ),
            (
                "sweep_interval_secs",
                MemoryConfig {
                    sweep_interval_secs: u64::MAX,
                    ..MemoryConfig::default()
                },
            ),
            (
                "forget_interval_secs",
                MemoryConfig {
                    forget_interval_secs: Some(u64::MAX),
                    ..MemoryConfig::default()
                },
            ),
        ];
        for (expected, config) in cases {
            match config.validate() {
                Err(MemoryError::Config(ConfigError::InvalidValue { field, .. })) => {
                    assert_eq!(field, expected)
                }
                other => panic!("{expected}: unexpected {:?}", other),
            }
        }

        let longest = MemoryConfig {
            ttl_minutes: MAX_TTL_MINUTES,
            forget_half_life_hours: MAX_HALF_LIFE_HOURS,
            ..MemoryConfig::default()
        };
        assert!(longest.validate().is_ok());
        assert_eq!(longest.ttl(), Duration::from_secs(MAX_TTL_MINUTES * 60));
        assert!(longest.forget_half_life() > Duration::ZERO);
    }

    #[test]
    fn test_overrides_apply() {
        let mut config = MemoryConfig::default();
        config
            .apply_overrides(vars(&[
                ("ECHO_MEMORY_WINDOW_TOKENS", "4096"),
                ("ECHO_MEMORY_EMBEDDING_MODEL", "hash-64"),
                ("ECHO_MEMORY_COMPRESSION_MODE", "background"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.default_window_tokens, 4096);
        assert_eq!(config.embedding_model_id.as_deref(), Some("hash-64"));
        assert_eq!(config.compression_mode, CompressionMode::Background);
    }

    #[test]
    fn test_overrides_reject_unknown_and_malformed() {
        let mut config = MemoryConfig::default();
        assert!(
            config
                .apply_overrides(vars(&[("ECHO_MEMORY_BOGUS", "1")]))
                .is_err()
        );
        assert!(
            config
                .apply_overrides(vars(&[("ECHO_MEMORY_MAX_MESSAGES", "many")]))
                .is_err()
        );
    }

    #[test]
    fn test_yaml_partial_uses_defaults() {
        let config: MemoryConfig =
            serde_yaml::from_str("default_window_tokens: 100\nmax_messages: 5\n").unwrap();
        assert_eq!(config.default_window_tokens, 100);
        assert_eq!(config.max_messages, 5);
        assert_eq!(config.max_namespaces, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        match MemoryConfig::load("/nonexistent/echo-memory.yaml") {
            Err(MemoryError::Config(ConfigError::FileNotFound(_))) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }
}
