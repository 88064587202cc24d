use std::fmt;

/// 记忆系统的统一错误类型
#[derive(Debug)]
pub enum MemoryError {
    /// 配置错误（启动期致命）
    Config(ConfigError),
    /// 缓冲区 / token 记账不一致（逻辑缺陷，致命）
    Invariant(InvariantViolation),
    /// 长期存储调用失败（可恢复）
    Persistence(PersistenceError),
    /// 摘要模型调用失败（可恢复，本次压缩放弃）
    Capability(CapabilityError),
    /// IO 错误
    Io(std::io::Error),
    /// 其他错误
    Other(String),
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),
    /// 配置解析失败
    ParseFailed(String),
    /// 配置值无效
    InvalidValue { field: String, message: String },
    /// 环境变量格式不正确
    EnvFormatError(String),
    /// 检索需要 embedding 模型，但未配置
    MissingEmbeddingModel,
}

/// 不变量被破坏
#[derive(Debug)]
pub enum InvariantViolation {
    /// 截断条数超过缓冲区长度
    TruncateBeyondLength { requested: usize, len: usize },
    /// 记录的 token 总数与实际消息之和不一致
    TokenAccountingDrift { recorded: f64, actual: f64 },
}

/// 长期存储错误
#[derive(Debug)]
pub enum PersistenceError {
    /// 文件读写失败
    Io(String),
    /// 序列化 / 反序列化失败
    Serialization(String),
    /// 未注册的 embedding 模型
    UnknownEmbeddingModel(String),
    /// embedding 计算失败
    Embedding(String),
    /// 后端返回的其他错误
    Backend(String),
}

/// 摘要能力（模型调用）错误
#[derive(Debug)]
pub enum CapabilityError {
    /// 网络请求失败
    NetworkError(String),
    /// 接口返回错误状态码
    ApiError { status: u16, message: String },
    /// 没有返回内容
    EmptyResponse,
    /// 摘要结果为空
    EmptySummary,
    /// 返回内容无法使用
    InvalidOutput(String),
}

impl MemoryError {
    /// 致命错误需要中止当前操作并向调用方报告
    pub fn is_fatal(&self) -> bool {
        matches!(self, MemoryError::Config(_) | MemoryError::Invariant(_))
    }
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::Config(e) => write!(f, "Config Error: {}", e),
            MemoryError::Invariant(e) => write!(f, "Invariant Violation: {}", e),
            MemoryError::Persistence(e) => write!(f, "Persistence Error: {}", e),
            MemoryError::Capability(e) => write!(f, "Capability Error: {}", e),
            MemoryError::Io(e) => write!(f, "IO Error: {}", e),
            MemoryError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseFailed(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, message } => {
                write!(f, "Invalid config value for '{}': {}", field, message)
            }
            ConfigError::EnvFormatError(key) => {
                write!(f, "Malformed environment variable: {}", key)
            }
            ConfigError::MissingEmbeddingModel => write!(f, "No embedding model configured"),
        }
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantViolation::TruncateBeyondLength { requested, len } => write!(
                f,
                "cannot truncate {} messages from a buffer of {}",
                requested, len
            ),
            InvariantViolation::TokenAccountingDrift { recorded, actual } => write!(
                f,
                "token total {} does not match buffer sum {}",
                recorded, actual
            ),
        }
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io(msg) => write!(f, "IO failure: {}", msg),
            PersistenceError::Serialization(msg) => write!(f, "Serialization failure: {}", msg),
            PersistenceError::UnknownEmbeddingModel(id) => {
                write!(f, "Unknown embedding model: {}", id)
            }
            PersistenceError::Embedding(msg) => write!(f, "Embedding failure: {}", msg),
            PersistenceError::Backend(msg) => write!(f, "Backend failure: {}", msg),
        }
    }
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            CapabilityError::ApiError { status, message } => {
                write!(f, "API error (status {}): {}", status, message)
            }
            CapabilityError::EmptyResponse => write!(f, "Empty response from model"),
            CapabilityError::EmptySummary => write!(f, "Summarizer produced no summary"),
            CapabilityError::InvalidOutput(msg) => write!(f, "Invalid model output: {}", msg),
        }
    }
}

impl std::error::Error for MemoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MemoryError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for InvariantViolation {}
impl std::error::Error for PersistenceError {}
impl std::error::Error for CapabilityError {}

// From 转换实现
impl From<std::io::Error> for MemoryError {
    fn from(err: std::io::Error) -> Self {
        MemoryError::Io(err)
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Persistence(PersistenceError::Serialization(err.to_string()))
    }
}

impl From<serde_yaml::Error> for MemoryError {
    fn from(err: serde_yaml::Error) -> Self {
        MemoryError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

impl From<ConfigError> for MemoryError {
    fn from(err: ConfigError) -> Self {
        MemoryError::Config(err)
    }
}

impl From<InvariantViolation> for MemoryError {
    fn from(err: InvariantViolation) -> Self {
        MemoryError::Invariant(err)
    }
}

impl From<PersistenceError> for MemoryError {
    fn from(err: PersistenceError) -> Self {
        MemoryError::Persistence(err)
    }
}

impl From<CapabilityError> for MemoryError {
    fn from(err: CapabilityError) -> Self {
        MemoryError::Capability(err)
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, MemoryError>;
