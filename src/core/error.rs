//! 编排器错误类型
//!
//! 只有上游服务失败与预算拒绝会穿过组件边界回到顶层响应；
//! 分类歧义、目录未命中、环境校验告警、精修降级都在检测到它们的组件内部消化。

use thiserror::Error;

/// 请求流水线中会冒泡到顶层的错误（HTTP 层统一映射为 500 + reasoning 字符串）
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// LLM 或生成服务不可达 / 5xx
    #[error("Upstream service failure: {0}")]
    Upstream(String),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 导出场景写入存储失败
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// 生成服务客户端错误（网络、API 状态码、响应解码）
#[derive(Error, Debug, Clone)]
pub enum GenerationError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl GenerationError {
    /// 可在下一次轮询中重试的瞬时错误（网络抖动、5xx、429）
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Network(_) => true,
            GenerationError::Api { status, .. } => *status >= 500 || *status == 429,
            GenerationError::Decode(_) => false,
        }
    }
}

/// submit 被同步拒绝的原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// 并发预算已满，调用方自行决定何时重试
    #[error("rate_limited: {in_flight} generation jobs already in flight")]
    RateLimited { in_flight: usize },
}

/// 目录文件加载错误
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 场景导出存储错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}
