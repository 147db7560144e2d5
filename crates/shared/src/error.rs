//! 统一错误处理模块
//!
//! 定义与具体业务无关的基础设施错误（配置、序列化、可观测性初始化等），
//! 业务 crate 通过 `#[from]` 透传，避免为每个组件重复声明。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum SharedError {
    // ==================== 配置错误 ====================
    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    #[error("无效的配置项: {field} - {message}")]
    InvalidConfig { field: String, message: String },

    // ==================== 序列化错误 ====================
    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
