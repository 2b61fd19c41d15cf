use thiserror::Error;

/// 统一错误类型
///
/// 变体与存储核心的错误分类一一对应：
/// 参数校验 -> InvalidArgument，冲突 -> AlreadyExists / InUse，
/// 未找到 -> NotFound，驱动失败 -> Storage，内部不变量被破坏 -> Consistency
#[derive(Error, Debug)]
pub enum Error {
    #[error("数据库错误: {0}")]
    Database(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源已存在: {0}")]
    AlreadyExists(String),

    #[error("资源正在使用中: {0}")]
    InUse(String),

    #[error("无效参数: {0}")]
    InvalidArgument(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("数据一致性错误: {0}")]
    Consistency(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// 在任何变更发生之前即可检测出的错误
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidArgument(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::AlreadyExists(_) | Error::InUse(_))
    }
}

/// 统一结果类型
pub type Result<T> = std::result::Result<T, Error>;
