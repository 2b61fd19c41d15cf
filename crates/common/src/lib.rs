/// Easy Container Cloud - 公共库
///
/// 提供 Daemon 和存储驱动共享的类型、错误处理、工具函数等

pub mod errors;
pub mod models;
pub mod utils;

// 重新导出常用类型
pub use errors::{Error, Result};
pub use models::{ConfigMap, StoragePool, StorageVolume, VolumeType};
pub use utils::{config_diff, ConfigDiff};
