pub mod revert;
pub mod storage_pool_service;
pub mod storage_volume_service;
pub mod usage_service;

use common::{ConfigMap, Error};
use validator::ValidationErrors;

pub use storage_pool_service::StoragePoolService;
pub use storage_volume_service::StorageVolumeService;
pub use usage_service::UsageService;

pub(crate) fn validation_error(err: ValidationErrors) -> Error {
    Error::InvalidArgument(err.to_string())
}

/// PATCH 语义：合并到当前配置，空值表示删除该键
pub(crate) fn merge_config(mut current: ConfigMap, patch: ConfigMap) -> ConfigMap {
    for (key, value) in patch {
        if value.is_empty() {
            current.remove(&key);
        } else {
            current.insert(key, value);
        }
    }
    current
}
