/// 共享数据模型
///
/// 定义 Daemon 与存储驱动共享的数据结构

pub mod device;
pub mod volume_type;

pub use device::{Device, Devices};
pub use volume_type::{VolumeType, SUPPORTED_VOLUME_TYPES};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 存储池 / 存储卷配置（键值均为字符串，缺失的键等价于空值）
pub type ConfigMap = HashMap<String, String>;

/// 存储池
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePool {
    pub id: i32,
    pub name: String,
    /// 后端类型，创建后不可修改
    pub driver: String,
    pub config: ConfigMap,
}

/// 存储卷，由 (name, volume_type, pool_id) 唯一确定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolume {
    pub id: i32,
    pub name: String,
    pub volume_type: VolumeType,
    pub pool_id: i32,
    pub config: ConfigMap,
}

/// 存储池的可写部分
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePoolWritable {
    pub config: ConfigMap,
}

/// 存储卷的可写部分
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageVolumeWritable {
    pub config: ConfigMap,
}

/// 常量定义
pub mod constants {
    /// REST API 版本前缀
    pub const API_VERSION: &str = "1.0";

    /// 快照名分隔符：`<container>/<snapshot>`
    pub const SNAPSHOT_DELIMITER: &str = "/";

    /// 调用方元数据前缀，驱动从不解释这些键
    pub const USER_CONFIG_PREFIX: &str = "user.";

    /// 默认 Daemon 端口
    pub const DEFAULT_SERVER_PORT: u16 = 3000;
}

/// 规范资源路径
pub mod paths {
    use super::constants::{API_VERSION, SNAPSHOT_DELIMITER};

    /// `/1.0/containers/<name>`，快照渲染为 `/1.0/containers/<base>/snapshots/<snap>`
    pub fn container(name: &str) -> String {
        match name.split_once(SNAPSHOT_DELIMITER) {
            Some((base, snapshot)) if !base.is_empty() => {
                format!("/{}/containers/{}/snapshots/{}", API_VERSION, base, snapshot)
            }
            _ => format!("/{}/containers/{}", API_VERSION, name),
        }
    }

    pub fn image(fingerprint: &str) -> String {
        format!("/{}/images/{}", API_VERSION, fingerprint)
    }

    pub fn profile(name: &str) -> String {
        format!("/{}/profiles/{}", API_VERSION, name)
    }

    pub fn storage_pool(name: &str) -> String {
        format!("/{}/storage-pools/{}", API_VERSION, name)
    }

    pub fn storage_volume(pool: &str, volume_type: &str, name: &str) -> String {
        format!("/{}/storage-pools/{}/volumes/{}/{}", API_VERSION, pool, volume_type, name)
    }
}

#[cfg(test)]
mod tests {
    use super::paths;

    #[test]
    fn test_container_path() {
        assert_eq!(paths::container("c1"), "/1.0/containers/c1");
        assert_eq!(paths::container("base/snap0"), "/1.0/containers/base/snapshots/snap0");
        // 只按第一个分隔符切分
        assert_eq!(paths::container("base/a/b"), "/1.0/containers/base/snapshots/a/b");
    }

    #[test]
    fn test_other_paths() {
        assert_eq!(paths::image("cedce20b"), "/1.0/images/cedce20b");
        assert_eq!(paths::profile("default"), "/1.0/profiles/default");
        assert_eq!(paths::storage_pool("p1"), "/1.0/storage-pools/p1");
        assert_eq!(
            paths::storage_volume("p1", "custom", "data"),
            "/1.0/storage-pools/p1/volumes/custom/data"
        );
    }
}
