/// 后端类型查找表
///
/// 后端类型字符串只在驱动初始化时解析一次，之后不再动态分派

use common::{ConfigMap, Error, Result, StoragePool};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::backends::{btrfs, ceph, dir, lvm, mock};
use crate::driver::{DriverSettings, StorageDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Dir,
    Btrfs,
    Lvm,
    Ceph,
    Mock,
}

pub const SUPPORTED_DRIVERS: [DriverKind; 5] = [
    DriverKind::Dir,
    DriverKind::Btrfs,
    DriverKind::Lvm,
    DriverKind::Ceph,
    DriverKind::Mock,
];

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Dir => "dir",
            DriverKind::Btrfs => "btrfs",
            DriverKind::Lvm => "lvm",
            DriverKind::Ceph => "ceph",
            DriverKind::Mock => "mock",
        }
    }

    /// 校验存储池配置（包括后端自己的命名规则）
    pub fn validate_pool_config(&self, pool_name: &str, config: &ConfigMap) -> Result<()> {
        match self {
            DriverKind::Dir => dir::validate_pool_config(pool_name, config),
            DriverKind::Btrfs => btrfs::validate_pool_config(pool_name, config),
            DriverKind::Lvm => lvm::validate_pool_config(pool_name, config),
            DriverKind::Ceph => ceph::validate_pool_config(pool_name, config),
            DriverKind::Mock => mock::validate_pool_config(pool_name, config),
        }
    }

    /// 为未设置的存储池配置项填充默认值
    pub fn fill_pool_defaults(&self, pool_name: &str, config: &mut ConfigMap) -> Result<()> {
        match self {
            DriverKind::Dir => dir::fill_pool_defaults(pool_name, config),
            DriverKind::Btrfs => btrfs::fill_pool_defaults(pool_name, config),
            DriverKind::Lvm => lvm::fill_pool_defaults(pool_name, config),
            DriverKind::Ceph => ceph::fill_pool_defaults(pool_name, config),
            DriverKind::Mock => mock::fill_pool_defaults(pool_name, config),
        }
    }

    /// 以存储池当前配置为上下文校验存储卷配置
    pub fn validate_volume_config(&self, config: &ConfigMap, pool_config: &ConfigMap) -> Result<()> {
        match self {
            DriverKind::Dir => dir::validate_volume_config(config, pool_config),
            DriverKind::Btrfs => btrfs::validate_volume_config(config, pool_config),
            DriverKind::Lvm => lvm::validate_volume_config(config, pool_config),
            DriverKind::Ceph => ceph::validate_volume_config(config, pool_config),
            DriverKind::Mock => mock::validate_volume_config(config, pool_config),
        }
    }

    /// 存储卷默认值取自存储池的 `volume.*` 配置
    pub fn fill_volume_defaults(&self, config: &mut ConfigMap, pool_config: &ConfigMap) -> Result<()> {
        match self {
            DriverKind::Dir => dir::fill_volume_defaults(config, pool_config),
            DriverKind::Btrfs => btrfs::fill_volume_defaults(config, pool_config),
            DriverKind::Lvm => lvm::fill_volume_defaults(config, pool_config),
            DriverKind::Ceph => ceph::fill_volume_defaults(config, pool_config),
            DriverKind::Mock => mock::fill_volume_defaults(config, pool_config),
        }
    }

    /// 构造绑定到指定存储池的驱动实例
    pub fn build(&self, pool: &StoragePool, settings: &DriverSettings) -> Arc<dyn StorageDriver> {
        match self {
            DriverKind::Dir => Arc::new(dir::DirDriver::new(pool, settings.clone())),
            DriverKind::Btrfs => Arc::new(btrfs::BtrfsDriver::new(pool, settings.clone())),
            DriverKind::Lvm => Arc::new(lvm::LvmDriver::new(pool, settings.clone())),
            DriverKind::Ceph => Arc::new(ceph::CephDriver::new(pool)),
            DriverKind::Mock => Arc::new(mock::MockDriver::new(pool)),
        }
    }
}

impl FromStr for DriverKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SUPPORTED_DRIVERS
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::InvalidArgument(format!("不支持的存储驱动: {}", s)))
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_exact_match() {
        for kind in SUPPORTED_DRIVERS {
            assert_eq!(kind.as_str().parse::<DriverKind>().unwrap(), kind);
        }
        assert!("DIR".parse::<DriverKind>().is_err());
        assert!("zfs".parse::<DriverKind>().is_err());
        assert!("".parse::<DriverKind>().is_err());
    }

    #[test]
    fn test_build_binds_pool() {
        let pool = StoragePool {
            id: 7,
            name: "p1".to_string(),
            driver: "mock".to_string(),
            config: ConfigMap::new(),
        };
        let driver = DriverKind::Mock.build(&pool, &DriverSettings::new("/tmp"));
        assert_eq!(driver.kind(), DriverKind::Mock);
        assert_eq!(driver.pool_name(), "p1");
        assert_eq!(driver.state().pool_id(), 7);
    }
}
