/// 目录存储驱动
///
/// 存储池是宿主机上的一个目录，存储卷是其中的子目录：
/// `<source>/{containers,images,custom}/<name>`

use async_trait::async_trait;
use common::models::{StoragePoolWritable, StorageVolumeWritable, SUPPORTED_VOLUME_TYPES};
use common::{ConfigMap, Error, Result, StoragePool, VolumeType};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::config::{check_updatable, is_absolute_path, validate_config, KeyRules};
use crate::driver::{DriverSettings, DriverState, StorageDriver};
use crate::kind::DriverKind;

const POOL_RULES: KeyRules = &[("source", is_absolute_path)];

const VOLUME_RULES: KeyRules = &[];

pub fn validate_pool_config(_pool_name: &str, config: &ConfigMap) -> Result<()> {
    validate_config(config, "dir 存储池", POOL_RULES)
}

/// `source` 留空时在创建阶段落到 `<root>/storage-pools/<pool>`
pub fn fill_pool_defaults(_pool_name: &str, _config: &mut ConfigMap) -> Result<()> {
    Ok(())
}

pub fn validate_volume_config(config: &ConfigMap, _pool_config: &ConfigMap) -> Result<()> {
    validate_config(config, "dir 存储卷", VOLUME_RULES)
}

pub fn fill_volume_defaults(_config: &mut ConfigMap, _pool_config: &ConfigMap) -> Result<()> {
    Ok(())
}

/// 目录存储驱动
pub struct DirDriver {
    state: DriverState,
    settings: DriverSettings,
}

impl DirDriver {
    pub fn new(pool: &StoragePool, settings: DriverSettings) -> Self {
        Self {
            state: DriverState::new(pool),
            settings,
        }
    }

    /// 存储池根目录
    async fn pool_path(&self) -> PathBuf {
        match self.state.pool_config("source").await {
            Some(source) => PathBuf::from(source),
            None => self.settings.pool_mount_path(self.state.pool_name()),
        }
    }

    fn volume_path(pool_path: &Path, name: &str, volume_type: VolumeType) -> PathBuf {
        pool_path.join(volume_type.api_endpoint()).join(name)
    }

    async fn is_empty_dir(path: &Path) -> Result<bool> {
        let mut entries = fs::read_dir(path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to read directory {}: {}", path.display(), e)))?;
        let first = entries
            .next_entry()
            .await
            .map_err(|e| Error::Storage(format!("Failed to read directory {}: {}", path.display(), e)))?;
        Ok(first.is_none())
    }
}

#[async_trait]
impl StorageDriver for DirDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Dir
    }

    fn state(&self) -> &DriverState {
        &self.state
    }

    async fn create_pool(&self) -> Result<()> {
        let pool_path = self.pool_path().await;
        info!("Creating dir storage pool {} at {}", self.state.pool_name(), pool_path.display());

        if pool_path.exists() {
            if !pool_path.is_dir() {
                return Err(Error::Storage(format!("{} 不是目录", pool_path.display())));
            }
            if !Self::is_empty_dir(&pool_path).await? {
                return Err(Error::Storage(format!("目录 {} 非空", pool_path.display())));
            }
        }

        create_volume_dirs(&pool_path).await?;

        if self.state.pool_config("source").await.is_none() {
            self.state
                .set_pool_config("source", pool_path.to_string_lossy())
                .await;
        }

        Ok(())
    }

    async fn delete_pool(&self) -> Result<()> {
        let pool_path = self.pool_path().await;
        info!("Deleting dir storage pool {} at {}", self.state.pool_name(), pool_path.display());

        if pool_path.exists() {
            fs::remove_dir_all(&pool_path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to remove {}: {}", pool_path.display(), e)))?;
        }
        Ok(())
    }

    async fn update_pool(&self, _writable: &StoragePoolWritable, changed: &[String]) -> Result<()> {
        check_updatable(changed, &[], "dir 存储池")
    }

    async fn create_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        _writable: &StorageVolumeWritable,
    ) -> Result<()> {
        let path = Self::volume_path(&self.pool_path().await, name, volume_type);
        debug!("Creating dir volume at {}", path.display());

        if path.exists() {
            return Err(Error::Storage(format!("{} 已存在", path.display())));
        }
        fs::create_dir_all(&path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create directory {}: {}", path.display(), e)))
    }

    async fn delete_volume(&self, name: &str, volume_type: VolumeType) -> Result<()> {
        let path = Self::volume_path(&self.pool_path().await, name, volume_type);
        debug!("Deleting dir volume at {}", path.display());

        if path.exists() {
            fs::remove_dir_all(&path)
                .await
                .map_err(|e| Error::Storage(format!("Failed to remove {}: {}", path.display(), e)))?;
        }
        Ok(())
    }

    async fn update_volume(
        &self,
        _name: &str,
        _volume_type: VolumeType,
        _writable: &StorageVolumeWritable,
        changed: &[String],
    ) -> Result<()> {
        check_updatable(changed, &[], "dir 存储卷")
    }
}

/// 供其他驱动复用：在挂载点下建立各类型存储卷的父目录
pub(crate) async fn create_volume_dirs(mount_path: &Path) -> Result<()> {
    for volume_type in SUPPORTED_VOLUME_TYPES {
        let dir = mount_path.join(volume_type.api_endpoint());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create directory {}: {}", dir.display(), e)))?;
    }
    Ok(())
}
