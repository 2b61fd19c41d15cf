/// 存储驱动抽象层
///
/// 定义统一的存储驱动接口，每种后端一个实现。
/// 驱动实例绑定到一个存储池，持有该池及其存储卷的可写配置快照

use async_trait::async_trait;
use common::models::{StoragePool, StoragePoolWritable, StorageVolume, StorageVolumeWritable};
use common::{Error, Result, VolumeType};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::kind::DriverKind;

/// 驱动运行参数
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// 宿主机数据根目录
    pub storage_root: PathBuf,
}

impl DriverSettings {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    /// 存储池默认挂载点：`<root>/storage-pools/<pool>`
    pub fn pool_mount_path(&self, pool_name: &str) -> PathBuf {
        self.storage_root.join("storage-pools").join(pool_name)
    }

    /// loop 镜像文件：`<root>/disks/<pool>.img`
    pub fn loop_file_path(&self, pool_name: &str) -> PathBuf {
        self.storage_root.join("disks").join(format!("{}.img", pool_name))
    }
}

type VolumeKey = (String, VolumeType);

/// 驱动实例的内存状态
///
/// 所有读取都返回拷贝，调用方拿到的基线不会被其他请求修改
pub struct DriverState {
    pool_id: i32,
    pool_name: String,
    pool: RwLock<StoragePoolWritable>,
    volumes: RwLock<HashMap<VolumeKey, StorageVolumeWritable>>,
}

impl DriverState {
    pub fn new(pool: &StoragePool) -> Self {
        Self {
            pool_id: pool.id,
            pool_name: pool.name.clone(),
            pool: RwLock::new(StoragePoolWritable {
                config: pool.config.clone(),
            }),
            volumes: RwLock::new(HashMap::new()),
        }
    }

    pub fn pool_id(&self) -> i32 {
        self.pool_id
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub async fn pool_writable(&self) -> StoragePoolWritable {
        self.pool.read().await.clone()
    }

    pub async fn set_pool_writable(&self, writable: StoragePoolWritable) {
        *self.pool.write().await = writable;
    }

    /// 读取存储池配置项，空值视为缺失
    pub async fn pool_config(&self, key: &str) -> Option<String> {
        self.pool
            .read()
            .await
            .config
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    /// 驱动在创建过程中改写自己的配置（例如补全生成的路径）
    pub async fn set_pool_config(&self, key: &str, value: impl Into<String>) {
        self.pool
            .write()
            .await
            .config
            .insert(key.to_string(), value.into());
    }

    pub async fn volume_writable(&self, name: &str, volume_type: VolumeType) -> Result<StorageVolumeWritable> {
        self.volumes
            .read()
            .await
            .get(&(name.to_string(), volume_type))
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "存储池 {} 中的 {} 存储卷 {}",
                    self.pool_name, volume_type, name
                ))
            })
    }

    pub async fn set_volume_writable(&self, name: &str, volume_type: VolumeType, writable: StorageVolumeWritable) {
        self.volumes
            .write()
            .await
            .insert((name.to_string(), volume_type), writable);
    }

    /// 仅在驱动尚未持有该卷时载入数据库中的配置
    pub async fn load_volume(&self, volume: &StorageVolume) {
        self.volumes
            .write()
            .await
            .entry((volume.name.clone(), volume.volume_type))
            .or_insert_with(|| StorageVolumeWritable {
                config: volume.config.clone(),
            });
    }

    pub async fn forget_volume(&self, name: &str, volume_type: VolumeType) {
        self.volumes
            .write()
            .await
            .remove(&(name.to_string(), volume_type));
    }
}

/// 存储驱动 Trait
///
/// `update_*` 收到的是新的可写配置和变化的键列表，
/// 由驱动逐键决定是否需要真正的后端操作；调用方负责把新配置写回驱动状态
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// 后端类型
    fn kind(&self) -> DriverKind;

    /// 驱动内存状态
    fn state(&self) -> &DriverState;

    /// 创建存储池（可能改写自身配置）
    async fn create_pool(&self) -> Result<()>;

    /// 删除存储池
    async fn delete_pool(&self) -> Result<()>;

    /// 更新存储池
    async fn update_pool(&self, writable: &StoragePoolWritable, changed: &[String]) -> Result<()>;

    /// 创建存储卷
    async fn create_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
    ) -> Result<()>;

    /// 删除存储卷
    async fn delete_volume(&self, name: &str, volume_type: VolumeType) -> Result<()>;

    /// 更新存储卷
    async fn update_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
        changed: &[String],
    ) -> Result<()>;

    fn pool_name(&self) -> &str {
        self.state().pool_name()
    }

    async fn pool_writable(&self) -> StoragePoolWritable {
        self.state().pool_writable().await
    }

    async fn set_pool_writable(&self, writable: StoragePoolWritable) {
        self.state().set_pool_writable(writable).await
    }

    async fn volume_writable(&self, name: &str, volume_type: VolumeType) -> Result<StorageVolumeWritable> {
        self.state().volume_writable(name, volume_type).await
    }

    async fn set_volume_writable(&self, name: &str, volume_type: VolumeType, writable: StorageVolumeWritable) {
        self.state().set_volume_writable(name, volume_type, writable).await
    }

    async fn load_volume(&self, volume: &StorageVolume) {
        self.state().load_volume(volume).await
    }

    async fn forget_volume(&self, name: &str, volume_type: VolumeType) {
        self.state().forget_volume(name, volume_type).await
    }
}
