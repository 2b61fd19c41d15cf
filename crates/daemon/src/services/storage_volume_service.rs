/// 存储卷管理服务
///
/// 只有自定义存储卷可以通过接口创建和删除，容器卷和镜像卷由各自的生命周期管理

use common::models::{StorageVolumeWritable, SUPPORTED_VOLUME_TYPES};
use common::utils::validate_storage_name;
use common::{config_diff, ConfigMap, Error, Result, StoragePool, StorageVolume, VolumeType};
use ::storage::{DriverKind, StorageDriver};
use std::sync::Arc;
use tracing::{debug, info};
use validator::Validate;

use crate::app_state::AppState;
use crate::db::models::storage_volume::{
    CreateStorageVolumeDto, StorageVolumeListResponse, StorageVolumeResponse,
};
use crate::db::storage;
use crate::services::revert::Reverter;
use crate::services::usage_service::UsageService;
use crate::services::{merge_config, validation_error};

pub struct StorageVolumeService {
    state: AppState,
}

fn require_custom(volume_type: VolumeType) -> Result<()> {
    if volume_type != VolumeType::Custom {
        return Err(Error::InvalidArgument(format!(
            "只能操作自定义存储卷，不支持 {} 类型",
            volume_type
        )));
    }
    Ok(())
}

impl StorageVolumeService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    async fn pool_and_driver(&self, pool_name: &str) -> Result<(StoragePool, Arc<dyn StorageDriver>)> {
        let pool = storage::pool_get(&self.state.sea_db, pool_name).await?;
        let driver = self.state.storage.get_or_init(&pool).await?;
        Ok((pool, driver))
    }

    /// 创建自定义存储卷
    pub async fn create(&self, pool_name: &str, dto: CreateStorageVolumeDto) -> Result<StorageVolumeResponse> {
        dto.validate().map_err(validation_error)?;
        validate_storage_name(&dto.name)?;
        let volume_type: VolumeType = dto.volume_type.parse()?;
        require_custom(volume_type)?;

        let (pool, driver) = self.pool_and_driver(pool_name).await?;
        let kind: DriverKind = pool.driver.parse()?;

        match storage::volume_get_type_id(&self.state.sea_db, &dto.name, volume_type, pool.id).await {
            Ok(_) => {
                return Err(Error::AlreadyExists(format!(
                    "存储池 {} 中的 {} 存储卷 {}",
                    pool_name, volume_type, dto.name
                )))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        // 默认值取自存储池当前的配置
        let pool_config = driver.pool_writable().await.config;
        let mut config = dto.config;
        kind.validate_volume_config(&config, &pool_config)?;
        kind.fill_volume_defaults(&mut config, &pool_config)?;

        let mut revert = Reverter::new();
        match self
            .create_steps(&pool, driver, &dto.name, volume_type, config, &mut revert)
            .await
        {
            Ok(()) => revert.success(),
            Err(e) => {
                revert.fail().await;
                return Err(e);
            }
        }

        info!("存储卷 {}/{}/{} 创建成功", pool_name, volume_type, dto.name);
        self.get(pool_name, volume_type.as_str(), &dto.name).await
    }

    async fn create_steps(
        &self,
        pool: &StoragePool,
        driver: Arc<dyn StorageDriver>,
        name: &str,
        volume_type: VolumeType,
        config: ConfigMap,
        revert: &mut Reverter,
    ) -> Result<()> {
        let db = self.state.sea_db();

        let volume_id = match storage::volume_create(&db, name, volume_type, pool.id, &config).await {
            Ok(id) => id,
            Err(e) => {
                // 查询之后存储池已被删除，不留下为它注册的驱动实例
                if e.is_not_found() {
                    self.state.storage.remove_stale(pool).await;
                }
                return Err(e);
            }
        };
        {
            let db = db.clone();
            revert.add(format!("删除存储卷记录 {}", name), async move {
                storage::volume_delete(&db, volume_id).await
            });
        }

        let writable = StorageVolumeWritable { config };
        driver.create_volume(name, volume_type, &writable).await?;
        driver.set_volume_writable(name, volume_type, writable).await;
        Ok(())
    }

    /// 获取单个存储卷
    pub async fn get(&self, pool_name: &str, type_name: &str, name: &str) -> Result<StorageVolumeResponse> {
        let volume_type: VolumeType = type_name.parse()?;
        let pool_id = storage::pool_get_id(&self.state.sea_db, pool_name).await?;
        let volume = storage::volume_get(&self.state.sea_db, name, volume_type, pool_id).await?;
        self.response(volume).await
    }

    async fn response(&self, volume: StorageVolume) -> Result<StorageVolumeResponse> {
        let used_by = UsageService::new(self.state.clone())
            .volume_used_by(&volume.name, volume.volume_type)
            .await?;

        Ok(StorageVolumeResponse {
            name: volume.name,
            volume_type: volume.volume_type.as_str().to_string(),
            config: volume.config,
            used_by,
        })
    }

    /// 列出存储池中的存储卷，可按类型过滤
    pub async fn list(&self, pool_name: &str, type_name: Option<&str>) -> Result<StorageVolumeListResponse> {
        let types = match type_name {
            Some(name) => vec![name.parse::<VolumeType>()?],
            None => SUPPORTED_VOLUME_TYPES.to_vec(),
        };
        let pool_id = storage::pool_get_id(&self.state.sea_db, pool_name).await?;

        let mut volumes = Vec::new();
        for volume in storage::pool_volumes_get(&self.state.sea_db, pool_id, &types).await? {
            volumes.push(self.response(volume).await?);
        }

        Ok(StorageVolumeListResponse {
            total: volumes.len(),
            volumes,
        })
    }

    /// 用新配置整体替换存储卷配置
    pub async fn update(
        &self,
        pool_name: &str,
        type_name: &str,
        name: &str,
        config: ConfigMap,
    ) -> Result<StorageVolumeResponse> {
        let volume_type: VolumeType = type_name.parse()?;
        let (pool, driver) = self.pool_and_driver(pool_name).await?;
        let volume = storage::volume_get(&self.state.sea_db, name, volume_type, pool.id).await?;
        driver.load_volume(&volume).await;

        self.update_with_driver(&pool, driver, &volume, config).await?;
        self.get(pool_name, type_name, name).await
    }

    /// 合并到当前配置，空值表示删除该键
    pub async fn patch(
        &self,
        pool_name: &str,
        type_name: &str,
        name: &str,
        patch: ConfigMap,
    ) -> Result<StorageVolumeResponse> {
        let volume_type: VolumeType = type_name.parse()?;
        let (pool, driver) = self.pool_and_driver(pool_name).await?;
        let volume = storage::volume_get(&self.state.sea_db, name, volume_type, pool.id).await?;
        driver.load_volume(&volume).await;

        let current = driver.volume_writable(name, volume_type).await?;
        let config = merge_config(current.config, patch);
        self.update_with_driver(&pool, driver, &volume, config).await?;
        self.get(pool_name, type_name, name).await
    }

    async fn update_with_driver(
        &self,
        pool: &StoragePool,
        driver: Arc<dyn StorageDriver>,
        volume: &StorageVolume,
        config: ConfigMap,
    ) -> Result<()> {
        let kind: DriverKind = pool.driver.parse()?;
        let (name, volume_type) = (volume.name.as_str(), volume.volume_type);

        let baseline = driver.volume_writable(name, volume_type).await?;
        let diff = config_diff(&baseline.config, &config);
        if diff.is_empty() {
            debug!("存储卷 {}/{}/{} 配置无变化", pool.name, volume_type, name);
            return Ok(());
        }

        let pool_config = driver.pool_writable().await.config;
        kind.validate_volume_config(&config, &pool_config)?;

        let mut revert = Reverter::new();
        {
            let driver = driver.clone();
            let name = name.to_string();
            revert.add(format!("恢复存储卷 {} 的驱动配置", name), async move {
                driver.set_volume_writable(&name, volume_type, baseline).await;
                Ok(())
            });
        }

        let writable = StorageVolumeWritable { config };
        let result = async {
            if !diff.user_only {
                driver
                    .update_volume(name, volume_type, &writable, &diff.changed)
                    .await?;
            }
            driver.set_volume_writable(name, volume_type, writable.clone()).await;
            storage::volume_update(&self.state.sea_db, volume.id, &writable.config).await
        }
        .await;

        match result {
            Ok(()) => {
                revert.success();
                info!("存储卷 {}/{}/{} 已更新: {:?}", pool.name, volume_type, name, diff.changed);
                Ok(())
            }
            Err(e) => {
                revert.fail().await;
                Err(e)
            }
        }
    }

    /// 删除自定义存储卷
    pub async fn delete(&self, pool_name: &str, type_name: &str, name: &str) -> Result<()> {
        let volume_type: VolumeType = type_name.parse()?;
        require_custom(volume_type)?;

        let (pool, driver) = self.pool_and_driver(pool_name).await?;
        let volume = storage::volume_get(&self.state.sea_db, name, volume_type, pool.id).await?;

        let used_by = UsageService::new(self.state.clone())
            .volume_used_by(name, volume_type)
            .await?;
        if !used_by.is_empty() {
            return Err(Error::InUse(format!(
                "存储卷 {} 正在被使用: {}",
                name,
                used_by.join(", ")
            )));
        }

        driver.load_volume(&volume).await;
        driver.delete_volume(name, volume_type).await?;
        storage::volume_delete(&self.state.sea_db, volume.id).await?;
        driver.forget_volume(name, volume_type).await;

        info!("存储卷 {}/{}/{} 已删除", pool_name, volume_type, name);
        Ok(())
    }
}
