/// 存储池管理服务
///
/// 创建和更新都分成两段：外层负责回滚栈的提交或回滚，
/// 内层按步骤执行并把每个副作用的撤销操作压栈

use common::models::StoragePoolWritable;
use common::utils::validate_storage_name;
use common::{config_diff, ConfigMap, Error, Result, StoragePool};
use std::sync::Arc;
use ::storage::{DriverKind, StorageDriver};
use tracing::{debug, info};
use validator::Validate;

use crate::app_state::AppState;
use crate::db::models::storage_pool::{
    CreateStoragePoolDto, StoragePoolListResponse, StoragePoolResponse,
};
use crate::db::storage;
use crate::services::revert::Reverter;
use crate::services::usage_service::UsageService;
use crate::services::{merge_config, validation_error};

/// 不允许通过更新修改的键
const DRIVER_KEY: &str = "driver";

pub struct StoragePoolService {
    state: AppState,
}

impl StoragePoolService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 创建存储池
    pub async fn create(&self, dto: CreateStoragePoolDto) -> Result<StoragePoolResponse> {
        dto.validate().map_err(validation_error)?;
        validate_storage_name(&dto.name)?;
        let kind: DriverKind = dto.driver.parse()?;

        let db = self.state.sea_db();
        match storage::pool_get_id(&db, &dto.name).await {
            Ok(_) => return Err(Error::AlreadyExists(format!("存储池 {}", dto.name))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let mut config = dto.config;
        kind.validate_pool_config(&dto.name, &config)?;
        kind.fill_pool_defaults(&dto.name, &mut config)?;

        let mut revert = Reverter::new();
        match self.create_steps(&dto.name, kind, config, &mut revert).await {
            Ok(()) => revert.success(),
            Err(e) => {
                revert.fail().await;
                return Err(e);
            }
        }

        info!("存储池 {} 创建成功 (driver: {})", dto.name, kind);
        self.get(&dto.name).await
    }

    async fn create_steps(
        &self,
        name: &str,
        kind: DriverKind,
        config: ConfigMap,
        revert: &mut Reverter,
    ) -> Result<()> {
        let db = self.state.sea_db();

        let pool_id = storage::pool_create(&db, name, kind.as_str(), &config).await?;
        {
            let db = db.clone();
            revert.add(format!("删除存储池记录 {}", name), async move {
                storage::pool_delete(&db, pool_id).await
            });
        }

        let pool = StoragePool {
            id: pool_id,
            name: name.to_string(),
            driver: kind.as_str().to_string(),
            config: config.clone(),
        };
        let driver = self.state.storage.init_pool(&pool).await?;
        {
            let manager = self.state.storage();
            let name = name.to_string();
            revert.add(format!("注销存储池驱动 {}", name), async move {
                manager.remove_pool(&name).await;
                Ok(())
            });
        }

        driver.create_pool().await?;
        {
            let driver = driver.clone();
            revert.add(format!("删除后端存储池 {}", name), async move { driver.delete_pool().await });
        }

        // 驱动可能在创建时改写了配置（例如补全 source）
        let created = driver.pool_writable().await;
        let diff = config_diff(&config, &created.config);
        if !diff.is_empty() {
            debug!("存储池 {} 创建后配置变化: {:?}", name, diff.changed);
            kind.validate_pool_config(name, &created.config)?;
            storage::pool_update(&db, pool_id, &created.config).await?;
        }

        Ok(())
    }

    /// 获取单个存储池
    pub async fn get(&self, name: &str) -> Result<StoragePoolResponse> {
        let pool = storage::pool_get(&self.state.sea_db, name).await?;
        let used_by = UsageService::new(self.state.clone())
            .pool_used_by(pool.id, &pool.name)
            .await?;

        Ok(StoragePoolResponse {
            name: pool.name,
            driver: pool.driver,
            config: pool.config,
            used_by,
        })
    }

    /// 获取存储池列表（按名称排序）
    pub async fn list(&self) -> Result<StoragePoolListResponse> {
        let names = storage::pool_names(&self.state.sea_db).await?;
        let mut pools = Vec::with_capacity(names.len());
        for name in names {
            pools.push(self.get(&name).await?);
        }

        Ok(StoragePoolListResponse {
            total: pools.len(),
            pools,
        })
    }

    /// 用新配置整体替换存储池配置
    pub async fn update(&self, name: &str, config: ConfigMap) -> Result<StoragePoolResponse> {
        let pool = storage::pool_get(&self.state.sea_db, name).await?;
        let driver = self.state.storage.get_or_init(&pool).await?;
        self.update_with_driver(&pool, driver, config).await?;
        self.get(name).await
    }

    /// 合并到当前配置，空值表示删除该键
    pub async fn patch(&self, name: &str, patch: ConfigMap) -> Result<StoragePoolResponse> {
        let pool = storage::pool_get(&self.state.sea_db, name).await?;
        let driver = self.state.storage.get_or_init(&pool).await?;
        let config = merge_config(driver.pool_writable().await.config, patch);
        self.update_with_driver(&pool, driver, config).await?;
        self.get(name).await
    }

    async fn update_with_driver(
        &self,
        pool: &StoragePool,
        driver: Arc<dyn StorageDriver>,
        config: ConfigMap,
    ) -> Result<()> {
        let kind: DriverKind = pool.driver.parse()?;

        // 基线是拷贝，后续修改驱动状态不影响它
        let baseline = driver.pool_writable().await;
        let diff = config_diff(&baseline.config, &config);
        if diff.is_empty() {
            debug!("存储池 {} 配置无变化", pool.name);
            return Ok(());
        }

        if diff.contains(DRIVER_KEY) {
            return Err(Error::InvalidArgument(format!(
                "存储池 {} 的 driver 不能修改",
                pool.name
            )));
        }
        kind.validate_pool_config(&pool.name, &config)?;

        let mut revert = Reverter::new();
        {
            let driver = driver.clone();
            revert.add(format!("恢复存储池 {} 的驱动配置", pool.name), async move {
                driver.set_pool_writable(baseline).await;
                Ok(())
            });
        }

        let writable = StoragePoolWritable { config };
        let result = async {
            if !diff.user_only {
                driver.update_pool(&writable, &diff.changed).await?;
            }
            driver.set_pool_writable(writable.clone()).await;
            storage::pool_update(&self.state.sea_db, pool.id, &writable.config).await
        }
        .await;

        match result {
            Ok(()) => {
                revert.success();
                info!("存储池 {} 已更新: {:?}", pool.name, diff.changed);
                Ok(())
            }
            Err(e) => {
                revert.fail().await;
                Err(e)
            }
        }
    }

    /// 删除存储池
    pub async fn delete(&self, name: &str) -> Result<()> {
        let db = self.state.sea_db();
        let pool = storage::pool_get(&db, name).await?;

        let used_by = UsageService::new(self.state.clone())
            .pool_used_by(pool.id, name)
            .await?;
        if !used_by.is_empty() {
            return Err(Error::InUse(format!(
                "存储池 {} 正在被使用: {}",
                name,
                used_by.join(", ")
            )));
        }

        let volumes = storage::pool_volume_count(&db, pool.id).await?;
        if volumes > 0 {
            return Err(Error::InUse(format!("存储池 {} 下还有 {} 个存储卷", name, volumes)));
        }

        let driver = self.state.storage.get_or_init(&pool).await?;
        driver.delete_pool().await?;
        storage::pool_delete(&db, pool.id).await?;
        self.state.storage.remove_pool(name).await;

        info!("存储池 {} 已删除", name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::containers;
    use common::models::{Device, Devices};
    use ::storage::backends::mock;

    fn config(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn create_dto(name: &str, pairs: &[(&str, &str)]) -> CreateStoragePoolDto {
        CreateStoragePoolDto {
            name: name.to_string(),
            driver: "mock".to_string(),
            config: config(pairs),
        }
    }

    #[tokio::test]
    async fn test_create_fills_defaults() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());

        let pool = service
            .create(create_dto("svc-create", &[("user.owner", "ops")]))
            .await
            .unwrap();

        assert_eq!(pool.driver, "mock");
        assert_eq!(
            pool.config,
            config(&[
                ("user.owner", "ops"),
                ("volume.size", mock::DEFAULT_VOLUME_SIZE),
                ("source", "mock://svc-create"),
            ])
        );
        assert!(pool.used_by.is_empty());
        assert!(state.storage.is_pool_registered("svc-create").await);
        assert_eq!(mock::recorded_calls("svc-create"), vec!["create_pool"]);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());

        assert!(service.create(create_dto("", &[])).await.unwrap_err().is_validation());
        assert!(service.create(create_dto("a/b", &[])).await.unwrap_err().is_validation());

        let mut dto = create_dto("svc-zfs", &[]);
        dto.driver = "zfs".to_string();
        assert!(service.create(dto).await.unwrap_err().is_validation());
        assert!(storage::pool_names(&state.sea_db).await.unwrap().is_empty());

        service.create(create_dto("svc-dup", &[])).await.unwrap();
        assert!(service.create(create_dto("svc-dup", &[])).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_failed_driver_create_rolls_back() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());

        let err = service
            .create(create_dto("svc-fail", &[(mock::FAIL_KEY, "create_pool")]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        assert!(service.get("svc-fail").await.unwrap_err().is_not_found());
        assert!(!state.storage.is_pool_registered("svc-fail").await);
    }

    #[tokio::test]
    async fn test_failed_reconcile_deletes_backend_pool() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());

        let err = service
            .create(create_dto("svc-reconcile", &[(mock::FAIL_KEY, "reconcile")]))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        // 后端已创建的存储池被回滚删除
        assert_eq!(
            mock::recorded_calls("svc-reconcile"),
            vec!["create_pool", "delete_pool"]
        );
        assert!(service.get("svc-reconcile").await.unwrap_err().is_not_found());
        assert!(!state.storage.is_pool_registered("svc-reconcile").await);
    }

    #[tokio::test]
    async fn test_identical_update_is_noop() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        let created = service.create(create_dto("svc-noop", &[("user.a", "1")])).await.unwrap();
        let pool_id = storage::pool_get_id(&state.sea_db, "svc-noop").await.unwrap();
        let rows_before = storage::pool_config_row_ids(&state.sea_db, pool_id).await.unwrap();
        mock::clear_recorded_calls("svc-noop");

        let updated = service.update("svc-noop", created.config.clone()).await.unwrap();

        assert_eq!(updated.config, created.config);
        assert!(mock::recorded_calls("svc-noop").is_empty());
        assert_eq!(
            storage::pool_config_row_ids(&state.sea_db, pool_id).await.unwrap(),
            rows_before
        );
    }

    #[tokio::test]
    async fn test_user_only_update_skips_driver() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        let created = service.create(create_dto("svc-user", &[])).await.unwrap();
        mock::clear_recorded_calls("svc-user");

        let mut new_config = created.config.clone();
        new_config.insert("user.note".to_string(), "hello".to_string());
        let updated = service.update("svc-user", new_config).await.unwrap();

        assert_eq!(updated.config["user.note"], "hello");
        assert!(mock::recorded_calls("svc-user").is_empty());

        new_config = updated.config.clone();
        new_config.insert("volume.size".to_string(), "20GB".to_string());
        service.update("svc-user", new_config).await.unwrap();
        assert_eq!(mock::recorded_calls("svc-user"), vec!["update_pool:volume.size"]);
    }

    #[tokio::test]
    async fn test_driver_key_change_rejected() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        let created = service.create(create_dto("svc-driver", &[])).await.unwrap();

        let mut new_config = created.config.clone();
        new_config.insert("driver".to_string(), "dir".to_string());
        new_config.insert("user.a".to_string(), "1".to_string());
        let err = service.update("svc-driver", new_config).await.unwrap_err();
        assert!(err.is_validation());

        let stored = storage::pool_get(&state.sea_db, "svc-driver").await.unwrap();
        assert_eq!(stored.config, created.config);
        let driver = state.storage.get_driver("svc-driver").await.unwrap();
        assert_eq!(driver.pool_writable().await.config, created.config);
    }

    #[tokio::test]
    async fn test_failed_driver_update_restores_baseline() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        let created = service.create(create_dto("svc-upfail", &[])).await.unwrap();

        let mut new_config = created.config.clone();
        new_config.insert(mock::FAIL_KEY.to_string(), "update_pool".to_string());
        assert!(service.update("svc-upfail", new_config).await.is_err());

        let driver = state.storage.get_driver("svc-upfail").await.unwrap();
        assert_eq!(driver.pool_writable().await.config, created.config);
        assert_eq!(
            storage::pool_get(&state.sea_db, "svc-upfail").await.unwrap().config,
            created.config
        );
    }

    #[tokio::test]
    async fn test_patch_merges_and_removes() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        service
            .create(create_dto("svc-patch", &[("user.a", "1"), ("user.b", "2")]))
            .await
            .unwrap();

        let patched = service
            .patch("svc-patch", config(&[("user.a", ""), ("user.c", "3")]))
            .await
            .unwrap();
        assert!(!patched.config.contains_key("user.a"));
        assert_eq!(patched.config["user.b"], "2");
        assert_eq!(patched.config["user.c"], "3");
    }

    #[tokio::test]
    async fn test_delete_rejected_while_used() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        service.create(create_dto("svc-used", &[])).await.unwrap();

        let root: Device = [("type", "disk"), ("pool", "svc-used")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut devices = Devices::new();
        devices.insert("root".to_string(), root);
        containers::profile_create(&state.sea_db, "uses-pool", "", &devices)
            .await
            .unwrap();

        let err = service.delete("svc-used").await.unwrap_err();
        assert!(err.is_conflict());
        assert!(service.get("svc-used").await.is_ok());
        assert!(!mock::recorded_calls("svc-used").contains(&"delete_pool".to_string()));
    }

    #[tokio::test]
    async fn test_delete_rejected_with_volumes() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        service.create(create_dto("svc-vols", &[])).await.unwrap();
        let pool_id = storage::pool_get_id(&state.sea_db, "svc-vols").await.unwrap();
        storage::volume_create(&state.sea_db, "data", common::VolumeType::Custom, pool_id, &ConfigMap::new())
            .await
            .unwrap();

        assert!(service.delete("svc-vols").await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_delete() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        service.create(create_dto("svc-delete", &[])).await.unwrap();

        service.delete("svc-delete").await.unwrap();

        assert!(service.get("svc-delete").await.unwrap_err().is_not_found());
        assert!(!state.storage.is_pool_registered("svc-delete").await);
        assert_eq!(
            mock::recorded_calls("svc-delete"),
            vec!["create_pool", "delete_pool"]
        );
        assert!(service.delete("svc-delete").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let state = AppState::for_tests().await;
        let service = StoragePoolService::new(state.clone());
        service.create(create_dto("svc-list-b", &[])).await.unwrap();
        service.create(create_dto("svc-list-a", &[])).await.unwrap();

        let list = service.list().await.unwrap();
        let names: Vec<&str> = list.pools.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["svc-list-a", "svc-list-b"]);
        assert_eq!(list.total, 2);
    }
}
