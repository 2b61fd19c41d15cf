/// 存储管理器
///
/// 按存储池名持有已初始化的驱动实例，每个存储池只有一个实例

use common::{Error, Result, StoragePool};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::driver::{DriverSettings, StorageDriver};
use crate::kind::DriverKind;

/// 存储管理器
pub struct StorageManager {
    settings: DriverSettings,
    /// 存储驱动映射: pool_name -> driver
    drivers: Arc<RwLock<HashMap<String, Arc<dyn StorageDriver>>>>,
}

impl StorageManager {
    pub fn new(settings: DriverSettings) -> Self {
        Self {
            settings,
            drivers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// 构造驱动实例并注册，已有实例会被替换
    #[instrument(skip(self, pool), fields(pool = %pool.name, driver = %pool.driver))]
    pub async fn init_pool(&self, pool: &StoragePool) -> Result<Arc<dyn StorageDriver>> {
        let kind: DriverKind = pool.driver.parse()?;
        info!("Initializing storage driver for pool {}", pool.name);

        let driver = kind.build(pool, &self.settings);
        let mut drivers = self.drivers.write().await;
        drivers.insert(pool.name.clone(), driver.clone());

        Ok(driver)
    }

    /// 已注册则直接返回，否则按数据库记录初始化
    ///
    /// 检查和注册在同一把写锁内完成，不会替换并发注册的实例
    #[instrument(skip(self, pool), fields(pool = %pool.name))]
    pub async fn get_or_init(&self, pool: &StoragePool) -> Result<Arc<dyn StorageDriver>> {
        if let Some(driver) = self.drivers.read().await.get(&pool.name).cloned() {
            return Ok(driver);
        }

        let kind: DriverKind = pool.driver.parse()?;
        let mut drivers = self.drivers.write().await;
        if let Some(driver) = drivers.get(&pool.name) {
            return Ok(driver.clone());
        }

        debug!("Storage pool {} not registered yet", pool.name);
        let driver = kind.build(pool, &self.settings);
        drivers.insert(pool.name.clone(), driver.clone());
        Ok(driver)
    }

    /// 获取存储驱动
    pub async fn get_driver(&self, pool_name: &str) -> Result<Arc<dyn StorageDriver>> {
        let drivers = self.drivers.read().await;
        drivers
            .get(pool_name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("存储池 {} 未初始化", pool_name)))
    }

    /// 注销存储池驱动
    #[instrument(skip(self))]
    pub async fn remove_pool(&self, pool_name: &str) -> Option<Arc<dyn StorageDriver>> {
        let removed = self.drivers.write().await.remove(pool_name);
        if removed.is_some() {
            info!("Removed storage driver for pool {}", pool_name);
        }
        removed
    }

    /// 存储池记录已不存在时注销对应实例，同名新建的存储池不受影响
    pub async fn remove_stale(&self, pool: &StoragePool) -> bool {
        let mut drivers = self.drivers.write().await;
        let stale = drivers
            .get(&pool.name)
            .map(|driver| driver.state().pool_id() == pool.id)
            .unwrap_or(false);
        if stale {
            drivers.remove(&pool.name);
            info!("Removed stale storage driver for pool {}", pool.name);
        }
        stale
    }

    /// 检查存储池是否已注册
    pub async fn is_pool_registered(&self, pool_name: &str) -> bool {
        let drivers = self.drivers.read().await;
        drivers.contains_key(pool_name)
    }

    /// 获取已注册的存储池列表
    pub async fn list_registered_pools(&self) -> Vec<String> {
        let drivers = self.drivers.read().await;
        let mut names: Vec<String> = drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ConfigMap;

    fn pool(name: &str, driver: &str) -> StoragePool {
        StoragePool {
            id: 1,
            name: name.to_string(),
            driver: driver.to_string(),
            config: ConfigMap::new(),
        }
    }

    #[tokio::test]
    async fn test_register_and_remove() {
        let manager = StorageManager::new(DriverSettings::new("/tmp"));
        assert!(manager.get_driver("p1").await.err().unwrap().is_not_found());

        manager.init_pool(&pool("p1", "mock")).await.unwrap();
        manager.init_pool(&pool("p0", "mock")).await.unwrap();

        assert!(manager.is_pool_registered("p1").await);
        assert_eq!(manager.list_registered_pools().await, vec!["p0", "p1"]);
        assert_eq!(manager.get_driver("p1").await.unwrap().pool_name(), "p1");

        assert!(manager.remove_pool("p1").await.is_some());
        assert!(!manager.is_pool_registered("p1").await);
        assert!(manager.remove_pool("p1").await.is_none());
    }

    #[tokio::test]
    async fn test_get_or_init_reuses_instance() {
        let manager = StorageManager::new(DriverSettings::new("/tmp"));
        let first = manager.get_or_init(&pool("p1", "mock")).await.unwrap();
        let second = manager.get_or_init(&pool("p1", "mock")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_get_or_init_builds_one_instance() {
        let manager = Arc::new(StorageManager::new(DriverSettings::new("/tmp")));
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_or_init(&pool("p1", "mock")).await.unwrap() })
            })
            .collect();

        let registered = manager.get_or_init(&pool("p1", "mock")).await.unwrap();
        for task in tasks {
            assert!(Arc::ptr_eq(&task.await.unwrap(), &registered));
        }
    }

    #[tokio::test]
    async fn test_remove_stale_matches_pool_id() {
        let manager = StorageManager::new(DriverSettings::new("/tmp"));
        manager.init_pool(&pool("p1", "mock")).await.unwrap();

        let mut recreated = pool("p1", "mock");
        recreated.id = 2;
        assert!(!manager.remove_stale(&recreated).await);
        assert!(manager.is_pool_registered("p1").await);

        assert!(manager.remove_stale(&pool("p1", "mock")).await);
        assert!(!manager.is_pool_registered("p1").await);
    }

    #[tokio::test]
    async fn test_unknown_driver_rejected() {
        let manager = StorageManager::new(DriverSettings::new("/tmp"));
        let err = manager.init_pool(&pool("p1", "zfs")).await.err().unwrap();
        assert!(err.is_validation());
        assert!(!manager.is_pool_registered("p1").await);
    }
}
