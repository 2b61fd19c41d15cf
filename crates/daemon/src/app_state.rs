/// 应用全局状态

use sea_orm::DatabaseConnection;
use std::sync::Arc;
use storage::StorageManager;

use crate::api::locks::OperationLocks;

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    /// SeaORM 数据库连接
    pub sea_db: DatabaseConnection,
    /// 存储驱动实例
    pub storage: Arc<StorageManager>,
    /// 按名称串行化的操作锁
    pub locks: OperationLocks,
}

impl AppState {
    pub fn new(sea_db: DatabaseConnection, storage: StorageManager) -> Self {
        Self {
            sea_db,
            storage: Arc::new(storage),
            locks: OperationLocks::new(),
        }
    }

    /// 获取 SeaORM 数据库连接（克隆）
    pub fn sea_db(&self) -> DatabaseConnection {
        self.sea_db.clone()
    }

    pub fn storage(&self) -> Arc<StorageManager> {
        self.storage.clone()
    }

    /// 测试用状态：内存数据库 + 临时目录下的存储根
    #[cfg(test)]
    pub async fn for_tests() -> Self {
        let db = crate::db::test_db().await;
        let root = std::env::temp_dir().join("easy-container-cloud-tests");
        Self::new(db, StorageManager::new(storage::DriverSettings::new(root)))
    }
}
