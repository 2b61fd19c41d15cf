/// 测试用存储驱动
///
/// 不接触宿主机，所有状态都在内存中。每次驱动调用按存储池名记录下来，
/// 配置项 `mock.fail` 中列出的操作名（逗号分隔）会直接返回存储错误。
/// 列出 `reconcile` 时 `create_pool` 本身成功，但把配置改写成校验不通过的样子

use async_trait::async_trait;
use common::models::{StoragePoolWritable, StorageVolumeWritable};
use common::{ConfigMap, Error, Result, StoragePool, VolumeType};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::config::{self, set_default};
use crate::driver::{DriverState, StorageDriver};
use crate::kind::DriverKind;

pub const FAIL_KEY: &str = "mock.fail";
/// 出现即校验失败
pub const INVALID_KEY: &str = "mock.invalid";
pub const DEFAULT_VOLUME_SIZE: &str = "10GB";

static CALLS: Lazy<Mutex<HashMap<String, Vec<String>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

/// 指定存储池上的驱动调用记录，按调用顺序排列
pub fn recorded_calls(pool_name: &str) -> Vec<String> {
    CALLS
        .lock()
        .map(|calls| calls.get(pool_name).cloned().unwrap_or_default())
        .unwrap_or_default()
}

pub fn clear_recorded_calls(pool_name: &str) {
    if let Ok(mut calls) = CALLS.lock() {
        calls.remove(pool_name);
    }
}

fn record(pool_name: &str, call: String) {
    if let Ok(mut calls) = CALLS.lock() {
        calls.entry(pool_name.to_string()).or_default().push(call);
    }
}

fn fails(config: &ConfigMap, operation: &str) -> bool {
    config::get(config, FAIL_KEY)
        .map(|list| list.split(',').any(|op| op.trim() == operation))
        .unwrap_or(false)
}

pub fn validate_pool_config(_pool_name: &str, config: &ConfigMap) -> Result<()> {
    if config.contains_key(INVALID_KEY) {
        return Err(Error::InvalidArgument(format!("mock 驱动不接受配置项 {}", INVALID_KEY)));
    }
    Ok(())
}

pub fn fill_pool_defaults(_pool_name: &str, config: &mut ConfigMap) -> Result<()> {
    set_default(config, "volume.size", DEFAULT_VOLUME_SIZE);
    Ok(())
}

pub fn validate_volume_config(_config: &ConfigMap, _pool_config: &ConfigMap) -> Result<()> {
    Ok(())
}

pub fn fill_volume_defaults(config: &mut ConfigMap, pool_config: &ConfigMap) -> Result<()> {
    set_default(
        config,
        "size",
        config::get(pool_config, "volume.size").unwrap_or(DEFAULT_VOLUME_SIZE),
    );
    Ok(())
}

/// 测试用存储驱动
pub struct MockDriver {
    state: DriverState,
}

impl MockDriver {
    pub fn new(pool: &StoragePool) -> Self {
        Self {
            state: DriverState::new(pool),
        }
    }

    fn check(&self, config: &ConfigMap, operation: &str, call: String) -> Result<()> {
        debug!("mock driver call on {}: {}", self.state.pool_name(), call);
        record(self.state.pool_name(), call);
        if fails(config, operation) {
            return Err(Error::Storage(format!("mock 驱动按配置拒绝 {}", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for MockDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Mock
    }

    fn state(&self) -> &DriverState {
        &self.state
    }

    async fn create_pool(&self) -> Result<()> {
        let current = self.state.pool_writable().await;
        self.check(&current.config, "create_pool", "create_pool".to_string())?;

        if config::get(&current.config, "source").is_none() {
            self.state
                .set_pool_config("source", format!("mock://{}", self.state.pool_name()))
                .await;
        }
        if fails(&current.config, "reconcile") {
            self.state.set_pool_config(INVALID_KEY, "true").await;
        }
        Ok(())
    }

    async fn delete_pool(&self) -> Result<()> {
        let current = self.state.pool_writable().await;
        self.check(&current.config, "delete_pool", "delete_pool".to_string())
    }

    async fn update_pool(&self, writable: &StoragePoolWritable, changed: &[String]) -> Result<()> {
        self.check(
            &writable.config,
            "update_pool",
            format!("update_pool:{}", changed.join(",")),
        )
    }

    async fn create_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
    ) -> Result<()> {
        self.check(
            &writable.config,
            "create_volume",
            format!("create_volume:{}/{}", volume_type, name),
        )
    }

    async fn delete_volume(&self, name: &str, volume_type: VolumeType) -> Result<()> {
        let config = self
            .state
            .volume_writable(name, volume_type)
            .await
            .map(|w| w.config)
            .unwrap_or_default();
        self.check(&config, "delete_volume", format!("delete_volume:{}/{}", volume_type, name))
    }

    async fn update_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
        changed: &[String],
    ) -> Result<()> {
        self.check(
            &writable.config,
            "update_volume",
            format!("update_volume:{}/{}:{}", volume_type, name, changed.join(",")),
        )
    }
}
