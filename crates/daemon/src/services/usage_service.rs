/// 存储用量查询
///
/// 计算哪些容器、镜像和 profile 正在使用一个存储池或存储卷。
/// 每次调用都现查数据库，结果只作参考，破坏性操作前会再查一次。
/// 存储池扫描遇到无法加载的容器直接报错，存储卷扫描跳过它

use common::models::device::{disk_pool, is_disk, is_host_path};
use common::models::{paths, Devices};
use common::utils::clean_path;
use common::{Error, Result, VolumeType};
use tracing::{debug, warn};

use crate::app_state::AppState;
use crate::db::{containers, storage};

pub struct UsageService {
    state: AppState,
}

/// 去重并保持首次出现的顺序
fn dedup(paths: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    paths.into_iter().filter(|p| seen.insert(p.clone())).collect()
}

fn uses_pool(devices: &Devices, pool_name: &str) -> bool {
    devices.values().any(|device| disk_pool(device) == Some(pool_name))
}

/// disk 设备的 source 清理后等于 `<name>` 或 `<type>/<name>`
fn uses_volume(devices: &Devices, volume_name: &str, type_name: &str) -> bool {
    let with_type = format!("{}/{}", type_name, volume_name);
    devices.values().any(|device| {
        if !is_disk(device) || is_host_path(device) {
            return false;
        }
        let source = clean_path(device.get("source").map(String::as_str).unwrap_or(""));
        source == volume_name || source == with_type
    })
}

impl UsageService {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 使用该存储池的对象路径
    pub async fn pool_used_by(&self, pool_id: i32, pool_name: &str) -> Result<Vec<String>> {
        let db = &self.state.sea_db;
        let mut used_by = Vec::new();

        let volumes =
            storage::pool_volumes_get(db, pool_id, &[VolumeType::Container, VolumeType::Image]).await?;
        for volume in volumes {
            match volume.volume_type {
                VolumeType::Container => used_by.push(paths::container(&volume.name)),
                VolumeType::Image => used_by.push(paths::image(&volume.name)),
                VolumeType::Custom => {
                    return Err(Error::Consistency(format!(
                        "查询非自定义存储卷时返回了自定义存储卷 {}",
                        volume.name
                    )));
                }
            }
        }

        // 结果用于删除前的检查，任何容器加载失败都不能当作未使用
        for name in containers::container_names(db).await? {
            let devices = containers::container_local_devices(db, &name).await?;
            if uses_pool(&devices, pool_name) {
                used_by.push(paths::container(&name));
            }
        }

        for name in containers::profile_names(db).await? {
            let devices = containers::profile_devices(db, &name).await?;
            if uses_pool(&devices, pool_name) {
                used_by.push(paths::profile(&name));
            }
        }

        let used_by = dedup(used_by);
        debug!("存储池 {} 被 {} 个对象使用", pool_name, used_by.len());
        Ok(used_by)
    }

    /// 通过 disk 设备引用该存储卷的容器和 profile
    pub async fn volume_used_by(&self, volume_name: &str, volume_type: VolumeType) -> Result<Vec<String>> {
        let db = &self.state.sea_db;
        let type_name = volume_type.as_str();
        let mut used_by = Vec::new();

        for name in containers::container_names(db).await? {
            match containers::container_local_devices(db, &name).await {
                Ok(devices) if uses_volume(&devices, volume_name, type_name) => {
                    used_by.push(paths::container(&name))
                }
                Ok(_) => {}
                Err(e) => warn!("跳过无法加载的容器 {}: {}", name, e),
            }
        }

        for name in containers::profile_names(db).await? {
            let devices = containers::profile_devices(db, &name).await?;
            if uses_volume(&devices, volume_name, type_name) {
                used_by.push(paths::profile(&name));
            }
        }

        Ok(dedup(used_by))
    }
}
