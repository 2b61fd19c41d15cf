/// Btrfs 存储驱动
///
/// `source` 三种形态：
/// 1. 留空：在 `<root>/disks/<pool>.img` 创建 loop 镜像文件并格式化
/// 2. `/dev/...`：格式化整块设备
/// 3. 已有 btrfs 文件系统中的目录：在其上创建子卷
///
/// 每个存储卷都是一个 btrfs 子卷

use async_trait::async_trait;
use common::models::{StoragePoolWritable, StorageVolumeWritable};
use common::utils::parse_byte_size;
use common::{ConfigMap, Error, Result, StoragePool, VolumeType};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use super::dir::create_volume_dirs;
use crate::command::run_command;
use crate::config::{self, check_updatable, is_absolute_path, is_size, set_default, validate_config, KeyRules};
use crate::driver::{DriverSettings, DriverState, StorageDriver};
use crate::kind::DriverKind;

/// loop 镜像默认大小
pub const DEFAULT_LOOP_SIZE: &str = "15GB";

const POOL_RULES: KeyRules = &[("source", is_absolute_path), ("size", is_size)];

const VOLUME_RULES: KeyRules = &[];

pub fn validate_pool_config(_pool_name: &str, config: &ConfigMap) -> Result<()> {
    validate_config(config, "btrfs 存储池", POOL_RULES)
}

pub fn fill_pool_defaults(_pool_name: &str, config: &mut ConfigMap) -> Result<()> {
    if config::get(config, "source").is_none() {
        set_default(config, "size", DEFAULT_LOOP_SIZE);
    }
    Ok(())
}

pub fn validate_volume_config(config: &ConfigMap, _pool_config: &ConfigMap) -> Result<()> {
    validate_config(config, "btrfs 存储卷", VOLUME_RULES)
}

pub fn fill_volume_defaults(_config: &mut ConfigMap, _pool_config: &ConfigMap) -> Result<()> {
    Ok(())
}

/// 存储池介质
#[derive(Debug, Clone, PartialEq, Eq)]
enum Backing {
    LoopFile(PathBuf),
    Device(PathBuf),
    Subvolume(PathBuf),
}

/// Btrfs 存储驱动
pub struct BtrfsDriver {
    state: DriverState,
    settings: DriverSettings,
}

impl BtrfsDriver {
    pub fn new(pool: &StoragePool, settings: DriverSettings) -> Self {
        Self {
            state: DriverState::new(pool),
            settings,
        }
    }

    fn backing(&self, source: Option<&str>) -> Backing {
        let loop_file = self.settings.loop_file_path(self.state.pool_name());
        match source {
            None => Backing::LoopFile(loop_file),
            Some(source) if Path::new(source) == loop_file => Backing::LoopFile(loop_file),
            Some(source) if source.starts_with("/dev/") => Backing::Device(PathBuf::from(source)),
            Some(source) => Backing::Subvolume(PathBuf::from(source)),
        }
    }

    /// loop 文件与块设备挂载到默认挂载点，子卷直接使用 source 目录
    fn mount_path(&self, backing: &Backing) -> PathBuf {
        match backing {
            Backing::Subvolume(path) => path.clone(),
            _ => self.settings.pool_mount_path(self.state.pool_name()),
        }
    }

    async fn current_mount_path(&self) -> PathBuf {
        let source = self.state.pool_config("source").await;
        self.mount_path(&self.backing(source.as_deref()))
    }

    fn volume_path(mount_path: &Path, name: &str, volume_type: VolumeType) -> PathBuf {
        mount_path.join(volume_type.api_endpoint()).join(name)
    }

    async fn ensure_dir(path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create directory {}: {}", path.display(), e)))
    }

    async fn format_and_mount(&self, target: &Path, mount_path: &Path, loop_device: bool) -> Result<()> {
        let target = target.to_string_lossy();
        let label = self.state.pool_name();
        run_command("mkfs.btrfs", &["-f", "-L", label, &target]).await?;

        Self::ensure_dir(mount_path).await?;
        let mount_path = mount_path.to_string_lossy();
        if loop_device {
            run_command("mount", &["-o", "loop", &target, &mount_path]).await?;
        } else {
            run_command("mount", &[&target, &mount_path]).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for BtrfsDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Btrfs
    }

    fn state(&self) -> &DriverState {
        &self.state
    }

    async fn create_pool(&self) -> Result<()> {
        let source = self.state.pool_config("source").await;
        let backing = self.backing(source.as_deref());
        let mount_path = self.mount_path(&backing);
        info!("Creating btrfs storage pool {} ({:?})", self.state.pool_name(), backing);

        match &backing {
            Backing::LoopFile(file) => {
                let size = self
                    .state
                    .pool_config("size")
                    .await
                    .unwrap_or_else(|| DEFAULT_LOOP_SIZE.to_string());
                let bytes = parse_byte_size(&size)?;

                if let Some(parent) = file.parent() {
                    Self::ensure_dir(parent).await?;
                }
                if file.exists() {
                    return Err(Error::Storage(format!("loop 镜像 {} 已存在", file.display())));
                }
                run_command("truncate", &["-s", &bytes.to_string(), &file.to_string_lossy()]).await?;
                self.format_and_mount(file, &mount_path, true).await?;

                // 生成的镜像路径写回配置，由调用方持久化
                self.state.set_pool_config("source", file.to_string_lossy()).await;
            }
            Backing::Device(device) => {
                self.format_and_mount(device, &mount_path, false).await?;
            }
            Backing::Subvolume(path) => {
                if path.exists() {
                    return Err(Error::Storage(format!("{} 已存在", path.display())));
                }
                if let Some(parent) = path.parent() {
                    Self::ensure_dir(parent).await?;
                }
                run_command("btrfs", &["subvolume", "create", &path.to_string_lossy()]).await?;
            }
        }

        create_volume_dirs(&mount_path).await
    }

    async fn delete_pool(&self) -> Result<()> {
        let source = self.state.pool_config("source").await;
        let backing = self.backing(source.as_deref());
        let mount_path = self.mount_path(&backing);
        info!("Deleting btrfs storage pool {} ({:?})", self.state.pool_name(), backing);

        match &backing {
            Backing::LoopFile(file) => {
                run_command("umount", &[&mount_path.to_string_lossy()]).await?;
                if file.exists() {
                    fs::remove_file(file)
                        .await
                        .map_err(|e| Error::Storage(format!("Failed to remove {}: {}", file.display(), e)))?;
                }
            }
            Backing::Device(_) => {
                run_command("umount", &[&mount_path.to_string_lossy()]).await?;
            }
            Backing::Subvolume(path) => {
                run_command("btrfs", &["subvolume", "delete", &path.to_string_lossy()]).await?;
            }
        }
        Ok(())
    }

    async fn update_pool(&self, writable: &StoragePoolWritable, changed: &[String]) -> Result<()> {
        let source = self.state.pool_config("source").await;
        let backing = self.backing(source.as_deref());

        let updatable: &[&str] = match backing {
            Backing::LoopFile(_) => &["size"],
            _ => &[],
        };
        check_updatable(changed, updatable, "btrfs 存储池")?;

        if !changed.iter().any(|k| k == "size") {
            return Ok(());
        }

        let old = parse_byte_size(
            &self
                .state
                .pool_config("size")
                .await
                .unwrap_or_else(|| DEFAULT_LOOP_SIZE.to_string()),
        )?;
        let new = parse_byte_size(config::get(&writable.config, "size").unwrap_or(DEFAULT_LOOP_SIZE))?;
        if new < old {
            return Err(Error::InvalidArgument("btrfs 存储池不支持缩小".to_string()));
        }

        if let Backing::LoopFile(file) = backing {
            run_command("truncate", &["-s", &new.to_string(), &file.to_string_lossy()]).await?;
            let mount_path = self.current_mount_path().await;
            run_command("btrfs", &["filesystem", "resize", "max", &mount_path.to_string_lossy()]).await?;
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        _writable: &StorageVolumeWritable,
    ) -> Result<()> {
        let path = Self::volume_path(&self.current_mount_path().await, name, volume_type);
        info!("Creating btrfs subvolume {}", path.display());
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent).await?;
        }
        run_command("btrfs", &["subvolume", "create", &path.to_string_lossy()]).await?;
        Ok(())
    }

    async fn delete_volume(&self, name: &str, volume_type: VolumeType) -> Result<()> {
        let path = Self::volume_path(&self.current_mount_path().await, name, volume_type);
        info!("Deleting btrfs subvolume {}", path.display());
        if !path.exists() {
            return Ok(());
        }
        run_command("btrfs", &["subvolume", "delete", &path.to_string_lossy()]).await?;
        Ok(())
    }

    async fn update_volume(
        &self,
        _name: &str,
        _volume_type: VolumeType,
        _writable: &StorageVolumeWritable,
        changed: &[String],
    ) -> Result<()> {
        check_updatable(changed, &[], "btrfs 存储卷")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(source: Option<&str>) -> StoragePool {
        let mut config = ConfigMap::new();
        if let Some(source) = source {
            config.insert("source".to_string(), source.to_string());
        }
        StoragePool {
            id: 1,
            name: "p1".to_string(),
            driver: "btrfs".to_string(),
            config,
        }
    }

    #[test]
    fn test_fill_defaults_loop_only() {
        let mut config = ConfigMap::new();
        fill_pool_defaults("p1", &mut config).unwrap();
        assert_eq!(config["size"], DEFAULT_LOOP_SIZE);

        let mut config = ConfigMap::new();
        config.insert("source".to_string(), "/dev/sdb".to_string());
        fill_pool_defaults("p1", &mut config).unwrap();
        assert!(!config.contains_key("size"));
    }

    #[test]
    fn test_validate_pool_config() {
        let mut config = ConfigMap::new();
        config.insert("size".to_string(), "20GB".to_string());
        assert!(validate_pool_config("p1", &config).is_ok());

        config.insert("size".to_string(), "huge".to_string());
        assert!(validate_pool_config("p1", &config).is_err());

        let mut config = ConfigMap::new();
        config.insert("lvm.vg_name".to_string(), "vg0".to_string());
        assert!(validate_pool_config("p1", &config).is_err());
    }

    #[test]
    fn test_backing_detection() {
        let settings = DriverSettings::new("/var/lib/ecc");
        let driver = BtrfsDriver::new(&pool(None), settings.clone());

        assert_eq!(
            driver.backing(None),
            Backing::LoopFile(PathBuf::from("/var/lib/ecc/disks/p1.img"))
        );
        assert_eq!(
            driver.backing(Some("/var/lib/ecc/disks/p1.img")),
            Backing::LoopFile(PathBuf::from("/var/lib/ecc/disks/p1.img"))
        );
        assert_eq!(
            driver.backing(Some("/dev/sdb")),
            Backing::Device(PathBuf::from("/dev/sdb"))
        );

        let subvolume = driver.backing(Some("/mnt/btrfs/p1"));
        assert_eq!(subvolume, Backing::Subvolume(PathBuf::from("/mnt/btrfs/p1")));
        assert_eq!(driver.mount_path(&subvolume), PathBuf::from("/mnt/btrfs/p1"));
        assert_eq!(
            driver.mount_path(&Backing::Device(PathBuf::from("/dev/sdb"))),
            PathBuf::from("/var/lib/ecc/storage-pools/p1")
        );
    }

    #[tokio::test]
    async fn test_size_not_updatable_on_device() {
        let driver = BtrfsDriver::new(&pool(Some("/dev/sdb")), DriverSettings::new("/tmp"));
        let err = driver
            .update_pool(&StoragePoolWritable::default(), &["size".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
