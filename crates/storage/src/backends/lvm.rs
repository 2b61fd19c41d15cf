/// LVM 存储驱动
///
/// 存储池对应一个卷组及其中的 thin pool，存储卷是 thin 逻辑卷，
/// 逻辑卷名为 `<类型>_<卷名>`。`source` 留空时使用 loop 镜像作为物理卷

use async_trait::async_trait;
use common::models::{StoragePoolWritable, StorageVolumeWritable};
use common::utils::parse_byte_size;
use common::{ConfigMap, Error, Result, StoragePool, VolumeType};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::command::run_command;
use crate::config::{
    self, check_updatable, is_absolute_path, is_filesystem, is_lvm_name, is_size, set_default, validate_config, KeyRules,
};
use crate::driver::{DriverSettings, DriverState, StorageDriver};
use crate::kind::DriverKind;

pub const DEFAULT_LOOP_SIZE: &str = "15GB";
pub const DEFAULT_THINPOOL_NAME: &str = "StorageThinPool";
pub const DEFAULT_VOLUME_SIZE: &str = "10GB";
pub const DEFAULT_FILESYSTEM: &str = "ext4";

const POOL_RULES: KeyRules = &[
    ("source", is_absolute_path),
    ("size", is_size),
    ("lvm.vg_name", is_lvm_name),
    ("lvm.thinpool_name", is_lvm_name),
    ("volume.size", is_size),
    ("volume.block.filesystem", is_filesystem),
];

const VOLUME_RULES: KeyRules = &[("size", is_size), ("block.filesystem", is_filesystem)];

pub fn validate_pool_config(pool_name: &str, config: &ConfigMap) -> Result<()> {
    validate_config(config, "lvm 存储池", POOL_RULES)?;

    // 卷组名默认取存储池名
    if config::get(config, "lvm.vg_name").is_none() {
        is_lvm_name(pool_name).map_err(|msg| {
            Error::InvalidArgument(format!("存储池名 \"{}\" 不能作为卷组名: {}", pool_name, msg))
        })?;
    }
    Ok(())
}

pub fn fill_pool_defaults(pool_name: &str, config: &mut ConfigMap) -> Result<()> {
    if config::get(config, "source").is_none() {
        set_default(config, "size", DEFAULT_LOOP_SIZE);
    }
    set_default(config, "lvm.vg_name", pool_name);
    set_default(config, "lvm.thinpool_name", DEFAULT_THINPOOL_NAME);
    set_default(config, "volume.size", DEFAULT_VOLUME_SIZE);
    set_default(config, "volume.block.filesystem", DEFAULT_FILESYSTEM);
    Ok(())
}

pub fn validate_volume_config(config: &ConfigMap, _pool_config: &ConfigMap) -> Result<()> {
    validate_config(config, "lvm 存储卷", VOLUME_RULES)
}

pub fn fill_volume_defaults(config: &mut ConfigMap, pool_config: &ConfigMap) -> Result<()> {
    set_default(
        config,
        "size",
        config::get(pool_config, "volume.size").unwrap_or(DEFAULT_VOLUME_SIZE),
    );
    set_default(
        config,
        "block.filesystem",
        config::get(pool_config, "volume.block.filesystem").unwrap_or(DEFAULT_FILESYSTEM),
    );
    Ok(())
}

/// `<类型>_<卷名>`
pub fn logical_volume_name(name: &str, volume_type: VolumeType) -> String {
    format!("{}_{}", volume_type.api_endpoint(), name)
}

/// LVM 存储驱动
pub struct LvmDriver {
    state: DriverState,
    settings: DriverSettings,
}

impl LvmDriver {
    pub fn new(pool: &StoragePool, settings: DriverSettings) -> Self {
        Self {
            state: DriverState::new(pool),
            settings,
        }
    }

    async fn vg_name(&self) -> String {
        self.state
            .pool_config("lvm.vg_name")
            .await
            .unwrap_or_else(|| self.state.pool_name().to_string())
    }

    async fn thinpool_name(&self) -> String {
        self.state
            .pool_config("lvm.thinpool_name")
            .await
            .unwrap_or_else(|| DEFAULT_THINPOOL_NAME.to_string())
    }

    fn loop_file(&self) -> PathBuf {
        self.settings.loop_file_path(self.state.pool_name())
    }

    /// 是否使用 loop 镜像作为物理卷
    async fn is_loop_backed(&self) -> bool {
        match self.state.pool_config("source").await {
            None => true,
            Some(source) => PathBuf::from(source) == self.loop_file(),
        }
    }

    /// 关联到 loop 镜像的设备，例如 `/dev/loop3`
    async fn find_loop_device(&self) -> Result<Option<String>> {
        let output = run_command("losetup", &["-j", &self.loop_file().to_string_lossy()]).await?;
        Ok(output
            .lines()
            .next()
            .and_then(|line| line.split(':').next())
            .map(|dev| dev.trim().to_string())
            .filter(|dev| !dev.is_empty()))
    }

    async fn attach_loop_file(&self) -> Result<String> {
        let file = self.loop_file();
        let size = self
            .state
            .pool_config("size")
            .await
            .unwrap_or_else(|| DEFAULT_LOOP_SIZE.to_string());
        let bytes = parse_byte_size(&size)?;

        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create directory {}: {}", parent.display(), e)))?;
        }
        if file.exists() {
            return Err(Error::Storage(format!("loop 镜像 {} 已存在", file.display())));
        }

        let file = file.to_string_lossy();
        run_command("truncate", &["-s", &bytes.to_string(), &file]).await?;
        let device = run_command("losetup", &["--find", "--show", &file]).await?;
        Ok(device.trim().to_string())
    }

    async fn volume_block_path(&self, name: &str, volume_type: VolumeType) -> String {
        format!("/dev/{}/{}", self.vg_name().await, logical_volume_name(name, volume_type))
    }
}

#[async_trait]
impl StorageDriver for LvmDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Lvm
    }

    fn state(&self) -> &DriverState {
        &self.state
    }

    async fn create_pool(&self) -> Result<()> {
        let vg = self.vg_name().await;
        let thinpool = self.thinpool_name().await;
        info!("Creating lvm storage pool {} (vg {})", self.state.pool_name(), vg);

        let device = match self.state.pool_config("source").await {
            Some(source) if !self.is_loop_backed().await => source,
            _ => {
                let device = self.attach_loop_file().await?;
                self.state
                    .set_pool_config("source", self.loop_file().to_string_lossy())
                    .await;
                device
            }
        };

        run_command("pvcreate", &["-y", &device]).await?;
        run_command("vgcreate", &[&vg, &device]).await?;
        run_command("lvcreate", &["-y", "--thinpool", &thinpool, "-l", "100%FREE", &vg]).await?;
        Ok(())
    }

    async fn delete_pool(&self) -> Result<()> {
        let vg = self.vg_name().await;
        info!("Deleting lvm storage pool {} (vg {})", self.state.pool_name(), vg);

        run_command("vgremove", &["-f", &vg]).await?;

        if !self.is_loop_backed().await {
            if let Some(source) = self.state.pool_config("source").await {
                run_command("pvremove", &["-y", &source]).await?;
            }
            return Ok(());
        }

        match self.find_loop_device().await? {
            Some(device) => {
                run_command("pvremove", &["-y", &device]).await?;
                run_command("losetup", &["-d", &device]).await?;
            }
            None => warn!("No loop device attached to {}", self.loop_file().display()),
        }

        let file = self.loop_file();
        if file.exists() {
            fs::remove_file(&file)
                .await
                .map_err(|e| Error::Storage(format!("Failed to remove {}: {}", file.display(), e)))?;
        }
        Ok(())
    }

    async fn update_pool(&self, writable: &StoragePoolWritable, changed: &[String]) -> Result<()> {
        check_updatable(
            changed,
            &["lvm.thinpool_name", "volume.size", "volume.block.filesystem"],
            "lvm 存储池",
        )?;

        if changed.iter().any(|k| k == "lvm.thinpool_name") {
            let vg = self.vg_name().await;
            let old = self.thinpool_name().await;
            let new = config::get(&writable.config, "lvm.thinpool_name").unwrap_or(DEFAULT_THINPOOL_NAME);
            if old != new {
                info!("Renaming thin pool {}/{} to {}", vg, old, new);
                run_command("lvrename", &[&vg, &old, new]).await?;
            }
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
    ) -> Result<()> {
        let vg = self.vg_name().await;
        let thinpool = self.thinpool_name().await;
        let lv = logical_volume_name(name, volume_type);
        let bytes = parse_byte_size(config::get(&writable.config, "size").unwrap_or(DEFAULT_VOLUME_SIZE))?;
        let filesystem = config::get(&writable.config, "block.filesystem").unwrap_or(DEFAULT_FILESYSTEM);
        info!("Creating lvm volume {}/{} ({} bytes)", vg, lv, bytes);

        run_command(
            "lvcreate",
            &[
                "-y",
                "--thin",
                "-n",
                &lv,
                "-V",
                &format!("{}b", bytes),
                &format!("{}/{}", vg, thinpool),
            ],
        )
        .await?;

        let block = self.volume_block_path(name, volume_type).await;
        run_command(&format!("mkfs.{}", filesystem), &[&block]).await?;
        Ok(())
    }

    async fn delete_volume(&self, name: &str, volume_type: VolumeType) -> Result<()> {
        let vg = self.vg_name().await;
        let lv = logical_volume_name(name, volume_type);
        info!("Deleting lvm volume {}/{}", vg, lv);
        run_command("lvremove", &["-f", &format!("{}/{}", vg, lv)]).await?;
        Ok(())
    }

    async fn update_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
        changed: &[String],
    ) -> Result<()> {
        check_updatable(changed, &["size"], "lvm 存储卷")?;

        if !changed.iter().any(|k| k == "size") {
            return Ok(());
        }

        let current = self.state.volume_writable(name, volume_type).await?;
        let old = parse_byte_size(config::get(&current.config, "size").unwrap_or(DEFAULT_VOLUME_SIZE))?;
        let new = parse_byte_size(config::get(&writable.config, "size").unwrap_or(DEFAULT_VOLUME_SIZE))?;
        if new < old {
            return Err(Error::InvalidArgument("lvm 存储卷不支持缩小".to_string()));
        }
        if new == old {
            return Ok(());
        }

        let block = self.volume_block_path(name, volume_type).await;
        run_command("lvextend", &["-r", "-L", &format!("{}b", new), &block]).await?;
        Ok(())
    }
}
