/// Ceph RBD 存储驱动
///
/// 存储池对应一个 OSD pool，存储卷是其中名为 `<类型>_<卷名>` 的 RBD 镜像

use async_trait::async_trait;
use common::models::{StoragePoolWritable, StorageVolumeWritable};
use common::utils::parse_byte_size;
use common::{ConfigMap, Error, Result, StoragePool, VolumeType};
use tracing::{info, warn};

use crate::command::{command_succeeds, run_command};
use crate::config::{
    self, check_updatable, is_any, is_bool, is_filesystem, is_positive_integer, is_size, set_default,
    validate_config, KeyRules,
};
use crate::driver::{DriverState, StorageDriver};
use crate::kind::DriverKind;

pub const DEFAULT_CLUSTER_NAME: &str = "ceph";
pub const DEFAULT_PG_NUM: &str = "32";
pub const DEFAULT_VOLUME_SIZE: &str = "10GB";
pub const DEFAULT_FILESYSTEM: &str = "ext4";

/// OSD pool 是否由本驱动创建，只有这种情况下删除存储池时才删除 OSD pool
const PRISTINE_KEY: &str = "volatile.pool.pristine";

const POOL_RULES: KeyRules = &[
    ("ceph.cluster_name", is_any),
    ("ceph.osd.pool_name", is_any),
    ("ceph.osd.pg_num", is_positive_integer),
    ("volume.size", is_size),
    ("volume.block.filesystem", is_filesystem),
    (PRISTINE_KEY, is_bool),
];

const VOLUME_RULES: KeyRules = &[("size", is_size), ("block.filesystem", is_filesystem)];

const MIB: u64 = 1024 * 1024;

pub fn validate_pool_config(_pool_name: &str, config: &ConfigMap) -> Result<()> {
    validate_config(config, "ceph 存储池", POOL_RULES)
}

pub fn fill_pool_defaults(pool_name: &str, config: &mut ConfigMap) -> Result<()> {
    set_default(config, "ceph.cluster_name", DEFAULT_CLUSTER_NAME);
    set_default(config, "ceph.osd.pool_name", pool_name);
    set_default(config, "ceph.osd.pg_num", DEFAULT_PG_NUM);
    set_default(config, "volume.size", DEFAULT_VOLUME_SIZE);
    set_default(config, "volume.block.filesystem", DEFAULT_FILESYSTEM);
    Ok(())
}

pub fn validate_volume_config(config: &ConfigMap, _pool_config: &ConfigMap) -> Result<()> {
    validate_config(config, "ceph 存储卷", VOLUME_RULES)
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
pub fn rbd_image_name(name: &str, volume_type: VolumeType) -> String {
    format!("{}_{}", volume_type.api_endpoint(), name)
}

/// RBD 以 MiB 为单位，不足 1MiB 的部分向上取整
fn size_in_mib(size: &str) -> Result<u64> {
    let bytes = parse_byte_size(size)?;
    Ok(bytes.div_ceil(MIB).max(1))
}

/// Ceph RBD 存储驱动
pub struct CephDriver {
    state: DriverState,
}

impl CephDriver {
    pub fn new(pool: &StoragePool) -> Self {
        Self {
            state: DriverState::new(pool),
        }
    }

    async fn cluster(&self) -> String {
        self.state
            .pool_config("ceph.cluster_name")
            .await
            .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string())
    }

    async fn osd_pool(&self) -> String {
        self.state
            .pool_config("ceph.osd.pool_name")
            .await
            .unwrap_or_else(|| self.state.pool_name().to_string())
    }

    async fn osd_pool_exists(&self, cluster: &str, osd_pool: &str) -> bool {
        command_succeeds("ceph", &["--cluster", cluster, "osd", "pool", "get", osd_pool, "size"]).await
    }

    /// rbd 子命令，固定带上集群和 OSD pool 参数
    async fn rbd(&self, args: &[&str]) -> Result<String> {
        let cluster = self.cluster().await;
        let osd_pool = self.osd_pool().await;
        let mut full: Vec<&str> = vec!["--cluster", &cluster, "--pool", &osd_pool];
        full.extend_from_slice(args);
        run_command("rbd", &full).await
    }

    /// 映射镜像、格式化、再解除映射
    async fn format_image(&self, image: &str, filesystem: &str) -> Result<()> {
        let device = self.rbd(&["map", image]).await?;
        let device = device.trim().to_string();

        let formatted = run_command(&format!("mkfs.{}", filesystem), &[&device]).await;
        if let Err(e) = self.rbd(&["unmap", &device]).await {
            warn!("Failed to unmap {}: {}", device, e);
        }
        formatted.map(|_| ())
    }
}

#[async_trait]
impl StorageDriver for CephDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Ceph
    }

    fn state(&self) -> &DriverState {
        &self.state
    }

    async fn create_pool(&self) -> Result<()> {
        let cluster = self.cluster().await;
        let osd_pool = self.osd_pool().await;

        if self.osd_pool_exists(&cluster, &osd_pool).await {
            info!("Reusing existing OSD pool {} on cluster {}", osd_pool, cluster);
            self.state.set_pool_config(PRISTINE_KEY, "false").await;
            return Ok(());
        }

        let pg_num = self
            .state
            .pool_config("ceph.osd.pg_num")
            .await
            .unwrap_or_else(|| DEFAULT_PG_NUM.to_string());
        info!("Creating OSD pool {} on cluster {} (pg_num {})", osd_pool, cluster, pg_num);
        run_command(
            "ceph",
            &["--cluster", &cluster, "osd", "pool", "create", &osd_pool, &pg_num],
        )
        .await?;
        self.state.set_pool_config(PRISTINE_KEY, "true").await;
        Ok(())
    }

    async fn delete_pool(&self) -> Result<()> {
        let cluster = self.cluster().await;
        let osd_pool = self.osd_pool().await;

        if self.state.pool_config(PRISTINE_KEY).await.as_deref() != Some("true") {
            info!("Leaving pre-existing OSD pool {} in place", osd_pool);
            return Ok(());
        }

        info!("Deleting OSD pool {} on cluster {}", osd_pool, cluster);
        run_command(
            "ceph",
            &[
                "--cluster",
                &cluster,
                "osd",
                "pool",
                "delete",
                &osd_pool,
                &osd_pool,
                "--yes-i-really-really-mean-it",
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_pool(&self, _writable: &StoragePoolWritable, changed: &[String]) -> Result<()> {
        check_updatable(changed, &["volume.size", "volume.block.filesystem"], "ceph 存储池")
    }

    async fn create_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
    ) -> Result<()> {
        let image = rbd_image_name(name, volume_type);
        let size = size_in_mib(config::get(&writable.config, "size").unwrap_or(DEFAULT_VOLUME_SIZE))?;
        let filesystem = config::get(&writable.config, "block.filesystem").unwrap_or(DEFAULT_FILESYSTEM);
        info!("Creating RBD image {} ({}MiB)", image, size);

        self.rbd(&[
            "create",
            "--image-feature",
            "layering",
            "--size",
            &format!("{}M", size),
            &image,
        ])
        .await?;

        if let Err(e) = self.format_image(&image, filesystem).await {
            if let Err(cleanup) = self.rbd(&["rm", &image]).await {
                warn!("Failed to remove RBD image {}: {}", image, cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn delete_volume(&self, name: &str, volume_type: VolumeType) -> Result<()> {
        let image = rbd_image_name(name, volume_type);
        info!("Deleting RBD image {}", image);
        self.rbd(&["rm", &image]).await?;
        Ok(())
    }

    async fn update_volume(
        &self,
        name: &str,
        volume_type: VolumeType,
        writable: &StorageVolumeWritable,
        changed: &[String],
    ) -> Result<()> {
        check_updatable(changed, &["size"], "ceph 存储卷")?;

        if !changed.iter().any(|k| k == "size") {
            return Ok(());
        }

        let current = self.state.volume_writable(name, volume_type).await?;
        let old = size_in_mib(config::get(&current.config, "size").unwrap_or(DEFAULT_VOLUME_SIZE))?;
        let new = size_in_mib(config::get(&writable.config, "size").unwrap_or(DEFAULT_VOLUME_SIZE))?;
        if new < old {
            return Err(Error::InvalidArgument("ceph 存储卷不支持缩小".to_string()));
        }
        if new == old {
            return Ok(());
        }

        let image = rbd_image_name(name, volume_type);
        self.rbd(&["resize", "--size", &format!("{}M", new), &image]).await?;
        Ok(())
    }
}
