/// 配置管理
///
/// 默认值之上叠加环境变量（`SERVER_PORT`、`DATABASE_URL`、`STORAGE_ROOT`、`LOG_LEVEL`）

use ::config::{Config as Settings, ConfigError, Environment};
use common::models::constants::DEFAULT_SERVER_PORT;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/easy-container-cloud";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    /// 存储池挂载点和 loop 文件所在目录
    pub storage_root: PathBuf,
    pub log_level: String,
}

impl Config {
    /// 从环境变量加载配置
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self::from_environment(Environment::default())?)
    }

    fn from_environment(environment: Environment) -> Result<Self, ConfigError> {
        Settings::builder()
            .set_default("server_port", i64::from(DEFAULT_SERVER_PORT))?
            .set_default(
                "database_url",
                format!("sqlite://{}/daemon.db?mode=rwc", DEFAULT_STORAGE_ROOT),
            )?
            .set_default("storage_root", DEFAULT_STORAGE_ROOT)?
            .set_default("log_level", "info")?
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
