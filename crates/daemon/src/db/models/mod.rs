/// 数据库实体

pub mod container;
pub mod profile;
pub mod storage_pool;
pub mod storage_pool_config;
pub mod storage_volume;
pub mod storage_volume_config;
