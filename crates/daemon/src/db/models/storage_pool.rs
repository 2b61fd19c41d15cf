/// 存储池数据模型

use common::ConfigMap;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "storage_pools")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub driver: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::storage_pool_config::Entity")]
    Config,
    #[sea_orm(has_many = "super::storage_volume::Entity")]
    Volumes,
}

impl Related<super::storage_pool_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Config.def()
    }
}

impl Related<super::storage_volume::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Volumes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// 创建存储池 DTO
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateStoragePoolDto {
    #[validate(length(min = 1, message = "存储池名称不能为空"))]
    pub name: String,
    #[validate(length(min = 1, message = "存储驱动不能为空"))]
    pub driver: String,
    #[serde(default)]
    pub config: ConfigMap,
}

/// 更新存储池 DTO（PUT 整体替换，PATCH 合并）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStoragePoolDto {
    #[serde(default)]
    pub config: ConfigMap,
}

/// 存储池响应 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePoolResponse {
    pub name: String,
    pub driver: String,
    pub config: ConfigMap,
    pub used_by: Vec<String>,
}

/// 存储池列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct StoragePoolListResponse {
    pub pools: Vec<StoragePoolResponse>,
    pub total: usize,
}
