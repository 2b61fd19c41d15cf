/// 存储卷数据模型
///
/// (name, type, storage_pool_id) 唯一，`type` 保存卷类型的数字编码

use common::{ConfigMap, VolumeType};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "storage_volumes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub storage_pool_id: i32,
    #[sea_orm(column_name = "type")]
    pub volume_type: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::storage_pool::Entity",
        from = "Column::StoragePoolId",
        to = "super::storage_pool::Column::Id"
    )]
    StoragePool,
    #[sea_orm(has_many = "super::storage_volume_config::Entity")]
    Config,
}

impl Related<super::storage_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StoragePool.def()
    }
}

impl Related<super::storage_volume_config::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Config.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

fn default_volume_type() -> String {
    VolumeType::Custom.as_str().to_string()
}

/// 创建存储卷 DTO，只允许自定义存储卷
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateStorageVolumeDto {
    #[validate(length(min = 1, message = "存储卷名称不能为空"))]
    pub name: String,
    #[serde(rename = "type", default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default)]
    pub config: ConfigMap,
}

/// 更新存储卷 DTO（PUT 整体替换，PATCH 合并）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateStorageVolumeDto {
    #[serde(default)]
    pub config: ConfigMap,
}

/// 存储卷响应 DTO
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageVolumeResponse {
    pub name: String,
    #[serde(rename = "type")]
    pub volume_type: String,
    pub config: ConfigMap,
    pub used_by: Vec<String>,
}

/// 存储卷列表响应
#[derive(Debug, Serialize, Deserialize)]
pub struct StorageVolumeListResponse {
    pub volumes: Vec<StorageVolumeResponse>,
    pub total: usize,
}
