/// 容器数据模型
///
/// 容器生命周期不在本服务内，这里只读取名称、类型和本地设备

use sea_orm::entity::prelude::*;
use serde_json::Value as JsonValue;

/// 普通容器
pub const CTYPE_REGULAR: i32 = 0;
/// 快照
pub const CTYPE_SNAPSHOT: i32 = 1;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "containers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    #[sea_orm(column_name = "type")]
    pub ctype: i32,
    // 本地设备 (JSON): device name -> { key: value }
    pub devices: JsonValue,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
