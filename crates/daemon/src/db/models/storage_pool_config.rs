/// 存储池配置项，每个键一行

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "storage_pools_config")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub storage_pool_id: i32,
    pub key: String,
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::storage_pool::Entity",
        from = "Column::StoragePoolId",
        to = "super::storage_pool::Column::Id"
    )]
    StoragePool,
}

impl Related<super::storage_pool::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StoragePool.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
