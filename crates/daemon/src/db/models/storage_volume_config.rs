/// 存储卷配置项

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "storage_volumes_config")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub storage_volume_id: i32,
    pub key: String,
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::storage_volume::Entity",
        from = "Column::StorageVolumeId",
        to = "super::storage_volume::Column::Id"
    )]
    StorageVolume,
}

impl Related<super::storage_volume::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StorageVolume.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
