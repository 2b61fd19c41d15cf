/// 数据库访问层

pub mod containers;
pub mod models;
pub mod storage;

use common::{Error, Result};
use sea_orm::sea_query::Index;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use tracing::info;

use self::models::{container, profile, storage_pool, storage_pool_config, storage_volume, storage_volume_config};

/// 默认 profile，新库初始化时写入
pub const DEFAULT_PROFILE: &str = "default";

/// 建立数据库连接 (SeaORM)
pub async fn establish_connection(database_url: &str) -> std::result::Result<DatabaseConnection, anyhow::Error> {
    info!("正在连接数据库: {}", database_url);

    let mut opts = ConnectOptions::new(database_url.to_string());
    opts.sqlx_logging(false);
    let db = Database::connect(opts).await?;
    info!("数据库连接成功");

    Ok(db)
}

pub fn db_error(err: DbErr) -> Error {
    Error::Database(err.to_string())
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<()> {
    let backend = db.get_database_backend();
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(backend.build(&stmt)).await.map_err(db_error)?;
    Ok(())
}

/// 按实体定义建表并写入默认 profile
pub async fn init_schema(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, &schema, storage_pool::Entity).await?;
    create_table(db, &schema, storage_pool_config::Entity).await?;
    create_table(db, &schema, storage_volume::Entity).await?;
    create_table(db, &schema, storage_volume_config::Entity).await?;
    create_table(db, &schema, container::Entity).await?;
    create_table(db, &schema, profile::Entity).await?;

    let unique_volume = Index::create()
        .name("idx_storage_volumes_name_type_pool")
        .table(storage_volume::Entity)
        .col(storage_volume::Column::Name)
        .col(storage_volume::Column::VolumeType)
        .col(storage_volume::Column::StoragePoolId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&unique_volume)).await.map_err(db_error)?;

    let profiles = containers::profile_names(db).await?;
    if !profiles.iter().any(|name| name == DEFAULT_PROFILE) {
        containers::profile_create(db, DEFAULT_PROFILE, "Default profile", &Default::default()).await?;
        info!("已创建默认 profile");
    }

    Ok(())
}

/// 测试用内存数据库
///
/// 单连接，否则每个连接各自拿到一个新的空库
#[cfg(test)]
pub async fn test_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.unwrap();
    init_schema(&db).await.unwrap();
    db
}
