/// 存储池 / 存储卷持久化
///
/// 配置以键值行保存，更新时整体清空后重新写入，空值不落库

use common::{ConfigMap, Error, Result, StoragePool, StorageVolume, VolumeType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};

use super::db_error;
use super::models::{storage_pool, storage_pool_config, storage_volume, storage_volume_config};

// ==================== 存储池 ====================

pub async fn pool_get_id<C: ConnectionTrait>(db: &C, name: &str) -> Result<i32> {
    storage_pool::Entity::find()
        .filter(storage_pool::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(db_error)?
        .map(|pool| pool.id)
        .ok_or_else(|| Error::NotFound(format!("存储池 {}", name)))
}

/// 读取存储池及其配置
pub async fn pool_get<C: ConnectionTrait>(db: &C, name: &str) -> Result<StoragePool> {
    let pool = storage_pool::Entity::find()
        .filter(storage_pool::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| Error::NotFound(format!("存储池 {}", name)))?;

    let config = pool_config_get(db, pool.id).await?;
    Ok(StoragePool {
        id: pool.id,
        name: pool.name,
        driver: pool.driver,
        config,
    })
}

pub async fn pool_config_get<C: ConnectionTrait>(db: &C, pool_id: i32) -> Result<ConfigMap> {
    let rows = storage_pool_config::Entity::find()
        .filter(storage_pool_config::Column::StoragePoolId.eq(pool_id))
        .all(db)
        .await
        .map_err(db_error)?;

    Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
}

/// 所有存储池名称，按名称排序
pub async fn pool_names<C: ConnectionTrait>(db: &C) -> Result<Vec<String>> {
    let pools = storage_pool::Entity::find()
        .order_by_asc(storage_pool::Column::Name)
        .all(db)
        .await
        .map_err(db_error)?;

    Ok(pools.into_iter().map(|pool| pool.name).collect())
}

/// 在一个事务中写入存储池及其配置
pub async fn pool_create(db: &DatabaseConnection, name: &str, driver: &str, config: &ConfigMap) -> Result<i32> {
    let txn = db.begin().await.map_err(db_error)?;

    let pool = storage_pool::ActiveModel {
        name: Set(name.to_string()),
        driver: Set(driver.to_string()),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(db_error)?;

    pool_config_add(&txn, pool.id, config).await?;
    txn.commit().await.map_err(db_error)?;

    Ok(pool.id)
}

async fn pool_config_add<C: ConnectionTrait>(db: &C, pool_id: i32, config: &ConfigMap) -> Result<()> {
    let rows: Vec<storage_pool_config::ActiveModel> = config
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| storage_pool_config::ActiveModel {
            storage_pool_id: Set(pool_id),
            key: Set(key.clone()),
            value: Set(value.clone()),
            ..Default::default()
        })
        .collect();

    if rows.is_empty() {
        return Ok(());
    }
    storage_pool_config::Entity::insert_many(rows)
        .exec(db)
        .await
        .map_err(db_error)?;
    Ok(())
}

async fn pool_config_clear<C: ConnectionTrait>(db: &C, pool_id: i32) -> Result<()> {
    storage_pool_config::Entity::delete_many()
        .filter(storage_pool_config::Column::StoragePoolId.eq(pool_id))
        .exec(db)
        .await
        .map_err(db_error)?;
    Ok(())
}

/// 用新配置整体替换存储池配置
pub async fn pool_update(db: &DatabaseConnection, pool_id: i32, config: &ConfigMap) -> Result<()> {
    let txn = db.begin().await.map_err(db_error)?;
    pool_config_clear(&txn, pool_id).await?;
    pool_config_add(&txn, pool_id, config).await?;
    txn.commit().await.map_err(db_error)
}

/// 删除存储池记录及其配置
pub async fn pool_delete(db: &DatabaseConnection, pool_id: i32) -> Result<()> {
    let txn = db.begin().await.map_err(db_error)?;
    pool_config_clear(&txn, pool_id).await?;

    let result = storage_pool::Entity::delete_by_id(pool_id)
        .exec(&txn)
        .await
        .map_err(db_error)?;
    if result.rows_affected == 0 {
        return Err(Error::NotFound(format!("存储池 #{}", pool_id)));
    }

    txn.commit().await.map_err(db_error)
}

/// 存储池中指定类型的存储卷（带配置），按名称排序
pub async fn pool_volumes_get<C: ConnectionTrait>(
    db: &C,
    pool_id: i32,
    types: &[VolumeType],
) -> Result<Vec<StorageVolume>> {
    let codes: Vec<i32> = types.iter().map(VolumeType::code).collect();
    let rows = storage_volume::Entity::find()
        .filter(storage_volume::Column::StoragePoolId.eq(pool_id))
        .filter(storage_volume::Column::VolumeType.is_in(codes))
        .order_by_asc(storage_volume::Column::Name)
        .all(db)
        .await
        .map_err(db_error)?;

    let mut volumes = Vec::with_capacity(rows.len());
    for row in rows {
        let config = volume_config_get(db, row.id).await?;
        volumes.push(StorageVolume {
            id: row.id,
            name: row.name,
            volume_type: stored_volume_type(row.volume_type)?,
            pool_id: row.storage_pool_id,
            config,
        });
    }
    Ok(volumes)
}

/// 存储池中所有类型存储卷的数量
pub async fn pool_volume_count<C: ConnectionTrait>(db: &C, pool_id: i32) -> Result<u64> {
    storage_volume::Entity::find()
        .filter(storage_volume::Column::StoragePoolId.eq(pool_id))
        .count(db)
        .await
        .map_err(db_error)
}

// ==================== 存储卷 ====================

/// 库中的类型编码只会由本模块写入，无法识别说明数据已损坏
fn stored_volume_type(code: i32) -> Result<VolumeType> {
    VolumeType::from_code(code)
        .map_err(|_| Error::Consistency(format!("存储卷类型编码 {} 无法识别", code)))
}

async fn volume_row<C: ConnectionTrait>(
    db: &C,
    name: &str,
    volume_type: VolumeType,
    pool_id: i32,
) -> Result<storage_volume::Model> {
    storage_volume::Entity::find()
        .filter(storage_volume::Column::Name.eq(name))
        .filter(storage_volume::Column::VolumeType.eq(volume_type.code()))
        .filter(storage_volume::Column::StoragePoolId.eq(pool_id))
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| Error::NotFound(format!("存储池 #{} 中的 {} 存储卷 {}", pool_id, volume_type, name)))
}

pub async fn volume_get_type_id<C: ConnectionTrait>(
    db: &C,
    name: &str,
    volume_type: VolumeType,
    pool_id: i32,
) -> Result<i32> {
    Ok(volume_row(db, name, volume_type, pool_id).await?.id)
}

pub async fn volume_get<C: ConnectionTrait>(
    db: &C,
    name: &str,
    volume_type: VolumeType,
    pool_id: i32,
) -> Result<StorageVolume> {
    let row = volume_row(db, name, volume_type, pool_id).await?;
    let config = volume_config_get(db, row.id).await?;
    Ok(StorageVolume {
        id: row.id,
        name: row.name,
        volume_type,
        pool_id,
        config,
    })
}

pub async fn volume_config_get<C: ConnectionTrait>(db: &C, volume_id: i32) -> Result<ConfigMap> {
    let rows = storage_volume_config::Entity::find()
        .filter(storage_volume_config::Column::StorageVolumeId.eq(volume_id))
        .all(db)
        .await
        .map_err(db_error)?;

    Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
}

async fn volume_config_add<C: ConnectionTrait>(db: &C, volume_id: i32, config: &ConfigMap) -> Result<()> {
    let rows: Vec<storage_volume_config::ActiveModel> = config
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| storage_volume_config::ActiveModel {
            storage_volume_id: Set(volume_id),
            key: Set(key.clone()),
            value: Set(value.clone()),
            ..Default::default()
        })
        .collect();

    if rows.is_empty() {
        return Ok(());
    }
    storage_volume_config::Entity::insert_many(rows)
        .exec(db)
        .await
        .map_err(db_error)?;
    Ok(())
}

async fn volume_config_clear<C: ConnectionTrait>(db: &C, volume_id: i32) -> Result<()> {
    storage_volume_config::Entity::delete_many()
        .filter(storage_volume_config::Column::StorageVolumeId.eq(volume_id))
        .exec(db)
        .await
        .map_err(db_error)?;
    Ok(())
}

pub async fn volume_create(
    db: &DatabaseConnection,
    name: &str,
    volume_type: VolumeType,
    pool_id: i32,
    config: &ConfigMap,
) -> Result<i32> {
    let txn = db.begin().await.map_err(db_error)?;

    // 存储池可能在调用方查询之后被删除
    if storage_pool::Entity::find_by_id(pool_id)
        .one(&txn)
        .await
        .map_err(db_error)?
        .is_none()
    {
        return Err(Error::NotFound(format!("存储池 #{}", pool_id)));
    }

    let volume = storage_volume::ActiveModel {
        name: Set(name.to_string()),
        storage_pool_id: Set(pool_id),
        volume_type: Set(volume_type.code()),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .map_err(db_error)?;

    volume_config_add(&txn, volume.id, config).await?;
    txn.commit().await.map_err(db_error)?;

    Ok(volume.id)
}

pub async fn volume_update(db: &DatabaseConnection, volume_id: i32, config: &ConfigMap) -> Result<()> {
    let txn = db.begin().await.map_err(db_error)?;
    volume_config_clear(&txn, volume_id).await?;
    volume_config_add(&txn, volume_id, config).await?;
    txn.commit().await.map_err(db_error)
}

pub async fn volume_delete(db: &DatabaseConnection, volume_id: i32) -> Result<()> {
    let txn = db.begin().await.map_err(db_error)?;
    volume_config_clear(&txn, volume_id).await?;

    let result = storage_volume::Entity::delete_by_id(volume_id)
        .exec(&txn)
        .await
        .map_err(db_error)?;
    if result.rows_affected == 0 {
        return Err(Error::NotFound(format!("存储卷 #{}", volume_id)));
    }

    txn.commit().await.map_err(db_error)
}

/// 存储池配置行的 id，测试中据此判断是否发生过写入
#[cfg(test)]
pub async fn pool_config_row_ids<C: ConnectionTrait>(db: &C, pool_id: i32) -> Result<Vec<i32>> {
    let rows = storage_pool_config::Entity::find()
        .filter(storage_pool_config::Column::StoragePoolId.eq(pool_id))
        .order_by_asc(storage_pool_config::Column::Id)
        .all(db)
        .await
        .map_err(db_error)?;
    Ok(rows.into_iter().map(|row| row.id).collect())
}

#[cfg(test)]
pub async fn volume_config_row_ids<C: ConnectionTrait>(db: &C, volume_id: i32) -> Result<Vec<i32>> {
    let rows = storage_volume_config::Entity::find()
        .filter(storage_volume_config::Column::StorageVolumeId.eq(volume_id))
        .order_by_asc(storage_volume_config::Column::Id)
        .all(db)
        .await
        .map_err(db_error)?;
    Ok(rows.into_iter().map(|row| row.id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn config(pairs: &[(&str, &str)]) -> ConfigMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_pool_crud() {
        let db = test_db().await;
        let id = pool_create(&db, "p1", "mock", &config(&[("size", "10GB"), ("empty", "")]))
            .await
            .unwrap();

        let pool = pool_get(&db, "p1").await.unwrap();
        assert_eq!(pool.id, id);
        assert_eq!(pool.driver, "mock");
        // 空值不落库
        assert_eq!(pool.config, config(&[("size", "10GB")]));
        assert_eq!(pool_get_id(&db, "p1").await.unwrap(), id);

        pool_update(&db, id, &config(&[("user.a", "1")])).await.unwrap();
        assert_eq!(pool_get(&db, "p1").await.unwrap().config, config(&[("user.a", "1")]));

        pool_create(&db, "a0", "dir", &ConfigMap::new()).await.unwrap();
        assert_eq!(pool_names(&db).await.unwrap(), vec!["a0", "p1"]);

        pool_delete(&db, id).await.unwrap();
        assert!(pool_get(&db, "p1").await.unwrap_err().is_not_found());
        assert!(pool_config_get(&db, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_pool_name_rejected() {
        let db = test_db().await;
        pool_create(&db, "p1", "mock", &ConfigMap::new()).await.unwrap();
        assert!(pool_create(&db, "p1", "dir", &ConfigMap::new()).await.is_err());
        assert_eq!(pool_names(&db).await.unwrap(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_volume_crud() {
        let db = test_db().await;
        let pool_id = pool_create(&db, "p1", "mock", &ConfigMap::new()).await.unwrap();

        let id = volume_create(&db, "data", VolumeType::Custom, pool_id, &config(&[("size", "1GB")]))
            .await
            .unwrap();
        volume_create(&db, "c1", VolumeType::Container, pool_id, &ConfigMap::new())
            .await
            .unwrap();
        // 同名不同类型可以共存
        volume_create(&db, "data", VolumeType::Image, pool_id, &ConfigMap::new())
            .await
            .unwrap();
        assert!(volume_create(&db, "data", VolumeType::Custom, pool_id, &ConfigMap::new())
            .await
            .is_err());

        assert_eq!(volume_get_type_id(&db, "data", VolumeType::Custom, pool_id).await.unwrap(), id);
        let volume = volume_get(&db, "data", VolumeType::Custom, pool_id).await.unwrap();
        assert_eq!(volume.config, config(&[("size", "1GB")]));

        let non_custom = pool_volumes_get(&db, pool_id, &[VolumeType::Container, VolumeType::Image])
            .await
            .unwrap();
        let names: Vec<(String, VolumeType)> =
            non_custom.into_iter().map(|v| (v.name, v.volume_type)).collect();
        assert_eq!(
            names,
            vec![
                ("c1".to_string(), VolumeType::Container),
                ("data".to_string(), VolumeType::Image)
            ]
        );
        assert_eq!(pool_volume_count(&db, pool_id).await.unwrap(), 3);

        volume_update(&db, id, &config(&[("size", "2GB")])).await.unwrap();
        assert_eq!(volume_config_get(&db, id).await.unwrap(), config(&[("size", "2GB")]));

        volume_delete(&db, id).await.unwrap();
        assert!(volume_get(&db, "data", VolumeType::Custom, pool_id)
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(pool_volume_count(&db, pool_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_volume_create_on_deleted_pool() {
        let db = test_db().await;
        let pool_id = pool_create(&db, "gone", "mock", &ConfigMap::new()).await.unwrap();
        pool_delete(&db, pool_id).await.unwrap();

        let err = volume_create(&db, "data", VolumeType::Custom, pool_id, &ConfigMap::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unknown_stored_type_is_consistency_error() {
        assert_eq!(stored_volume_type(2).unwrap(), VolumeType::Custom);
        assert!(matches!(stored_volume_type(9), Err(Error::Consistency(_))));
    }
}
