/// 容器与 profile 的只读查询
///
/// 存储用量扫描只需要名称和设备，写入接口仅用于初始化默认 profile

use common::models::Devices;
use common::{Error, Result};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use super::db_error;
use super::models::container::{self, CTYPE_REGULAR};
use super::models::profile;

/// 所有普通容器（不含快照）的名称
pub async fn container_names<C: ConnectionTrait>(db: &C) -> Result<Vec<String>> {
    let containers = container::Entity::find()
        .filter(container::Column::Ctype.eq(CTYPE_REGULAR))
        .order_by_asc(container::Column::Name)
        .all(db)
        .await
        .map_err(db_error)?;

    Ok(containers.into_iter().map(|c| c.name).collect())
}

/// 容器自身定义的设备（不含从 profile 继承的）
pub async fn container_local_devices<C: ConnectionTrait>(db: &C, name: &str) -> Result<Devices> {
    let container = container::Entity::find()
        .filter(container::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| Error::NotFound(format!("容器 {}", name)))?;

    Ok(serde_json::from_value(container.devices)?)
}

pub async fn profile_names<C: ConnectionTrait>(db: &C) -> Result<Vec<String>> {
    let profiles = profile::Entity::find()
        .order_by_asc(profile::Column::Name)
        .all(db)
        .await
        .map_err(db_error)?;

    Ok(profiles.into_iter().map(|p| p.name).collect())
}

pub async fn profile_devices<C: ConnectionTrait>(db: &C, name: &str) -> Result<Devices> {
    let profile = profile::Entity::find()
        .filter(profile::Column::Name.eq(name))
        .one(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| Error::NotFound(format!("profile {}", name)))?;

    Ok(serde_json::from_value(profile.devices)?)
}

pub async fn profile_create<C: ConnectionTrait>(
    db: &C,
    name: &str,
    description: &str,
    devices: &Devices,
) -> Result<i32> {
    let profile = profile::ActiveModel {
        name: Set(name.to_string()),
        description: Set(description.to_string()),
        devices: Set(serde_json::to_value(devices)?),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(db_error)?;

    Ok(profile.id)
}

#[cfg(test)]
pub async fn container_create<C: ConnectionTrait>(
    db: &C,
    name: &str,
    snapshot: bool,
    devices: &Devices,
) -> Result<i32> {
    let container = container::ActiveModel {
        name: Set(name.to_string()),
        ctype: Set(if snapshot { container::CTYPE_SNAPSHOT } else { CTYPE_REGULAR }),
        devices: Set(serde_json::to_value(devices)?),
        ..Default::default()
    }
    .insert(db)
    .await
    .map_err(db_error)?;

    Ok(container.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{test_db, DEFAULT_PROFILE};
    use common::models::Device;

    fn disk(pairs: &[(&str, &str)]) -> Device {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn test_default_profile_seeded() {
        let db = test_db().await;
        assert_eq!(profile_names(&db).await.unwrap(), vec![DEFAULT_PROFILE]);
        assert!(profile_devices(&db, DEFAULT_PROFILE).await.unwrap().is_empty());
        assert!(profile_devices(&db, "missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_snapshots_not_listed() {
        let db = test_db().await;
        let mut devices = Devices::new();
        devices.insert("root".to_string(), disk(&[("type", "disk"), ("pool", "p1")]));

        container_create(&db, "c1", false, &devices).await.unwrap();
        container_create(&db, "c1/snap0", true, &Devices::new()).await.unwrap();

        assert_eq!(container_names(&db).await.unwrap(), vec!["c1"]);
        let loaded = container_local_devices(&db, "c1").await.unwrap();
        assert_eq!(loaded["root"]["pool"], "p1");
    }
}
