/// 存储卷接口，挂在 `/storage-pools/:pool/volumes` 下

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use common::models::paths;

use crate::api::error::ApiError;
use crate::app_state::AppState;
use crate::db::models::storage_volume::{CreateStorageVolumeDto, UpdateStorageVolumeDto};
use crate::services::StorageVolumeService;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/:pool/volumes", get(list_volumes).post(create_volume))
        .route("/:pool/volumes/:type", get(list_volumes_by_type))
        .route(
            "/:pool/volumes/:type/:volume",
            get(get_volume)
                .put(update_volume)
                .patch(patch_volume)
                .delete(delete_volume),
        )
}

/// 创建自定义存储卷
async fn create_volume(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(dto): Json<CreateStorageVolumeDto>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_volume(&pool, &dto.volume_type, &dto.name).await;
    let volume = StorageVolumeService::new(state.clone()).create(&pool, dto).await?;
    let location = paths::storage_volume(&pool, &volume.volume_type, &volume.name);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(volume)))
}

/// 列出存储池中的全部存储卷
async fn list_volumes(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let volumes = StorageVolumeService::new(state).list(&pool, None).await?;
    Ok(Json(volumes))
}

async fn list_volumes_by_type(
    State(state): State<AppState>,
    Path((pool, volume_type)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let volumes = StorageVolumeService::new(state)
        .list(&pool, Some(&volume_type))
        .await?;
    Ok(Json(volumes))
}

/// 获取单个存储卷
async fn get_volume(
    State(state): State<AppState>,
    Path((pool, volume_type, volume)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let volume = StorageVolumeService::new(state)
        .get(&pool, &volume_type, &volume)
        .await?;
    Ok(Json(volume))
}

async fn update_volume(
    State(state): State<AppState>,
    Path((pool, volume_type, volume)): Path<(String, String, String)>,
    Json(dto): Json<UpdateStorageVolumeDto>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_volume(&pool, &volume_type, &volume).await;
    let volume = StorageVolumeService::new(state.clone())
        .update(&pool, &volume_type, &volume, dto.config)
        .await?;
    Ok(Json(volume))
}

async fn patch_volume(
    State(state): State<AppState>,
    Path((pool, volume_type, volume)): Path<(String, String, String)>,
    Json(dto): Json<UpdateStorageVolumeDto>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_volume(&pool, &volume_type, &volume).await;
    let volume = StorageVolumeService::new(state.clone())
        .patch(&pool, &volume_type, &volume, dto.config)
        .await?;
    Ok(Json(volume))
}

/// 删除自定义存储卷
async fn delete_volume(
    State(state): State<AppState>,
    Path((pool, volume_type, volume)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_volume(&pool, &volume_type, &volume).await;
    StorageVolumeService::new(state.clone())
        .delete(&pool, &volume_type, &volume)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
