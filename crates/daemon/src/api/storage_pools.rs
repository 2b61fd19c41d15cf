/// 存储池接口

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
use crate::db::models::storage_pool::{CreateStoragePoolDto, UpdateStoragePoolDto};
use crate::services::StoragePoolService;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_storage_pools).post(create_storage_pool))
        .route(
            "/:pool",
            get(get_storage_pool)
                .put(update_storage_pool)
                .patch(patch_storage_pool)
                .delete(delete_storage_pool),
        )
}

/// 创建存储池
async fn create_storage_pool(
    State(state): State<AppState>,
    Json(dto): Json<CreateStoragePoolDto>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_pool(&dto.name).await;
    let pool = StoragePoolService::new(state.clone()).create(dto).await?;
    let location = paths::storage_pool(&pool.name);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(pool)))
}

/// 获取存储池列表
async fn list_storage_pools(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let pools = StoragePoolService::new(state).list().await?;
    Ok(Json(pools))
}

/// 获取单个存储池
async fn get_storage_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let pool = StoragePoolService::new(state).get(&pool).await?;
    Ok(Json(pool))
}

/// 整体替换存储池配置
async fn update_storage_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(dto): Json<UpdateStoragePoolDto>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_pool(&pool).await;
    let pool = StoragePoolService::new(state.clone()).update(&pool, dto.config).await?;
    Ok(Json(pool))
}

/// 合并存储池配置
async fn patch_storage_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
    Json(dto): Json<UpdateStoragePoolDto>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_pool(&pool).await;
    let pool = StoragePoolService::new(state.clone()).patch(&pool, dto.config).await?;
    Ok(Json(pool))
}

/// 删除存储池
async fn delete_storage_pool(
    State(state): State<AppState>,
    Path(pool): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.locks.lock_pool(&pool).await;
    StoragePoolService::new(state.clone()).delete(&pool).await?;
    Ok(StatusCode::NO_CONTENT)
}
