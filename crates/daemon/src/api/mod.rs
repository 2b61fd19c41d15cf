pub mod error;
pub mod locks;
pub mod storage_pools;
pub mod storage_volumes;

use axum::Router;

use crate::app_state::AppState;

/// 所有 API 路由（统一入口，挂在 `/1.0` 下）
pub fn api_routes() -> Router<AppState> {
    Router::new().nest(
        "/storage-pools",
        storage_pools::routes().merge(storage_volumes::routes()),
    )
}
