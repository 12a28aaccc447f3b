use crate::version::{version_info, VersionInfo};
use axum::Json;

/// GET /version - build metadata
pub async fn get_version() -> Json<VersionInfo> {
    Json(version_info())
}
