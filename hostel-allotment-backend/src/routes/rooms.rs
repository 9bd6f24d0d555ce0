use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::Json;
use hostel_allotment_core::models::HostelId;
use hostel_allotment_core::ReadStore;

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::routes::{room_views, Detail, RoomView};

/// Ordered by floor, then room number.
pub async fn list(
    _user: CurrentUser,
    State(store): State<Arc<dyn ReadStore>>,
    hostel: Result<Path<HostelId>, PathRejection>,
) -> Result<Json<Vec<RoomView>>, AppError> {
    let Path(hostel) = hostel?;
    Ok(Json(
        room_views(store.as_ref(), Some(hostel), Detail::Student).await?,
    ))
}
