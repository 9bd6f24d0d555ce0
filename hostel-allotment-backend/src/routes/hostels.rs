use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use hostel_allotment_core::models::Hostel;
use hostel_allotment_core::ReadStore;

use crate::auth::CurrentUser;
use crate::error::AppError;

pub async fn list(
    _user: CurrentUser,
    State(store): State<Arc<dyn ReadStore>>,
) -> Result<Json<Vec<Hostel>>, AppError> {
    Ok(Json(store.hostels().await?))
}
