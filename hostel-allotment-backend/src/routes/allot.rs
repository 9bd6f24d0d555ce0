use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use hostel_allotment_core::models::{Allotment, AllotmentWindow, RoomId};
use hostel_allotment_core::{
    is_window_open, AllotmentStore, Coordinator, ReadStore, WindowCheck, WindowState,
};
use serde::{Deserialize, Serialize};

use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::routes::{allotment_view, AllotmentView};

#[derive(Deserialize)]
pub struct AllotRequest {
    room_id: Option<RoomId>,
}

#[derive(Serialize)]
pub struct AllotResponse {
    pub message: &'static str,
    pub allotment: Allotment,
    pub switched: bool,
}

/// Claims a room, moving the caller out of their current one if needed.
pub async fn allot(
    user: CurrentUser,
    State(store): State<Arc<dyn AllotmentStore>>,
    payload: Result<Json<AllotRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AllotResponse>), AppError> {
    let Json(request) = payload?;
    let room_id = request
        .room_id
        .ok_or_else(|| AppError::Validation("room_id is required".to_owned()))?;

    let commit = Coordinator::new(store.as_ref())
        .execute(user.id(), room_id, WindowCheck::Enforced, Utc::now())
        .await?;
    let message = if commit.switched {
        "Room switched successfully!"
    } else {
        "Room allotted successfully!"
    };
    Ok((
        StatusCode::CREATED,
        Json(AllotResponse {
            message,
            allotment: commit.allotment,
            switched: commit.switched,
        }),
    ))
}

#[derive(Serialize)]
pub struct MyAllotment {
    pub allotment: Option<AllotmentView>,
}

pub async fn mine(
    user: CurrentUser,
    State(store): State<Arc<dyn ReadStore>>,
) -> Result<Json<MyAllotment>, AppError> {
    let allotment = match store.allotment_for_student(user.id()).await? {
        Some(allotment) => Some(allotment_view(store.as_ref(), allotment).await?),
        None => None,
    };
    Ok(Json(MyAllotment { allotment }))
}

#[derive(Serialize)]
pub struct WindowResponse {
    pub open: bool,
    pub window: Option<AllotmentWindow>,
}

impl From<WindowState> for WindowResponse {
    fn from(state: WindowState) -> Self {
        Self {
            open: state.open,
            window: state.active_window,
        }
    }
}

pub async fn window(
    _user: CurrentUser,
    State(store): State<Arc<dyn ReadStore>>,
) -> Json<WindowResponse> {
    Json(is_window_open(store.as_ref(), Utc::now()).await.into())
}
