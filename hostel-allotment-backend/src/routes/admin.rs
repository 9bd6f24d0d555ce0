//! Warden dashboard. Every handler requires the admin role and goes through
//! the service store.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use hostel_allotment_core::models::{
    Allotment, AllotmentWindow, NewWindow, Profile, Room, RoomId, UserId,
};
use hostel_allotment_core::occupancy::{OccupancyIndex, Vacancy, VacancyStatus};
use hostel_allotment_core::{is_window_open, AdminOverride, AllotmentStore};
use serde::{Deserialize, Serialize};

use crate::auth::RequireAdmin;
use crate::error::AppError;
use crate::routes::{room_views, Detail, RoomSummary, RoomView};

const RECENT_WINDOWS: usize = 5;

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total_students: usize,
    pub total_rooms: usize,
    pub total_allotments: usize,
    pub blocked_rooms: usize,
    pub available_rooms: usize,
}

pub async fn stats(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
) -> Result<Json<Stats>, AppError> {
    let rooms = store.rooms(None).await?;
    let blocked_rooms = rooms.iter().filter(|room| room.is_blocked).count();
    Ok(Json(Stats {
        total_students: store.students(None).await?.len(),
        total_rooms: rooms.len(),
        total_allotments: store.allotments(None).await?.len(),
        blocked_rooms,
        available_rooms: rooms.len() - blocked_rooms,
    }))
}

pub async fn rooms(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
) -> Result<Json<Vec<RoomView>>, AppError> {
    Ok(Json(room_views(store.as_ref(), None, Detail::Admin).await?))
}

#[derive(Serialize)]
pub struct StudentSummary {
    pub name: String,
    pub email: String,
    pub branch: Option<String>,
    pub year: Option<i32>,
}

impl From<&Profile> for StudentSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            name: profile.name.clone(),
            email: profile.email.clone(),
            branch: profile.branch.clone(),
            year: profile.year,
        }
    }
}

#[derive(Serialize)]
pub struct AdminAllotmentView {
    #[serde(flatten)]
    pub allotment: Allotment,
    pub student: Option<StudentSummary>,
    pub room: Option<RoomSummary>,
}

/// Newest first.
pub async fn allotments(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
) -> Result<Json<Vec<AdminAllotmentView>>, AppError> {
    let allotments = store.allotments(None).await?;
    let student_ids: Vec<UserId> = allotments.iter().map(|a| a.student_id).collect();
    let profiles: HashMap<UserId, Profile> = store
        .profiles(&student_ids)
        .await?
        .into_iter()
        .map(|profile| (profile.id, profile))
        .collect();
    let rooms: HashMap<RoomId, Room> = store
        .rooms(None)
        .await?
        .into_iter()
        .map(|room| (room.id, room))
        .collect();
    let hostels = store.hostels().await?;

    Ok(Json(
        allotments
            .into_iter()
            .map(|allotment| AdminAllotmentView {
                student: profiles.get(&allotment.student_id).map(StudentSummary::from),
                room: rooms
                    .get(&allotment.room_id)
                    .map(|room| RoomSummary::new(room, &hostels)),
                allotment,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct StudentSearch {
    search: Option<String>,
}

pub async fn students(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
    query: Result<Query<StudentSearch>, QueryRejection>,
) -> Result<Json<Vec<Profile>>, AppError> {
    let Query(query) = query?;
    Ok(Json(store.students(query.search.as_deref()).await?))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    #[serde(alias = "user_id")]
    student_id: Option<UserId>,
    room_id: Option<RoomId>,
}

#[derive(Serialize)]
pub struct AssignResponse {
    pub message: &'static str,
    pub allotment: Allotment,
    pub switched: bool,
}

/// Places a student regardless of the allotment window.
pub async fn assign(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
    payload: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AssignResponse>), AppError> {
    let Json(request) = payload?;
    let (Some(student_id), Some(room_id)) = (request.student_id, request.room_id) else {
        return Err(AppError::Validation(
            "student_id and room_id are required".to_owned(),
        ));
    };
    if store.profile(student_id).await?.is_none() {
        return Err(AppError::NotFound("Student not found".to_owned()));
    }

    let commit = AdminOverride::new(store.as_ref())
        .assign(student_id, room_id, Utc::now())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(AssignResponse {
            message: "Room assigned",
            allotment: commit.allotment,
            switched: commit.switched,
        }),
    ))
}

#[derive(Deserialize)]
pub struct UnassignRequest {
    #[serde(alias = "user_id")]
    student_id: Option<UserId>,
}

#[derive(Serialize)]
pub struct UnassignResponse {
    pub message: &'static str,
    /// The removed allotment, `None` if the student held no room.
    pub allotment: Option<Allotment>,
}

pub async fn unassign(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
    payload: Result<Json<UnassignRequest>, JsonRejection>,
) -> Result<Json<UnassignResponse>, AppError> {
    let Json(request) = payload?;
    let student_id = request
        .student_id
        .ok_or_else(|| AppError::Validation("student_id is required".to_owned()))?;
    let allotment = AdminOverride::new(store.as_ref())
        .unassign(student_id, Utc::now())
        .await?;
    Ok(Json(UnassignResponse {
        message: "Student unassigned from room",
        allotment,
    }))
}

#[derive(Deserialize)]
pub struct BlockRequest {
    room_id: Option<RoomId>,
    reason: Option<String>,
}

#[derive(Serialize)]
pub struct RoomResponse {
    pub message: &'static str,
    pub room: Room,
}

fn required_room(room_id: Option<RoomId>) -> Result<RoomId, AppError> {
    room_id.ok_or_else(|| AppError::Validation("room_id is required".to_owned()))
}

pub async fn block_room(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
    payload: Result<Json<BlockRequest>, JsonRejection>,
) -> Result<Json<RoomResponse>, AppError> {
    let Json(request) = payload?;
    let room = AdminOverride::new(store.as_ref())
        .block_room(required_room(request.room_id)?, request.reason)
        .await?;
    Ok(Json(RoomResponse {
        message: "Room blocked",
        room,
    }))
}

pub async fn unblock_room(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
    payload: Result<Json<BlockRequest>, JsonRejection>,
) -> Result<Json<RoomResponse>, AppError> {
    let Json(request) = payload?;
    let room = AdminOverride::new(store.as_ref())
        .unblock_room(required_room(request.room_id)?)
        .await?;
    Ok(Json(RoomResponse {
        message: "Room unblocked",
        room,
    }))
}

#[derive(Serialize)]
pub struct VacancyView {
    pub id: RoomId,
    pub room_number: String,
    pub floor: i32,
    pub capacity: u32,
    pub is_blocked: bool,
    #[serde(flatten)]
    pub vacancy: Vacancy,
    pub status: VacancyStatus,
}

/// Ordered by floor, then room number.
pub async fn vacancy_map(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
) -> Result<Json<Vec<VacancyView>>, AppError> {
    let rooms = store.rooms(None).await?;
    let allotments = store.allotments(None).await?;
    let index = OccupancyIndex::from_allotments(&allotments);
    Ok(Json(
        rooms
            .into_iter()
            .map(|room| {
                let occupied = index.occupancy(room.id);
                VacancyView {
                    vacancy: Vacancy::of(&room, occupied),
                    status: VacancyStatus::of(&room, occupied),
                    id: room.id,
                    room_number: room.room_number,
                    floor: room.floor,
                    capacity: room.capacity,
                    is_blocked: room.is_blocked,
                }
            })
            .collect(),
    ))
}

#[derive(Serialize)]
pub struct WindowsResponse {
    pub windows: Vec<AllotmentWindow>,
    pub active: Option<AllotmentWindow>,
}

pub async fn windows(
    _admin: RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
) -> Result<Json<WindowsResponse>, AppError> {
    let windows = store.recent_windows(RECENT_WINDOWS).await?;
    let active = is_window_open(store.as_ref(), Utc::now()).await.active_window;
    Ok(Json(WindowsResponse { windows, active }))
}

#[derive(Deserialize)]
pub struct WindowRequest {
    title: Option<String>,
    open_at: Option<DateTime<Utc>>,
    close_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct WindowCreated {
    pub message: &'static str,
    pub window: AllotmentWindow,
}

/// Overlapping an existing window is allowed.
pub async fn create_window(
    RequireAdmin(admin): RequireAdmin,
    State(store): State<Arc<dyn AllotmentStore>>,
    payload: Result<Json<WindowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<WindowCreated>), AppError> {
    let Json(request) = payload?;
    let (Some(title), Some(open_at), Some(close_at)) =
        (request.title, request.open_at, request.close_at)
    else {
        return Err(AppError::Validation(
            "title, open_at, close_at are required".to_owned(),
        ));
    };
    let window = AdminOverride::new(store.as_ref())
        .create_window(NewWindow {
            title,
            open_at,
            close_at,
            created_by: Some(admin.id),
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(WindowCreated {
            message: "Allotment window created",
            window,
        }),
    ))
}
