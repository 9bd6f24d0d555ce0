pub mod admin;
pub mod allot;
pub mod health;
pub mod hostels;
pub mod profile;
pub mod rooms;
pub mod verify;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hostel_allotment_core::models::{Allotment, Hostel, HostelId, Profile, Room, RoomId, UserId};
use hostel_allotment_core::occupancy::{OccupancyIndex, RoomStatus};
use hostel_allotment_core::{ReadStore, StoreError};
use serde::Serialize;

/// Where a student lives, for responses that embed an allotment.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_number: String,
    pub floor: i32,
    pub capacity: u32,
    pub hostel_id: HostelId,
    pub hostel_name: Option<String>,
}

impl RoomSummary {
    fn new(room: &Room, hostels: &[Hostel]) -> Self {
        Self {
            room_number: room.room_number.clone(),
            floor: room.floor,
            capacity: room.capacity,
            hostel_id: room.hostel_id,
            hostel_name: hostel_name(hostels, room.hostel_id),
        }
    }
}

fn hostel_name(hostels: &[Hostel], id: HostelId) -> Option<String> {
    hostels
        .iter()
        .find(|hostel| hostel.id == id)
        .map(|hostel| hostel.name.clone())
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AllotmentView {
    #[serde(flatten)]
    pub allotment: Allotment,
    pub room: Option<RoomSummary>,
}

/// Joins the allotment with its room and hostel.
pub async fn allotment_view<S: ReadStore + ?Sized>(
    store: &S,
    allotment: Allotment,
) -> Result<AllotmentView, StoreError> {
    let room = match store.room(allotment.room_id).await? {
        Some(room) => Some(RoomSummary::new(&room, &store.hostels().await?)),
        None => None,
    };
    Ok(AllotmentView { allotment, room })
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    pub user_id: UserId,
    pub name: String,
    pub branch: String,
    pub year: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allotted_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RoomView {
    #[serde(flatten)]
    pub room: Room,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostel_name: Option<String>,
    pub occupants: Vec<Occupant>,
    pub occupied: u32,
    pub available: u32,
    pub status: RoomStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Name, branch and year of the occupants.
    Student,
    /// Adds e-mail, allotment time and the hostel name.
    Admin,
}

/// Rooms with their live occupants. Occupants without a profile are shown
/// as "Unknown".
pub async fn room_views<S: ReadStore + ?Sized>(
    store: &S,
    hostel: Option<HostelId>,
    detail: Detail,
) -> Result<Vec<RoomView>, StoreError> {
    let rooms = store.rooms(hostel).await?;
    let room_ids: Vec<RoomId> = rooms.iter().map(|room| room.id).collect();
    let allotments = if hostel.is_some() {
        store.allotments(Some(room_ids.as_slice())).await?
    } else {
        store.allotments(None).await?
    };
    let student_ids: Vec<UserId> = allotments.iter().map(|a| a.student_id).collect();
    let profiles: HashMap<UserId, Profile> = store
        .profiles(&student_ids)
        .await?
        .into_iter()
        .map(|profile| (profile.id, profile))
        .collect();
    let hostels = match detail {
        Detail::Admin => store.hostels().await?,
        Detail::Student => Vec::new(),
    };

    let index = OccupancyIndex::from_allotments(&allotments);
    let mut occupants: HashMap<RoomId, Vec<Occupant>> = HashMap::new();
    for allotment in &allotments {
        let profile = profiles.get(&allotment.student_id);
        occupants
            .entry(allotment.room_id)
            .or_default()
            .push(Occupant {
                user_id: allotment.student_id,
                name: profile.map_or_else(|| "Unknown".to_owned(), |p| p.name.clone()),
                branch: profile.and_then(|p| p.branch.clone()).unwrap_or_default(),
                year: profile.and_then(|p| p.year).unwrap_or_default(),
                email: (detail == Detail::Admin)
                    .then(|| profile.map(|p| p.email.clone()).unwrap_or_default()),
                allotted_at: (detail == Detail::Admin).then_some(allotment.allotted_at),
            });
    }

    Ok(rooms
        .into_iter()
        .map(|room| {
            let occupied = index.occupancy(room.id);
            RoomView {
                hostel_name: (detail == Detail::Admin)
                    .then(|| hostel_name(&hostels, room.hostel_id).unwrap_or_default()),
                occupants: occupants.remove(&room.id).unwrap_or_default(),
                occupied,
                available: room.capacity.saturating_sub(occupied),
                status: RoomStatus::of(&room, occupied),
                room,
            }
        })
        .collect())
}
