use chrono::{DateTime, Utc};
use diesel::prelude::*;
use hostel_allotment_core::models::{
    Allotment, AllotmentWindow, HistoryEntry, Hostel, NewHistoryEntry, NewWindow, Profile, Room,
};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::schema::{allotment_windows, allotments, hostels, room_change_history, rooms, users};

fn non_negative(column: &str, value: i32) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|_| DatabaseError::InvalidData(format!("{column} {value}")))
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = hostels)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HostelRow {
    pub id: Uuid,
    pub name: String,
    pub total_rooms: i32,
}

impl TryFrom<HostelRow> for Hostel {
    type Error = DatabaseError;

    fn try_from(row: HostelRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            name: row.name,
            total_rooms: non_negative("total_rooms", row.total_rooms)?,
        })
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = rooms)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct RoomRow {
    pub id: Uuid,
    pub hostel_id: Uuid,
    pub room_number: String,
    pub floor: i32,
    pub capacity: i32,
    pub is_blocked: bool,
    pub block_reason: Option<String>,
}

impl TryFrom<RoomRow> for Room {
    type Error = DatabaseError;

    fn try_from(row: RoomRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            hostel_id: row.hostel_id.into(),
            room_number: row.room_number,
            floor: row.floor,
            capacity: non_negative("capacity", row.capacity)?,
            is_blocked: row.is_blocked,
            block_reason: row.block_reason,
        })
    }
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = allotments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AllotmentRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub room_id: Uuid,
    pub allotted_at: DateTime<Utc>,
}

impl From<AllotmentRow> for Allotment {
    fn from(row: AllotmentRow) -> Self {
        Self {
            id: row.id.into(),
            student_id: row.user_id.into(),
            room_id: row.room_id.into(),
            allotted_at: row.allotted_at,
        }
    }
}

impl From<&Allotment> for AllotmentRow {
    fn from(allotment: &Allotment) -> Self {
        Self {
            id: allotment.id.0,
            user_id: allotment.student_id.0,
            room_id: allotment.room_id.0,
            allotted_at: allotment.allotted_at,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = allotment_windows)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WindowRow {
    pub id: Uuid,
    pub title: String,
    pub open_at: DateTime<Utc>,
    pub close_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

impl From<WindowRow> for AllotmentWindow {
    fn from(row: WindowRow) -> Self {
        Self {
            id: row.id.into(),
            title: row.title,
            open_at: row.open_at,
            close_at: row.close_at,
            created_by: row.created_by.map(Into::into),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = allotment_windows)]
pub struct NewWindowRow {
    pub id: Uuid,
    pub title: String,
    pub open_at: DateTime<Utc>,
    pub close_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

impl From<NewWindow> for NewWindowRow {
    fn from(window: NewWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: window.title,
            open_at: window.open_at,
            close_at: window.close_at,
            created_by: window.created_by.map(|id| id.0),
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = room_change_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HistoryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub old_room_id: Option<Uuid>,
    pub new_room_id: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id.into(),
            student_id: row.user_id.into(),
            old_room_id: row.old_room_id.map(Into::into),
            new_room_id: row.new_room_id.map(Into::into),
            changed_at: row.changed_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = room_change_history)]
pub struct NewHistoryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub old_room_id: Option<Uuid>,
    pub new_room_id: Option<Uuid>,
    pub changed_at: DateTime<Utc>,
}

impl From<NewHistoryEntry> for NewHistoryRow {
    fn from(entry: NewHistoryEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: entry.student_id.0,
            old_room_id: entry.old_room_id.map(|id| id.0),
            new_room_id: entry.new_room_id.map(|id| id.0),
            changed_at: entry.changed_at,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub branch: Option<String>,
    pub year: Option<i32>,
}

impl TryFrom<UserRow> for Profile {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            role: row
                .role
                .parse()
                .map_err(|err| DatabaseError::InvalidData(format!("{err}")))?,
            email: row.email,
            name: row.name,
            branch: row.branch,
            year: row.year,
        })
    }
}
