use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new_random() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

id_type!(
    /// Identity issued by the identity provider. Students and admins share it.
    UserId
);
id_type!(HostelId);
id_type!(RoomId);
id_type!(AllotmentId);
id_type!(WindowId);
id_type!(HistoryId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostel {
    pub id: HostelId,
    pub name: String,
    pub total_rooms: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hostel_id: HostelId,
    pub room_number: String,
    pub floor: i32,
    pub capacity: u32,
    pub is_blocked: bool,
    /// Only present while the room is blocked.
    pub block_reason: Option<String>,
}

/// The binding of one student to one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allotment {
    pub id: AllotmentId,
    pub student_id: UserId,
    pub room_id: RoomId,
    pub allotted_at: DateTime<Utc>,
}

impl Allotment {
    #[must_use]
    pub fn new(student_id: UserId, room_id: RoomId, allotted_at: DateTime<Utc>) -> Self {
        Self {
            id: AllotmentId::new_random(),
            student_id,
            room_id,
            allotted_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllotmentWindow {
    pub id: WindowId,
    pub title: String,
    pub open_at: DateTime<Utc>,
    pub close_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
}

impl AllotmentWindow {
    /// Both bounds are inclusive.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.open_at <= now && now <= self.close_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWindow {
    pub title: String,
    pub open_at: DateTime<Utc>,
    pub close_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
}

/// Append-only audit record of a room change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: HistoryId,
    pub student_id: UserId,
    /// `None` for a first-time allotment.
    pub old_room_id: Option<RoomId>,
    /// `None` for an administrative unassignment.
    pub new_room_id: Option<RoomId>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewHistoryEntry {
    pub student_id: UserId,
    pub old_room_id: Option<RoomId>,
    pub new_room_id: Option<RoomId>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Admin => "admin",
        }
    }
}

impl core::str::FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "student" => Ok(Self::Student),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownRole(other.to_owned())),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown role {0:?}")]
pub struct UnknownRole(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub branch: Option<String>,
    pub year: Option<i32>,
}
