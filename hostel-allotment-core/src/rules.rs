//! The allotment rule engine.
//!
//! [`decide`] is pure: it sees only the facts the caller gathered and never
//! touches the store.

use crate::models::Room;

/// Why an allotment was refused. The display text is shown to the student
/// verbatim.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    #[error("Allotment window is closed. Room changes are not allowed right now.")]
    WindowClosed,
    #[error("Room not found.")]
    RoomNotFound,
    #[error("Room {room_number} is blocked: {}", .reason.as_deref().unwrap_or("Unavailable"))]
    RoomBlocked {
        room_number: String,
        reason: Option<String>,
    },
    #[error("Room {room_number} is full.")]
    RoomFull { room_number: String },
    #[error("You are already in this room.")]
    AlreadyInRoom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Decision {
    Allowed,
    Denied(Denial),
}

impl Decision {
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Allowed => "Allotment allowed.".to_owned(),
            Self::Denied(denial) => denial.to_string(),
        }
    }

    pub fn into_result(self) -> Result<(), Denial> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(denial) => Err(denial),
        }
    }
}

/// Evaluates the allotment rules in fixed order, first failure wins:
/// window, existence, blocked flag, capacity.
///
/// The admin override passes `window_open = true`.
pub fn decide(
    room: Option<&Room>,
    current_occupancy: u32,
    is_blocked: bool,
    window_open: bool,
) -> Decision {
    if !window_open {
        return Decision::Denied(Denial::WindowClosed);
    }
    let Some(room) = room else {
        return Decision::Denied(Denial::RoomNotFound);
    };
    if is_blocked {
        return Decision::Denied(Denial::RoomBlocked {
            room_number: room.room_number.clone(),
            reason: room.block_reason.clone(),
        });
    }
    if current_occupancy >= room.capacity {
        return Decision::Denied(Denial::RoomFull {
            room_number: room.room_number.clone(),
        });
    }
    Decision::Allowed
}
