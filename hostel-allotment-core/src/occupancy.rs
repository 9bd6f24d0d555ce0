//! Occupancy is derived from allotment rows and never stored.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{Allotment, Room, RoomId};

#[derive(Debug, Default, Clone)]
pub struct OccupancyIndex {
    counts: HashMap<RoomId, u32>,
}

impl OccupancyIndex {
    pub fn from_allotments<'a>(allotments: impl IntoIterator<Item = &'a Allotment>) -> Self {
        let mut counts = HashMap::new();
        for allotment in allotments {
            *counts.entry(allotment.room_id).or_insert(0) += 1;
        }
        Self { counts }
    }

    #[must_use]
    pub fn occupancy(&self, room: RoomId) -> u32 {
        self.counts.get(&room).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Full,
    Blocked,
}

impl RoomStatus {
    #[must_use]
    pub const fn of(room: &Room, occupied: u32) -> Self {
        if room.is_blocked {
            Self::Blocked
        } else if occupied >= room.capacity {
            Self::Full
        } else {
            Self::Available
        }
    }
}

/// Finer grained status for the vacancy heat map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VacancyStatus {
    Empty,
    Partial,
    Full,
    Blocked,
}

impl VacancyStatus {
    #[must_use]
    pub const fn of(room: &Room, occupied: u32) -> Self {
        if room.is_blocked {
            Self::Blocked
        } else if occupied >= room.capacity {
            Self::Full
        } else if occupied > 0 {
            Self::Partial
        } else {
            Self::Empty
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Vacancy {
    pub occupied: u32,
    pub available: u32,
    /// Rounded to the nearest whole percent, 0 for rooms without capacity.
    pub vacancy_percent: u32,
}

impl Vacancy {
    #[must_use]
    pub fn of(room: &Room, occupied: u32) -> Self {
        let available = room.capacity.saturating_sub(occupied);
        let vacancy_percent = if room.capacity == 0 {
            0
        } else {
            (u64::from(available) * 200 + u64::from(room.capacity)) / (u64::from(room.capacity) * 2)
        };
        Self {
            occupied,
            available,
            vacancy_percent: u32::try_from(vacancy_percent).unwrap_or(100),
        }
    }
}
