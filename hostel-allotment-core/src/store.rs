//! The two capability-scoped handles onto the relational store.
//!
//! [`ReadStore`] is what end-user reads go through; [`AllotmentStore`] adds
//! the writes that only the coordinator and the admin path may perform.
//! Every call is individually atomic, but calls do not compose into a larger
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Allotment, AllotmentId, AllotmentWindow, HistoryEntry, Hostel, HostelId, NewHistoryEntry,
    NewWindow, Profile, Room, RoomId, UserId,
};
use crate::rules::Denial;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store query failed: {0}")]
    Query(#[source] BoxError),
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("invalid stored value: {0}")]
    InvalidData(String),
}

/// Result of the conditional insert. The store re-validates the room with
/// the window forced open in the same atomic step as the insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(Allotment),
    Rejected(Denial),
}

#[async_trait]
pub trait ReadStore: Send + Sync {
    /// Ordered by name.
    async fn hostels(&self) -> Result<Vec<Hostel>, StoreError>;

    /// Ordered by floor, then room number.
    async fn rooms(&self, hostel: Option<HostelId>) -> Result<Vec<Room>, StoreError>;

    async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    /// Live count of allotments referencing `room`.
    async fn occupancy(&self, room: RoomId) -> Result<u32, StoreError>;

    async fn allotment(&self, id: AllotmentId) -> Result<Option<Allotment>, StoreError>;

    async fn allotment_for_student(
        &self,
        student: UserId,
    ) -> Result<Option<Allotment>, StoreError>;

    /// Newest first. `None` lists every allotment.
    async fn allotments(&self, rooms: Option<&[RoomId]>) -> Result<Vec<Allotment>, StoreError>;

    /// Windows with `open_at <= now <= close_at`, in no particular order.
    async fn windows_open_at(&self, now: DateTime<Utc>)
        -> Result<Vec<AllotmentWindow>, StoreError>;

    /// Latest `open_at` first.
    async fn recent_windows(&self, limit: usize) -> Result<Vec<AllotmentWindow>, StoreError>;

    async fn profile(&self, id: UserId) -> Result<Option<Profile>, StoreError>;

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StoreError>;

    /// Students only, ordered by name. `search` matches name, e-mail or branch
    /// case-insensitively.
    async fn students(&self, search: Option<&str>) -> Result<Vec<Profile>, StoreError>;

    /// Newest first.
    async fn history_for_student(
        &self,
        student: UserId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError>;
}

#[async_trait]
pub trait AllotmentStore: ReadStore {
    /// Returns the removed allotment, as it was at the moment of the delete.
    async fn delete_allotment_for_student(
        &self,
        student: UserId,
    ) -> Result<Option<Allotment>, StoreError>;

    /// Inserts `allotment` only if its room exists, is unblocked and has a
    /// free slot at the moment of the write.
    async fn insert_allotment(&self, allotment: &Allotment) -> Result<InsertOutcome, StoreError>;

    /// Re-inserts a previously deleted allotment as it was, without any
    /// capacity check.
    async fn restore_allotment(&self, allotment: &Allotment) -> Result<(), StoreError>;

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError>;

    /// `Some(reason)` blocks, `None` unblocks and clears the reason.
    /// Returns `None` if the room does not exist.
    async fn set_room_block(
        &self,
        room: RoomId,
        reason: Option<String>,
    ) -> Result<Option<Room>, StoreError>;

    async fn insert_window(&self, window: NewWindow) -> Result<AllotmentWindow, StoreError>;
}
