//! Privileged operations. Assignment reuses the coordinator with the window
//! gate bypassed; everything else is a direct write.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::coordinator::{AllotmentCommit, AllotmentError, Coordinator, WindowCheck};
use crate::models::{
    Allotment, AllotmentWindow, NewHistoryEntry, NewWindow, Room, RoomId, UserId,
};
use crate::store::{AllotmentStore, StoreError};

pub const DEFAULT_BLOCK_REASON: &str = "Blocked by admin";

#[derive(thiserror::Error, Debug)]
pub enum AdminError {
    #[error("Room not found.")]
    RoomNotFound,
    #[error("title is required")]
    MissingTitle,
    #[error("close_at must be after open_at")]
    WindowNotAfterOpen,
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

pub struct AdminOverride<'a, S: AllotmentStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: AllotmentStore + ?Sized> AdminOverride<'a, S> {
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn assign(
        &self,
        student_id: UserId,
        room: RoomId,
        now: DateTime<Utc>,
    ) -> Result<AllotmentCommit, AllotmentError> {
        Coordinator::new(self.store)
            .execute(student_id, room, WindowCheck::Bypassed, now)
            .await
    }

    /// Removing a student who holds no room succeeds with `None`.
    pub async fn unassign(
        &self,
        student_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<Option<Allotment>, StoreError> {
        let Some(removed) = self.store.delete_allotment_for_student(student_id).await? else {
            return Ok(None);
        };
        let entry = NewHistoryEntry {
            student_id,
            old_room_id: Some(removed.room_id),
            new_room_id: None,
            changed_at: now,
        };
        if let Err(err) = self.store.append_history(entry).await {
            warn!(%student_id, "recording unassignment history failed: {err}");
        }
        info!(%student_id, room_id = %removed.room_id, "student unassigned");
        Ok(Some(removed))
    }

    pub async fn block_room(
        &self,
        room: RoomId,
        reason: Option<String>,
    ) -> Result<Room, AdminError> {
        let reason = reason
            .map(|reason| reason.trim().to_owned())
            .filter(|reason| !reason.is_empty())
            .unwrap_or_else(|| DEFAULT_BLOCK_REASON.to_owned());
        let room = self
            .store
            .set_room_block(room, Some(reason))
            .await?
            .ok_or(AdminError::RoomNotFound)?;
        info!(room_id = %room.id, "room blocked");
        Ok(room)
    }

    pub async fn unblock_room(&self, room: RoomId) -> Result<Room, AdminError> {
        let room = self
            .store
            .set_room_block(room, None)
            .await?
            .ok_or(AdminError::RoomNotFound)?;
        info!(room_id = %room.id, "room unblocked");
        Ok(room)
    }

    /// Overlap with existing windows is allowed; the gate resolves it.
    pub async fn create_window(&self, window: NewWindow) -> Result<AllotmentWindow, AdminError> {
        if window.title.trim().is_empty() {
            return Err(AdminError::MissingTitle);
        }
        if window.close_at <= window.open_at {
            return Err(AdminError::WindowNotAfterOpen);
        }
        let window = self.store.insert_window(window).await?;
        info!(window_id = %window.id, "allotment window created");
        Ok(window)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::admin::{AdminError, AdminOverride, DEFAULT_BLOCK_REASON};
    use crate::coordinator::AllotmentError;
    use crate::memory::{MemoryStore, Operation};
    use crate::models::{NewWindow, RoomId, UserId};
    use crate::rules::Denial;
    use crate::store::ReadStore as _;
    use crate::window::is_window_open;

    #[tokio::test]
    async fn assign_bypasses_closed_window() {
        let store = MemoryStore::new();
        let room = store.seed_room("A-1", 1, 2);
        let student = UserId::new_random();
        assert!(!is_window_open(&store, Utc::now()).await.open);

        let commit = AdminOverride::new(&store)
            .assign(student, room.id, Utc::now())
            .await
            .unwrap();
        assert_eq!(commit.allotment.room_id, room.id);
        let history = store.history_snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_room_id, None);
    }

    #[tokio::test]
    async fn assign_still_denies_blocked_and_full_rooms() {
        let store = MemoryStore::new();
        let admin = AdminOverride::new(&store);
        let blocked = store.seed_room("A-1", 1, 2);
        admin
            .block_room(blocked.id, Some("Leaking roof".to_owned()))
            .await
            .unwrap();
        let full = store.seed_room("A-2", 1, 1);
        store.seed_allotment(UserId::new_random(), full.id);

        let err = admin
            .assign(UserId::new_random(), blocked.id, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Room A-1 is blocked: Leaking roof");

        let err = admin
            .assign(UserId::new_random(), full.id, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllotmentError::Denied(Denial::RoomFull { .. })
        ));
    }

    #[tokio::test]
    async fn unassign_without_allotment_is_noop() {
        let store = MemoryStore::new();
        let removed = AdminOverride::new(&store)
            .unassign(UserId::new_random(), Utc::now())
            .await
            .unwrap();
        assert_eq!(removed, None);
        assert_eq!(store.mutation_count(), 0);
        assert!(store.history_snapshot().is_empty());
    }

    #[tokio::test]
    async fn unassign_removes_and_records_history() {
        let store = MemoryStore::new();
        let room = store.seed_room("A-1", 1, 2);
        let student = UserId::new_random();
        let allotment = store.seed_allotment(student, room.id);

        let removed = AdminOverride::new(&store)
            .unassign(student, Utc::now())
            .await
            .unwrap();
        assert_eq!(removed, Some(allotment));
        assert_eq!(store.occupancy(room.id).await.unwrap(), 0);
        let history = store.history_snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_room_id, Some(room.id));
        assert_eq!(history[0].new_room_id, None);
    }

    #[tokio::test]
    async fn unassign_records_the_room_actually_removed() {
        let store = MemoryStore::new();
        let room = store.seed_room("A-1", 1, 2);
        let student = UserId::new_random();
        let allotment = store.seed_allotment(student, room.id);
        // history comes from the deleted row, no separate read is needed
        store.fail_next(Operation::ReadAllotment, 1);

        let removed = AdminOverride::new(&store)
            .unassign(student, Utc::now())
            .await
            .unwrap();
        assert_eq!(removed, Some(allotment));
        let history = store.history_snapshot();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_room_id, Some(room.id));
    }

    #[tokio::test]
    async fn block_defaults_reason_and_unblock_clears_it() {
        let store = MemoryStore::new();
        let admin = AdminOverride::new(&store);
        let room = store.seed_room("A-1", 1, 2);

        let blocked = admin.block_room(room.id, Some("  ".to_owned())).await.unwrap();
        assert!(blocked.is_blocked);
        assert_eq!(blocked.block_reason.as_deref(), Some(DEFAULT_BLOCK_REASON));

        let unblocked = admin.unblock_room(room.id).await.unwrap();
        assert!(!unblocked.is_blocked);
        assert_eq!(unblocked.block_reason, None);

        assert!(matches!(
            admin.unblock_room(RoomId::new_random()).await,
            Err(AdminError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn window_validation() {
        let store = MemoryStore::new();
        let admin = AdminOverride::new(&store);
        let now = Utc::now();
        let window = |title: &str, close_at| NewWindow {
            title: title.to_owned(),
            open_at: now,
            close_at,
            created_by: None,
        };

        assert!(matches!(
            admin.create_window(window("", now + Duration::hours(1))).await,
            Err(AdminError::MissingTitle)
        ));
        assert!(matches!(
            admin.create_window(window("round one", now)).await,
            Err(AdminError::WindowNotAfterOpen)
        ));

        let created = admin
            .create_window(window("round one", now + Duration::hours(1)))
            .await
            .unwrap();
        let state = is_window_open(&store, now + Duration::minutes(30)).await;
        assert_eq!(state.active_window, Some(created));
    }
}
