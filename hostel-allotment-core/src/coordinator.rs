//! Moves a student into a room, out of the previous one if any.
//!
//! An attempt walks the states
//! `Start -> Checked -> {Denied | DeletingOld -> InsertingNew -> {Committed |
//! Compensating -> {Restored | Inconsistent}}}`, or ends in `Aborted` when a
//! store call fails before anything was changed. `Restored` and
//! `Inconsistent` are both reported as failures; only `Inconsistent` leaves
//! the student without any allotment.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::models::{Allotment, NewHistoryEntry, Room, RoomId, UserId};
use crate::rules::{decide, Decision, Denial};
use crate::store::{AllotmentStore, InsertOutcome, StoreError};
use crate::window::is_window_open;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCheck {
    /// Consult the allotment windows at the attempt's `now`.
    Enforced,
    /// Treat the window as open. Capacity and blocked checks still apply.
    Bypassed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptState {
    Start,
    Checked,
    Denied,
    DeletingOld,
    InsertingNew,
    Committed,
    Compensating,
    Restored,
    Inconsistent,
    Aborted,
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::Checked => "CHECKED",
            Self::Denied => "DENIED",
            Self::DeletingOld => "DELETING_OLD",
            Self::InsertingNew => "INSERTING_NEW",
            Self::Committed => "COMMITTED",
            Self::Compensating => "COMPENSATING",
            Self::Restored => "RESTORED",
            Self::Inconsistent => "INCONSISTENT",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllotmentCommit {
    pub allotment: Allotment,
    /// The student held a different room before this attempt.
    pub switched: bool,
    pub previous_room: Option<RoomId>,
    /// `false` if the history append failed. The allotment stands regardless.
    pub history_recorded: bool,
}

/// Why the insert step did not go through.
#[derive(thiserror::Error, Debug)]
pub enum InsertFailure {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Rejected(#[from] Denial),
}

#[derive(thiserror::Error, Debug)]
pub enum AllotmentError {
    #[error("{0}")]
    Denied(#[from] Denial),
    /// Nothing was changed. `stage` is where the attempt stopped.
    #[error("store failure during {stage}: {source}")]
    Store {
        stage: AttemptState,
        source: StoreError,
    },
    #[error("allotment failed, previous allotment restored: {cause}")]
    Restored {
        restored: Allotment,
        cause: InsertFailure,
    },
    /// The restore found the student already holding `current`, written by a
    /// concurrent request.
    #[error(
        "allotment failed, student already holds allotment {} in room {}: {cause}",
        .current.id,
        .current.room_id
    )]
    Superseded {
        current: Allotment,
        cause: InsertFailure,
    },
    #[error(
        "inconsistent state, manual recovery needed: student {} lost allotment {} in room {} \
         (insert: {insert_failure}; restore: {restore_error})",
        .lost.student_id,
        .lost.id,
        .lost.room_id
    )]
    Inconsistent {
        lost: Allotment,
        insert_failure: InsertFailure,
        restore_error: StoreError,
    },
}

impl AllotmentError {
    /// Terminal state the attempt ended in.
    #[must_use]
    pub const fn state(&self) -> AttemptState {
        match self {
            Self::Denied(_) => AttemptState::Denied,
            Self::Store { .. } => AttemptState::Aborted,
            Self::Restored { .. } | Self::Superseded { .. } => AttemptState::Restored,
            Self::Inconsistent { .. } => AttemptState::Inconsistent,
        }
    }

    /// The policy reason, if the failure is one the student can act on.
    #[must_use]
    pub const fn denial(&self) -> Option<&Denial> {
        match self {
            Self::Denied(denial)
            | Self::Restored {
                cause: InsertFailure::Rejected(denial),
                ..
            }
            | Self::Superseded {
                cause: InsertFailure::Rejected(denial),
                ..
            } => Some(denial),
            Self::Store { .. }
            | Self::Restored { .. }
            | Self::Superseded { .. }
            | Self::Inconsistent { .. } => None,
        }
    }
}

fn aborted(stage: AttemptState, source: StoreError) -> AllotmentError {
    AllotmentError::Store { stage, source }
}

struct Facts {
    student_id: UserId,
    room: Option<Room>,
    target: RoomId,
    occupancy: u32,
    existing: Option<Allotment>,
    window_open: bool,
}

enum Stage {
    Start,
    Checked(Facts),
    DeletingOld(Facts),
    InsertingNew {
        facts: Facts,
        previous: Option<Allotment>,
    },
    Committed {
        allotment: Allotment,
        previous: Option<Allotment>,
    },
    Compensating {
        previous: Allotment,
        failure: InsertFailure,
    },
}

impl Stage {
    const fn state(&self) -> AttemptState {
        match self {
            Self::Start => AttemptState::Start,
            Self::Checked(_) => AttemptState::Checked,
            Self::DeletingOld(_) => AttemptState::DeletingOld,
            Self::InsertingNew { .. } => AttemptState::InsertingNew,
            Self::Committed { .. } => AttemptState::Committed,
            Self::Compensating { .. } => AttemptState::Compensating,
        }
    }
}

enum Step {
    Next(Stage),
    Done(Result<AllotmentCommit, AllotmentError>),
}

pub struct Coordinator<'a, S: AllotmentStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: AllotmentStore + ?Sized> Coordinator<'a, S> {
    pub const fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn execute(
        &self,
        student_id: UserId,
        target: RoomId,
        window: WindowCheck,
        now: DateTime<Utc>,
    ) -> Result<AllotmentCommit, AllotmentError> {
        let mut stage = Stage::Start;
        loop {
            let from = stage.state();
            let step = match stage {
                Stage::Start => self.gather(student_id, target, window, now).await,
                Stage::Checked(facts) => Self::check(facts),
                Stage::DeletingOld(facts) => self.delete_old(facts).await,
                Stage::InsertingNew { facts, previous } => {
                    self.insert_new(facts, previous, now).await
                }
                Stage::Committed {
                    allotment,
                    previous,
                } => Step::Done(Ok(self.commit(allotment, previous, now).await)),
                Stage::Compensating { previous, failure } => {
                    Step::Done(Err(self.compensate(previous, failure).await))
                }
            };
            match step {
                Step::Next(next) => {
                    debug!(%student_id, %target, "allotment attempt {from} -> {}", next.state());
                    stage = next;
                }
                Step::Done(result) => {
                    let to = result
                        .as_ref()
                        .map_or_else(AllotmentError::state, |_| AttemptState::Committed);
                    debug!(%student_id, %target, "allotment attempt {from} -> {to}");
                    return result;
                }
            }
        }
    }

    async fn gather(
        &self,
        student_id: UserId,
        target: RoomId,
        window: WindowCheck,
        now: DateTime<Utc>,
    ) -> Step {
        let gathered = async {
            let room = self.store.room(target).await?;
            let occupancy = self.store.occupancy(target).await?;
            let existing = self.store.allotment_for_student(student_id).await?;
            Ok::<_, StoreError>((room, occupancy, existing))
        };
        let (room, occupancy, existing) = match gathered.await {
            Ok(facts) => facts,
            Err(err) => return Step::Done(Err(aborted(AttemptState::Start, err))),
        };
        let window_open = match window {
            WindowCheck::Bypassed => true,
            WindowCheck::Enforced => is_window_open(self.store, now).await.open,
        };
        Step::Next(Stage::Checked(Facts {
            student_id,
            room,
            target,
            occupancy,
            existing,
            window_open,
        }))
    }

    fn check(facts: Facts) -> Step {
        if facts
            .existing
            .as_ref()
            .is_some_and(|existing| existing.room_id == facts.target)
        {
            return Step::Done(Err(Denial::AlreadyInRoom.into()));
        }
        let is_blocked = facts.room.as_ref().is_some_and(|room| room.is_blocked);
        match decide(
            facts.room.as_ref(),
            facts.occupancy,
            is_blocked,
            facts.window_open,
        ) {
            Decision::Denied(denial) => Step::Done(Err(denial.into())),
            Decision::Allowed if facts.existing.is_some() => Step::Next(Stage::DeletingOld(facts)),
            Decision::Allowed => Step::Next(Stage::InsertingNew {
                facts,
                previous: None,
            }),
        }
    }

    /// Compensation works from the deleted row, not the earlier read. A
    /// concurrent removal leaves nothing to restore.
    async fn delete_old(&self, facts: Facts) -> Step {
        match self
            .store
            .delete_allotment_for_student(facts.student_id)
            .await
        {
            Ok(previous) => Step::Next(Stage::InsertingNew { facts, previous }),
            Err(err) => {
                warn!(student_id = %facts.student_id, "deleting previous allotment failed: {err}");
                Step::Done(Err(aborted(AttemptState::DeletingOld, err)))
            }
        }
    }

    async fn insert_new(
        &self,
        facts: Facts,
        previous: Option<Allotment>,
        now: DateTime<Utc>,
    ) -> Step {
        let allotment = Allotment::new(facts.student_id, facts.target, now);
        let failure = match self.store.insert_allotment(&allotment).await {
            Ok(InsertOutcome::Inserted(allotment)) => {
                return Step::Next(Stage::Committed {
                    allotment,
                    previous,
                })
            }
            Ok(InsertOutcome::Rejected(denial)) => InsertFailure::Rejected(denial),
            Err(err) => InsertFailure::Store(err),
        };
        warn!(student_id = %facts.student_id, "inserting allotment failed: {failure}");
        match (previous, failure) {
            (Some(previous), failure) => Step::Next(Stage::Compensating { previous, failure }),
            (None, InsertFailure::Rejected(denial)) => Step::Done(Err(denial.into())),
            (None, InsertFailure::Store(err)) => {
                Step::Done(Err(aborted(AttemptState::InsertingNew, err)))
            }
        }
    }

    async fn commit(
        &self,
        allotment: Allotment,
        previous: Option<Allotment>,
        now: DateTime<Utc>,
    ) -> AllotmentCommit {
        let previous_room = previous.map(|previous| previous.room_id);
        let entry = NewHistoryEntry {
            student_id: allotment.student_id,
            old_room_id: previous_room,
            new_room_id: Some(allotment.room_id),
            changed_at: now,
        };
        let history_recorded = match self.store.append_history(entry).await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    student_id = %allotment.student_id,
                    allotment_id = %allotment.id,
                    "recording room change history failed: {err}"
                );
                false
            }
        };
        info!(
            student_id = %allotment.student_id,
            room_id = %allotment.room_id,
            switched = previous_room.is_some(),
            "room allotted"
        );
        AllotmentCommit {
            allotment,
            switched: previous_room.is_some(),
            previous_room,
            history_recorded,
        }
    }

    async fn compensate(&self, previous: Allotment, failure: InsertFailure) -> AllotmentError {
        match self.store.restore_allotment(&previous).await {
            Ok(()) => {
                warn!(
                    student_id = %previous.student_id,
                    room_id = %previous.room_id,
                    "previous allotment restored after failed switch"
                );
                AllotmentError::Restored {
                    restored: previous,
                    cause: failure,
                }
            }
            Err(restore_error) => {
                if let Ok(Some(current)) =
                    self.store.allotment_for_student(previous.student_id).await
                {
                    warn!(
                        student_id = %previous.student_id,
                        room_id = %current.room_id,
                        "restore skipped, student already holds an allotment: {restore_error}"
                    );
                    return AllotmentError::Superseded {
                        current,
                        cause: failure,
                    };
                }
                let err = AllotmentError::Inconsistent {
                    lost: previous,
                    insert_failure: failure,
                    restore_error,
                };
                error!(manual_recovery = true, "{err}");
                err
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::coordinator::{AllotmentError, AttemptState, Coordinator, WindowCheck};
    use crate::memory::{MemoryStore, Operation};
    use crate::models::{AllotmentWindow, Room, RoomId, UserId, WindowId};
    use crate::rules::Denial;
    use crate::store::ReadStore as _;

    fn store_with_open_window() -> MemoryStore {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.seed_window(AllotmentWindow {
            id: WindowId::new_random(),
            title: "odd semester".to_owned(),
            open_at: now - Duration::days(1),
            close_at: now + Duration::days(1),
            created_by: None,
        });
        store
    }

    fn seed_room(store: &MemoryStore, number: &str, capacity: u32) -> Room {
        store.seed_room(number, 1, capacity)
    }

    async fn allot(
        store: &MemoryStore,
        student: UserId,
        room: RoomId,
    ) -> Result<crate::coordinator::AllotmentCommit, AllotmentError> {
        Coordinator::new(store)
            .execute(student, room, WindowCheck::Enforced, Utc::now())
            .await
    }

    #[tokio::test]
    async fn first_allotment_then_switch() {
        let store = store_with_open_window();
        let room_a = seed_room(&store, "A-1", 2);
        let room_b = seed_room(&store, "B-1", 1);
        let student = UserId::new_random();

        let first = allot(&store, student, room_a.id).await.unwrap();
        assert!(!first.switched);
        assert_eq!(first.previous_room, None);
        assert!(first.history_recorded);
        assert_eq!(store.occupancy(room_a.id).await.unwrap(), 1);

        let second = allot(&store, student, room_b.id).await.unwrap();
        assert!(second.switched);
        assert_eq!(second.previous_room, Some(room_a.id));
        assert_eq!(store.occupancy(room_a.id).await.unwrap(), 0);
        assert_eq!(store.occupancy(room_b.id).await.unwrap(), 1);

        let current = store.allotment_for_student(student).await.unwrap().unwrap();
        assert_eq!(current.room_id, room_b.id);

        let history = store.history_snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].old_room_id, None);
        assert_eq!(history[0].new_room_id, Some(room_a.id));
        assert_eq!(history[1].old_room_id, Some(room_a.id));
        assert_eq!(history[1].new_room_id, Some(room_b.id));
    }

    #[tokio::test]
    async fn same_room_is_denied_without_mutation() {
        let store = store_with_open_window();
        let room = seed_room(&store, "A-1", 2);
        let student = UserId::new_random();
        let first = allot(&store, student, room.id).await.unwrap();
        let mutations = store.mutation_count();

        let err = allot(&store, student, room.id).await.unwrap_err();
        assert!(matches!(err, AllotmentError::Denied(Denial::AlreadyInRoom)));
        assert_eq!(err.state(), AttemptState::Denied);
        assert_eq!(store.mutation_count(), mutations);
        assert_eq!(
            store.allotment_for_student(student).await.unwrap(),
            Some(first.allotment)
        );
        assert_eq!(store.history_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn closed_window_denies_students() {
        let store = MemoryStore::new();
        let room = seed_room(&store, "A-1", 2);
        let err = allot(&store, UserId::new_random(), room.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AllotmentError::Denied(Denial::WindowClosed)));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn full_room_is_denied_and_switching_student_keeps_old_room() {
        let store = store_with_open_window();
        let room_a = seed_room(&store, "A-1", 2);
        let room_b = seed_room(&store, "B-1", 1);
        let (mover, occupant) = (UserId::new_random(), UserId::new_random());
        allot(&store, mover, room_a.id).await.unwrap();
        allot(&store, occupant, room_b.id).await.unwrap();

        let err = allot(&store, mover, room_b.id).await.unwrap_err();
        assert_eq!(err.to_string(), "Room B-1 is full.");
        assert_eq!(
            store
                .allotment_for_student(mover)
                .await
                .unwrap()
                .map(|allotment| allotment.room_id),
            Some(room_a.id)
        );
    }

    #[tokio::test]
    async fn unknown_room_is_denied() {
        let store = store_with_open_window();
        let err = allot(&store, UserId::new_random(), RoomId::new_random())
            .await
            .unwrap_err();
        assert!(matches!(err, AllotmentError::Denied(Denial::RoomNotFound)));
    }

    #[tokio::test]
    async fn read_failure_aborts_before_mutation() {
        let store = store_with_open_window();
        let room = seed_room(&store, "A-1", 2);
        store.fail_next(Operation::Occupancy, 1);
        let err = allot(&store, UserId::new_random(), room.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllotmentError::Store {
                stage: AttemptState::Start,
                ..
            }
        ));
        assert_eq!(err.state(), AttemptState::Aborted);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn delete_failure_keeps_previous_allotment() {
        let store = store_with_open_window();
        let room_a = seed_room(&store, "A-1", 2);
        let room_b = seed_room(&store, "B-1", 2);
        let student = UserId::new_random();
        allot(&store, student, room_a.id).await.unwrap();
        store.fail_next(Operation::Delete, 1);

        let err = allot(&store, student, room_b.id).await.unwrap_err();
        assert!(matches!(
            err,
            AllotmentError::Store {
                stage: AttemptState::DeletingOld,
                ..
            }
        ));
        assert_eq!(err.state(), AttemptState::Aborted);
        assert_eq!(
            store
                .allotment_for_student(student)
                .await
                .unwrap()
                .map(|allotment| allotment.room_id),
            Some(room_a.id)
        );
        assert_eq!(store.occupancy(room_b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_failure_restores_previous_allotment() {
        let store = store_with_open_window();
        let room_a = seed_room(&store, "A-1", 2);
        let room_b = seed_room(&store, "B-1", 2);
        let student = UserId::new_random();
        let first = allot(&store, student, room_a.id).await.unwrap();
        store.fail_next(Operation::Insert, 1);

        let err = allot(&store, student, room_b.id).await.unwrap_err();
        assert_eq!(err.state(), AttemptState::Restored);
        assert!(err.denial().is_none());
        assert_eq!(
            store.allotment_for_student(student).await.unwrap(),
            Some(first.allotment)
        );
        assert_eq!(store.history_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn failed_restore_is_inconsistent() {
        let store = store_with_open_window();
        let room_a = seed_room(&store, "A-1", 2);
        let room_b = seed_room(&store, "B-1", 2);
        let student = UserId::new_random();
        let first = allot(&store, student, room_a.id).await.unwrap();
        store.fail_next(Operation::Insert, 1);
        store.fail_next(Operation::Restore, 1);

        let err = allot(&store, student, room_b.id).await.unwrap_err();
        assert_eq!(err.state(), AttemptState::Inconsistent);
        let AllotmentError::Inconsistent { lost, .. } = &err else {
            panic!("expected inconsistent state, got {err:?}");
        };
        assert_eq!(lost, &first.allotment);
        assert!(err.to_string().contains("manual recovery"));
        assert_eq!(store.allotment_for_student(student).await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_allotment_insert_failure_is_plain_store_error() {
        let store = store_with_open_window();
        let room = seed_room(&store, "A-1", 2);
        store.fail_next(Operation::Insert, 1);
        let err = allot(&store, UserId::new_random(), room.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllotmentError::Store {
                stage: AttemptState::InsertingNew,
                ..
            }
        ));
        assert_eq!(store.history_snapshot().len(), 0);
    }

    #[tokio::test]
    async fn conditional_insert_rejection_after_delete_is_restored_denial() {
        let store = store_with_open_window();
        let room_a = seed_room(&store, "A-1", 2);
        let room_b = seed_room(&store, "B-1", 1);
        let (student, racer) = (UserId::new_random(), UserId::new_random());
        allot(&store, student, room_a.id).await.unwrap();
        // Another request takes the last slot between the occupancy read and the insert.
        store.before_next_insert(move |store| {
            store.seed_allotment(racer, room_b.id);
        });

        let err = allot(&store, student, room_b.id).await.unwrap_err();
        assert_eq!(err.state(), AttemptState::Restored);
        assert_eq!(
            err.denial(),
            Some(&Denial::RoomFull {
                room_number: "B-1".to_owned()
            })
        );
        assert_eq!(store.occupancy(room_b.id).await.unwrap(), 1);
        assert_eq!(store.occupancy(room_a.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn restore_blocked_by_concurrent_allotment_is_not_inconsistent() {
        let store = store_with_open_window();
        let room_a = seed_room(&store, "A-1", 2);
        let room_b = seed_room(&store, "B-1", 2);
        let room_c = seed_room(&store, "C-1", 2);
        let student = UserId::new_random();
        allot(&store, student, room_a.id).await.unwrap();
        // A second request by the same student lands in C-1 while this one is mid-switch.
        store.before_next_insert(move |store| {
            store.seed_allotment(student, room_c.id);
        });

        let err = allot(&store, student, room_b.id).await.unwrap_err();
        assert_eq!(err.state(), AttemptState::Restored);
        let AllotmentError::Superseded { current, .. } = &err else {
            panic!("expected superseded attempt, got {err:?}");
        };
        assert_eq!(current.room_id, room_c.id);
        assert!(!err.to_string().contains("manual recovery"));
        assert_eq!(
            store
                .allotment_for_student(student)
                .await
                .unwrap()
                .map(|allotment| allotment.room_id),
            Some(room_c.id)
        );
        assert_eq!(store.occupancy(room_a.id).await.unwrap(), 0);
        assert_eq!(store.occupancy(room_b.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_failure_does_not_roll_back() {
        let store = store_with_open_window();
        let room = seed_room(&store, "A-1", 1);
        let student = UserId::new_random();
        store.fail_next(Operation::AppendHistory, 1);
        let commit = allot(&store, student, room.id).await.unwrap();
        assert!(!commit.history_recorded);
        assert_eq!(store.occupancy(room.id).await.unwrap(), 1);
        assert!(store.history_snapshot().is_empty());
    }

    #[tokio::test]
    async fn capacity_and_uniqueness_hold_under_serialized_load() {
        let store = store_with_open_window();
        let rooms: Vec<Room> = (0..3)
            .map(|index| seed_room(&store, &format!("C-{index}"), 2))
            .collect();
        let students: Vec<UserId> = (0..8).map(|_| UserId::new_random()).collect();

        for round in 0..4 {
            for (index, student) in students.iter().enumerate() {
                let room = &rooms[(index + round) % rooms.len()];
                let _ = allot(&store, *student, room.id).await;
            }
        }

        let allotments = store.allotments(None).await.unwrap();
        for room in &rooms {
            assert!(store.occupancy(room.id).await.unwrap() <= room.capacity);
        }
        for student in &students {
            assert!(
                allotments
                    .iter()
                    .filter(|allotment| allotment.student_id == *student)
                    .count()
                    <= 1
            );
        }
    }

    #[tokio::test]
    async fn capacity_holds_under_concurrent_requests() {
        let store = std::sync::Arc::new(store_with_open_window());
        let room_id = seed_room(&store, "D-1", 2).id;
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    Coordinator::new(&*store)
                        .execute(UserId::new_random(), room_id, WindowCheck::Enforced, Utc::now())
                        .await
                        .is_ok()
                })
            })
            .collect();
        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 2);
        assert_eq!(store.occupancy(room_id).await.unwrap(), 2);
    }
}
