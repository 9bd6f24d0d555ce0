//! In-process store used by tests and local development.
//!
//! Individual operations can be made to fail on demand with
//! [`MemoryStore::fail_next`] to exercise partial-failure paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    Allotment, AllotmentId, AllotmentWindow, HistoryEntry, HistoryId, Hostel, HostelId,
    NewHistoryEntry, NewWindow, Profile, Role, Room, RoomId, UserId, WindowId,
};
use crate::rules::decide;
use crate::store::{AllotmentStore, InsertOutcome, ReadStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Hostels,
    Rooms,
    Room,
    Occupancy,
    ReadAllotment,
    ListAllotments,
    Windows,
    Profiles,
    History,
    Delete,
    Insert,
    Restore,
    AppendHistory,
    SetRoomBlock,
    InsertWindow,
}

type InsertHook = Box<dyn FnOnce(&MemoryStore) + Send>;

#[derive(Default)]
struct State {
    hostels: Vec<Hostel>,
    rooms: Vec<Room>,
    allotments: Vec<Allotment>,
    windows: Vec<AllotmentWindow>,
    profiles: Vec<Profile>,
    history: Vec<HistoryEntry>,
    mutations: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<HashMap<Operation, u32>>,
    insert_hook: Mutex<Option<InsertHook>>,
}

impl core::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Unavailable("memory store lock poisoned".to_owned())
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `times` calls of `operation` fail.
    pub fn fail_next(&self, operation: Operation, times: u32) {
        if let Ok(mut faults) = self.faults.lock() {
            *faults.entry(operation).or_insert(0) += times;
        }
    }

    /// Runs `hook` right before the next conditional insert takes effect.
    pub fn before_next_insert(&self, hook: impl FnOnce(&Self) + Send + 'static) {
        if let Ok(mut slot) = self.insert_hook.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    fn check(&self, operation: Operation) -> Result<(), StoreError> {
        let mut faults = self.faults.lock().map_err(poisoned)?;
        match faults.get_mut(&operation) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(StoreError::Unavailable(format!(
                    "injected failure for {operation:?}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(poisoned)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut state)
    }

    pub fn seed_hostel(&self, name: &str) -> Hostel {
        let hostel = Hostel {
            id: HostelId::new_random(),
            name: name.to_owned(),
            total_rooms: 0,
        };
        self.with_state(|state| state.hostels.push(hostel.clone()));
        hostel
    }

    /// Creates the room in a fresh hostel.
    pub fn seed_room(&self, room_number: &str, floor: i32, capacity: u32) -> Room {
        let hostel = self.seed_hostel("Default Hostel");
        self.seed_room_in(hostel.id, room_number, floor, capacity)
    }

    pub fn seed_room_in(
        &self,
        hostel_id: HostelId,
        room_number: &str,
        floor: i32,
        capacity: u32,
    ) -> Room {
        let room = Room {
            id: RoomId::new_random(),
            hostel_id,
            room_number: room_number.to_owned(),
            floor,
            capacity,
            is_blocked: false,
            block_reason: None,
        };
        self.with_state(|state| {
            if let Some(hostel) = state.hostels.iter_mut().find(|h| h.id == hostel_id) {
                hostel.total_rooms += 1;
            }
            state.rooms.push(room.clone());
        });
        room
    }

    pub fn seed_window(&self, window: AllotmentWindow) {
        self.with_state(|state| state.windows.push(window));
    }

    pub fn seed_profile(&self, profile: Profile) {
        self.with_state(|state| state.profiles.push(profile));
    }

    pub fn seed_student(&self, name: &str, email: &str) -> Profile {
        let profile = Profile {
            id: UserId::new_random(),
            email: email.to_owned(),
            name: name.to_owned(),
            role: Role::Student,
            branch: None,
            year: None,
        };
        self.seed_profile(profile.clone());
        profile
    }

    /// Inserts without any checks and without counting as a mutation.
    pub fn seed_allotment(&self, student_id: UserId, room_id: RoomId) -> Allotment {
        let allotment = Allotment::new(student_id, room_id, Utc::now());
        self.with_state(|state| state.allotments.push(allotment.clone()));
        allotment
    }

    pub fn history_snapshot(&self) -> Vec<HistoryEntry> {
        self.with_state(|state| state.history.clone())
    }

    /// Number of successful writes issued through [`AllotmentStore`].
    pub fn mutation_count(&self) -> u64 {
        self.with_state(|state| state.mutations)
    }
}

fn occupancy_of(state: &State, room: RoomId) -> u32 {
    let count = state
        .allotments
        .iter()
        .filter(|allotment| allotment.room_id == room)
        .count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

fn newest_first(allotments: &mut [Allotment]) {
    allotments.sort_by(|a, b| b.allotted_at.cmp(&a.allotted_at));
}

#[async_trait]
impl ReadStore for MemoryStore {
    async fn hostels(&self) -> Result<Vec<Hostel>, StoreError> {
        self.check(Operation::Hostels)?;
        let mut hostels = self.state()?.hostels.clone();
        hostels.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(hostels)
    }

    async fn rooms(&self, hostel: Option<HostelId>) -> Result<Vec<Room>, StoreError> {
        self.check(Operation::Rooms)?;
        let mut rooms: Vec<Room> = self
            .state()?
            .rooms
            .iter()
            .filter(|room| hostel.is_none_or(|hostel| room.hostel_id == hostel))
            .cloned()
            .collect();
        rooms.sort_by(|a, b| {
            a.floor
                .cmp(&b.floor)
                .then_with(|| a.room_number.cmp(&b.room_number))
        });
        Ok(rooms)
    }

    async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        self.check(Operation::Room)?;
        Ok(self.state()?.rooms.iter().find(|room| room.id == id).cloned())
    }

    async fn occupancy(&self, room: RoomId) -> Result<u32, StoreError> {
        self.check(Operation::Occupancy)?;
        Ok(occupancy_of(&*self.state()?, room))
    }

    async fn allotment(&self, id: AllotmentId) -> Result<Option<Allotment>, StoreError> {
        self.check(Operation::ReadAllotment)?;
        Ok(self
            .state()?
            .allotments
            .iter()
            .find(|allotment| allotment.id == id)
            .cloned())
    }

    async fn allotment_for_student(
        &self,
        student: UserId,
    ) -> Result<Option<Allotment>, StoreError> {
        self.check(Operation::ReadAllotment)?;
        Ok(self
            .state()?
            .allotments
            .iter()
            .find(|allotment| allotment.student_id == student)
            .cloned())
    }

    async fn allotments(&self, rooms: Option<&[RoomId]>) -> Result<Vec<Allotment>, StoreError> {
        self.check(Operation::ListAllotments)?;
        let mut allotments: Vec<Allotment> = self
            .state()?
            .allotments
            .iter()
            .filter(|allotment| rooms.is_none_or(|rooms| rooms.contains(&allotment.room_id)))
            .cloned()
            .collect();
        newest_first(&mut allotments);
        Ok(allotments)
    }

    async fn windows_open_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AllotmentWindow>, StoreError> {
        self.check(Operation::Windows)?;
        Ok(self
            .state()?
            .windows
            .iter()
            .filter(|window| window.contains(now))
            .cloned()
            .collect())
    }

    async fn recent_windows(&self, limit: usize) -> Result<Vec<AllotmentWindow>, StoreError> {
        self.check(Operation::Windows)?;
        let mut windows = self.state()?.windows.clone();
        windows.sort_by(|a, b| b.open_at.cmp(&a.open_at));
        windows.truncate(limit);
        Ok(windows)
    }

    async fn profile(&self, id: UserId) -> Result<Option<Profile>, StoreError> {
        self.check(Operation::Profiles)?;
        Ok(self
            .state()?
            .profiles
            .iter()
            .find(|profile| profile.id == id)
            .cloned())
    }

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StoreError> {
        self.check(Operation::Profiles)?;
        Ok(self
            .state()?
            .profiles
            .iter()
            .filter(|profile| ids.contains(&profile.id))
            .cloned()
            .collect())
    }

    async fn students(&self, search: Option<&str>) -> Result<Vec<Profile>, StoreError> {
        self.check(Operation::Profiles)?;
        let needle = search.map(str::to_lowercase);
        let matches = |profile: &Profile| {
            needle.as_deref().is_none_or(|needle| {
                profile.name.to_lowercase().contains(needle)
                    || profile.email.to_lowercase().contains(needle)
                    || profile
                        .branch
                        .as_deref()
                        .is_some_and(|branch| branch.to_lowercase().contains(needle))
            })
        };
        let mut students: Vec<Profile> = self
            .state()?
            .profiles
            .iter()
            .filter(|profile| profile.role == Role::Student && matches(profile))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(students)
    }

    async fn history_for_student(
        &self,
        student: UserId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        self.check(Operation::History)?;
        let mut history: Vec<HistoryEntry> = self
            .state()?
            .history
            .iter()
            .filter(|entry| entry.student_id == student)
            .cloned()
            .collect();
        history.reverse();
        history.truncate(limit);
        Ok(history)
    }
}

#[async_trait]
impl AllotmentStore for MemoryStore {
    async fn delete_allotment_for_student(
        &self,
        student: UserId,
    ) -> Result<Option<Allotment>, StoreError> {
        self.check(Operation::Delete)?;
        let mut state = self.state()?;
        let Some(position) = state
            .allotments
            .iter()
            .position(|allotment| allotment.student_id == student)
        else {
            return Ok(None);
        };
        state.mutations += 1;
        Ok(Some(state.allotments.remove(position)))
    }

    async fn insert_allotment(&self, allotment: &Allotment) -> Result<InsertOutcome, StoreError> {
        self.check(Operation::Insert)?;
        let hook = self.insert_hook.lock().map_err(poisoned)?.take();
        if let Some(hook) = hook {
            hook(self);
        }
        let mut state = self.state()?;
        if state
            .allotments
            .iter()
            .any(|existing| existing.student_id == allotment.student_id)
        {
            return Err(StoreError::Conflict(format!(
                "student {} already has an allotment",
                allotment.student_id
            )));
        }
        let room = state
            .rooms
            .iter()
            .find(|room| room.id == allotment.room_id)
            .cloned();
        let occupancy = occupancy_of(&state, allotment.room_id);
        let is_blocked = room.as_ref().is_some_and(|room| room.is_blocked);
        if let Err(denial) = decide(room.as_ref(), occupancy, is_blocked, true).into_result() {
            return Ok(InsertOutcome::Rejected(denial));
        }
        state.allotments.push(allotment.clone());
        state.mutations += 1;
        Ok(InsertOutcome::Inserted(allotment.clone()))
    }

    async fn restore_allotment(&self, allotment: &Allotment) -> Result<(), StoreError> {
        self.check(Operation::Restore)?;
        let mut state = self.state()?;
        if state
            .allotments
            .iter()
            .any(|existing| existing.student_id == allotment.student_id)
        {
            return Err(StoreError::Conflict(format!(
                "student {} already has an allotment",
                allotment.student_id
            )));
        }
        state.allotments.push(allotment.clone());
        state.mutations += 1;
        Ok(())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        self.check(Operation::AppendHistory)?;
        let entry = HistoryEntry {
            id: HistoryId::new_random(),
            student_id: entry.student_id,
            old_room_id: entry.old_room_id,
            new_room_id: entry.new_room_id,
            changed_at: entry.changed_at,
        };
        let mut state = self.state()?;
        state.history.push(entry.clone());
        state.mutations += 1;
        Ok(entry)
    }

    async fn set_room_block(
        &self,
        room: RoomId,
        reason: Option<String>,
    ) -> Result<Option<Room>, StoreError> {
        self.check(Operation::SetRoomBlock)?;
        let mut state = self.state()?;
        let Some(stored) = state.rooms.iter_mut().find(|stored| stored.id == room) else {
            return Ok(None);
        };
        stored.is_blocked = reason.is_some();
        stored.block_reason = reason;
        let updated = stored.clone();
        state.mutations += 1;
        Ok(Some(updated))
    }

    async fn insert_window(&self, window: NewWindow) -> Result<AllotmentWindow, StoreError> {
        self.check(Operation::InsertWindow)?;
        let window = AllotmentWindow {
            id: WindowId::new_random(),
            title: window.title,
            open_at: window.open_at,
            close_at: window.close_at,
            created_by: window.created_by,
        };
        let mut state = self.state()?;
        state.windows.push(window.clone());
        state.mutations += 1;
        Ok(window)
    }
}
