pub mod error;
pub mod models;
pub mod schema;

use core::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::pooled_connection::deadpool::{Object, Pool};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::scoped_futures::ScopedFutureExt as _;
use diesel_async::{AsyncConnection as _, AsyncPgConnection, RunQueryDsl};
use error::{DatabaseError, IntoStoreResult as _};
use hostel_allotment_core::models::{
    Allotment, AllotmentId, AllotmentWindow, HistoryEntry, Hostel, HostelId, NewHistoryEntry,
    NewWindow, Profile, Role, Room, RoomId, UserId,
};
use hostel_allotment_core::{decide, AllotmentStore, InsertOutcome, ReadStore, StoreError};
use schema::{allotment_windows, allotments, hostels, room_change_history, rooms, users};
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    AllotmentRow, HistoryRow, HostelRow, NewHistoryRow, NewWindowRow, RoomRow, UserRow, WindowRow,
};

// https://github.com/tokio-rs/axum/tree/main/examples/diesel-async-postgres

pub fn get_database_connection(
    database_url: &str,
) -> Result<Pool<AsyncPgConnection>, DatabaseError> {
    let config = AsyncDieselConnectionManager::<diesel_async::AsyncPgConnection>::new(database_url);
    Ok(Pool::builder(config).build()?)
}

/// Marks which database role a [`PgStore`] connects as.
pub trait Scope: Send + Sync + 'static {}

/// The elevated role. Only this scope can write.
pub struct Service;

/// The read-only role used on behalf of end users.
pub struct Scoped;

impl Scope for Service {}
impl Scope for Scoped {}

pub struct PgStore<S: Scope> {
    pool: Pool<AsyncPgConnection>,
    scope: PhantomData<S>,
}

pub type ServiceStore = PgStore<Service>;
pub type ScopedStore = PgStore<Scoped>;

impl<S: Scope> PgStore<S> {
    pub fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        Ok(Self::from_pool(get_database_connection(database_url)?))
    }

    #[must_use]
    pub const fn from_pool(pool: Pool<AsyncPgConnection>) -> Self {
        Self {
            pool,
            scope: PhantomData,
        }
    }

    async fn connection(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        self.pool.get().await.into_store()
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn occupancy_from_count(count: i64) -> Result<u32, DatabaseError> {
    u32::try_from(count).map_err(|_| DatabaseError::InvalidData(format!("occupancy {count}")))
}

fn uuids<T: Copy + Into<Uuid>>(ids: &[T]) -> Vec<Uuid> {
    ids.iter().map(|id| (*id).into()).collect()
}

/// Escapes `LIKE` wildcards so user input matches literally.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::with_capacity(search.len() + 2);
    pattern.push('%');
    for c in search.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl<S: Scope> ReadStore for PgStore<S> {
    async fn hostels(&self) -> Result<Vec<Hostel>, StoreError> {
        let mut connection = self.connection().await?;
        let rows: Vec<HostelRow> = hostels::table
            .select(HostelRow::as_select())
            .order(hostels::name.asc())
            .load(&mut connection)
            .await
            .into_store()?;
        rows.into_iter().map(Hostel::try_from).collect::<Result<_, _>>().into_store()
    }

    async fn rooms(&self, hostel: Option<HostelId>) -> Result<Vec<Room>, StoreError> {
        let mut connection = self.connection().await?;
        let mut query = rooms::table
            .select(RoomRow::as_select())
            .order((rooms::floor.asc(), rooms::room_number.asc()))
            .into_boxed();
        if let Some(hostel) = hostel {
            query = query.filter(rooms::hostel_id.eq(hostel.0));
        }
        let rows: Vec<RoomRow> = query.load(&mut connection).await.into_store()?;
        rows.into_iter().map(Room::try_from).collect::<Result<_, _>>().into_store()
    }

    async fn room(&self, id: RoomId) -> Result<Option<Room>, StoreError> {
        let mut connection = self.connection().await?;
        let row: Option<RoomRow> = rooms::table
            .find(id.0)
            .select(RoomRow::as_select())
            .first(&mut connection)
            .await
            .optional()
            .into_store()?;
        row.map(Room::try_from).transpose().into_store()
    }

    async fn occupancy(&self, room: RoomId) -> Result<u32, StoreError> {
        let mut connection = self.connection().await?;
        let count: i64 = allotments::table
            .filter(allotments::room_id.eq(room.0))
            .count()
            .get_result(&mut connection)
            .await
            .into_store()?;
        occupancy_from_count(count).into_store()
    }

    async fn allotment(&self, id: AllotmentId) -> Result<Option<Allotment>, StoreError> {
        let mut connection = self.connection().await?;
        let row: Option<AllotmentRow> = allotments::table
            .find(id.0)
            .select(AllotmentRow::as_select())
            .first(&mut connection)
            .await
            .optional()
            .into_store()?;
        Ok(row.map(Allotment::from))
    }

    async fn allotment_for_student(
        &self,
        student: UserId,
    ) -> Result<Option<Allotment>, StoreError> {
        let mut connection = self.connection().await?;
        let row: Option<AllotmentRow> = allotments::table
            .filter(allotments::user_id.eq(student.0))
            .select(AllotmentRow::as_select())
            .first(&mut connection)
            .await
            .optional()
            .into_store()?;
        Ok(row.map(Allotment::from))
    }

    async fn allotments(&self, rooms: Option<&[RoomId]>) -> Result<Vec<Allotment>, StoreError> {
        let mut connection = self.connection().await?;
        let mut query = allotments::table
            .select(AllotmentRow::as_select())
            .order(allotments::allotted_at.desc())
            .into_boxed();
        if let Some(rooms) = rooms {
            query = query.filter(allotments::room_id.eq_any(uuids(rooms)));
        }
        let rows: Vec<AllotmentRow> = query.load(&mut connection).await.into_store()?;
        Ok(rows.into_iter().map(Allotment::from).collect())
    }

    async fn windows_open_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<AllotmentWindow>, StoreError> {
        let mut connection = self.connection().await?;
        let rows: Vec<WindowRow> = allotment_windows::table
            .filter(allotment_windows::open_at.le(now))
            .filter(allotment_windows::close_at.ge(now))
            .select(WindowRow::as_select())
            .load(&mut connection)
            .await
            .into_store()?;
        Ok(rows.into_iter().map(AllotmentWindow::from).collect())
    }

    async fn recent_windows(&self, limit: usize) -> Result<Vec<AllotmentWindow>, StoreError> {
        let mut connection = self.connection().await?;
        let rows: Vec<WindowRow> = allotment_windows::table
            .select(WindowRow::as_select())
            .order(allotment_windows::open_at.desc())
            .limit(sql_limit(limit))
            .load(&mut connection)
            .await
            .into_store()?;
        Ok(rows.into_iter().map(AllotmentWindow::from).collect())
    }

    async fn profile(&self, id: UserId) -> Result<Option<Profile>, StoreError> {
        let mut connection = self.connection().await?;
        let row: Option<UserRow> = users::table
            .find(id.0)
            .select(UserRow::as_select())
            .first(&mut connection)
            .await
            .optional()
            .into_store()?;
        row.map(Profile::try_from).transpose().into_store()
    }

    async fn profiles(&self, ids: &[UserId]) -> Result<Vec<Profile>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut connection = self.connection().await?;
        let rows: Vec<UserRow> = users::table
            .filter(users::id.eq_any(uuids(ids)))
            .select(UserRow::as_select())
            .load(&mut connection)
            .await
            .into_store()?;
        rows.into_iter().map(Profile::try_from).collect::<Result<_, _>>().into_store()
    }

    async fn students(&self, search: Option<&str>) -> Result<Vec<Profile>, StoreError> {
        let mut connection = self.connection().await?;
        let mut query = users::table
            .filter(users::role.eq(Role::Student.as_str()))
            .select(UserRow::as_select())
            .order(users::name.asc())
            .into_boxed();
        if let Some(search) = search.map(str::trim).filter(|search| !search.is_empty()) {
            let pattern = like_pattern(search);
            query = query.filter(
                users::name
                    .ilike(pattern.clone())
                    .or(users::email.ilike(pattern.clone()))
                    .or(users::branch.ilike(pattern)),
            );
        }
        let rows: Vec<UserRow> = query.load(&mut connection).await.into_store()?;
        rows.into_iter().map(Profile::try_from).collect::<Result<_, _>>().into_store()
    }

    async fn history_for_student(
        &self,
        student: UserId,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut connection = self.connection().await?;
        let rows: Vec<HistoryRow> = room_change_history::table
            .filter(room_change_history::user_id.eq(student.0))
            .select(HistoryRow::as_select())
            .order(room_change_history::changed_at.desc())
            .limit(sql_limit(limit))
            .load(&mut connection)
            .await
            .into_store()?;
        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }
}

#[async_trait]
impl AllotmentStore for PgStore<Service> {
    async fn delete_allotment_for_student(
        &self,
        student: UserId,
    ) -> Result<Option<Allotment>, StoreError> {
        let mut connection = self.connection().await?;
        // at most one row, allotments_user_id_index is unique
        let deleted: Option<AllotmentRow> =
            diesel::delete(allotments::table.filter(allotments::user_id.eq(student.0)))
                .returning(AllotmentRow::as_returning())
                .get_result(&mut connection)
                .await
                .optional()
                .into_store()?;
        Ok(deleted.map(Allotment::from))
    }

    async fn insert_allotment(&self, allotment: &Allotment) -> Result<InsertOutcome, StoreError> {
        let mut connection = self.connection().await?;
        let row = AllotmentRow::from(allotment);
        connection
            .transaction::<_, DatabaseError, _>(|connection| {
                async move {
                    // serializes concurrent inserts into the same room
                    let room: Option<RoomRow> = rooms::table
                        .find(row.room_id)
                        .select(RoomRow::as_select())
                        .for_update()
                        .first(connection)
                        .await
                        .optional()?;
                    let room = room.map(Room::try_from).transpose()?;
                    let count: i64 = allotments::table
                        .filter(allotments::room_id.eq(row.room_id))
                        .count()
                        .get_result(connection)
                        .await?;
                    let is_blocked = room.as_ref().is_some_and(|room| room.is_blocked);
                    let decision = decide(
                        room.as_ref(),
                        occupancy_from_count(count)?,
                        is_blocked,
                        true,
                    );
                    if let Err(denial) = decision.into_result() {
                        debug!(room_id = %row.room_id, "conditional insert rejected: {denial}");
                        return Ok(InsertOutcome::Rejected(denial));
                    }
                    let inserted: AllotmentRow = diesel::insert_into(allotments::table)
                        .values(&row)
                        .returning(AllotmentRow::as_returning())
                        .get_result(connection)
                        .await?;
                    Ok(InsertOutcome::Inserted(inserted.into()))
                }
                .scope_boxed()
            })
            .await
            .into_store()
    }

    async fn restore_allotment(&self, allotment: &Allotment) -> Result<(), StoreError> {
        let mut connection = self.connection().await?;
        diesel::insert_into(allotments::table)
            .values(AllotmentRow::from(allotment))
            .execute(&mut connection)
            .await
            .into_store()?;
        Ok(())
    }

    async fn append_history(&self, entry: NewHistoryEntry) -> Result<HistoryEntry, StoreError> {
        let mut connection = self.connection().await?;
        let row: HistoryRow = diesel::insert_into(room_change_history::table)
            .values(NewHistoryRow::from(entry))
            .returning(HistoryRow::as_returning())
            .get_result(&mut connection)
            .await
            .into_store()?;
        Ok(row.into())
    }

    async fn set_room_block(
        &self,
        room: RoomId,
        reason: Option<String>,
    ) -> Result<Option<Room>, StoreError> {
        let mut connection = self.connection().await?;
        let row: Option<RoomRow> = diesel::update(rooms::table.find(room.0))
            .set((
                rooms::is_blocked.eq(reason.is_some()),
                rooms::block_reason.eq(reason),
            ))
            .returning(RoomRow::as_returning())
            .get_result(&mut connection)
            .await
            .optional()
            .into_store()?;
        row.map(Room::try_from).transpose().into_store()
    }

    async fn insert_window(&self, window: NewWindow) -> Result<AllotmentWindow, StoreError> {
        let mut connection = self.connection().await?;
        let row: WindowRow = diesel::insert_into(allotment_windows::table)
            .values(NewWindowRow::from(window))
            .returning(WindowRow::as_returning())
            .get_result(&mut connection)
            .await
            .into_store()?;
        Ok(row.into())
    }
}

#[cfg(test)]
mod tests {
    use crate::{like_pattern, occupancy_from_count, sql_limit};

    #[test]
    fn search_wildcards_are_escaped() {
        assert_eq!(like_pattern("cse"), "%cse%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn counts_are_range_checked() {
        assert_eq!(occupancy_from_count(3).unwrap(), 3);
        assert!(occupancy_from_count(-1).is_err());
        assert_eq!(sql_limit(10), 10);
    }
}
