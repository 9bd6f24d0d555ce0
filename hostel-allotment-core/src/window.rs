use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::models::AllotmentWindow;
use crate::store::ReadStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowState {
    pub open: bool,
    pub active_window: Option<AllotmentWindow>,
}

impl WindowState {
    #[must_use]
    pub const fn closed() -> Self {
        Self {
            open: false,
            active_window: None,
        }
    }
}

/// Picks the active window among overlapping candidates: latest `open_at`
/// wins, then latest `close_at`, then the larger id.
pub fn select_active(
    windows: impl IntoIterator<Item = AllotmentWindow>,
    now: DateTime<Utc>,
) -> Option<AllotmentWindow> {
    windows
        .into_iter()
        .filter(|window| window.contains(now))
        .max_by_key(|window| (window.open_at, window.close_at, window.id))
}

/// Never reports open when the store cannot be asked.
pub async fn is_window_open<S>(store: &S, now: DateTime<Utc>) -> WindowState
where
    S: ReadStore + ?Sized,
{
    match store.windows_open_at(now).await {
        Ok(windows) => select_active(windows, now).map_or_else(WindowState::closed, |window| {
            WindowState {
                open: true,
                active_window: Some(window),
            }
        }),
        Err(err) => {
            error!("allotment window check failed, treating as closed: {err}");
            WindowState::closed()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone as _, Utc};

    use crate::memory::{MemoryStore, Operation};
    use crate::models::{AllotmentWindow, WindowId};
    use crate::window::{is_window_open, select_active};

    fn window(title: &str, open_offset_hours: i64, close_offset_hours: i64) -> AllotmentWindow {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap();
        AllotmentWindow {
            id: WindowId::new_random(),
            title: title.to_owned(),
            open_at: base + Duration::hours(open_offset_hours),
            close_at: base + Duration::hours(close_offset_hours),
            created_by: None,
        }
    }

    fn noon() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_window_matches() {
        let windows = vec![window("past", -10, -5), window("future", 5, 10)];
        assert_eq!(select_active(windows, noon()), None);
    }

    #[test]
    fn bounds_are_inclusive() {
        let opening = window("opening", 0, 4);
        let closing = window("closing", -4, 0);
        assert!(opening.contains(noon()));
        assert!(closing.contains(noon()));
    }

    #[test]
    fn latest_opened_wins_when_overlapping() {
        let older = window("first round", -48, 48);
        let newer = window("second round", -2, 2);
        let active = select_active(vec![newer.clone(), older], noon());
        assert_eq!(active, Some(newer));
    }

    #[test]
    fn equal_open_at_prefers_later_close() {
        let short = window("short", -1, 1);
        let long = window("long", -1, 5);
        assert_eq!(
            select_active(vec![long.clone(), short], noon()).map(|w| w.title),
            Some(long.title)
        );
    }

    #[tokio::test]
    async fn open_window_is_reported_with_details() {
        let store = MemoryStore::new();
        let active = window("semester start", -1, 1);
        store.seed_window(active.clone());
        let state = is_window_open(&store, noon()).await;
        assert!(state.open);
        assert_eq!(state.active_window, Some(active));
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = MemoryStore::new();
        store.seed_window(window("semester start", -1, 1));
        store.fail_next(Operation::Windows, 1);
        let state = is_window_open(&store, noon()).await;
        assert!(!state.open);
        assert_eq!(state.active_window, None);
    }
}
