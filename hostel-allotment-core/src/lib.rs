//! Room allotment rules and the transaction that applies them.

pub mod admin;
pub mod coordinator;
pub mod memory;
pub mod models;
pub mod occupancy;
pub mod rules;
pub mod store;
pub mod window;

pub use admin::{AdminError, AdminOverride};
pub use coordinator::{
    AllotmentCommit, AllotmentError, AttemptState, Coordinator, InsertFailure, WindowCheck,
};
pub use rules::{decide, Decision, Denial};
pub use store::{AllotmentStore, InsertOutcome, ReadStore, StoreError};
pub use window::{is_window_open, WindowState};
