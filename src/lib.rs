//! ==============================================================================
//! attendance-sync - cloud sync helpers for an rfid attendance device
//! ==============================================================================
//!
//! pulls teacher/student records out of firestore into rosters keyed by rfid
//! tag, and pushes attendance/status nodes into the realtime database.
//! every remote call sits behind the same gate (sd fallback off, network up,
//! sdk ready) and reports failure as a value, never a panic.
//!
//! ==============================================================================

pub mod cloud;
pub mod config;
pub mod domain;
pub mod error;
pub mod sync;
pub mod watchdog;

pub use cloud::{CloudProvider, FirestoreRtdb, MemoryCloud};
pub use domain::{Document, PersonRecord, Roster};
pub use error::{SdkError, SyncError};
pub use sync::{
    extract_field, fetch_collection, map_person, sync_collection, update_node, write_node,
    DeviceFlags, FailureLog, SyncContext,
};
pub use watchdog::{HeartbeatWatchdog, Watchdog};
