//! ==============================================================================
//! sync.rs - guarded cloud operations and roster synchronization
//! ==============================================================================
//!
//! purpose:
//!     every remote call the device makes goes through here, behind the gate:
//!     sd fallback off, network up, sdk ready. nothing is retried and nothing
//!     is queued; a closed gate or a failed call just means the caller keeps
//!     whatever it had before.
//!
//! relationships:
//!     - used by: main.rs (poll loop)
//!     - uses: cloud.rs (CloudProvider), watchdog.rs (Watchdog)
//!     - uses: domain.rs (Document, PersonRecord, Roster)
//!
//! flow of sync_collection:
//!
//! ```text
//!     gate -> fetch_collection -> for each documents[i]:
//!                                    extract rfidUid -> map_person -> roster
//!                                    feed watchdog
//! ```
//!
//! ==============================================================================

use crate::cloud::CloudProvider;
use crate::domain::{
    Document, PersonRecord, Roster, EMPTY_SCHEDULES, FIELD_EMAIL, FIELD_FULL_NAME, FIELD_ROLE,
    FIELD_SCHEDULES, UNKNOWN_NAME,
};
use crate::error::SyncError;
use crate::watchdog::Watchdog;

use serde_json::Value;

const RFID_UID_PATH: &str = "fields/rfidUid/stringValue";
const FULL_NAME_PATH: &str = "fields/fullName/stringValue";
const EMAIL_PATH: &str = "fields/email/stringValue";
const ROLE_PATH: &str = "fields/role/stringValue";
const SCHEDULES_PATH: &str = "fields/schedules/arrayValue";

/// device state the gate reads; owned and updated by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFlags {
    /// running from the sd card, cloud is off limits
    pub sd_mode: bool,
    /// network link is up
    pub connected: bool,
}

/// everything a guarded operation needs, passed in explicitly
pub struct SyncContext<C, W> {
    pub flags: DeviceFlags,
    pub project_id: String,
    pub cloud: C,
    pub watchdog: W,
}

/// whether a failed overwrite is reported on the console
///
/// only `write_node` takes this; `update_node` always reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureLog {
    Log,
    Quiet,
}

impl<C, W> SyncContext<C, W>
where
    C: CloudProvider,
    W: Watchdog,
{
    pub fn new(flags: DeviceFlags, project_id: impl Into<String>, cloud: C, watchdog: W) -> Self {
        Self {
            flags,
            project_id: project_id.into(),
            cloud,
            watchdog,
        }
    }

    /// true only when sd fallback is off, the network is up and the sdk is ready
    pub fn gate_open(&self) -> bool {
        !self.flags.sd_mode && self.flags.connected && self.cloud.is_ready()
    }

    fn ensure_gate(&self) -> Result<(), SyncError> {
        if self.gate_open() {
            Ok(())
        } else {
            Err(SyncError::GateClosed)
        }
    }
}

// ==============================================================================
// remote operations
// ==============================================================================

/// fetch every document in `collection` as one response document
pub fn fetch_collection<C, W>(
    ctx: &mut SyncContext<C, W>,
    collection: &str,
) -> Result<Document, SyncError>
where
    C: CloudProvider,
    W: Watchdog,
{
    ctx.ensure_gate()?;
    ctx.watchdog.feed();

    let payload = ctx.cloud.get_documents(&ctx.project_id, collection)?;
    Ok(Document::parse(&payload)?)
}

/// overwrite the node at `path` with `value`
pub fn write_node<C, W>(
    ctx: &mut SyncContext<C, W>,
    path: &str,
    value: &Document,
    failure_log: FailureLog,
) -> Result<(), SyncError>
where
    C: CloudProvider,
    W: Watchdog,
{
    ctx.ensure_gate()?;
    ctx.watchdog.feed();

    ctx.cloud.set_json(path, value).map_err(|e| {
        if failure_log == FailureLog::Log {
            tracing::warn!(%path, reason = %e, "Failed to write to RTDB");
        }
        SyncError::from(e)
    })
}

/// merge `value` into the node at `path`, keeping siblings
pub fn update_node<C, W>(
    ctx: &mut SyncContext<C, W>,
    path: &str,
    value: &Document,
) -> Result<(), SyncError>
where
    C: CloudProvider,
    W: Watchdog,
{
    ctx.ensure_gate()?;
    ctx.watchdog.feed();

    ctx.cloud.update_node(path, value).map_err(|e| {
        tracing::warn!(%path, reason = %e, "Failed to update node in RTDB");
        SyncError::from(e)
    })
}

// ==============================================================================
// local extraction
// ==============================================================================

/// string form of the field at `path`, if present
pub fn extract_field(doc: &Document, path: &str) -> Option<String> {
    doc.get_string(path)
}

/// project one firestore document onto a person record
///
/// fullName falls back to "Unknown" and schedules to "[]";
/// email and role are left out when missing.
pub fn map_person(doc: &Document) -> PersonRecord {
    let mut person = PersonRecord::new();

    person.insert(
        FIELD_FULL_NAME,
        extract_field(doc, FULL_NAME_PATH).unwrap_or_else(|| UNKNOWN_NAME.to_string()),
    );
    if let Some(email) = extract_field(doc, EMAIL_PATH) {
        person.insert(FIELD_EMAIL, email);
    }
    if let Some(role) = extract_field(doc, ROLE_PATH) {
        person.insert(FIELD_ROLE, role);
    }
    person.insert(
        FIELD_SCHEDULES,
        extract_field(doc, SCHEDULES_PATH).unwrap_or_else(|| EMPTY_SCHEDULES.to_string()),
    );

    person
}

// ==============================================================================
// roster synchronization
// ==============================================================================

/// pull `collection` into `roster`, keyed by rfid uid
///
/// documents without a uid (or with an empty one) are skipped. a later
/// document with the same uid replaces the earlier one. on any failure the
/// roster is left exactly as it was. returns the roster size afterwards.
pub fn sync_collection<C, W>(
    ctx: &mut SyncContext<C, W>,
    collection: &str,
    roster: &mut Roster,
    default_role: Option<&str>,
) -> Result<usize, SyncError>
where
    C: CloudProvider,
    W: Watchdog,
{
    ctx.ensure_gate()?;

    tracing::info!("Fetching {} from Firestore...", collection);

    let response = fetch_collection(ctx, collection).map_err(|e| {
        tracing::warn!(error = %e, "Failed to fetch {} from Firestore", collection);
        e
    })?;

    if let Some(Value::Array(documents)) = response.get("documents") {
        for entry in documents {
            let doc = Document::from(entry.clone());

            if let Some(uid) = extract_field(&doc, RFID_UID_PATH).filter(|uid| !uid.is_empty()) {
                let mut person = map_person(&doc);
                if let Some(role) = default_role {
                    if !person.contains(FIELD_ROLE) {
                        person.insert(FIELD_ROLE, role);
                    }
                }
                roster.insert(uid, person);
            }

            ctx.watchdog.feed();
        }
    }

    tracing::info!("Fetched {} {} from Firestore", roster.len(), collection);
    Ok(roster.len())
}
