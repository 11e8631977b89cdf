//! ==============================================================================
//! domain.rs - documents and person records
//! ==============================================================================
//!
//! purpose:
//!     the values that flow between the cloud stores and the device.
//!     - Document: a parsed json tree, read-only once built.
//!     - PersonRecord: the flat field map kept per rfid tag.
//!     - Roster: rfid uid -> PersonRecord.
//!
//! relationships:
//!     - used by: sync.rs (fetch, extract, map, synchronize)
//!     - used by: cloud.rs (payloads for set/update)
//!
//! ==============================================================================

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

pub const FIELD_FULL_NAME: &str = "fullName";
pub const FIELD_EMAIL: &str = "email";
pub const FIELD_ROLE: &str = "role";
pub const FIELD_SCHEDULES: &str = "schedules";

/// fullName used when a document has none
pub const UNKNOWN_NAME: &str = "Unknown";
/// schedules used when a document has none
pub const EMPTY_SCHEDULES: &str = "[]";

/// rfid uid -> person record
pub type Roster = BTreeMap<String, PersonRecord>;

/// a json tree exchanged with the cloud stores
///
/// there are no mutating methods: build a new document instead of
/// editing one that someone else may be reading.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Document(Value);

impl Document {
    /// parse a raw response payload
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload).map(Self)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// look up a slash-delimited path such as `fields/role/stringValue`
    ///
    /// a segment of the form `[n]` indexes into an array; on an object it is
    /// an ordinary key.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(&self.0, |node, segment| match (node, parse_index(segment)) {
                (Value::Array(items), Some(i)) => items.get(i),
                // an object key may itself look like `[0]`
                (node, _) => node.as_object()?.get(segment),
            })
    }

    /// string form of the value at `path`
    ///
    /// strings come back verbatim, anything else as compact json.
    pub fn get_string(&self, path: &str) -> Option<String> {
        self.get(path).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    segment.strip_prefix('[')?.strip_suffix(']')?.parse().ok()
}

/// a teacher or student as seen by the device
///
/// keys are the firestore field names (`fullName`, `email`, `role`, `schedules`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct PersonRecord {
    fields: BTreeMap<String, String>,
}

impl PersonRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn full_name(&self) -> Option<&str> {
        self.get(FIELD_FULL_NAME)
    }

    pub fn email(&self) -> Option<&str> {
        self.get(FIELD_EMAIL)
    }

    pub fn role(&self) -> Option<&str> {
        self.get(FIELD_ROLE)
    }

    /// serialized firestore arrayValue, not parsed further
    pub fn schedules(&self) -> Option<&str> {
        self.get(FIELD_SCHEDULES)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
