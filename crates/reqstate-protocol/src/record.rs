//! StateRecord — the flat, transportable form of a request's state.
//!
//! A record is what crosses a process or thread boundary, e.g. when a web
//! request enqueues a background job. Wire format (JSON):
//!
//! ```json
//! {
//!   "request_id": "4f1c…",
//!   "started_string": "2026-10-19T08:15:02.123456Z",
//!   "locale": "nl",
//!   "current_site_id": 123,
//!   "current_tenant_id": null
//! }
//! ```
//!
//! The three core keys are always present (possibly null). One `<slot>_id`
//! key exists per serialized slot of the producing registry; slots the
//! registry does not define are omitted entirely.
//!
//! On decode, keys other than the core keys and `<slot>_id` keys are
//! dropped whatever their value, so job metadata stored next to a record
//! does not make it unreadable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};
use crate::identity::IdentityId;
use crate::slots::{record_key, slot_from_record_key};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRecord")]
pub struct StateRecord {
    pub request_id: Option<String>,
    /// UTC timestamp in RFC 3339 form.
    pub started_string: Option<String>,
    pub locale: Option<String>,
    /// `<slot>_id` → id (null when the slot was empty).
    #[serde(flatten)]
    pub slot_ids: BTreeMap<String, Option<IdentityId>>,
}

/// Wire shape before `<slot>_id` values are checked.
#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    started_string: Option<String>,
    #[serde(default)]
    locale: Option<String>,
    #[serde(flatten)]
    rest: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<RawRecord> for StateRecord {
    type Error = String;

    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let mut slot_ids = BTreeMap::new();
        for (key, value) in raw.rest {
            if slot_from_record_key(&key).is_none() {
                continue;
            }
            let id = serde_json::from_value::<Option<IdentityId>>(value)
                .map_err(|e| format!("{key}: {e}"))?;
            slot_ids.insert(key, id);
        }
        Ok(Self {
            request_id: raw.request_id,
            started_string: raw.started_string,
            locale: raw.locale,
            slot_ids,
        })
    }
}

impl StateRecord {
    /// The id recorded for `slot`, if the key is present and non-null.
    pub fn slot_id(&self, slot: &str) -> Option<&IdentityId> {
        self.slot_ids.get(&record_key(slot)).and_then(Option::as_ref)
    }

    /// Whether the record carries a key for `slot` (even a null one).
    pub fn has_slot(&self, slot: &str) -> bool {
        self.slot_ids.contains_key(&record_key(slot))
    }

    pub fn set_slot_id(&mut self, slot: &str, id: Option<IdentityId>) {
        self.slot_ids.insert(record_key(slot), id);
    }

    /// Slot names carried by this record, in key order.
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.slot_ids.keys().filter_map(|k| slot_from_record_key(k))
    }

    pub fn to_json(&self) -> StateResult<String> {
        serde_json::to_string(self).map_err(|e| StateError::InvalidRecord(e.to_string()))
    }

    pub fn to_value(&self) -> StateResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| StateError::InvalidRecord(e.to_string()))
    }

    pub fn from_json(json: &str) -> StateResult<Self> {
        serde_json::from_str(json).map_err(|e| StateError::InvalidRecord(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> StateResult<Self> {
        serde_json::from_value(value).map_err(|e| StateError::InvalidRecord(e.to_string()))
    }
}
