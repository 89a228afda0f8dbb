//! Conversion between the live container and a flat [`StateRecord`].

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use reqstate_protocol::{record_key, IdentityRef, Locale, StateError, StateRecord, StateResult};
use tracing::{debug, trace};

use crate::container::RequestState;
use crate::store::ScopedStore;

/// `YYYY-MM-DD HH:MM:SS UTC` stamps, as written by older record producers.
const LEGACY_UTC_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Render a start time the way records carry it: RFC 3339, UTC, microseconds.
pub fn format_started(started: DateTime<Utc>) -> String {
    started.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a record's `started_string`.
///
/// Accepts RFC 3339 with any offset (normalised to UTC) and the legacy
/// `YYYY-MM-DD HH:MM:SS UTC` form.
pub fn parse_started(value: &str) -> StateResult<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, LEGACY_UTC_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| StateError::InvalidTimestamp(value.to_string()))
}

impl<S: ScopedStore> RequestState<S> {
    /// Flatten the unit's state for a cross-boundary handoff.
    ///
    /// Core keys are always present. Each slot the registry marks for
    /// records gets a `<slot>_id` key, null when the slot is empty.
    pub fn to_record(&self) -> StateRecord {
        let snapshot = self.snapshot();
        let mut record = StateRecord {
            request_id: snapshot.request_id().map(str::to_string),
            started_string: Some(format_started(snapshot.started())),
            locale: snapshot.locale().map(Locale::to_string),
            ..StateRecord::default()
        };
        for spec in self.registry().record_specs() {
            record.set_slot_id(&spec.name, snapshot.slot(&spec.name).map(|i| i.id()));
        }
        record
    }

    /// Load a record produced by [`to_record`](Self::to_record).
    ///
    /// Timestamp and locale are validated before anything is written, and
    /// every id is resolved before the record is touched, so a failure
    /// leaves the unit's state as it was. Slot ids resolve through their
    /// repositories; a miss empties the slot. An absent `started_string`
    /// restamps `started` with now.
    pub fn from_record(&self, record: &StateRecord) -> StateResult<()> {
        let started = record
            .started_string
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(parse_started)
            .transpose()?;
        let locale = record
            .locale
            .as_deref()
            .map(str::parse::<Locale>)
            .transpose()?;

        let mut resolved: Vec<(String, Option<IdentityRef>)> = Vec::new();
        for spec in self.registry().specs() {
            if let Some(id) = record.slot_id(&spec.name) {
                resolved.push((spec.name.clone(), self.resolve(spec, Some(id))?));
            }
        }
        for slot in record.slots() {
            if !self.registry().contains(slot) {
                trace!(key = %record_key(slot), "record key has no registry slot, ignored");
            }
        }

        let started = started.unwrap_or_else(|| self.now());
        let request_id = record.request_id.clone();
        debug!(slots = resolved.len(), request_id = ?request_id, "hydrating request state");

        self.record(|r| {
            for (slot, identity) in resolved {
                r.set_slot(&slot, identity);
            }
            if request_id.is_some() {
                r.request_id = request_id;
            }
            r.started = started;
            if locale.is_some() {
                r.locale = locale;
            }
        });
        Ok(())
    }
}
