//! Append only audit trail of every mutation.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::notify::Notifier;
use crate::storage::Storage;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    Export,
    Import,
}

impl AuditAction {
    pub const ALL: [AuditAction; 7] = [
        AuditAction::Create,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::Export,
        AuditAction::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Export => "export",
            AuditAction::Import => "import",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AuditAction::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| Error::validation("action", format!("unknown audit action '{}'", s)))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuditEntity {
    Measurement,
    Limit,
    Specification,
    User,
    System,
}

impl AuditEntity {
    pub const ALL: [AuditEntity; 5] = [
        AuditEntity::Measurement,
        AuditEntity::Limit,
        AuditEntity::Specification,
        AuditEntity::User,
        AuditEntity::System,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Measurement => "measurement",
            AuditEntity::Limit => "limit",
            AuditEntity::Specification => "specification",
            AuditEntity::User => "user",
            AuditEntity::System => "system",
        }
    }
}

impl fmt::Display for AuditEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AuditEntity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AuditEntity::ALL
            .iter()
            .copied()
            .find(|entity| entity.as_str() == s)
            .ok_or_else(|| Error::validation("entity", format!("unknown audit entity '{}'", s)))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// A single changed field, addressed with a dotted path (e.g. `limits.max`).
pub struct FieldChange {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Immutable audit record. Entries are never changed or removed once written.
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub entity_type: AuditEntity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Vec<FieldChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
/// What a mutation reports. The trail adds id, timestamp and actor.
pub struct AuditEvent {
    pub action: AuditAction,
    pub entity_type: AuditEntity,
    pub entity_id: Option<String>,
    pub changes: Option<Vec<FieldChange>>,
    pub metadata: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, entity_type: AuditEntity) -> Self {
        AuditEvent {
            action,
            entity_type,
            entity_id: None,
            changes: None,
            metadata: None,
        }
    }

    pub fn entity(mut self, id: impl Into<String>) -> Self {
        self.entity_id = Some(id.into());
        self
    }

    pub fn changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = Some(changes);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Field level difference between two serializable values.
///
/// Nested objects are flattened into dotted paths, fields present on one side only are reported
/// with `null` on the other side.
pub fn diff<T: Serialize>(old: &T, new: &T) -> Result<Vec<FieldChange>> {
    let mut old_fields = BTreeMap::new();
    let mut new_fields = BTreeMap::new();
    flatten("", serde_json::to_value(old)?, &mut old_fields);
    flatten("", serde_json::to_value(new)?, &mut new_fields);

    let fields: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();
    let changes = fields
        .into_iter()
        .filter_map(|field| {
            let old_value = old_fields.get(field).cloned().unwrap_or(Value::Null);
            let new_value = new_fields.get(field).cloned().unwrap_or(Value::Null);
            if old_value == new_value {
                None
            } else {
                Some(FieldChange {
                    field: field.clone(),
                    old_value,
                    new_value,
                })
            }
        })
        .collect();
    Ok(changes)
}

fn flatten(prefix: &str, value: Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, value) in map {
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, value, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub actor: Option<String>,
    pub action: Option<AuditAction>,
    pub entity_type: Option<AuditEntity>,
    /// Case insensitive match on actor, action, entity type and entity id.
    pub search: Option<String>,
}

impl AuditFilter {
    /// Restricts the filter to whole days. `to` is inclusive up to its last instant.
    pub fn days(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.start = from
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|start| Utc.from_utc_datetime(&start));
        self.end = to
            .and_then(|date| date.and_hms_nano_opt(23, 59, 59, 999_999_999))
            .map(|end| Utc.from_utc_datetime(&end));
        self
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if self.start.map_or(false, |start| entry.timestamp < start) {
            return false;
        }
        if self.end.map_or(false, |end| entry.timestamp > end) {
            return false;
        }
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if self.action.map_or(false, |action| entry.action != action) {
            return false;
        }
        if self
            .entity_type
            .map_or(false, |entity_type| entry.entity_type != entity_type)
        {
            return false;
        }
        match &self.search {
            Some(search) if !search.is_empty() => {
                let search = search.to_lowercase();
                entry.actor.to_lowercase().contains(&search)
                    || entry.action.as_str().contains(&search)
                    || entry.entity_type.as_str().contains(&search)
                    || entry
                        .entity_id
                        .as_ref()
                        .map_or(false, |id| id.to_lowercase().contains(&search))
            }
            _ => true,
        }
    }
}

/// Returns the 1-based `page` of `items`, empty when out of range.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    if page == 0 || page_size == 0 {
        return &[];
    }
    let start = (page - 1).saturating_mul(page_size);
    if start >= items.len() {
        return &[];
    }
    let end = (start + page_size).min(items.len());
    &items[start..end]
}

struct TrailState {
    actor: String,
    entries: Arc<Vec<AuditEntry>>,
}

#[derive(Clone)]
/// Shared handle to the audit trail. Clones append to the same log.
pub struct AuditTrail {
    state: Arc<Mutex<TrailState>>,
    storage: Arc<dyn Storage>,
    notifier: Notifier,
}

impl AuditTrail {
    pub fn new(storage: Arc<dyn Storage>, notifier: Notifier, actor: impl Into<String>) -> Self {
        AuditTrail {
            state: Arc::new(Mutex::new(TrailState {
                actor: actor.into(),
                entries: Arc::new(Vec::new()),
            })),
            storage,
            notifier,
        }
    }

    /// Creates a trail that continues the log already present in `storage`.
    pub fn load(storage: Arc<dyn Storage>, notifier: Notifier, actor: impl Into<String>) -> Result<Self> {
        let entries = storage.load_audit()?;
        log::debug!(target: "wpmon::audit", "Loaded {} audit entries", entries.len());
        let trail = AuditTrail::new(storage, notifier, actor);
        trail.state().entries = Arc::new(entries);
        Ok(trail)
    }

    fn state(&self) -> MutexGuard<'_, TrailState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn actor(&self) -> String {
        self.state().actor.clone()
    }

    pub fn set_actor(&self, actor: impl Into<String>) {
        self.state().actor = actor.into();
    }

    /// Appends an entry for `event`.
    ///
    /// Persisting the entry may fail. That is logged and reported as a notification, the
    /// entry stays in the in-memory log and the originating mutation is not affected.
    pub fn record(&self, event: AuditEvent) -> AuditEntry {
        let entry = {
            let mut state = self.state();
            let entry = AuditEntry {
                id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                actor: state.actor.clone(),
                action: event.action,
                entity_type: event.entity_type,
                entity_id: event.entity_id,
                changes: event.changes,
                metadata: event.metadata,
            };
            Arc::make_mut(&mut state.entries).push(entry.clone());
            entry
        };

        log::debug!(target: "wpmon::audit", "{} {} {:?} by '{}'",
                    entry.action, entry.entity_type, entry.entity_id, entry.actor);

        if let Err(err) = self.storage.append_audit(&entry) {
            log::error!(target: "wpmon::audit", "Could not persist audit entry: '{}'", err);
            self.notifier.error(format!("Could not persist audit entry: {}", err));
        }
        entry
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Arc<Vec<AuditEntry>> {
        Arc::clone(&self.state().entries)
    }

    /// Entries matching `filter`, newest first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let entries = self.entries();
        let mut matching: Vec<AuditEntry> = entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn entry_at(day: u32, hour: u32) -> AuditEntry {
        AuditEntry {
            id: format!("{}-{}", day, hour),
            timestamp: Utc.with_ymd_and_hms(2024, 5, day, hour, 30, 0).unwrap(),
            actor: String::from("admin"),
            action: AuditAction::Create,
            entity_type: AuditEntity::Measurement,
            entity_id: None,
            changes: None,
            metadata: None,
        }
    }

    #[test]
    fn day_range_includes_the_whole_last_day() {
        let filter = AuditFilter::default().days(NaiveDate::from_ymd_opt(2024, 5, 2), NaiveDate::from_ymd_opt(2024, 5, 3));
        assert!(!filter.matches(&entry_at(1, 23)));
        assert!(filter.matches(&entry_at(2, 0)));
        assert!(filter.matches(&entry_at(3, 23)));
        assert!(!filter.matches(&entry_at(4, 0)));

        let open_ended = AuditFilter::default().days(None, NaiveDate::from_ymd_opt(2024, 5, 1));
        assert!(open_ended.start.is_none());
        assert!(open_ended.matches(&entry_at(1, 23)));
    }

    fn trail() -> (AuditTrail, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        (
            AuditTrail::new(storage.clone(), Notifier::silent(), "admin"),
            storage,
        )
    }

    #[test]
    fn parses_action_and_entity_names() {
        assert_eq!("import".parse::<AuditAction>().unwrap(), AuditAction::Import);
        assert_eq!("limit".parse::<AuditEntity>().unwrap(), AuditEntity::Limit);
        assert!("rename".parse::<AuditAction>().is_err());
    }

    #[test]
    fn diff_reports_nested_fields() {
        let old = json!({ "location": "Line 1", "luminosity": 500, "limits": { "min": 500, "max": 1000 } });
        let new = json!({ "location": "Line 1", "luminosity": 650, "limits": { "min": 400, "max": 1000 } });
        let changes = diff(&old, &new).unwrap();
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["limits.min", "luminosity"]);
        assert_eq!(changes[1].old_value, json!(500));
        assert_eq!(changes[1].new_value, json!(650));
    }

    #[test]
    fn diff_reports_added_and_removed_fields() {
        let old = json!({ "notes": "calibrated" });
        let new = json!({ "deviceId": "DEV-2" });
        let changes = diff(&old, &new).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "deviceId");
        assert_eq!(changes[0].old_value, Value::Null);
        assert_eq!(changes[1].new_value, Value::Null);
    }

    #[test]
    fn diff_of_equal_values_is_empty() {
        let value = json!({ "a": 1, "b": { "c": [1, 2] } });
        assert!(diff(&value, &value).unwrap().is_empty());
    }

    #[test]
    fn record_appends_and_persists() {
        let (trail, storage) = trail();
        let before = trail.entries();
        let entry = trail.record(AuditEvent::new(AuditAction::Create, AuditEntity::Measurement).entity("m-1"));

        assert_eq!(entry.actor, "admin");
        assert!(before.is_empty());
        assert_eq!(trail.entries().len(), 1);
        assert_eq!(storage.load_audit().unwrap(), vec![entry]);
    }

    #[test]
    fn persistence_failure_keeps_entry() {
        let (notifier, rx) = Notifier::channel();
        let storage = Arc::new(MemoryStorage::new());
        let trail = AuditTrail::new(storage.clone(), notifier, "admin");
        storage.set_failing(true);

        trail.record(AuditEvent::new(AuditAction::Delete, AuditEntity::Measurement));

        assert_eq!(trail.entries().len(), 1);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn query_filters_and_orders_newest_first() {
        let (trail, _) = trail();
        trail.record(AuditEvent::new(AuditAction::Create, AuditEntity::Measurement).entity("abc"));
        trail.set_actor("moderator");
        trail.record(AuditEvent::new(AuditAction::Update, AuditEntity::Limit).entity("torque"));
        trail.record(AuditEvent::new(AuditAction::Export, AuditEntity::Measurement));

        let all = trail.query(&AuditFilter::default());
        assert_eq!(all.len(), 3);
        assert!(all[0].timestamp >= all[2].timestamp);

        let by_actor = trail.query(&AuditFilter {
            actor: Some(String::from("admin")),
            ..AuditFilter::default()
        });
        assert_eq!(by_actor.len(), 1);

        let search = trail.query(&AuditFilter {
            search: Some(String::from("TORQ")),
            ..AuditFilter::default()
        });
        assert_eq!(search.len(), 1);
        assert_eq!(search[0].entity_type, AuditEntity::Limit);

        let measurements = trail.query(&AuditFilter {
            entity_type: Some(AuditEntity::Measurement),
            action: Some(AuditAction::Export),
            ..AuditFilter::default()
        });
        assert_eq!(measurements.len(), 1);
    }

    #[test]
    fn pages_are_one_based() {
        let items: Vec<u32> = (1..=25).collect();
        assert_eq!(paginate(&items, 1, 10), &items[0..10]);
        assert_eq!(paginate(&items, 3, 10), &items[20..25]);
        assert!(paginate(&items, 4, 10).is_empty());
        assert!(paginate(&items, 0, 10).is_empty());
    }
}
