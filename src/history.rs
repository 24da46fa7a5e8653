use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{EventKind, StreamEvent};
use crate::models::ResearchResult;
use crate::persistence::HistoryBackend;

// ============================================================================
// Records
// ============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// Status only moves forward, and terminal states are never re-opened.
    pub fn can_become(&self, next: RecordStatus) -> bool {
        *self == next || (!self.is_terminal() && next.rank() > self.rank())
    }
}

/// One past research task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchRecord {
    pub id: String,
    pub query: String,
    pub status: RecordStatus,
    #[serde(default)]
    pub result: Option<ResearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
}

impl ResearchRecord {
    pub fn new(query: impl Into<String>, status: RecordStatus) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            query: query.into(),
            status,
            result: None,
            error: None,
            timestamp: Utc::now(),
            pinned: false,
        }
    }

    /// Merges `patch`. A patch whose status change is not allowed is dropped
    /// as a whole.
    fn apply(&mut self, patch: RecordPatch) -> bool {
        if let Some(status) = patch.status {
            if !self.status.can_become(status) {
                log::warn!(
                    "refusing to move research {} from {} to {}",
                    self.id,
                    self.status,
                    status
                );
                return false;
            }
            self.status = status;
        }
        if let Some(query) = patch.query {
            self.query = query;
        }
        if let Some(result) = patch.result {
            if self.status == RecordStatus::Completed {
                self.result = Some(result);
            }
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
        if self.status != RecordStatus::Failed {
            self.error = None;
        }
        true
    }
}

// ============================================================================
// Update Commands
// ============================================================================

/// Partial update merged into a record by [`HistoryStore::update_record`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub query: Option<String>,
    pub status: Option<RecordStatus>,
    pub result: Option<ResearchResult>,
    pub error: Option<String>,
}

impl RecordPatch {
    pub fn status(status: RecordStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn in_progress() -> Self {
        Self::status(RecordStatus::InProgress)
    }

    pub fn completed(result: ResearchResult) -> Self {
        Self {
            status: Some(RecordStatus::Completed),
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(RecordStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Update implied by a stream event, if any. The caller decides whether
    /// and where to apply it.
    pub fn from_event(event: &StreamEvent) -> Option<Self> {
        match &event.kind {
            EventKind::ReportComplete => Some(Self::completed(
                ResearchResult::from_payload(&event.payload).unwrap_or_default(),
            )),
            EventKind::Error => Some(Self::failed(
                event
                    .message
                    .clone()
                    .unwrap_or_else(|| "research pipeline reported an error".to_string()),
            )),
            EventKind::Other(_) => None,
            _ => Some(Self::in_progress()),
        }
    }
}

// ============================================================================
// Grouping
// ============================================================================

/// Records partitioned by recency. Pinned records only ever appear in
/// `pinned`.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryGroups<'a> {
    pub pinned: Vec<&'a ResearchRecord>,
    pub today: Vec<&'a ResearchRecord>,
    pub yesterday: Vec<&'a ResearchRecord>,
    pub last_week: Vec<&'a ResearchRecord>,
    pub older: Vec<&'a ResearchRecord>,
}

impl<'a> HistoryGroups<'a> {
    pub fn len(&self) -> usize {
        self.pinned.len() + self.today.len() + self.yesterday.len() + self.last_week.len() + self.older.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sections(&self) -> [(&'static str, &[&'a ResearchRecord]); 5] {
        [
            ("pinned", self.pinned.as_slice()),
            ("today", self.today.as_slice()),
            ("yesterday", self.yesterday.as_slice()),
            ("lastWeek", self.last_week.as_slice()),
            ("older", self.older.as_slice()),
        ]
    }
}

fn start_of_day<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // midnight skipped by a DST jump
        None => tz.from_utc_datetime(&midnight).with_timezone(&Utc),
    }
}

fn days_before(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days)).unwrap_or(NaiveDate::MIN)
}

// ============================================================================
// History Store
// ============================================================================

/// Persisted collection of research records plus the "current record"
/// pointer.
///
/// Records are always kept in default order: pinned first, then newest
/// first. Every mutation writes the whole collection to the backend.
pub struct HistoryStore<B: HistoryBackend> {
    backend: B,
    records: Vec<ResearchRecord>,
    current: Option<String>,
}

impl<B: HistoryBackend> HistoryStore<B> {
    /// Loads the persisted collection. Missing or unreadable data yields an
    /// empty history.
    pub fn open(backend: B) -> Self {
        let records = match backend.load_all() {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<ResearchRecord>>(&raw) {
                Ok(records) => {
                    log::info!("Loaded history from storage ({} records)", records.len());
                    records
                }
                Err(err) => {
                    log::error!("Failed to parse stored history, starting empty: {}", err);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                log::error!("Failed to load history, starting empty: {}", err);
                Vec::new()
            }
        };

        let mut store = Self {
            backend,
            records,
            current: None,
        };
        store.sort();
        store
    }

    pub fn records(&self) -> &[ResearchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ResearchRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn current(&self) -> Option<&ResearchRecord> {
        self.current.as_deref().and_then(|id| self.get(id))
    }

    pub fn add_record(&mut self, query: impl Into<String>, status: RecordStatus) -> ResearchRecord {
        let record = ResearchRecord::new(query, status);
        log::info!("Added research to history: {} ({})", record.id, record.query);

        self.records.push(record.clone());
        self.current = Some(record.id.clone());
        self.sort();
        self.persist();
        record
    }

    /// Merges `patch` into the record with `id`. Unknown ids are a logged
    /// no-op.
    pub fn update_record(&mut self, id: &str, patch: RecordPatch) -> Option<&ResearchRecord> {
        let Some(index) = self.records.iter().position(|r| r.id == id) else {
            log::warn!("update ignored, research {} not found", id);
            return None;
        };
        if self.records[index].apply(patch) {
            log::info!("Updated research {} ({})", id, self.records[index].status);
            self.persist();
        }
        self.records.get(index)
    }

    pub fn delete_record(&mut self, id: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|r| r.id != id);
        if self.records.len() == before {
            log::warn!("delete ignored, research {} not found", id);
            return false;
        }
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        log::info!("Deleted research {} from history", id);
        self.persist();
        true
    }

    /// Flips `pinned` and returns the new value.
    pub fn toggle_pin(&mut self, id: &str) -> Option<bool> {
        let Some(record) = self.records.iter_mut().find(|r| r.id == id) else {
            log::warn!("pin ignored, research {} not found", id);
            return None;
        };
        record.pinned = !record.pinned;
        let pinned = record.pinned;
        log::info!("Toggled pin for research {} (pinned: {})", id, pinned);
        self.sort();
        self.persist();
        Some(pinned)
    }

    /// Case-insensitive substring match over queries; an empty term matches
    /// everything.
    pub fn search(&self, term: &str) -> Vec<&ResearchRecord> {
        if term.is_empty() {
            return self.records.iter().collect();
        }
        let needle = term.to_lowercase();
        self.records
            .iter()
            .filter(|r| r.query.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn group_by_recency(&self) -> HistoryGroups<'_> {
        self.group_by_recency_at(chrono::Local::now())
    }

    /// Groups relative to `now`, using midnight in `now`'s time zone as the
    /// day boundary.
    pub fn group_by_recency_at<Tz: TimeZone>(&self, now: DateTime<Tz>) -> HistoryGroups<'_> {
        let tz = now.timezone();
        let today = now.date_naive();
        let today_start = start_of_day(today, &tz);
        let yesterday_start = start_of_day(days_before(today, 1), &tz);
        let last_week_start = start_of_day(days_before(today, 7), &tz);

        let mut groups = HistoryGroups::default();
        for record in &self.records {
            let bucket = if record.pinned {
                &mut groups.pinned
            } else if record.timestamp >= today_start {
                &mut groups.today
            } else if record.timestamp >= yesterday_start {
                &mut groups.yesterday
            } else if record.timestamp >= last_week_start {
                &mut groups.last_week
            } else {
                &mut groups.older
            };
            bucket.push(record);
        }
        groups
    }

    /// Makes the record with `id` current. Unknown ids leave the pointer as
    /// it is.
    pub fn load(&mut self, id: &str) -> Option<&ResearchRecord> {
        let Some(index) = self.records.iter().position(|r| r.id == id) else {
            log::warn!("load ignored, research {} not found", id);
            return None;
        };
        self.current = Some(id.to_string());
        log::info!("Loaded research {} ({})", id, self.records[index].query);
        self.records.get(index)
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.current = None;
        if let Err(err) = self.backend.clear() {
            log::error!("Failed to clear stored history: {}", err);
        }
        log::info!("Cleared all history");
    }

    fn sort(&mut self) {
        self.records.sort_by(|a, b| {
            b.pinned
                .cmp(&a.pinned)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
                .then_with(|| b.id.cmp(&a.id))
        });
    }

    fn persist(&mut self) {
        let serialized = match serde_json::to_string(&self.records) {
            Ok(serialized) => serialized,
            Err(err) => {
                log::error!("Failed to serialize history: {}", err);
                return;
            }
        };
        match self.backend.save_all(&serialized) {
            Ok(()) => log::debug!("Saved history ({} records)", self.records.len()),
            Err(err) => log::error!("Failed to save history: {}", err),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
