use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use crate::canonical::{device_filter_value, Canonicalizer, CountryCode, UNKNOWN_COUNTRY};
use crate::config::DEFAULT_FILTER_DEBOUNCE_MS;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::events::{Dimension, FilterEvent, FilterSink};
use crate::records::{validate_collection, CandidateRecord, CandidateStatus, CollectionIssue};
use crate::scheduler::ScheduledTask;
use crate::storage::FilterStorage;

pub const ALL: &str = "all";
pub const KEY_OPENING: &str = "filterOpening";
pub const KEY_STATUS: &str = "filterStatus";
pub const KEY_TIER: &str = "filterTier";
pub const KEY_COUNTRY: &str = "filterCountry";
pub const KEY_SORT: &str = "sortBy";
pub const PERSISTED_KEYS: [&str; 5] = [KEY_OPENING, KEY_STATUS, KEY_TIER, KEY_COUNTRY, KEY_SORT];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection<T> {
    All,
    Only(T),
}

impl<T> Default for Selection<T> {
    fn default() -> Self {
        Selection::All
    }
}

impl<T> Selection<T> {
    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Selection::All => None,
            Selection::Only(value) => Some(value),
        }
    }

    /// `"all"` and blank input select everything; anything else goes through `parse`.
    pub fn parse_with<F>(raw: &str, parse: F) -> Option<Self>
    where
        F: FnOnce(&str) -> Option<T>,
    {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case(ALL) {
            return Some(Selection::All);
        }
        parse(raw).map(Selection::Only)
    }
}

impl Selection<String> {
    pub fn text(raw: &str) -> Self {
        Self::parse_with(raw, |value| Some(value.to_string())).unwrap_or_default()
    }
}

impl<T: fmt::Display> fmt::Display for Selection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => f.write_str(ALL),
            Selection::Only(value) => value.fmt(f),
        }
    }
}

impl<T: fmt::Display> Serialize for Selection<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Latest,
    Oldest,
    NameAsc,
    NameDesc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Latest => "latest",
            SortOrder::Oldest => "oldest",
            SortOrder::NameAsc => "name_asc",
            SortOrder::NameDesc => "name_desc",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "latest" => Some(SortOrder::Latest),
            "oldest" => Some(SortOrder::Oldest),
            "name_asc" => Some(SortOrder::NameAsc),
            "name_desc" => Some(SortOrder::NameDesc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterState {
    pub search_query: String,
    pub opening_id: Selection<String>,
    pub status: Selection<CandidateStatus>,
    pub tier: Selection<String>,
    pub country: Selection<String>,
    /// Raw device strings from a device drill-down; empty selects every device.
    pub device: Vec<String>,
    pub sort_by: SortOrder,
}

impl FilterState {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// Explicit values that win over persisted preferences on first activation,
/// e.g. a deep link into one opening.
#[derive(Debug, Clone, Default)]
pub struct InitialFilters {
    pub search_query: Option<String>,
    pub opening_id: Option<Selection<String>>,
    pub status: Option<Selection<CandidateStatus>>,
    pub tier: Option<Selection<String>>,
    pub country: Option<Selection<String>>,
    pub sort_by: Option<SortOrder>,
}

impl InitialFilters {
    pub fn opening(opening_id: impl Into<String>) -> Self {
        Self {
            opening_id: Some(Selection::Only(opening_id.into())),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    Initialized,
    AlreadyInitialized,
    Skipped(CollectionIssue),
}

pub type FilterChangeCallback = Arc<dyn Fn(FilterState) + Send + Sync>;

/// Owns the dashboard's filter selection for one mounted context.
pub struct FilterStateStore {
    state: FilterState,
    storage: Arc<dyn FilterStorage>,
    canonicalizer: Canonicalizer,
    diagnostics: Arc<dyn DiagnosticSink>,
    on_change: FilterChangeCallback,
    debounce: ScheduledTask,
    delay: Duration,
    initialized: bool,
    filtering_enabled: bool,
    deactivated: bool,
}

impl FilterStateStore {
    pub fn new(
        storage: Arc<dyn FilterStorage>,
        canonicalizer: Canonicalizer,
        on_change: FilterChangeCallback,
    ) -> Self {
        let diagnostics = canonicalizer.diagnostics();
        Self {
            state: FilterState::default(),
            storage,
            canonicalizer,
            diagnostics,
            on_change,
            debounce: ScheduledTask::new("filter_propagation"),
            delay: Duration::from_millis(DEFAULT_FILTER_DEBOUNCE_MS),
            initialized: false,
            filtering_enabled: true,
            deactivated: false,
        }
    }

    pub fn with_debounce(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn state(&self) -> &FilterState {
        &self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_filtering_enabled(&self) -> bool {
        self.filtering_enabled
    }

    pub fn has_pending_propagation(&self) -> bool {
        self.debounce.is_pending()
    }

    /// Delivers a queued change whose debounce delay has elapsed. Only needed
    /// when the store is driven without a tokio runtime.
    pub fn poll_propagation(&mut self) -> bool {
        self.debounce.run_due()
    }

    /// Delivers a queued change immediately.
    pub fn flush_propagation(&mut self) -> bool {
        self.debounce.flush()
    }

    pub fn activate(
        &mut self,
        records: &[CandidateRecord],
        initial: Option<InitialFilters>,
    ) -> Activation {
        self.deactivated = false;
        if let Err(issue) = validate_collection(records) {
            warn!(
                target: "filter_store",
                records = issue.records,
                reason = %issue.reason,
                "record collection failed validation; filters left uninitialized"
            );
            self.diagnostics.report(Diagnostic::InvalidCollection {
                records: issue.records,
                reason: issue.reason.clone(),
            });
            self.filtering_enabled = false;
            return Activation::Skipped(issue);
        }
        self.filtering_enabled = true;

        if self.initialized {
            return Activation::AlreadyInitialized;
        }

        let initial = initial.unwrap_or_default();
        self.state = FilterState {
            search_query: initial.search_query.unwrap_or_default(),
            opening_id: initial
                .opening_id
                .unwrap_or_else(|| self.load(KEY_OPENING, |raw| Selection::parse_with(raw, text))),
            status: initial.status.unwrap_or_else(|| {
                self.load(KEY_STATUS, |raw| {
                    Selection::parse_with(raw, CandidateStatus::parse)
                })
            }),
            tier: initial
                .tier
                .unwrap_or_else(|| self.load(KEY_TIER, |raw| Selection::parse_with(raw, text))),
            country: initial
                .country
                .unwrap_or_else(|| self.load(KEY_COUNTRY, |raw| Selection::parse_with(raw, text))),
            device: Vec::new(),
            sort_by: initial
                .sort_by
                .unwrap_or_else(|| self.load(KEY_SORT, SortOrder::parse)),
        };
        self.initialized = true;
        info!(target: "filter_store", state = ?self.state, "filters initialized");
        Activation::Initialized
    }

    /// Cancels any pending propagation; later changes are not delivered until
    /// the store is activated again.
    pub fn deactivate(&mut self) {
        if self.debounce.cancel_pending() {
            debug!(target: "filter_store", "pending filter propagation cancelled on deactivate");
        }
        self.deactivated = true;
    }

    pub fn set_search_query(&mut self, query: impl Into<String>) {
        self.state.search_query = query.into();
        self.schedule_propagation();
    }

    pub fn set_opening(&mut self, opening: Selection<String>) {
        self.persist(KEY_OPENING, &opening.to_string());
        self.state.opening_id = opening;
        self.schedule_propagation();
    }

    pub fn set_status(&mut self, status: Selection<CandidateStatus>) {
        self.persist(KEY_STATUS, &status.to_string());
        self.state.status = status;
        self.schedule_propagation();
    }

    pub fn set_tier(&mut self, tier: Selection<String>) {
        self.persist(KEY_TIER, &tier.to_string());
        self.state.tier = tier;
        self.schedule_propagation();
    }

    pub fn set_country(&mut self, country: Selection<String>) {
        if let Some(value) = country.value() {
            if !is_unknown_selection(value) && self.canonicalizer.resolve_country(value).is_none() {
                warn!(target: "filter_store", value = %value, "country filter does not resolve; no record will match");
            }
        }
        self.persist(KEY_COUNTRY, &country.to_string());
        self.state.country = country;
        self.schedule_propagation();
    }

    pub fn set_device<I, S>(&mut self, raw_values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values = Vec::new();
        for value in raw_values {
            let value = value.into().trim().to_string();
            if !value.is_empty() && !values.contains(&value) {
                values.push(value);
            }
        }
        self.state.device = values;
        self.schedule_propagation();
    }

    /// Sorting only reorders the current result, so it is delivered at once.
    pub fn set_sort_by(&mut self, sort_by: SortOrder) {
        self.persist(KEY_SORT, sort_by.as_str());
        self.state.sort_by = sort_by;
        self.propagate_now();
    }

    pub fn reset(&mut self) {
        self.state = FilterState::default();
        if let Err(err) = self.storage.remove_all(&PERSISTED_KEYS) {
            warn!(target: "filter_store", ?err, "failed to clear persisted filters");
            self.diagnostics.report(Diagnostic::StorageFailure {
                key: PERSISTED_KEYS.join(","),
                operation: "remove",
                error: err.to_string(),
            });
        }
        info!(target: "filter_store", "filters reset to defaults");
        self.propagate_now();
    }

    /// The records matching the current selection, in the selected order. When
    /// the collection failed validation the input is returned untouched.
    pub fn filter_records<'a>(&self, records: &'a [CandidateRecord]) -> Vec<&'a CandidateRecord> {
        if !self.filtering_enabled {
            return records.iter().collect();
        }

        let matcher = Matcher::new(&self.state, &self.canonicalizer);
        let mut keyed = records
            .iter()
            .filter(|record| matcher.matches(record))
            .map(|record| SortKey::new(record))
            .collect::<Vec<_>>();
        keyed.sort_by(|a, b| a.compare(b, self.state.sort_by));
        keyed.into_iter().map(|key| key.record).collect()
    }

    fn schedule_propagation(&mut self) {
        if self.deactivated {
            debug!(target: "filter_store", "store inactive; change not propagated");
            return;
        }
        let state = self.state.clone();
        let on_change = Arc::clone(&self.on_change);
        self.debounce.schedule(move || on_change(state), self.delay);
    }

    fn propagate_now(&mut self) {
        // the immediate delivery carries the full state, so a pending one is redundant
        self.debounce.cancel_pending();
        if self.deactivated {
            debug!(target: "filter_store", "store inactive; change not propagated");
            return;
        }
        (self.on_change)(self.state.clone());
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(err) = self.storage.set(key, value) {
            warn!(target: "filter_store", key, ?err, "failed to persist filter value");
            self.diagnostics.report(Diagnostic::StorageFailure {
                key: key.to_string(),
                operation: "set",
                error: err.to_string(),
            });
        }
    }

    fn load<T, F>(&self, key: &str, parse: F) -> T
    where
        T: Default,
        F: FnOnce(&str) -> Option<T>,
    {
        match self.storage.get(key) {
            Ok(Some(raw)) => match parse(&raw) {
                Some(value) => value,
                None => {
                    warn!(target: "filter_store", key, value = %raw, "ignoring corrupted filter value");
                    self.diagnostics.report(Diagnostic::CorruptedPreference {
                        key: key.to_string(),
                        value: raw,
                    });
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(err) => {
                warn!(target: "filter_store", key, ?err, "failed to read persisted filter value");
                self.diagnostics.report(Diagnostic::StorageFailure {
                    key: key.to_string(),
                    operation: "get",
                    error: err.to_string(),
                });
                T::default()
            }
        }
    }
}

impl FilterSink for FilterStateStore {
    fn on_filter(&mut self, event: FilterEvent) {
        let FilterEvent { dimension, value } = event;
        match dimension {
            Dimension::Device => self.set_device(value.into_values()),
            Dimension::Country => {
                if let Some(country) = value.first() {
                    self.set_country(Selection::text(country));
                }
            }
            Dimension::Tier => {
                if let Some(tier) = value.first() {
                    self.set_tier(Selection::text(tier));
                }
            }
            Dimension::Opening => {
                if let Some(opening) = value.first() {
                    self.set_opening(Selection::text(opening));
                }
            }
            Dimension::Status => {
                let parsed = value
                    .first()
                    .and_then(|raw| Selection::parse_with(raw, CandidateStatus::parse));
                match parsed {
                    Some(status) => self.set_status(status),
                    None => warn!(target: "filter_store", ?value, "unrecognised status filter"),
                }
            }
        }
    }
}

impl Drop for FilterStateStore {
    fn drop(&mut self) {
        self.debounce.cancel_pending();
    }
}

fn text(raw: &str) -> Option<String> {
    Some(raw.to_string())
}

fn is_unknown_selection(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case(UNKNOWN_COUNTRY)
}

enum CountryFilter {
    Any,
    Code(CountryCode),
    /// The selected value is not in the reference table.
    Nothing,
}

struct Matcher<'s> {
    state: &'s FilterState,
    canonicalizer: &'s Canonicalizer,
    search: Option<String>,
    country: CountryFilter,
}

impl<'s> Matcher<'s> {
    fn new(state: &'s FilterState, canonicalizer: &'s Canonicalizer) -> Self {
        let search = Some(state.search_query.trim().to_lowercase()).filter(|q| !q.is_empty());
        let country = match state.country.value() {
            None => CountryFilter::Any,
            Some(value) if is_unknown_selection(value) => CountryFilter::Code(CountryCode::unknown()),
            Some(value) => match canonicalizer.resolve_country(value) {
                Some(code) => CountryFilter::Code(code),
                None => {
                    debug!(target: "filter_store", value = %value, "unresolved country filter matches nothing");
                    CountryFilter::Nothing
                }
            },
        };
        Self {
            state,
            canonicalizer,
            search,
            country,
        }
    }

    fn matches(&self, record: &CandidateRecord) -> bool {
        if let Some(query) = &self.search {
            let hit = [record.name.as_deref(), record.email.as_deref(), Some(record.id.as_str())]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(query.as_str()));
            if !hit {
                return false;
            }
        }
        if let Some(opening) = self.state.opening_id.value() {
            if record.opening_id.trim() != opening.trim() {
                return false;
            }
        }
        if let Some(status) = self.state.status.value() {
            if record.status != Some(*status) {
                return false;
            }
        }
        if let Some(tier) = self.state.tier.value() {
            let matched = self
                .canonicalizer
                .record_tier(record)
                .map(|name| name.eq_ignore_ascii_case(tier.trim()))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        match &self.country {
            CountryFilter::Any => {}
            CountryFilter::Nothing => return false,
            CountryFilter::Code(country) => {
                if self.canonicalizer.record_country(record).as_ref() != Some(country) {
                    return false;
                }
            }
        }
        if !self.state.device.is_empty() {
            let matched = record
                .device_raw
                .as_deref()
                .map(device_filter_value)
                .map(|raw| {
                    self.state
                        .device
                        .iter()
                        .any(|value| value.eq_ignore_ascii_case(raw))
                })
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        true
    }
}

struct SortKey<'a> {
    record: &'a CandidateRecord,
    submitted: Option<DateTime<Utc>>,
    name: Option<String>,
}

impl<'a> SortKey<'a> {
    fn new(record: &'a CandidateRecord) -> Self {
        Self {
            record,
            submitted: record.submitted_at(),
            name: record
                .name
                .as_deref()
                .map(|name| name.trim().to_lowercase())
                .filter(|name| !name.is_empty()),
        }
    }

    fn compare(&self, other: &Self, order: SortOrder) -> Ordering {
        let primary = match order {
            SortOrder::Latest => present_first(&self.submitted, &other.submitted, true),
            SortOrder::Oldest => present_first(&self.submitted, &other.submitted, false),
            SortOrder::NameAsc => present_first(&self.name, &other.name, false),
            SortOrder::NameDesc => present_first(&self.name, &other.name, true),
        };
        primary.then_with(|| self.record.id.cmp(&other.record.id))
    }
}

/// Orders present values (ascending or descending) ahead of missing ones.
fn present_first<T: Ord>(a: &Option<T>, b: &Option<T>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(a),
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
