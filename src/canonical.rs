use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::{AppConfig, DEFAULT_ADMIN_TIER_NAME, DEFAULT_TIER_DELIMITER};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::records::{CandidateRecord, CandidateStatus, JobType};
use crate::reference::CountryTable;

pub const UNKNOWN_COUNTRY: &str = "Unknown";
pub const UNKNOWN_DEVICE_TOKEN: &str = "UNKNOWN";
const MOBILE_KEYWORDS: [&str; 4] = ["MOBILE", "PHONE", "ANDROID", "IOS"];
const SUBSTRING_MATCH_MIN_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CountryCode(String);

impl CountryCode {
    pub fn unknown() -> Self {
        Self(UNKNOWN_COUNTRY.to_string())
    }

    /// Rebuilds a code from an aggregation key or a persisted selection.
    pub fn from_bucket_key(key: &str) -> Self {
        let key = key.trim();
        if key.is_empty() || key.eq_ignore_ascii_case(UNKNOWN_COUNTRY) {
            Self::unknown()
        } else {
            Self(key.to_uppercase())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_COUNTRY
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DeviceClass {
    Mobile,
    Desktop,
    Other,
}

impl DeviceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceClass::Mobile => "Mobile",
            DeviceClass::Desktop => "Desktop",
            DeviceClass::Other => "Other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mobile" => Some(DeviceClass::Mobile),
            "desktop" => Some(DeviceClass::Desktop),
            "other" => Some(DeviceClass::Other),
            _ => None,
        }
    }
}

/// The value a device filter selects a record by: its trimmed raw string, or
/// `UNKNOWN` when the raw string is blank.
pub fn device_filter_value(raw: &str) -> &str {
    let raw = raw.trim();
    if raw.is_empty() {
        UNKNOWN_DEVICE_TOKEN
    } else {
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDevice {
    pub token: String,
    pub class: DeviceClass,
}

#[derive(Debug, Clone)]
pub struct CanonicalizerOptions {
    pub admin_tier_name: String,
    pub tier_delimiter: char,
}

impl CanonicalizerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            admin_tier_name: config.admin_tier_name.clone(),
            tier_delimiter: config.tier_delimiter,
        }
    }
}

impl Default for CanonicalizerOptions {
    fn default() -> Self {
        Self {
            admin_tier_name: DEFAULT_ADMIN_TIER_NAME.to_string(),
            tier_delimiter: DEFAULT_TIER_DELIMITER,
        }
    }
}

/// Maps free-text record attributes onto canonical categories. Every lookup is
/// total; unresolved input degrades to a sentinel instead of failing.
#[derive(Clone)]
pub struct Canonicalizer {
    table: Arc<CountryTable>,
    options: CanonicalizerOptions,
    diagnostics: Arc<dyn DiagnosticSink>,
    reported: Arc<Mutex<HashSet<String>>>,
}

impl Canonicalizer {
    pub fn new(
        table: Arc<CountryTable>,
        options: CanonicalizerOptions,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            table,
            options,
            diagnostics,
            reported: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn table(&self) -> &CountryTable {
        &self.table
    }

    pub fn options(&self) -> &CanonicalizerOptions {
        &self.options
    }

    pub fn diagnostics(&self) -> Arc<dyn DiagnosticSink> {
        Arc::clone(&self.diagnostics)
    }

    /// Total lookup; a non-blank input that does not resolve is reported once
    /// per distinct raw value.
    pub fn canonicalize_country(&self, raw: &str) -> CountryCode {
        if raw.trim().is_empty() {
            return CountryCode::unknown();
        }
        if let Some(code) = self.resolve_country(raw) {
            return code;
        }

        if self.reported.lock().insert(raw.to_string()) {
            debug!(target: "canonical", raw, "country did not resolve");
            self.diagnostics.report(Diagnostic::UnresolvedCountry {
                raw: raw.to_string(),
            });
        }
        CountryCode::unknown()
    }

    /// Table lookup without the sentinel fallback and without diagnostics.
    pub fn resolve_country(&self, raw: &str) -> Option<CountryCode> {
        let input = raw.trim().to_uppercase();
        if input.is_empty() {
            return None;
        }
        if self.table.contains(&input) {
            return Some(CountryCode(input));
        }
        if let Some(code) = self.table.code_for_name(&input) {
            return Some(CountryCode(code.to_string()));
        }
        // first entry in table order wins when several names overlap
        if input.chars().count() > SUBSTRING_MATCH_MIN_LEN {
            return self
                .table
                .iter()
                .find(|entry| entry.name_key().contains(&input) || input.contains(entry.name_key()))
                .map(|entry| CountryCode(entry.code.clone()));
        }
        None
    }

    pub fn country_name<'a>(&'a self, code: &'a CountryCode) -> &'a str {
        self.table.name(code.as_str()).unwrap_or(UNKNOWN_COUNTRY)
    }

    pub fn normalize_device(&self, raw: Option<&str>) -> NormalizedDevice {
        let token = raw.map(|value| value.trim().to_uppercase()).unwrap_or_default();
        if token.is_empty() {
            return NormalizedDevice {
                token: UNKNOWN_DEVICE_TOKEN.to_string(),
                class: DeviceClass::Other,
            };
        }
        let class = if MOBILE_KEYWORDS.iter().any(|keyword| token.contains(keyword)) {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        };
        NormalizedDevice { token, class }
    }

    pub fn canonicalize_device(&self, raw: Option<&str>) -> DeviceClass {
        self.normalize_device(raw).class
    }

    pub fn extract_tier_name(&self, raw: Option<&str>) -> Option<String> {
        let raw = raw?;
        let head = raw
            .split(self.options.tier_delimiter)
            .next()
            .unwrap_or(raw)
            .trim();
        (!head.is_empty()).then(|| head.to_string())
    }

    pub fn is_admin_tier(&self, tier: &str) -> bool {
        tier.trim()
            .eq_ignore_ascii_case(self.options.admin_tier_name.trim())
    }

    /// Distinct, sorted tier names for end-user filters; the admin tier is never listed.
    pub fn tier_options<'a, I>(&self, records: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a CandidateRecord>,
    {
        records
            .into_iter()
            .filter_map(|record| self.extract_tier_name(record.selected_tier.as_deref()))
            .filter(|tier| !self.is_admin_tier(tier))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Country codes present in the collection, in code order, `Unknown` last.
    pub fn country_options<'a, I>(&self, records: I) -> Vec<CountryCode>
    where
        I: IntoIterator<Item = &'a CandidateRecord>,
    {
        let codes = records
            .into_iter()
            .filter_map(|record| self.record_country(record))
            .collect::<BTreeSet<_>>();
        let (mut known, unknown): (Vec<_>, Vec<_>) =
            codes.into_iter().partition(|code| !code.is_unknown());
        known.extend(unknown);
        known
    }

    pub fn record_country(&self, record: &CandidateRecord) -> Option<CountryCode> {
        record
            .country_raw
            .as_deref()
            .map(|raw| self.canonicalize_country(raw))
    }

    pub fn record_device(&self, record: &CandidateRecord) -> Option<DeviceClass> {
        record
            .device_raw
            .as_deref()
            .map(|raw| self.canonicalize_device(Some(raw)))
    }

    pub fn record_tier(&self, record: &CandidateRecord) -> Option<String> {
        self.extract_tier_name(record.selected_tier.as_deref())
    }

    pub fn record_status(&self, record: &CandidateRecord) -> Option<CandidateStatus> {
        record.status
    }

    pub fn record_job_type(&self, record: &CandidateRecord) -> Option<JobType> {
        record.job_type
    }

    pub fn record_opening(&self, record: &CandidateRecord) -> Option<String> {
        let opening = record.opening_id.trim();
        (!opening.is_empty()).then(|| opening.to_string())
    }
}
