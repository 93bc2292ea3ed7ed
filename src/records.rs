use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum CandidateStatus {
    Pending,
    Reviewed,
    Shortlisted,
    Accepted,
    Rejected,
}

impl CandidateStatus {
    pub const ALL: [CandidateStatus; 5] = [
        CandidateStatus::Pending,
        CandidateStatus::Reviewed,
        CandidateStatus::Shortlisted,
        CandidateStatus::Accepted,
        CandidateStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "Pending",
            CandidateStatus::Reviewed => "Reviewed",
            CandidateStatus::Shortlisted => "Shortlisted",
            CandidateStatus::Accepted => "Accepted",
            CandidateStatus::Rejected => "Rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Freelancer,
    Agency,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Freelancer => "freelancer",
            JobType::Agency => "agency",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "freelancer" => Some(JobType::Freelancer),
            "agency" => Some(JobType::Agency),
            _ => None,
        }
    }
}

/// An applicant entry as loaded by the data-access layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CandidateRecord {
    #[serde(deserialize_with = "lenient_required_text")]
    pub id: String,
    #[serde(deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub email: Option<String>,
    #[serde(alias = "country", deserialize_with = "lenient_text")]
    pub country_raw: Option<String>,
    #[serde(alias = "device", deserialize_with = "lenient_text")]
    pub device_raw: Option<String>,
    #[serde(deserialize_with = "lenient_status")]
    pub status: Option<CandidateStatus>,
    #[serde(deserialize_with = "lenient_text")]
    pub selected_tier: Option<String>,
    #[serde(deserialize_with = "lenient_job_type")]
    pub job_type: Option<JobType>,
    #[serde(deserialize_with = "lenient_text")]
    pub submitted_at: Option<String>,
    #[serde(deserialize_with = "lenient_required_text")]
    pub opening_id: String,
}

impl CandidateRecord {
    pub fn new(id: impl Into<String>, opening_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            opening_id: opening_id.into(),
            ..Self::default()
        }
    }

    pub fn is_structurally_valid(&self) -> bool {
        !self.id.trim().is_empty()
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at.as_deref().and_then(parse_timestamp)
    }

    /// Zero-based month of submission when it falls in `year`.
    pub fn submission_month_in(&self, year: i32) -> Option<usize> {
        let ts = self.submitted_at()?;
        (ts.year() == year).then(|| ts.month0() as usize)
    }
}

/// Scalar JSON values accepted where text is expected.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Flag(bool),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Text(value) => value,
            Scalar::Integer(value) => value.to_string(),
            Scalar::Unsigned(value) => value.to_string(),
            Scalar::Float(value) => value.to_string(),
            Scalar::Flag(value) => value.to_string(),
        }
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Scalar>::deserialize(deserializer)?;
    Ok(raw.map(Scalar::into_text))
}

/// Null reads as empty so the validation gate, not serde, judges the record.
fn lenient_required_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

fn lenient_status<'de, D>(deserializer: D) -> Result<Option<CandidateStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = lenient_text(deserializer)?;
    Ok(raw.as_deref().and_then(CandidateStatus::parse))
}

fn lenient_job_type<'de, D>(deserializer: D) -> Result<Option<JobType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = lenient_text(deserializer)?;
    Ok(raw.as_deref().and_then(JobType::parse))
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn parse_records(bytes: &[u8]) -> AppResult<Vec<CandidateRecord>> {
    Ok(serde_json::from_slice(bytes)?)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionIssue {
    pub records: usize,
    pub reason: String,
}

/// Structural sanity check run before filters are initialized. A collection is
/// rejected only when the required string fields are missing on every record.
pub fn validate_collection(records: &[CandidateRecord]) -> Result<(), CollectionIssue> {
    if records.is_empty() {
        return Ok(());
    }
    if records.iter().all(|record| !record.is_structurally_valid()) {
        return Err(CollectionIssue {
            records: records.len(),
            reason: "no record carries an id".into(),
        });
    }
    if records
        .iter()
        .all(|record| record.opening_id.trim().is_empty())
    {
        return Err(CollectionIssue {
            records: records.len(),
            reason: "no record carries an opening id".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lenient_json_records() {
        let json = br#"[
            {"id": "c1", "countryRaw": "KE", "deviceRaw": "Android", "status": "shortlisted",
             "selectedTier": "Gold Member - Legacy", "jobType": "Agency",
             "submittedAt": "2024-03-05T10:00:00Z", "openingId": "op-1"},
            {"id": "c2", "country": "Kenya", "status": "archived", "jobType": null, "openingId": "op-1"}
        ]"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, Some(CandidateStatus::Shortlisted));
        assert_eq!(records[0].job_type, Some(JobType::Agency));
        assert_eq!(records[1].country_raw.as_deref(), Some("Kenya"));
        assert_eq!(records[1].status, None);
        assert_eq!(records[1].device_raw, None);
    }

    #[test]
    fn null_and_numeric_identifiers_do_not_reject_the_collection() {
        let json = br#"[
            {"id": "c1", "openingId": null},
            {"id": 7, "openingId": 42, "name": null, "country": 1, "status": 3},
            {"id": null, "openingId": "op-1", "submittedAt": null}
        ]"#;
        let records = parse_records(json).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].opening_id, "");
        assert_eq!(records[1].id, "7");
        assert_eq!(records[1].opening_id, "42");
        assert_eq!(records[1].name, None);
        assert_eq!(records[1].country_raw.as_deref(), Some("1"));
        assert_eq!(records[1].status, None);
        assert!(!records[2].is_structurally_valid());
        assert!(validate_collection(&records).is_ok());
    }

    #[test]
    fn parses_supported_timestamp_formats() {
        for raw in [
            "2024-03-05T10:00:00Z",
            "2024-03-05T12:00:00+02:00",
            "2024-03-05 10:00:00",
            "2024-03-05T10:00:00",
            "2024-03-05",
        ] {
            let ts = parse_timestamp(raw).unwrap_or_else(|| panic!("{raw} should parse"));
            assert_eq!(ts.month0(), 2);
        }
        assert!(parse_timestamp("last tuesday").is_none());
        assert!(parse_timestamp("  ").is_none());
    }

    #[test]
    fn submission_month_is_scoped_to_year() {
        let mut record = CandidateRecord::new("c1", "op");
        record.submitted_at = Some("2023-12-31T23:00:00Z".into());
        assert_eq!(record.submission_month_in(2023), Some(11));
        assert_eq!(record.submission_month_in(2024), None);
    }

    #[test]
    fn validation_rejects_collections_without_required_fields() {
        assert!(validate_collection(&[]).is_ok());

        let blank = vec![CandidateRecord::new("", "op"), CandidateRecord::new(" ", "op")];
        let issue = validate_collection(&blank).unwrap_err();
        assert_eq!(issue.records, 2);

        let no_openings = vec![CandidateRecord::new("a", ""), CandidateRecord::new("b", "")];
        assert!(validate_collection(&no_openings).is_err());

        let mixed = vec![CandidateRecord::new("", "op"), CandidateRecord::new("b", "op")];
        assert!(validate_collection(&mixed).is_ok());
    }
}
