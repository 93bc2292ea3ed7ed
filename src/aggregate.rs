use std::collections::BTreeMap;

use chrono::Datelike;
use serde::Serialize;

use crate::range::{trim, TimeWindow};
use crate::records::CandidateRecord;

pub const MONTHS_PER_YEAR: usize = 12;
pub const MONTH_LABELS: [&str; MONTHS_PER_YEAR] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

pub type BucketMap<K> = BTreeMap<K, usize>;

/// Counts records per dimension key. Structurally invalid records and records
/// for which `dimension` yields nothing are left out of this dimension only.
pub fn group_by<'a, K, I, F>(records: I, dimension: F) -> BucketMap<K>
where
    K: Ord,
    I: IntoIterator<Item = &'a CandidateRecord>,
    F: Fn(&CandidateRecord) -> Option<K>,
{
    let mut buckets = BucketMap::new();
    for record in records {
        if !record.is_structurally_valid() {
            continue;
        }
        if let Some(key) = dimension(record) {
            *buckets.entry(key).or_insert(0) += 1;
        }
    }
    buckets
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlySeries<K: Ord> {
    pub periods: [BucketMap<K>; MONTHS_PER_YEAR],
}

impl<K: Ord + Clone> MonthlySeries<K> {
    fn seeded(keys: &[K]) -> Self {
        let seed = keys
            .iter()
            .map(|key| (key.clone(), 0))
            .collect::<BucketMap<K>>();
        Self {
            periods: std::array::from_fn(|_| seed.clone()),
        }
    }

    pub fn totals(&self) -> [usize; MONTHS_PER_YEAR] {
        std::array::from_fn(|idx| self.periods[idx].values().sum())
    }

    pub fn total(&self) -> usize {
        self.totals().iter().sum()
    }

    pub fn window(&self) -> Option<TimeWindow> {
        trim(&self.totals())
    }

    /// Count of `key` in every period, in axis order.
    pub fn series_for(&self, key: &K) -> [usize; MONTHS_PER_YEAR] {
        std::array::from_fn(|idx| self.periods[idx].get(key).copied().unwrap_or(0))
    }
}

/// Per-period counts restricted to `keys`. Records without a period (no
/// parseable timestamp, outside the axis) or with a key outside `keys` are
/// excluded from this aggregation only.
pub fn group_by_time<'a, K, I, P, D>(
    records: I,
    period: P,
    dimension: D,
    keys: &[K],
) -> MonthlySeries<K>
where
    K: Ord + Clone,
    I: IntoIterator<Item = &'a CandidateRecord>,
    P: Fn(&CandidateRecord) -> Option<usize>,
    D: Fn(&CandidateRecord) -> Option<K>,
{
    let mut series = MonthlySeries::seeded(keys);
    for record in records {
        if !record.is_structurally_valid() {
            continue;
        }
        let Some(idx) = period(record).filter(|idx| *idx < MONTHS_PER_YEAR) else {
            continue;
        };
        let Some(key) = dimension(record) else {
            continue;
        };
        if let Some(count) = series.periods[idx].get_mut(&key) {
            *count += 1;
        }
    }
    series
}

pub fn month_of_year(year: i32) -> impl Fn(&CandidateRecord) -> Option<usize> {
    move |record| record.submission_month_in(year)
}

/// Most recent calendar year with a parseable submission.
pub fn latest_year<'a, I>(records: I) -> Option<i32>
where
    I: IntoIterator<Item = &'a CandidateRecord>,
{
    records
        .into_iter()
        .filter(|record| record.is_structurally_valid())
        .filter_map(|record| record.submitted_at())
        .map(|ts| ts.year())
        .max()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorTier {
    Empty,
    Faint,
    Light,
    Moderate,
    Strong,
    Saturated,
}

impl ColorTier {
    pub fn fill(&self) -> &'static str {
        match self {
            ColorTier::Saturated => "#08306b",
            ColorTier::Strong => "#08519c",
            ColorTier::Moderate => "#2171b5",
            ColorTier::Light => "#6baed6",
            ColorTier::Faint => "#c6dbef",
            ColorTier::Empty => "#f0f0f0",
        }
    }
}

/// Thresholds are strict: 20 is `Strong`, 10 is `Moderate`, 5 is `Light`, 3 is `Faint`.
pub fn color_tier(count: usize) -> ColorTier {
    match count {
        c if c > 20 => ColorTier::Saturated,
        c if c > 10 => ColorTier::Strong,
        c if c > 5 => ColorTier::Moderate,
        c if c > 3 => ColorTier::Light,
        c if c > 0 => ColorTier::Faint,
        _ => ColorTier::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::tests::canonicalizer;
    use crate::canonical::DeviceClass;
    use crate::records::CandidateStatus;

    fn record(id: &str, country: Option<&str>, submitted: Option<&str>) -> CandidateRecord {
        let mut record = CandidateRecord::new(id, "op-1");
        record.country_raw = country.map(str::to_string);
        record.submitted_at = submitted.map(str::to_string);
        record
    }

    #[test]
    fn country_scenario_counts_codes_and_unknowns() {
        let (canon, _) = canonicalizer();
        let records = vec![
            record("a", Some("KE"), None),
            record("b", Some("Kenya"), None),
            record("c", Some("Zz-not-a-country"), None),
        ];
        let buckets = group_by(&records, |r| canon.record_country(r));
        let flattened: Vec<_> = buckets
            .iter()
            .map(|(code, count)| (code.as_str(), *count))
            .collect();
        assert_eq!(flattened, vec![("KE", 2), ("Unknown", 1)]);
    }

    #[test]
    fn conserves_counts_and_skips_absent_fields() {
        let (canon, _) = canonicalizer();
        let mut records = vec![
            record("a", Some("KE"), None),
            record("b", None, None),
            record("", Some("KE"), None),
            record("d", Some("Uganda"), None),
        ];
        records[0].device_raw = Some("Android".into());
        records[1].device_raw = Some("Windows".into());
        records[3].device_raw = Some(" ".into());

        let countries = group_by(&records, |r| canon.record_country(r));
        let resolvable = records
            .iter()
            .filter(|r| r.is_structurally_valid() && r.country_raw.is_some())
            .count();
        assert_eq!(countries.values().sum::<usize>(), resolvable);

        let devices = group_by(&records, |r| canon.record_device(r));
        assert_eq!(devices.get(&DeviceClass::Mobile), Some(&1));
        assert_eq!(devices.get(&DeviceClass::Desktop), Some(&1));
        assert_eq!(devices.get(&DeviceClass::Other), Some(&1));
    }

    #[test]
    fn grouping_is_deterministic() {
        let (canon, _) = canonicalizer();
        let mut records: Vec<_> = ["KE", "UG", "Atlantis", "kenya", "Tanzania"]
            .iter()
            .enumerate()
            .map(|(idx, c)| record(&format!("r{idx}"), Some(c), Some("2024-02-01")))
            .collect();
        records[1].status = Some(CandidateStatus::Accepted);

        let first = group_by(&records, |r| canon.record_country(r));
        let second = group_by(&records, |r| canon.record_country(r));
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        let keys = vec!["KE".to_string(), "UG".to_string()];
        let dim = |r: &CandidateRecord| canon.record_country(r).map(|c| c.to_string());
        assert_eq!(
            group_by_time(&records, month_of_year(2024), dim, &keys),
            group_by_time(&records, month_of_year(2024), dim, &keys)
        );
    }

    #[test]
    fn monthly_series_seeds_keys_and_skips_undated() {
        let (canon, _) = canonicalizer();
        let tiers = ["Gold - a", "Silver", "Gold", "Bronze", "Gold"];
        let dates = [
            Some("2024-01-15"),
            Some("2024-01-20T08:00:00Z"),
            Some("2024-06-01"),
            Some("2024-06-02"),
            None,
        ];
        let mut records = Vec::new();
        for (idx, (tier, date)) in tiers.iter().zip(dates).enumerate() {
            let mut r = record(&format!("r{idx}"), None, date);
            r.selected_tier = Some(tier.to_string());
            records.push(r);
        }
        records.push(record("old", None, Some("2023-06-01")));

        let keys = vec!["Gold".to_string(), "Silver".to_string()];
        let series = group_by_time(
            &records,
            month_of_year(2024),
            |r| canon.record_tier(r),
            &keys,
        );

        assert_eq!(series.periods[0].get("Gold"), Some(&1));
        assert_eq!(series.periods[0].get("Silver"), Some(&1));
        assert_eq!(series.periods[3].get("Gold"), Some(&0));
        assert_eq!(series.periods[5].get("Bronze"), None);
        assert_eq!(series.series_for(&"Gold".to_string())[5], 1);
        assert_eq!(series.total(), 3);
        assert_eq!(series.totals()[0], 2);

        let window = series.window().unwrap();
        assert_eq!((window.first(), window.last()), (0, 5));
    }

    #[test]
    fn picks_latest_year_with_data() {
        let records = vec![
            record("a", None, Some("2022-05-01")),
            record("b", None, Some("2024-01-01")),
            record("c", None, Some("not a date")),
            record("", None, Some("2030-01-01")),
        ];
        assert_eq!(latest_year(&records), Some(2024));
        assert_eq!(latest_year(&[record("x", None, None)]), None);
    }

    #[test]
    fn color_ladder_thresholds_are_strict() {
        assert_eq!(color_tier(0), ColorTier::Empty);
        assert_eq!(color_tier(1), ColorTier::Faint);
        assert_eq!(color_tier(3), ColorTier::Faint);
        assert_eq!(color_tier(4), ColorTier::Light);
        assert_eq!(color_tier(5), ColorTier::Light);
        assert_eq!(color_tier(6), ColorTier::Moderate);
        assert_eq!(color_tier(10), ColorTier::Moderate);
        assert_eq!(color_tier(11), ColorTier::Strong);
        assert_eq!(color_tier(20), ColorTier::Strong);
        assert_eq!(color_tier(21), ColorTier::Saturated);
    }
}
