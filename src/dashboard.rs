use serde::Serialize;
use tracing::debug;

use crate::aggregate::{
    color_tier, group_by, group_by_time, latest_year, month_of_year, BucketMap, ColorTier,
    MONTH_LABELS,
};
use crate::canonical::{Canonicalizer, CountryCode, DeviceClass};
use crate::events::{Dimension, DrillTarget, FilterEventBus};
use crate::filters::{Activation, FilterState, FilterStateStore, InitialFilters};
use crate::range::TimeWindow;
use crate::records::{CandidateRecord, CandidateStatus, JobType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryBucket {
    pub code: CountryCode,
    pub name: String,
    pub count: usize,
    pub tier: ColorTier,
    pub fill: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryOption {
    pub code: CountryCode,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierSeries {
    pub tier: String,
    pub counts: Vec<usize>,
}

/// Tier-by-month submissions for one calendar year, cut to the months with data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierTimeline {
    pub year: i32,
    pub window: Option<TimeWindow>,
    pub labels: Vec<&'static str>,
    pub totals: Vec<usize>,
    pub series: Vec<TierSeries>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub filters: FilterState,
    pub total_records: usize,
    pub filtered_ids: Vec<String>,
    pub countries: Vec<CountryBucket>,
    pub devices: BucketMap<DeviceClass>,
    pub statuses: BucketMap<CandidateStatus>,
    pub job_types: BucketMap<JobType>,
    pub tiers: BucketMap<String>,
    pub openings: BucketMap<String>,
    pub timeline: Option<TierTimeline>,
    pub tier_options: Vec<String>,
    pub country_options: Vec<CountryOption>,
}

/// One mounted dashboard: the loaded records, their filter store and the
/// drill-down bus feeding it.
pub struct Dashboard {
    records: Vec<CandidateRecord>,
    store: FilterStateStore,
    bus: FilterEventBus,
    canonicalizer: Canonicalizer,
}

impl Dashboard {
    pub fn new(
        records: Vec<CandidateRecord>,
        store: FilterStateStore,
        canonicalizer: Canonicalizer,
    ) -> Self {
        Self {
            records,
            store,
            bus: FilterEventBus::new(canonicalizer.clone()),
            canonicalizer,
        }
    }

    pub fn activate(&mut self, initial: Option<InitialFilters>) -> Activation {
        self.store.activate(&self.records, initial)
    }

    pub fn deactivate(&mut self) {
        self.store.deactivate();
    }

    pub fn records(&self) -> &[CandidateRecord] {
        &self.records
    }

    pub fn store(&self) -> &FilterStateStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FilterStateStore {
        &mut self.store
    }

    pub fn filtered(&self) -> Vec<&CandidateRecord> {
        self.store.filter_records(&self.records)
    }

    pub fn drill_down(&mut self, dimension: Dimension, target: DrillTarget<'_>) -> bool {
        self.bus.on_drill_down(&mut self.store, dimension, target)
    }

    /// Drills into a device group as currently charted.
    pub fn drill_down_device(&mut self, class: DeviceClass) -> bool {
        let charted = self.filtered().into_iter().cloned().collect::<Vec<_>>();
        let count = charted
            .iter()
            .filter(|record| record.is_structurally_valid())
            .filter(|record| self.canonicalizer.record_device(record) == Some(class))
            .count();
        self.bus.on_drill_down(
            &mut self.store,
            Dimension::Device,
            DrillTarget::DeviceGroup {
                class,
                records: &charted,
                count,
            },
        )
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        let canon = &self.canonicalizer;
        let filtered = self.filtered();
        let rows = || filtered.iter().copied();

        let mut countries = group_by(rows(), |record| canon.record_country(record))
            .into_iter()
            .map(|(code, count)| {
                let tier = color_tier(count);
                CountryBucket {
                    name: canon.country_name(&code).to_string(),
                    code,
                    count,
                    tier,
                    fill: tier.fill(),
                }
            })
            .collect::<Vec<_>>();
        countries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)));

        let tiers = group_by(rows(), |record| {
            canon
                .record_tier(record)
                .filter(|tier| !canon.is_admin_tier(tier))
        });

        let country_options = canon
            .country_options(&self.records)
            .into_iter()
            .map(|code| CountryOption {
                name: canon.country_name(&code).to_string(),
                code,
            })
            .collect();

        debug!(
            target: "dashboard",
            total = self.records.len(),
            filtered = filtered.len(),
            "snapshot computed"
        );

        DashboardSnapshot {
            filters: self.store.state().clone(),
            total_records: self.records.len(),
            filtered_ids: rows().map(|record| record.id.clone()).collect(),
            countries,
            devices: group_by(rows(), |record| canon.record_device(record)),
            statuses: group_by(rows(), |record| canon.record_status(record)),
            job_types: group_by(rows(), |record| canon.record_job_type(record)),
            openings: group_by(rows(), |record| canon.record_opening(record)),
            timeline: self.tier_timeline(&filtered, &tiers),
            tiers,
            tier_options: canon.tier_options(&self.records),
            country_options,
        }
    }

    fn tier_timeline(
        &self,
        filtered: &[&CandidateRecord],
        tiers: &BucketMap<String>,
    ) -> Option<TierTimeline> {
        let year = latest_year(filtered.iter().copied())?;
        let keys = tiers.keys().cloned().collect::<Vec<_>>();
        let canon = &self.canonicalizer;
        let monthly = group_by_time(
            filtered.iter().copied(),
            month_of_year(year),
            |record| canon.record_tier(record),
            &keys,
        );

        let window = monthly.window();
        let visible = |values: &[usize]| match window {
            Some(window) => window.slice(values).to_vec(),
            None => values.to_vec(),
        };
        let labels = match window {
            Some(window) => window.slice(&MONTH_LABELS).to_vec(),
            None => MONTH_LABELS.to_vec(),
        };

        Some(TierTimeline {
            year,
            window,
            labels,
            totals: visible(&monthly.totals()[..]),
            series: keys
                .iter()
                .map(|tier| TierSeries {
                    tier: tier.clone(),
                    counts: visible(&monthly.series_for(tier)[..]),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::canonical::tests::canonicalizer;
    use crate::filters::Selection;
    use crate::storage::MemoryStorage;

    fn record(id: &str, country: &str, device: &str, tier: &str, submitted: &str) -> CandidateRecord {
        let mut record = CandidateRecord::new(id, "op-1");
        record.country_raw = Some(country.to_string());
        record.device_raw = Some(device.to_string());
        record.selected_tier = Some(tier.to_string());
        record.submitted_at = Some(submitted.to_string());
        record.status = Some(CandidateStatus::Pending);
        record
    }

    fn dashboard(records: Vec<CandidateRecord>) -> (Dashboard, Arc<Mutex<Vec<FilterState>>>) {
        let (canon, _) = canonicalizer();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let store = FilterStateStore::new(
            Arc::new(MemoryStorage::new()),
            canon.clone(),
            Arc::new(move |state: FilterState| captured.lock().push(state)),
        );
        (Dashboard::new(records, store, canon), seen)
    }

    fn fixture() -> Vec<CandidateRecord> {
        vec![
            record("a", "KE", "ANDROID", "Gold Member - Legacy", "2024-03-02"),
            record("b", "Kenya", "IOS-SAFARI", "Silver", "2024-05-20"),
            record("c", "Zz-not-a-country", "Windows", "Admin", "2024-05-21"),
            record("d", "Uganda", "Linux", "Gold Member", "2023-01-01"),
        ]
    }

    #[test]
    fn snapshot_aggregates_filtered_records() {
        let (mut dash, _) = dashboard(fixture());
        assert_eq!(dash.activate(None), Activation::Initialized);

        let snapshot = dash.snapshot();
        assert_eq!(snapshot.total_records, 4);
        assert_eq!(snapshot.filtered_ids, vec!["c", "b", "a", "d"]);

        let countries = snapshot
            .countries
            .iter()
            .map(|bucket| (bucket.code.to_string(), bucket.count))
            .collect::<Vec<_>>();
        assert_eq!(
            countries,
            vec![("KE".to_string(), 2), ("UG".to_string(), 1), ("Unknown".to_string(), 1)]
        );
        assert_eq!(snapshot.countries[0].name, "Kenya");
        assert_eq!(snapshot.countries[0].tier, ColorTier::Faint);

        assert_eq!(snapshot.devices.get(&DeviceClass::Mobile), Some(&2));
        assert_eq!(snapshot.devices.get(&DeviceClass::Desktop), Some(&2));
        assert!(!snapshot.tiers.contains_key("Admin"));
        assert_eq!(snapshot.tiers.get("Gold Member"), Some(&2));
        assert_eq!(snapshot.tier_options, vec!["Gold Member", "Silver"]);
        assert_eq!(snapshot.country_options.last().map(|o| o.name.as_str()), Some("Unknown"));

        let timeline = snapshot.timeline.unwrap();
        assert_eq!(timeline.year, 2024);
        assert_eq!(timeline.window, TimeWindow::new(2, 4));
        assert_eq!(timeline.labels, vec!["Mar", "Apr", "May"]);
        assert_eq!(timeline.totals, vec![1, 0, 1]);
        let gold = timeline.series.iter().find(|s| s.tier == "Gold Member").unwrap();
        assert_eq!(gold.counts, vec![1, 0, 0]);
    }

    #[test]
    fn device_drill_down_narrows_the_snapshot() {
        let (mut dash, seen) = dashboard(fixture());
        dash.activate(None);

        assert!(dash.drill_down_device(DeviceClass::Mobile));
        assert_eq!(dash.store().state().device, vec!["ANDROID", "IOS-SAFARI"]);
        assert!(seen.lock().is_empty());
        assert!(dash.store_mut().flush_propagation());
        assert_eq!(seen.lock().len(), 1);

        let snapshot = dash.snapshot();
        assert_eq!(snapshot.filtered_ids, vec!["b", "a"]);
        assert_eq!(snapshot.countries.len(), 1);
        assert!(!dash.drill_down_device(DeviceClass::Other));
    }

    #[test]
    fn other_device_group_drills_into_blank_devices() {
        let mut records = fixture();
        records[2].device_raw = Some(String::new());
        let (mut dash, _) = dashboard(records);
        dash.activate(None);

        assert_eq!(dash.snapshot().devices.get(&DeviceClass::Other), Some(&1));
        assert!(dash.drill_down_device(DeviceClass::Other));
        assert_eq!(dash.store().state().device, vec!["UNKNOWN"]);
        assert_eq!(dash.snapshot().filtered_ids, vec!["c"]);
    }

    #[test]
    fn repeated_snapshots_report_unresolved_countries_once() {
        let (canon, sink) = canonicalizer();
        let store = FilterStateStore::new(
            Arc::new(MemoryStorage::new()),
            canon.clone(),
            Arc::new(|_: FilterState| {}),
        );
        let mut dash = Dashboard::new(fixture(), store, canon);
        dash.activate(None);
        dash.store_mut().set_country(Selection::Only("Unknown".into()));

        for _ in 0..3 {
            let snapshot = dash.snapshot();
            assert_eq!(snapshot.filtered_ids, vec!["c"]);
        }
        assert_eq!(sink.count("unresolved_country"), 1);
    }

    #[test]
    fn country_bucket_drill_down_sets_display_name() {
        let (mut dash, _) = dashboard(fixture());
        dash.activate(None);
        assert!(dash.drill_down(Dimension::Country, DrillTarget::Bucket { key: "UG", count: 1 }));
        assert_eq!(dash.store().state().country, Selection::Only("Uganda".to_string()));
        assert_eq!(dash.snapshot().filtered_ids, vec!["d"]);
    }

    #[test]
    fn undated_collections_have_no_timeline() {
        let mut undated = CandidateRecord::new("x", "op-1");
        undated.selected_tier = Some("Silver".into());
        let (mut dash, _) = dashboard(vec![undated]);
        dash.activate(None);
        let snapshot = dash.snapshot();
        assert!(snapshot.timeline.is_none());
        assert_eq!(snapshot.tiers.get("Silver"), Some(&1));
        assert!(snapshot.countries.is_empty());
    }
}
