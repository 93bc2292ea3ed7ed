use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{debug, trace};

use crate::canonical::{device_filter_value, Canonicalizer, CountryCode, DeviceClass};
use crate::records::CandidateRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Country,
    Device,
    Status,
    Tier,
    Opening,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Country => "country",
            Dimension::Device => "device",
            Dimension::Status => "status",
            Dimension::Tier => "tier",
            Dimension::Opening => "opening",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "country" => Some(Dimension::Country),
            "device" => Some(Dimension::Device),
            "status" => Some(Dimension::Status),
            "tier" => Some(Dimension::Tier),
            "opening" => Some(Dimension::Opening),
            _ => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FilterValue {
    Single(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            FilterValue::Single(value) => Some(value.as_str()),
            FilterValue::Many(values) => values.first().map(String::as_str),
        }
    }

    pub fn into_values(self) -> Vec<String> {
        match self {
            FilterValue::Single(value) => vec![value],
            FilterValue::Many(values) => values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterEvent {
    pub dimension: Dimension,
    pub value: FilterValue,
}

/// What a visualization segment reported when it was activated.
#[derive(Debug, Clone, Copy)]
pub enum DrillTarget<'a> {
    /// A canonical bucket key (country code, status, tier, opening id) and its count.
    Bucket { key: &'a str, count: usize },
    /// A device group label plus the records the chart aggregated into it.
    DeviceGroup {
        class: DeviceClass,
        records: &'a [CandidateRecord],
        count: usize,
    },
}

/// The single owner of filter mutation. The store implements it; closures do
/// too so collaborators can observe `(dimension, value)` pairs directly.
pub trait FilterSink {
    fn on_filter(&mut self, event: FilterEvent);
}

impl<F> FilterSink for F
where
    F: FnMut(FilterEvent),
{
    fn on_filter(&mut self, event: FilterEvent) {
        self(event)
    }
}

/// Turns drill-down clicks into filter events using the canonical vocabulary.
#[derive(Clone)]
pub struct FilterEventBus {
    canonicalizer: Canonicalizer,
}

impl FilterEventBus {
    pub fn new(canonicalizer: Canonicalizer) -> Self {
        Self { canonicalizer }
    }

    pub fn resolve(&self, dimension: Dimension, target: DrillTarget<'_>) -> Option<FilterEvent> {
        match target {
            DrillTarget::Bucket { key, count } => {
                if count == 0 {
                    trace!(target: "filter_events", %dimension, key, "ignoring empty bucket");
                    return None;
                }
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                let value = match dimension {
                    Dimension::Country => {
                        let code = CountryCode::from_bucket_key(key);
                        self.canonicalizer.country_name(&code).to_string()
                    }
                    _ => key.to_string(),
                };
                Some(FilterEvent {
                    dimension,
                    value: FilterValue::Single(value),
                })
            }
            DrillTarget::DeviceGroup {
                class,
                records,
                count,
            } => {
                if count == 0 {
                    trace!(target: "filter_events", %dimension, class = class.as_str(), "ignoring empty group");
                    return None;
                }
                let raw_values = self.group_members(class, records);
                if raw_values.is_empty() {
                    debug!(
                        target: "filter_events",
                        class = class.as_str(),
                        "device group has no underlying raw values"
                    );
                    return None;
                }
                Some(FilterEvent {
                    dimension,
                    value: FilterValue::Many(raw_values),
                })
            }
        }
    }

    /// Delivers the resolved event to `sink`. Returns whether anything was sent.
    pub fn on_drill_down(
        &self,
        sink: &mut dyn FilterSink,
        dimension: Dimension,
        target: DrillTarget<'_>,
    ) -> bool {
        match self.resolve(dimension, target) {
            Some(event) => {
                debug!(target: "filter_events", %dimension, value = ?event.value, "drill-down forwarded");
                sink.on_filter(event);
                true
            }
            None => false,
        }
    }

    /// Distinct device filter values whose class is `class`, sorted. Blank raw
    /// strings are carried as the `UNKNOWN` token.
    pub fn group_members(&self, class: DeviceClass, records: &[CandidateRecord]) -> Vec<String> {
        records
            .iter()
            .filter(|record| record.is_structurally_valid())
            .filter_map(|record| record.device_raw.as_deref())
            .filter(|raw| self.canonicalizer.canonicalize_device(Some(raw)) == class)
            .map(|raw| device_filter_value(raw).to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::tests::canonicalizer;

    fn device_record(id: &str, device: &str) -> CandidateRecord {
        let mut record = CandidateRecord::new(id, "op-1");
        record.device_raw = Some(device.to_string());
        record
    }

    #[test]
    fn mobile_group_forwards_every_raw_value() {
        let (canon, _) = canonicalizer();
        let bus = FilterEventBus::new(canon);
        let records = vec![
            device_record("a", "IOS-SAFARI"),
            device_record("b", "ANDROID"),
            device_record("c", "Windows"),
            device_record("d", "ANDROID"),
        ];

        let mut seen = Vec::new();
        let mut sink = |event: FilterEvent| seen.push(event);
        let sent = bus.on_drill_down(
            &mut sink,
            Dimension::Device,
            DrillTarget::DeviceGroup {
                class: DeviceClass::Mobile,
                records: &records,
                count: 3,
            },
        );

        assert!(sent);
        assert_eq!(
            seen,
            vec![FilterEvent {
                dimension: Dimension::Device,
                value: FilterValue::Many(vec!["ANDROID".into(), "IOS-SAFARI".into()]),
            }]
        );
    }

    #[test]
    fn other_group_forwards_blank_devices_as_unknown() {
        let (canon, _) = canonicalizer();
        let bus = FilterEventBus::new(canon);
        let records = vec![device_record("a", ""), device_record("b", "Windows"), device_record("c", "  ")];

        let event = bus
            .resolve(
                Dimension::Device,
                DrillTarget::DeviceGroup {
                    class: DeviceClass::Other,
                    records: &records,
                    count: 2,
                },
            )
            .unwrap();
        assert_eq!(event.value, FilterValue::Many(vec!["UNKNOWN".into()]));
    }

    #[test]
    fn empty_segments_emit_nothing() {
        let (canon, _) = canonicalizer();
        let bus = FilterEventBus::new(canon);
        let records = vec![device_record("a", "ANDROID")];
        let mut seen: Vec<FilterEvent> = Vec::new();
        let mut sink = |event: FilterEvent| seen.push(event);

        assert!(!bus.on_drill_down(
            &mut sink,
            Dimension::Device,
            DrillTarget::DeviceGroup {
                class: DeviceClass::Mobile,
                records: &records,
                count: 0,
            },
        ));
        assert!(!bus.on_drill_down(
            &mut sink,
            Dimension::Country,
            DrillTarget::Bucket { key: "KE", count: 0 },
        ));
        assert!(!bus.on_drill_down(
            &mut sink,
            Dimension::Device,
            DrillTarget::DeviceGroup {
                class: DeviceClass::Desktop,
                records: &records,
                count: 1,
            },
        ));
        assert!(seen.is_empty());
    }

    #[test]
    fn country_buckets_forward_display_names() {
        let (canon, _) = canonicalizer();
        let bus = FilterEventBus::new(canon);
        let event = bus
            .resolve(Dimension::Country, DrillTarget::Bucket { key: "KE", count: 2 })
            .unwrap();
        assert_eq!(event.value, FilterValue::Single("Kenya".into()));

        let unknown = bus
            .resolve(
                Dimension::Country,
                DrillTarget::Bucket {
                    key: "Unknown",
                    count: 1,
                },
            )
            .unwrap();
        assert_eq!(unknown.value.first(), Some("Unknown"));
    }

    #[test]
    fn other_dimensions_forward_keys_verbatim() {
        let (canon, _) = canonicalizer();
        let bus = FilterEventBus::new(canon);
        let event = bus
            .resolve(
                Dimension::Tier,
                DrillTarget::Bucket {
                    key: "Gold Member",
                    count: 4,
                },
            )
            .unwrap();
        assert_eq!(event.dimension, Dimension::Tier);
        assert_eq!(event.value.into_values(), vec!["Gold Member".to_string()]);
    }

    #[test]
    fn parses_dimension_names() {
        assert_eq!(Dimension::parse(" Country "), Some(Dimension::Country));
        assert_eq!(Dimension::parse("month"), None);
        assert_eq!(Dimension::Device.to_string(), "device");
    }
}
