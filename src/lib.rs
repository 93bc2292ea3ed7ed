mod aggregate;
mod canonical;
mod config;
mod dashboard;
mod diagnostics;
mod errors;
mod events;
mod filters;
mod range;
mod records;
mod reference;
mod scheduler;
mod storage;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::aggregate::{
    color_tier, group_by, group_by_time, latest_year, month_of_year, BucketMap, ColorTier,
    MonthlySeries, MONTHS_PER_YEAR, MONTH_LABELS,
};
pub use crate::canonical::{
    Canonicalizer, CanonicalizerOptions, CountryCode, DeviceClass, NormalizedDevice,
    UNKNOWN_COUNTRY, UNKNOWN_DEVICE_TOKEN,
};
pub use crate::config::AppConfig;
pub use crate::dashboard::{
    CountryBucket, CountryOption, Dashboard, DashboardSnapshot, TierSeries, TierTimeline,
};
pub use crate::diagnostics::{Diagnostic, DiagnosticSink, DiagnosticsLog, InMemoryDiagnostics};
pub use crate::errors::{AppError, AppResult};
pub use crate::events::{Dimension, DrillTarget, FilterEvent, FilterEventBus, FilterSink, FilterValue};
pub use crate::filters::{
    Activation, FilterChangeCallback, FilterState, FilterStateStore, InitialFilters, Selection,
    SortOrder, PERSISTED_KEYS,
};
pub use crate::range::{trim, TimeWindow};
pub use crate::records::{
    parse_records, parse_timestamp, validate_collection, CandidateRecord, CandidateStatus,
    CollectionIssue, JobType,
};
pub use crate::reference::{CountryEntry, CountryTable};
pub use crate::scheduler::{Scheduled, ScheduledTask};
pub use crate::storage::{FilterStorage, MemoryStorage, SqliteStorage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub storage_path: String,
    pub storage_recovered: bool,
    pub diagnostics_buffer_path: String,
    pub diagnostics_queue_depth: usize,
    pub country_table_size: usize,
    pub config: AppConfig,
}

/// Process-level wiring shared by every dashboard: configuration, the country
/// reference, filter persistence and the diagnostics log.
pub struct AnalyticsEngine {
    config: AppConfig,
    canonicalizer: Canonicalizer,
    storage: Arc<SqliteStorage>,
    diagnostics: DiagnosticsLog,
    data_dir: PathBuf,
}

impl AnalyticsEngine {
    pub fn initialize<P: AsRef<Path>>(data_dir: P) -> AppResult<Self> {
        init_tracing();
        Self::with_config(data_dir, AppConfig::from_env())
    }

    pub fn with_config<P: AsRef<Path>>(data_dir: P, config: AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        if data_dir.as_os_str().is_empty() {
            return Err(AppError::Path("data directory is empty".into()));
        }
        std::fs::create_dir_all(data_dir)?;

        let diagnostics = DiagnosticsLog::new(data_dir, &config)?;
        let table = match &config.country_table_path {
            Some(path) => CountryTable::from_path(path)?,
            None => CountryTable::builtin()?,
        };
        let storage = SqliteStorage::open(data_dir, &config.storage_file_name)?;
        if storage.recovered() {
            warn!(
                target: "engine",
                path = %storage.path().display(),
                "filter preferences were unreadable and have been reset"
            );
        }

        let canonicalizer = Canonicalizer::new(
            Arc::new(table),
            CanonicalizerOptions::from_config(&config),
            Arc::new(diagnostics.clone()),
        );
        info!(
            target: "engine",
            data_dir = %data_dir.display(),
            countries = canonicalizer.table().len(),
            debounce_ms = config.filter_debounce_ms,
            "analytics engine ready"
        );

        Ok(Self {
            config,
            canonicalizer,
            storage: Arc::new(storage),
            diagnostics,
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canonicalizer
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn storage(&self) -> Arc<dyn FilterStorage> {
        self.storage.clone()
    }

    /// A dashboard over `records`. Call [`Dashboard::activate`] before use so
    /// persisted filters are applied.
    pub fn open_dashboard(
        &self,
        records: Vec<CandidateRecord>,
        on_change: FilterChangeCallback,
    ) -> Dashboard {
        let store = FilterStateStore::new(self.storage(), self.canonicalizer.clone(), on_change)
            .with_debounce(self.config.filter_debounce());
        Dashboard::new(records, store, self.canonicalizer.clone())
    }

    pub fn flush_diagnostics(&self) -> AppResult<()> {
        self.diagnostics.flush()
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            storage_path: self.storage.path().to_string_lossy().to_string(),
            storage_recovered: self.storage.recovered(),
            diagnostics_buffer_path: self.diagnostics.buffer_path().to_string_lossy().to_string(),
            diagnostics_queue_depth: self.diagnostics.queue_depth(),
            country_table_size: self.canonicalizer.table().len(),
            config: self.config.clone(),
        }
    }
}

impl Drop for AnalyticsEngine {
    fn drop(&mut self) {
        if let Err(err) = self.diagnostics.flush() {
            warn!(target: "engine", ?err, "failed to flush diagnostics on shutdown");
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,candidate_analytics=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
