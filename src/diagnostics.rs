use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::errors::AppResult;

/// Non-fatal data-quality and degradation events raised by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    UnresolvedCountry {
        raw: String,
    },
    InvalidCollection {
        records: usize,
        reason: String,
    },
    StorageFailure {
        key: String,
        operation: &'static str,
        error: String,
    },
    CorruptedPreference {
        key: String,
        value: String,
    },
}

impl Diagnostic {
    pub fn name(&self) -> &'static str {
        match self {
            Diagnostic::UnresolvedCountry { .. } => "unresolved_country",
            Diagnostic::InvalidCollection { .. } => "invalid_collection",
            Diagnostic::StorageFailure { .. } => "storage_failure",
            Diagnostic::CorruptedPreference { .. } => "corrupted_preference",
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

#[derive(Default)]
pub struct InMemoryDiagnostics {
    events: Mutex<Vec<Diagnostic>>,
}

impl InMemoryDiagnostics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

impl DiagnosticSink for InMemoryDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        self.events.lock().push(diagnostic);
    }
}

/// Buffers diagnostics and appends them as JSON lines under the data directory.
#[derive(Clone)]
pub struct DiagnosticsLog {
    enabled: Arc<AtomicBool>,
    queue: Arc<Mutex<Vec<DiagnosticEvent>>>,
    buffer_path: PathBuf,
    batch_size: usize,
    max_file_bytes: u64,
    max_file_count: usize,
}

impl DiagnosticsLog {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &AppConfig) -> AppResult<Self> {
        let data_dir = data_dir.as_ref();
        fs::create_dir_all(data_dir)?;
        let buffer_path = data_dir.join("diagnostics.jsonl");
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&buffer_path)?;

        Ok(Self {
            enabled: Arc::new(AtomicBool::new(config.diagnostics_enabled)),
            queue: Arc::new(Mutex::new(Vec::new())),
            buffer_path,
            batch_size: config.diagnostics_batch_size.max(1),
            max_file_bytes: config.diagnostics_buffer_max_bytes,
            max_file_count: config.diagnostics_buffer_max_files.max(1),
        })
    }

    pub fn record(&self, diagnostic: Diagnostic) -> AppResult<()> {
        if !self.enabled.load(Ordering::Relaxed) {
            return Ok(());
        }

        let mut queue = self.queue.lock();
        queue.push(DiagnosticEvent::new(diagnostic));
        if queue.len() >= self.batch_size {
            self.persist_locked(&mut queue)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        let mut queue = self.queue.lock();
        self.persist_locked(&mut queue)
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn persist_locked(&self, queue: &mut Vec<DiagnosticEvent>) -> AppResult<()> {
        if queue.is_empty() {
            return Ok(());
        }

        let mut lines = Vec::with_capacity(queue.len());
        let mut incoming = 0_u64;
        for event in queue.iter() {
            let line = serde_json::to_vec(event)?;
            incoming += (line.len() + 1) as u64;
            lines.push(line);
        }

        self.rotate_if_needed(incoming)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.buffer_path)?;
        for line in &lines {
            file.write_all(line)?;
            file.write_all(b"\n")?;
        }
        file.flush()?;
        queue.clear();
        Ok(())
    }

    fn rotate_if_needed(&self, incoming_bytes: u64) -> AppResult<()> {
        let current_size = fs::metadata(&self.buffer_path)
            .map(|m| m.len())
            .unwrap_or(0);
        if current_size + incoming_bytes <= self.max_file_bytes {
            return Ok(());
        }

        if self.max_file_count > 1 && self.buffer_path.exists() {
            let rotated = self.buffer_path.with_file_name(format!(
                "diagnostics-{}.jsonl",
                Utc::now().format("%Y%m%d%H%M%S%3f")
            ));
            fs::rename(&self.buffer_path, &rotated)?;
            self.prune_rotations()?;
        }

        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.buffer_path)?;
        Ok(())
    }

    fn prune_rotations(&self) -> AppResult<()> {
        let parent = self.buffer_path.parent().unwrap_or_else(|| Path::new("."));
        let mut rotations = fs::read_dir(parent)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with("diagnostics-") && name.ends_with(".jsonl")
            })
            .map(|entry| entry.path())
            .collect::<Vec<_>>();

        // rotation names embed a sortable timestamp
        rotations.sort();
        let allowed = self.max_file_count.saturating_sub(1);
        if rotations.len() > allowed {
            let excess = rotations.len() - allowed;
            for path in rotations.into_iter().take(excess) {
                let _ = fs::remove_file(path);
            }
        }
        Ok(())
    }
}

impl DiagnosticSink for DiagnosticsLog {
    fn report(&self, diagnostic: Diagnostic) {
        debug!(target: "diagnostics", kind = diagnostic.name(), ?diagnostic, "diagnostic raised");
        if let Err(err) = self.record(diagnostic) {
            warn!(target: "diagnostics", ?err, "failed to buffer diagnostic event");
        }
    }
}

#[derive(Debug, Serialize)]
struct DiagnosticEvent {
    name: &'static str,
    timestamp: DateTime<Utc>,
    payload: Diagnostic,
}

impl DiagnosticEvent {
    fn new(payload: Diagnostic) -> Self {
        Self {
            name: payload.name(),
            timestamp: Utc::now(),
            payload,
        }
    }
}
