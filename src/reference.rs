use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::errors::{AppError, AppResult};

const BUILTIN_COUNTRIES: &str = include_str!("../data/countries.csv");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountryEntry {
    pub code: String,
    pub name: String,
    name_key: String,
}

impl CountryEntry {
    /// Upper-cased display name used for case-insensitive comparisons.
    pub fn name_key(&self) -> &str {
        &self.name_key
    }
}

#[derive(Debug, Deserialize)]
struct CountryRow {
    code: String,
    name: String,
}

/// Immutable code/name lookup, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct CountryTable {
    entries: Vec<CountryEntry>,
    by_code: HashMap<String, usize>,
    by_name: HashMap<String, usize>,
}

impl CountryTable {
    pub fn builtin() -> AppResult<Self> {
        Self::from_reader(BUILTIN_COUNTRIES.as_bytes())
    }

    pub fn from_path(path: &Path) -> AppResult<Self> {
        let file = File::open(path).map_err(|err| {
            AppError::Path(format!("country table {}: {err}", path.display()))
        })?;
        let table = Self::from_reader(file)?;
        info!(
            target: "reference",
            path = %path.display(),
            countries = table.len(),
            "loaded country reference table"
        );
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> AppResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut rows = Vec::new();
        for row in csv_reader.deserialize::<CountryRow>() {
            rows.push(row?);
        }
        Self::from_pairs(rows.into_iter().map(|row| (row.code, row.name)))
    }

    pub fn from_pairs<I, C, N>(pairs: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (C, N)>,
        C: Into<String>,
        N: Into<String>,
    {
        let mut table = Self {
            entries: Vec::new(),
            by_code: HashMap::new(),
            by_name: HashMap::new(),
        };
        for (code, name) in pairs {
            let code = code.into().trim().to_uppercase();
            let name = name.into().trim().to_string();
            if code.is_empty() || name.is_empty() {
                return Err(AppError::Reference(format!(
                    "blank code or name in entry {}",
                    table.entries.len() + 1
                )));
            }
            if table.by_code.contains_key(&code) {
                return Err(AppError::Reference(format!("duplicate country code {code}")));
            }
            let name_key = name.to_uppercase();
            let idx = table.entries.len();
            table.by_code.insert(code.clone(), idx);
            table.by_name.entry(name_key.clone()).or_insert(idx);
            table.entries.push(CountryEntry {
                code,
                name,
                name_key,
            });
        }
        if table.entries.is_empty() {
            return Err(AppError::Reference("country table is empty".into()));
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn get(&self, code: &str) -> Option<&CountryEntry> {
        self.by_code.get(code).map(|idx| &self.entries[*idx])
    }

    pub fn name(&self, code: &str) -> Option<&str> {
        self.get(code).map(|entry| entry.name.as_str())
    }

    /// Exact match on an upper-cased display name.
    pub fn code_for_name(&self, name_key: &str) -> Option<&str> {
        self.by_name
            .get(name_key)
            .map(|idx| self.entries[*idx].code.as_str())
    }

    /// Entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = &CountryEntry> {
        self.entries.iter()
    }
}
