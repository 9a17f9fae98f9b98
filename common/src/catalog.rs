use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::schedule::{Rule, ScheduleError};

/// Example season table written out when no catalog is stored yet.
pub const EXAMPLE_CATALOG: &str = include_str!("../catalog.example.json");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub mode: String,
    pub device: String,
    pub rules: Vec<Rule>,
}

/// Rules keyed by (mode, device). Rule order inside an entry is significant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CatalogEntry>", into = "Vec<CatalogEntry>")]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, ScheduleError> {
        let mut seen = BTreeSet::new();
        for entry in &entries {
            if !seen.insert((entry.mode.as_str(), entry.device.as_str())) {
                return Err(ScheduleError::DuplicateEntry {
                    mode: entry.mode.clone(),
                    device: entry.device.clone(),
                });
            }
            for rule in &entry.rules {
                rule.validate()?;
            }
        }
        Ok(Self { entries })
    }

    pub fn example() -> Self {
        serde_json::from_str(EXAMPLE_CATALOG).unwrap_or_default()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn rules(&self, mode: &str, device: &str) -> Option<&[Rule]> {
        self.entries
            .iter()
            .find(|entry| entry.mode == mode && entry.device == device)
            .map(|entry| entry.rules.as_slice())
    }

    pub fn devices(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .map(|entry| entry.device.as_str())
            .collect()
    }

    /// Devices with at least one rule watching the given window sensor.
    pub fn devices_watching(&self, sensor: &str) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter(|entry| {
                entry
                    .rules
                    .iter()
                    .any(|rule| rule.window.as_deref() == Some(sensor))
            })
            .map(|entry| entry.device.as_str())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TryFrom<Vec<CatalogEntry>> for Catalog {
    type Error = ScheduleError;

    fn try_from(entries: Vec<CatalogEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<Catalog> for Vec<CatalogEntry> {
    fn from(catalog: Catalog) -> Self {
        catalog.entries
    }
}
