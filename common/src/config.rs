use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::debounce::DebouncePolicy;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonsConfig {
    /// Resolution of scheduled changes; also the timer period.
    pub interval_minutes: u32,
    /// Modes that leave devices under direct human control.
    pub manual_modes: Vec<String>,
    #[serde(default)]
    pub debounce: DebouncePolicy,
    /// Pause between the operation and temperature calls, per device.
    #[serde(default)]
    pub settle_delay_ms: BTreeMap<String, u64>,
}

impl Default for SeasonsConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            manual_modes: vec!["Manual".to_string()],
            debounce: DebouncePolicy::Fingerprint,
            settle_delay_ms: BTreeMap::new(),
        }
    }
}

impl SeasonsConfig {
    pub fn sanitize(&mut self) {
        self.interval_minutes = self.interval_minutes.clamp(1, 120);
        self.manual_modes.retain(|mode| !mode.trim().is_empty());
        for ms in self.settle_delay_ms.values_mut() {
            *ms = (*ms).min(30_000);
        }
    }

    pub fn is_manual_mode(&self, mode: &str) -> bool {
        self.manual_modes.iter().any(|manual| manual == mode)
    }

    pub fn settle_delay_for(&self, device: &str) -> Option<u64> {
        self.settle_delay_ms.get(device).copied()
    }
}

/// Where the controller finds the inputs it feeds to the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorConfig {
    pub global_mode: String,
    #[serde(default)]
    pub at_home: Option<String>,
    /// Devices evaluated on every tick. Empty means every catalog device.
    #[serde(default)]
    pub devices: Vec<String>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            global_mode: "input_select.climate_mode".to_string(),
            at_home: None,
            devices: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub seasons: SeasonsConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    pub timezone: String,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            seasons: SeasonsConfig::default(),
            sensors: SensorConfig::default(),
            timezone: "America/Los_Angeles".to_string(),
            network: NetworkConfig::default(),
        }
    }
}
