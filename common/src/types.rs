use std::fmt;

use serde::{Deserialize, Serialize};

pub const OPERATION_OFF: &str = "off";
pub const DEFAULT_OFF_TITLE: &str = "Default (Off)";
pub const WINDOW_OPEN_SUFFIX: &str = " (Window open)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Timer,
    Event,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Event => "event",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Home,
    Away,
    Unknown,
}

impl Occupancy {
    pub fn from_reading(reading: Option<bool>) -> Self {
        match reading {
            Some(true) => Self::Home,
            Some(false) => Self::Away,
            None => Self::Unknown,
        }
    }
}

/// Renders a setpoint the way it is stored in fingerprints: integral values
/// lose the fractional part, missing values become `None`.
pub fn format_setpoint(setpoint: Option<f32>) -> String {
    match setpoint {
        Some(value) => format!("{value}"),
        None => "None".to_string(),
    }
}

/// Compact `"{operation}-{setpoint}"` encoding of the last applied target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(operation: &str, setpoint: Option<f32>) -> Self {
        Self(format!("{operation}-{}", format_setpoint(setpoint)))
    }

    pub fn default_off() -> Self {
        Self::new(OPERATION_OFF, None)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub operation: String,
    pub setpoint: Option<f32>,
    pub title: String,
    pub changed: bool,
}

impl Decision {
    pub fn default_off() -> Self {
        Self {
            operation: OPERATION_OFF.to_string(),
            setpoint: None,
            title: DEFAULT_OFF_TITLE.to_string(),
            changed: false,
        }
    }

    pub fn is_off(&self) -> bool {
        self.operation == OPERATION_OFF
    }
}

/// What the device itself last reported, when the caller knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub operation: String,
    pub setpoint: Option<f32>,
}

impl DeviceState {
    /// A decision without a setpoint only needs the operation to line up.
    pub fn satisfies(&self, decision: &Decision) -> bool {
        if self.operation != decision.operation {
            return false;
        }
        match decision.setpoint {
            Some(target) => self
                .setpoint
                .map(|current| (current - target).abs() <= f32::EPSILON)
                .unwrap_or(false),
            None => true,
        }
    }
}
