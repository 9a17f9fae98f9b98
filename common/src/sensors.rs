use std::collections::HashMap;

/// Point-in-time access to external entity states. Reads that cannot be
/// answered return `None` and the caller treats the condition as unmet.
pub trait SensorReader {
    fn read_binary(&self, entity: &str) -> Option<bool>;
    fn read_numeric(&self, entity: &str) -> Option<f32>;
}

/// Raw entity states keyed by entity id, as last reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    states: HashMap<String, String>,
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the stored value actually changed.
    pub fn update(&mut self, entity: impl Into<String>, value: impl Into<String>) -> bool {
        let entity = entity.into();
        let value = value.into();
        if self.states.get(&entity) == Some(&value) {
            return false;
        }
        self.states.insert(entity, value);
        true
    }

    pub fn remove(&mut self, entity: &str) -> bool {
        self.states.remove(entity).is_some()
    }

    pub fn state(&self, entity: &str) -> Option<&str> {
        self.states.get(entity).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl SensorReader for SensorSnapshot {
    fn read_binary(&self, entity: &str) -> Option<bool> {
        let value = self.state(entity)?.trim();
        if value.eq_ignore_ascii_case("on") {
            Some(true)
        } else if value.eq_ignore_ascii_case("off") {
            Some(false)
        } else {
            None
        }
    }

    fn read_numeric(&self, entity: &str) -> Option<f32> {
        self.state(entity)?
            .trim()
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_reads_only_accept_on_and_off() {
        let mut snapshot = SensorSnapshot::new();
        snapshot.update("binary_sensor.window", "ON");
        snapshot.update("binary_sensor.door", "off");
        snapshot.update("binary_sensor.flaky", "unavailable");

        assert_eq!(snapshot.read_binary("binary_sensor.window"), Some(true));
        assert_eq!(snapshot.read_binary("binary_sensor.door"), Some(false));
        assert_eq!(snapshot.read_binary("binary_sensor.flaky"), None);
        assert_eq!(snapshot.read_binary("binary_sensor.missing"), None);
    }

    #[test]
    fn numeric_reads_reject_garbage() {
        let mut snapshot = SensorSnapshot::new();
        snapshot.update("sensor.humidity", " 61.5 ");
        snapshot.update("sensor.broken", "unknown");
        snapshot.update("sensor.nan", "NaN");

        assert_eq!(snapshot.read_numeric("sensor.humidity"), Some(61.5));
        assert_eq!(snapshot.read_numeric("sensor.broken"), None);
        assert_eq!(snapshot.read_numeric("sensor.nan"), None);
    }

    #[test]
    fn update_reports_changes_only() {
        let mut snapshot = SensorSnapshot::new();
        assert!(snapshot.update("input_select.climate_mode", "Hot Summer"));
        assert!(!snapshot.update("input_select.climate_mode", "Hot Summer"));
        assert!(snapshot.update("input_select.climate_mode", "Winter"));
        assert_eq!(snapshot.len(), 1);
    }
}
