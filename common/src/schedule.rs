use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    sensors::SensorReader,
    types::{Fingerprint, Occupancy},
    window,
};

const TIME_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub fn index(self) -> usize {
        match self {
            Self::Mon => 0,
            Self::Tue => 1,
            Self::Wed => 2,
            Self::Thu => 3,
            Self::Fri => 4,
            Self::Sat => 5,
            Self::Sun => 6,
        }
    }

    pub fn from_index(index: usize) -> Self {
        match index % 7 {
            0 => Self::Mon,
            1 => Self::Tue,
            2 => Self::Wed,
            3 => Self::Thu,
            4 => Self::Fri,
            5 => Self::Sat,
            _ => Self::Sun,
        }
    }

    pub fn from_chrono(weekday: Weekday) -> Self {
        Self::from_index(weekday.num_days_from_monday() as usize)
    }

    pub fn previous(self) -> Self {
        Self::from_index(self.index() + 6)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("rule `{title}`: invalid {field} `{value}`, expected HH:MM")]
    InvalidTime {
        title: String,
        field: &'static str,
        value: String,
    },
    #[error("rule `{title}`: operation must not be empty")]
    EmptyOperation { title: String },
    #[error("rule `{title}`: setpoint {value} is not a finite number")]
    InvalidSetpoint { title: String, value: f32 },
    #[error("rule `{title}`: humidity threshold {value} must be within 0-100")]
    InvalidHumidityThreshold { title: String, value: f32 },
    #[error("rule `{title}`: humidity requirement needs a sensor")]
    MissingHumiditySensor { title: String },
    #[error("duplicate schedules for mode `{mode}` and device `{device}`")]
    DuplicateEntry { mode: String, device: String },
}

/// Seven characters, Monday first. `-` and `.` mark inactive days; anything
/// else is active. Masks of any other length never restrict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayMask(String);

impl DayMask {
    pub fn new(mask: impl Into<String>) -> Self {
        Self(mask.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn permits(&self, day: DayOfWeek) -> bool {
        let flags: Vec<char> = self.0.chars().collect();
        if flags.len() != 7 {
            return true;
        }
        !matches!(flags[day.index()], '-' | '.')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OccupancyRequirement {
    #[default]
    Any,
    Home,
    Away,
}

impl OccupancyRequirement {
    pub fn allows(self, occupancy: Occupancy) -> bool {
        match self {
            Self::Any => true,
            Self::Home => occupancy == Occupancy::Home,
            Self::Away => occupancy == Occupancy::Away,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumidityRequirement {
    pub sensor: String,
    pub threshold: f32,
}

impl HumidityRequirement {
    /// Active only while the room is at least as humid as the threshold.
    pub fn allows(&self, sensors: &dyn SensorReader) -> bool {
        sensors
            .read_numeric(&self.sensor)
            .map(|humidity| humidity >= self.threshold)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RuleConfig", into = "RuleConfig")]
pub struct Rule {
    pub title: String,
    pub time_on: Option<NaiveTime>,
    pub time_off: Option<NaiveTime>,
    pub days: Option<DayMask>,
    pub operation: String,
    pub setpoint: Option<f32>,
    pub window: Option<String>,
    pub occupancy: OccupancyRequirement,
    pub humidity: Option<HumidityRequirement>,
}

impl Rule {
    pub fn new(title: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            time_on: None,
            time_off: None,
            days: None,
            operation: operation.into(),
            setpoint: None,
            window: None,
            occupancy: OccupancyRequirement::Any,
            humidity: None,
        }
    }

    pub fn with_times(mut self, time_on: NaiveTime, time_off: NaiveTime) -> Self {
        self.time_on = Some(time_on);
        self.time_off = Some(time_off);
        self
    }

    pub fn with_days(mut self, mask: impl Into<String>) -> Self {
        self.days = Some(DayMask::new(mask));
        self
    }

    pub fn with_setpoint(mut self, setpoint: f32) -> Self {
        self.setpoint = Some(setpoint);
        self
    }

    pub fn with_window(mut self, sensor: impl Into<String>) -> Self {
        self.window = Some(sensor.into());
        self
    }

    pub fn with_occupancy(mut self, occupancy: OccupancyRequirement) -> Self {
        self.occupancy = occupancy;
        self
    }

    pub fn with_humidity(mut self, sensor: impl Into<String>, threshold: f32) -> Self {
        self.humidity = Some(HumidityRequirement {
            sensor: sensor.into(),
            threshold,
        });
        self
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.operation.trim().is_empty() {
            return Err(ScheduleError::EmptyOperation {
                title: self.title.clone(),
            });
        }
        if let Some(value) = self.setpoint {
            if !value.is_finite() {
                return Err(ScheduleError::InvalidSetpoint {
                    title: self.title.clone(),
                    value,
                });
            }
        }
        if let Some(humidity) = &self.humidity {
            if humidity.sensor.trim().is_empty() {
                return Err(ScheduleError::MissingHumiditySensor {
                    title: self.title.clone(),
                });
            }
            if !(0.0..=100.0).contains(&humidity.threshold) {
                return Err(ScheduleError::InvalidHumidityThreshold {
                    title: self.title.clone(),
                    value: humidity.threshold,
                });
            }
        }
        Ok(())
    }

    /// Both ends must be present for the rule to be time-limited.
    pub fn interval(&self) -> Option<(NaiveTime, NaiveTime)> {
        Some((self.time_on?, self.time_off?))
    }

    pub fn start_day(&self, now: NaiveTime, today: DayOfWeek) -> DayOfWeek {
        match self.interval() {
            Some((begin, end)) => window::start_weekday(begin, end, now, today),
            None => today,
        }
    }

    /// Start of the rule's window, midnight for open-ended rules.
    pub fn anchor(&self) -> NaiveTime {
        self.time_on.unwrap_or(NaiveTime::MIN)
    }

    /// Humidity is only read once every cheaper condition already holds.
    pub fn is_active(
        &self,
        now: NaiveTime,
        today: DayOfWeek,
        occupancy: Occupancy,
        sensors: &dyn SensorReader,
    ) -> bool {
        let day_match = self
            .days
            .as_ref()
            .map(|mask| mask.permits(self.start_day(now, today)))
            .unwrap_or(true);
        if !day_match {
            return false;
        }

        let in_interval = self
            .interval()
            .map(|(begin, end)| window::is_within(begin, end, now))
            .unwrap_or(true);
        if !in_interval || !self.occupancy.allows(occupancy) {
            return false;
        }

        self.humidity
            .as_ref()
            .map(|humidity| humidity.allows(sensors))
            .unwrap_or(true)
    }

    /// A window sensor that cannot be read counts as closed.
    pub fn window_open(&self, sensors: &dyn SensorReader) -> bool {
        self.window
            .as_deref()
            .and_then(|sensor| sensors.read_binary(sensor))
            .unwrap_or(false)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(&self.operation, self.setpoint)
    }
}

/// On-disk form of a [`Rule`], with times as `HH:MM` strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_off: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<DayMask>,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    #[serde(default)]
    pub occupancy: OccupancyRequirement,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<HumidityRequirement>,
}

fn parse_time(
    title: &str,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<NaiveTime>, ScheduleError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(raw.trim(), TIME_FORMAT)
        .map(Some)
        .map_err(|_| ScheduleError::InvalidTime {
            title: title.to_string(),
            field,
            value: raw.to_string(),
        })
}

impl TryFrom<RuleConfig> for Rule {
    type Error = ScheduleError;

    fn try_from(config: RuleConfig) -> Result<Self, Self::Error> {
        let time_on = parse_time(&config.title, "time_on", config.time_on.as_deref())?;
        let time_off = parse_time(&config.title, "time_off", config.time_off.as_deref())?;

        let rule = Rule {
            title: config.title,
            time_on,
            time_off,
            days: config.days,
            operation: config.operation,
            setpoint: config.setpoint,
            window: config.window,
            occupancy: config.occupancy,
            humidity: config.humidity,
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl From<Rule> for RuleConfig {
    fn from(rule: Rule) -> Self {
        Self {
            title: rule.title,
            time_on: rule.time_on.map(|t| t.format(TIME_FORMAT).to_string()),
            time_off: rule.time_off.map(|t| t.format(TIME_FORMAT).to_string()),
            days: rule.days,
            operation: rule.operation,
            setpoint: rule.setpoint,
            window: rule.window,
            occupancy: rule.occupancy,
            humidity: rule.humidity,
        }
    }
}
