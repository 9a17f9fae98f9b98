use chrono::NaiveTime;
use serde::Serialize;

use crate::{
    catalog::Catalog,
    schedule::{DayOfWeek, Rule},
    sensors::SensorReader,
    types::{Decision, Fingerprint, Occupancy, OPERATION_OFF, WINDOW_OPEN_SUFFIX},
};

/// Inputs the resolver needs besides the catalog and sensor access.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    pub mode: &'a str,
    pub device: &'a str,
    pub now: NaiveTime,
    pub today: DayOfWeek,
    pub occupancy: Occupancy,
}

/// The rule that won, with the window sensor already read.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub index: usize,
    pub rule: Rule,
    pub window_open: bool,
}

impl Candidate {
    /// Window override forces `off` and drops the setpoint.
    pub fn decision(&self) -> Decision {
        if self.window_open {
            return Decision {
                operation: OPERATION_OFF.to_string(),
                setpoint: None,
                title: format!("{}{}", self.rule.title, WINDOW_OPEN_SUFFIX),
                changed: false,
            };
        }
        Decision {
            operation: self.rule.operation.clone(),
            setpoint: self.rule.setpoint,
            title: self.rule.title.clone(),
            changed: false,
        }
    }

    /// Always the rule's own target, even while a window forces `off`, so the
    /// override releases as soon as the window closes.
    pub fn fingerprint(&self) -> Fingerprint {
        self.rule.fingerprint()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched(Candidate),
    NoneActive,
    NoSchedules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Matched,
    NoneActive,
    NoSchedules,
}

impl Resolution {
    pub fn kind(&self) -> ResolutionKind {
        match self {
            Self::Matched(_) => ResolutionKind::Matched,
            Self::NoneActive => ResolutionKind::NoneActive,
            Self::NoSchedules => ResolutionKind::NoSchedules,
        }
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Matched(candidate) => Some(candidate),
            _ => None,
        }
    }
}

/// First rule whose conditions all hold wins; later rules are never looked at.
pub fn resolve(
    catalog: &Catalog,
    ctx: &MatchContext<'_>,
    sensors: &dyn SensorReader,
) -> Resolution {
    let Some(rules) = catalog.rules(ctx.mode, ctx.device) else {
        return Resolution::NoSchedules;
    };

    rules
        .iter()
        .position(|rule| rule.is_active(ctx.now, ctx.today, ctx.occupancy, sensors))
        .map(|index| {
            let rule = rules[index].clone();
            let window_open = rule.window_open(sensors);
            Resolution::Matched(Candidate {
                index,
                rule,
                window_open,
            })
        })
        .unwrap_or(Resolution::NoneActive)
}
