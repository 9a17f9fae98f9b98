use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{
    types::{Decision, DeviceState, Fingerprint, Trigger},
    window,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DebouncePolicy {
    /// Timer ticks re-apply only when the scheduled target changed since the
    /// last applied one.
    #[default]
    Fingerprint,
    /// Timer ticks apply only within `interval` minutes of the rule's start.
    FirstInterval,
}

/// What the gate needs to know about the proposed change.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub decision: Decision,
    pub fingerprint: Fingerprint,
    /// Start of the matched rule's window, `None` for the default-off fallback.
    pub anchor: Option<NaiveTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceGate {
    pub policy: DebouncePolicy,
    pub interval_minutes: u32,
}

impl DebounceGate {
    pub fn new(policy: DebouncePolicy, interval_minutes: u32) -> Self {
        Self {
            policy,
            interval_minutes,
        }
    }

    pub fn should_apply(
        &self,
        trigger: Trigger,
        proposal: &Proposal,
        previous: Option<&Fingerprint>,
        device_state: Option<&DeviceState>,
        now: NaiveTime,
    ) -> bool {
        match trigger {
            Trigger::Event => !device_state
                .map(|state| state.satisfies(&proposal.decision))
                .unwrap_or(false),
            Trigger::Timer => match proposal.anchor {
                // Default-off is idempotent on ticks under every policy.
                None => previous != Some(&proposal.fingerprint),
                Some(anchor) => match self.policy {
                    DebouncePolicy::Fingerprint => previous != Some(&proposal.fingerprint),
                    DebouncePolicy::FirstInterval => self.in_first_interval(anchor, now),
                },
            },
        }
    }

    fn in_first_interval(&self, anchor: NaiveTime, now: NaiveTime) -> bool {
        let minutes = i64::from(self.interval_minutes);
        window::is_within(
            window::offset(anchor, -minutes),
            window::offset(anchor, minutes),
            now,
        )
    }
}
