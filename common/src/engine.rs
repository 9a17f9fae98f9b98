use chrono::NaiveTime;
use serde::Serialize;

use crate::{
    catalog::Catalog,
    config::SeasonsConfig,
    debounce::{DebounceGate, Proposal},
    emitter::{self, ClimateAction},
    resolver::{self, MatchContext, Resolution, ResolutionKind},
    schedule::DayOfWeek,
    sensors::SensorReader,
    types::{Decision, DeviceState, Fingerprint, Occupancy, Trigger},
};

/// Everything known about one invocation for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub mode: String,
    pub device: String,
    pub now: NaiveTime,
    pub today: DayOfWeek,
    pub occupancy: Occupancy,
    pub trigger: Trigger,
    pub previous: Option<Fingerprint>,
    pub device_state: Option<DeviceState>,
}

impl EvaluationContext {
    fn match_context(&self) -> MatchContext<'_> {
        MatchContext {
            mode: &self.mode,
            device: &self.device,
            now: self.now,
            today: self.today,
            occupancy: self.occupancy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub resolution: ResolutionKind,
    /// `None` only when a manual mode leaves the device alone.
    pub decision: Option<Decision>,
    pub actions: Vec<ClimateAction>,
    /// Set when the fingerprint must be persisted: after an applied decision, or
    /// when an event finds the device already in the new target state.
    pub fingerprint: Option<Fingerprint>,
}

impl Evaluation {
    fn pass_through(resolution: ResolutionKind) -> Self {
        Self {
            resolution,
            decision: None,
            actions: Vec::new(),
            fingerprint: None,
        }
    }

    pub fn applied(&self) -> bool {
        self.decision
            .as_ref()
            .map(|decision| decision.changed)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct SeasonsEngine {
    config: SeasonsConfig,
    catalog: Catalog,
}

impl SeasonsEngine {
    pub fn new(mut config: SeasonsConfig, catalog: Catalog) -> Self {
        config.sanitize();
        Self { config, catalog }
    }

    pub fn config(&self) -> &SeasonsConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn set_catalog(&mut self, catalog: Catalog) -> bool {
        if self.catalog == catalog {
            return false;
        }
        self.catalog = catalog;
        true
    }

    pub fn evaluate(&self, ctx: &EvaluationContext, sensors: &dyn SensorReader) -> Evaluation {
        let resolution = resolver::resolve(&self.catalog, &ctx.match_context(), sensors);
        let kind = resolution.kind();

        let proposal = match resolution {
            Resolution::Matched(candidate) => Proposal {
                decision: candidate.decision(),
                fingerprint: candidate.fingerprint(),
                anchor: Some(candidate.rule.anchor()),
            },
            _ if self.config.is_manual_mode(&ctx.mode) => return Evaluation::pass_through(kind),
            _ => Proposal {
                decision: Decision::default_off(),
                fingerprint: Fingerprint::default_off(),
                anchor: None,
            },
        };

        let apply = self.gate().should_apply(
            ctx.trigger,
            &proposal,
            ctx.previous.as_ref(),
            ctx.device_state.as_ref(),
            ctx.now,
        );

        let Proposal {
            mut decision,
            fingerprint,
            ..
        } = proposal;
        decision.changed = apply;

        if !apply {
            // An event skipped because the device already holds the target
            // still records it, so the next tick does not resend it.
            let settled =
                ctx.trigger == Trigger::Event && ctx.previous.as_ref() != Some(&fingerprint);
            return Evaluation {
                resolution: kind,
                decision: Some(decision),
                actions: Vec::new(),
                fingerprint: settled.then_some(fingerprint),
            };
        }

        let actions = emitter::emit(&decision, self.config.settle_delay_for(&ctx.device));
        Evaluation {
            resolution: kind,
            decision: Some(decision),
            actions,
            fingerprint: Some(fingerprint),
        }
    }

    fn gate(&self) -> DebounceGate {
        DebounceGate::new(self.config.debounce, self.config.interval_minutes)
    }
}
