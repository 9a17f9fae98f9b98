use serde::Serialize;

use crate::types::Decision;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClimateAction {
    SetOperation { operation: String },
    SetTemperature { setpoint: f32, operation: String },
    Delay { ms: u64 },
}

/// Operation first, then the setpoint together with the operation so the
/// device never sees a setpoint for the wrong mode.
pub fn emit(decision: &Decision, settle_delay_ms: Option<u64>) -> Vec<ClimateAction> {
    let mut actions = vec![ClimateAction::SetOperation {
        operation: decision.operation.clone(),
    }];

    if let Some(setpoint) = decision.setpoint {
        if let Some(ms) = settle_delay_ms.filter(|ms| *ms > 0) {
            actions.push(ClimateAction::Delay { ms });
        }
        actions.push(ClimateAction::SetTemperature {
            setpoint,
            operation: decision.operation.clone(),
        });
    }

    actions
}

/// JSON number for a setpoint: whole degrees stay integers.
pub fn setpoint_value(setpoint: f32) -> serde_json::Value {
    if setpoint.fract() == 0.0 && setpoint.abs() < i64::MAX as f32 {
        serde_json::Value::from(setpoint as i64)
    } else {
        serde_json::Value::from(f64::from(setpoint))
    }
}
