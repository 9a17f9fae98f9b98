pub const TOPIC_STATE_PREFIX: &str = "seasons/state/";
pub const TOPIC_STATE_WILDCARD: &str = "seasons/state/#";

pub const TOPIC_CONTROLLER_DECISIONS: &str = "seasons/controller/decisions";

pub const TOPIC_CMD_EVALUATE: &str = "seasons/cmnd/evaluate";
pub const TOPIC_CMD_CATALOG: &str = "seasons/cmnd/catalog";

pub fn entity_from_state_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_STATE_PREFIX)
        .filter(|entity| !entity.is_empty())
}

pub fn operation_command_topic(device: &str) -> String {
    format!("seasons/cmnd/{device}/operation")
}

pub fn temperature_command_topic(device: &str) -> String {
    format!("seasons/cmnd/{device}/temperature")
}

/// Entity carrying the setpoint a device reports next to its operation.
pub fn device_setpoint_entity(device: &str) -> String {
    format!("{device}/temperature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_entity_from_state_topic() {
        assert_eq!(
            entity_from_state_topic("seasons/state/binary_sensor.bedroom_window"),
            Some("binary_sensor.bedroom_window")
        );
        assert_eq!(entity_from_state_topic("seasons/state/"), None);
        assert_eq!(entity_from_state_topic("seasons/cmnd/evaluate"), None);
    }
}
