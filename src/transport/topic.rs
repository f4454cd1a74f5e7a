use std::str::FromStr;

use crate::domain::SensorType;

/// Wildcard filter covering every reading topic.
pub const READINGS_FILTER: &str = "sensors/#";

const ROOT: &str = "sensors";

/// `sensors/<sensor_type>/<sensor_id>`
pub fn reading_topic(sensor_type: SensorType, sensor_id: &str) -> String {
    format!("{ROOT}/{sensor_type}/{sensor_id}")
}

/// Split a reading topic into its type and sensor id.
pub fn parse_reading_topic(topic: &str) -> Option<(SensorType, &str)> {
    let mut parts = topic.splitn(3, '/');
    if parts.next()? != ROOT {
        return None;
    }
    let sensor_type = SensorType::from_str(parts.next()?).ok()?;
    let sensor_id = parts.next().filter(|id| !id.is_empty())?;
    Some((sensor_type, sensor_id))
}

/// MQTT-style filter match: `+` matches one level, a trailing `#` matches the rest.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
